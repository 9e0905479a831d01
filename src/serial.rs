//! Per-compositor serial numbers and event timestamps

use std::cell::Cell;
use std::time::{Duration, Instant};

/// Monotonically increasing serial generator for protocol events.
///
/// Wraps on overflow and never hands out zero, which clients treat as "no serial".
#[derive(Debug)]
pub struct SerialCounter {
    last: Cell<u32>,
}

impl Default for SerialCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SerialCounter {
    pub fn new() -> Self {
        Self { last: Cell::new(0) }
    }

    /// Next serial number
    pub fn next_serial(&self) -> u32 {
        let mut next = self.last.get().wrapping_add(1);
        if next == 0 {
            next = 1;
        }
        self.last.set(next);
        next
    }

    /// Last serial handed out (0 if none yet)
    pub fn last_serial(&self) -> u32 {
        self.last.get()
    }
}

/// Elapsed-time clock started when the compositor is constructed
#[derive(Debug, Clone, Copy)]
pub struct CompositorClock {
    started: Instant,
}

impl Default for CompositorClock {
    fn default() -> Self {
        Self::start()
    }
}

impl CompositorClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Milliseconds since start, truncated to the 32-bit protocol timestamp
    pub fn current_time_msecs(&self) -> u32 {
        self.started.elapsed().as_millis() as u32
    }
}
