//! Synchronous multi-subscriber notifications
//!
//! A [`Signal`] delivers a value to every connected handler, in connection
//! order, before `emit` returns. Handlers run on the dispatch thread and may
//! connect further handlers while being called; those are only invoked from
//! the next emission on.

use std::cell::{Cell, RefCell};
use std::fmt;

/// Handle returned by [`Signal::connect`], used to disconnect a handler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

type Slot<T> = (SlotId, Box<dyn FnMut(&T)>);

/// A synchronous notification with any number of handlers
pub struct Signal<T: ?Sized> {
    slots: RefCell<Vec<Slot<T>>>,
    removed: RefCell<Vec<SlotId>>,
    next_id: Cell<u64>,
    emitting: Cell<bool>,
}

impl<T: ?Sized> Default for Signal<T> {
    fn default() -> Self {
        Self {
            slots: RefCell::new(Vec::new()),
            removed: RefCell::new(Vec::new()),
            next_id: Cell::new(0),
            emitting: Cell::new(false),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("handlers", &self.handler_count())
            .finish()
    }
}

impl<T: ?Sized> Signal<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect a handler; it receives every subsequent emission
    pub fn connect<F>(&self, handler: F) -> SlotId
    where
        F: FnMut(&T) + 'static,
    {
        let id = SlotId(self.next_id.get());
        self.next_id.set(id.0 + 1);
        self.slots.borrow_mut().push((id, Box::new(handler)));
        id
    }

    /// Disconnect a handler. Returns false if it was not connected.
    pub fn disconnect(&self, id: SlotId) -> bool {
        if self.emitting.get() {
            self.removed.borrow_mut().push(id);
            return true;
        }
        let mut slots = self.slots.borrow_mut();
        let before = slots.len();
        slots.retain(|(slot, _)| *slot != id);
        slots.len() != before
    }

    /// Number of connected handlers
    pub fn handler_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Deliver `value` to every handler before returning
    pub fn emit(&self, value: &T) {
        // Handlers are moved out so they can connect to this signal while running.
        let mut running = std::mem::take(&mut *self.slots.borrow_mut());
        let was_emitting = self.emitting.replace(true);
        for (_, handler) in running.iter_mut() {
            handler(value);
        }
        self.emitting.set(was_emitting);

        let mut slots = self.slots.borrow_mut();
        running.append(&mut slots);
        *slots = running;
        if !was_emitting {
            let removed = std::mem::take(&mut *self.removed.borrow_mut());
            slots.retain(|(id, _)| !removed.contains(id));
        }
    }
}
