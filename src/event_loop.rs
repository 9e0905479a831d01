//! Host event-loop bridge
//!
//! The compositor does not own an event loop. It asks the host loop to watch
//! the protocol engine's descriptor and every listening socket, and dispatches
//! when any of them becomes readable and again right before the host blocks.

use calloop::generic::Generic;
use calloop::{EventLoop, Interest, LoopHandle, Mode, PostAction, RegistrationToken};
use log::{debug, warn};
use std::os::fd::{AsFd, BorrowedFd, RawFd};

use crate::compositor::Compositor;
use crate::error::{CompositorError, Result};

/// Work queued to run once the compositor is created
pub type ReadyCallback = Box<dyn FnOnce(&mut Compositor)>;

/// Handle to a descriptor watch registered with a [`HostLoop`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatchId(u64);

/// The parts of a host event loop the compositor needs
pub trait HostLoop {
    /// Call [`Compositor::process_wayland_events`] whenever `fd` is readable
    fn watch_readable(&mut self, fd: RawFd) -> Result<WatchId>;

    fn unwatch(&mut self, watch: WatchId);

    /// Run `callback` on the next loop iteration
    fn post(&mut self, callback: ReadyCallback);
}

/// Descriptor borrowed for the lifetime of a watch; never closed by us
#[derive(Debug)]
struct WatchedFd(RawFd);

impl AsFd for WatchedFd {
    fn as_fd(&self) -> BorrowedFd<'_> {
        // SAFETY: the compositor unwatches before the descriptor is closed
        unsafe { BorrowedFd::borrow_raw(self.0) }
    }
}

/// [`HostLoop`] on top of a calloop loop whose data gives access to the compositor
pub struct CalloopHost<D: 'static> {
    handle: LoopHandle<'static, D>,
    tokens: Vec<(WatchId, RegistrationToken)>,
    next_watch: u64,
}

impl<D: 'static> CalloopHost<D> {
    pub fn new(handle: LoopHandle<'static, D>) -> Self {
        Self {
            handle,
            tokens: Vec::new(),
            next_watch: 0,
        }
    }
}

impl<D: AsMut<Compositor> + 'static> HostLoop for CalloopHost<D> {
    fn watch_readable(&mut self, fd: RawFd) -> Result<WatchId> {
        let source = Generic::new(WatchedFd(fd), Interest::READ, Mode::Level);
        let token = self
            .handle
            .insert_source(source, |_, _, data: &mut D| {
                data.as_mut().process_wayland_events();
                Ok(PostAction::Continue)
            })
            .map_err(|e| CompositorError::EventLoop(e.error.to_string()))?;
        self.next_watch += 1;
        let watch = WatchId(self.next_watch);
        self.tokens.push((watch, token));
        debug!("Watching descriptor {} for readability", fd);
        Ok(watch)
    }

    fn unwatch(&mut self, watch: WatchId) {
        if let Some(index) = self.tokens.iter().position(|(id, _)| *id == watch) {
            let (_, token) = self.tokens.remove(index);
            self.handle.remove(token);
        }
    }

    fn post(&mut self, callback: ReadyCallback) {
        self.handle.insert_idle(move |data: &mut D| callback(data.as_mut()));
    }
}

/// Run `event_loop` until it is stopped, dispatching before every block
pub fn run<D: AsMut<Compositor>>(event_loop: &mut EventLoop<'static, D>, data: &mut D) -> Result<()> {
    event_loop
        .run(None, data, |data| data.as_mut().about_to_block())
        .map_err(|e| {
            warn!("Event loop terminated: {}", e);
            CompositorError::EventLoop(e.to_string())
        })
}
