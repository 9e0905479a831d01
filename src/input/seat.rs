//! Seats: one logical pointer, keyboard and touch device each

use log::debug;
use std::fmt;
use wayland_server::backend::GlobalId;
use wayland_server::protocol::wl_seat::{self, WlSeat};
use wayland_server::Resource;

use super::event::InputEvent;
use super::keyboard::Keyboard;
use super::pointer::Pointer;
use super::touch::Touch;
use super::DeviceFactory;
use crate::config::KeyboardConfig;
use crate::surface::SurfaceId;

/// Compositor-wide seat identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SeatId(pub(crate) u64);

/// Devices a seat provides
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatCapabilities {
    pub pointer: bool,
    pub keyboard: bool,
    pub touch: bool,
}

impl Default for SeatCapabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl SeatCapabilities {
    pub fn all() -> Self {
        Self {
            pointer: true,
            keyboard: true,
            touch: true,
        }
    }

    pub fn to_wire(self) -> wl_seat::Capability {
        let mut caps = wl_seat::Capability::empty();
        if self.pointer {
            caps |= wl_seat::Capability::Pointer;
        }
        if self.keyboard {
            caps |= wl_seat::Capability::Keyboard;
        }
        if self.touch {
            caps |= wl_seat::Capability::Touch;
        }
        caps
    }
}

/// Decides whether a seat claims an input event
pub type OwnerPredicate = Box<dyn Fn(&InputEvent) -> bool>;

pub struct Seat {
    id: SeatId,
    name: String,
    capabilities: SeatCapabilities,
    owner: Option<OwnerPredicate>,
    pointer: Option<Pointer>,
    keyboard: Option<Keyboard>,
    touch: Option<Touch>,
    initialized: bool,
    pub(crate) resources: Vec<WlSeat>,
    pub(crate) global: Option<GlobalId>,
}

impl fmt::Debug for Seat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Seat")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("initialized", &self.initialized)
            .field("keyboard", &self.keyboard)
            .finish()
    }
}

impl Seat {
    pub fn new(id: SeatId, name: impl Into<String>, capabilities: SeatCapabilities) -> Self {
        Self {
            id,
            name: name.into(),
            capabilities,
            owner: None,
            pointer: None,
            keyboard: None,
            touch: None,
            initialized: false,
            resources: Vec::new(),
            global: None,
        }
    }

    pub fn id(&self) -> SeatId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> SeatCapabilities {
        self.capabilities
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Restrict which events this seat claims. Without a predicate it claims everything.
    pub fn set_owner<F>(&mut self, predicate: F)
    where
        F: Fn(&InputEvent) -> bool + 'static,
    {
        self.owner = Some(Box::new(predicate));
    }

    pub fn is_owner(&self, event: &InputEvent) -> bool {
        self.owner.as_ref().map_or(true, |owner| owner(event))
    }

    /// Create the devices named by the capabilities
    pub(crate) fn initialize(&mut self, factory: &dyn DeviceFactory, keyboard: &KeyboardConfig) {
        if self.initialized {
            return;
        }
        if self.capabilities.pointer {
            self.pointer = Some(factory.create_pointer(self));
        }
        if self.capabilities.keyboard {
            self.keyboard = Some(factory.create_keyboard(self, keyboard));
        }
        if self.capabilities.touch {
            self.touch = Some(factory.create_touch(self));
        }
        self.initialized = true;
        debug!("Initialized seat {} ({:?})", self.name, self.capabilities);
    }

    pub fn pointer(&self) -> Option<&Pointer> {
        self.pointer.as_ref()
    }

    pub fn pointer_mut(&mut self) -> Option<&mut Pointer> {
        self.pointer.as_mut()
    }

    pub fn keyboard(&self) -> Option<&Keyboard> {
        self.keyboard.as_ref()
    }

    pub fn keyboard_mut(&mut self) -> Option<&mut Keyboard> {
        self.keyboard.as_mut()
    }

    pub fn touch(&self) -> Option<&Touch> {
        self.touch.as_ref()
    }

    pub fn touch_mut(&mut self) -> Option<&mut Touch> {
        self.touch.as_mut()
    }

    pub(crate) fn send_description(&self, resource: &WlSeat) {
        resource.capabilities(self.capabilities.to_wire());
        if resource.version() >= 2 {
            resource.name(self.name.clone());
        }
    }

    pub(crate) fn surface_destroyed(&mut self, surface: SurfaceId) {
        if let Some(keyboard) = self.keyboard.as_mut() {
            keyboard.surface_destroyed(surface);
        }
        if let Some(pointer) = self.pointer.as_mut() {
            pointer.surface_destroyed(surface);
        }
        if let Some(touch) = self.touch.as_mut() {
            touch.surface_destroyed(surface);
        }
    }
}
