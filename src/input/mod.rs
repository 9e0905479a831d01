//! Input and seat management
//!
//! Seats are kept in insertion order; the first seat is the default seat.
//! Platform events are routed to the first seat whose ownership predicate
//! accepts them. Devices are created through a [`DeviceFactory`] so that an
//! application can substitute its own seat or device implementations.

pub mod event;
pub mod keyboard;
pub mod pointer;
pub mod seat;
pub mod touch;

pub use event::{InputEvent, KeyEvent, KeyState, ModifierMask, ResolvedKeyEvent};
pub use keyboard::{Keyboard, ModifierState};
pub use pointer::Pointer;
pub use seat::{OwnerPredicate, Seat, SeatCapabilities, SeatId};
pub use touch::{Touch, TouchPoint};

use log::info;

use crate::config::KeyboardConfig;

/// Builds seats and their devices
pub trait DeviceFactory {
    fn create_seat(&self, id: SeatId, name: &str) -> Seat {
        Seat::new(id, name, SeatCapabilities::all())
    }

    fn create_pointer(&self, _seat: &Seat) -> Pointer {
        Pointer::new()
    }

    fn create_keyboard(&self, _seat: &Seat, config: &KeyboardConfig) -> Keyboard {
        Keyboard::new(config)
    }

    fn create_touch(&self, _seat: &Seat) -> Touch {
        Touch::new()
    }
}

#[derive(Debug, Default)]
pub struct DefaultDeviceFactory;

impl DeviceFactory for DefaultDeviceFactory {}

/// Application state reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplicationState {
    Active,
    Inactive,
    Hidden,
    Suspended,
}

/// Ordered seat list; the first seat is the default seat
#[derive(Debug, Default)]
pub struct SeatList {
    seats: Vec<Seat>,
    next_id: u64,
}

impl SeatList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a seat with the factory and append it
    pub fn create(&mut self, factory: &dyn DeviceFactory, name: &str) -> SeatId {
        self.next_id += 1;
        let seat = factory.create_seat(SeatId(self.next_id), name);
        let id = seat.id();
        info!("Created seat {}", seat.name());
        self.seats.push(seat);
        id
    }

    pub fn len(&self) -> usize {
        self.seats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seats.is_empty()
    }

    pub fn get(&self, id: SeatId) -> Option<&Seat> {
        self.seats.iter().find(|s| s.id() == id)
    }

    pub fn get_mut(&mut self, id: SeatId) -> Option<&mut Seat> {
        self.seats.iter_mut().find(|s| s.id() == id)
    }

    pub fn default_seat(&self) -> Option<&Seat> {
        self.seats.first()
    }

    pub fn default_seat_mut(&mut self) -> Option<&mut Seat> {
        self.seats.first_mut()
    }

    /// First seat, in insertion order, that claims `event`
    pub fn seat_for(&self, event: &InputEvent) -> Option<SeatId> {
        self.seats.iter().find(|s| s.is_owner(event)).map(|s| s.id())
    }

    pub fn ids(&self) -> Vec<SeatId> {
        self.seats.iter().map(|s| s.id()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Seat> {
        self.seats.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Seat> {
        self.seats.iter_mut()
    }
}
