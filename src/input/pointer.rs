//! Seat pointer

use wayland_server::protocol::wl_pointer::{self, WlPointer};
use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::Resource;

use crate::surface::SurfaceId;

#[derive(Debug, Default)]
pub struct Pointer {
    resources: Vec<WlPointer>,
    focus: Option<(SurfaceId, WlSurface)>,
    /// Position in focus-surface coordinates
    position: (f64, f64),
    pressed_buttons: Vec<u32>,
}

impl Pointer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> (f64, f64) {
        self.position
    }

    pub fn pressed_buttons(&self) -> &[u32] {
        &self.pressed_buttons
    }

    pub fn focus(&self) -> Option<SurfaceId> {
        self.focus.as_ref().map(|(id, _)| *id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn add_resource(&mut self, resource: WlPointer) {
        self.resources.push(resource);
    }

    pub(crate) fn remove_resource(&mut self, resource: &WlPointer) {
        self.resources.retain(|r| r != resource);
    }

    fn focused_resources(&self) -> impl Iterator<Item = &WlPointer> {
        let surface = self.focus.as_ref().map(|(_, s)| s.id());
        self.resources
            .iter()
            .filter(move |r| surface.as_ref().is_some_and(|s| s.same_client_as(&r.id())))
    }

    fn frame(&self) {
        for resource in self.focused_resources() {
            if resource.version() >= 5 {
                resource.frame();
            }
        }
    }

    /// Give pointer focus to `focus`, entering at surface-local `(x, y)`
    pub fn set_focus(&mut self, focus: Option<(SurfaceId, WlSurface)>, x: f64, y: f64, serial: u32) {
        self.position = (x, y);
        if self.focus() == focus.as_ref().map(|(id, _)| *id) {
            return;
        }
        if let Some((_, old)) = &self.focus {
            if old.is_alive() {
                for resource in self.focused_resources() {
                    resource.leave(serial, old);
                }
                self.frame();
            }
        }
        self.focus = focus;
        if let Some((_, surface)) = &self.focus {
            for resource in self.focused_resources() {
                resource.enter(serial, surface, x, y);
            }
            self.frame();
        }
    }

    pub(crate) fn surface_destroyed(&mut self, surface: SurfaceId) {
        if self.focus() == Some(surface) {
            self.focus = None;
        }
    }

    pub fn motion(&mut self, time: u32, x: f64, y: f64) {
        self.position = (x, y);
        for resource in self.focused_resources() {
            resource.motion(time, x, y);
        }
        self.frame();
    }

    pub fn button(&mut self, serial: u32, time: u32, button: u32, pressed: bool) {
        if pressed {
            if !self.pressed_buttons.contains(&button) {
                self.pressed_buttons.push(button);
            }
        } else {
            self.pressed_buttons.retain(|b| *b != button);
        }
        let state = if pressed {
            wl_pointer::ButtonState::Pressed
        } else {
            wl_pointer::ButtonState::Released
        };
        for resource in self.focused_resources() {
            resource.button(serial, time, button, state);
        }
        self.frame();
    }

    pub fn axis(&mut self, time: u32, horizontal: f64, vertical: f64) {
        for resource in self.focused_resources() {
            if horizontal != 0.0 {
                resource.axis(time, wl_pointer::Axis::HorizontalScroll, horizontal);
            }
            if vertical != 0.0 {
                resource.axis(time, wl_pointer::Axis::VerticalScroll, vertical);
            }
        }
        self.frame();
    }
}
