//! Seat touch device

use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::protocol::wl_touch::WlTouch;
use wayland_server::Resource;

use crate::surface::SurfaceId;

/// An active touch point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub slot: i32,
    pub position: (f64, f64),
}

#[derive(Debug, Default)]
pub struct Touch {
    resources: Vec<WlTouch>,
    focus: Option<(SurfaceId, WlSurface)>,
    points: Vec<TouchPoint>,
}

impl Touch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> &[TouchPoint] {
        &self.points
    }

    pub fn focus(&self) -> Option<SurfaceId> {
        self.focus.as_ref().map(|(id, _)| *id)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    pub(crate) fn add_resource(&mut self, resource: WlTouch) {
        self.resources.push(resource);
    }

    pub(crate) fn remove_resource(&mut self, resource: &WlTouch) {
        self.resources.retain(|r| r != resource);
    }

    /// Surface receiving the next touch sequence
    pub fn set_focus(&mut self, focus: Option<(SurfaceId, WlSurface)>) {
        self.focus = focus;
    }

    pub(crate) fn surface_destroyed(&mut self, surface: SurfaceId) {
        if self.focus() == Some(surface) {
            self.focus = None;
        }
    }

    fn focused_resources(&self) -> impl Iterator<Item = &WlTouch> {
        let surface = self.focus.as_ref().map(|(_, s)| s.id());
        self.resources
            .iter()
            .filter(move |r| surface.as_ref().is_some_and(|s| s.same_client_as(&r.id())))
    }

    pub fn down(&mut self, serial: u32, time: u32, slot: i32, x: f64, y: f64) {
        self.points.retain(|p| p.slot != slot);
        self.points.push(TouchPoint {
            slot,
            position: (x, y),
        });
        if let Some((_, surface)) = &self.focus {
            for resource in self.focused_resources() {
                resource.down(serial, time, surface, slot, x, y);
                resource.frame();
            }
        }
    }

    pub fn motion(&mut self, time: u32, slot: i32, x: f64, y: f64) {
        let Some(point) = self.points.iter_mut().find(|p| p.slot == slot) else {
            return;
        };
        point.position = (x, y);
        for resource in self.focused_resources() {
            resource.motion(time, slot, x, y);
            resource.frame();
        }
    }

    pub fn up(&mut self, serial: u32, time: u32, slot: i32) {
        let before = self.points.len();
        self.points.retain(|p| p.slot != slot);
        if self.points.len() == before {
            return;
        }
        for resource in self.focused_resources() {
            resource.up(serial, time, slot);
            resource.frame();
        }
    }

    pub fn cancel(&mut self) {
        self.points.clear();
        for resource in self.focused_resources() {
            resource.cancel();
        }
    }
}
