//! wl_compositor, wl_surface, wl_region, wl_callback and wl_subcompositor

use log::{debug, warn};
use parking_lot::Mutex;
use wayland_server::backend::ClientId;
use wayland_server::protocol::{
    wl_callback, wl_compositor, wl_region, wl_subcompositor, wl_subsurface, wl_surface,
};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource, WEnum};

use crate::compositor::CompositorState;
use crate::surface::{Rect, Region, SurfaceData, SurfaceId};

/// User data of a `wl_region`
#[derive(Debug, Default)]
pub struct RegionData(Mutex<Region>);

impl RegionData {
    pub fn snapshot(&self) -> Region {
        self.0.lock().clone()
    }
}

/// User data of a `wl_subsurface`; `None` when the role was refused
#[derive(Debug, Clone, Copy)]
pub struct SubsurfaceData {
    pub child: Option<SurfaceId>,
}

fn region_of(region: Option<wl_region::WlRegion>) -> Option<Region> {
    region.and_then(|r| r.data::<RegionData>().map(RegionData::snapshot))
}

fn surface_id_of(surface: &wl_surface::WlSurface) -> Option<SurfaceId> {
    surface.data::<SurfaceData>().map(|data| data.id)
}

impl GlobalDispatch<wl_compositor::WlCompositor, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_compositor::WlCompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<wl_compositor::WlCompositor, ()> for CompositorState {
    fn request(
        state: &mut Self,
        client: &Client,
        _resource: &wl_compositor::WlCompositor,
        request: wl_compositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_compositor::Request::CreateSurface { id } => {
                let surface_id = state.surfaces.allocate_id();
                let surface = data_init.init(id, SurfaceData { id: surface_id });
                let protocol_id = surface.id().protocol_id();
                let version = surface.version();
                state.register_surface(surface_id, client.id(), protocol_id, version, Some(surface));
            }
            wl_compositor::Request::CreateRegion { id } => {
                data_init.init(id, RegionData::default());
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_surface::WlSurface, SurfaceData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_surface::WlSurface,
        request: wl_surface::Request,
        data: &SurfaceData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        let id = data.id;
        match request {
            wl_surface::Request::Attach { buffer, x, y } => {
                let buffer = match buffer {
                    None => None,
                    Some(buffer) => match state.buffers.resolve(&buffer) {
                        Some(resolved) => Some(resolved),
                        None => {
                            warn!("No buffer integration accepts buffer {}", buffer.id());
                            return;
                        }
                    },
                };
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.attach(buffer, x, y);
                }
            }
            wl_surface::Request::Damage { x, y, width, height } => {
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.damage(Rect::new(x, y, width, height));
                }
            }
            wl_surface::Request::DamageBuffer { x, y, width, height } => {
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.damage_buffer(Rect::new(x, y, width, height));
                }
            }
            wl_surface::Request::Frame { callback } => {
                let callback = data_init.init(callback, ());
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.add_frame_callback(callback);
                }
            }
            wl_surface::Request::SetOpaqueRegion { region } => {
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.set_opaque_region(region_of(region));
                }
            }
            wl_surface::Request::SetInputRegion { region } => {
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.set_input_region(region_of(region));
                }
            }
            wl_surface::Request::SetBufferScale { scale } => {
                if scale < 1 {
                    resource.post_error(
                        wl_surface::Error::InvalidScale,
                        format!("buffer scale must be positive, got {}", scale),
                    );
                    return;
                }
                if let Some(surface) = state.surfaces.get_mut(id) {
                    surface.set_buffer_scale(scale);
                }
            }
            wl_surface::Request::SetBufferTransform { transform } => match transform {
                WEnum::Value(transform) => {
                    if let Some(surface) = state.surfaces.get_mut(id) {
                        surface.set_buffer_transform(transform);
                    }
                }
                WEnum::Unknown(value) => resource.post_error(
                    wl_surface::Error::InvalidTransform,
                    format!("unknown buffer transform {}", value),
                ),
            },
            wl_surface::Request::Commit => {
                if let Err(e) = state.surfaces.commit(id) {
                    warn!("Commit on {} failed: {}", id, e);
                }
            }
            wl_surface::Request::Destroy => {}
            _ => {}
        }
    }

    fn destroyed(state: &mut Self, _client: ClientId, _resource: &wl_surface::WlSurface, data: &SurfaceData) {
        if state.surfaces.contains(data.id) {
            state.destroy_surface(data.id);
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_callback::WlCallback,
        _request: wl_callback::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

impl Dispatch<wl_region::WlRegion, RegionData> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_region::WlRegion,
        request: wl_region::Request,
        data: &RegionData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_region::Request::Add { x, y, width, height } => {
                data.0.lock().add(Rect::new(x, y, width, height));
            }
            wl_region::Request::Subtract { x, y, width, height } => {
                data.0.lock().subtract(Rect::new(x, y, width, height));
            }
            _ => {}
        }
    }
}

impl GlobalDispatch<wl_subcompositor::WlSubcompositor, ()> for CompositorState {
    fn bind(
        _state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_subcompositor::WlSubcompositor>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        data_init.init(resource, ());
    }
}

impl Dispatch<wl_subcompositor::WlSubcompositor, ()> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_subcompositor::WlSubcompositor,
        request: wl_subcompositor::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_subcompositor::Request::GetSubsurface { id, surface, parent } = request {
            let linked = match (surface_id_of(&surface), surface_id_of(&parent)) {
                (Some(child), Some(parent)) => state.create_subsurface(child, parent).map(|_| child),
                _ => {
                    data_init.init(id, SubsurfaceData { child: None });
                    resource.post_error(wl_subcompositor::Error::BadSurface, "unknown surface");
                    return;
                }
            };
            match linked {
                Ok(child) => {
                    data_init.init(id, SubsurfaceData { child: Some(child) });
                }
                Err(e) => {
                    data_init.init(id, SubsurfaceData { child: None });
                    resource.post_error(wl_subcompositor::Error::BadSurface, e.to_string());
                }
            }
        }
    }
}

impl Dispatch<wl_subsurface::WlSubsurface, SubsurfaceData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_subsurface::WlSubsurface,
        request: wl_subsurface::Request,
        data: &SubsurfaceData,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
        let Some(child) = data.child else {
            return;
        };
        let restacked = match request {
            wl_subsurface::Request::SetPosition { x, y } => {
                state.surfaces.set_subsurface_position(child, x, y);
                Ok(())
            }
            wl_subsurface::Request::PlaceAbove { sibling } => match surface_id_of(&sibling) {
                Some(sibling) => state.surfaces.place_above(child, sibling),
                None => Ok(()),
            },
            wl_subsurface::Request::PlaceBelow { sibling } => match surface_id_of(&sibling) {
                Some(sibling) => state.surfaces.place_below(child, sibling),
                None => Ok(()),
            },
            wl_subsurface::Request::SetSync => {
                if let Err(e) = state.surfaces.set_subsurface_sync(child, true) {
                    debug!("set_sync on {}: {}", child, e);
                }
                Ok(())
            }
            wl_subsurface::Request::SetDesync => {
                if let Err(e) = state.surfaces.set_subsurface_sync(child, false) {
                    debug!("set_desync on {}: {}", child, e);
                }
                Ok(())
            }
            _ => Ok(()),
        };
        if let Err(e) = restacked {
            resource.post_error(wl_subsurface::Error::BadSurface, e.to_string());
        }
    }

    fn destroyed(
        state: &mut Self,
        _client: ClientId,
        _resource: &wl_subsurface::WlSubsurface,
        data: &SubsurfaceData,
    ) {
        if let Some(child) = data.child {
            state.drop_subsurface_role(child);
        }
    }
}
