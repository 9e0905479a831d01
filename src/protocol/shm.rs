//! wl_shm, wl_shm_pool and shared-memory wl_buffer

use log::debug;
use std::sync::Arc;
use wayland_server::protocol::{wl_buffer, wl_shm, wl_shm_pool};
use wayland_server::{Client, DataInit, Dispatch, DisplayHandle, GlobalDispatch, New, Resource, WEnum};

use crate::buffer::{ShmBufferView, ShmFormat, ShmPool};
use crate::compositor::CompositorState;

/// User data of a `wl_shm_pool`; `None` when the pool could not be mapped
#[derive(Debug)]
pub struct ShmPoolData {
    pool: Option<Arc<ShmPool>>,
}

impl ShmPoolData {
    pub fn pool(&self) -> Option<&Arc<ShmPool>> {
        self.pool.as_ref()
    }
}

impl GlobalDispatch<wl_shm::WlShm, ()> for CompositorState {
    fn bind(
        state: &mut Self,
        _handle: &DisplayHandle,
        _client: &Client,
        resource: New<wl_shm::WlShm>,
        _global_data: &(),
        data_init: &mut DataInit<'_, Self>,
    ) {
        let shm = data_init.init(resource, ());
        for format in state.shm_formats() {
            shm.format(format.to_wire());
        }
    }
}

impl Dispatch<wl_shm::WlShm, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        resource: &wl_shm::WlShm,
        request: wl_shm::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        if let wl_shm::Request::CreatePool { id, fd, size } = request {
            if size <= 0 {
                data_init.init(id, ShmPoolData { pool: None });
                resource.post_error(wl_shm::Error::InvalidStride, format!("invalid pool size {}", size));
                return;
            }
            match ShmPool::new(fd, size) {
                Ok(pool) => {
                    debug!("Mapped shm pool of {} bytes", size);
                    data_init.init(id, ShmPoolData {
                        pool: Some(Arc::new(pool)),
                    });
                }
                Err(e) => {
                    data_init.init(id, ShmPoolData { pool: None });
                    resource.post_error(wl_shm::Error::InvalidFd, format!("failed to map pool: {}", e));
                }
            }
        }
    }
}

impl Dispatch<wl_shm_pool::WlShmPool, ShmPoolData> for CompositorState {
    fn request(
        state: &mut Self,
        _client: &Client,
        resource: &wl_shm_pool::WlShmPool,
        request: wl_shm_pool::Request,
        data: &ShmPoolData,
        _dhandle: &DisplayHandle,
        data_init: &mut DataInit<'_, Self>,
    ) {
        match request {
            wl_shm_pool::Request::CreateBuffer {
                id,
                offset,
                width,
                height,
                stride,
                format,
            } => {
                let Some(pool) = data.pool.clone() else {
                    data_init.init(id, ());
                    return;
                };
                let format = match format {
                    WEnum::Value(format) => ShmFormat::from_wire(format),
                    WEnum::Unknown(_) => None,
                }
                .filter(|format| state.shm_formats().contains(format));
                let Some(format) = format else {
                    data_init.init(id, ());
                    resource.post_error(wl_shm::Error::InvalidFormat, "format was not advertised");
                    return;
                };
                let view = ShmBufferView {
                    pool,
                    offset,
                    width,
                    height,
                    stride,
                    format,
                };
                if !view.is_valid() {
                    data_init.init(id, ());
                    resource.post_error(
                        wl_shm::Error::InvalidStride,
                        format!(
                            "buffer {}x{} stride {} offset {} does not fit the pool",
                            width, height, stride, offset
                        ),
                    );
                    return;
                }
                data_init.init(id, view);
            }
            wl_shm_pool::Request::Resize { size } => {
                if let Some(pool) = &data.pool {
                    if let Err(e) = pool.resize(size) {
                        resource.post_error(wl_shm::Error::InvalidFd, e.to_string());
                    }
                }
            }
            _ => {}
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ShmBufferView> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        _request: wl_buffer::Request,
        _data: &ShmBufferView,
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}

/// Buffers created after a protocol error; never resolved
impl Dispatch<wl_buffer::WlBuffer, ()> for CompositorState {
    fn request(
        _state: &mut Self,
        _client: &Client,
        _resource: &wl_buffer::WlBuffer,
        _request: wl_buffer::Request,
        _data: &(),
        _dhandle: &DisplayHandle,
        _data_init: &mut DataInit<'_, Self>,
    ) {
    }
}
