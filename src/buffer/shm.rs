//! Shared-memory buffer transport
//!
//! Client pools are mapped read-only with `memmap2`; a buffer is a view
//! (offset, size, stride, format) into its pool. The shared-memory
//! integration is always installed and handles every `wl_shm` buffer.

use log::{debug, warn};
use memmap2::{Mmap, MmapOptions};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io;
use std::ops::Range;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use wayland_server::protocol::{wl_buffer, wl_shm};
use wayland_server::Resource;

use super::{BufferOrigin, ClientBuffer, ClientBufferIntegration};

/// Pixel formats a client may use for shared-memory buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShmFormat {
    Argb8888,
    Xrgb8888,
    Abgr8888,
    Xbgr8888,
    Rgb565,
    Bgr888,
    Rgb888,
    Rgba4444,
    Rgba5551,
    Argb2101010,
    Xrgb2101010,
}

impl ShmFormat {
    /// Formats every compositor must support
    pub const REQUIRED: [ShmFormat; 2] = [ShmFormat::Argb8888, ShmFormat::Xrgb8888];

    pub fn to_wire(self) -> wl_shm::Format {
        match self {
            ShmFormat::Argb8888 => wl_shm::Format::Argb8888,
            ShmFormat::Xrgb8888 => wl_shm::Format::Xrgb8888,
            ShmFormat::Abgr8888 => wl_shm::Format::Abgr8888,
            ShmFormat::Xbgr8888 => wl_shm::Format::Xbgr8888,
            ShmFormat::Rgb565 => wl_shm::Format::Rgb565,
            ShmFormat::Bgr888 => wl_shm::Format::Bgr888,
            ShmFormat::Rgb888 => wl_shm::Format::Rgb888,
            ShmFormat::Rgba4444 => wl_shm::Format::Rgba4444,
            ShmFormat::Rgba5551 => wl_shm::Format::Rgba5551,
            ShmFormat::Argb2101010 => wl_shm::Format::Argb2101010,
            ShmFormat::Xrgb2101010 => wl_shm::Format::Xrgb2101010,
        }
    }

    pub fn from_wire(format: wl_shm::Format) -> Option<Self> {
        let format = match format {
            wl_shm::Format::Argb8888 => ShmFormat::Argb8888,
            wl_shm::Format::Xrgb8888 => ShmFormat::Xrgb8888,
            wl_shm::Format::Abgr8888 => ShmFormat::Abgr8888,
            wl_shm::Format::Xbgr8888 => ShmFormat::Xbgr8888,
            wl_shm::Format::Rgb565 => ShmFormat::Rgb565,
            wl_shm::Format::Bgr888 => ShmFormat::Bgr888,
            wl_shm::Format::Rgb888 => ShmFormat::Rgb888,
            wl_shm::Format::Rgba4444 => ShmFormat::Rgba4444,
            wl_shm::Format::Rgba5551 => ShmFormat::Rgba5551,
            wl_shm::Format::Argb2101010 => ShmFormat::Argb2101010,
            wl_shm::Format::Xrgb2101010 => ShmFormat::Xrgb2101010,
            _ => return None,
        };
        Some(format)
    }

    pub fn bytes_per_pixel(self) -> usize {
        match self {
            ShmFormat::Rgb565 | ShmFormat::Rgba4444 | ShmFormat::Rgba5551 => 2,
            ShmFormat::Bgr888 | ShmFormat::Rgb888 => 3,
            _ => 4,
        }
    }

    pub fn has_alpha(self) -> bool {
        matches!(
            self,
            ShmFormat::Argb8888
                | ShmFormat::Abgr8888
                | ShmFormat::Rgba4444
                | ShmFormat::Rgba5551
                | ShmFormat::Argb2101010
        )
    }
}

/// A client memory pool mapped into the compositor
#[derive(Debug)]
pub struct ShmPool {
    file: File,
    map: RwLock<Option<Mmap>>,
}

impl ShmPool {
    /// Map `size` bytes of the client-provided descriptor
    pub fn new(fd: OwnedFd, size: i32) -> io::Result<Self> {
        Self::from_file(File::from(fd), size)
    }

    pub fn from_file(file: File, size: i32) -> io::Result<Self> {
        let map = map_file(&file, size)?;
        Ok(Self {
            file,
            map: RwLock::new(Some(map)),
        })
    }

    /// Remap the pool after the client grew it
    pub fn resize(&self, size: i32) -> io::Result<()> {
        let current = self.size();
        if (size as usize) < current {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("pool cannot shrink from {} to {} bytes", current, size),
            ));
        }
        let map = map_file(&self.file, size)?;
        *self.map.write() = Some(map);
        Ok(())
    }

    pub fn size(&self) -> usize {
        self.map.read().as_ref().map_or(0, |m| m.len())
    }

    /// Length of the client's file right now; the client may truncate it at any time
    pub fn backed_len(&self) -> usize {
        self.file.metadata().map_or(0, |m| m.len() as usize)
    }

    /// Run `f` on `range` of the mapping. `None` if the range is not mapped or
    /// the client shrank the file below it, since touching those pages faults.
    pub fn with_data<R>(&self, range: Range<usize>, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let guard = self.map.read();
        let map = guard.as_deref()?;
        let backed = self.backed_len();
        if range.start > range.end || range.end > map.len() || range.end > backed {
            warn!(
                "Refusing to read bytes {:?} of a pool mapped for {} with {} bytes backed",
                range,
                map.len(),
                backed
            );
            return None;
        }
        // TODO: a truncation between the length check and the copy still faults;
        // sealed memfds or a SIGBUS handler would close that window.
        Some(f(&map[range]))
    }
}

fn map_file(file: &File, size: i32) -> io::Result<Mmap> {
    if size <= 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("invalid pool size {}", size),
        ));
    }
    let backed = file.metadata()?.len();
    if backed < size as u64 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("pool size {} exceeds the {} bytes of its file", size, backed),
        ));
    }
    // SAFETY: the client may modify the pool at any time; readers copy pixels
    // out and never hand out references into the mapping.
    unsafe { MmapOptions::new().len(size as usize).map(file) }
}

/// A rectangle of pixels inside a [`ShmPool`]
#[derive(Debug, Clone)]
pub struct ShmBufferView {
    pub pool: Arc<ShmPool>,
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: ShmFormat,
}

impl ShmBufferView {
    /// Check the view fits the pool and the stride covers a row
    pub fn is_valid(&self) -> bool {
        if self.offset < 0 || self.width <= 0 || self.height <= 0 || self.stride <= 0 {
            return false;
        }
        let row = self.width as usize * self.format.bytes_per_pixel();
        if (self.stride as usize) < row {
            return false;
        }
        let needed = (self.stride as usize)
            .checked_mul(self.height as usize)
            .and_then(|n| n.checked_add(self.offset as usize));
        matches!(needed, Some(n) if n <= self.pool.size())
    }

    /// Copy the pixels out as tightly packed RGBA8888
    pub fn to_rgba(&self) -> Option<Vec<u8>> {
        if !self.is_valid() {
            warn!(
                "Buffer {}x{} stride {} offset {} does not fit its pool ({} bytes)",
                self.width,
                self.height,
                self.stride,
                self.offset,
                self.pool.size()
            );
            return None;
        }
        let width = self.width as usize;
        let height = self.height as usize;
        let stride = self.stride as usize;
        let offset = self.offset as usize;
        let bpp = self.format.bytes_per_pixel();

        let decode: fn(&[u8]) -> [u8; 4] = match self.format {
            ShmFormat::Argb8888 => |p| [p[2], p[1], p[0], p[3]],
            ShmFormat::Xrgb8888 => |p| [p[2], p[1], p[0], 255],
            ShmFormat::Abgr8888 => |p| [p[0], p[1], p[2], p[3]],
            ShmFormat::Xbgr8888 => |p| [p[0], p[1], p[2], 255],
            ShmFormat::Bgr888 => |p| [p[0], p[1], p[2], 255],
            ShmFormat::Rgb888 => |p| [p[2], p[1], p[0], 255],
            ShmFormat::Rgb565 => |p| {
                let pixel = u16::from_le_bytes([p[0], p[1]]);
                let r = ((pixel >> 11) & 0x1f) as u8;
                let g = ((pixel >> 5) & 0x3f) as u8;
                let b = (pixel & 0x1f) as u8;
                [(r << 3) | (r >> 2), (g << 2) | (g >> 4), (b << 3) | (b >> 2), 255]
            },
            ShmFormat::Rgba4444 => |p| {
                let pixel = u16::from_le_bytes([p[0], p[1]]);
                let nibble = |shift: u16| {
                    let v = ((pixel >> shift) & 0xf) as u8;
                    (v << 4) | v
                };
                [nibble(12), nibble(8), nibble(4), nibble(0)]
            },
            ShmFormat::Rgba5551 => |p| {
                let pixel = u16::from_le_bytes([p[0], p[1]]);
                let five = |shift: u16| {
                    let v = ((pixel >> shift) & 0x1f) as u8;
                    (v << 3) | (v >> 2)
                };
                [five(11), five(6), five(1), if pixel & 1 == 1 { 255 } else { 0 }]
            },
            ShmFormat::Argb2101010 | ShmFormat::Xrgb2101010 => {
                debug!("No RGBA conversion for {:?}", self.format);
                return None;
            }
        };

        self.pool.with_data(offset..offset + stride * height, |src| {
            let mut out = Vec::with_capacity(width * height * 4);
            for row in src.chunks(stride).take(height) {
                for pixel in row[..width * bpp].chunks_exact(bpp) {
                    out.extend_from_slice(&decode(pixel));
                }
            }
            out
        })
    }
}

/// A shared-memory client buffer
#[derive(Debug, Clone)]
pub struct ShmBuffer {
    pub view: ShmBufferView,
    /// Wire object, absent for buffers built directly from a pool
    pub resource: Option<wl_buffer::WlBuffer>,
}

impl ShmBuffer {
    pub fn from_view(view: ShmBufferView) -> Self {
        Self {
            view,
            resource: None,
        }
    }

    pub fn size(&self) -> (i32, i32) {
        (self.view.width, self.view.height)
    }
}

/// Handles every buffer created through `wl_shm`
#[derive(Debug, Default)]
pub struct SharedMemoryIntegration;

impl SharedMemoryIntegration {
    pub const NAME: &'static str = "wl_shm";
}

impl ClientBufferIntegration for SharedMemoryIntegration {
    fn create_buffer_for(&self, buffer: &wl_buffer::WlBuffer) -> Option<ClientBuffer> {
        let view = buffer.data::<ShmBufferView>()?;
        Some(ClientBuffer::SharedMemory(ShmBuffer {
            view: view.clone(),
            resource: Some(buffer.clone()),
        }))
    }
}

impl ClientBuffer {
    /// Vertical origin of the pixel data
    pub fn origin(&self) -> BufferOrigin {
        match self {
            ClientBuffer::SharedMemory(_) => BufferOrigin::TopLeft,
            ClientBuffer::Hardware(buffer) => buffer.origin,
        }
    }
}
