//! Surface grabbing
//!
//! A grab copies the pixels of a client buffer into an RGBA image and reports
//! the outcome to a [`SurfaceGrabber`]. Only shared-memory buffers can be read
//! back by the core; hardware buffers need a renderer.

use log::debug;
use std::fmt;

use crate::buffer::ClientBuffer;

/// Tightly packed RGBA8888 pixels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrabbedImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabError {
    UnknownBufferType,
    RendererNotReady,
    InvalidSurface,
}

impl fmt::Display for GrabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            GrabError::UnknownBufferType => "unknown buffer type",
            GrabError::RendererNotReady => "renderer not ready",
            GrabError::InvalidSurface => "invalid surface",
        };
        f.write_str(text)
    }
}

/// Receives the result of a grab
pub trait SurfaceGrabber {
    fn success(&mut self, image: GrabbedImage);
    fn failed(&mut self, error: GrabError);
}

/// Read `buffer` back and report to `grabber`
pub fn grab_buffer(grabber: &mut dyn SurfaceGrabber, buffer: &ClientBuffer) {
    match buffer {
        ClientBuffer::SharedMemory(shm) => match shm.view.to_rgba() {
            Some(pixels) => grabber.success(GrabbedImage {
                width: shm.view.width as u32,
                height: shm.view.height as u32,
                pixels,
            }),
            None => grabber.failed(GrabError::InvalidSurface),
        },
        ClientBuffer::Hardware(hardware) => {
            debug!("Cannot read back {} buffer", hardware.integration);
            grabber.failed(GrabError::UnknownBufferType);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::buffer::shm::tests::pool_with;
    use crate::buffer::{ShmBuffer, ShmBufferView, ShmFormat};

    #[derive(Default)]
    pub(crate) struct Outcome {
        pub image: Option<GrabbedImage>,
        pub error: Option<GrabError>,
    }

    impl SurfaceGrabber for Outcome {
        fn success(&mut self, image: GrabbedImage) {
            self.image = Some(image);
        }
        fn failed(&mut self, error: GrabError) {
            self.error = Some(error);
        }
    }

    #[test]
    fn test_shm_grab_succeeds() {
        let pool = pool_with(&[0, 0, 255, 255, 255, 0, 0, 255]);
        let buffer = ClientBuffer::SharedMemory(ShmBuffer::from_view(ShmBufferView {
            pool,
            offset: 0,
            width: 2,
            height: 1,
            stride: 8,
            format: ShmFormat::Xrgb8888,
        }));
        let mut outcome = Outcome::default();
        grab_buffer(&mut outcome, &buffer);
        let image = outcome.image.unwrap();
        assert_eq!((image.width, image.height), (2, 1));
        assert_eq!(image.pixels, vec![255, 0, 0, 255, 0, 0, 255, 255]);
        assert!(outcome.error.is_none());
    }

    #[test]
    fn test_unreadable_shm_grab_fails() {
        let pool = pool_with(&[0u8; 4]);
        let buffer = ClientBuffer::SharedMemory(ShmBuffer::from_view(ShmBufferView {
            pool,
            offset: 0,
            width: 4,
            height: 4,
            stride: 16,
            format: ShmFormat::Argb8888,
        }));
        let mut outcome = Outcome::default();
        grab_buffer(&mut outcome, &buffer);
        assert_eq!(outcome.error, Some(GrabError::InvalidSurface));
    }
}
