//! # Harbor Wayland Compositor Core
//!
//! The server-side core of a Wayland compositor. Harbor accepts client
//! connections, keeps the registries of clients, surfaces, seats and outputs,
//! routes input to the right seat, and manages buffer-sharing integrations.
//! It does not draw and it does not own an event loop: a host program embeds
//! it, drives it from its own loop and renders what the registries describe.
//!
//! ## Architecture
//!
//! - `compositor`: the lifecycle, the registries and the request handlers
//! - `protocol`: wire dispatch for the core Wayland globals
//! - `surface`: surfaces, the subsurface tree and double-buffered state
//! - `input`: seats, keyboards (xkb), pointers and touch
//! - `output`: outputs and the default output
//! - `buffer`: shared-memory and hardware buffer integrations
//! - `socket`: listening sockets and externally supplied descriptors
//! - `event_loop`: the bridge to a host event loop (calloop)
//! - `config`: TOML configuration
//!
//! ## Usage
//!
//! ```rust,no_run
//! use harbor::{Compositor, HarborConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut event_loop = calloop::EventLoop::<Compositor>::try_new()?;
//!     let mut compositor = Compositor::new(HarborConfig::default())?;
//!     compositor.pre_init();
//!     compositor.init(&event_loop.handle());
//!     harbor::event_loop::run(&mut event_loop, &mut compositor)?;
//!     Ok(())
//! }
//! ```

pub mod buffer;
pub mod client;
pub mod compositor;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod grab;
pub mod input;
pub mod output;
pub mod protocol;
pub mod selection;
pub mod serial;
pub mod signal;
pub mod socket;
pub mod surface;

// Re-export main types for easy access
pub use compositor::{Compositor, CompositorSignals, Lifecycle};
pub use config::HarborConfig;
pub use error::{CompositorError, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
