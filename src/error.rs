//! Error types for the Harbor compositor core
//!
//! Only recoverable failures are represented here. Socket binding failure is
//! fatal and never surfaces as a value (see [`crate::socket::fatal_socket_error`]),
//! and collaborator contract violations are assertions.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::surface::SurfaceId;

/// Errors produced by the compositor core
#[derive(Debug, Error)]
pub enum CompositorError {
    /// The protocol engine could not be created
    #[error("failed to create the Wayland display: {0}")]
    Display(String),

    /// A listening socket could not be bound
    #[error("failed to bind Wayland socket {name:?}: {reason}")]
    SocketBind { name: String, reason: String },

    /// An externally supplied descriptor is not usable as a listening socket
    #[error("invalid external socket descriptor {fd}: {reason}")]
    ExternalSocket { fd: i32, reason: String },

    /// Registration with the host event loop failed
    #[error("event loop registration failed: {0}")]
    EventLoop(String),

    /// A configuration file could not be read or parsed
    #[error("failed to load configuration from {path}: {reason}")]
    Config { path: PathBuf, reason: String },

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A surface id does not refer to a live surface
    #[error("unknown surface {0:?}")]
    UnknownSurface(SurfaceId),

    /// The surface already has a parent
    #[error("surface {0:?} is already a subsurface")]
    AlreadySubsurface(SurfaceId),

    /// Linking the surfaces would make a surface its own ancestor
    #[error("surface {child:?} cannot be a subsurface of {parent:?}")]
    SubsurfaceCycle { child: SurfaceId, parent: SurfaceId },

    /// A buffer integration failed to initialize its hardware
    #[error("buffer integration {name} failed to initialize: {reason}")]
    Integration { name: String, reason: String },

    /// Plain I/O failure
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, CompositorError>;
