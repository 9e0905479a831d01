//! Listening sockets
//!
//! The compositor listens on one named (or auto-allocated) socket under
//! `XDG_RUNTIME_DIR`, plus any number of descriptors that were bound and set
//! listening by someone else. Those external descriptors are used by reference:
//! they are never closed, duplicated or reconfigured.

use log::{debug, error, info, warn};
use std::mem::ManuallyDrop;
use std::os::unix::io::{AsRawFd, FromRawFd, RawFd};
use std::os::unix::net::{UnixListener, UnixStream};
use wayland_server::ListeningSocket;

use crate::error::{CompositorError, Result};

/// Command-line switch naming the socket
pub const SOCKET_NAME_ARG: &str = "--wayland-socket-name";

/// Range tried by auto allocation: `wayland-1` … `wayland-32`
const AUTO_SOCKET_RANGE: std::ops::Range<usize> = 1..33;

/// Explicit configuration wins, then `--wayland-socket-name <name>`, else `None` (auto)
pub fn resolve_socket_name<S: AsRef<str>>(configured: Option<&str>, args: &[S]) -> Option<String> {
    if let Some(name) = configured.filter(|n| !n.is_empty()) {
        return Some(name.to_string());
    }
    let position = args.iter().position(|a| a.as_ref() == SOCKET_NAME_ARG)?;
    args.get(position + 1).map(|name| name.as_ref().to_string())
}

/// Log the bind failure and terminate the process
pub fn fatal_socket_error(err: &CompositorError) -> ! {
    let runtime_dir = std::env::var("XDG_RUNTIME_DIR").unwrap_or_default();
    match err {
        CompositorError::SocketBind { name, reason } => error!(
            "Fatal: Failed to open server socket {:?}: {}. XDG_RUNTIME_DIR is: {:?}",
            name, reason, runtime_dir
        ),
        other => error!("Fatal: {}. XDG_RUNTIME_DIR is: {:?}", other, runtime_dir),
    }
    std::process::exit(1);
}

/// A listening descriptor owned by somebody else
#[derive(Debug)]
struct ExternalSocket {
    listener: ManuallyDrop<UnixListener>,
}

impl ExternalSocket {
    fn new(fd: RawFd) -> Result<Self> {
        if fd < 0 {
            return Err(CompositorError::ExternalSocket {
                fd,
                reason: "negative descriptor".into(),
            });
        }
        // SAFETY: the caller guarantees `fd` is a listening socket that outlives
        // the compositor; ManuallyDrop keeps us from ever closing it.
        let listener = unsafe { UnixListener::from_raw_fd(fd) };
        Ok(Self {
            listener: ManuallyDrop::new(listener),
        })
    }

    fn fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }

    /// Accept one connection if one is waiting, without blocking
    fn accept(&self) -> Option<UnixStream> {
        let mut pollfd = libc::pollfd {
            fd: self.fd(),
            events: libc::POLLIN,
            revents: 0,
        };
        let ready = unsafe { libc::poll(&mut pollfd, 1, 0) };
        if ready <= 0 || pollfd.revents & libc::POLLIN == 0 {
            return None;
        }
        match self.listener.accept().and_then(|(stream, _)| {
            stream.set_nonblocking(true)?;
            Ok(stream)
        }) {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Failed to accept on external socket {}: {}", self.fd(), e);
                None
            }
        }
    }
}

#[derive(Default)]
pub struct SocketManager {
    listener: Option<ListeningSocket>,
    socket_name: Option<String>,
    external: Vec<ExternalSocket>,
    pending: Vec<RawFd>,
}

impl std::fmt::Debug for SocketManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketManager")
            .field("socket_name", &self.socket_name)
            .field("external", &self.external)
            .field("pending", &self.pending)
            .finish()
    }
}

impl SocketManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name`, or the first free `wayland-N` when `None`
    pub fn bind(&mut self, name: Option<&str>) -> Result<String> {
        let listener = match name {
            Some(name) => ListeningSocket::bind(name).map_err(|e| CompositorError::SocketBind {
                name: name.to_string(),
                reason: e.to_string(),
            })?,
            None => ListeningSocket::bind_auto("wayland", AUTO_SOCKET_RANGE).map_err(|e| {
                CompositorError::SocketBind {
                    name: "wayland-N".to_string(),
                    reason: e.to_string(),
                }
            })?,
        };
        let socket_name = listener
            .socket_name()
            .map(|n| n.to_string_lossy().into_owned())
            .or_else(|| name.map(str::to_string))
            .unwrap_or_default();
        info!("Listening on Wayland socket {}", socket_name);
        self.listener = Some(listener);
        self.socket_name = Some(socket_name.clone());
        Ok(socket_name)
    }

    pub fn socket_name(&self) -> Option<&str> {
        self.socket_name.as_deref()
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }

    /// Remember a descriptor to start accepting on at the next flush
    pub fn queue_external(&mut self, fd: RawFd) {
        if self.pending.contains(&fd) || self.external.iter().any(|s| s.fd() == fd) {
            debug!("External socket {} is already known", fd);
            return;
        }
        self.pending.push(fd);
    }

    pub fn pending_external(&self) -> &[RawFd] {
        &self.pending
    }

    /// Start accepting on queued descriptors; returns the ones now active
    pub fn flush_external(&mut self) -> Vec<RawFd> {
        let mut activated = Vec::new();
        for fd in std::mem::take(&mut self.pending) {
            match ExternalSocket::new(fd) {
                Ok(socket) => {
                    info!("Accepting connections on external socket {}", fd);
                    activated.push(fd);
                    self.external.push(socket);
                }
                Err(e) => warn!("{}", e),
            }
        }
        activated
    }

    /// Every descriptor to watch for incoming connections
    pub fn listening_fds(&self) -> Vec<RawFd> {
        self.listener
            .iter()
            .map(|l| l.as_raw_fd())
            .chain(self.external.iter().map(ExternalSocket::fd))
            .collect()
    }

    /// Accept every pending connection on all sockets
    pub fn accept_pending(&self) -> Vec<UnixStream> {
        let mut streams = Vec::new();
        if let Some(listener) = &self.listener {
            loop {
                match listener.accept() {
                    Ok(Some(stream)) => streams.push(stream),
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to accept Wayland connection: {}", e);
                        break;
                    }
                }
            }
        }
        for socket in &self.external {
            while let Some(stream) = socket.accept() {
                streams.push(stream);
            }
        }
        streams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn runtime_dir() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("XDG_RUNTIME_DIR", dir.path());
        dir
    }

    #[test]
    fn test_socket_name_resolution_order() {
        let args = ["harbor", "--wayland-socket-name", "from-args"];
        assert_eq!(
            resolve_socket_name(Some("configured"), &args).as_deref(),
            Some("configured")
        );
        assert_eq!(resolve_socket_name(None, &args).as_deref(), Some("from-args"));
        assert_eq!(resolve_socket_name(Some(""), &args).as_deref(), Some("from-args"));
        assert_eq!(resolve_socket_name::<&str>(None, &["harbor"]), None);
        // Switch without a value
        assert_eq!(resolve_socket_name(None, &["harbor", "--wayland-socket-name"]), None);
    }

    #[test]
    #[serial]
    fn test_bind_named_and_auto() {
        let _dir = runtime_dir();
        let mut named = SocketManager::new();
        assert_eq!(named.bind(Some("harbor-test-0")).unwrap(), "harbor-test-0");
        assert_eq!(named.socket_name(), Some("harbor-test-0"));

        let mut auto = SocketManager::new();
        let name = auto.bind(None).unwrap();
        assert!(name.starts_with("wayland-"));
        assert_eq!(auto.listening_fds().len(), 1);
    }

    #[test]
    #[serial]
    fn test_bind_taken_name_fails() {
        let _dir = runtime_dir();
        let mut first = SocketManager::new();
        first.bind(Some("harbor-taken")).unwrap();
        let mut second = SocketManager::new();
        let err = second.bind(Some("harbor-taken")).unwrap_err();
        assert!(matches!(err, CompositorError::SocketBind { ref name, .. } if name == "harbor-taken"));
        assert!(!second.is_bound());
    }

    #[test]
    #[serial]
    fn test_accept_on_bound_socket() {
        let dir = runtime_dir();
        let mut sockets = SocketManager::new();
        sockets.bind(Some("harbor-accept")).unwrap();
        assert!(sockets.accept_pending().is_empty());

        let _client = UnixStream::connect(dir.path().join("harbor-accept")).unwrap();
        assert_eq!(sockets.accept_pending().len(), 1);
    }

    #[test]
    fn test_external_socket_is_borrowed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("external");
        let listener = UnixListener::bind(&path).unwrap();
        let fd = listener.as_raw_fd();

        let mut sockets = SocketManager::new();
        sockets.queue_external(fd);
        sockets.queue_external(fd);
        assert_eq!(sockets.pending_external(), &[fd]);
        assert_eq!(sockets.flush_external(), vec![fd]);
        assert!(sockets.pending_external().is_empty());
        assert_eq!(sockets.listening_fds(), vec![fd]);

        assert!(sockets.accept_pending().is_empty());
        let _client = UnixStream::connect(&path).unwrap();
        assert_eq!(sockets.accept_pending().len(), 1);

        drop(sockets);
        // Still open and usable by its owner
        let _again = UnixStream::connect(&path).unwrap();
        assert!(listener.accept().is_ok());
    }
}
