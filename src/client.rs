//! Connected client bookkeeping
//!
//! The protocol engine owns client connections. Harbor keeps a non-owning
//! entry per client, added when the connection is inserted and removed once
//! the engine reports the disconnect.

use log::{debug, info};
use parking_lot::Mutex;
use std::sync::Arc;
use wayland_server::backend::{ClientData, ClientId, DisconnectReason};
use wayland_server::{Client, DisplayHandle};

/// Credentials of a connected peer process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCredentials {
    pub pid: i32,
    pub uid: u32,
    pub gid: u32,
}

/// Registry entry for one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub id: ClientId,
    pub credentials: Option<ClientCredentials>,
}

/// Queue of clients whose connection has gone away
pub type DisconnectQueue = Arc<Mutex<Vec<ClientId>>>;

/// Window-management extension told about clients that are about to be killed
pub trait WindowManagerExtension {
    /// Ask `client` to quit; best effort
    fn send_quit_message(&mut self, client: &ClientId);
}

/// Per-connection data handed to the protocol engine
#[derive(Debug)]
pub struct HarborClientData {
    disconnected: DisconnectQueue,
}

impl HarborClientData {
    pub fn new(disconnected: DisconnectQueue) -> Self {
        Self { disconnected }
    }
}

impl ClientData for HarborClientData {
    fn initialized(&self, client_id: ClientId) {
        debug!("Client {:?} initialized", client_id);
    }

    fn disconnected(&self, client_id: ClientId, reason: DisconnectReason) {
        debug!("Client {:?} disconnected: {:?}", client_id, reason);
        self.disconnected.lock().push(client_id);
    }
}

/// Clients currently connected, in connection order
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: Vec<ClientInfo>,
    disconnected: DisconnectQueue,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data to attach to a newly inserted connection
    pub fn client_data(&self) -> Arc<HarborClientData> {
        Arc::new(HarborClientData::new(self.disconnected.clone()))
    }

    pub(crate) fn register(&mut self, client: &Client, display: &DisplayHandle) -> ClientId {
        let credentials = client
            .get_credentials(display)
            .ok()
            .map(|c| ClientCredentials {
                pid: c.pid,
                uid: c.uid,
                gid: c.gid,
            });
        let id = client.id();
        info!(
            "Client {:?} connected (pid {})",
            id,
            credentials.map_or(-1, |c| c.pid)
        );
        self.clients.push(ClientInfo {
            id: id.clone(),
            credentials,
        });
        id
    }

    /// Take the clients reported gone since the last call, dropping their entries
    pub(crate) fn reap_disconnected(&mut self) -> Vec<ClientId> {
        let gone = std::mem::take(&mut *self.disconnected.lock());
        let mut reaped = Vec::with_capacity(gone.len());
        for id in gone {
            let before = self.clients.len();
            self.clients.retain(|c| c.id != id);
            if self.clients.len() != before {
                reaped.push(id);
            }
        }
        reaped
    }

    pub fn contains(&self, id: &ClientId) -> bool {
        self.clients.iter().any(|c| c.id == *id)
    }

    pub fn get(&self, id: &ClientId) -> Option<&ClientInfo> {
        self.clients.iter().find(|c| c.id == *id)
    }

    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.iter().map(|c| c.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClientInfo> {
        self.clients.iter()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixStream;
    use wayland_server::Display;

    #[test]
    fn test_register_and_reap() {
        let display: Display<()> = Display::new().unwrap();
        let mut handle = display.handle();
        let mut registry = ClientRegistry::new();

        let (server, _peer) = UnixStream::pair().unwrap();
        let client = handle.insert_client(server, registry.client_data()).unwrap();
        let id = registry.register(&client, &handle);

        assert!(registry.contains(&id));
        assert_eq!(registry.len(), 1);
        let credentials = registry.get(&id).unwrap().credentials.unwrap();
        assert_eq!(credentials.pid, std::process::id() as i32);

        // Nothing reported yet
        assert!(registry.reap_disconnected().is_empty());

        registry.disconnected.lock().push(id.clone());
        assert_eq!(registry.reap_disconnected(), vec![id.clone()]);
        assert!(!registry.contains(&id));
        assert!(registry.reap_disconnected().is_empty());
    }

    #[test]
    fn test_disconnect_callback_queues_client() {
        let mut display: Display<()> = Display::new().unwrap();
        let mut handle = display.handle();
        let mut registry = ClientRegistry::new();

        let (server, _peer) = UnixStream::pair().unwrap();
        let client = handle.insert_client(server, registry.client_data()).unwrap();
        let id = registry.register(&client, &handle);

        handle
            .backend_handle()
            .kill_client(id.clone(), DisconnectReason::ConnectionClosed);
        display.dispatch_clients(&mut ()).unwrap();

        assert_eq!(registry.reap_disconnected(), vec![id]);
        assert!(registry.is_empty());
    }
}
