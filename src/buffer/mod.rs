//! Buffer transport
//!
//! A client buffer integration turns a `wl_buffer` into something the
//! renderer can consume. Shared memory is always available and is asked first;
//! hardware integrations are pluggable and loaded by name at startup. At most
//! one server buffer integration is active.

pub mod hardware;
pub mod integration;
pub mod shm;

use log::{debug, info, warn};
use wayland_server::protocol::wl_buffer::WlBuffer;
use wayland_server::{DisplayHandle, Resource};

use crate::error::Result;
pub use hardware::HardwareIntegration;
pub use integration::{
    select_client_integrations, select_server_integration, IntegrationFactory,
    IntegrationPreferences, PREFERRED_CLIENT_INTEGRATION,
};
use integration::LOG_TARGET;
pub use shm::{ShmBuffer, ShmBufferView, ShmFormat, ShmPool, SharedMemoryIntegration};

/// Where row zero of the buffer lives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferOrigin {
    #[default]
    TopLeft,
    BottomLeft,
}

/// A buffer wrapped by a hardware integration
#[derive(Debug, Clone)]
pub struct HardwareBuffer {
    /// Name of the integration that wrapped it
    pub integration: String,
    pub resource: WlBuffer,
    pub width: i32,
    pub height: i32,
    pub origin: BufferOrigin,
}

/// A client buffer resolved through one of the integrations
#[derive(Debug, Clone)]
pub enum ClientBuffer {
    SharedMemory(ShmBuffer),
    Hardware(HardwareBuffer),
}

impl ClientBuffer {
    pub fn size(&self) -> (i32, i32) {
        match self {
            ClientBuffer::SharedMemory(buffer) => buffer.size(),
            ClientBuffer::Hardware(buffer) => (buffer.width, buffer.height),
        }
    }

    pub fn is_shared_memory(&self) -> bool {
        matches!(self, ClientBuffer::SharedMemory(_))
    }

    pub fn resource(&self) -> Option<&WlBuffer> {
        match self {
            ClientBuffer::SharedMemory(buffer) => buffer.resource.as_ref(),
            ClientBuffer::Hardware(buffer) => Some(&buffer.resource),
        }
    }

    /// Tell the client the compositor no longer reads the buffer
    pub fn release(&self) {
        if let Some(resource) = self.resource() {
            if resource.is_alive() {
                resource.release();
            }
        }
    }
}

/// Backend for client-allocated buffers
pub trait ClientBufferIntegration {
    /// Prepare the backend against the display; failure unloads it
    fn initialize_hardware(&mut self, _display: &DisplayHandle) -> Result<()> {
        Ok(())
    }

    /// Wrap `buffer` if this backend owns it
    fn create_buffer_for(&self, buffer: &WlBuffer) -> Option<ClientBuffer>;
}

/// Backend for compositor-allocated buffers shared with clients
pub trait ServerBufferIntegration {
    fn initialize_hardware(&mut self, display: &DisplayHandle) -> Result<()>;
}

/// Every buffer integration the compositor knows about
pub struct BufferIntegrations {
    shm: SharedMemoryIntegration,
    client_factories: IntegrationFactory<dyn ClientBufferIntegration>,
    server_factories: IntegrationFactory<dyn ServerBufferIntegration>,
    client: Vec<(String, Box<dyn ClientBufferIntegration>)>,
    server: Option<(String, Box<dyn ServerBufferIntegration>)>,
}

impl Default for BufferIntegrations {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BufferIntegrations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferIntegrations")
            .field("client", &self.client_integration_names())
            .field("server", &self.server_integration_name())
            .finish()
    }
}

impl BufferIntegrations {
    pub fn new() -> Self {
        Self {
            shm: SharedMemoryIntegration,
            client_factories: IntegrationFactory::new(),
            server_factories: IntegrationFactory::new(),
            client: Vec::new(),
            server: None,
        }
    }

    pub fn client_factories_mut(&mut self) -> &mut IntegrationFactory<dyn ClientBufferIntegration> {
        &mut self.client_factories
    }

    pub fn server_factories_mut(&mut self) -> &mut IntegrationFactory<dyn ServerBufferIntegration> {
        &mut self.server_factories
    }

    /// Instantiate the integrations named by `preferences`
    pub fn load(
        &mut self,
        display: &DisplayHandle,
        preferences: &IntegrationPreferences,
        mut hardware: Option<&mut HardwareIntegration>,
    ) {
        self.load_client(display, preferences, hardware.as_deref_mut());
        self.load_server(display, preferences, hardware);
    }

    fn load_client(
        &mut self,
        display: &DisplayHandle,
        preferences: &IntegrationPreferences,
        hardware: Option<&mut HardwareIntegration>,
    ) {
        let available = self.client_factories.keys();
        let targets = select_client_integrations(&available, &preferences.client);

        for name in targets {
            let Some(mut integration) = self.client_factories.create(&name) else {
                continue;
            };
            if let Err(e) = integration.initialize_hardware(display) {
                warn!(
                    target: LOG_TARGET,
                    "Failed to initialize hardware for client buffer integration {}: {}", name, e
                );
                continue;
            }
            info!(target: LOG_TARGET, "Loaded client buffer integration: {}", name);
            self.client.push((name, integration));
        }

        if let (Some(hardware), Some((name, _))) = (hardware, self.client.first()) {
            hardware.set_client_buffer_integration_name(name.clone());
        }
    }

    fn load_server(
        &mut self,
        display: &DisplayHandle,
        preferences: &IntegrationPreferences,
        hardware: Option<&mut HardwareIntegration>,
    ) {
        let available = self.server_factories.keys();
        let Some(name) = select_server_integration(&available, preferences.server.as_deref()) else {
            if let Some(requested) = &preferences.server {
                debug!(target: LOG_TARGET, "Server buffer integration {} is not available", requested);
            }
            return;
        };
        let Some(mut integration) = self.server_factories.create(&name) else {
            return;
        };
        debug!(target: LOG_TARGET, "Loaded server buffer integration: {}", name);
        if let Err(e) = integration.initialize_hardware(display) {
            warn!(
                target: LOG_TARGET,
                "Failed to initialize hardware for server buffer integration {}: {}", name, e
            );
            return;
        }
        if let Some(hardware) = hardware {
            hardware.set_server_buffer_integration_name(name.clone());
        }
        self.server = Some((name, integration));
    }

    /// Names of the active client integrations, shared memory first
    pub fn client_integration_names(&self) -> Vec<&str> {
        std::iter::once(SharedMemoryIntegration::NAME)
            .chain(self.client.iter().map(|(name, _)| name.as_str()))
            .collect()
    }

    pub fn server_integration_name(&self) -> Option<&str> {
        self.server.as_ref().map(|(name, _)| name.as_str())
    }

    /// Wrap `buffer` with the first integration that accepts it
    pub fn resolve(&self, buffer: &WlBuffer) -> Option<ClientBuffer> {
        self.shm.create_buffer_for(buffer).or_else(|| {
            self.client
                .iter()
                .find_map(|(_, integration)| integration.create_buffer_for(buffer))
        })
    }

    /// Drop every loaded integration
    pub fn clear(&mut self) {
        self.client.clear();
        self.server = None;
    }
}
