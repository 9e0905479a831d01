//! Hardware-integration extension state
//!
//! When enabled, the extension tells clients which buffer integrations the
//! compositor ended up loading. The extension protocol itself lives outside
//! the core; this only tracks what it would advertise.

use log::debug;

use super::integration::LOG_TARGET;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HardwareIntegration {
    client_buffer_integration: Option<String>,
    server_buffer_integration: Option<String>,
}

impl HardwareIntegration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_client_buffer_integration_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        debug!(target: LOG_TARGET, "Advertising client buffer integration {}", name);
        self.client_buffer_integration = Some(name);
    }

    pub fn set_server_buffer_integration_name(&mut self, name: impl Into<String>) {
        let name = name.into();
        debug!(target: LOG_TARGET, "Advertising server buffer integration {}", name);
        self.server_buffer_integration = Some(name);
    }

    pub fn client_buffer_integration_name(&self) -> Option<&str> {
        self.client_buffer_integration.as_deref()
    }

    pub fn server_buffer_integration_name(&self) -> Option<&str> {
        self.server_buffer_integration.as_deref()
    }
}
