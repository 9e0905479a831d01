//! Buffer integration discovery and selection
//!
//! Integrations are registered by name in a factory registry. Which ones get
//! loaded is decided from the environment (or the configuration file when the
//! environment names none) by the pure selection functions below.

use log::debug;
use std::env;
use std::fmt;

use crate::config::HardwareConfig;

/// Environment variable listing preferred client integrations (checked first)
pub const HARDWARE_INTEGRATION_ENV: &str = "HARBOR_HARDWARE_INTEGRATION";
/// Fallback environment variable for client integrations
pub const CLIENT_BUFFER_INTEGRATION_ENV: &str = "HARBOR_CLIENT_BUFFER_INTEGRATION";
/// Environment variable naming the server integration
pub const SERVER_BUFFER_INTEGRATION_ENV: &str = "HARBOR_SERVER_BUFFER_INTEGRATION";

/// Client integration chosen when the preference list matches nothing
pub const PREFERRED_CLIENT_INTEGRATION: &str = "wayland-egl";

pub(crate) const LOG_TARGET: &str = "harbor::hardware_integration";

type Constructor<T> = Box<dyn Fn() -> Box<T>>;

/// Name-keyed constructors for one kind of integration
pub struct IntegrationFactory<T: ?Sized> {
    entries: Vec<(String, Constructor<T>)>,
}

impl<T: ?Sized> Default for IntegrationFactory<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for IntegrationFactory<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.keys()).finish()
    }
}

impl<T: ?Sized> IntegrationFactory<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor. A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Box<T> + 'static,
    {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(key, _)| *key == name) {
            entry.1 = Box::new(constructor);
        } else {
            self.entries.push((name, Box::new(constructor)));
        }
    }

    /// Registered names, in registration order
    pub fn keys(&self) -> Vec<String> {
        self.entries.iter().map(|(key, _)| key.clone()).collect()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|(key, _)| key == name)
    }

    pub fn create(&self, name: &str) -> Option<Box<T>> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, constructor)| constructor())
    }
}

/// Integration names requested by the environment or configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrationPreferences {
    pub client: Vec<String>,
    pub server: Option<String>,
}

impl IntegrationPreferences {
    /// Read the `HARBOR_*` integration variables
    pub fn from_env() -> Self {
        let client = env::var(HARDWARE_INTEGRATION_ENV)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| env::var(CLIENT_BUFFER_INTEGRATION_ENV).ok())
            .map(|value| split_preference_list(&value))
            .unwrap_or_default();
        let server = env::var(SERVER_BUFFER_INTEGRATION_ENV)
            .ok()
            .filter(|value| !value.is_empty());
        Self { client, server }
    }

    /// Environment first; the configuration fills in whatever it leaves unset
    pub fn from_env_or(config: &HardwareConfig) -> Self {
        let mut preferences = Self::from_env();
        if preferences.client.is_empty() {
            preferences.client = config.client_buffer_integrations.clone();
        }
        if preferences.server.is_none() {
            preferences.server = config.server_buffer_integration.clone();
        }
        preferences
    }
}

/// Split a `;`-delimited preference list, dropping empty entries
pub fn split_preference_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pick the client integrations to load.
///
/// Preferred names are kept in order when available. If none survive, the
/// built-in preferred integration is used when available, else the first
/// available one.
pub fn select_client_integrations(available: &[String], preferred: &[String]) -> Vec<String> {
    let mut selected: Vec<String> = Vec::new();
    for name in preferred {
        if available.contains(name) && !selected.contains(name) {
            selected.push(name.clone());
        }
    }

    if selected.is_empty() {
        if available.iter().any(|name| name == PREFERRED_CLIENT_INTEGRATION) {
            selected.push(PREFERRED_CLIENT_INTEGRATION.to_string());
        } else if let Some(first) = available.first() {
            selected.push(first.clone());
        }
    }

    debug!(target: LOG_TARGET, "Client buffer integrations {:?} selected from {:?}", selected, available);
    selected
}

/// Pick the server integration: only an exact, available name is accepted
pub fn select_server_integration(available: &[String], requested: Option<&str>) -> Option<String> {
    let requested = requested?;
    available.iter().find(|name| *name == requested).cloned()
}
