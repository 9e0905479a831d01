//! Outputs
//!
//! The output list is ordered and the default output is always at index zero.
//! Each output is advertised to clients as a `wl_output` global once the
//! compositor has been created.

use log::{debug, info};
use wayland_server::backend::GlobalId;
use wayland_server::protocol::wl_output::{self, WlOutput};
use wayland_server::Resource;

use crate::config::OutputConfig;

/// Compositor-wide output identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(u64);

/// Host window an output is displayed in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputMode {
    pub width: i32,
    pub height: i32,
    /// Refresh rate in mHz
    pub refresh: i32,
}

#[derive(Debug, Clone)]
pub struct Output {
    id: OutputId,
    pub name: String,
    pub make: String,
    pub model: String,
    pub position: (i32, i32),
    pub physical_size: (i32, i32),
    pub mode: OutputMode,
    pub scale: i32,
    pub transform: wl_output::Transform,
    pub window: Option<WindowId>,
    pub(crate) global: Option<GlobalId>,
    pub(crate) resources: Vec<WlOutput>,
}

impl PartialEq for Output {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Output {
    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn has_global(&self) -> bool {
        self.global.is_some()
    }

    /// Number of client bindings
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Send the full output description to one binding
    pub(crate) fn send_state(&self, resource: &WlOutput) {
        resource.geometry(
            self.position.0,
            self.position.1,
            self.physical_size.0,
            self.physical_size.1,
            wl_output::Subpixel::Unknown,
            self.make.clone(),
            self.model.clone(),
            self.transform,
        );
        resource.mode(
            wl_output::Mode::Current | wl_output::Mode::Preferred,
            self.mode.width,
            self.mode.height,
            self.mode.refresh,
        );
        if resource.version() >= 2 {
            resource.scale(self.scale);
        }
        if resource.version() >= 4 {
            resource.name(self.name.clone());
            resource.description(format!("{} {} ({})", self.make, self.model, self.name));
        }
        if resource.version() >= 2 {
            resource.done();
        }
    }
}

/// What changed when a default output was set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DefaultOutputChange {
    /// The output was not in the list before
    pub added: bool,
    /// The default output actually changed
    pub changed: bool,
}

/// Ordered output list; index zero is the default output
#[derive(Debug, Default)]
pub struct OutputList {
    outputs: Vec<Output>,
    next_id: u64,
}

impl OutputList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an output that is not yet part of the list
    pub fn create(&mut self, config: &OutputConfig) -> Output {
        self.next_id += 1;
        Output {
            id: OutputId(self.next_id),
            name: config.name.clone(),
            make: config.make.clone(),
            model: config.model.clone(),
            position: (config.x, config.y),
            physical_size: (config.physical_width_mm, config.physical_height_mm),
            mode: OutputMode {
                width: config.width,
                height: config.height,
                refresh: config.refresh_mhz,
            },
            scale: config.scale,
            transform: wl_output::Transform::Normal,
            window: None,
            global: None,
            resources: Vec::new(),
        }
    }

    /// Append an output. Returns false if it is already listed.
    pub fn add(&mut self, output: Output) -> bool {
        if self.contains(output.id) {
            return false;
        }
        info!("Added output {} ({}x{})", output.name, output.mode.width, output.mode.height);
        self.outputs.push(output);
        true
    }

    /// Move `output` to the front, inserting it if it is not listed.
    ///
    /// An output that is already listed keeps its registered state.
    pub fn set_default(&mut self, output: Output) -> DefaultOutputChange {
        if self.outputs.first().is_some_and(|first| first.id == output.id) {
            return DefaultOutputChange {
                added: false,
                changed: false,
            };
        }
        let (entry, added) = match self.outputs.iter().position(|o| o.id == output.id) {
            Some(index) => (self.outputs.remove(index), false),
            None => (output, true),
        };
        debug!("Default output is now {}", entry.name);
        self.outputs.insert(0, entry);
        DefaultOutputChange {
            added,
            changed: true,
        }
    }

    pub fn remove(&mut self, id: OutputId) -> Option<Output> {
        let index = self.outputs.iter().position(|o| o.id == id)?;
        let output = self.outputs.remove(index);
        info!("Removed output {}", output.name);
        Some(output)
    }

    pub fn contains(&self, id: OutputId) -> bool {
        self.outputs.iter().any(|o| o.id == id)
    }

    pub fn get(&self, id: OutputId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.id == id)
    }

    pub fn get_mut(&mut self, id: OutputId) -> Option<&mut Output> {
        self.outputs.iter_mut().find(|o| o.id == id)
    }

    pub fn default_output(&self) -> Option<&Output> {
        self.outputs.first()
    }

    /// First output shown in `window`
    pub fn output_for(&self, window: WindowId) -> Option<&Output> {
        self.outputs.iter().find(|o| o.window == Some(window))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Output> {
        self.outputs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Output> {
        self.outputs.iter_mut()
    }

    pub fn ids(&self) -> Vec<OutputId> {
        self.outputs.iter().map(|o| o.id).collect()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    pub(crate) fn drain(&mut self) -> Vec<Output> {
        std::mem::take(&mut self.outputs)
    }
}
