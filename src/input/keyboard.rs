//! Seat keyboard
//!
//! Tracks held keys and xkb state for one seat and forwards key, modifier and
//! focus events to the `wl_keyboard` resources of the focused client.

use log::{debug, warn};
use std::ffi::CString;
use std::fs::File;
use std::io::{self, Write};
use std::os::fd::{AsFd, FromRawFd, OwnedFd};
use wayland_server::protocol::wl_keyboard::{self, WlKeyboard};
use wayland_server::protocol::wl_surface::WlSurface;
use wayland_server::Resource;
use xkbcommon::xkb;

use super::event::{KeyEvent, KeyState, ModifierMask, ResolvedKeyEvent};
use crate::config::KeyboardConfig;
use crate::surface::SurfaceId;

/// Offset between xkb keycodes and the evdev codes sent on the wire
const EVDEV_OFFSET: u32 = 8;

/// Serialized modifier state as sent in `wl_keyboard.modifiers`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

struct XkbKeymap {
    keymap: xkb::Keymap,
    state: xkb::State,
    text: String,
}

impl XkbKeymap {
    fn compile(config: &KeyboardConfig) -> Option<Self> {
        let context = xkb::Context::new(xkb::CONTEXT_NO_FLAGS);
        let keymap = xkb::Keymap::new_from_names(
            &context,
            &config.rules,
            &config.model,
            &config.layout,
            &config.variant,
            config.options.clone(),
            xkb::KEYMAP_COMPILE_NO_FLAGS,
        )?;
        let text = keymap.get_as_string(xkb::KEYMAP_FORMAT_TEXT_V1);
        let state = xkb::State::new(&keymap);
        Some(Self { keymap, state, text })
    }

    fn modifier_state(&self) -> ModifierState {
        ModifierState {
            depressed: self.state.serialize_mods(xkb::STATE_MODS_DEPRESSED),
            latched: self.state.serialize_mods(xkb::STATE_MODS_LATCHED),
            locked: self.state.serialize_mods(xkb::STATE_MODS_LOCKED),
            group: self.state.serialize_layout(xkb::STATE_LAYOUT_EFFECTIVE),
        }
    }

    fn active_modifiers(&self) -> ModifierMask {
        let mut mask = ModifierMask::NONE;
        for (name, bit) in [
            (xkb::MOD_NAME_SHIFT, ModifierMask::SHIFT),
            (xkb::MOD_NAME_CAPS, ModifierMask::CAPS_LOCK),
            (xkb::MOD_NAME_CTRL, ModifierMask::CTRL),
            (xkb::MOD_NAME_ALT, ModifierMask::ALT),
            (xkb::MOD_NAME_NUM, ModifierMask::NUM_LOCK),
            (xkb::MOD_NAME_LOGO, ModifierMask::LOGO),
        ] {
            if self.state.mod_name_is_active(name, xkb::STATE_MODS_EFFECTIVE) {
                mask |= bit;
            }
        }
        mask
    }
}

pub struct Keyboard {
    config: KeyboardConfig,
    xkb: Option<XkbKeymap>,
    pending_keymap: Option<KeyboardConfig>,
    /// Held keys as evdev codes
    keys: Vec<u32>,
    modifiers: ModifierState,
    repeat_rate: i32,
    repeat_delay: i32,
    resources: Vec<WlKeyboard>,
    focus: Option<(SurfaceId, WlSurface)>,
}

impl std::fmt::Debug for Keyboard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keyboard")
            .field("layout", &self.config.layout)
            .field("has_keymap", &self.xkb.is_some())
            .field("keys", &self.keys)
            .field("modifiers", &self.modifiers)
            .field("focus", &self.focus.as_ref().map(|(id, _)| *id))
            .finish()
    }
}

impl Keyboard {
    pub fn new(config: &KeyboardConfig) -> Self {
        let xkb = XkbKeymap::compile(config);
        if xkb.is_none() {
            warn!(
                "Failed to compile keymap (layout {:?}, variant {:?}); key symbols will not be resolved",
                config.layout, config.variant
            );
        }
        Self {
            config: config.clone(),
            xkb,
            pending_keymap: None,
            keys: Vec::new(),
            modifiers: ModifierState::default(),
            repeat_rate: config.repeat_rate,
            repeat_delay: config.repeat_delay,
            resources: Vec::new(),
            focus: None,
        }
    }

    pub fn keymap_config(&self) -> &KeyboardConfig {
        &self.config
    }

    pub fn has_keymap(&self) -> bool {
        self.xkb.is_some()
    }

    pub fn keymap_text(&self) -> Option<&str> {
        self.xkb.as_ref().map(|x| x.text.as_str())
    }

    /// Held keys as evdev codes, in press order
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    pub fn modifier_state(&self) -> ModifierState {
        self.modifiers
    }

    pub fn repeat_info(&self) -> (i32, i32) {
        (self.repeat_rate, self.repeat_delay)
    }

    pub fn focus(&self) -> Option<SurfaceId> {
        self.focus.as_ref().map(|(id, _)| *id)
    }

    pub fn has_pending_keymap(&self) -> bool {
        self.pending_keymap.is_some()
    }

    /// Request a new keymap; it takes effect once no keys are held
    pub fn set_keymap(&mut self, config: KeyboardConfig) {
        self.pending_keymap = Some(config);
        self.maybe_update_keymap();
    }

    pub fn set_repeat_info(&mut self, rate: i32, delay: i32) {
        self.repeat_rate = rate;
        self.repeat_delay = delay;
        for resource in &self.resources {
            if resource.version() >= 4 {
                resource.repeat_info(rate, delay);
            }
        }
    }

    /// Look up the key symbol, text and modifiers for `event`
    pub fn resolve(&self, event: &KeyEvent) -> ResolvedKeyEvent {
        let Some(xkb) = self.xkb.as_ref() else {
            return ResolvedKeyEvent::unresolved(event.clone());
        };
        let keycode = xkb::Keycode::new(event.native_scan_code);
        ResolvedKeyEvent {
            event: event.clone(),
            keysym: xkb.state.key_get_one_sym(keycode).raw(),
            text: xkb.state.key_get_utf8(keycode),
            modifiers: xkb.active_modifiers(),
        }
    }

    /// Record a press or release in the held-key list
    pub fn key_event(&mut self, native_scan_code: u32, state: KeyState) {
        let code = native_scan_code.saturating_sub(EVDEV_OFFSET);
        match state {
            KeyState::Pressed => {
                if !self.keys.contains(&code) {
                    self.keys.push(code);
                }
            }
            KeyState::Released => self.keys.retain(|k| *k != code),
        }
    }

    /// Apply a requested keymap when no key is held.
    ///
    /// The request is consumed even if the keymap fails to compile.
    pub fn maybe_update_keymap(&mut self) -> bool {
        if self.pending_keymap.is_none() || !self.keys.is_empty() {
            return false;
        }
        let Some(config) = self.pending_keymap.take() else {
            return false;
        };
        debug!("Applying keymap layout {:?}", config.layout);
        self.xkb = XkbKeymap::compile(&config);
        if self.xkb.is_none() {
            warn!("Failed to compile keymap for layout {:?}", config.layout);
        }
        self.config = config;
        self.modifiers = ModifierState::default();
        for resource in &self.resources {
            self.send_keymap(resource);
        }
        true
    }

    /// Feed the transition into xkb. Returns the new modifier state if it changed.
    pub fn update_modifier_state(&mut self, native_scan_code: u32, state: KeyState) -> Option<ModifierState> {
        let xkb = self.xkb.as_mut()?;
        let direction = match state {
            KeyState::Pressed => xkb::KeyDirection::Down,
            KeyState::Released => xkb::KeyDirection::Up,
        };
        xkb.state.update_key(xkb::Keycode::new(native_scan_code), direction);
        let modifiers = xkb.modifier_state();
        if modifiers == self.modifiers {
            return None;
        }
        self.modifiers = modifiers;
        Some(modifiers)
    }

    /// Release everything: held keys and xkb state start over
    pub fn reset_keyboard_state(&mut self) {
        self.keys.clear();
        self.modifiers = ModifierState::default();
        if let Some(xkb) = self.xkb.as_mut() {
            xkb.state = xkb::State::new(&xkb.keymap);
        }
    }

    pub(crate) fn add_resource(&mut self, resource: WlKeyboard, serial: u32) {
        self.send_keymap(&resource);
        if resource.version() >= 4 {
            resource.repeat_info(self.repeat_rate, self.repeat_delay);
        }
        if let Some((_, surface)) = &self.focus {
            if surface.id().same_client_as(&resource.id()) {
                resource.enter(serial, surface, keys_array(&self.keys));
                let m = self.modifiers;
                resource.modifiers(serial, m.depressed, m.latched, m.locked, m.group);
            }
        }
        self.resources.push(resource);
    }

    pub(crate) fn remove_resource(&mut self, resource: &WlKeyboard) {
        self.resources.retain(|r| r != resource);
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    fn send_keymap(&self, resource: &WlKeyboard) {
        let Some(xkb) = self.xkb.as_ref() else {
            return;
        };
        match create_keymap_file(&xkb.text) {
            Ok(fd) => resource.keymap(
                wl_keyboard::KeymapFormat::XkbV1,
                fd.as_fd(),
                xkb.text.len() as u32 + 1,
            ),
            Err(e) => warn!("Failed to share keymap with client: {}", e),
        }
    }

    fn focused_resources(&self) -> impl Iterator<Item = &WlKeyboard> {
        let surface = self.focus.as_ref().map(|(_, s)| s.id());
        self.resources.iter().filter(move |r| {
            surface
                .as_ref()
                .is_some_and(|s| s.same_client_as(&r.id()))
        })
    }

    /// Move keyboard focus, sending leave and enter as needed
    pub fn set_focus(&mut self, focus: Option<(SurfaceId, WlSurface)>, serial: u32) {
        if self.focus.as_ref().map(|(id, _)| *id) == focus.as_ref().map(|(id, _)| *id) {
            return;
        }
        if let Some((_, old)) = &self.focus {
            if old.is_alive() {
                for resource in self.focused_resources() {
                    resource.leave(serial, old);
                }
            }
        }
        self.focus = focus;
        if let Some((_, surface)) = &self.focus {
            let keys = keys_array(&self.keys);
            let m = self.modifiers;
            for resource in self.focused_resources() {
                resource.enter(serial, surface, keys.clone());
                resource.modifiers(serial, m.depressed, m.latched, m.locked, m.group);
            }
        }
    }

    /// Drop focus if it points at `surface`
    pub(crate) fn surface_destroyed(&mut self, surface: SurfaceId) {
        if self.focus() == Some(surface) {
            self.focus = None;
        }
    }

    pub(crate) fn send_key(&self, native_scan_code: u32, state: KeyState, time: u32, serial: u32) {
        let key = native_scan_code.saturating_sub(EVDEV_OFFSET);
        let state = match state {
            KeyState::Pressed => wl_keyboard::KeyState::Pressed,
            KeyState::Released => wl_keyboard::KeyState::Released,
        };
        for resource in self.focused_resources() {
            resource.key(serial, time, key, state);
        }
    }

    pub(crate) fn send_modifiers(&self, serial: u32) {
        let m = self.modifiers;
        for resource in self.focused_resources() {
            resource.modifiers(serial, m.depressed, m.latched, m.locked, m.group);
        }
    }
}

fn keys_array(keys: &[u32]) -> Vec<u8> {
    keys.iter().flat_map(|k| k.to_ne_bytes()).collect()
}

/// Write the keymap, NUL terminated, into an anonymous file
#[cfg(target_os = "linux")]
fn create_keymap_file(keymap: &str) -> io::Result<OwnedFd> {
    let name = CString::new("harbor-keymap")?;
    let fd = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: memfd_create returned a fresh descriptor we now own
    let mut file = unsafe { File::from_raw_fd(fd) };
    file.write_all(keymap.as_bytes())?;
    file.write_all(&[0])?;
    Ok(OwnedFd::from(file))
}

#[cfg(not(target_os = "linux"))]
fn create_keymap_file(keymap: &str) -> io::Result<OwnedFd> {
    let path = std::env::temp_dir().join(format!("harbor-keymap-{}", std::process::id()));
    let mut file = std::fs::OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    std::fs::remove_file(&path)?;
    file.write_all(keymap.as_bytes())?;
    file.write_all(&[0])?;
    Ok(OwnedFd::from(file))
}
