//! Platform input events as handed to the compositor

use std::ops::{BitOr, BitOrAssign};

/// Key transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Pressed,
    Released,
}

/// A raw key event from the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    /// Source device, used by seat ownership predicates
    pub device: Option<String>,
    /// Native scan code (xkb keycode, evdev code + 8)
    pub native_scan_code: u32,
    pub state: KeyState,
    /// Auto-repeat generated by the platform
    pub repeat: bool,
    pub time: u32,
}

impl KeyEvent {
    pub fn press(native_scan_code: u32, time: u32) -> Self {
        Self {
            device: None,
            native_scan_code,
            state: KeyState::Pressed,
            repeat: false,
            time,
        }
    }

    pub fn release(native_scan_code: u32, time: u32) -> Self {
        Self {
            state: KeyState::Released,
            ..Self::press(native_scan_code, time)
        }
    }

    pub fn with_repeat(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn is_press(&self) -> bool {
        self.state == KeyState::Pressed
    }
}

/// Active modifiers after keymap resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ModifierMask(u32);

impl ModifierMask {
    pub const NONE: ModifierMask = ModifierMask(0);
    pub const SHIFT: ModifierMask = ModifierMask(1 << 0);
    pub const CAPS_LOCK: ModifierMask = ModifierMask(1 << 1);
    pub const CTRL: ModifierMask = ModifierMask(1 << 2);
    pub const ALT: ModifierMask = ModifierMask(1 << 3);
    pub const NUM_LOCK: ModifierMask = ModifierMask(1 << 4);
    pub const LOGO: ModifierMask = ModifierMask(1 << 6);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: ModifierMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for ModifierMask {
    type Output = ModifierMask;

    fn bitor(self, rhs: ModifierMask) -> ModifierMask {
        ModifierMask(self.0 | rhs.0)
    }
}

impl BitOrAssign for ModifierMask {
    fn bitor_assign(&mut self, rhs: ModifierMask) {
        self.0 |= rhs.0;
    }
}

/// A key event enriched with keymap information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedKeyEvent {
    pub event: KeyEvent,
    /// Raw keysym value (0 when no keymap is active)
    pub keysym: u32,
    pub text: String,
    pub modifiers: ModifierMask,
}

impl ResolvedKeyEvent {
    /// The event as-is, without keymap information
    pub fn unresolved(event: KeyEvent) -> Self {
        Self {
            event,
            keysym: 0,
            text: String::new(),
            modifiers: ModifierMask::NONE,
        }
    }
}

/// Any platform input event a seat can own
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    Key(KeyEvent),
    PointerMotion {
        device: Option<String>,
        x: f64,
        y: f64,
        time: u32,
    },
    PointerButton {
        device: Option<String>,
        button: u32,
        pressed: bool,
        time: u32,
    },
    PointerAxis {
        device: Option<String>,
        horizontal: f64,
        vertical: f64,
        time: u32,
    },
    TouchDown {
        device: Option<String>,
        slot: i32,
        x: f64,
        y: f64,
        time: u32,
    },
    TouchMotion {
        device: Option<String>,
        slot: i32,
        x: f64,
        y: f64,
        time: u32,
    },
    TouchUp {
        device: Option<String>,
        slot: i32,
        time: u32,
    },
    TouchCancel {
        device: Option<String>,
    },
}

impl InputEvent {
    pub fn device(&self) -> Option<&str> {
        match self {
            InputEvent::Key(event) => event.device.as_deref(),
            InputEvent::PointerMotion { device, .. }
            | InputEvent::PointerButton { device, .. }
            | InputEvent::PointerAxis { device, .. }
            | InputEvent::TouchDown { device, .. }
            | InputEvent::TouchMotion { device, .. }
            | InputEvent::TouchUp { device, .. }
            | InputEvent::TouchCancel { device } => device.as_deref(),
        }
    }

    pub fn time(&self) -> u32 {
        match self {
            InputEvent::Key(event) => event.time,
            InputEvent::PointerMotion { time, .. }
            | InputEvent::PointerButton { time, .. }
            | InputEvent::PointerAxis { time, .. }
            | InputEvent::TouchDown { time, .. }
            | InputEvent::TouchMotion { time, .. }
            | InputEvent::TouchUp { time, .. } => *time,
            InputEvent::TouchCancel { .. } => 0,
        }
    }

    pub fn is_keyboard(&self) -> bool {
        matches!(self, InputEvent::Key(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(
            self,
            InputEvent::PointerMotion { .. } | InputEvent::PointerButton { .. } | InputEvent::PointerAxis { .. }
        )
    }

    pub fn is_touch(&self) -> bool {
        matches!(
            self,
            InputEvent::TouchDown { .. }
                | InputEvent::TouchMotion { .. }
                | InputEvent::TouchUp { .. }
                | InputEvent::TouchCancel { .. }
        )
    }
}

impl From<KeyEvent> for InputEvent {
    fn from(event: KeyEvent) -> Self {
        InputEvent::Key(event)
    }
}
