//! Bus trace ("watch") settings and line formatting.

use core::fmt::Write as _;

use alloc::string::String;

use super::telegram::Telegram;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WatchMode {
    #[default]
    Off,
    /// Every decoded telegram.
    On,
    /// Every frame as the hex bytes received, including rejected and
    /// bus-control bytes.
    Raw,
    /// Only telegrams from addresses no device is registered for.
    Unknown,
}

impl WatchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::On => "on",
            Self::Raw => "raw",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Off, Self::On, Self::Raw, Self::Unknown]
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(name))
    }
}

/// Watch mode plus an optional type-id filter.
#[derive(Debug, Clone, Copy, Default)]
pub struct Watch {
    mode: WatchMode,
    type_filter: Option<u16>,
}

impl Watch {
    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    pub fn type_filter(&self) -> Option<u16> {
        self.type_filter
    }

    /// Apply a `watch` command value.
    ///
    /// Accepts a mode name, or a type id (`0x18`, `18` hex) which turns
    /// watching on with that filter.  Switching off clears the filter.
    pub fn apply(&mut self, value: &str) -> bool {
        let value = value.trim();
        if let Some(mode) = WatchMode::from_name(value) {
            self.mode = mode;
            if mode == WatchMode::Off {
                self.type_filter = None;
            }
            return true;
        }
        let digits = value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value);
        match u16::from_str_radix(digits, 16) {
            Ok(type_id) if !digits.is_empty() => {
                self.type_filter = Some(type_id);
                if self.mode == WatchMode::Off {
                    self.mode = WatchMode::On;
                }
                true
            }
            _ => false,
        }
    }

    /// Whether a telegram should be traced in decoded form.
    pub fn wants_telegram(&self, telegram: &Telegram, known_source: bool) -> bool {
        let mode_ok = match self.mode {
            WatchMode::Off | WatchMode::Raw => false,
            WatchMode::On => true,
            WatchMode::Unknown => !known_source,
        };
        mode_ok && self.passes_filter(telegram)
    }

    /// Whether a telegram should be traced as its received bytes.
    pub fn wants_raw_telegram(&self, telegram: &Telegram) -> bool {
        self.mode == WatchMode::Raw && self.passes_filter(telegram)
    }

    fn passes_filter(&self, telegram: &Telegram) -> bool {
        self.type_filter.is_none_or(|t| t == telegram.type_id())
    }

    /// Whether frames that are not telegrams should be traced.
    pub fn wants_raw(&self) -> bool {
        self.mode == WatchMode::Raw && self.type_filter.is_none()
    }
}

/// One trace line for a decoded telegram.
pub fn format_telegram(
    telegram: &Telegram,
    src_name: &str,
    dest_name: &str,
    handler: Option<&str>,
) -> String {
    let mut line = String::new();
    let _ = write!(
        line,
        "{}(0x{:02X}) -> {}(0x{:02X}), ",
        src_name,
        telegram.src(),
        dest_name,
        telegram.dest_addr()
    );
    if telegram.is_write() {
        line.push_str("W ");
    }
    match handler {
        Some(name) => {
            let _ = write!(line, "{}(0x{:02X})", name, telegram.type_id());
        }
        None => {
            let _ = write!(line, "?(0x{:02X})", telegram.type_id());
        }
    }
    let _ = write!(line, ", offset {}, data:", telegram.offset());
    for b in telegram.payload() {
        let _ = write!(line, " {b:02X}");
    }
    line
}

/// One trace line for an undecoded frame.
pub fn format_raw(raw: &[u8], note: Option<&str>) -> String {
    let mut line = String::from("raw:");
    for b in raw {
        let _ = write!(line, " {b:02X}");
    }
    if let Some(note) = note {
        let _ = write!(line, " ({note})");
    }
    line
}
