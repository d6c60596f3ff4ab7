//! Command registry: named, typed handlers per device type.
//!
//! Every writable value and every gateway action is reachable as
//! `(device_type, name)`.  MQTT, the web API and the console all funnel
//! through [`CommandRegistry::call`], which enforces the admin flag and
//! reports a uniform [`CommandRet`].

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::ops::BitOr;

use serde_json::{Map, Value, json};

use crate::device::DeviceType;
use crate::error::CommandError;

/// JSON object a handler writes its result into.
pub type Output = Map<String, Value>;

/// `id` offset marking a warm-water circuit (`wwc1` = 8).
pub const WWC_ID_BASE: i8 = 8;

/// Arguments handed to a command handler.
#[derive(Debug, Clone, Copy)]
pub struct CommandArgs<'a> {
    pub device_type: DeviceType,
    /// Registered name of the command being run.
    pub name: &'static str,
    pub value: &'a str,
    /// Circuit selector: `-1` default, `0..` heating circuit,
    /// [`WWC_ID_BASE`]`..` warm-water circuit.
    pub id: i8,
}

pub type CommandFn<C> = fn(&mut C, &CommandArgs<'_>, &mut Output) -> Result<(), CommandError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandFlags(u8);

impl CommandFlags {
    pub const NONE: Self = Self(0);
    /// Needs an authenticated caller.
    pub const ADMIN_ONLY: Self = Self(1 << 0);
    /// Gets its own MQTT `<device>/<cmd>` subscription.
    pub const SUBSCRIBE: Self = Self(1 << 1);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CommandFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

pub struct CommandEntry<C> {
    pub device_type: DeviceType,
    pub name: &'static str,
    pub description: &'static str,
    pub flags: CommandFlags,
    handler: CommandFn<C>,
}

/// Result code of a command call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandRet {
    Ok,
    Error,
    NotFound,
    NotAllowed,
    InvalidValue,
}

impl CommandRet {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Error => "error",
            Self::NotFound => "not found",
            Self::NotAllowed => "not allowed",
            Self::InvalidValue => "invalid value",
        }
    }

    pub fn into_result(self) -> Result<(), CommandError> {
        match self {
            Self::Ok => Ok(()),
            Self::Error => Err(CommandError::Failed),
            Self::NotFound => Err(CommandError::NotFound),
            Self::NotAllowed => Err(CommandError::NotAllowed),
            Self::InvalidValue => Err(CommandError::InvalidValue),
        }
    }
}

impl From<Result<(), CommandError>> for CommandRet {
    fn from(result: Result<(), CommandError>) -> Self {
        match result {
            Ok(()) => Self::Ok,
            Err(CommandError::NotFound) => Self::NotFound,
            Err(CommandError::NotAllowed) => Self::NotAllowed,
            Err(CommandError::InvalidValue) => Self::InvalidValue,
            Err(CommandError::Failed) => Self::Error,
        }
    }
}

pub struct CommandRegistry<C> {
    entries: Vec<CommandEntry<C>>,
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandRegistry<C> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Register a handler; a second registration of the same
    /// `(device_type, name)` replaces the first.
    pub fn add(
        &mut self,
        device_type: DeviceType,
        name: &'static str,
        handler: CommandFn<C>,
        description: &'static str,
        flags: CommandFlags,
    ) {
        let entry = CommandEntry {
            device_type,
            name,
            description,
            flags,
            handler,
        };
        match self.position(device_type, name) {
            Some(i) => self.entries[i] = entry,
            None => self.entries.push(entry),
        }
    }

    fn position(&self, device_type: DeviceType, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.device_type == device_type && e.name.eq_ignore_ascii_case(name))
    }

    pub fn find(&self, device_type: DeviceType, name: &str) -> Option<&CommandEntry<C>> {
        self.position(device_type, name).map(|i| &self.entries[i])
    }

    /// Look up and run a command.
    ///
    /// Non-OK results leave a human-readable `message` in `output`.
    #[allow(clippy::too_many_arguments)]
    pub fn call(
        &self,
        ctx: &mut C,
        device_type: DeviceType,
        cmd: &str,
        value: &str,
        authenticated: bool,
        id: i8,
        output: &mut Output,
    ) -> CommandRet {
        let Some(entry) = self.find(device_type, cmd) else {
            output.insert(
                "message".to_string(),
                json!(alloc::format!("command {} not found for {}", cmd, device_type.name())),
            );
            return CommandRet::NotFound;
        };

        if entry.flags.contains(CommandFlags::ADMIN_ONLY) && !authenticated {
            output.insert(
                "message".to_string(),
                json!(alloc::format!("command {} requires authentication", entry.name)),
            );
            return CommandRet::NotAllowed;
        }

        let args = CommandArgs {
            device_type,
            name: entry.name,
            value,
            id,
        };
        let ret = CommandRet::from((entry.handler)(ctx, &args, output));
        if ret != CommandRet::Ok && !output.contains_key("message") {
            output.insert(
                "message".to_string(),
                json!(alloc::format!("{}/{}: {}", device_type.name(), entry.name, ret.as_str())),
            );
        }
        ret
    }

    /// Describe every command of `device_type` into `output`.
    pub fn list(&self, device_type: DeviceType, output: &mut Output) {
        for e in self.entries.iter().filter(|e| e.device_type == device_type) {
            output.insert(
                e.name.to_string(),
                json!({
                    "description": e.description,
                    "admin": e.flags.contains(CommandFlags::ADMIN_ONLY),
                    "subscribe": e.flags.contains(CommandFlags::SUBSCRIBE),
                }),
            );
        }
    }

    pub fn has_commands(&self, device_type: DeviceType) -> bool {
        self.entries.iter().any(|e| e.device_type == device_type)
    }

    /// Commands that want their own MQTT subscription.
    pub fn subscribable(&self) -> impl Iterator<Item = &CommandEntry<C>> {
        self.entries
            .iter()
            .filter(|e| e.flags.contains(CommandFlags::SUBSCRIBE))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Strip a circuit prefix (`hc2/`, `wwc1.`) from `cmd`, storing the
/// zero-based circuit in `id`.  Anything else is returned unchanged.
pub fn parse_command_string<'a>(cmd: &'a str, id: &mut i8) -> &'a str {
    let (rest, base) = if let Some(rest) = strip_prefix_ci(cmd, "wwc") {
        (rest, WWC_ID_BASE)
    } else if let Some(rest) = strip_prefix_ci(cmd, "hc") {
        (rest, 0)
    } else {
        return cmd;
    };

    let mut chars = rest.chars();
    let Some(n) = chars.next().and_then(|c| c.to_digit(10)) else {
        return cmd;
    };
    if !(1..=8).contains(&n) {
        return cmd;
    }
    // a single digit, then the separator
    let Some(tail) = chars
        .as_str()
        .strip_prefix('/')
        .or_else(|| chars.as_str().strip_prefix('.'))
    else {
        return cmd;
    };
    if tail.is_empty() {
        return cmd;
    }
    *id = base + (n as i8 - 1);
    tail
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix).then(|| &s[prefix.len()..])
}
