//! EMS devices: telegram handlers, value stores, setters.
//!
//! ```text
//!   Telegram ──▶ DeviceList::dispatch ──▶ EmsDevice (by src address)
//!                                            │
//!                       handlers[type_id] ───┤──▶ fields::decode ──▶ ValueStore
//!                                            │
//!   command ──▶ DeviceCommand::setter ──▶ PartialWrite ──▶ Telegram (tx)
//! ```
//!
//! Every concrete device shares [`EmsDevice`]; what differs per type is
//! the handler table and the setter list, installed by the profile
//! modules ([`boiler`], [`thermostat`], [`mixer`], [`solar`]) at
//! construction time.

pub mod boiler;
pub mod fields;
pub mod library;
pub mod mixer;
pub mod solar;
pub mod thermostat;
pub mod values;

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use serde::Serialize;
use serde_json::{Map, Value as Json, json};

use crate::command::WWC_ID_BASE;
use crate::ems::Telegram;
use crate::error::CommandError;
use fields::{FieldBytes, FieldDescriptor};
use values::{Circuit, ValueStore};

// ───────────────────────────────────────────────────────────────
// Identity
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    System,
    Boiler,
    Thermostat,
    Mixer,
    Solar,
}

impl DeviceType {
    pub const ALL: [Self; 5] = [
        Self::System,
        Self::Boiler,
        Self::Thermostat,
        Self::Mixer,
        Self::Solar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Boiler => "boiler",
            Self::Thermostat => "thermostat",
            Self::Mixer => "mixer",
            Self::Solar => "solar",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(name.trim()))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub address: u8,
    pub product_id: u8,
    pub version: heapless::String<8>,
    pub unique_id: u8,
    pub flags: u8,
    pub name: &'static str,
}

// ───────────────────────────────────────────────────────────────
// Handlers and setters
// ───────────────────────────────────────────────────────────────

/// Record type a device understands.
#[derive(Debug, Clone)]
pub struct TelegramHandler {
    pub type_id: u16,
    pub name: &'static str,
    pub circuit: Option<Circuit>,
    pub fields: &'static [FieldDescriptor],
    /// Requested by `fetch_values`.
    pub fetch: bool,
    received: bool,
}

impl TelegramHandler {
    pub fn received(&self) -> bool {
        self.received
    }
}

/// Bytes a setter wants written: record, position, data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialWrite {
    pub type_id: u16,
    pub offset: u8,
    pub data: FieldBytes,
}

impl PartialWrite {
    /// Encode `value` for `desc` of record `type_id`.
    pub fn field(type_id: u16, desc: &FieldDescriptor, value: &str) -> Result<Self, CommandError> {
        Ok(Self {
            type_id,
            offset: desc.offset,
            data: fields::encode(desc, value)?,
        })
    }

    /// Encode a range-checked number for `desc` of record `type_id`.
    pub fn number(type_id: u16, desc: &FieldDescriptor, value: f32) -> Result<Self, CommandError> {
        Ok(Self {
            type_id,
            offset: desc.offset,
            data: fields::encode_number(desc, value)?,
        })
    }
}

/// Builds the write for one command from the caller's value string.
pub type SetterFn = fn(&EmsDevice, &str, Option<Circuit>) -> Result<PartialWrite, CommandError>;

#[derive(Clone, Copy)]
pub struct DeviceCommand {
    pub name: &'static str,
    pub description: &'static str,
    pub setter: SetterFn,
}

impl fmt::Debug for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceCommand").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Map a command `id` to a circuit: `-1` none, `0..` heating,
/// `WWC_ID_BASE..` warm water.
pub fn circuit_from_id(id: i8) -> Option<Circuit> {
    match id {
        i8::MIN..=-1 => None,
        0..WWC_ID_BASE => Some(Circuit::hc(id as u8)),
        _ => Some(Circuit::wwc((id - WWC_ID_BASE) as u8)),
    }
}

// ───────────────────────────────────────────────────────────────
// Device
// ───────────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct EmsDevice {
    info: DeviceInfo,
    circuit: Option<Circuit>,
    handlers: Vec<TelegramHandler>,
    commands: Vec<DeviceCommand>,
    store: ValueStore,
}

impl EmsDevice {
    /// Build a device and install its type's handlers and setters.
    pub fn new(info: DeviceInfo) -> Self {
        let mut device = Self {
            info,
            circuit: None,
            handlers: Vec::new(),
            commands: Vec::new(),
            store: ValueStore::new(),
        };
        match device.info.device_type {
            DeviceType::Boiler => boiler::init(&mut device),
            DeviceType::Thermostat => thermostat::init(&mut device),
            DeviceType::Mixer => mixer::init(&mut device),
            DeviceType::Solar => solar::init(&mut device),
            DeviceType::System => {}
        }
        device
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn device_type(&self) -> DeviceType {
        self.info.device_type
    }

    pub fn address(&self) -> u8 {
        self.info.address
    }

    pub fn flags(&self) -> u8 {
        self.info.flags
    }

    pub fn has_flag(&self, flag: u8) -> bool {
        self.info.flags & flag != 0
    }

    /// Circuit this module serves (mixers only).
    pub fn circuit(&self) -> Option<Circuit> {
        self.circuit
    }

    pub(crate) fn set_circuit(&mut self, circuit: Option<Circuit>) {
        self.circuit = circuit;
    }

    pub fn register_telegram_handler(
        &mut self,
        type_id: u16,
        name: &'static str,
        circuit: Option<Circuit>,
        fields: &'static [FieldDescriptor],
        fetch: bool,
    ) {
        for desc in fields {
            self.store.register(circuit, desc);
        }
        self.handlers.push(TelegramHandler {
            type_id,
            name,
            circuit,
            fields,
            fetch,
            received: false,
        });
    }

    pub fn register_command(&mut self, name: &'static str, description: &'static str, setter: SetterFn) {
        self.commands.retain(|c| c.name != name);
        self.commands.push(DeviceCommand {
            name,
            description,
            setter,
        });
    }

    pub fn handlers(&self) -> &[TelegramHandler] {
        &self.handlers
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn command(&self, name: &str) -> Option<&DeviceCommand> {
        self.commands
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn handler_name(&self, type_id: u16) -> Option<&'static str> {
        self.handlers
            .iter()
            .find(|h| h.type_id == type_id)
            .map(|h| h.name)
    }

    pub fn values(&self) -> &ValueStore {
        &self.store
    }

    /// Decode a telegram into the store.  Returns `false` when no
    /// handler is registered for its type.
    pub fn handle_telegram(&mut self, telegram: &Telegram) -> bool {
        let mut handled = false;
        for handler in &mut self.handlers {
            if handler.type_id != telegram.type_id() {
                continue;
            }
            handled = true;
            handler.received = true;
            for desc in handler.fields {
                if let Some(value) = fields::decode(telegram, desc) {
                    self.store.update(handler.circuit, desc.name, value);
                }
            }
        }
        handled
    }

    /// Record types to request on a fetch.
    pub fn fetch_types(&self) -> impl Iterator<Item = u16> + '_ {
        self.handlers.iter().filter(|h| h.fetch).map(|h| h.type_id)
    }

    pub fn has_changed(&self) -> bool {
        self.store.has_changed()
    }

    /// Merge this device's values into `out` if they changed since the
    /// last publish (or `force`).  Returns whether anything was added.
    pub fn publish_values(&mut self, out: &mut Map<String, Json>, force: bool) -> bool {
        if !force && !self.store.has_changed() {
            return false;
        }
        self.store.clear_changed();
        let values = self.store.to_json();
        if values.is_empty() {
            return false;
        }
        for (k, v) in values {
            // circuits of sibling modules share one topic
            if let (Some(Json::Object(existing)), Json::Object(nested)) = (out.get_mut(&k), &v) {
                existing.extend(nested.clone());
                continue;
            }
            out.insert(k, v);
        }
        true
    }

    /// Web dump: `{ "type": .., "data": [ { v, u, n, c, l } ] }`.
    pub fn generate_values_web(&self, out: &mut Map<String, Json>) {
        out.insert("type".to_string(), json!(self.info.device_type.name()));
        let data: Vec<Json> = self
            .store
            .iter()
            .filter(|v| v.value.is_set())
            .map(|v| {
                let label = match v.circuit {
                    Some(c) => alloc::format!("{} {}", c, v.desc.label),
                    None => v.desc.label.to_string(),
                };
                let mut entry = Map::new();
                entry.insert("v".to_string(), v.to_json());
                entry.insert("u".to_string(), json!(v.desc.uom.as_str()));
                entry.insert("n".to_string(), json!(label));
                if let Some(cmd) = v.command_path() {
                    entry.insert("c".to_string(), json!(cmd));
                }
                if !v.desc.options().is_empty() {
                    entry.insert("l".to_string(), json!(v.desc.options()));
                }
                Json::Object(entry)
            })
            .collect();
        out.insert("data".to_string(), Json::Array(data));
    }

    /// `0x18 (UBAMonitorFast), 0x33 (UBAParameterWW)*`; `*` marks types
    /// never received.
    pub fn show_telegram_handlers(&self, out: &mut impl fmt::Write) -> fmt::Result {
        for (i, h) in self.handlers.iter().enumerate() {
            if i > 0 {
                out.write_str(", ")?;
            }
            write!(out, "0x{:02X} ({})", h.type_id, h.name)?;
            if !h.received {
                out.write_char('*')?;
            }
        }
        Ok(())
    }

    /// Turn a setter's write into a telegram from `bus_id`.
    pub fn build_write(&self, bus_id: u8, write: &PartialWrite) -> Result<Telegram, CommandError> {
        Telegram::write(bus_id, self.info.address, write.type_id, write.offset, &write.data)
            .map_err(|_| CommandError::Failed)
    }
}

// ───────────────────────────────────────────────────────────────
// Device list
// ───────────────────────────────────────────────────────────────

/// What happened to a telegram offered to the device list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Handled,
    /// Source is a known device without a handler for the type.
    NoHandler,
    UnknownSource,
}

#[derive(Debug, Default)]
pub struct DeviceList {
    devices: Vec<EmsDevice>,
}

impl DeviceList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, device: EmsDevice) {
        self.devices.push(device);
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn contains_address(&self, address: u8) -> bool {
        self.get(address).is_some()
    }

    pub fn get(&self, address: u8) -> Option<&EmsDevice> {
        self.devices.iter().find(|d| d.address() == address)
    }

    pub fn get_mut(&mut self, address: u8) -> Option<&mut EmsDevice> {
        self.devices.iter_mut().find(|d| d.address() == address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EmsDevice> {
        self.devices.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut EmsDevice> {
        self.devices.iter_mut()
    }

    pub fn of_type(&self, device_type: DeviceType) -> impl Iterator<Item = &EmsDevice> {
        self.devices
            .iter()
            .filter(move |d| d.device_type() == device_type)
    }

    /// Device a command with circuit `id` is meant for.
    ///
    /// Modules that serve one circuit (mixers) are matched on it; other
    /// devices are unique per type.
    pub fn for_command(&self, device_type: DeviceType, id: i8) -> Option<&EmsDevice> {
        let wanted = circuit_from_id(id);
        let mut candidates = self.of_type(device_type);
        match wanted {
            Some(c) => self
                .of_type(device_type)
                .find(|d| d.circuit() == Some(c))
                .or_else(|| candidates.find(|d| d.circuit().is_none())),
            None => candidates.next(),
        }
    }

    /// Route a telegram by its source address; writes to a known device
    /// are also offered to the destination.
    pub fn dispatch(&mut self, telegram: &Telegram) -> Dispatch {
        let result = match self.get_mut(telegram.src()) {
            Some(device) => {
                if device.handle_telegram(telegram) {
                    return Dispatch::Handled;
                }
                Dispatch::NoHandler
            }
            None => Dispatch::UnknownSource,
        };
        if telegram.is_write() {
            if let Some(device) = self.get_mut(telegram.dest_addr()) {
                if device.handle_telegram(telegram) {
                    return Dispatch::Handled;
                }
            }
        }
        result
    }

    /// Name of the handler for a telegram, looked up like `dispatch`.
    pub fn handler_name(&self, telegram: &Telegram) -> Option<&'static str> {
        self.get(telegram.src())
            .and_then(|d| d.handler_name(telegram.type_id()))
            .or_else(|| {
                self.get(telegram.dest_addr())
                    .and_then(|d| d.handler_name(telegram.type_id()))
            })
    }

    /// Short name for an address in trace lines.
    pub fn address_name(&self, address: u8, own_id: u8) -> &'static str {
        if address == own_id {
            return "me";
        }
        if address == 0 {
            return "all";
        }
        self.get(address).map_or("?", |d| d.device_type().name())
    }
}
