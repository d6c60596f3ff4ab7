//! Decoded device values, keyed by circuit and short name.

use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

use serde::Serialize;
use serde_json::{Map, Value as Json, json};

use super::fields::FieldDescriptor;

/// Unit of measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Uom {
    None,
    Degrees,
    Percent,
    Minutes,
    Seconds,
    Hours,
    Kw,
}

impl Uom {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Degrees => "°C",
            Self::Percent => "%",
            Self::Minutes => "minutes",
            Self::Seconds => "seconds",
            Self::Hours => "hours",
            Self::Kw => "kW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitKind {
    Heating,
    WarmWater,
    Pool,
}

/// Heating, warm-water or pool circuit a value belongs to (zero-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Circuit {
    pub kind: CircuitKind,
    pub index: u8,
}

impl Circuit {
    pub const fn hc(index: u8) -> Self {
        Self {
            kind: CircuitKind::Heating,
            index,
        }
    }

    pub const fn wwc(index: u8) -> Self {
        Self {
            kind: CircuitKind::WarmWater,
            index,
        }
    }

    pub const fn pool(index: u8) -> Self {
        Self {
            kind: CircuitKind::Pool,
            index,
        }
    }

    /// `hc1`, `wwc2`, `pool`
    pub fn tag(self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Circuit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prefix = match self.kind {
            CircuitKind::Heating => "hc",
            CircuitKind::WarmWater => "wwc",
            // one pool per installation
            CircuitKind::Pool => return f.write_str("pool"),
        };
        write!(f, "{}{}", prefix, self.index + 1)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    NotSet,
    Bool(bool),
    Int(i32),
    Float(f32),
    /// Index into the descriptor's option list.
    Enum(u8),
    Text(String),
}

impl Value {
    pub fn is_set(&self) -> bool {
        !matches!(self, Self::NotSet)
    }
}

#[derive(Debug, Clone)]
pub struct DeviceValue {
    pub circuit: Option<Circuit>,
    pub desc: &'static FieldDescriptor,
    pub value: Value,
}

impl DeviceValue {
    /// JSON rendering: enums as their option label, floats rounded to
    /// the descriptor's precision.
    pub fn to_json(&self) -> Json {
        match &self.value {
            Value::NotSet => Json::Null,
            Value::Bool(b) => json!(b),
            Value::Int(i) => json!(i),
            Value::Float(v) => {
                let p = self.desc.scale.precision();
                let factor = 10f64.powi(i32::from(p));
                json!((f64::from(*v) * factor).round() / factor)
            }
            Value::Text(t) => json!(t),
            Value::Enum(i) => match self.desc.options().get(*i as usize) {
                Some(label) => json!(label),
                None => json!(i),
            },
        }
    }

    /// Writable command name, circuit-prefixed (`hc1/seltemp`).
    pub fn command_path(&self) -> Option<String> {
        let cmd = self.desc.command?;
        Some(match self.circuit {
            Some(c) => alloc::format!("{}/{}", c, cmd),
            None => cmd.to_string(),
        })
    }
}

/// All values of one device.
#[derive(Debug, Default)]
pub struct ValueStore {
    values: Vec<DeviceValue>,
    changed: bool,
}

impl ValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the slot for a field (idempotent).  A later registration of
    /// the same name only upgrades the descriptor if it adds a command.
    pub fn register(&mut self, circuit: Option<Circuit>, desc: &'static FieldDescriptor) {
        if let Some(existing) = self.find_mut(circuit, desc.name) {
            if existing.desc.command.is_none() && desc.command.is_some() {
                existing.desc = desc;
            }
            return;
        }
        self.values.push(DeviceValue {
            circuit,
            desc,
            value: Value::NotSet,
        });
    }

    fn find_mut(&mut self, circuit: Option<Circuit>, name: &str) -> Option<&mut DeviceValue> {
        self.values
            .iter_mut()
            .find(|v| v.circuit == circuit && v.desc.name == name)
    }

    pub fn get(&self, circuit: Option<Circuit>, name: &str) -> Option<&DeviceValue> {
        self.values
            .iter()
            .find(|v| v.circuit == circuit && v.desc.name == name)
    }

    /// Store a decoded value; returns `true` when it differs from the
    /// previous one.
    pub fn update(&mut self, circuit: Option<Circuit>, name: &str, value: Value) -> bool {
        let Some(slot) = self.find_mut(circuit, name) else {
            return false;
        };
        if slot.value == value {
            return false;
        }
        slot.value = value;
        self.changed = true;
        true
    }

    pub fn has_changed(&self) -> bool {
        self.changed
    }

    pub fn clear_changed(&mut self) {
        self.changed = false;
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceValue> {
        self.values.iter()
    }

    pub fn count_set(&self) -> usize {
        self.values.iter().filter(|v| v.value.is_set()).count()
    }

    /// Publishable snapshot: top-level values plus one nested object per
    /// circuit.  Unset values are left out.
    pub fn to_json(&self) -> Map<String, Json> {
        let mut root = Map::new();
        for v in self.values.iter().filter(|v| v.value.is_set()) {
            match v.circuit {
                None => {
                    root.insert(v.desc.name.to_string(), v.to_json());
                }
                Some(c) => {
                    let entry = root
                        .entry(c.tag())
                        .or_insert_with(|| Json::Object(Map::new()));
                    if let Json::Object(obj) = entry {
                        obj.insert(v.desc.name.to_string(), v.to_json());
                    }
                }
            }
        }
        root
    }
}
