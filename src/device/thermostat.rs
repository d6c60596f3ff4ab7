//! Thermostat profiles: RC35 (classic EMS) and RC300 (EMS+).
//!
//! Both serve up to four heating circuits.  Each circuit has its own
//! monitor and set record; the type ids step per circuit.

use super::fields::{FieldDescriptor as F, FieldKind as K, Scale, parse_number};
use super::library::flags;
use super::values::{Circuit, CircuitKind, Uom};
use super::{EmsDevice, PartialWrite};
use crate::error::CommandError;

pub const HEATING_CIRCUITS: u8 = 4;

pub const RC35_SET_HC1: u16 = 0x3D;
pub const RC35_MONITOR_HC1: u16 = 0x3E;
/// Type id distance between consecutive RC35 circuits.
pub const RC35_HC_STEP: u16 = 10;

pub const RC300_MONITOR_HC1: u16 = 0x02A5;
pub const RC300_SET_HC1: u16 = 0x02B9;

// ── RC35 ──────────────────────────────────────────────────────

const RC35_SELTEMP: F = F::new("seltemp", "selected room temperature", 2, K::U8)
    .scale(Scale::Div(2))
    .uom(Uom::Degrees)
    .command("seltemp");
/// Temporary room setpoint, write-only.
const RC35_TEMPTEMP: F = F::new("temptemp", "temporary room temperature", 37, K::U8).scale(Scale::Div(2));
const RC35_NIGHTTEMP: F = F::new("nighttemp", "night temperature", 1, K::U8)
    .scale(Scale::Div(2))
    .uom(Uom::Degrees)
    .command("nighttemp");
const RC35_DAYTEMP: F = F::new("daytemp", "day temperature", 2, K::U8)
    .scale(Scale::Div(2))
    .uom(Uom::Degrees)
    .command("daytemp");
const RC35_MODE: F = F::new("mode", "mode", 7, K::Enum(&["night", "day", "auto"])).command("mode");

static RC35_MONITOR: [F; 3] = [
    F::new("daymode", "day mode", 0, K::Bit(1)),
    RC35_SELTEMP,
    F::new("currtemp", "current room temperature", 3, K::I16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
];

static RC35_SET: [F; 3] = [RC35_NIGHTTEMP, RC35_DAYTEMP, RC35_MODE];

static RC35_MONITOR_NAMES: [&str; 4] = ["RC35MonitorHC1", "RC35MonitorHC2", "RC35MonitorHC3", "RC35MonitorHC4"];
static RC35_SET_NAMES: [&str; 4] = ["RC35SetHC1", "RC35SetHC2", "RC35SetHC3", "RC35SetHC4"];

// ── RC300 ─────────────────────────────────────────────────────

const RC300_SELTEMP: F = F::new("seltemp", "selected room temperature", 3, K::U8)
    .scale(Scale::Div(2))
    .uom(Uom::Degrees)
    .command("seltemp");
/// Manual setpoint, written to change the selected temperature.
const RC300_MANUALTEMP: F = F::new("manualtemp", "manual temperature", 10, K::U8).scale(Scale::Div(2));
const RC300_DAYTEMP: F = F::new("daytemp", "comfort temperature", 2, K::U8)
    .scale(Scale::Div(2))
    .uom(Uom::Degrees)
    .command("daytemp");
const RC300_NIGHTTEMP: F = F::new("nighttemp", "eco temperature", 4, K::U8)
    .scale(Scale::Div(2))
    .uom(Uom::Degrees)
    .command("nighttemp");
const RC300_MODE: F = F::new("mode", "mode", 21, K::Enum(&["manual", "auto"])).command("mode");

static RC300_MONITOR: [F; 2] = [
    F::new("currtemp", "current room temperature", 0, K::I16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    RC300_SELTEMP,
];

static RC300_SET: [F; 3] = [RC300_DAYTEMP, RC300_NIGHTTEMP, RC300_MODE];

static RC300_MONITOR_NAMES: [&str; 4] = [
    "RC300MonitorHC1",
    "RC300MonitorHC2",
    "RC300MonitorHC3",
    "RC300MonitorHC4",
];
static RC300_SET_NAMES: [&str; 4] = ["RC300SetHC1", "RC300SetHC2", "RC300SetHC3", "RC300SetHC4"];

pub fn rc35_monitor_type(hc: u8) -> u16 {
    RC35_MONITOR_HC1 + RC35_HC_STEP * u16::from(hc)
}

pub fn rc35_set_type(hc: u8) -> u16 {
    RC35_SET_HC1 + RC35_HC_STEP * u16::from(hc)
}

pub fn init(device: &mut EmsDevice) {
    let rc300 = device.has_flag(flags::RC300);
    for hc in 0..HEATING_CIRCUITS {
        let circuit = Some(Circuit::hc(hc));
        let i = usize::from(hc);
        if rc300 {
            let off = u16::from(hc);
            device.register_telegram_handler(RC300_MONITOR_HC1 + off, RC300_MONITOR_NAMES[i], circuit, &RC300_MONITOR, true);
            device.register_telegram_handler(RC300_SET_HC1 + off, RC300_SET_NAMES[i], circuit, &RC300_SET, true);
        } else {
            device.register_telegram_handler(rc35_monitor_type(hc), RC35_MONITOR_NAMES[i], circuit, &RC35_MONITOR, true);
            device.register_telegram_handler(rc35_set_type(hc), RC35_SET_NAMES[i], circuit, &RC35_SET, true);
        }
    }

    device.register_command("seltemp", "set selected room temperature", set_seltemp);
    device.register_command("mode", "set operating mode", set_mode);
    device.register_command("daytemp", "set day temperature", set_daytemp);
    device.register_command("nighttemp", "set night temperature", set_nighttemp);
}

/// Zero-based heating circuit a command addresses (hc1 when unspecified).
fn heating_circuit(circuit: Option<Circuit>) -> Result<u8, CommandError> {
    let c = circuit.unwrap_or(Circuit::hc(0));
    if c.kind != CircuitKind::Heating || c.index >= HEATING_CIRCUITS {
        return Err(CommandError::InvalidValue);
    }
    Ok(c.index)
}

fn room_temp(value: &str) -> Result<f32, CommandError> {
    let v = parse_number(value)?;
    if (5.0..=30.0).contains(&v) {
        Ok(v)
    } else {
        Err(CommandError::InvalidValue)
    }
}

fn set_seltemp(device: &EmsDevice, value: &str, circuit: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let hc = heating_circuit(circuit)?;
    let v = room_temp(value)?;
    if device.has_flag(flags::RC300) {
        PartialWrite::number(RC300_SET_HC1 + u16::from(hc), &RC300_MANUALTEMP, v)
    } else {
        PartialWrite::number(rc35_set_type(hc), &RC35_TEMPTEMP, v)
    }
}

fn set_mode(device: &EmsDevice, value: &str, circuit: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let hc = heating_circuit(circuit)?;
    if device.has_flag(flags::RC300) {
        PartialWrite::field(RC300_SET_HC1 + u16::from(hc), &RC300_MODE, value)
    } else {
        PartialWrite::field(rc35_set_type(hc), &RC35_MODE, value)
    }
}

fn set_daytemp(device: &EmsDevice, value: &str, circuit: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let hc = heating_circuit(circuit)?;
    let v = room_temp(value)?;
    if device.has_flag(flags::RC300) {
        PartialWrite::number(RC300_SET_HC1 + u16::from(hc), &RC300_DAYTEMP, v)
    } else {
        PartialWrite::number(rc35_set_type(hc), &RC35_DAYTEMP, v)
    }
}

fn set_nighttemp(device: &EmsDevice, value: &str, circuit: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let hc = heating_circuit(circuit)?;
    let v = room_temp(value)?;
    if device.has_flag(flags::RC300) {
        PartialWrite::number(RC300_SET_HC1 + u16::from(hc), &RC300_NIGHTTEMP, v)
    } else {
        PartialWrite::number(rc35_set_type(hc), &RC35_NIGHTTEMP, v)
    }
}
