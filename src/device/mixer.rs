//! Mixer module profiles: MM10 (classic EMS), MM100 (EMS+), the IPM pump
//! module and the MP100 pool module.
//!
//! A mixer serves exactly one circuit, given by its bus address
//! (`0x20..=0x27` heating, `0x28..=0x2F` warm water).  The pool module
//! serves the single pool circuit.

use super::fields::{FieldDescriptor as F, FieldKind as K, Scale, parse_number};
use super::library::{flags, mixer_circuit};
use super::values::{Circuit, CircuitKind, Uom};
use super::{EmsDevice, PartialWrite};
use crate::error::CommandError;

pub const MM10_STATUS: u16 = 0xAB;
pub const MM10_CONFIG: u16 = 0xAA;
pub const MM100_STATUS_HC1: u16 = 0x01D7;
pub const MM100_CONFIG_HC1: u16 = 0x02D7;
pub const MM100_SET_HC1: u16 = 0x02E1;
pub const MM100_STATUS_WWC1: u16 = 0x0331;
pub const IPM_STATUS: u16 = 0x010C;
pub const IPM_TEMP: u16 = 0x1E;
pub const IPM_SET: u16 = 0x23;
pub const POOL_STATUS: u16 = 0x05BA;

const FLOW_SET_TEMP: F = F::new("flowsettemp", "set flow temperature", 0, K::U8)
    .uom(Uom::Degrees)
    .command("flowsettemp");
const FLOW_TEMP_HC: F = F::new("flowtemphc", "current flow temperature", 1, K::U16)
    .scale(Scale::Div(10))
    .uom(Uom::Degrees);
const MM10_ACTIVATED: F = F::new("activated", "activated", 0, K::Bool).command("activated");
const MM10_VALVE_TIME: F = F::new("valvetime", "valve runtime", 1, K::U8)
    .scale(Scale::Mul(10))
    .uom(Uom::Seconds)
    .command("valvetime");

static MM10_STATUS_FIELDS: [F; 4] = [
    FLOW_SET_TEMP,
    FLOW_TEMP_HC,
    F::new("pumpstatus", "pump modulation", 3, K::U8).uom(Uom::Percent),
    F::new("valvestatus", "mixing valve position", 4, K::I8).uom(Uom::Percent),
];

static MM10_CONFIG_FIELDS: [F; 2] = [MM10_ACTIVATED, MM10_VALVE_TIME];

const MM100_PUMP: F = F::new("pumpstatus", "pump", 0, K::Bool).command("pumpstatus");
const MM100_FLOW_SET_TEMP: F = F::new("flowsettemp", "set flow temperature", 1, K::U8)
    .uom(Uom::Degrees)
    .command("flowsettemp");
const MM100_ACTIVATED: F = F::new("activated", "activated", 0, K::Bool).command("activated");
const MM100_VALVE_TIME: F = F::new("valvetime", "valve runtime", 3, K::U8)
    .scale(Scale::Mul(10))
    .uom(Uom::Seconds)
    .command("valvetime");

static MM100_STATUS_FIELDS: [F; 2] = [
    F::new("flowtemphc", "current flow temperature", 3, K::U16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("valvestatus", "mixing valve position", 5, K::U8).uom(Uom::Percent),
];

static MM100_SET_FIELDS: [F; 2] = [MM100_PUMP, MM100_FLOW_SET_TEMP];
static MM100_CONFIG_FIELDS: [F; 2] = [MM100_ACTIVATED, MM100_VALVE_TIME];

static MM100_WWC_FIELDS: [F; 2] = [
    F::new("wwtemp", "warm water temperature", 0, K::U16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("wwpumpstatus", "warm water pump", 2, K::Bool),
];

// IPM

const IPM_FLOW_SET_TEMP: F = F::new("flowsettemp", "set flow temperature", 1, K::U8)
    .uom(Uom::Degrees)
    .command("flowsettemp");

static IPM_STATUS_FIELDS: [F; 5] = [
    F::new("circuitmode", "circuit mode", 0, K::Enum(&["off", "unmixed", "mixed"])),
    F::new("pumpstatus", "pump", 1, K::Bit(0)),
    F::new("valvestatus", "mixing valve position", 2, K::I8).uom(Uom::Percent),
    F::new("flowtemphc", "current flow temperature", 3, K::U16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("flowsettemp", "set flow temperature", 5, K::U8).uom(Uom::Degrees),
];

static IPM_TEMP_FIELDS: [F; 1] = [F::new("flowtempvf", "flow temperature in header", 0, K::U16)
    .scale(Scale::Div(10))
    .uom(Uom::Degrees)];

static IPM_SET_FIELDS: [F; 1] = [IPM_FLOW_SET_TEMP];

// Pool

static POOL_FIELDS: [F; 3] = [
    F::new("pooltemp", "pool temperature", 0, K::I16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new(
        "poolshuntstatus",
        "pool shunt status",
        2,
        K::Enum(&["stopped", "opening", "closing", "open", "close"]),
    ),
    F::new("poolshunt", "pool shunt open/close", 3, K::U8).uom(Uom::Percent),
];

pub fn init(device: &mut EmsDevice) {
    if device.has_flag(flags::MP) {
        let pool = Circuit::pool(0);
        device.set_circuit(Some(pool));
        device.register_telegram_handler(POOL_STATUS, "HpPoolStatus", Some(pool), &POOL_FIELDS, true);
        return;
    }

    let circuit = mixer_circuit(device.address()).unwrap_or(Circuit::hc(0));
    device.set_circuit(Some(circuit));
    let n = u16::from(circuit.index);

    if circuit.kind == CircuitKind::WarmWater {
        if device.has_flag(flags::MM100) {
            device.register_telegram_handler(MM100_STATUS_WWC1 + n, "MMPLUSStatusWWC", Some(circuit), &MM100_WWC_FIELDS, true);
        }
        return;
    }

    if device.has_flag(flags::IPM) {
        // the module broadcasts these on its own
        device.register_telegram_handler(IPM_STATUS, "IPMStatusMessage", Some(circuit), &IPM_STATUS_FIELDS, false);
        device.register_telegram_handler(IPM_TEMP, "IPMTempMessage", Some(circuit), &IPM_TEMP_FIELDS, false);
        device.register_telegram_handler(IPM_SET, "IPMSetMessage", Some(circuit), &IPM_SET_FIELDS, false);
        device.register_command("flowsettemp", "set flow temperature", set_flow_temp);
        return;
    }

    if device.has_flag(flags::MM100) {
        device.register_telegram_handler(MM100_STATUS_HC1 + n, "MMPLUSStatusHC", Some(circuit), &MM100_STATUS_FIELDS, true);
        device.register_telegram_handler(MM100_SET_HC1 + n, "MMPLUSSetHC", Some(circuit), &MM100_SET_FIELDS, true);
        device.register_telegram_handler(MM100_CONFIG_HC1 + n, "MMPLUSConfigHC", Some(circuit), &MM100_CONFIG_FIELDS, true);
        device.register_command("pumpstatus", "switch circuit pump", set_pump);
    } else {
        device.register_telegram_handler(MM10_STATUS, "MMStatus", Some(circuit), &MM10_STATUS_FIELDS, true);
        device.register_telegram_handler(MM10_CONFIG, "MMConfig", Some(circuit), &MM10_CONFIG_FIELDS, true);
    }
    device.register_command("flowsettemp", "set flow temperature", set_flow_temp);
    device.register_command("activated", "activate circuit", set_activated);
    device.register_command("valvetime", "set valve runtime", set_valve_time);
}

fn own_index(device: &EmsDevice) -> u16 {
    device.circuit().map_or(0, |c| u16::from(c.index))
}

fn set_flow_temp(device: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let v = parse_number(value)?;
    if !(0.0..=90.0).contains(&v) {
        return Err(CommandError::InvalidValue);
    }
    if device.has_flag(flags::IPM) {
        PartialWrite::number(IPM_SET, &IPM_FLOW_SET_TEMP, v)
    } else if device.has_flag(flags::MM100) {
        PartialWrite::number(MM100_SET_HC1 + own_index(device), &MM100_FLOW_SET_TEMP, v)
    } else {
        PartialWrite::number(MM10_STATUS, &FLOW_SET_TEMP, v)
    }
}

fn set_pump(device: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    PartialWrite::field(MM100_SET_HC1 + own_index(device), &MM100_PUMP, value)
}

fn set_activated(device: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    if device.has_flag(flags::MM100) {
        PartialWrite::field(MM100_CONFIG_HC1 + own_index(device), &MM100_ACTIVATED, value)
    } else {
        PartialWrite::field(MM10_CONFIG, &MM10_ACTIVATED, value)
    }
}

fn set_valve_time(device: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let v = parse_number(value)?;
    if !(10.0..=600.0).contains(&v) {
        return Err(CommandError::InvalidValue);
    }
    if device.has_flag(flags::MM100) {
        PartialWrite::number(MM100_CONFIG_HC1 + own_index(device), &MM100_VALVE_TIME, v)
    } else {
        PartialWrite::number(MM10_CONFIG, &MM10_VALVE_TIME, v)
    }
}
