//! Boiler (UBA) profile.

use super::fields::{FieldDescriptor as F, FieldKind as K, Scale, parse_number};
use super::values::{Circuit, Uom};
use super::{EmsDevice, PartialWrite};
use crate::device::library::UBA_DEVICES_TYPE;
use crate::error::CommandError;

pub const UBA_MONITOR_FAST: u16 = 0x18;
pub const UBA_PARAMETERS: u16 = 0x16;
pub const UBA_PARAMETER_WW: u16 = 0x33;
pub const UBA_SET_POINTS: u16 = 0x1A;
pub const UBA_TOTAL_UPTIME: u16 = 0x14;

const HEATING_TEMP: F = F::new("heatingtemp", "heating temperature", 1, K::U8)
    .uom(Uom::Degrees)
    .command("heatingtemp");
const BURN_MAX_POWER: F = F::new("burnmaxpower", "burner max power", 2, K::U8)
    .uom(Uom::Percent)
    .command("burnmaxpower");
const WW_ACTIVATED: F = F::new("wwactivated", "warm water activated", 1, K::Bool).command("wwactivated");
const WW_SEL_TEMP: F = F::new("wwseltemp", "warm water selected temperature", 2, K::U8)
    .uom(Uom::Degrees)
    .command("wwseltemp");

static MONITOR_FAST: [F; 11] = [
    F::new("selflowtemp", "selected flow temperature", 0, K::U8).uom(Uom::Degrees),
    F::new("curflowtemp", "current flow temperature", 1, K::U16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("selburnpow", "burner selected max power", 3, K::U8).uom(Uom::Percent),
    F::new("curburnpow", "burner current power", 4, K::U8).uom(Uom::Percent),
    F::new("burngas", "gas", 7, K::Bit(0)),
    F::new("fanwork", "fan", 7, K::Bit(2)),
    F::new("ignwork", "ignition", 7, K::Bit(3)),
    F::new("heatingpump", "heating pump", 7, K::Bit(5)),
    F::new("wwheat", "warm water heating", 7, K::Bit(6)),
    F::new("rettemp", "return temperature", 13, K::U16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("servicecode", "service code", 18, K::Text(2)),
];

static PARAMETERS: [F; 5] = [
    F::new("heatingactivated", "heating activated", 0, K::Bool),
    HEATING_TEMP,
    BURN_MAX_POWER,
    F::new("burnminpower", "burner min power", 3, K::U8).uom(Uom::Percent),
    F::new("boilhyston", "hysteresis on temperature", 4, K::I8).uom(Uom::Degrees),
];

static PARAMETER_WW: [F; 3] = [
    WW_ACTIVATED,
    WW_SEL_TEMP,
    F::new("wwdisinfectiontemp", "warm water disinfection temperature", 8, K::U8).uom(Uom::Degrees),
];

static SET_POINTS: [F; 2] = [
    F::new("setflowtemp", "set flow temperature", 0, K::U8).uom(Uom::Degrees),
    F::new("setburnpow", "burner set power", 1, K::U8).uom(Uom::Percent),
];

static TOTAL_UPTIME: [F; 1] = [F::new("uptime", "total uptime", 0, K::U24).uom(Uom::Minutes)];

pub fn init(device: &mut EmsDevice) {
    device.register_telegram_handler(UBA_MONITOR_FAST, "UBAMonitorFast", None, &MONITOR_FAST, true);
    device.register_telegram_handler(UBA_PARAMETERS, "UBAParameters", None, &PARAMETERS, true);
    device.register_telegram_handler(UBA_PARAMETER_WW, "UBAParameterWW", None, &PARAMETER_WW, true);
    device.register_telegram_handler(UBA_SET_POINTS, "UBASetPoints", None, &SET_POINTS, false);
    device.register_telegram_handler(UBA_TOTAL_UPTIME, "UBATotalUptime", None, &TOTAL_UPTIME, true);
    // Bitmap of present devices; consumed by discovery.
    device.register_telegram_handler(UBA_DEVICES_TYPE, "UBADevices", None, &[], false);

    device.register_command("heatingtemp", "set heating temperature", set_heating_temp);
    device.register_command("burnmaxpower", "set burner max power", set_burn_max_power);
    device.register_command("wwseltemp", "set warm water temperature", set_ww_sel_temp);
    device.register_command("wwactivated", "activate warm water", set_ww_activated);
}

fn set_heating_temp(_: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let v = parse_number(value)?;
    if !(20.0..=90.0).contains(&v) {
        return Err(CommandError::InvalidValue);
    }
    PartialWrite::number(UBA_PARAMETERS, &HEATING_TEMP, v)
}

fn set_burn_max_power(_: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let v = parse_number(value)?;
    if !(0.0..=100.0).contains(&v) {
        return Err(CommandError::InvalidValue);
    }
    PartialWrite::number(UBA_PARAMETERS, &BURN_MAX_POWER, v)
}

fn set_ww_sel_temp(_: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let v = parse_number(value)?;
    if !(30.0..=80.0).contains(&v) {
        return Err(CommandError::InvalidValue);
    }
    PartialWrite::number(UBA_PARAMETER_WW, &WW_SEL_TEMP, v)
}

fn set_ww_activated(_: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    PartialWrite::field(UBA_PARAMETER_WW, &WW_ACTIVATED, value)
}
