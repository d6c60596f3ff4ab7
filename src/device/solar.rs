//! Solar module profile (SM10).

use super::fields::{FieldDescriptor as F, FieldKind as K, Scale, parse_number};
use super::values::{Circuit, Uom};
use super::{EmsDevice, PartialWrite};
use crate::error::CommandError;

pub const SM10_MONITOR: u16 = 0x97;
pub const SM10_CONFIG: u16 = 0x96;

const TANK_MAX_TEMP: F = F::new("tankmaxtemp", "maximum tank temperature", 5, K::U8)
    .uom(Uom::Degrees)
    .command("tankmaxtemp");

static MONITOR: [F; 4] = [
    F::new("collectortemp", "collector temperature", 2, K::I16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("solarpumpmodulation", "pump modulation", 4, K::U8).uom(Uom::Percent),
    F::new("tankbottomtemp", "tank bottom temperature", 5, K::I16)
        .scale(Scale::Div(10))
        .uom(Uom::Degrees),
    F::new("solarpump", "pump", 7, K::Bit(1)),
];

static CONFIG: [F; 1] = [TANK_MAX_TEMP];

pub fn init(device: &mut EmsDevice) {
    device.register_telegram_handler(SM10_MONITOR, "SM10Monitor", None, &MONITOR, true);
    device.register_telegram_handler(SM10_CONFIG, "SM10Config", None, &CONFIG, true);
    device.register_command("tankmaxtemp", "set maximum tank temperature", set_tank_max_temp);
}

fn set_tank_max_temp(_: &EmsDevice, value: &str, _: Option<Circuit>) -> Result<PartialWrite, CommandError> {
    let v = parse_number(value)?;
    if !(20.0..=95.0).contains(&v) {
        return Err(CommandError::InvalidValue);
    }
    PartialWrite::number(SM10_CONFIG, &TANK_MAX_TEMP, v)
}
