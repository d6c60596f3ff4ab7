//! Known products and discovery helpers.
//!
//! Devices announce themselves through the version telegram (type
//! `0x02`): product id at record offset 0, firmware major/minor at 1/2.
//! The boiler's UBADevices telegram (type `0x07`) is a bitmap of every
//! address present on the bus.

use core::fmt::Write as _;

use heapless::{String, Vec};

use super::DeviceType;
use super::values::Circuit;
use crate::ems::Telegram;

pub const VERSION_TYPE: u16 = 0x02;
pub const UBA_DEVICES_TYPE: u16 = 0x07;
pub const BOILER_ADDRESS: u8 = 0x08;

/// Bytes requested when asking a device for its version.
pub const VERSION_LENGTH: u8 = 3;

/// Flavour flags, interpreted per device type.
pub mod flags {
    pub const NONE: u8 = 0;
    pub const RC35: u8 = 1;
    pub const RC300: u8 = 2;
    pub const MM10: u8 = 1;
    pub const MM100: u8 = 2;
    /// Heatronic pump module serving one heating circuit.
    pub const IPM: u8 = 4;
    /// Pool module.
    pub const MP: u8 = 8;
    pub const SM10: u8 = 1;
    /// Device speaks EMS+ extended types.
    pub const EMS_PLUS: u8 = 0x80;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Product {
    pub product_id: u8,
    pub device_type: DeviceType,
    pub name: &'static str,
    pub flags: u8,
}

const fn product(product_id: u8, device_type: DeviceType, name: &'static str, flags: u8) -> Product {
    Product {
        product_id,
        device_type,
        name,
        flags,
    }
}

pub static PRODUCTS: &[Product] = &[
    // Boilers
    product(64, DeviceType::Boiler, "BK13/BK15/Smartline/GB1x2", flags::NONE),
    product(115, DeviceType::Boiler, "Topline/GB162", flags::NONE),
    product(123, DeviceType::Boiler, "GBx72/Trendline/Cerapur/Greenstar Si/27i", flags::NONE),
    // Thermostats
    product(86, DeviceType::Thermostat, "RC35", flags::RC35),
    product(158, DeviceType::Thermostat, "RC300/RC310/Moduline 3000/CW400/Sense II", flags::RC300 | flags::EMS_PLUS),
    // Mixer modules
    product(69, DeviceType::Mixer, "MM10", flags::MM10),
    product(160, DeviceType::Mixer, "MM100", flags::MM100 | flags::EMS_PLUS),
    product(102, DeviceType::Mixer, "IPM", flags::IPM),
    product(204, DeviceType::Mixer, "MP100", flags::MP | flags::EMS_PLUS),
    // Solar modules
    product(73, DeviceType::Solar, "SM10", flags::SM10),
];

pub fn lookup(product_id: u8) -> Option<&'static Product> {
    PRODUCTS.iter().find(|p| p.product_id == product_id)
}

/// Address of the pool module.
pub const POOL_ADDRESS: u8 = 0x40;

/// Whether `address` can belong to a device we could discover.
pub fn is_device_address(address: u8) -> bool {
    (0x08..=POOL_ADDRESS).contains(&address)
}

/// Circuit a mixer module serves, derived from its bus address.
pub fn mixer_circuit(address: u8) -> Option<Circuit> {
    match address {
        0x20..=0x27 => Some(Circuit::hc(address - 0x20)),
        0x28..=0x2F => Some(Circuit::wwc(address - 0x28)),
        _ => None,
    }
}

/// Version reply contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub product_id: u8,
    pub version: String<8>,
}

/// Decode a version telegram (`None` if it is not a complete one).
pub fn parse_version(telegram: &Telegram) -> Option<VersionInfo> {
    if telegram.type_id() != VERSION_TYPE {
        return None;
    }
    let product_id = telegram.record_byte(0)?;
    let major = telegram.record_byte(1)?;
    let minor = telegram.record_byte(2)?;
    let mut version = String::new();
    write!(version, "{:02}.{:02}", major, minor).ok()?;
    Some(VersionInfo {
        product_id,
        version,
    })
}

/// Addresses flagged present in a UBADevices bitmap.
///
/// Byte `n`, bit `b` stands for address `(n + 1) * 8 + b`.
pub fn present_addresses(telegram: &Telegram) -> Vec<u8, 64> {
    let mut out = Vec::new();
    if telegram.type_id() != UBA_DEVICES_TYPE {
        return out;
    }
    for (n, &byte) in telegram.payload().iter().enumerate() {
        let record = usize::from(telegram.offset()) + n;
        for bit in 0..8 {
            if byte & (1 << bit) == 0 {
                continue;
            }
            let address = (record + 1) * 8 + bit;
            if let Ok(address) = u8::try_from(address) {
                if is_device_address(address) {
                    let _ = out.push(address);
                }
            }
        }
    }
    out
}
