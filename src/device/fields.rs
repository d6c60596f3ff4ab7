//! Field descriptors: where a value lives in a telegram and how to scale it.
//!
//! A descriptor names one value of a record (`offset` is the absolute
//! position inside the record, not inside a single telegram).  Devices
//! list their fields in static tables; [`decode`] pulls a value out of
//! any telegram that carries the field's bytes and [`encode`] turns a
//! caller's string into the bytes to write.

use alloc::string::String;

use heapless::Vec;

use super::values::{Uom, Value};
use crate::ems::Telegram;
use crate::error::CommandError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    U8,
    I8,
    U16,
    I16,
    U24,
    /// Single bit `n` of one byte.
    Bit(u8),
    /// Whole byte, zero = false.
    Bool,
    /// Byte indexing into the option labels.
    Enum(&'static [&'static str]),
    /// ASCII characters.
    Text(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    Unit,
    /// Raw value divided by n (tenths of a degree = `Div(10)`).
    Div(u16),
    /// Raw value multiplied by n.
    Mul(u16),
}

impl Scale {
    /// Decimal places worth showing.
    pub fn precision(self) -> u8 {
        match self {
            Self::Div(d) if d > 10 => 2,
            Self::Div(d) if d > 1 => 1,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    /// Short id used in JSON and command paths.
    pub name: &'static str,
    /// Human readable name.
    pub label: &'static str,
    pub offset: u8,
    pub kind: FieldKind,
    pub scale: Scale,
    pub uom: Uom,
    /// Command that writes this value, if any.
    pub command: Option<&'static str>,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, label: &'static str, offset: u8, kind: FieldKind) -> Self {
        Self {
            name,
            label,
            offset,
            kind,
            scale: Scale::Unit,
            uom: Uom::None,
            command: None,
        }
    }

    pub const fn scale(self, scale: Scale) -> Self {
        Self { scale, ..self }
    }

    pub const fn uom(self, uom: Uom) -> Self {
        Self { uom, ..self }
    }

    pub const fn command(self, command: &'static str) -> Self {
        Self {
            command: Some(command),
            ..self
        }
    }

    /// Bytes the field occupies.
    pub fn width(&self) -> u8 {
        match self.kind {
            FieldKind::U16 | FieldKind::I16 => 2,
            FieldKind::U24 => 3,
            FieldKind::Text(n) => n,
            _ => 1,
        }
    }

    pub fn options(&self) -> &'static [&'static str] {
        match self.kind {
            FieldKind::Enum(options) => options,
            _ => &[],
        }
    }

    pub fn is_writable(&self) -> bool {
        self.command.is_some()
    }
}

const U8_NOT_SET: u8 = 0xFF;
const I8_NOT_SET: u8 = 0x80;
const U16_NOT_SET: [u16; 3] = [0x8000, 0xFFFF, 0x7D00];
const U24_NOT_SET: u32 = 0x00FF_FFFF;

/// Decode `desc` from `telegram`.
///
/// `None` when the telegram does not carry every byte of the field, or
/// the bytes hold the bus "not set" sentinel.
pub fn decode(telegram: &Telegram, desc: &FieldDescriptor) -> Option<Value> {
    let mut raw: u32 = 0;
    for i in 0..desc.width() {
        let pos = desc.offset.checked_add(i)?;
        raw = (raw << 8) | u32::from(telegram.record_byte(pos)?);
    }

    let number = match desc.kind {
        FieldKind::Bool => return Some(Value::Bool(raw != 0)),
        FieldKind::Bit(n) => return Some(Value::Bool(raw & (1 << n) != 0)),
        FieldKind::Enum(options) => {
            let index = raw as u8;
            return ((index as usize) < options.len()).then_some(Value::Enum(index));
        }
        FieldKind::Text(n) => {
            let start = usize::from(desc.offset - telegram.offset());
            let text: String = telegram.payload()[start..start + usize::from(n)]
                .iter()
                .take_while(|&&b| b != 0)
                .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '?' })
                .collect();
            return Some(Value::Text(text));
        }
        FieldKind::U8 if raw as u8 == U8_NOT_SET => return None,
        FieldKind::U8 => i64::from(raw),
        FieldKind::I8 if raw as u8 == I8_NOT_SET => return None,
        FieldKind::I8 => i64::from(raw as u8 as i8),
        FieldKind::U16 | FieldKind::I16 if U16_NOT_SET.contains(&(raw as u16)) => return None,
        FieldKind::U16 => i64::from(raw),
        FieldKind::I16 => i64::from(raw as u16 as i16),
        FieldKind::U24 if raw == U24_NOT_SET => return None,
        FieldKind::U24 => i64::from(raw),
    };

    Some(match desc.scale {
        Scale::Unit => Value::Int(number as i32),
        Scale::Mul(m) => Value::Int((number * i64::from(m)) as i32),
        Scale::Div(d) => Value::Float(number as f32 / f32::from(d)),
    })
}

/// Bytes of one encoded field value.
pub type FieldBytes = Vec<u8, 4>;

/// Parse a boolean the way every frontend spells it.
pub fn parse_bool(value: &str) -> Option<bool> {
    let v = value.trim();
    ["on", "1", "true", "yes"]
        .iter()
        .any(|t| v.eq_ignore_ascii_case(t))
        .then_some(true)
        .or_else(|| {
            ["off", "0", "false", "no"]
                .iter()
                .any(|f| v.eq_ignore_ascii_case(f))
                .then_some(false)
        })
}

pub fn parse_number(value: &str) -> Result<f32, CommandError> {
    let v: f32 = value.trim().parse().map_err(|_| CommandError::InvalidValue)?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(CommandError::InvalidValue)
    }
}

/// Encode a caller-supplied string for `desc`.
///
/// Booleans are written as `0xFF`/`0x00`; enums accept the option label
/// or its index; numbers are scaled back to the raw representation and
/// must fit the field without hitting a "not set" sentinel.
pub fn encode(desc: &FieldDescriptor, value: &str) -> Result<FieldBytes, CommandError> {
    match desc.kind {
        FieldKind::Bool | FieldKind::Bit(_) => {
            let b = parse_bool(value).ok_or(CommandError::InvalidValue)?;
            bytes(&[if b { 0xFF } else { 0x00 }])
        }
        FieldKind::Enum(options) => {
            let v = value.trim();
            let index = options
                .iter()
                .position(|o| o.eq_ignore_ascii_case(v))
                .or_else(|| v.parse::<usize>().ok().filter(|&i| i < options.len()))
                .ok_or(CommandError::InvalidValue)?;
            bytes(&[index as u8])
        }
        FieldKind::Text(_) => Err(CommandError::NotAllowed),
        _ => encode_number(desc, parse_number(value)?),
    }
}

/// Encode an already validated number for `desc`.
pub fn encode_number(desc: &FieldDescriptor, value: f32) -> Result<FieldBytes, CommandError> {
    let raw = match desc.scale {
        Scale::Unit => value.round(),
        Scale::Div(d) => (value * f32::from(d)).round(),
        Scale::Mul(m) => (value / f32::from(m)).round(),
    };
    let raw = raw as i64;
    let (min, max): (i64, i64) = match desc.kind {
        FieldKind::U8 => (0, 0xFE),
        FieldKind::I8 => (-127, 127),
        FieldKind::U16 => (0, 0x7CFF),
        FieldKind::I16 => (-0x7CFF, 0x7CFF),
        FieldKind::U24 => (0, 0x00FF_FFFE),
        _ => return Err(CommandError::InvalidValue),
    };
    if raw < min || raw > max {
        return Err(CommandError::InvalidValue);
    }
    let be = (raw as u32).to_be_bytes();
    bytes(&be[4 - desc.width() as usize..])
}

fn bytes(b: &[u8]) -> Result<FieldBytes, CommandError> {
    FieldBytes::from_slice(b).map_err(|()| CommandError::Failed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn telegram(offset: u8, data: &[u8]) -> Telegram {
        Telegram::new(0x08, 0x0B, 0x18, offset, data).unwrap()
    }

    const FLOW: FieldDescriptor =
        FieldDescriptor::new("curflowtemp", "current flow temperature", 1, FieldKind::U16)
            .scale(Scale::Div(10))
            .uom(Uom::Degrees);
    const OUTSIDE: FieldDescriptor =
        FieldDescriptor::new("outdoortemp", "outside temperature", 0, FieldKind::I16).scale(Scale::Div(10));
    const SEL: FieldDescriptor = FieldDescriptor::new("seltemp", "selected temperature", 2, FieldKind::U8)
        .scale(Scale::Div(2))
        .command("seltemp");
    const OFFSET: FieldDescriptor = FieldDescriptor::new("tempoffset", "offset", 0, FieldKind::I8);
    const VALVE: FieldDescriptor =
        FieldDescriptor::new("valvetime", "valve time", 0, FieldKind::U8).scale(Scale::Mul(10));
    const GAS: FieldDescriptor = FieldDescriptor::new("burngas", "gas", 0, FieldKind::Bit(5));
    const MODE: FieldDescriptor = FieldDescriptor::new("mode", "mode", 0, FieldKind::Enum(&["night", "day", "auto"]));
    const UPTIME: FieldDescriptor = FieldDescriptor::new("uptime", "uptime", 0, FieldKind::U24).uom(Uom::Minutes);
    const CODE: FieldDescriptor = FieldDescriptor::new("servicecode", "service code", 0, FieldKind::Text(2));

    #[test]
    fn tenths_become_float() {
        let t = telegram(0, &[0x00, 0x01, 0x2C]);
        assert_eq!(decode(&t, &FLOW), Some(Value::Float(30.0)));
    }

    #[test]
    fn signed_sixteen_bit() {
        let t = telegram(0, &[0xFF, 0x9C]);
        assert_eq!(decode(&t, &OUTSIDE), Some(Value::Float(-10.0)));
    }

    #[test]
    fn partial_telegram_only_decodes_present_fields() {
        // offset 2, single byte: seltemp present, curflowtemp (1..=2) not
        let t = telegram(2, &[0x2B]);
        assert_eq!(decode(&t, &SEL), Some(Value::Float(21.5)));
        assert_eq!(decode(&t, &FLOW), None);
    }

    #[test]
    fn sentinels_are_skipped() {
        assert_eq!(decode(&telegram(0, &[0x00, 0x80, 0x00]), &FLOW), None);
        assert_eq!(decode(&telegram(0, &[0x00, 0x7D, 0x00]), &FLOW), None);
        assert_eq!(decode(&telegram(2, &[0xFF]), &SEL), None);
        assert_eq!(decode(&telegram(0, &[0x80]), &OFFSET), None);
        assert_eq!(decode(&telegram(0, &[0xFF, 0xFF, 0xFF]), &UPTIME), None);
    }

    #[test]
    fn small_kinds() {
        assert_eq!(decode(&telegram(0, &[0xFE]), &OFFSET), Some(Value::Int(-2)));
        assert_eq!(decode(&telegram(0, &[0x06]), &VALVE), Some(Value::Int(60)));
        assert_eq!(decode(&telegram(0, &[0x20]), &GAS), Some(Value::Bool(true)));
        assert_eq!(decode(&telegram(0, &[0xDF]), &GAS), Some(Value::Bool(false)));
        assert_eq!(decode(&telegram(0, &[0x02]), &MODE), Some(Value::Enum(2)));
        assert_eq!(decode(&telegram(0, &[0x07]), &MODE), None);
        assert_eq!(decode(&telegram(0, &[0x00, 0x01, 0x00]), &UPTIME), Some(Value::Int(256)));
        assert_eq!(
            decode(&telegram(0, b"0Y"), &CODE),
            Some(Value::Text(String::from("0Y")))
        );
    }

    #[test]
    fn encode_scaled_numbers() {
        assert_eq!(encode(&SEL, "21.5").unwrap().as_slice(), &[43]);
        assert_eq!(encode(&FLOW, "30").unwrap().as_slice(), &[0x01, 0x2C]);
        assert_eq!(encode(&VALVE, "120").unwrap().as_slice(), &[12]);
        assert_eq!(encode(&OFFSET, "-3").unwrap().as_slice(), &[0xFD]);
        assert_eq!(encode(&UPTIME, "1").unwrap().as_slice(), &[0, 0, 1]);
    }

    #[test]
    fn encode_rejects_bad_input() {
        assert_eq!(encode(&SEL, "warm"), Err(CommandError::InvalidValue));
        assert_eq!(encode(&SEL, "200"), Err(CommandError::InvalidValue));
        assert_eq!(encode(&SEL, "NaN"), Err(CommandError::InvalidValue));
        assert_eq!(encode(&MODE, "party"), Err(CommandError::InvalidValue));
        assert_eq!(encode(&MODE, "3"), Err(CommandError::InvalidValue));
        assert_eq!(encode(&CODE, "AB"), Err(CommandError::NotAllowed));
    }

    #[test]
    fn encode_bools_and_enums() {
        assert_eq!(encode(&GAS, "on").unwrap().as_slice(), &[0xFF]);
        assert_eq!(encode(&GAS, "FALSE").unwrap().as_slice(), &[0x00]);
        assert_eq!(encode(&MODE, "Day").unwrap().as_slice(), &[1]);
        assert_eq!(encode(&MODE, "2").unwrap().as_slice(), &[2]);
    }

    #[test]
    fn precision_follows_divisor() {
        assert_eq!(Scale::Unit.precision(), 0);
        assert_eq!(Scale::Div(2).precision(), 1);
        assert_eq!(Scale::Div(10).precision(), 1);
        assert_eq!(Scale::Div(100).precision(), 2);
        assert_eq!(Scale::Mul(10).precision(), 0);
    }
}
