//! Gateway ("system") commands and the shared device-setter entry.
//!
//! These are the actions the outside world (web API, MQTT, console) can
//! trigger besides writing device values.  Each is a plain
//! [`CommandFn`](crate::command::CommandFn) over [`GatewayCore`].

use alloc::string::ToString;

use heapless::Vec;
use log::info;
use serde_json::{Value, json};

use crate::command::{CommandArgs, CommandFlags, CommandRegistry, Output};
use crate::device::DeviceType;
use crate::ems::telegram::MAX_TELEGRAM_LEN;
use crate::error::CommandError;

use super::service::GatewayCore;

pub fn register_system_commands(registry: &mut CommandRegistry<GatewayCore>) {
    let system = DeviceType::System;
    registry.add(system, "send", send, "send a raw telegram (hex, no checksum)", CommandFlags::ADMIN_ONLY);
    registry.add(system, "fetch", fetch, "refresh values from devices", CommandFlags::ADMIN_ONLY);
    registry.add(system, "scan", scan, "scan the bus for devices", CommandFlags::ADMIN_ONLY);
    registry.add(system, "publish", publish, "publish all values", CommandFlags::NONE);
    registry.add(system, "watch", watch, "trace bus telegrams", CommandFlags::NONE);
    registry.add(system, "info", info, "bus health", CommandFlags::NONE);
}

/// Handler behind every device setter in the registry.
pub(crate) fn device_command(
    core: &mut GatewayCore,
    args: &CommandArgs<'_>,
    _output: &mut Output,
) -> Result<(), CommandError> {
    core.write_device_value(args.device_type, args.name, args.value, args.id)
        .map(|_| ())
}

fn send(core: &mut GatewayCore, args: &CommandArgs<'_>, output: &mut Output) -> Result<(), CommandError> {
    let bytes = parse_hex(args.value)?;
    let id = core.send_raw(&bytes)?;
    output.insert("request".to_string(), json!(id));
    Ok(())
}

fn fetch(core: &mut GatewayCore, args: &CommandArgs<'_>, output: &mut Output) -> Result<(), CommandError> {
    let filter = device_filter(args.value)?;
    let queued = core.fetch_values(filter);
    output.insert("queued".to_string(), json!(queued));
    Ok(())
}

fn scan(core: &mut GatewayCore, _args: &CommandArgs<'_>, _output: &mut Output) -> Result<(), CommandError> {
    if core.scan_devices() {
        Ok(())
    } else {
        Err(CommandError::Failed)
    }
}

fn publish(core: &mut GatewayCore, args: &CommandArgs<'_>, _output: &mut Output) -> Result<(), CommandError> {
    let filter = device_filter(args.value)?;
    core.request_publish(filter);
    Ok(())
}

fn watch(core: &mut GatewayCore, args: &CommandArgs<'_>, output: &mut Output) -> Result<(), CommandError> {
    if !args.value.trim().is_empty() {
        if !core.watch_mut().apply(args.value) {
            return Err(CommandError::InvalidValue);
        }
        info!("Watch: {}", core.watch().mode().as_str());
    }
    let watch = core.watch();
    output.insert("watch".to_string(), json!(watch.mode().as_str()));
    if let Some(type_id) = watch.type_filter() {
        output.insert("filter".to_string(), json!(alloc::format!("0x{:02X}", type_id)));
    }
    Ok(())
}

fn info(core: &mut GatewayCore, _args: &CommandArgs<'_>, output: &mut Output) -> Result<(), CommandError> {
    match serde_json::to_value(core.health()) {
        Ok(Value::Object(report)) => {
            output.extend(report);
            Ok(())
        }
        _ => Err(CommandError::Failed),
    }
}

/// Empty or `all` selects every device type.
fn device_filter(value: &str) -> Result<Option<DeviceType>, CommandError> {
    let value = value.trim();
    if value.is_empty() || value.eq_ignore_ascii_case("all") {
        return Ok(None);
    }
    match DeviceType::from_name(value) {
        Some(DeviceType::System) | None => Err(CommandError::InvalidValue),
        Some(t) => Ok(Some(t)),
    }
}

/// `"0B 08 18 00 20"` or `"0b08180020"` to bytes.
fn parse_hex(value: &str) -> Result<Vec<u8, MAX_TELEGRAM_LEN>, CommandError> {
    let mut bytes = Vec::new();
    for token in value.split_whitespace() {
        let token = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if token.len() % 2 != 0 {
            return Err(CommandError::InvalidValue);
        }
        for i in (0..token.len()).step_by(2) {
            let pair = token.get(i..i + 2).ok_or(CommandError::InvalidValue)?;
            let byte = u8::from_str_radix(pair, 16).map_err(|_| CommandError::InvalidValue)?;
            bytes.push(byte).map_err(|_| CommandError::InvalidValue)?;
        }
    }
    if bytes.is_empty() {
        return Err(CommandError::InvalidValue);
    }
    Ok(bytes)
}
