//! Command layer end to end: circuit prefixes, dialects, system commands
//! and the publish path.

use emsgate::app::service::GatewayService;
use emsgate::command::CommandRet;
use emsgate::config::GatewayConfig;
use emsgate::device::DeviceType;
use emsgate::ems::{Dialect, Telegram};
use serde_json::{Map, json};

use crate::mock_bus::{EventLog, MockLine, SimDevice, Topics, run_until_idle};

fn last_write(line: &MockLine) -> Telegram {
    line.sent
        .iter()
        .rev()
        .filter_map(|f| Telegram::parse(f).ok())
        .find(Telegram::is_write)
        .expect("a write went out")
}

#[test]
fn circuit_prefix_selects_thermostat_record() {
    let mut line = MockLine::new().with_device(0x10, SimDevice::new(86));
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    s.add_device(0x10, 86, "01.00");
    run_until_idle(&mut s, &mut line, &mut sink);

    let mut out = Map::new();
    let ret = s.write_value(DeviceType::Thermostat, "hc2/seltemp", "21", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Ok, "{:?}", out);
    let w = last_write(&line);
    assert_eq!((w.dest(), w.type_id(), w.offset(), w.payload()), (0x90, 0x47, 37, &[42u8][..]));

    let ret = s.write_value(DeviceType::Thermostat, "wwc1/seltemp", "21", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::InvalidValue);
}

#[test]
fn mixer_is_chosen_by_its_circuit() {
    let mut line = MockLine::new()
        .with_device(0x20, SimDevice::new(69))
        .with_device(0x21, SimDevice::new(69));
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    s.add_device(0x20, 69, "01.00");
    s.add_device(0x21, 69, "01.00");
    run_until_idle(&mut s, &mut line, &mut sink);

    let mut out = Map::new();
    let ret = s.write_value(DeviceType::Mixer, "hc2/flowsettemp", "40", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Ok, "{:?}", out);
    let w = last_write(&line);
    assert_eq!((w.dest_addr(), w.type_id(), w.offset(), w.payload()), (0x21, 0xAB, 0, &[40u8][..]));
    assert_eq!(line.devices[&0x21].records[&0xAB][0], 40);
}

#[test]
fn ems_plus_writes_use_extended_header() {
    let mut line = MockLine::new().with_device(0x10, SimDevice::new(158));
    let mut s = GatewayService::new(GatewayConfig {
        dialect: Dialect::EmsPlus,
        ..GatewayConfig::default()
    });
    let mut sink = EventLog::new();
    s.add_device(0x10, 158, "04.01");
    run_until_idle(&mut s, &mut line, &mut sink);

    let mut out = Map::new();
    let ret = s.write_value(DeviceType::Thermostat, "seltemp", "20.5", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Ok, "{:?}", out);

    // the write, not the read-back that follows it
    let frame = line.sent.iter().find(|f| f[1] & 0x80 != 0).unwrap();
    assert_eq!(&frame[..7], &[0x0B, 0x90, 0xFF, 10, 0x02, 0xB9, 41]);
    assert_eq!(s.health().bus_protocol, "EMS+");
}

#[test]
fn classic_dialect_refuses_extended_writes() {
    let mut line = MockLine::new().with_device(0x10, SimDevice::new(158));
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    s.add_device(0x10, 158, "04.01");
    assert_eq!(s.core().tx().queue_len(), 0, "extended fetches are refused too");

    let mut out = Map::new();
    let ret = s.write_value(DeviceType::Thermostat, "seltemp", "20", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Error);
    assert!(line.sent.is_empty());
}

#[test]
fn command_listing_per_device_type() {
    let mut s = GatewayService::new(GatewayConfig::default());
    s.add_device(0x08, 123, "01.02");

    let mut out = Map::new();
    assert_eq!(s.call(DeviceType::Boiler, "commands", "", false, -1, &mut out), CommandRet::Ok);
    let names: Vec<_> = out.keys().map(String::as_str).collect();
    for name in ["heatingtemp", "burnmaxpower", "wwseltemp", "wwactivated"] {
        assert!(names.contains(&name), "{} missing from {:?}", name, names);
    }
    assert_eq!(out["wwseltemp"]["admin"], json!(true));

    let mut out = Map::new();
    assert_eq!(
        s.call(DeviceType::Boiler, "wwseltemp", "50", false, -1, &mut out),
        CommandRet::NotAllowed
    );
}

#[test]
fn raw_send_goes_out_with_checksum() {
    let mut line = MockLine::new().with_device(0x08, SimDevice::new(123).with_record(0x18, &[33]));
    let mut s = GatewayService::new(GatewayConfig {
        auto_discover: false,
        ..GatewayConfig::default()
    });
    let mut sink = EventLog::new();

    let mut out = Map::new();
    assert_eq!(
        s.call(DeviceType::System, "send", "0B 08 18 00 01", true, -1, &mut out),
        CommandRet::Ok
    );
    run_until_idle(&mut s, &mut line, &mut sink);

    let frame = &line.sent[0];
    assert_eq!(&frame[..5], &[0x0B, 0x08, 0x18, 0x00, 0x01]);
    assert_eq!(frame[5], emsgate::ems::crc::checksum(&frame[..5]));
    assert_eq!(s.health().tx_reads, 1);
}

#[test]
fn fetch_and_publish_round() {
    let mut line = MockLine::new().with_device(
        0x30,
        SimDevice::new(73).with_record(0x97, &[0, 0, 0x02, 0x9E, 80, 0x01, 0x90, 0b10]),
    );
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    s.add_device(0x30, 73, "01.00");
    run_until_idle(&mut s, &mut line, &mut sink);

    let mut topics = Topics::default();
    assert_eq!(s.publish_values(&mut topics, false), 1);
    let (topic, payload) = &topics.published[0];
    assert_eq!(topic, "solar_data");
    assert_eq!(payload["collectortemp"], json!(67.0));
    assert_eq!(payload["solarpump"], json!(true));

    // nothing changed since
    assert_eq!(s.publish_values(&mut topics, false), 0);

    let mut out = Map::new();
    assert_eq!(s.call(DeviceType::System, "fetch", "solar", true, -1, &mut out), CommandRet::Ok);
    assert_eq!(out["queued"], json!(2));
    run_until_idle(&mut s, &mut line, &mut sink);

    assert_eq!(s.call(DeviceType::System, "publish", "", false, -1, &mut out), CommandRet::Ok);
    assert_eq!(s.publish_pending(&mut topics), 1);
    assert_eq!(topics.published.len(), 2);
}

#[test]
fn web_dump_lists_writable_values() {
    let mut line = MockLine::new().with_device(
        0x08,
        SimDevice::new(123).with_record(0x33, &[0x00, 0xFF, 60, 0, 0, 0, 0, 0, 70]),
    );
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    let id = s.add_device(0x08, 123, "01.02").unwrap();
    run_until_idle(&mut s, &mut line, &mut sink);

    let mut out = Map::new();
    assert!(s.generate_values_web(id, &mut out));
    assert_eq!(out["type"], json!("boiler"));
    let data = out["data"].as_array().unwrap();
    let ww = data.iter().find(|e| e["c"] == json!("wwseltemp")).unwrap();
    assert_eq!(ww["v"], json!(60));
    assert_eq!(ww["u"], json!("°C"));

    let mut text = String::new();
    s.show_telegram_handlers(DeviceType::Boiler, &mut text).unwrap();
    assert!(text.contains("0x33 (UBAParameterWW),"), "{}", text);
    // never fetched, never seen
    assert!(text.contains("0x1A (UBASetPoints)*"), "{}", text);
}
