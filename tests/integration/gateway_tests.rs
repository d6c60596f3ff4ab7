//! Gateway against the simulated bus: discovery, health, writes, tracing.

use emsgate::app::events::GatewayEvent;
use emsgate::app::service::GatewayService;
use emsgate::command::CommandRet;
use emsgate::config::GatewayConfig;
use emsgate::device::DeviceType;
use emsgate::device::values::Value;
use emsgate::ems::BusStatus;
use emsgate::error::{CommandError, Error, TxFailure};
use serde_json::Map;

use crate::mock_bus::{EventLog, MockLine, SimDevice, Topics, encode, run_for, run_until_idle};

fn monitor_fast() -> Vec<u8> {
    let mut fast = vec![0u8; 20];
    fast[0] = 50; // selflowtemp
    fast[1] = 0x01; // curflowtemp 45.5
    fast[2] = 0xC7;
    fast[7] = 0b0010_0001; // gas + heating pump
    fast
}

fn boiler() -> SimDevice {
    SimDevice::new(123)
        .with_record(0x18, &monitor_fast())
        .with_record(0x33, &[0x00, 0xFF, 60, 0, 0, 0, 0, 0, 70])
}

fn quiet_config() -> GatewayConfig {
    GatewayConfig {
        auto_discover: false,
        ..GatewayConfig::default()
    }
}

/// Gateway that already discovered the boiler and drained its fetches.
fn with_boiler() -> (GatewayService, MockLine, EventLog) {
    let mut line = MockLine::new().with_device(0x08, boiler());
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    line.inject_telegram(0x08, 0x00, 0x18, 0, &monitor_fast());
    run_until_idle(&mut s, &mut line, &mut sink);
    (s, line, sink)
}

// ── Discovery ─────────────────────────────────────────────────

#[test]
fn broadcast_from_unknown_address_triggers_discovery() {
    let (s, line, sink) = with_boiler();

    assert_eq!(s.core().devices().len(), 1);
    assert_eq!(line.sent_of_type(0x02).len(), 1, "version asked exactly once");
    assert!(sink.events.iter().any(|e| matches!(
        e,
        GatewayEvent::DeviceDiscovered { address: 0x08, product_id: 123, device_type: DeviceType::Boiler, .. }
    )));

    let boiler = s.core().devices().get(0x08).unwrap();
    assert_eq!(boiler.info().version.as_str(), "01.02");
    assert_eq!(boiler.values().get(None, "curflowtemp").unwrap().value, Value::Float(45.5));
    assert_eq!(boiler.values().get(None, "burngas").unwrap().value, Value::Bool(true));
    assert_eq!(boiler.values().get(None, "wwseltemp").unwrap().value, Value::Int(60));

    let health = s.health();
    assert_eq!(health.bus_status, BusStatus::Connected);
    assert_eq!(health.tx_fails, 0);
    assert!(health.tx_reads >= 5);
    assert!(s.commands().find(DeviceType::Boiler, "wwseltemp").is_some());
}

#[test]
fn version_request_between_devices_still_discovers_sender() {
    let mut line = MockLine::new().with_device(0x10, SimDevice::new(86));
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();

    // the thermostat asks the boiler for its version
    line.inject_telegram(0x10, 0x08, 0x02, 0, &[3]);
    run_until_idle(&mut s, &mut line, &mut sink);

    assert_eq!(line.sent_of_type(0x02).iter().filter(|t| t.dest() == 0x10).count(), 1);
    let thermostat = s.core().devices().get(0x10).unwrap();
    assert_eq!(thermostat.device_type(), DeviceType::Thermostat);
}

#[test]
fn scan_queries_every_address_in_the_bitmap() {
    let mut line = MockLine::new()
        .with_device(0x08, boiler().with_record(0x07, &[0x01, 0x01, 0x00, 0x00, 0x00, 0x01]))
        .with_device(0x10, SimDevice::new(86))
        .with_device(0x30, SimDevice::new(73));
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();

    let mut out = Map::new();
    assert_eq!(s.call(DeviceType::System, "scan", "", true, -1, &mut out), CommandRet::Ok);
    run_until_idle(&mut s, &mut line, &mut sink);

    let devices = s.core().devices();
    assert_eq!(devices.len(), 3);
    assert_eq!(devices.get(0x10).unwrap().device_type(), DeviceType::Thermostat);
    assert_eq!(devices.get(0x30).unwrap().device_type(), DeviceType::Solar);
    assert_eq!(line.sent_of_type(0x02).len(), 3);
}

#[test]
fn unknown_product_is_reported_not_added() {
    let mut line = MockLine::new().with_device(0x09, SimDevice::new(250));
    let mut s = GatewayService::new(GatewayConfig::default());
    let mut sink = EventLog::new();
    line.inject_telegram(0x09, 0x00, 0x18, 0, &[1, 2, 3]);
    run_until_idle(&mut s, &mut line, &mut sink);

    assert!(s.core().devices().is_empty());
    assert!(sink.events.iter().any(|e| matches!(
        e,
        GatewayEvent::UnknownDevice { address: 0x09, product_id: 250 }
    )));
}

// ── Writes ────────────────────────────────────────────────────

#[test]
fn write_value_waits_for_read_back() {
    let (mut s, mut line, mut sink) = with_boiler();
    let mut out = Map::new();

    let ret = s.write_value(DeviceType::Boiler, "wwseltemp", "55", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Ok, "{:?}", out);

    let write = line.sent_of_type(0x33).into_iter().find(|t| t.is_write()).unwrap();
    assert_eq!((write.dest(), write.offset(), write.payload()), (0x88, 2, &[55u8][..]));
    assert_eq!(line.devices[&0x08].records[&0x33][2], 55);

    let boiler = s.core().devices().get(0x08).unwrap();
    assert_eq!(boiler.values().get(None, "wwseltemp").unwrap().value, Value::Int(55));
    assert_eq!(s.health().tx_writes, 1);
    assert!(sink.events.iter().any(|e| matches!(e, GatewayEvent::RequestValidated { type_id: 0x33, .. })));
}

#[test]
fn write_to_silent_device_fails_after_retries() {
    let (mut s, mut line, mut sink) = with_boiler();
    line.silent = true;
    let mut out = Map::new();

    let ret = s.write_value(DeviceType::Boiler, "heatingtemp", "70", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Error);
    assert!(out["message"].as_str().unwrap().contains("heatingtemp"));

    run_for(&mut s, &mut line, &mut sink, 2_000);
    assert!(sink.events.iter().any(|e| matches!(
        e,
        GatewayEvent::RequestFailed { type_id: 0x16, reason: TxFailure::ValidationTimeout, .. }
    )));
    assert_eq!(line.sent_of_type(0x16).iter().filter(|t| t.is_write()).count(), 3);

    let health = s.health();
    assert_eq!(health.tx_fails, 3);
    assert_eq!(health.bus_status, BusStatus::TxErrors);
}

#[test]
fn set_value_returns_typed_errors() {
    let (mut s, mut line, mut sink) = with_boiler();
    let mut out = Map::new();

    assert_eq!(s.set_value(DeviceType::Boiler, "wwseltemp", "58", &mut line, &mut sink, &mut out), Ok(()));
    assert_eq!(
        s.set_value(DeviceType::Boiler, "wwseltemp", "95", &mut line, &mut sink, &mut out),
        Err(Error::Command(CommandError::InvalidValue))
    );
    line.silent = true;
    assert_eq!(
        s.set_value(DeviceType::Boiler, "wwseltemp", "50", &mut line, &mut sink, &mut out),
        Err(Error::Tx(TxFailure::ValidationTimeout))
    );
}

#[test]
fn collisions_back_off_and_retry() {
    let (mut s, mut line, mut sink) = with_boiler();
    line.collisions = 2;
    let mut out = Map::new();

    let ret = s.write_value(DeviceType::Boiler, "wwactivated", "off", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::Ok);
    let health = s.health();
    assert_eq!(health.tx_collisions, 2);
    assert_eq!(health.tx_fails, 0);
    assert_eq!(line.devices[&0x08].records[&0x33][1], 0x00);
}

#[test]
fn bad_value_never_reaches_the_bus() {
    let (mut s, mut line, mut sink) = with_boiler();
    let before = line.sent.len();
    let mut out = Map::new();
    let ret = s.write_value(DeviceType::Boiler, "wwseltemp", "95", &mut line, &mut sink, &mut out);
    assert_eq!(ret, CommandRet::InvalidValue);
    run_for(&mut s, &mut line, &mut sink, 50);
    assert_eq!(line.sent.len(), before);
}

// ── Health ────────────────────────────────────────────────────

#[test]
fn poor_rx_quality_marks_bus_offline() {
    let mut line = MockLine::new();
    let mut s = GatewayService::new(quiet_config());
    let mut sink = EventLog::new();

    line.inject_telegram(0x08, 0x00, 0x18, 0, &[40]);
    run_for(&mut s, &mut line, &mut sink, 20);
    assert_eq!(s.health().bus_status, BusStatus::Connected);

    for _ in 0..12 {
        let mut frame = crate::mock_bus::encode(0x08, 0x00, 0x18, 0, &[40]);
        *frame.last_mut().unwrap() ^= 0x55;
        line.inject(&frame);
    }
    run_for(&mut s, &mut line, &mut sink, 200);

    let health = s.health();
    assert_eq!(health.rx_fails, 12);
    assert_eq!(health.rx_received, 1);
    assert_eq!(health.bus_status, BusStatus::Offline);
}

#[test]
fn corrupted_record_leaves_values_alone() {
    let (mut s, mut line, mut sink) = with_boiler();
    let mut topics = Topics::default();
    assert_eq!(s.publish_values(&mut topics, false), 1);
    let fails = s.health().rx_fails;

    let mut other = monitor_fast();
    other[0] = 75;
    other[7] = 0;
    let mut frame = encode(0x08, 0x00, 0x18, 0, &other);
    *frame.last_mut().unwrap() ^= 0x55;
    line.inject(&frame);
    run_for(&mut s, &mut line, &mut sink, 50);

    assert_eq!(s.health().rx_fails, fails + 1);
    let boiler = s.core().devices().get(0x08).unwrap();
    assert_eq!(boiler.values().get(None, "selflowtemp").unwrap().value, Value::Int(50));
    assert_eq!(boiler.values().get(None, "burngas").unwrap().value, Value::Bool(true));
    assert_eq!(s.publish_values(&mut topics, false), 0);
    assert_eq!(topics.published.len(), 1);
}

#[test]
fn framing_line_delivers_back_to_back_telegrams() {
    let mut line = MockLine::new();
    line.framed = true;
    let mut s = GatewayService::new(GatewayConfig {
        tx_enabled: false,
        ..quiet_config()
    });
    let mut sink = EventLog::new();
    s.add_device(0x08, 123, "01.02");

    line.inject_telegram(0x08, 0x00, 0x18, 0, &[40]);
    line.inject(&[0x01]);
    line.inject_telegram(0x08, 0x00, 0x18, 0, &[41]);
    s.tick(&mut line, &mut sink);

    let health = s.health();
    assert_eq!(health.rx_received, 2);
    assert_eq!(health.rx_fails, 0);
    let boiler = s.core().devices().get(0x08).unwrap();
    assert_eq!(boiler.values().get(None, "selflowtemp").unwrap().value, Value::Int(41));
}

#[test]
fn silence_times_the_bus_out() {
    let mut line = MockLine::new();
    let mut s = GatewayService::new(quiet_config());
    let mut sink = EventLog::new();

    line.inject_telegram(0x08, 0x00, 0x18, 0, &[40]);
    run_for(&mut s, &mut line, &mut sink, 20);
    assert!(s.core().bus().is_connected());

    run_for(&mut s, &mut line, &mut sink, 31_000);
    assert!(!s.core().bus().is_connected());

    let changes: Vec<_> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            GatewayEvent::BusStatusChanged { from, to } => Some((*from, *to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        changes,
        [
            (BusStatus::Offline, BusStatus::Connected),
            (BusStatus::Connected, BusStatus::Offline)
        ]
    );
}

#[test]
fn listen_only_gateway_still_decodes() {
    let mut line = MockLine::new().with_device(0x08, boiler());
    let mut s = GatewayService::new(GatewayConfig {
        tx_enabled: false,
        ..GatewayConfig::default()
    });
    let mut sink = EventLog::new();
    s.add_device(0x08, 123, "01.02");

    line.inject_telegram(0x08, 0x00, 0x18, 0, &monitor_fast());
    run_for(&mut s, &mut line, &mut sink, 50);

    assert!(line.sent.is_empty());
    let boiler = s.core().devices().get(0x08).unwrap();
    assert_eq!(boiler.values().get(None, "selflowtemp").unwrap().value, Value::Int(50));
}

// ── Watch ─────────────────────────────────────────────────────

#[test]
fn watch_traces_telegrams_and_raw_frames() {
    let mut line = MockLine::new();
    let mut s = GatewayService::new(quiet_config());
    let mut sink = EventLog::new();

    line.inject_telegram(0x08, 0x00, 0x18, 0, &[40]);
    run_for(&mut s, &mut line, &mut sink, 20);
    assert!(sink.watch_lines().is_empty());

    let mut out = Map::new();
    assert_eq!(s.call(DeviceType::System, "watch", "on", false, -1, &mut out), CommandRet::Ok);
    line.inject_telegram(0x08, 0x00, 0x18, 0, &[40]);
    run_for(&mut s, &mut line, &mut sink, 20);
    let lines = sink.watch_lines();
    assert_eq!(lines.len(), 1, "{:?}", lines);
    assert!(lines[0].starts_with("?(0x08) -> all(0x00), ?(0x18)"));

    // raw mode shows the bytes as received, telegram or not
    assert_eq!(s.call(DeviceType::System, "watch", "raw", false, -1, &mut out), CommandRet::Ok);
    line.inject_telegram(0x08, 0x00, 0x18, 0, &[41]);
    line.inject(&[0x08, 0x00, 0x18]);
    run_for(&mut s, &mut line, &mut sink, 40);

    let lines = sink.watch_lines();
    assert_eq!(lines.len(), 3, "{:?}", lines);
    assert!(lines[1].starts_with("raw: 08 00 18 00 29 "), "{}", lines[1]);
    assert!(lines[2].starts_with("raw: 08 00 18 ("), "{}", lines[2]);

    // a filter narrows tracing to one type
    assert_eq!(s.call(DeviceType::System, "watch", "19", false, -1, &mut out), CommandRet::Ok);
    line.inject_telegram(0x08, 0x00, 0x18, 0, &[42]);
    run_for(&mut s, &mut line, &mut sink, 20);
    assert_eq!(sink.watch_lines().len(), 3);
}
