//! `SharedGateway`: lock-per-iteration waits and concurrent callers.

use std::thread;

use emsgate::app::service::GatewayService;
use emsgate::app::shared::SharedGateway;
use emsgate::command::CommandRet;
use emsgate::config::GatewayConfig;
use emsgate::device::DeviceType;
use serde_json::Map;

use crate::mock_bus::{EventLog, MockLine, SimDevice, Topics};

fn shared_with_boiler() -> SharedGateway<MockLine, EventLog> {
    let line = MockLine::new().with_device(0x08, SimDevice::new(123).with_record(0x18, &[45]));
    let mut service = GatewayService::new(GatewayConfig::default());
    service.add_device(0x08, 123, "01.02");
    let gateway = SharedGateway::new(service, line, EventLog::new());
    for _ in 0..2_000 {
        gateway.tick();
    }
    assert!(gateway.with(|rt| rt.service.core().tx().is_idle()));
    gateway
}

#[test]
fn write_value_through_shared_handle() {
    let gateway = shared_with_boiler();
    let mut out = Map::new();
    assert_eq!(
        gateway.write_value(DeviceType::Boiler, "wwseltemp", "52", &mut out),
        CommandRet::Ok,
        "{:?}",
        out
    );
    assert_eq!(gateway.with(|rt| rt.line.devices[&0x08].records[&0x33][2]), 52);
    assert_eq!(gateway.with(|rt| rt.service.core().waiters()), 0);
}

#[test]
fn concurrent_writers_both_validate() {
    let gateway = shared_with_boiler();

    let (a, b) = thread::scope(|scope| {
        let a = scope.spawn(|| gateway.write_value(DeviceType::Boiler, "wwseltemp", "52", &mut Map::new()));
        let b = scope.spawn(|| gateway.write_value(DeviceType::Boiler, "heatingtemp", "65", &mut Map::new()));
        (a.join().unwrap(), b.join().unwrap())
    });
    assert_eq!((a, b), (CommandRet::Ok, CommandRet::Ok));

    gateway.with(|rt| {
        let records = &rt.line.devices[&0x08].records;
        assert_eq!(records[&0x33][2], 52);
        assert_eq!(records[&0x16][1], 65);
        assert_eq!(rt.service.core().waiters(), 0);
        assert_eq!(rt.service.health().tx_writes, 2);
    });
}

#[test]
fn failed_write_reports_reason() {
    let gateway = shared_with_boiler();
    gateway.with(|rt| rt.line.silent = true);
    let mut out = Map::new();
    assert_eq!(
        gateway.write_value(DeviceType::Boiler, "hc1/wwseltemp", "52", &mut out),
        CommandRet::Error
    );
    assert!(out["message"].as_str().unwrap().starts_with("boiler/wwseltemp"));
}

#[test]
fn publishing_waits_for_pending_writes() {
    let gateway = shared_with_boiler();
    let mut topics = Topics::default();

    gateway.with(|rt| rt.service.core_mut().enter_wait());
    assert_eq!(gateway.publish_values(&mut topics, false), 0);
    gateway.with(|rt| rt.service.core_mut().leave_wait());

    assert_eq!(gateway.publish_values(&mut topics, false), 1);
    assert_eq!(topics.published[0].0, "boiler_data");
}

#[test]
fn calls_share_the_registry() {
    let gateway = shared_with_boiler();
    let mut out = Map::new();
    assert_eq!(gateway.call(DeviceType::System, "watch", "on", &mut out), CommandRet::Ok);
    assert_eq!(out["watch"], "on");

    let mut out = Map::new();
    assert_eq!(gateway.call(DeviceType::System, "info", "", &mut out), CommandRet::Ok);
    assert_eq!(out["bus_status"], "connected");
    assert_eq!(out["devices"], 1);
}
