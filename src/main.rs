//! EMSGate firmware: main entry point.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                      Adapters (outer ring)                     │
//! │                                                                │
//! │  EmsUart            Esp32Clock      LogEventSink  LogPublisher │
//! │  (SerialPort+Clock) (ClockPort)     (EventSink)   (Publisher)  │
//! │                                                                │
//! │  ──────────────── Port Trait Boundary ───────────────────      │
//! │                                                                │
//! │  ┌────────────────────────────────────────────────────────┐    │
//! │  │            GatewayService (pure logic)                 │    │
//! │  │  Rx · Tx · Devices · Commands                          │    │
//! │  └────────────────────────────────────────────────────────┘    │
//! │                                                                │
//! │  SharedGateway (lock for web / MQTT tasks)                     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
#![deny(unused_must_use)]

// ── Imports ───────────────────────────────────────────────────
use anyhow::Result;
use esp_idf_hal::delay::FreeRtos;
use log::{info, warn};

use emsgate::adapters::log_sink::{LogEventSink, LogPublisher};
use emsgate::adapters::time::Esp32Clock;
use emsgate::adapters::uart::EmsUart;
use emsgate::app::ports::ClockPort;
use emsgate::app::service::GatewayService;
use emsgate::app::shared::SharedGateway;
use emsgate::config::GatewayConfig;

/// Bus loop period.  Short enough that the line-idle gap is seen on time.
const LOOP_PERIOD_MS: u32 = 1;
/// Changed values are published at most this often.
const PUBLISH_INTERVAL_MS: u64 = 10_000;
/// Full refresh of every fetchable telegram.
const FETCH_INTERVAL_MS: u64 = 60_000;

// ── Main ──────────────────────────────────────────────────────

fn main() -> Result<()> {
    // ── 1. ESP-IDF bootstrap ──────────────────────────────────
    esp_idf_svc::sys::link_patches();
    esp_idf_logger::init()?;

    info!("╔══════════════════════════════════════╗");
    info!("║  EMSGate v{}                         ║", env!("CARGO_PKG_VERSION"));
    info!("╚══════════════════════════════════════╝");

    // ── 2. Configuration ──────────────────────────────────────
    let config = match option_env!("EMSGATE_CONFIG") {
        Some(json) => GatewayConfig::from_json(json).unwrap_or_else(|e| {
            warn!("Gateway: settings rejected ({}), using defaults", e);
            GatewayConfig::default()
        }),
        None => GatewayConfig::default(),
    };
    info!(
        "Gateway: bus id 0x{:02X}, dialect {:?}, tx {}",
        config.bus_id,
        config.dialect,
        if config.tx_enabled { "on" } else { "off" }
    );

    // ── 3. Adapters ───────────────────────────────────────────
    let line = EmsUart::new(Esp32Clock::new()).map_err(|e| anyhow::anyhow!("{}", e))?;
    let gateway = SharedGateway::new(GatewayService::new(config), line, LogEventSink::new());
    let mut publisher = LogPublisher::new();

    info!("Gateway: ready, entering bus loop");

    // ── 4. Bus loop ───────────────────────────────────────────
    let mut last_publish = 0;
    let mut last_fetch = 0;
    loop {
        gateway.tick();

        let now = gateway.with(|rt| rt.line.now_ms());
        if now.saturating_sub(last_fetch) >= FETCH_INTERVAL_MS {
            last_fetch = now;
            let queued = gateway.with(|rt| rt.service.core_mut().fetch_values(None));
            if queued > 0 {
                info!("Gateway: periodic fetch queued {} reads", queued);
            }
        }
        if now.saturating_sub(last_publish) >= PUBLISH_INTERVAL_MS {
            last_publish = now;
            gateway.publish_values(&mut publisher, false);
        }

        FreeRtos::delay_ms(LOOP_PERIOD_MS);
    }
}
