//! Log-based event sink and value publisher.
//!
//! Implements [`EventSink`] and [`ValuePublisher`] by writing to the
//! ESP-IDF logger (UART / USB-CDC in production).  Watch-mode trace lines
//! go to the `watch` log target so they can be filtered separately.
//! An MQTT adapter would implement the same two traits.

use log::{info, warn};
use serde_json::Value;

use crate::app::events::GatewayEvent;
use crate::app::ports::{EventSink, ValuePublisher};

/// Adapter that logs every [`GatewayEvent`] to the serial console.
#[derive(Default)]
pub struct LogEventSink;

impl LogEventSink {
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for LogEventSink {
    fn emit(&mut self, event: &GatewayEvent) {
        match event {
            GatewayEvent::Watch(line) => {
                info!(target: "watch", "{}", line);
            }
            GatewayEvent::DeviceDiscovered { device_type, address, product_id, name } => {
                info!(
                    "DEVICE | {} {} at 0x{:02X} (product {})",
                    device_type, name, address, product_id
                );
            }
            GatewayEvent::UnknownDevice { address, product_id } => {
                warn!("DEVICE | unknown product {} at 0x{:02X}", product_id, address);
            }
            GatewayEvent::BusStatusChanged { from, to } => {
                info!("BUS | {} -> {}", from, to);
            }
            GatewayEvent::RequestValidated { id, type_id } => {
                info!("TX | request {} (0x{:02X}) confirmed", id, type_id);
            }
            GatewayEvent::RequestFailed { id, type_id, reason } => {
                warn!("TX | request {} (0x{:02X}) failed: {}", id, type_id, reason);
            }
        }
    }
}

/// Publishes value snapshots as one log line per topic.
#[derive(Default)]
pub struct LogPublisher {
    published: u32,
}

impl LogPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> u32 {
        self.published
    }
}

impl ValuePublisher for LogPublisher {
    fn publish(&mut self, topic: &str, payload: &Value) {
        self.published = self.published.wrapping_add(1);
        info!("PUBLISH | {} {}", topic, payload);
    }
}
