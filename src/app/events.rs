//! Outbound gateway events and the health snapshot.
//!
//! The [`GatewayService`](super::service::GatewayService) emits events
//! through the [`EventSink`](super::ports::EventSink) port; adapters
//! decide whether they end up on the console, MQTT or a websocket.

use alloc::string::String;

use serde::Serialize;

use crate::device::DeviceType;
use crate::ems::{BusStatus, RequestId};
use crate::error::TxFailure;

#[derive(Debug, Clone, PartialEq)]
pub enum GatewayEvent {
    /// One bus trace line (watch mode).
    Watch(String),

    /// A device answered our version request and was registered.
    DeviceDiscovered {
        device_type: DeviceType,
        address: u8,
        product_id: u8,
        name: &'static str,
    },

    /// A product id we have no profile for.
    UnknownDevice { address: u8, product_id: u8 },

    BusStatusChanged { from: BusStatus, to: BusStatus },

    RequestValidated { id: RequestId, type_id: u16 },

    RequestFailed {
        id: RequestId,
        type_id: u16,
        reason: TxFailure,
    },
}

/// Bus health as reported by the `info` command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub bus_status: BusStatus,
    pub bus_id: u8,
    pub bus_protocol: &'static str,
    pub rx_received: u32,
    pub rx_fails: u32,
    pub rx_quality: u8,
    pub tx_reads: u32,
    pub tx_writes: u32,
    pub tx_fails: u32,
    pub tx_collisions: u32,
    pub tx_quality: u8,
    pub tx_queue: usize,
    pub devices: usize,
}
