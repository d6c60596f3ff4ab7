//! Bus-wide state: dialect, our own address, connection health.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;

/// Addressing convention for outbound telegrams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Classic EMS: one-byte type ids only.
    Ems,
    /// EMS+ / EMS2: 16-bit type ids via the `0xFF` marker.
    #[serde(rename = "ems+")]
    EmsPlus,
}

/// Aggregate bus health as reported to the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum BusStatus {
    #[serde(rename = "connected")]
    Connected = 0,
    #[serde(rename = "txerror")]
    TxErrors = 1,
    #[serde(rename = "disconnected")]
    Offline = 2,
}

impl BusStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::TxErrors => "txerror",
            Self::Offline => "disconnected",
        }
    }

    /// Derive the status from the connection flag and Tx counters.
    ///
    /// `sent` counts successful transmissions (reads + writes), `fails`
    /// every failed attempt.
    pub fn evaluate(connected: bool, sent: u32, fails: u32, error_limit_percent: u8) -> Self {
        if !connected {
            return Self::Offline;
        }
        if sent == 0 {
            return if fails == 0 { Self::Connected } else { Self::TxErrors };
        }
        let rate = u64::from(fails) * 100 / u64::from(sent);
        if rate > u64::from(error_limit_percent) {
            Self::TxErrors
        } else {
            Self::Connected
        }
    }
}

impl fmt::Display for BusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection bookkeeping shared by Rx and Tx.
#[derive(Debug, Clone)]
pub struct BusState {
    bus_id: u8,
    dialect: Dialect,
    connected: bool,
    last_valid_rx_ms: Option<u64>,
    ems_plus_seen: bool,
}

impl BusState {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            bus_id: config.bus_id,
            dialect: config.dialect,
            connected: false,
            last_valid_rx_ms: None,
            ems_plus_seen: false,
        }
    }

    pub fn bus_id(&self) -> u8 {
        self.bus_id
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns `true` when the flag actually changed.
    pub fn set_connected(&mut self, connected: bool) -> bool {
        let changed = self.connected != connected;
        self.connected = connected;
        changed
    }

    /// A valid telegram arrived at `now_ms`.
    pub fn mark_rx(&mut self, now_ms: u64, extended: bool) {
        self.last_valid_rx_ms = Some(now_ms);
        self.ems_plus_seen |= extended;
    }

    pub fn last_valid_rx_ms(&self) -> Option<u64> {
        self.last_valid_rx_ms
    }

    /// Whether an EMS+ telegram has ever been seen on the line.
    pub fn ems_plus_seen(&self) -> bool {
        self.ems_plus_seen
    }

    /// `true` once no valid telegram arrived for `timeout_ms`.
    pub fn timed_out(&self, now_ms: u64, timeout_ms: u32) -> bool {
        match self.last_valid_rx_ms {
            Some(at) => now_ms.saturating_sub(at) >= u64::from(timeout_ms),
            None => true,
        }
    }
}
