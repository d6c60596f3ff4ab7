//! Gateway configuration parameters
//!
//! Bus identity, protocol dialect and every bus-timing tuning constant.
//! Loaded from the settings JSON handed over by the web layer; missing
//! fields fall back to their defaults.

use serde::{Deserialize, Serialize};

use crate::ems::bus::Dialect;
use crate::error::ConfigError;

/// Core gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    // --- Bus identity ---
    /// Our own bus address (service key address).
    pub bus_id: u8,
    /// Addressing convention used for outbound extended types.
    pub dialect: Dialect,
    /// `false` = listen-only, nothing is ever transmitted.
    pub tx_enabled: bool,

    // --- Rx timing ---
    /// Line silence (ms) that terminates a frame.
    pub rx_idle_gap_ms: u32,
    /// Minimum rx quality (%) before the bus is flagged not connected.
    pub rx_min_quality_percent: u8,
    /// No valid telegram for this long (ms) means the bus is offline.
    pub bus_timeout_ms: u32,

    // --- Tx timing ---
    /// Minimum line silence (ms) before we start a transmission.
    pub tx_min_idle_ms: u32,
    /// How long (ms) to wait for the validating response.
    pub tx_response_timeout_ms: u32,
    /// Transmission attempts per request before it fails permanently.
    pub tx_retry_limit: u8,
    /// First collision backoff window (ms).
    pub tx_backoff_base_ms: u32,
    /// Upper bound of the collision backoff window (ms).
    pub tx_backoff_max_ms: u32,
    /// Consecutive collisions before a request fails permanently.
    pub tx_collision_limit: u8,
    /// Tx fail rate (%) above which the bus reports tx errors.
    pub tx_error_limit_percent: u8,

    // --- Devices ---
    /// Query unknown bus addresses for their version and register them.
    pub auto_discover: bool,
    /// Seed for the collision backoff jitter.
    pub rng_seed: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            // Bus identity
            bus_id: 0x0B,
            dialect: Dialect::Ems,
            tx_enabled: true,

            // Rx
            rx_idle_gap_ms: 3,
            rx_min_quality_percent: 50,
            bus_timeout_ms: 30_000,

            // Tx
            tx_min_idle_ms: 5,
            tx_response_timeout_ms: 1_000,
            tx_retry_limit: 3,
            tx_backoff_base_ms: 10,
            tx_backoff_max_ms: 320,
            tx_collision_limit: 8,
            tx_error_limit_percent: 10,

            // Devices
            auto_discover: true,
            rng_seed: 0x5EED_0E35,
        }
    }
}

impl GatewayConfig {
    /// Deserialize and validate a settings JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|_| ConfigError::Malformed)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject out-of-range values instead of clamping them.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus_id == 0 || self.bus_id & 0x80 != 0 {
            return Err(ConfigError::ValidationFailed("bus_id must be 0x01..=0x7F"));
        }
        if self.rx_idle_gap_ms == 0 {
            return Err(ConfigError::ValidationFailed("rx_idle_gap_ms must be > 0"));
        }
        if self.tx_min_idle_ms < self.rx_idle_gap_ms {
            return Err(ConfigError::ValidationFailed(
                "tx_min_idle_ms must not be shorter than rx_idle_gap_ms",
            ));
        }
        if self.tx_response_timeout_ms == 0 {
            return Err(ConfigError::ValidationFailed("tx_response_timeout_ms must be > 0"));
        }
        if self.tx_retry_limit == 0 {
            return Err(ConfigError::ValidationFailed("tx_retry_limit must be > 0"));
        }
        if self.tx_collision_limit == 0 {
            return Err(ConfigError::ValidationFailed("tx_collision_limit must be > 0"));
        }
        if self.tx_backoff_base_ms == 0 || self.tx_backoff_max_ms < self.tx_backoff_base_ms {
            return Err(ConfigError::ValidationFailed(
                "tx backoff window must satisfy 0 < base <= max",
            ));
        }
        if self.rx_min_quality_percent > 100 || self.tx_error_limit_percent > 100 {
            return Err(ConfigError::ValidationFailed("percentages must be 0..=100"));
        }
        Ok(())
    }
}
