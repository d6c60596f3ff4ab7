//! Port traits: the boundary between the gateway core and the outside world.
//!
//! ```text
//!   UART / timer / log / MQTT ──▶ Port trait ──▶ GatewayService
//! ```
//!
//! The gateway never touches the UART or the clock directly; the main
//! loop and the tests hand it implementations of these traits.

use serde_json::Value;

use super::events::GatewayEvent;

// ───────────────────────────────────────────────────────────────
// Serial line (driven adapter: UART ↔ domain)
// ───────────────────────────────────────────────────────────────

/// Half-duplex bus line.
pub trait SerialPort {
    type Error: core::fmt::Debug;

    /// Non-blocking read of whatever bytes arrived; `Ok(0)` when none.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// `true` when every non-empty [`read`](Self::read) returns exactly
    /// one whole frame (the driver splits on the bus break).  Otherwise
    /// frames are cut at line-idle gaps.
    fn delivers_frames(&self) -> bool {
        false
    }

    /// Put `frame` on the line and capture the bytes read back while
    /// sending into `echo`.  Returns the echo length.
    fn transmit(&mut self, frame: &[u8], echo: &mut [u8]) -> Result<usize, Self::Error>;
}

// ───────────────────────────────────────────────────────────────
// Clock
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
pub trait ClockPort {
    fn now_ms(&self) -> u64;
}

// ───────────────────────────────────────────────────────────────
// Event sink (driven adapter: domain → log / telemetry)
// ───────────────────────────────────────────────────────────────

/// The gateway emits structured [`GatewayEvent`]s through this port.
pub trait EventSink {
    fn emit(&mut self, event: &GatewayEvent);
}

// ───────────────────────────────────────────────────────────────
// Value publisher (driven adapter: domain → MQTT / web)
// ───────────────────────────────────────────────────────────────

/// Receives device value snapshots, one JSON object per topic.
pub trait ValuePublisher {
    fn publish(&mut self, topic: &str, payload: &Value);
}
