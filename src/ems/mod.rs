//! EMS bus protocol layer.
//!
//! ```text
//!   line bytes ──▶ rx (gap framing) ──▶ telegram::parse ──▶ RxFrame
//!                                                              │
//!   device setters ──▶ tx (queue, echo check, backoff) ◀── validation
//!                          │
//!                          ▼
//!                     SerialPort::transmit
//! ```
//!
//! - [`crc`]: checksum over header and payload.
//! - [`telegram`]: immutable telegram and its wire codec.
//! - [`bus`]: dialect, connection state, status derivation.
//! - [`rx`] / [`tx`]: the receive and transmit state machines.
//! - [`watch`]: bus trace filtering and formatting.

pub mod bus;
pub mod crc;
pub mod rx;
pub mod telegram;
pub mod tx;
pub mod watch;

pub use bus::{BusState, BusStatus, Dialect};
pub use rx::{RxFrame, RxService};
pub use telegram::Telegram;
pub use tx::{RequestId, TxEvent, TxOutcome, TxService};
pub use watch::{Watch, WatchMode};
