//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter    | Implements         | Connects to              |
//! |------------|--------------------|--------------------------|
//! | `uart`     | SerialPort         | ESP32 UART + transceiver |
//! |            | ClockPort          | (via `time`)             |
//! | `time`     | ClockPort          | ESP32 system timer       |
//! | `log_sink` | EventSink          | Serial log output        |
//! |            | ValuePublisher     |                          |

pub mod log_sink;
pub mod time;
pub mod uart;
