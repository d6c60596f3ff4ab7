//! Gateway core: bus services, device registry and commands, zero I/O.
//!
//! [`service::GatewayService`] owns the receive/transmit state machines,
//! the device list and the command registry.  All interaction with the
//! UART, the clock and the outside world happens through the **port
//! traits** in [`ports`], so the whole layer runs under host tests.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
pub mod shared;
