//! EMS heating-bus gateway library.
//!
//! Exposes the protocol core, device profiles and command layer for
//! integration testing and for the firmware binary. All ESP-IDF-specific
//! code is guarded by `#[cfg(target_os = "espidf")]` within each module.

#![deny(unused_must_use)]

extern crate alloc;

pub mod adapters;
pub mod app;
pub mod command;
pub mod config;
pub mod device;
pub mod ems;
pub mod error;

mod pins;
