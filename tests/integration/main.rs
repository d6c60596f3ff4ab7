//! Integration test driver for the `tests/integration/` submodules.
//!
//! Each `mod` below maps to a file that drives the gateway against the
//! simulated bus in [`mock_bus`].  All tests run on the host with no
//! real hardware required.

mod command_tests;
mod gateway_tests;
mod mock_bus;
mod shared_tests;
