//! Peripheral assignments for the gateway board.
//!
//! The bus transceiver hangs off one UART; everything the line adapter
//! needs to open it lives here.

// ---------------------------------------------------------------------------
// EMS bus transceiver
// ---------------------------------------------------------------------------

/// UART controller wired to the bus interface circuit.
pub const EMS_UART_NUM: i32 = 1;
/// Transceiver output (bus → MCU).
pub const EMS_RX_GPIO: i32 = 5;
/// Transceiver input (MCU → bus).
pub const EMS_TX_GPIO: i32 = 6;

/// The bus runs 9600 8N1; frames end in a line break.
pub const EMS_BAUD: i32 = 9600;

/// Driver ring buffer, bytes.  Several frames fit between two ticks.
pub const EMS_RX_BUFFER: i32 = 512;

/// Longest we block reading back our own echo, in milliseconds.
/// One byte takes ~1.04 ms on the wire.
pub const EMS_ECHO_TIMEOUT_MS: u32 = 50;
