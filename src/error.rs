//! Unified error types for the gateway.
//!
//! One `Copy` enum per subsystem, each convertible into the crate-wide
//! [`Error`].  Protocol-level errors ([`FrameError`], [`TxFailure`]) are
//! absorbed by the Rx/Tx services and only surface as counters and
//! request outcomes; [`CommandError`] is what reaches the boundary.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level gateway error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A received or outbound frame was malformed.
    Frame(FrameError),
    /// An outbound request could not be completed.
    Tx(TxFailure),
    /// A command call was rejected or failed.
    Command(CommandError),
    /// Configuration is invalid.
    Config(ConfigError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame(e) => write!(f, "frame: {e}"),
            Self::Tx(e) => write!(f, "tx: {e}"),
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Config(e) => write!(f, "config: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Frame errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the smallest valid telegram.
    TooShort,
    /// Longer than the bus maximum.
    TooLong,
    /// Trailing byte does not match the computed checksum.
    ChecksumMismatch,
    /// Source address is zero or carries the write bit.
    MalformedAddress,
    /// Extended type id cannot be expressed in the configured dialect.
    UnsupportedType,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort => write!(f, "frame too short"),
            Self::TooLong => write!(f, "frame too long"),
            Self::ChecksumMismatch => write!(f, "checksum mismatch"),
            Self::MalformedAddress => write!(f, "malformed address"),
            Self::UnsupportedType => write!(f, "type id not supported by dialect"),
        }
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Self::Frame(e)
    }
}

// ---------------------------------------------------------------------------
// Transmit failures
// ---------------------------------------------------------------------------

/// Why an outbound request resolved without being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFailure {
    /// No matching response within the wait window, retry limit reached.
    ValidationTimeout,
    /// Echo mismatch on every attempt up to the collision limit.
    Collisions,
    /// Evicted from a full queue (reads only).
    Dropped,
    /// Queue full of writes, or transmit disabled.
    Rejected,
    /// The target nacked the write on its last attempt.
    Refused,
}

impl fmt::Display for TxFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ValidationTimeout => write!(f, "validation timeout"),
            Self::Collisions => write!(f, "too many bus collisions"),
            Self::Dropped => write!(f, "dropped from full queue"),
            Self::Rejected => write!(f, "rejected by tx queue"),
            Self::Refused => write!(f, "refused by device"),
        }
    }
}

impl From<TxFailure> for Error {
    fn from(e: TxFailure) -> Self {
        Self::Tx(e)
    }
}

// ---------------------------------------------------------------------------
// Command errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// No entry for (device_type, name), or no device to act on.
    NotFound,
    /// Admin-only command called without authentication.
    NotAllowed,
    /// The value string could not be parsed or is out of range.
    InvalidValue,
    /// The handler accepted the value but could not act on it.
    Failed,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "not found"),
            Self::NotAllowed => write!(f, "not allowed"),
            Self::InvalidValue => write!(f, "invalid value"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Input could not be deserialized.
    Malformed,
    /// A field failed range validation; the message names it.
    ValidationFailed(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed config"),
            Self::ValidationFailed(msg) => write!(f, "validation failed: {msg}"),
        }
    }
}

impl From<ConfigError> for Error {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl core::error::Error for Error {}

/// Gateway-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
