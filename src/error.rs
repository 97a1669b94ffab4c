//! # Emulator Error Handling
//!
//! This module defines the DvbError enum, which represents the different error
//! types that can occur in the dvbsat-rs crate.

use thiserror::Error;

/// Represents the different error types that can occur in the emulator.
#[derive(Debug, Error)]
pub enum DvbError {
    /// Indicates an invalid topology or infrastructure configuration.
    /// Fatal during initialisation.
    #[error("Invalid configuration: {0}")]
    ConfigInvalid(String),

    /// Indicates an error when parsing a DVB frame.
    #[error("Error parsing DVB frame: {0}")]
    FrameMalformed(String),

    /// Indicates an unknown DVB message type byte.
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownMsgType(u8),

    /// Indicates a MODCOD id absent from the FMT definition table.
    #[error("Unknown MODCOD id: {0}")]
    UnknownModcod(u8),

    /// Indicates a control-plane message that is not valid in the current
    /// state (SAC before logon, TTP for an unknown terminal, ...).
    #[error("Protocol state violation: {0}")]
    StateViolation(String),

    /// Indicates a push on a MAC FIFO that has reached its maximum size.
    #[error("FIFO full")]
    FifoFull,

    /// Indicates that a band reallocation request cannot be satisfied by
    /// the reservoir category.
    #[error("Insufficient band: {0}")]
    InsufficientBand(String),

    /// Indicates a recoverable I/O failure on a carrier socket.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    /// Indicates a nom parsing error.
    #[error("Nom error: {0}")]
    NomError(String),

    /// A catch‑all error for uncategorized cases.
    #[error("Other error: {0}")]
    Other(String),
}

impl From<std::io::Error> for DvbError {
    fn from(err: std::io::Error) -> Self {
        DvbError::TransientIo(err.to_string())
    }
}
