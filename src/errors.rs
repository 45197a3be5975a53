//! Error types for the SCCP and IAX2 stacks

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("SCCP error: {0}")]
    Sccp(#[from] SccpError),

    #[error("SCCP management error: {0}")]
    Management(#[from] ManagementError),

    #[error("IAX2 error: {0}")]
    Iax(#[from] IaxError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,
}

/// SCCP layer errors
#[derive(Debug, Error)]
pub enum SccpError {
    #[error("Address error: {0}")]
    AddressError(String),

    #[error("No translation for address")]
    NoTranslation,

    #[error("Subsystem failure: SSN {0}")]
    SubsystemFailure(u8),

    #[error("Unequipped user: SSN {0}")]
    UnequippedUser(u8),

    #[error("Network congestion")]
    NetworkCongestion,

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Truncated message: expected at least {expected} octets, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("Pointer {pointer} out of bounds (buffer length {len})")]
    PointerOutOfBounds { pointer: usize, len: usize },

    #[error("Pointer value {value} exceeds field range {max}")]
    PointerOverflow { value: usize, max: usize },

    #[error("Segmentation failure: {0}")]
    SegmentationFailure(String),

    #[error("Hop counter violation")]
    HopCounterViolation,

    #[error("MTP transport error: {0}")]
    Mtp(String),
}

/// SCCP management errors
#[derive(Debug, Error)]
pub enum ManagementError {
    #[error("Unknown local subsystem: {0}")]
    UnknownLocalSubsystem(u8),

    #[error("Unknown remote point code: {0}")]
    UnknownRemote(u32),

    #[error("Invalid management message: {0}")]
    InvalidMessage(String),
}

/// IAX2 layer errors
#[derive(Debug, Error)]
pub enum IaxError {
    #[error("Frame parse error: {0}")]
    ParseError(String),

    #[error("Truncated frame: expected at least {expected} octets, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("No local call number available (active transactions: {0})")]
    CallNoExhausted(usize),

    #[error("Call token rejected: {0}")]
    CallTokenRejected(#[from] CallTokenError),

    #[error("Socket error: {0}")]
    Socket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Call-token anti-spoofing failures (§4.8)
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CallTokenError {
    #[error("missing CALLTOKEN information element")]
    Missing,

    #[error("call token digest mismatch")]
    DigestMismatch,

    #[error("call token too old")]
    Expired,
}
