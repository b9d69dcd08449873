use thiserror::Error;

/// Errors surfaced to callers of the modem.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ModemError {
    #[error("Session is not initialized")]
    NotInitialized,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Payload of {len} bytes exceeds the {max} byte limit")]
    InvalidPayloadLength { len: usize, max: usize },

    #[error("Volume {0} is outside 0..=100")]
    InvalidVolume(u8),

    #[error("Waveform synthesis failed: {0}")]
    SynthesisFailure(String),

    #[error("Spectrum analysis failed: {0}")]
    Spectrum(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;

/// Reasons a frame candidate is dropped while decoding.
///
/// These never reach the caller; the detector logs them and rescans.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("CRC mismatch in frame header")]
    HeaderCrcMismatch,

    #[error("Unknown protocol id {0} in frame header")]
    UnknownProtocol(u8),

    #[error("Frame header names protocol {found}, expected {expected}")]
    ProtocolMismatch { expected: u8, found: u8 },

    #[error("Declared payload length {len} exceeds ceiling {max}")]
    LengthOverCeiling { len: usize, max: usize },

    #[error("CRC mismatch in frame payload")]
    PayloadCrcMismatch,

    #[error("Failed to detect postamble")]
    PostambleNotFound,

    #[error("Invalid frame size")]
    InvalidFrameSize,
}
