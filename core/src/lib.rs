//! Data-over-sound modem library
//!
//! Turns short byte payloads into multi-tone FSK audio and recovers them from a
//! streamed, possibly noisy recording. Tones sit on the bins of a 1024-sample
//! frame and every 4-bit nibble selects one of 16 tones inside its own band.
//!
//! A [`Session`] is the entry point: it is configured once, encodes payloads
//! to PCM bytes in the configured sample format and accepts captured PCM in
//! arbitrary chunks, returning payloads as frames complete.

pub mod config;
pub mod detector;
pub mod error;
pub mod framing;
pub mod pcm;
pub mod protocol;
pub mod resample;
pub mod session;
pub mod spectrum;
pub mod symbol_codec;
pub mod symbol_redundancy;
pub mod synth;

pub use config::{ModemConfig, OperatingMode, SampleFormat};
pub use error::{ModemError, Result};
pub use protocol::{ProtocolDescriptor, ProtocolFamily, ProtocolId};
pub use session::{DecodeStats, Session};

// Tone grid
pub const SAMPLES_PER_FRAME: usize = 1024;
pub const TONES_PER_BAND: usize = 16;

// Sample rates (Hz)
pub const DEFAULT_SAMPLE_RATE: f32 = 48000.0;
pub const MIN_SAMPLE_RATE: f32 = 8000.0;
pub const MAX_SAMPLE_RATE: f32 = 96000.0;
pub const ULTRASOUND_MIN_SAMPLE_RATE: f32 = 44100.0;

// Payload limits (bytes)
pub const DEFAULT_PAYLOAD_CEILING: usize = 256;
pub const MAX_PAYLOAD_CEILING: usize = 1024;

// Detection
pub const HOPS_PER_SYMBOL: usize = 8; // analysis hop = symbol length / 8
pub const DEFAULT_DETECTION_THRESHOLD: f32 = 0.5;
pub const MIN_BAND_ENERGY: f32 = 1e-9;
