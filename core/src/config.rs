use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{ModemError, Result};
use crate::protocol::{ProtocolDescriptor, ProtocolFamily, ProtocolId};
use crate::{
    DEFAULT_DETECTION_THRESHOLD, DEFAULT_PAYLOAD_CEILING, DEFAULT_SAMPLE_RATE, MAX_PAYLOAD_CEILING,
    MAX_SAMPLE_RATE, MIN_SAMPLE_RATE, ULTRASOUND_MIN_SAMPLE_RATE,
};

/// PCM sample encoding, little-endian for multi-byte formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    U8,
    I8,
    U16,
    I16,
    F32,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 5] = [
        SampleFormat::U8,
        SampleFormat::I8,
        SampleFormat::U16,
        SampleFormat::I16,
        SampleFormat::F32,
    ];

    pub fn bytes_per_sample(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::I8 => 1,
            SampleFormat::U16 | SampleFormat::I16 => 2,
            SampleFormat::F32 => 4,
        }
    }

    /// Numeric id used by host bindings; 0 is reserved for "undefined"
    pub fn id(self) -> i32 {
        match self {
            SampleFormat::U8 => 1,
            SampleFormat::I8 => 2,
            SampleFormat::U16 => 3,
            SampleFormat::I16 => 4,
            SampleFormat::F32 => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            SampleFormat::U8 => "u8",
            SampleFormat::I8 => "i8",
            SampleFormat::U16 => "u16",
            SampleFormat::I16 => "i16",
            SampleFormat::F32 => "f32",
        }
    }
}

impl TryFrom<i32> for SampleFormat {
    type Error = ModemError;

    fn try_from(value: i32) -> Result<Self> {
        SampleFormat::ALL
            .iter()
            .copied()
            .find(|format| format.id() == value)
            .ok_or_else(|| ModemError::InvalidConfiguration(format!("unsupported sample format id {value}")))
    }
}

impl FromStr for SampleFormat {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        SampleFormat::ALL
            .iter()
            .copied()
            .find(|format| format.name() == wanted)
            .ok_or_else(|| ModemError::InvalidConfiguration(format!("unknown sample format '{s}'")))
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which protocol families a session listens for and may transmit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OperatingMode {
    Audible,
    Ultrasound,
    DualTone,
    #[default]
    All,
}

impl OperatingMode {
    pub fn includes(self, family: ProtocolFamily) -> bool {
        match self {
            OperatingMode::All => true,
            OperatingMode::Audible => family == ProtocolFamily::Audible,
            OperatingMode::Ultrasound => family == ProtocolFamily::Ultrasound,
            OperatingMode::DualTone => family == ProtocolFamily::DualTone,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OperatingMode::Audible => "audible",
            OperatingMode::Ultrasound => "ultrasound",
            OperatingMode::DualTone => "dual-tone",
            OperatingMode::All => "all",
        }
    }
}

impl FromStr for OperatingMode {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "audible" => Ok(OperatingMode::Audible),
            "ultrasound" => Ok(OperatingMode::Ultrasound),
            "dual-tone" | "dualtone" => Ok(OperatingMode::DualTone),
            "all" => Ok(OperatingMode::All),
            _ => Err(ModemError::InvalidConfiguration(format!("unknown operating mode '{s}'"))),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Session parameters, fixed between `init` and `close`.
#[derive(Debug, Clone, PartialEq)]
pub struct ModemConfig {
    pub mode: OperatingMode,
    /// Hz, shared by encoding and decoding
    pub sample_rate: f32,
    pub sample_format: SampleFormat,
    /// Largest payload accepted by `encode` and by decoded headers
    pub payload_ceiling: usize,
    /// Minimum mean tone fraction for a preamble or postamble match
    pub detection_threshold: f32,
    /// Drop a decoded payload equal to the previous one if it ended within
    /// this much stream time of it
    pub dedup_window: Option<Duration>,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            mode: OperatingMode::All,
            sample_rate: DEFAULT_SAMPLE_RATE,
            sample_format: SampleFormat::I16,
            payload_ceiling: DEFAULT_PAYLOAD_CEILING,
            detection_threshold: DEFAULT_DETECTION_THRESHOLD,
            dedup_window: None,
        }
    }
}

impl ModemConfig {
    pub fn with_mode(mut self, mode: OperatingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_sample_format(mut self, sample_format: SampleFormat) -> Self {
        self.sample_format = sample_format;
        self
    }

    pub fn with_payload_ceiling(mut self, payload_ceiling: usize) -> Self {
        self.payload_ceiling = payload_ceiling;
        self
    }

    pub fn with_detection_threshold(mut self, detection_threshold: f32) -> Self {
        self.detection_threshold = detection_threshold;
        self
    }

    pub fn with_dedup_window(mut self, dedup_window: Option<Duration>) -> Self {
        self.dedup_window = dedup_window;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.sample_rate.is_finite() || !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&self.sample_rate) {
            return Err(ModemError::InvalidConfiguration(format!(
                "sample rate {} Hz is outside {}..={} Hz",
                self.sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
            )));
        }

        if self.payload_ceiling == 0 || self.payload_ceiling > MAX_PAYLOAD_CEILING {
            return Err(ModemError::InvalidConfiguration(format!(
                "payload ceiling {} is outside 1..={}",
                self.payload_ceiling, MAX_PAYLOAD_CEILING
            )));
        }

        if !(self.detection_threshold > 0.0 && self.detection_threshold <= 1.0) {
            return Err(ModemError::InvalidConfiguration(format!(
                "detection threshold {} is outside (0, 1]",
                self.detection_threshold
            )));
        }

        if self.mode == OperatingMode::Ultrasound && self.sample_rate < ULTRASOUND_MIN_SAMPLE_RATE {
            return Err(ModemError::InvalidConfiguration(format!(
                "ultrasound mode needs at least {} Hz, got {} Hz",
                ULTRASOUND_MIN_SAMPLE_RATE, self.sample_rate
            )));
        }

        Ok(())
    }

    /// Descriptor for a protocol this configuration may transmit.
    pub fn check_protocol(&self, protocol: ProtocolId) -> Result<&'static ProtocolDescriptor> {
        let descriptor = protocol.descriptor();
        if !self.mode.includes(descriptor.family) {
            return Err(ModemError::InvalidConfiguration(format!(
                "protocol {protocol} is not part of {} mode",
                self.mode
            )));
        }
        if descriptor.family == ProtocolFamily::Ultrasound && self.sample_rate < ULTRASOUND_MIN_SAMPLE_RATE {
            return Err(ModemError::InvalidConfiguration(format!(
                "protocol {protocol} needs at least {} Hz",
                ULTRASOUND_MIN_SAMPLE_RATE
            )));
        }
        Ok(descriptor)
    }

    /// Protocols the decoder listens for, in registry order.
    pub fn rx_protocols(&self) -> Vec<ProtocolId> {
        ProtocolId::ALL
            .iter()
            .copied()
            .filter(|protocol| self.check_protocol(*protocol).is_ok())
            .collect()
    }

    /// Dedup window converted to stream samples
    pub fn dedup_window_samples(&self) -> Option<u64> {
        self.dedup_window
            .map(|window| (window.as_secs_f64() * self.sample_rate as f64).round() as u64)
    }
}
