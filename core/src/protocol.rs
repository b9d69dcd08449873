//! Protocol registry
//!
//! A tone is addressed by its bin on a 1024-sample frame, so its frequency is
//! `bin * sample_rate / 1024`. Multi-tone protocols carry three bytes per
//! symbol (six bands), dual-tone protocols carry one byte (two bands).

use std::fmt;
use std::str::FromStr;

use crate::error::ModemError;
use crate::symbol_codec::Symbol;
use crate::symbol_redundancy::Redundancy;
use crate::{SAMPLES_PER_FRAME, TONES_PER_BAND};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolId {
    AudibleNormal = 0,
    AudibleFast = 1,
    AudibleFastest = 2,
    UltrasoundNormal = 3,
    UltrasoundFast = 4,
    UltrasoundFastest = 5,
    DualToneNormal = 6,
    DualToneFast = 7,
    DualToneFastest = 8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolFamily {
    Audible,
    Ultrasound,
    DualTone,
}

/// Static parameters of one protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    pub id: ProtocolId,
    pub name: &'static str,
    pub family: ProtocolFamily,
    /// Bin of tone 0 in band 0
    pub start_bin: usize,
    /// Bins between neighbouring tones
    pub tone_spacing: usize,
    pub frames_per_symbol: usize,
    pub bytes_per_symbol: usize,
    /// Symbols in the preamble, and again in the postamble
    pub marker_symbols: usize,
    /// Redundancy applied to the payload body
    pub redundancy: Redundancy,
}

// Marker nibble offsets; consecutive marker symbols differ in every band and
// the preamble never equals the postamble.
const PREAMBLE_OFFSET: usize = 1;
const POSTAMBLE_OFFSET: usize = 9;

const fn multi_tone(
    id: ProtocolId,
    name: &'static str,
    family: ProtocolFamily,
    start_bin: usize,
    frames_per_symbol: usize,
    redundancy: Redundancy,
) -> ProtocolDescriptor {
    ProtocolDescriptor {
        id,
        name,
        family,
        start_bin,
        tone_spacing: 1,
        frames_per_symbol,
        bytes_per_symbol: 3,
        marker_symbols: 3,
        redundancy,
    }
}

const fn dual_tone(
    id: ProtocolId,
    name: &'static str,
    frames_per_symbol: usize,
    redundancy: Redundancy,
) -> ProtocolDescriptor {
    ProtocolDescriptor {
        id,
        name,
        family: ProtocolFamily::DualTone,
        start_bin: 24,
        tone_spacing: 2,
        frames_per_symbol,
        bytes_per_symbol: 1,
        marker_symbols: 8,
        redundancy,
    }
}

static REGISTRY: [ProtocolDescriptor; 9] = [
    multi_tone(ProtocolId::AudibleNormal, "audible-normal", ProtocolFamily::Audible, 40, 9, Redundancy::None),
    multi_tone(ProtocolId::AudibleFast, "audible-fast", ProtocolFamily::Audible, 40, 6, Redundancy::Parity),
    multi_tone(ProtocolId::AudibleFastest, "audible-fastest", ProtocolFamily::Audible, 40, 3, Redundancy::Parity),
    multi_tone(ProtocolId::UltrasoundNormal, "ultrasound-normal", ProtocolFamily::Ultrasound, 320, 9, Redundancy::None),
    multi_tone(ProtocolId::UltrasoundFast, "ultrasound-fast", ProtocolFamily::Ultrasound, 320, 6, Redundancy::Parity),
    multi_tone(ProtocolId::UltrasoundFastest, "ultrasound-fastest", ProtocolFamily::Ultrasound, 320, 3, Redundancy::Parity),
    dual_tone(ProtocolId::DualToneNormal, "dual-tone-normal", 9, Redundancy::None),
    dual_tone(ProtocolId::DualToneFast, "dual-tone-fast", 6, Redundancy::Parity),
    dual_tone(ProtocolId::DualToneFastest, "dual-tone-fastest", 3, Redundancy::Parity),
];

impl ProtocolId {
    pub const ALL: [ProtocolId; 9] = [
        ProtocolId::AudibleNormal,
        ProtocolId::AudibleFast,
        ProtocolId::AudibleFastest,
        ProtocolId::UltrasoundNormal,
        ProtocolId::UltrasoundFast,
        ProtocolId::UltrasoundFastest,
        ProtocolId::DualToneNormal,
        ProtocolId::DualToneFast,
        ProtocolId::DualToneFastest,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn descriptor(self) -> &'static ProtocolDescriptor {
        &REGISTRY[self as usize]
    }

    pub fn name(self) -> &'static str {
        self.descriptor().name
    }

    pub fn family(self) -> ProtocolFamily {
        self.descriptor().family
    }
}

impl TryFrom<i32> for ProtocolId {
    type Error = ModemError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(ProtocolId::from_id)
            .ok_or_else(|| ModemError::InvalidConfiguration(format!("unknown protocol id {value}")))
    }
}

impl FromStr for ProtocolId {
    type Err = ModemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        if let Ok(id) = wanted.parse::<i32>() {
            return ProtocolId::try_from(id);
        }
        ProtocolId::ALL
            .iter()
            .copied()
            .find(|protocol| protocol.name() == wanted)
            .ok_or_else(|| ModemError::InvalidConfiguration(format!("unknown protocol '{s}'")))
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ProtocolFamily::Audible => "audible",
            ProtocolFamily::Ultrasound => "ultrasound",
            ProtocolFamily::DualTone => "dual-tone",
        })
    }
}

impl ProtocolDescriptor {
    /// Nibble bands per symbol
    pub fn bands(&self) -> usize {
        self.bytes_per_symbol * 2
    }

    pub fn bits_per_symbol(&self) -> u32 {
        (self.bytes_per_symbol * 8) as u32
    }

    /// Number of distinct symbols, `16^bands`
    pub fn alphabet_size(&self) -> u64 {
        1u64 << self.bits_per_symbol()
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.frames_per_symbol * SAMPLES_PER_FRAME
    }

    pub fn tone_bin(&self, band: usize, nibble: usize) -> usize {
        self.start_bin + (band * TONES_PER_BAND + nibble) * self.tone_spacing
    }

    pub fn tone_frequency(&self, band: usize, nibble: usize, sample_rate: f32) -> f32 {
        self.tone_bin(band, nibble) as f32 * sample_rate / SAMPLES_PER_FRAME as f32
    }

    /// Lowest and highest tone frequencies at the given sample rate
    pub fn frequency_range(&self, sample_rate: f32) -> (f32, f32) {
        (
            self.tone_frequency(0, 0, sample_rate),
            self.tone_frequency(self.bands() - 1, TONES_PER_BAND - 1, sample_rate),
        )
    }

    pub fn symbol_duration_secs(&self, sample_rate: f32) -> f32 {
        self.samples_per_symbol() as f32 / sample_rate
    }

    pub fn preamble(&self) -> Vec<Symbol> {
        self.marker(PREAMBLE_OFFSET)
    }

    pub fn postamble(&self) -> Vec<Symbol> {
        self.marker(POSTAMBLE_OFFSET)
    }

    fn marker(&self, offset: usize) -> Vec<Symbol> {
        let bands = self.bands();
        let id = self.id as usize;
        (0..self.marker_symbols)
            .map(|k| {
                let nibbles: Vec<u8> = (0..bands)
                    .map(|band| ((k * 7 + band * 3 + id * 5 + offset) % TONES_PER_BAND) as u8)
                    .collect();
                Symbol::from_nibbles(&nibbles)
            })
            .collect()
    }
}
