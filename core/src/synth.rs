//! Multi-tone waveform synthesis
//!
//! Every symbol sounds one tone per band for its whole duration. Tone
//! frequencies sit on bins of a 1024-sample frame, so the phase of sample `i`
//! is `2 * pi * bin * i / 1024` and a single sine table serves every sample
//! rate. Phase restarts at each symbol boundary.

use std::f32::consts::PI;
use std::time::Duration;

use crate::error::{ModemError, Result};
use crate::protocol::ProtocolDescriptor;
use crate::symbol_codec::Symbol;
use crate::SAMPLES_PER_FRAME;

/// Edge taper applied to the start and end of each symbol (8% per side).
const EDGE_TAPER_RATIO: f32 = 0.08;

/// Ensure we always have a minimum attack/decay regardless of speed.
const MIN_TAPER_SAMPLES: usize = 64;

pub const MAX_VOLUME: u8 = 100;

/// Peak amplitude for a 0..=100 volume.
pub fn volume_to_amplitude(volume: u8) -> Result<f32> {
    if volume > MAX_VOLUME {
        return Err(ModemError::InvalidVolume(volume));
    }
    Ok(volume as f32 / MAX_VOLUME as f32)
}

pub(crate) fn raised_cosine_window(len: usize, taper_len: usize) -> Vec<f32> {
    let taper = taper_len.min(len / 2);
    let mut window = vec![1.0; len];
    for i in 0..taper {
        // Smoothly increase from 0 to 1 using a sine-squared profile
        let progress = i as f32 / taper as f32;
        let value = (PI * progress / 2.0).sin().powi(2);
        window[i] = value;
        window[len - 1 - i] = value;
    }
    window
}

pub(crate) fn taper_length(len: usize, ratio: f32, min: usize) -> usize {
    (((len as f32) * ratio).round() as usize).max(min).min(len / 2)
}

pub struct Synthesizer {
    descriptor: &'static ProtocolDescriptor,
    sample_rate: f32,
    envelope: Vec<f32>,
    sine: Vec<f32>,
}

impl Synthesizer {
    pub fn new(descriptor: &'static ProtocolDescriptor, sample_rate: f32) -> Self {
        let len = descriptor.samples_per_symbol();
        let envelope = raised_cosine_window(len, taper_length(len, EDGE_TAPER_RATIO, MIN_TAPER_SAMPLES));
        let sine = (0..SAMPLES_PER_FRAME)
            .map(|i| (2.0 * PI * i as f32 / SAMPLES_PER_FRAME as f32).sin())
            .collect();
        Self {
            descriptor,
            sample_rate,
            envelope,
            sine,
        }
    }

    pub fn samples_per_symbol(&self) -> usize {
        self.envelope.len()
    }

    pub fn sample_count(&self, symbol_count: usize) -> usize {
        symbol_count * self.samples_per_symbol()
    }

    pub fn duration(&self, symbol_count: usize) -> Duration {
        Duration::from_secs_f64(self.sample_count(symbol_count) as f64 / self.sample_rate as f64)
    }

    /// Frequencies (Hz) sounded for a symbol, one per band
    pub fn tone_frequencies(&self, symbol: Symbol) -> Vec<f32> {
        let bands = self.descriptor.bands();
        (0..bands)
            .map(|band| {
                self.descriptor
                    .tone_frequency(band, symbol.nibble(band, bands) as usize, self.sample_rate)
            })
            .collect()
    }

    /// Render symbols at the given volume. Peak magnitude never exceeds
    /// `volume / 100`.
    pub fn synthesize(&self, symbols: &[Symbol], volume: u8) -> Result<Vec<f32>> {
        let peak = volume_to_amplitude(volume)?;
        if symbols.is_empty() {
            return Err(ModemError::SynthesisFailure("no symbols to render".to_string()));
        }

        let tone_amplitude = peak / self.descriptor.bands() as f32;
        let mut samples = vec![0.0f32; self.sample_count(symbols.len())];
        for (symbol, out) in symbols.iter().zip(samples.chunks_exact_mut(self.samples_per_symbol())) {
            self.render_symbol(*symbol, tone_amplitude, out);
        }
        Ok(samples)
    }

    /// Add one symbol to `out`, which must be one symbol long.
    pub fn render_symbol(&self, symbol: Symbol, tone_amplitude: f32, out: &mut [f32]) {
        let bands = self.descriptor.bands();
        for band in 0..bands {
            let bin = self.descriptor.tone_bin(band, symbol.nibble(band, bands) as usize);
            for (i, (sample, &weight)) in out.iter_mut().zip(&self.envelope).enumerate() {
                *sample += tone_amplitude * weight * self.sine[(bin * i) % SAMPLES_PER_FRAME];
            }
        }
    }
}
