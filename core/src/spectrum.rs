//! Per-band tone energy over one symbol-length window
//!
//! Tone `bin` of a protocol with `frames` frames per symbol lands exactly on
//! FFT bin `bin * frames` of a symbol-length transform. Tone energy sums that
//! bin and its two neighbours; each band then reports the share of its total
//! energy held by every tone.

use std::sync::Arc;

use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::{ModemError, Result};
use crate::protocol::ProtocolDescriptor;
use crate::symbol_codec::Symbol;
use crate::synth::{raised_cosine_window, taper_length};
use crate::{MIN_BAND_ENERGY, TONES_PER_BAND};

/// Analysis window taper ratio for demodulator signal conditioning.
const ANALYSIS_TAPER_RATIO: f32 = 0.06;

/// Minimum taper window used on the demodulator input.
const ANALYSIS_MIN_TAPER_SAMPLES: usize = 32;

/// Tone energy fractions for one window, `TONES_PER_BAND` per band.
#[derive(Debug, Clone, PartialEq)]
pub struct BandEnergies {
    bands: usize,
    fractions: Vec<f32>,
}

impl BandEnergies {
    /// Normalise raw tone energies band by band. Bands with no energy report
    /// zero for every tone.
    pub fn from_tone_energies(bands: usize, mut energies: Vec<f32>) -> Self {
        energies.resize(bands * TONES_PER_BAND, 0.0);
        for band in energies.chunks_exact_mut(TONES_PER_BAND) {
            let total: f32 = band.iter().sum();
            if total > MIN_BAND_ENERGY {
                band.iter_mut().for_each(|e| *e /= total);
            } else {
                band.iter_mut().for_each(|e| *e = 0.0);
            }
        }
        Self {
            bands,
            fractions: energies,
        }
    }

    pub fn silent(bands: usize) -> Self {
        Self {
            bands,
            fractions: vec![0.0; bands * TONES_PER_BAND],
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    pub fn fraction(&self, band: usize, nibble: usize) -> f32 {
        self.fractions[band * TONES_PER_BAND + nibble]
    }

    /// Strongest tone of a band and its fraction; ties go to the lower nibble
    pub fn best(&self, band: usize) -> (u8, f32) {
        let tones = &self.fractions[band * TONES_PER_BAND..(band + 1) * TONES_PER_BAND];
        let mut best = (0u8, tones[0]);
        for (nibble, &fraction) in tones.iter().enumerate().skip(1) {
            if fraction > best.1 {
                best = (nibble as u8, fraction);
            }
        }
        best
    }

    /// Hard decision: the strongest tone in every band
    pub fn symbol(&self) -> Symbol {
        let nibbles: Vec<u8> = (0..self.bands).map(|band| self.best(band).0).collect();
        Symbol::from_nibbles(&nibbles)
    }

    /// Mean fraction of the expected tone across bands
    pub fn score(&self, expected: Symbol) -> f32 {
        let total: f32 = (0..self.bands)
            .map(|band| self.fraction(band, expected.nibble(band, self.bands) as usize))
            .sum();
        total / self.bands as f32
    }
}

pub struct SpectrumAnalyzer {
    bands: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    window: Vec<f32>,
    input: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    /// FFT bin of every (band, nibble) tone
    tone_bins: Vec<usize>,
}

impl SpectrumAnalyzer {
    pub fn new(descriptor: &ProtocolDescriptor) -> Self {
        let len = descriptor.samples_per_symbol();
        let mut planner = RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(len);
        let input = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        let scratch = fft.make_scratch_vec();
        let frames = descriptor.frames_per_symbol;
        let tone_bins = (0..descriptor.bands())
            .flat_map(|band| (0..TONES_PER_BAND).map(move |nibble| descriptor.tone_bin(band, nibble) * frames))
            .collect();

        Self {
            bands: descriptor.bands(),
            fft,
            window: raised_cosine_window(len, taper_length(len, ANALYSIS_TAPER_RATIO, ANALYSIS_MIN_TAPER_SAMPLES)),
            input,
            spectrum,
            scratch,
            tone_bins,
        }
    }

    pub fn window_len(&self) -> usize {
        self.window.len()
    }

    /// Analyse exactly one symbol's worth of samples.
    pub fn analyze(&mut self, samples: &[f32]) -> Result<BandEnergies> {
        if samples.len() != self.window.len() {
            return Err(ModemError::Spectrum(format!(
                "window holds {} samples, expected {}",
                samples.len(),
                self.window.len()
            )));
        }

        // Remove DC and taper the edges before the transform
        let mean = samples.iter().sum::<f32>() / samples.len() as f32;
        for ((dst, &sample), &weight) in self.input.iter_mut().zip(samples).zip(&self.window) {
            *dst = (sample - mean) * weight;
        }

        self.fft
            .process_with_scratch(&mut self.input, &mut self.spectrum, &mut self.scratch)
            .map_err(|e| ModemError::Spectrum(format!("FFT processing failed: {:?}", e)))?;

        let last = self.spectrum.len() - 1;
        let energies = self
            .tone_bins
            .iter()
            .map(|&bin| {
                self.spectrum[bin.saturating_sub(1)..=(bin + 1).min(last)]
                    .iter()
                    .map(|c| c.norm_sqr())
                    .sum::<f32>()
            })
            .collect();

        Ok(BandEnergies::from_tone_energies(self.bands, energies))
    }
}
