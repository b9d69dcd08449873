//! PCM byte conversion
//!
//! Floats in [-1, 1] map to the integer formats with saturation; values past
//! full scale clamp instead of wrapping.

use crate::config::SampleFormat;

pub fn encoded_len(sample_count: usize, format: SampleFormat) -> usize {
    sample_count * format.bytes_per_sample()
}

/// Write `samples` into `out`, returning the bytes written. Stops early if
/// `out` is too short for every sample.
pub fn write_samples(samples: &[f32], format: SampleFormat, out: &mut [u8]) -> usize {
    let width = format.bytes_per_sample();
    let mut written = 0;
    for (&sample, dst) in samples.iter().zip(out.chunks_exact_mut(width)) {
        let x = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
        match format {
            SampleFormat::U8 => dst[0] = (x * 127.0 + 128.0).round() as u8,
            SampleFormat::I8 => dst[0] = (x * 127.0).round() as i8 as u8,
            SampleFormat::U16 => {
                dst.copy_from_slice(&((x * 32767.0 + 32768.0).round() as u16).to_le_bytes())
            }
            SampleFormat::I16 => dst.copy_from_slice(&((x * 32767.0).round() as i16).to_le_bytes()),
            SampleFormat::F32 => dst.copy_from_slice(&x.to_le_bytes()),
        }
        written += width;
    }
    written
}

pub fn encode_samples(samples: &[f32], format: SampleFormat) -> Vec<u8> {
    let mut out = vec![0u8; encoded_len(samples.len(), format)];
    write_samples(samples, format, &mut out);
    out
}

/// Decode whole samples; a trailing partial sample is ignored.
pub fn decode_samples(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    bytes
        .chunks_exact(format.bytes_per_sample())
        .map(|b| match format {
            SampleFormat::U8 => (b[0] as f32 - 128.0) / 128.0,
            SampleFormat::I8 => b[0] as i8 as f32 / 128.0,
            SampleFormat::U16 => (u16::from_le_bytes([b[0], b[1]]) as f32 - 32768.0) / 32768.0,
            SampleFormat::I16 => i16::from_le_bytes([b[0], b[1]]) as f32 / 32768.0,
            SampleFormat::F32 => f32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        })
        .collect()
}

/// Turns arbitrarily split byte chunks into samples, carrying partial
/// samples over to the next chunk.
#[derive(Debug, Clone)]
pub struct SampleReader {
    format: SampleFormat,
    pending: Vec<u8>,
}

impl SampleReader {
    pub fn new(format: SampleFormat) -> Self {
        Self {
            format,
            pending: Vec::with_capacity(format.bytes_per_sample()),
        }
    }

    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Bytes held back waiting for the rest of a sample
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<f32> {
        let width = self.format.bytes_per_sample();
        if self.pending.is_empty() && bytes.len() % width == 0 {
            return decode_samples(bytes, self.format);
        }
        self.pending.extend_from_slice(bytes);
        let whole = self.pending.len() / width * width;
        let samples = decode_samples(&self.pending[..whole], self.format);
        self.pending.drain(..whole);
        samples
    }

    pub fn reset(&mut self) {
        self.pending.clear();
    }
}
