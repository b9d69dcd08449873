//! Input conditioning for recorded audio: channel down-mixing and linear
//! interpolation between sample rates.

use crate::error::{ModemError, Result};

/// Average interleaved channels down to mono.
///
/// # Arguments
/// * `samples` - Interleaved audio, `channels` samples per frame
/// * `channels` - Channel count, at least 1
pub fn downmix(samples: &[f32], channels: usize) -> Result<Vec<f32>> {
    if channels == 0 {
        return Err(ModemError::InvalidConfiguration("channel count must be at least 1".to_string()));
    }
    if samples.len() % channels != 0 {
        return Err(ModemError::InvalidConfiguration(format!(
            "{} samples do not divide into {} channels",
            samples.len(),
            channels
        )));
    }
    if channels == 1 {
        return Ok(samples.to_vec());
    }

    Ok(samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect())
}

/// Resample audio to a target sample rate using linear interpolation
///
/// # Example
/// ```
/// use datasound_core::resample::resample_linear;
///
/// let audio_44k = vec![0.0f32; 44100];
/// let audio_48k = resample_linear(&audio_44k, 44100.0, 48000.0);
/// assert_eq!(audio_48k.len(), 48000);
/// ```
pub fn resample_linear(samples: &[f32], from_rate: f32, to_rate: f32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let new_length = ((samples.len() as f64) * ratio).round() as usize;
    let mut resampled = Vec::with_capacity(new_length);

    for i in 0..new_length {
        let src = i as f64 / ratio;
        let floor = src.floor() as usize;
        let fraction = (src - floor as f64) as f32;

        let interpolated = match (samples.get(floor), samples.get(floor + 1)) {
            (Some(&a), Some(&b)) => a * (1.0 - fraction) + b * fraction,
            (Some(&a), None) => a,
            _ => samples[samples.len() - 1],
        };
        resampled.push(interpolated);
    }

    resampled
}
