//! Sample-rate normalisation of waveform channels.

use crate::error::{ConvertError, Result};
use crate::utils::decode_wave;

/// Resamples `samples` from `from_hz` to `to_hz` by linear interpolation
///
/// The output holds `round(len * to_hz / from_hz)` samples, rounded and
/// saturated to the 16-bit range.
pub fn resample_linear(samples: &[i16], from_hz: f64, to_hz: f64) -> Vec<i16> {
    if from_hz == to_hz || samples.is_empty() {
        return samples.to_vec();
    }

    let out_len = (samples.len() as f64 * to_hz / from_hz).round() as usize;
    let step = from_hz / to_hz;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let idx = (pos.floor() as usize).min(last);
            let frac = pos - idx as f64;
            let a = samples[idx] as f64;
            let b = samples[(idx + 1).min(last)] as f64;
            let v = (a + (b - a) * frac).round();
            v.clamp(i16::MIN as f64, i16::MAX as f64) as i16
        })
        .collect()
}

/// Brings a channel to the session's target rate
#[derive(Debug, Clone, Copy)]
pub struct WaveResampler {
    target_rate: f64,
}

impl WaveResampler {
    pub fn new(target_rate: f64) -> Result<Self> {
        if !(target_rate > 0.0) || !target_rate.is_finite() {
            return Err(ConvertError::InvalidSampleRate(target_rate));
        }
        Ok(WaveResampler { target_rate })
    }

    pub fn target_rate(&self) -> f64 {
        self.target_rate
    }

    /// Decodes the comma-separated sample text and resamples it when needed
    pub fn decode(&self, text: &str, native_rate: f64) -> Result<Vec<i16>> {
        let samples = decode_wave(text)?;
        self.normalize(samples, native_rate)
    }

    pub fn normalize(&self, samples: Vec<i16>, native_rate: f64) -> Result<Vec<i16>> {
        if native_rate == self.target_rate {
            return Ok(samples);
        }
        if !(native_rate > 0.0) || !native_rate.is_finite() {
            return Err(ConvertError::InvalidSampleRate(native_rate));
        }
        Ok(resample_linear(&samples, native_rate, self.target_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_when_rates_match() {
        let samples = vec![3, -7, 12, 32767, -32768];
        assert_eq!(resample_linear(&samples, 240.0, 240.0), samples);

        let resampler = WaveResampler::new(240.0).unwrap();
        assert_eq!(resampler.decode("3,-7,12", 240.0).unwrap(), vec![3, -7, 12]);
    }

    #[test]
    fn test_upsample_doubles_length() {
        let out = resample_linear(&[0, 10, 20, 30], 120.0, 240.0);
        assert_eq!(out, vec![0, 5, 10, 15, 20, 25, 30, 30]);
    }

    #[test]
    fn test_downsample_halves_length() {
        let out = resample_linear(&[0, 10, 20, 30, 40, 50], 240.0, 120.0);
        assert_eq!(out, vec![0, 20, 40]);
    }

    #[test]
    fn test_invalid_rates() {
        assert!(WaveResampler::new(0.0).is_err());
        let resampler = WaveResampler::new(240.0).unwrap();
        assert!(resampler.normalize(vec![1, 2], 0.0).is_err());
    }
}
