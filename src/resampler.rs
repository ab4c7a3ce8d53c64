use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio_processor::Waveform;
use crate::error::ClassifyError;

/// Converts a waveform to another sample rate.
pub trait Resample: Send + Sync {
    fn resample(&self, waveform: Waveform, target_rate: u32) -> Result<Waveform, ClassifyError>;
}

const CHUNK_SIZE: usize = 1024;
const SINC_LEN: usize = 256;
const F_CUTOFF: f32 = 0.95;
const OVERSAMPLING_FACTOR: usize = 256;

/// Band-limited sinc resampler built on rubato's `SincFixedIn`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SincResampler;

fn sinc_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: SINC_LEN,
        f_cutoff: F_CUTOFF,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: OVERSAMPLING_FACTOR,
        window: WindowFunction::BlackmanHarris2,
    }
}

impl Resample for SincResampler {
    fn resample(&self, waveform: Waveform, target_rate: u32) -> Result<Waveform, ClassifyError> {
        let source_rate = waveform.sample_rate;
        if source_rate == 0 || target_rate == 0 {
            return Err(ClassifyError::Resample(format!(
                "invalid sample rate: {source_rate} Hz -> {target_rate} Hz"
            )));
        }
        if source_rate == target_rate || waveform.is_empty() {
            return Ok(Waveform::new(waveform.samples, target_rate));
        }

        let ratio = f64::from(target_rate) / f64::from(source_rate);
        let mut resampler =
            SincFixedIn::<f32>::new(ratio, 1.0, sinc_parameters(), CHUNK_SIZE, 1)
                .map_err(|e| ClassifyError::Resample(format!("init: {e}")))?;

        // Leading output is filter warm-up; it is dropped below.
        let delay = resampler.output_delay();
        let expected = (waveform.len() as f64 * ratio).round() as usize;
        let mut output: Vec<f32> = Vec::with_capacity(expected + delay + CHUNK_SIZE);

        let mut chunks = waveform.samples.chunks_exact(CHUNK_SIZE);
        for chunk in &mut chunks {
            let input = [chunk];
            let resampled = resampler
                .process(&input[..], None)
                .map_err(|e| ClassifyError::Resample(format!("process: {e}")))?;
            output.extend_from_slice(&resampled[0]);
        }

        let remainder = chunks.remainder();
        if !remainder.is_empty() {
            let input = [remainder];
            let resampled = resampler
                .process_partial(Some(&input[..]), None)
                .map_err(|e| ClassifyError::Resample(format!("process tail: {e}")))?;
            output.extend_from_slice(&resampled[0]);
        }

        while output.len() < expected + delay {
            let resampled = resampler
                .process_partial::<&[f32]>(None, None)
                .map_err(|e| ClassifyError::Resample(format!("flush: {e}")))?;
            if resampled[0].is_empty() {
                break;
            }
            output.extend_from_slice(&resampled[0]);
        }

        output.drain(..delay.min(output.len()));
        output.truncate(expected);

        Ok(Waveform::new(output, target_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine(freq: f32, rate: u32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
    }

    #[test]
    fn same_rate_is_sample_for_sample_identity() {
        let samples = sine(440.0, 16_000, 16_000);
        let out = SincResampler
            .resample(Waveform::new(samples.clone(), 16_000), 16_000)
            .unwrap();
        assert_eq!(out.sample_rate, 16_000);
        assert_eq!(out.samples, samples);
    }

    #[test]
    fn downsample_48k_to_16k_preserves_length_ratio() {
        let out = SincResampler
            .resample(Waveform::new(sine(440.0, 48_000, 48_000), 48_000), 16_000)
            .unwrap();
        assert_eq!(out.sample_rate, 16_000);
        assert_eq!(out.len(), 16_000);
    }

    #[test]
    fn upsample_8k_to_16k_doubles_length() {
        let out = SincResampler
            .resample(Waveform::new(sine(300.0, 8_000, 4_000), 8_000), 16_000)
            .unwrap();
        assert_eq!(out.len(), 8_000);
    }

    #[test]
    fn tone_energy_survives_resampling() {
        let out = SincResampler
            .resample(Waveform::new(sine(440.0, 44_100, 44_100), 44_100), 16_000)
            .unwrap();
        let middle = &out.samples[2_000..14_000];
        let level = rms(middle);
        assert!((level - std::f32::consts::FRAC_1_SQRT_2).abs() < 0.05, "rms {level}");
    }

    #[test]
    fn zero_source_rate_is_rejected() {
        let err = SincResampler
            .resample(Waveform::new(vec![0.0; 100], 0), 16_000)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Resample(_)));
    }

    #[test]
    fn zero_target_rate_is_rejected() {
        let err = SincResampler
            .resample(Waveform::new(vec![0.0; 100], 44_100), 0)
            .unwrap_err();
        assert!(matches!(err, ClassifyError::Resample(_)));
    }
}
