//! Power-of-two real FFT wrapper shared by the HRTF kernel builder, the
//! reverb convolver and [`crate::node::AnalyserNode`].
//!
//! Wraps `realfft`'s real-to-complex planner behind a small API that speaks
//! in terms of magnitude/phase, since that is what HRTF kernel interpolation
//! and the analyser's frequency-domain getters need (spec §2, L2).

use std::sync::Arc;

use realfft::num_complex::Complex32;
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};

/// A forward/inverse real FFT pair for a fixed, power-of-two length.
///
/// Construction is not cheap (the planner builds twiddle factor tables), so
/// callers should build one `Fft` per distinct length they need and reuse it
/// across quanta rather than allocating one per call.
pub struct Fft {
    len: usize,
    forward: Arc<dyn RealToComplex<f32>>,
    inverse: Arc<dyn ComplexToReal<f32>>,
}

impl Fft {
    /// `len` must be a power of two (the partitioned convolver and HRTF
    /// kernels only ever build FFTs at power-of-two sizes).
    pub fn new(len: usize) -> Self {
        assert!(len.is_power_of_two(), "FFT length must be a power of two, got {}", len);
        let mut planner = RealFftPlanner::<f32>::new();
        Self {
            len,
            forward: planner.plan_fft_forward(len),
            inverse: planner.plan_fft_inverse(len),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Forward transform. `input` is zero-padded/truncated to `len` before
    /// the planner is invoked (it otherwise panics on a length mismatch).
    pub fn forward(&self, input: &[f32]) -> Vec<Complex32> {
        let mut buf = vec![0f32; self.len];
        let n = input.len().min(self.len);
        buf[..n].copy_from_slice(&input[..n]);

        let mut spectrum = self.forward.make_output_vec();
        self.forward.process(&mut buf, &mut spectrum).expect("forward FFT failed");
        spectrum
    }

    /// Inverse transform back to `len` real samples. `realfft`'s C2R plan
    /// scales by `len`, matching the un-normalized convention FFTConvolver
    /// partitioning expects (the caller divides by `len` once, not per
    /// partition).
    pub fn inverse(&self, spectrum: &[Complex32]) -> Vec<f32> {
        let mut spectrum = spectrum.to_vec();
        let mut out = self.inverse.make_output_vec();
        self.inverse.process(&mut spectrum, &mut out).expect("inverse FFT failed");
        let scale = 1.0 / self.len as f32;
        out.iter_mut().for_each(|s| *s *= scale);
        out
    }

    /// Frequency-domain multiply-accumulate: `acc += a * b`, used by the
    /// partitioned reverb convolver's per-stage overlap-add.
    pub fn multiply_add(acc: &mut [Complex32], a: &[Complex32], b: &[Complex32]) {
        for ((acc, a), b) in acc.iter_mut().zip(a.iter()).zip(b.iter()) {
            *acc += a * b;
        }
    }
}

/// Magnitude and unwrapped phase at each FFT bin, used by HRTF kernel
/// elevation interpolation (spec §4.8: interpolate by magnitude and
/// unwrapped phase, not by naive complex-linear interpolation, so that two
/// similar impulse responses interpolate without comb-filtering).
pub struct MagnitudePhase {
    pub magnitude: Vec<f32>,
    pub phase: Vec<f32>,
}

impl MagnitudePhase {
    pub fn from_spectrum(spectrum: &[Complex32]) -> Self {
        let mut magnitude = Vec::with_capacity(spectrum.len());
        let mut phase = Vec::with_capacity(spectrum.len());
        for c in spectrum {
            magnitude.push(c.norm());
            phase.push(c.arg());
        }
        unwrap_phase(&mut phase);
        Self { magnitude, phase }
    }

    /// Interpolate two magnitude/phase spectra with blend `x` in `[0, 1]`
    /// (0 = self, 1 = other) and reconstruct a complex spectrum.
    pub fn interpolate(&self, other: &Self, x: f32) -> Vec<Complex32> {
        self.magnitude
            .iter()
            .zip(&other.magnitude)
            .zip(self.phase.iter().zip(&other.phase))
            .map(|((m0, m1), (p0, p1))| {
                let mag = m0 + (m1 - m0) * x;
                let phase = p0 + (p1 - p0) * x;
                Complex32::from_polar(mag, phase)
            })
            .collect()
    }
}

/// Unwrap a phase sequence in place so that adjacent bins never jump by more
/// than pi (undoes the `atan2` wraparound before interpolating).
fn unwrap_phase(phase: &mut [f32]) {
    let two_pi = 2.0 * std::f32::consts::PI;
    let mut offset = 0.0;
    for i in 1..phase.len() {
        let mut delta = phase[i] + offset - phase[i - 1];
        while delta > std::f32::consts::PI {
            offset -= two_pi;
            delta -= two_pi;
        }
        while delta < -std::f32::consts::PI {
            offset += two_pi;
            delta += two_pi;
        }
        phase[i] += offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_inverse_roundtrip() {
        let fft = Fft::new(64);
        let mut input = vec![0f32; 64];
        input[0] = 1.0;
        input[5] = 0.5;

        let spectrum = fft.forward(&input);
        let output = fft.inverse(&spectrum);

        for (a, b) in input.iter().zip(output.iter()) {
            assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
        }
    }

    #[test]
    fn test_interpolate_at_endpoints_matches_inputs() {
        let fft = Fft::new(32);
        let mut a = vec![0f32; 32];
        a[1] = 1.0;
        let mut b = vec![0f32; 32];
        b[2] = 1.0;

        let spec_a = fft.forward(&a);
        let spec_b = fft.forward(&b);
        let mp_a = MagnitudePhase::from_spectrum(&spec_a);
        let mp_b = MagnitudePhase::from_spectrum(&spec_b);

        let at_zero = mp_a.interpolate(&mp_b, 0.0);
        let back = fft.inverse(&at_zero);
        for (x, y) in a.iter().zip(back.iter()) {
            assert!((x - y).abs() < 1e-3);
        }
    }

    #[test]
    fn test_unwrap_phase_removes_jumps() {
        let mut phase = vec![3.0, -3.0, 3.0, -3.0];
        unwrap_phase(&mut phase);
        for w in phase.windows(2) {
            assert!((w[1] - w[0]).abs() < std::f32::consts::PI + 1e-3);
        }
    }
}
