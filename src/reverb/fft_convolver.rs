//! `FftConvolver`: the numeric core of one partition's block convolution —
//! overlap-add of a `block_size`-sample input chunk against a fixed kernel,
//! grounded on the block-convolution step of LabSound's
//! `ReverbConvolverStage::processInBackground`/`process`.

use std::sync::Arc;

use realfft::num_complex::Complex32;

use crate::analysis::Fft;

/// Convolves successive `block_size`-sample input chunks against a fixed
/// kernel of at most `block_size` taps, via `fft_size = 2 * block_size`
/// overlap-add (the zero-padding avoids the circular wrap-around a naive
/// same-size FFT convolution would alias in).
pub struct FftConvolver {
    fft: Arc<Fft>,
    kernel_spectrum: Vec<Complex32>,
    block_size: usize,
}

impl FftConvolver {
    /// `fft` must be sized `2 * block_size`; `kernel` must be no longer
    /// than `block_size` taps (it is zero-padded by [`Fft::forward`]).
    pub fn new(fft: Arc<Fft>, kernel: &[f32], block_size: usize) -> Self {
        assert_eq!(fft.len(), block_size * 2, "fft size must be 2x the block size");
        assert!(kernel.len() <= block_size, "kernel must fit within one partition");
        let kernel_spectrum = fft.forward(kernel);
        Self {
            fft,
            kernel_spectrum,
            block_size,
        }
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Convolve one `block_size`-sample input chunk. Returns `2 *
    /// block_size` time-domain samples; the caller overlap-adds (scatter-
    /// adds) this into its own accumulator at the partition's delayed
    /// offset.
    pub fn process_block(&self, input_block: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input_block.len(), self.block_size);
        let spectrum = self.fft.forward(input_block);
        let mut product = vec![Complex32::default(); spectrum.len()];
        Fft::multiply_add(&mut product, &spectrum, &self.kernel_spectrum);
        self.fft.inverse(&product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_kernel_passes_input_through() {
        // a kernel that is a single unit impulse at tap 0 is the identity filter
        let block_size = 8;
        let fft = Arc::new(Fft::new(block_size * 2));
        let mut kernel = vec![0f32; block_size];
        kernel[0] = 1.0;
        let conv = FftConvolver::new(fft, &kernel, block_size);

        let input = vec![1.0, 2.0, -3.0, 4.0, 0.5, -0.5, 0.25, -0.25];
        let output = conv.process_block(&input);

        for (i, &x) in input.iter().enumerate() {
            assert!((output[i] - x).abs() < 1e-4, "sample {}: {} vs {}", i, output[i], x);
        }
    }

    #[test]
    fn test_delayed_impulse_kernel_shifts_output() {
        let block_size = 8;
        let fft = Arc::new(Fft::new(block_size * 2));
        let mut kernel = vec![0f32; block_size];
        kernel[2] = 1.0;
        let conv = FftConvolver::new(fft, &kernel, block_size);

        let mut input = vec![0f32; block_size];
        input[0] = 1.0;
        let output = conv.process_block(&input);

        assert!((output[2] - 1.0).abs() < 1e-4);
        assert!(output[0].abs() < 1e-4);
    }
}
