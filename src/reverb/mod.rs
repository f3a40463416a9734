//! The partitioned FFT convolution reverb engine behind
//! [`crate::node::ConvolverNode`] (spec §3 `ReverbConvolver`, §4.9).
//!
//! An impulse response is split into geometrically growing partitions
//! (`Q, Q, 2Q, 2Q, 4Q, 4Q, ...`, capped at [`DEFAULT_MAX_FFT_SIZE`]/2 per
//! partition). The first, smallest partition is convolved directly in the
//! time domain; the rest are block-convolved in the frequency domain via
//! [`stage::ReverbConvolverStage`]. Partitions whose impulse-response offset
//! exceeds [`DEFAULT_REALTIME_FRAME_LIMIT`] run on a background worker
//! thread (`background::BackgroundWorker`) instead of inline on the render
//! thread, so a long reverb tail does not blow the render budget.
//!
//! Grounded on LabSound's `ReverbConvolver`/`ReverbConvolverStage`.

mod background;
mod fft_convolver;
mod stage;

use std::sync::Arc;

use crate::analysis::Fft;
use crate::RENDER_QUANTUM_SIZE;

use background::BackgroundWorker;
use stage::ReverbConvolverStage;

/// Default cap on a single partition's FFT size (LabSound's `MaxFFTSize`).
pub const DEFAULT_MAX_FFT_SIZE: usize = 32768;
/// Partitions whose impulse-response offset is past this many frames are
/// pushed to the background worker (spec §4.9).
pub const DEFAULT_REALTIME_FRAME_LIMIT: usize = 12288;

/// Scatter-add `samples` into `ring` starting at `start` (reduced mod
/// `ring_len`), wrapping around the end of the ring as needed.
pub(crate) fn scatter_add(ring: &mut [f32], ring_len: usize, start: usize, samples: &[f32]) {
    let mut pos = start % ring_len;
    for &s in samples {
        ring[pos] += s;
        pos += 1;
        if pos == ring_len {
            pos = 0;
        }
    }
}

/// One channel's worth of a mono-in/mono-out partitioned convolution
/// against a fixed impulse response. [`crate::node::ConvolverNode`] owns one
/// per output channel it renders (e.g. two for a stereo impulse response
/// panned against a mono or stereo input).
pub struct ReverbConvolver {
    foreground_stages: Vec<ReverbConvolverStage>,
    background: Option<BackgroundWorker>,

    ring: Vec<f32>,
    ring_len: usize,
    cursor: usize,
}

impl ReverbConvolver {
    /// Build a convolver for a single-channel impulse response, with the
    /// default max FFT size and real-time frame limit.
    pub fn new(impulse: &[f32]) -> Self {
        Self::with_limits(impulse, DEFAULT_MAX_FFT_SIZE, DEFAULT_REALTIME_FRAME_LIMIT)
    }

    pub fn with_limits(impulse: &[f32], max_fft_size: usize, realtime_frame_limit: usize) -> Self {
        let max_partition_size = (max_fft_size / 2).max(RENDER_QUANTUM_SIZE);

        let mut foreground_stages = Vec::new();
        let mut background_stages = Vec::new();

        let mut offset = 0usize;
        let mut partition_size = RENDER_QUANTUM_SIZE;
        let mut repeats_at_size = 0u32;
        let mut first = true;

        while offset < impulse.len() || first {
            if impulse.is_empty() {
                break;
            }
            let size = partition_size.min(max_partition_size);
            let end = (offset + size).min(impulse.len());
            let taps = &impulse[offset..end];
            let background = offset >= realtime_frame_limit;

            let stage = if first {
                ReverbConvolverStage::new_direct(taps.to_vec(), background)
            } else {
                let fft_size = (size * 2).next_power_of_two();
                let fft = Arc::new(Fft::new(fft_size));
                ReverbConvolverStage::new_fft(fft, taps, size, offset, background)
            };

            if background {
                background_stages.push(stage);
            } else {
                foreground_stages.push(stage);
            }

            offset += size;
            first = false;

            repeats_at_size += 1;
            if repeats_at_size >= 2 && partition_size < max_partition_size {
                partition_size *= 2;
                repeats_at_size = 0;
            }
        }

        // generous headroom so a scatter-add from a stage near the end of
        // the impulse response never collides with samples not yet read
        // out by the current quantum.
        let ring_len = (impulse.len() + max_fft_size * 2).next_power_of_two().max(RENDER_QUANTUM_SIZE * 4);

        let background = if background_stages.is_empty() {
            None
        } else {
            Some(BackgroundWorker::spawn(background_stages, ring_len))
        };

        Self {
            foreground_stages,
            background,
            ring: vec![0.; ring_len],
            ring_len,
            cursor: 0,
        }
    }

    /// Process one render quantum of mono input, returning the same number
    /// of samples of (wet) convolved output. Never blocks: the background
    /// worker hand-off and read-back are both non-blocking `try_lock`s.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        debug_assert_eq!(input.len(), RENDER_QUANTUM_SIZE);

        for stage in self.foreground_stages.iter_mut() {
            for output in stage.feed(input) {
                scatter_add(&mut self.ring, self.ring_len, output.start, &output.samples);
            }
        }

        if let Some(worker) = &self.background {
            worker.push_input(input);
        }

        let mut out = vec![0f32; input.len()];
        let mut pos = self.cursor;
        for sample in out.iter_mut() {
            *sample = self.ring[pos];
            self.ring[pos] = 0.;
            pos = (pos + 1) % self.ring_len;
        }

        if let Some(worker) = &self.background {
            if let Some(tail) = worker.take_output(self.cursor, input.len()) {
                for (o, t) in out.iter_mut().zip(tail.iter()) {
                    *o += t;
                }
            }
        }

        self.cursor = pos;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_impulse_kernel_is_identity() {
        let mut ir = vec![0f32; RENDER_QUANTUM_SIZE];
        ir[0] = 1.0;
        let mut convolver = ReverbConvolver::new(&ir);

        let mut input = vec![0f32; RENDER_QUANTUM_SIZE];
        input[5] = 0.5;
        input[10] = -0.25;

        let output = convolver.process(&input);
        for (i, (&x, &y)) in input.iter().zip(output.iter()).enumerate() {
            assert!((x - y).abs() < 1e-4, "sample {}: {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_silence_in_silence_out() {
        let ir = vec![1.0, 0.5, 0.25, 0.125];
        let mut convolver = ReverbConvolver::new(&ir);

        let input = vec![0f32; RENDER_QUANTUM_SIZE];
        for _ in 0..4 {
            let output = convolver.process(&input);
            assert!(output.iter().all(|&s| s.abs() < 1e-6));
        }
    }

    #[test]
    fn test_long_impulse_spans_multiple_partitions() {
        // long enough to exercise at least one FFT partition beyond the
        // direct-convolved first stage.
        let mut ir = vec![0f32; RENDER_QUANTUM_SIZE * 3];
        ir[0] = 1.0;
        ir[RENDER_QUANTUM_SIZE + 2] = 0.5;

        let mut convolver = ReverbConvolver::new(&ir);
        let mut impulse_in = vec![0f32; RENDER_QUANTUM_SIZE];
        impulse_in[0] = 1.0;

        let mut all_out = Vec::new();
        for i in 0..6 {
            let input = if i == 0 {
                impulse_in.clone()
            } else {
                vec![0f32; RENDER_QUANTUM_SIZE]
            };
            all_out.extend(convolver.process(&input));
        }

        assert!((all_out[0] - 1.0).abs() < 1e-3);
        assert!((all_out[RENDER_QUANTUM_SIZE + 2] - 0.5).abs() < 1e-3);
    }
}
