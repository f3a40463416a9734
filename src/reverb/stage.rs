//! `ReverbConvolverStage`: one partition of the impulse response. The first,
//! smallest partition is convolved directly in the time domain (cheap enough
//! not to need an FFT and avoids adding latency); every later partition is
//! block-convolved in the frequency domain via [`super::fft_convolver::FftConvolver`].
//! Grounded on LabSound's `ReverbConvolverStage`.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::analysis::Fft;

use super::fft_convolver::FftConvolver;

/// One completed block of a stage's output, to be scatter-added into the
/// convolver's shared accumulation ring at `start` (an absolute sample
/// offset counted from the start of the convolution, not yet reduced modulo
/// the ring length — the caller does that).
pub struct StageOutput {
    pub start: usize,
    pub samples: Vec<f32>,
}

enum Kernel {
    /// time-domain taps plus a sliding window of the most recent inputs.
    Direct { taps: Vec<f32>, history: VecDeque<f32> },
    Fft(FftConvolver),
}

pub struct ReverbConvolverStage {
    kernel: Kernel,
    /// sample offset of this partition within the impulse response; zero
    /// for the direct stage (it introduces no extra delay).
    offset: usize,
    /// input samples per convolution block (taps.len() for Direct).
    block_size: usize,
    /// samples not yet forming a complete block (Fft kernel only).
    input_accum: Vec<f32>,
    /// total raw input samples fed to this stage so far.
    samples_consumed: usize,
    /// whether this partition is processed by the background worker rather
    /// than inline on the render thread (spec §4.9: partitions past the
    /// real-time frame limit).
    pub background: bool,
}

impl ReverbConvolverStage {
    pub fn new_direct(taps: Vec<f32>, background: bool) -> Self {
        let block_size = taps.len();
        Self {
            kernel: Kernel::Direct {
                taps,
                history: VecDeque::with_capacity(block_size),
            },
            offset: 0,
            block_size,
            input_accum: Vec::new(),
            samples_consumed: 0,
            background,
        }
    }

    pub fn new_fft(fft: Arc<Fft>, taps: &[f32], block_size: usize, offset: usize, background: bool) -> Self {
        Self {
            kernel: Kernel::Fft(FftConvolver::new(fft, taps, block_size)),
            offset,
            block_size,
            input_accum: Vec::with_capacity(block_size),
            samples_consumed: 0,
            background,
        }
    }

    /// Feed a chunk of raw input (any length — the render thread calls this
    /// with one quantum at a time, the background worker may call it with a
    /// larger batch) and return every output block the chunk completed.
    pub fn feed(&mut self, chunk: &[f32]) -> Vec<StageOutput> {
        match &mut self.kernel {
            Kernel::Direct { taps, history } => {
                let mut out = Vec::with_capacity(chunk.len());
                for &x in chunk {
                    history.push_back(x);
                    if history.len() > taps.len() {
                        history.pop_front();
                    }
                    let len = history.len();
                    let mut acc = 0f32;
                    for k in 0..len {
                        acc += taps[k] * history[len - 1 - k];
                    }
                    out.push(acc);
                }
                let start = self.samples_consumed;
                self.samples_consumed += chunk.len();
                vec![StageOutput { start, samples: out }]
            }
            Kernel::Fft(conv) => {
                self.input_accum.extend_from_slice(chunk);
                let mut outputs = Vec::new();
                while self.input_accum.len() >= self.block_size {
                    let block: Vec<f32> = self.input_accum.drain(..self.block_size).collect();
                    let samples = conv.process_block(&block);
                    let start = self.samples_consumed + self.offset;
                    self.samples_consumed += self.block_size;
                    outputs.push(StageOutput { start, samples });
                }
                outputs
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_stage_impulse_response() {
        let mut stage = ReverbConvolverStage::new_direct(vec![1.0, 0.5, 0.25], false);
        let input = [1.0, 0.0, 0.0, 0.0, 0.0];
        let outputs = stage.feed(&input);
        assert_eq!(outputs.len(), 1);
        let y = &outputs[0].samples;
        assert!((y[0] - 1.0).abs() < 1e-6);
        assert!((y[1] - 0.5).abs() < 1e-6);
        assert!((y[2] - 0.25).abs() < 1e-6);
        assert!(y[3].abs() < 1e-6);
    }

    #[test]
    fn test_fft_stage_emits_one_block_per_full_chunk() {
        let block_size = 8;
        let fft = Arc::new(Fft::new(block_size * 2));
        let taps = vec![1.0; block_size];
        let mut stage = ReverbConvolverStage::new_fft(fft, &taps, block_size, 16, false);

        let half = vec![0.1f32; 4];
        assert!(stage.feed(&half).is_empty());
        let outputs = stage.feed(&half);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].start, 16);
        assert_eq!(outputs[0].samples.len(), block_size * 2);
    }
}
