//! AnalyserNode: exposes time- and frequency-domain snapshots of the signal
//! passing through it, for visualisation or metering. Passes audio through
//! unmodified.

use std::sync::{Arc, Mutex};

use crate::alloc::AudioBuffer as Quantum;
use crate::analysis::Fft;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{SampleRate, RENDER_QUANTUM_SIZE};

use super::AudioNode;

/// Options for constructing an [`AnalyserNode`].
#[derive(Clone, Debug)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    pub smoothing_time_constant: f32,
    pub min_decibels: f64,
    pub max_decibels: f64,
    pub channel_config: ChannelConfigOptions,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            smoothing_time_constant: 0.8,
            min_decibels: -100.,
            max_decibels: -30.,
            channel_config: ChannelConfigOptions::default(),
        }
    }
}

/// Ring buffer of time-domain samples plus the smoothed frequency-domain
/// magnitudes, shared between the control-thread handle and the render
/// processor.
struct AnalyserState {
    time_domain: Vec<f32>,
    write_index: usize,
    frequency_db: Vec<f32>,
}

/// AudioNode giving real-time frequency and time-domain analysis of its
/// input, commonly used to drive a spectrum or waveform visualisation.
pub struct AnalyserNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    state: Arc<Mutex<AnalyserState>>,
    fft_size: usize,
    smoothing_time_constant: f32,
    min_decibels: f64,
    max_decibels: f64,
}

impl AudioNode for AnalyserNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }
    fn number_of_inputs(&self) -> u32 {
        1
    }
    fn number_of_outputs(&self) -> u32 {
        1
    }
}

impl AnalyserNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: AnalyserOptions) -> Self {
        assert!(
            options.fft_size.is_power_of_two() && (32..=32768).contains(&options.fft_size),
            "fftSize must be a power of two between 32 and 32768"
        );

        context.base().register(move |registration| {
            let state = Arc::new(Mutex::new(AnalyserState {
                time_domain: vec![0.; options.fft_size],
                write_index: 0,
                frequency_db: vec![options.min_decibels as f32; options.fft_size / 2],
            }));

            let node = AnalyserNode {
                registration,
                channel_config: options.channel_config.into(),
                state: state.clone(),
                fft_size: options.fft_size,
                smoothing_time_constant: options.smoothing_time_constant,
                min_decibels: options.min_decibels,
                max_decibels: options.max_decibels,
            };

            let render = AnalyserRenderer {
                state,
                fft: Fft::new(options.fft_size),
                fft_size: options.fft_size,
                smoothing_time_constant: options.smoothing_time_constant,
            };

            (node, Box::new(render))
        })
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn smoothing_time_constant(&self) -> f32 {
        self.smoothing_time_constant
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Copy the most recent time-domain samples (length `fft_size`) into
    /// `dest`, oldest first.
    pub fn get_float_time_domain_data(&self, dest: &mut [f32]) {
        let state = self.state.lock().unwrap();
        let n = state.time_domain.len();
        for (i, slot) in dest.iter_mut().enumerate().take(n) {
            let idx = (state.write_index + i) % n;
            *slot = state.time_domain[idx];
        }
    }

    /// Copy the current smoothed frequency-domain magnitudes, in dB, into
    /// `dest` (length `frequency_bin_count()`).
    pub fn get_float_frequency_data(&self, dest: &mut [f32]) {
        let state = self.state.lock().unwrap();
        let n = dest.len().min(state.frequency_db.len());
        dest[..n].copy_from_slice(&state.frequency_db[..n]);
    }

    pub fn min_decibels(&self) -> f64 {
        self.min_decibels
    }

    pub fn max_decibels(&self) -> f64 {
        self.max_decibels
    }
}

struct AnalyserRenderer {
    state: Arc<Mutex<AnalyserState>>,
    fft: Fft,
    fft_size: usize,
    smoothing_time_constant: f32,
}

impl AudioProcessor for AnalyserRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: crate::SampleRate,
    ) {
        let input = &inputs[0];
        outputs[0] = input.clone();

        // down-mix to mono for analysis, matching the single time/frequency
        // domain view the Web Audio API exposes per analyser.
        let channels = input.number_of_channels().max(1);
        let mut mono = [0f32; RENDER_QUANTUM_SIZE];
        for ch in 0..channels {
            let data = input.channel_data(ch).as_slice();
            for i in 0..RENDER_QUANTUM_SIZE {
                mono[i] += data[i] / channels as f32;
            }
        }

        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(_) => return,
        };

        let n = self.fft_size;
        for &sample in mono.iter() {
            state.time_domain[state.write_index] = sample;
            state.write_index = (state.write_index + 1) % n;
        }

        let windowed: Vec<f32> = {
            let mut buf = vec![0f32; n];
            for (i, slot) in buf.iter_mut().enumerate() {
                let idx = (state.write_index + i) % n;
                // Blackman window, matching the Web Audio API's default.
                let w = 0.42
                    - 0.5 * (2. * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos()
                    + 0.08 * (4. * std::f32::consts::PI * i as f32 / (n - 1) as f32).cos();
                *slot = state.time_domain[idx] * w;
            }
            buf
        };

        let spectrum = self.fft.forward(&windowed);
        let bins = n / 2;
        let smoothing = self.smoothing_time_constant;

        for (i, bin) in spectrum.iter().take(bins).enumerate() {
            let magnitude = bin.norm() / n as f32;
            let db = if magnitude > 0. {
                20. * magnitude.log10()
            } else {
                -1000.
            };
            let prev = state.frequency_db[i];
            state.frequency_db[i] = smoothing * prev + (1. - smoothing) * db;
        }
    }

    fn tail_time(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OfflineAudioContext;

    #[test]
    fn test_factory_defaults() {
        let context = OfflineAudioContext::new(1, 128, SampleRate(44_100));
        let analyser = context.create_analyser();
        assert_eq!(analyser.fft_size(), 2048);
        assert_eq!(analyser.frequency_bin_count(), 1024);
    }

    #[test]
    fn test_passes_signal_through_unmodified() {
        let mut renderer = AnalyserRenderer {
            state: Arc::new(Mutex::new(AnalyserState {
                time_domain: vec![0.; 32],
                write_index: 0,
                frequency_db: vec![-100.; 16],
            })),
            fft: Fft::new(32),
            fft_size: 32,
            smoothing_time_constant: 0.8,
        };

        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice()[0] = 0.7;
        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();

        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        assert!((outputs[0].channel_data(0).as_slice()[0] - 0.7).abs() < 1e-6);
    }
}
