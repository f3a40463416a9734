//! ConvolverNode: applies linear convolution against a loaded impulse
//! response, producing effects ranging from room reverberation to cabinet
//! simulation. The heavy lifting (partitioned FFT convolution, background
//! worker for long tails) lives in [`crate::reverb::ReverbConvolver`]
//! (spec §3 `ReverbConvolver`, §4.9); this node owns one convolver per
//! output channel and handles the impulse-response normalization and
//! input/output channel mapping the Web Audio API specifies at the
//! interface (spec §6 `ConvolverNode{impulse, normalize}`).

use std::sync::{Arc, Mutex};

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{AudioBuffer, ChannelConfig, ChannelConfigOptions, ChannelCountMode};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::reverb::ReverbConvolver;
use crate::{RENDER_QUANTUM_SIZE, SampleRate};

use super::AudioNode;

/// Below this RMS power an impulse response is treated as silent for
/// normalization purposes, to avoid dividing by (near) zero. Matches the
/// `minPower` floor used by the Web Audio API's reference normalization
/// algorithm.
const MIN_POWER: f32 = 0.000_125;
/// Calibration constant from the same algorithm, tuned so a "typical" room
/// impulse response normalizes to a comfortable listening level.
const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44_100.;

/// Compute the scale factor [`ConvolverNode::set_buffer`] applies when
/// `normalize` is enabled: inverse RMS power across all channels, calibrated
/// so the result sounds consistent across impulse responses of differing
/// duration and level, and compensated for a `sample_rate` that differs from
/// the 44.1kHz the calibration constant was tuned against.
fn normalization_scale(buffer: &AudioBuffer) -> f32 {
    let channels = buffer.number_of_channels().max(1);
    let len = buffer.sample_len().max(1);

    let mut sum_of_squares = 0f32;
    for ch in 0..buffer.number_of_channels() {
        for &s in buffer.channel_data(ch).as_slice() {
            sum_of_squares += s * s;
        }
    }

    let power = (sum_of_squares / (channels * len) as f32).sqrt().max(MIN_POWER);
    let mut scale = GAIN_CALIBRATION / power;
    scale *= GAIN_CALIBRATION_SAMPLE_RATE / buffer.sample_rate().0 as f32;
    scale
}

/// Options for constructing a [`ConvolverNode`].
#[derive(Clone)]
pub struct ConvolverOptions {
    pub buffer: Option<AudioBuffer>,
    /// Whether to normalize the impulse response on load so that differently
    /// recorded impulse responses produce comparable output levels.
    pub normalize: bool,
    pub channel_config: ChannelConfigOptions,
}

impl Default for ConvolverOptions {
    fn default() -> Self {
        Self {
            buffer: None,
            normalize: true,
            channel_config: ChannelConfigOptions {
                count: 2,
                mode: ChannelCountMode::ClampedMax,
                ..ChannelConfigOptions::default()
            },
        }
    }
}

type SharedBuffer = Arc<Mutex<Option<Arc<AudioBuffer>>>>;

/// AudioNode applying linear convolution against a fixed impulse response
/// (spec's `ReverbConvolver`, wrapped as a user-facing effect).
pub struct ConvolverNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    buffer: SharedBuffer,
    normalize: Arc<std::sync::atomic::AtomicBool>,
}

impl AudioNode for ConvolverNode {
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

impl ConvolverNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: ConvolverOptions) -> Self {
        context.base().register(move |registration| {
            let normalize = Arc::new(std::sync::atomic::AtomicBool::new(options.normalize));
            let buffer: SharedBuffer = Arc::new(Mutex::new(
                options
                    .buffer
                    .map(|b| Arc::new(normalize_if_needed(b, options.normalize))),
            ));

            let node = ConvolverNode {
                registration,
                channel_config: options.channel_config.into(),
                buffer: buffer.clone(),
                normalize: normalize.clone(),
            };

            let render = ConvolverRenderer {
                buffer,
                cached_buffer: None,
                convolvers: Vec::new(),
            };

            (node, Box::new(render) as Box<dyn AudioProcessor>)
        })
    }

    pub fn normalize(&self) -> bool {
        self.normalize.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_normalize(&self, value: bool) {
        self.normalize.store(value, std::sync::atomic::Ordering::Release);
    }

    /// Load (or replace) the impulse response. Normalization, if enabled, is
    /// applied once here rather than per-quantum.
    pub fn set_buffer(&self, buffer: AudioBuffer) {
        let normalize = self.normalize();
        *self.buffer.lock().unwrap() = Some(Arc::new(normalize_if_needed(buffer, normalize)));
    }
}

fn normalize_if_needed(mut buffer: AudioBuffer, normalize: bool) -> AudioBuffer {
    if !normalize {
        return buffer;
    }
    let scale = normalization_scale(&buffer);
    buffer.modify_channels(|channel| {
        for s in channel.as_mut_slice() {
            *s *= scale;
        }
    });
    buffer
}

struct ConvolverRenderer {
    buffer: SharedBuffer,
    cached_buffer: Option<Arc<AudioBuffer>>,
    /// one convolver per output channel, built lazily once the impulse
    /// response arrives (mono IR: every channel reuses IR channel 0; stereo
    /// IR: channel `c` convolves against IR channel `c`).
    convolvers: Vec<ReverbConvolver>,
}

impl AudioProcessor for ConvolverRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        let input = &inputs[0];
        let output = &mut outputs[0];

        if self.cached_buffer.is_none() {
            if let Ok(guard) = self.buffer.try_lock() {
                if let Some(buf) = guard.clone() {
                    let ir_channels = buf.number_of_channels().max(1).min(2);
                    self.convolvers = (0..ir_channels)
                        .map(|ch| ReverbConvolver::new(buf.channel_data(ch.min(buf.number_of_channels() - 1)).as_slice()))
                        .collect();
                    self.cached_buffer = Some(buf);
                }
            }
        }

        let buffer = match &self.cached_buffer {
            Some(b) => b,
            None => {
                output.make_silent();
                return;
            }
        };

        let out_channels = buffer.number_of_channels().max(1).min(2);
        output.set_number_of_channels(out_channels);

        let in_channels = input.number_of_channels().max(1);
        for (ch, convolver) in self.convolvers.iter_mut().enumerate() {
            let src_ch = ch.min(in_channels - 1);
            let mut mono = [0f32; RENDER_QUANTUM_SIZE];
            mono.copy_from_slice(input.channel_data(src_ch).as_slice());
            let wet = convolver.process(&mono);
            output.channel_data_mut(ch).as_mut_slice().copy_from_slice(&wet);
        }
    }

    fn tail_time(&self) -> bool {
        // the convolution ring can still hold non-silent samples for the
        // length of the impulse response after the input goes silent.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_buffer(len: usize, peak: usize, channels: usize) -> AudioBuffer {
        let mut channel_data = vec![0f32; len];
        channel_data[peak] = 1.0;
        AudioBuffer::from_channels(
            vec![crate::buffer::ChannelData::from(channel_data); channels],
            SampleRate(44_100),
        )
    }

    #[test]
    fn test_identity_impulse_is_passthrough() {
        let buffer = impulse_buffer(RENDER_QUANTUM_SIZE, 0, 1);
        let mut renderer = ConvolverRenderer {
            buffer: Arc::new(Mutex::new(Some(Arc::new(normalize_if_needed(buffer, false))))),
            cached_buffer: None,
            convolvers: Vec::new(),
        };

        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice()[5] = 0.5;
        input.channel_data_mut(0).as_mut_slice()[10] = -0.25;

        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();
        renderer.process(
            &[input.clone()],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        let out = outputs[0].channel_data(0).as_slice();
        let src = input.channel_data(0).as_slice();
        for (a, b) in out.iter().zip(src.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_no_buffer_is_silent() {
        let mut renderer = ConvolverRenderer {
            buffer: Arc::new(Mutex::new(None)),
            cached_buffer: None,
            convolvers: Vec::new(),
        };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();
        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );
        assert!(outputs[0].is_silent());
    }

    #[test]
    fn test_normalization_scales_by_inverse_rms() {
        let buffer = impulse_buffer(256, 0, 1);
        let scale = normalization_scale(&buffer);
        assert!(scale.is_finite());
        assert!(scale > 0.);
    }

    #[test]
    fn test_stereo_impulse_produces_stereo_output() {
        let buffer = impulse_buffer(RENDER_QUANTUM_SIZE, 0, 2);
        let mut renderer = ConvolverRenderer {
            buffer: Arc::new(Mutex::new(Some(Arc::new(normalize_if_needed(buffer, false))))),
            cached_buffer: None,
            convolvers: Vec::new(),
        };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();
        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );
        assert_eq!(outputs[0].number_of_channels(), 2);
    }
}
