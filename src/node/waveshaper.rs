//! WaveShaperNode: applies a non-linear distortion curve to the signal, with
//! optional oversampling to reduce the aliasing that a sharp curve produces.

use std::sync::{Arc, Mutex};

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{RENDER_QUANTUM_SIZE, SampleRate};

use super::AudioNode;

/// The amount of oversampling applied before the curve lookup, trading CPU
/// for reduced aliasing on sharp curves.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OverSampleType {
    None,
    X2,
    X4,
}

impl Default for OverSampleType {
    fn default() -> Self {
        OverSampleType::None
    }
}

impl OverSampleType {
    fn factor(self) -> usize {
        match self {
            OverSampleType::None => 1,
            OverSampleType::X2 => 2,
            OverSampleType::X4 => 4,
        }
    }
}

type SharedCurve = Arc<Mutex<Option<Arc<Vec<f32>>>>>;

/// Options for constructing a [`WaveShaperNode`].
#[derive(Clone)]
pub struct WaveShaperOptions {
    pub curve: Option<Vec<f32>>,
    pub oversample: OverSampleType,
    pub channel_config: ChannelConfigOptions,
}

impl Default for WaveShaperOptions {
    fn default() -> Self {
        Self {
            curve: None,
            oversample: OverSampleType::None,
            channel_config: ChannelConfigOptions::default(),
        }
    }
}

/// AudioNode applying a non-linear shaping curve, used for distortion effects.
pub struct WaveShaperNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    curve: SharedCurve,
    oversample: OverSampleType,
}

impl AudioNode for WaveShaperNode {
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

impl WaveShaperNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: WaveShaperOptions) -> Self {
        context.base().register(move |registration| {
            let curve: SharedCurve = Arc::new(Mutex::new(options.curve.clone().map(Arc::new)));

            let node = WaveShaperNode {
                registration,
                channel_config: options.channel_config.into(),
                curve: curve.clone(),
                oversample: options.oversample,
            };

            let render = WaveShaperRenderer {
                curve,
                cached_curve: None,
                oversample: options.oversample,
                upsample_history: Vec::new(),
            };

            (node, Box::new(render))
        })
    }

    pub fn set_curve(&self, curve: Vec<f32>) {
        *self.curve.lock().unwrap() = Some(Arc::new(curve));
    }

    pub fn oversample(&self) -> OverSampleType {
        self.oversample
    }
}

struct WaveShaperRenderer {
    curve: SharedCurve,
    cached_curve: Option<Arc<Vec<f32>>>,
    oversample: OverSampleType,
    /// last input sample per channel, carried across quanta so the linear
    /// upsampler has a left-hand point at the start of each quantum.
    upsample_history: Vec<f32>,
}

/// Look up `x` (expected in `[-1, 1]`) in `curve` by linearly interpolating
/// between the two nearest of its `N` equally-spaced sample points, mapping
/// `x = -1` to index 0 and `x = 1` to index `N - 1`.
fn shape(curve: &[f32], x: f32) -> f32 {
    if curve.len() < 2 {
        return curve.first().copied().unwrap_or(x);
    }
    let n = curve.len();
    let pos = ((x + 1.0) * 0.5 * (n - 1) as f32).clamp(0., (n - 1) as f32);
    let i0 = pos.floor() as usize;
    let i1 = (i0 + 1).min(n - 1);
    let frac = pos - pos.floor();
    curve[i0] * (1. - frac) + curve[i1] * frac
}

impl AudioProcessor for WaveShaperRenderer {
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

        if self.cached_curve.is_none() {
            if let Ok(guard) = self.curve.try_lock() {
                self.cached_curve = guard.clone();
            }
        }

        let channels = input.number_of_channels().max(1);
        output.set_number_of_channels(channels);

        if self.upsample_history.len() != channels {
            self.upsample_history = vec![0.; channels];
        }

        let curve = match &self.cached_curve {
            Some(c) => c.as_slice(),
            None => {
                // an un-set curve is the identity function, per the Web Audio API.
                output
                    .channels_mut()
                    .iter_mut()
                    .zip(input.channels())
                    .for_each(|(o, i)| o.copy_from_slice(i.as_slice()));
                return;
            }
        };

        let factor = self.oversample.factor();

        for ch in 0..channels {
            let in_slice = input.channel_data(ch).as_slice();
            let out_slice = output.channel_data_mut(ch).as_mut_slice();
            let mut prev = self.upsample_history[ch];

            if factor == 1 {
                for i in 0..RENDER_QUANTUM_SIZE {
                    out_slice[i] = shape(curve, in_slice[i]);
                }
            } else {
                // Oversample by linear upsampling, shaping at the higher rate,
                // then averaging back down (a cheap decimation low-pass).
                // This is a simplification: true oversampling would use a
                // dedicated band-limited interpolator.
                for i in 0..RENDER_QUANTUM_SIZE {
                    let cur = in_slice[i];
                    let mut acc = 0.;
                    for k in 0..factor {
                        let t = (k + 1) as f32 / factor as f32;
                        let up = prev * (1. - t) + cur * t;
                        acc += shape(curve, up);
                    }
                    out_slice[i] = acc / factor as f32;
                    prev = cur;
                }
            }

            self.upsample_history[ch] = in_slice[RENDER_QUANTUM_SIZE - 1];
        }
    }

    fn tail_time(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_curve_passes_through() {
        assert!((shape(&[-1., 0., 1.], 0.5) - 0.5).abs() < 1e-4);
        assert!((shape(&[-1., 0., 1.], -1.0) - (-1.0)).abs() < 1e-4);
        assert!((shape(&[-1., 0., 1.], 1.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_no_curve_is_passthrough() {
        let mut renderer = WaveShaperRenderer {
            curve: Arc::new(Mutex::new(None)),
            cached_curve: None,
            oversample: OverSampleType::None,
            upsample_history: Vec::new(),
        };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice()[0] = 0.42;
        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();

        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        assert!((outputs[0].channel_data(0).as_slice()[0] - 0.42).abs() < 1e-4);
    }
}
