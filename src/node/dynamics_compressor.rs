//! DynamicsCompressorNode: a feedforward dynamic range compressor with a
//! soft knee, reducing the output level of the signal once it crosses a
//! threshold.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{RENDER_QUANTUM_SIZE, SampleRate};

use super::AudioNode;

/// Options for constructing a [`DynamicsCompressorNode`].
#[derive(Clone, Debug)]
pub struct DynamicsCompressorOptions {
    pub threshold: f32,
    pub knee: f32,
    pub ratio: f32,
    pub attack: f32,
    pub release: f32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for DynamicsCompressorOptions {
    fn default() -> Self {
        Self {
            threshold: -24.,
            knee: 30.,
            ratio: 12.,
            attack: 0.003,
            release: 0.25,
            channel_config: ChannelConfigOptions::default(),
        }
    }
}

/// AudioNode providing a dynamics compression effect.
pub struct DynamicsCompressorNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    threshold: AudioParam,
    knee: AudioParam,
    ratio: AudioParam,
    attack: AudioParam,
    release: AudioParam,
}

impl AudioNode for DynamicsCompressorNode {
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

impl DynamicsCompressorNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: DynamicsCompressorOptions) -> Self {
        context.base().register(move |registration| {
            let k_rate = |default_value, min_value, max_value| AudioParamOptions {
                default_value,
                min_value,
                max_value,
                automation_rate: AutomationRate::K,
            };

            let (threshold, threshold_id) = context.create_audio_param(
                k_rate(options.threshold, -100., 0.),
                registration.id(),
            );
            let (knee, knee_id) =
                context.create_audio_param(k_rate(options.knee, 0., 40.), registration.id());
            let (ratio, ratio_id) =
                context.create_audio_param(k_rate(options.ratio, 1., 20.), registration.id());
            let (attack, attack_id) =
                context.create_audio_param(k_rate(options.attack, 0., 1.), registration.id());
            let (release, release_id) =
                context.create_audio_param(k_rate(options.release, 0., 1.), registration.id());

            let node = DynamicsCompressorNode {
                registration,
                channel_config: options.channel_config.into(),
                threshold,
                knee,
                ratio,
                attack,
                release,
            };

            let render = DynamicsCompressorRenderer {
                threshold: threshold_id,
                knee: knee_id,
                ratio: ratio_id,
                attack: attack_id,
                release: release_id,
                envelope_db: -100.,
            };

            (node, Box::new(render))
        })
    }

    pub fn threshold(&self) -> &AudioParam {
        &self.threshold
    }
    pub fn knee(&self) -> &AudioParam {
        &self.knee
    }
    pub fn ratio(&self) -> &AudioParam {
        &self.ratio
    }
    pub fn attack(&self) -> &AudioParam {
        &self.attack
    }
    pub fn release(&self) -> &AudioParam {
        &self.release
    }
}

struct DynamicsCompressorRenderer {
    threshold: AudioParamId,
    knee: AudioParamId,
    ratio: AudioParamId,
    attack: AudioParamId,
    release: AudioParamId,
    /// one-pole envelope follower state, in dB (shared across channels,
    /// driven by the loudest channel each sample, matching the Web Audio
    /// API's single reduction curve applied uniformly to all channels).
    envelope_db: f32,
}

impl DynamicsCompressorRenderer {
    /// Static input/output curve in dB: below `threshold` unity, above it
    /// compressed by `ratio` with a soft knee of width `knee` centered on
    /// the threshold.
    fn curve_db(input_db: f32, threshold: f32, knee: f32, ratio: f32) -> f32 {
        if input_db < threshold - knee / 2. {
            input_db
        } else if input_db < threshold + knee / 2. {
            // quadratic interpolation through the knee, continuous in value
            // and slope at both knee boundaries.
            let x = input_db - threshold + knee / 2.;
            input_db + (1. / ratio - 1.) * x * x / (2. * knee)
        } else {
            threshold + (input_db - threshold) / ratio
        }
    }
}

impl AudioProcessor for DynamicsCompressorRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        params: AudioParamValues,
        _timestamp: f64,
        sample_rate: SampleRate,
    ) {
        let input = &inputs[0];
        let output = &mut outputs[0];

        let channels = input.number_of_channels().max(1);
        output.set_number_of_channels(channels);

        let sr = sample_rate.0 as f32;
        let threshold = params.get_scalar(&self.threshold);
        let knee = params.get_scalar(&self.knee).max(0.);
        let ratio = params.get_scalar(&self.ratio).max(1.);
        let attack = params.get_scalar(&self.attack).max(1e-4);
        let release = params.get_scalar(&self.release).max(1e-4);

        let attack_coeff = (-1.0 / (attack * sr)).exp();
        let release_coeff = (-1.0 / (release * sr)).exp();

        for i in 0..RENDER_QUANTUM_SIZE {
            let peak = (0..channels)
                .map(|ch| input.channel_data(ch).as_slice()[i].abs())
                .fold(0_f32, f32::max);
            let input_db = if peak > 0. { 20. * peak.log10() } else { -1000. };

            if input_db > self.envelope_db {
                self.envelope_db = attack_coeff * self.envelope_db + (1. - attack_coeff) * input_db;
            } else {
                self.envelope_db =
                    release_coeff * self.envelope_db + (1. - release_coeff) * input_db;
            }

            let target_db = Self::curve_db(self.envelope_db, threshold, knee, ratio);
            let reduction_db = target_db - self.envelope_db;
            let gain = 10f32.powf(reduction_db / 20.);

            for ch in 0..channels {
                let s = input.channel_data(ch).as_slice()[i];
                output.channel_data_mut(ch).as_mut_slice()[i] = s * gain;
            }
        }
    }

    fn tail_time(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_curve_below_threshold_is_unity() {
        let out = DynamicsCompressorRenderer::curve_db(-40., -24., 30., 12.);
        assert!((out - (-40.)).abs() < 1e-4);
    }

    #[test]
    fn test_curve_above_threshold_is_compressed() {
        let out = DynamicsCompressorRenderer::curve_db(0., -24., 0., 12.);
        let expected = -24. + (0. - (-24.)) / 12.;
        assert!((out - expected).abs() < 1e-3);
    }

    #[test]
    fn test_loud_signal_is_attenuated_over_time() {
        let mut renderer = DynamicsCompressorRenderer {
            threshold: AudioParamId(0),
            knee: AudioParamId(1),
            ratio: AudioParamId(2),
            attack: AudioParamId(3),
            release: AudioParamId(4),
            envelope_db: -100.,
        };
        let mut values = std::collections::HashMap::new();
        values.insert(AudioParamId(0), [-24.; RENDER_QUANTUM_SIZE]);
        values.insert(AudioParamId(1), [30.; RENDER_QUANTUM_SIZE]);
        values.insert(AudioParamId(2), [12.; RENDER_QUANTUM_SIZE]);
        values.insert(AudioParamId(3), [0.003; RENDER_QUANTUM_SIZE]);
        values.insert(AudioParamId(4), [0.25; RENDER_QUANTUM_SIZE]);

        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 0.9);
        let mut outputs = vec![Quantum::new(1)];

        for _ in 0..50 {
            renderer.process(
                &[input.clone()],
                &mut outputs,
                AudioParamValues::new(&values),
                0.,
                SampleRate(44_100),
            );
        }

        let last_out = outputs[0].channel_data(0).as_slice()[RENDER_QUANTUM_SIZE - 1];
        assert!(last_out.abs() < 0.9);
    }
}
