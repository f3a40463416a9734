//! StereoPannerNode: equal-power stereo panning, the cheap non-HRTF sibling of PannerNode.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::AudioNode;

/// Options for constructing a [`StereoPannerNode`].
#[derive(Clone, Debug)]
pub struct StereoPannerOptions {
    pub pan: f32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for StereoPannerOptions {
    fn default() -> Self {
        Self {
            pan: 0.,
            channel_config: ChannelConfigOptions {
                count: 2,
                mode: ChannelCountMode::ClampedMax,
                interpretation: ChannelInterpretation::Speakers,
            },
        }
    }
}

/// AudioNode for equal-power panning of a mono or stereo input to a stereo output.
pub struct StereoPannerNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    pan: AudioParam,
}

impl AudioNode for StereoPannerNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }
    fn set_channel_count(&self, v: usize) {
        if v > 2 {
            panic!("StereoPannerNode channel count cannot exceed 2");
        }
        self.channel_config_raw().set_count(v)
    }
    fn number_of_inputs(&self) -> u32 {
        1
    }
    fn number_of_outputs(&self) -> u32 {
        1
    }
}

impl StereoPannerNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: StereoPannerOptions) -> Self {
        context.base().register(move |registration| {
            let (pan, pan_id) = context.create_audio_param(
                AudioParamOptions {
                    default_value: options.pan,
                    min_value: -1.,
                    max_value: 1.,
                    automation_rate: AutomationRate::A,
                },
                registration.id(),
            );

            let node = StereoPannerNode {
                registration,
                channel_config: options.channel_config.into(),
                pan,
            };

            let render = StereoPannerRenderer { pan: pan_id };

            (node, Box::new(render))
        })
    }

    pub fn pan(&self) -> &AudioParam {
        &self.pan
    }
}

struct StereoPannerRenderer {
    pan: AudioParamId,
}

impl AudioProcessor for StereoPannerRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        let input = &inputs[0];
        let output = &mut outputs[0];
        output.set_number_of_channels(2);

        let pans = params.get(&self.pan);
        let mono = input.number_of_channels() == 1;

        let (l_out, r_out) = {
            let mut l = [0f32; crate::RENDER_QUANTUM_SIZE];
            let mut r = [0f32; crate::RENDER_QUANTUM_SIZE];
            for i in 0..crate::RENDER_QUANTUM_SIZE {
                let pan = pans[i].clamp(-1., 1.);

                let (in_l, in_r) = if mono {
                    let s = input.channel_data(0).as_slice()[i];
                    (s, s)
                } else {
                    (
                        input.channel_data(0).as_slice()[i],
                        input.channel_data(1).as_slice()[i],
                    )
                };

                // equal-power panning law, per the Web Audio API StereoPannerNode spec.
                let x = if mono { (pan + 1.) / 2. } else if pan <= 0. { pan + 1. } else { pan };
                let angle = x * std::f32::consts::FRAC_PI_2;
                let (gain_l, gain_r) = (angle.cos(), angle.sin());

                if mono {
                    l[i] = in_l * gain_l;
                    r[i] = in_r * gain_r;
                } else if pan <= 0. {
                    l[i] = in_l + in_r * (1. - gain_r);
                    r[i] = in_r * gain_r;
                } else {
                    l[i] = in_l * gain_l;
                    r[i] = in_r + in_l * (1. - gain_l);
                }
            }
            (l, r)
        };

        output.channel_data_mut(0).as_mut_slice().copy_from_slice(&l_out);
        output.channel_data_mut(1).as_mut_slice().copy_from_slice(&r_out);
    }

    fn tail_time(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mono_hard_left_silences_right() {
        let mut renderer = StereoPannerRenderer { pan: AudioParamId(0) };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 1.0);

        let mut outputs = vec![Quantum::new(2)];
        let mut values = std::collections::HashMap::new();
        values.insert(AudioParamId(0), [-1.0; crate::RENDER_QUANTUM_SIZE]);

        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        assert!(outputs[0].channel_data(1).as_slice()[0].abs() < 1e-5);
        assert!((outputs[0].channel_data(0).as_slice()[0] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_mono_center_equal_power() {
        let mut renderer = StereoPannerRenderer { pan: AudioParamId(0) };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 1.0);

        let mut outputs = vec![Quantum::new(2)];
        let mut values = std::collections::HashMap::new();
        values.insert(AudioParamId(0), [0.0; crate::RENDER_QUANTUM_SIZE]);

        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        let l = outputs[0].channel_data(0).as_slice()[0];
        let r = outputs[0].channel_data(1).as_slice()[0];
        assert!((l - r).abs() < 1e-5);
        assert!((l - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    }
}
