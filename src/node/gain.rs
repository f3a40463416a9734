//! GainNode: scales an audio signal by a (possibly automated) factor.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::AudioNode;

/// Options for constructing a [`GainNode`].
#[derive(Clone, Debug)]
pub struct GainOptions {
    pub gain: f32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for GainOptions {
    fn default() -> Self {
        Self {
            gain: 1.,
            channel_config: ChannelConfigOptions::default(),
        }
    }
}

/// AudioNode for volume control.
pub struct GainNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    gain: AudioParam,
}

impl AudioNode for GainNode {
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

impl GainNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: GainOptions) -> Self {
        context.base().register(move |registration| {
            let param_opts = AudioParamOptions {
                default_value: options.gain,
                min_value: f32::MIN,
                max_value: f32::MAX,
                automation_rate: AutomationRate::A,
            };
            let (param, proc_id) = context.create_audio_param(param_opts, registration.id());

            let node = GainNode {
                registration,
                channel_config: options.channel_config.into(),
                gain: param,
            };

            let render = GainRenderer { gain: proc_id, last_mix_gain: options.gain };

            (node, Box::new(render))
        })
    }

    pub fn gain(&self) -> &AudioParam {
        &self.gain
    }
}

struct GainRenderer {
    gain: AudioParamId,
    last_mix_gain: f32,
}

impl AudioProcessor for GainRenderer {
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
        let values = params.get(&self.gain);

        let constant = values.iter().all(|&v| v == values[0]);
        if constant {
            output.copy_with_gain_from(input, &mut self.last_mix_gain, values[0]);
        } else {
            output.copy_with_sample_accurate_gain_values_from(input, values);
            self.last_mix_gain = *values.last().unwrap();
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
    fn test_gain_constant_applies_immediately() {
        let id = AudioParamId(0);
        let mut renderer = GainRenderer { gain: id, last_mix_gain: 1.0 };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 1.0);

        let mut outputs = vec![Quantum::new(1)];
        let mut values_map = std::collections::HashMap::new();
        values_map.insert(id, [0.5; crate::RENDER_QUANTUM_SIZE]);

        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values_map),
            0.,
            SampleRate(44_100),
        );

        assert_eq!(outputs[0].channel_data(0).as_slice()[0], 0.5);
    }

    #[test]
    fn test_gain_node_factory() {
        let context = OfflineAudioContext::new(1, 128, SampleRate(44_100));
        let gain = context.create_gain();
        assert_eq!(gain.gain().value(), 1.0);
    }
}
