//! ChannelMergerNode: combines channels from multiple inputs into one output.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::AudioNode;

/// Options for constructing a [`ChannelMergerNode`].
pub struct ChannelMergerOptions {
    pub number_of_inputs: u32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for ChannelMergerOptions {
    fn default() -> Self {
        Self {
            number_of_inputs: 6,
            channel_config: ChannelConfigOptions {
                count: 1,
                mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Speakers,
            },
        }
    }
}

/// AudioNode for combining channels from multiple audio streams into a single audio stream.
pub struct ChannelMergerNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    number_of_inputs: u32,
}

impl AudioNode for ChannelMergerNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }

    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }

    fn set_channel_count(&self, _v: usize) {
        panic!("cannot edit channel count of ChannelMergerNode");
    }
    fn set_channel_count_mode(&self, v: ChannelCountMode) {
        if v != ChannelCountMode::Explicit {
            panic!("ChannelMergerNode channel count mode must be Explicit");
        }
    }

    fn number_of_inputs(&self) -> u32 {
        self.number_of_inputs
    }
    fn number_of_outputs(&self) -> u32 {
        1
    }
}

impl ChannelMergerNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, mut options: ChannelMergerOptions) -> Self {
        if options.number_of_inputs == 0 {
            panic!("ChannelMergerNode requires at least one input");
        }

        context.base().register(move |registration| {
            options.channel_config.count = 1;
            let number_of_inputs = options.number_of_inputs;

            let node = ChannelMergerNode {
                registration,
                channel_config: options.channel_config.into(),
                number_of_inputs,
            };

            let render = ChannelMergerRenderer { number_of_inputs };

            (node, Box::new(render))
        })
    }
}

struct ChannelMergerRenderer {
    number_of_inputs: u32,
}

impl AudioProcessor for ChannelMergerRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        debug_assert_eq!(self.number_of_inputs as usize, inputs.len());

        let output = &mut outputs[0];
        output.set_number_of_channels(inputs.len());
        for (i, input) in inputs.iter().enumerate() {
            output.channel_data_mut(i).copy_from_slice(input.channel_data(0).as_slice());
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
    fn test_merger_stacks_channels() {
        let mut renderer = ChannelMergerRenderer { number_of_inputs: 2 };
        let mut in0 = Quantum::new(1);
        in0.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        let mut in1 = Quantum::new(1);
        in1.channel_data_mut(0).as_mut_slice()[0] = 2.0;

        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();
        renderer.process(
            &[in0, in1],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        assert_eq!(outputs[0].number_of_channels(), 2);
        assert_eq!(outputs[0].channel_data(0).as_slice()[0], 1.0);
        assert_eq!(outputs[0].channel_data(1).as_slice()[0], 2.0);
    }
}
