//! ChannelSplitterNode: exposes each input channel as a separate mono output.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::AudioNode;

/// Options for constructing a [`ChannelSplitterNode`].
pub struct ChannelSplitterOptions {
    pub number_of_outputs: u32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for ChannelSplitterOptions {
    fn default() -> Self {
        Self {
            number_of_outputs: 6,
            channel_config: ChannelConfigOptions {
                count: 6, // must match number_of_outputs
                mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Discrete,
            },
        }
    }
}

/// AudioNode for accessing the individual channels of an audio stream in the routing graph.
pub struct ChannelSplitterNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
}

impl AudioNode for ChannelSplitterNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }

    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }

    fn set_channel_count(&self, _v: usize) {
        panic!("cannot edit channel count of ChannelSplitterNode");
    }
    fn set_channel_count_mode(&self, _v: ChannelCountMode) {
        panic!("cannot edit channel count mode of ChannelSplitterNode");
    }
    fn set_channel_interpretation(&self, _v: ChannelInterpretation) {
        panic!("cannot edit channel interpretation of ChannelSplitterNode");
    }

    fn number_of_inputs(&self) -> u32 {
        1
    }
    fn number_of_outputs(&self) -> u32 {
        self.channel_count() as _
    }
}

impl ChannelSplitterNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, mut options: ChannelSplitterOptions) -> Self {
        context.base().register(move |registration| {
            options.channel_config.count = options.number_of_outputs as _;

            let node = ChannelSplitterNode {
                registration,
                channel_config: options.channel_config.into(),
            };

            let render = ChannelSplitterRenderer {
                number_of_outputs: node.channel_count(),
            };

            (node, Box::new(render))
        })
    }
}

struct ChannelSplitterRenderer {
    number_of_outputs: usize,
}

impl AudioProcessor for ChannelSplitterRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        let input = &inputs[0];
        debug_assert_eq!(self.number_of_outputs, outputs.len());

        for (i, output) in outputs.iter_mut().enumerate() {
            output.set_number_of_channels(1);
            if i < input.number_of_channels() {
                *output.channel_data_mut(0) = input.channel_data(i).clone();
            } else {
                output.make_silent();
            }
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
    fn test_splitter_routes_channels() {
        let mut renderer = ChannelSplitterRenderer { number_of_outputs: 2 };
        let mut input = Quantum::new(2);
        input.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        input.channel_data_mut(1).as_mut_slice()[0] = 2.0;

        let mut outputs = vec![Quantum::new(1), Quantum::new(1)];
        let values = std::collections::HashMap::new();
        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        assert_eq!(outputs[0].channel_data(0).as_slice()[0], 1.0);
        assert_eq!(outputs[1].channel_data(0).as_slice()[0], 2.0);
    }

    #[test]
    fn test_splitter_in_context() {
        let context = OfflineAudioContext::new(1, 128, SampleRate(44_100));
        use crate::context::AsBaseAudioContext;
        let splitter = context.create_channel_splitter(6);
        assert_eq!(splitter.number_of_outputs(), 6);
    }
}
