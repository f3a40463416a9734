//! AudioDestinationNode: the terminal node of a context's render graph.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::{AudioContextRegistration, BaseAudioContext};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::AudioNode;

/// Represents the final audio destination and is what the user will ultimately hear.
///
/// Its render-side processor simply passes its (already up/down-mixed and summed) single input
/// through as its single output: all the real mixing work happens in the summing junction that
/// feeds its input, per spec §4.3.
pub struct DestinationNode {
    pub(crate) registration: AudioContextRegistration,
    pub(crate) channel_config: ChannelConfig,
}

impl AudioNode for DestinationNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }

    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }

    fn set_channel_count(&self, _v: usize) {
        panic!("cannot edit channel count of DestinationNode");
    }
    fn set_channel_count_mode(&self, _v: ChannelCountMode) {
        panic!("cannot edit channel count mode of DestinationNode");
    }
    fn set_channel_interpretation(&self, _v: ChannelInterpretation) {
        panic!("cannot edit channel interpretation of DestinationNode");
    }

    fn number_of_inputs(&self) -> u32 {
        1
    }
    fn number_of_outputs(&self) -> u32 {
        1
    }
}

impl DestinationNode {
    pub(crate) fn new(registration: AudioContextRegistration, channel_count: usize) -> Self {
        DestinationNode {
            registration,
            channel_config: ChannelConfigOptions {
                count: channel_count,
                mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Speakers,
            }
            .into(),
        }
    }

    pub(crate) fn register(context: &BaseAudioContext, channel_count: usize) -> Self {
        context.register(move |registration| {
            let node = DestinationNode::new(registration, channel_count);
            let render = DestinationRenderer;
            (node, Box::new(render))
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channel_config.count()
    }
}

struct DestinationRenderer;

impl AudioProcessor for DestinationRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        outputs[0] = inputs[0].clone();
    }

    fn tail_time(&self) -> bool {
        false
    }
}
