//! ConstantSourceNode: a source that outputs a constant (automatable) value forever.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::control::Scheduler;
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::{AudioNode, AudioScheduledSourceNode};

/// Options for constructing a [`ConstantSourceNode`].
#[derive(Clone, Debug)]
pub struct ConstantSourceOptions {
    pub offset: f32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for ConstantSourceOptions {
    fn default() -> Self {
        Self {
            offset: 1.,
            channel_config: ChannelConfigOptions::default(),
        }
    }
}

/// AudioNode that emits a fixed, automatable value on all of its output samples.
pub struct ConstantSourceNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    offset: AudioParam,
    scheduler: Scheduler,
}

impl AudioNode for ConstantSourceNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }
    fn number_of_inputs(&self) -> u32 {
        0
    }
    fn number_of_outputs(&self) -> u32 {
        1
    }
}

impl AudioScheduledSourceNode for ConstantSourceNode {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl ConstantSourceNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: ConstantSourceOptions) -> Self {
        context.base().register(move |registration| {
            let param_opts = AudioParamOptions {
                default_value: options.offset,
                min_value: f32::MIN,
                max_value: f32::MAX,
                automation_rate: AutomationRate::A,
            };
            let (param, proc_id) = context.create_audio_param(param_opts, registration.id());
            let scheduler = Scheduler::new();

            let node = ConstantSourceNode {
                registration,
                channel_config: options.channel_config.into(),
                offset: param,
                scheduler: scheduler.clone(),
            };

            let render = ConstantSourceRenderer { offset: proc_id, scheduler };

            (node, Box::new(render))
        })
    }

    pub fn offset(&self) -> &AudioParam {
        &self.offset
    }
}

struct ConstantSourceRenderer {
    offset: AudioParamId,
    scheduler: Scheduler,
}

impl AudioProcessor for ConstantSourceRenderer {
    fn process(
        &mut self,
        _inputs: &[Quantum],
        outputs: &mut [Quantum],
        params: AudioParamValues,
        timestamp: f64,
        sample_rate: SampleRate,
    ) {
        let output = &mut outputs[0];
        output.set_number_of_channels(1);

        let quantum_duration = crate::RENDER_QUANTUM_SIZE as f64 / sample_rate.0 as f64;
        if !self.scheduler.is_active(timestamp) && !self.scheduler.is_active(timestamp + quantum_duration) {
            output.make_silent();
            return;
        }

        let values = params.get(&self.offset);
        output.channel_data_mut(0).as_mut_slice().copy_from_slice(values);
    }

    fn tail_time(&self) -> bool {
        false
    }
}
