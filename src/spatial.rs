//! The `AudioListener`: the nine automatable coordinates (position, forward
//! and up vectors) that describe the position and orientation of the person
//! listening to the audio scene, consumed by every [`crate::node::PannerNode`].
//!
//! `AudioListener` is constructed once, up front, by `BaseAudioContext::new`
//! to avoid a cyclic Context<->Node reference (see the comment there); a
//! fresh handle is produced on every call to `AsBaseAudioContext::listener`
//! from the [`AudioParamRaw`] parts stashed on the context.

use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::{AudioContextRegistration, BaseAudioContext};
use crate::param::{audio_param_pair, AudioParam, AudioParamOptions, AudioParamRaw, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use crate::alloc::AudioBuffer as Quantum;
use crate::node::AudioNode;

/// The nine coordinate `AudioParamRaw`s backing an `AudioListener`, stashed
/// on the context so a fresh [`AudioListener`] can be handed out on demand.
#[derive(Clone)]
pub struct AudioListenerParams {
    pub position_x: AudioParamRaw,
    pub position_y: AudioParamRaw,
    pub position_z: AudioParamRaw,
    pub forward_x: AudioParamRaw,
    pub forward_y: AudioParamRaw,
    pub forward_z: AudioParamRaw,
    pub up_x: AudioParamRaw,
    pub up_y: AudioParamRaw,
    pub up_z: AudioParamRaw,
}

/// Position and orientation of the listener in 3D space, used by
/// [`crate::node::PannerNode`] to compute azimuth/elevation for spatialized
/// sources.
///
/// The default orientation faces down the negative z-axis with positive y up,
/// matching the Web Audio API's defaults.
pub struct AudioListener {
    pub position_x: AudioParam,
    pub position_y: AudioParam,
    pub position_z: AudioParam,
    pub forward_x: AudioParam,
    pub forward_y: AudioParam,
    pub forward_z: AudioParam,
    pub up_x: AudioParam,
    pub up_y: AudioParam,
    pub up_z: AudioParam,
}

/// The graph node standing in for the `AudioListener`: nine inputs, one per
/// coordinate param (each itself a node, connected here so its value is
/// evaluated sample-accurately), passed straight through as nine outputs that
/// `connect_listener_to_panner` wires into every `PannerNode`'s hidden inputs.
pub struct AudioListenerNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    position_x: AudioParam,
    position_y: AudioParam,
    position_z: AudioParam,
    forward_x: AudioParam,
    forward_y: AudioParam,
    forward_z: AudioParam,
    up_x: AudioParam,
    up_y: AudioParam,
    up_z: AudioParam,
}

impl AudioNode for AudioListenerNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }
    fn number_of_inputs(&self) -> u32 {
        9
    }
    fn number_of_outputs(&self) -> u32 {
        9
    }
}

fn coordinate_param(
    context: &BaseAudioContext,
    listener_id: &crate::context::AudioNodeId,
    default_value: f32,
    input: u32,
) -> AudioParam {
    let opts = AudioParamOptions {
        default_value,
        min_value: f32::MIN,
        max_value: f32::MAX,
        automation_rate: AutomationRate::A,
    };

    let param = context.register(move |registration| {
        let (node, proc) = audio_param_pair(opts, registration);
        (node, Box::new(proc) as Box<dyn AudioProcessor>)
    });

    context.connect(param.id(), listener_id, 0, input);

    param
}

impl AudioListenerNode {
    pub fn new(context: &BaseAudioContext) -> Self {
        context.register(move |registration| {
            let id = registration.id();

            let position_x = coordinate_param(context, id, 0., 0);
            let position_y = coordinate_param(context, id, 0., 1);
            let position_z = coordinate_param(context, id, 0., 2);
            let forward_x = coordinate_param(context, id, 0., 3);
            let forward_y = coordinate_param(context, id, 0., 4);
            let forward_z = coordinate_param(context, id, -1., 5);
            let up_x = coordinate_param(context, id, 0., 6);
            let up_y = coordinate_param(context, id, 1., 7);
            let up_z = coordinate_param(context, id, 0., 8);

            // Explicit count of 1: each of the nine inputs carries a single
            // mono coordinate value, not a multi-channel bus (mirrors how
            // `ChannelMergerNode` forces each of its inputs down to mono).
            let channel_config = ChannelConfigOptions {
                count: 1,
                mode: ChannelCountMode::Explicit,
                interpretation: ChannelInterpretation::Discrete,
            }
            .into();

            let node = AudioListenerNode {
                registration,
                channel_config,
                position_x,
                position_y,
                position_z,
                forward_x,
                forward_y,
                forward_z,
                up_x,
                up_y,
                up_z,
            };

            (node, Box::new(ListenerRenderer) as Box<dyn AudioProcessor>)
        })
    }

    /// Consume the node, handing out its nine `AudioParam`s as a plain
    /// [`AudioListener`] (used once, by `BaseAudioContext::new`, to capture
    /// their raw parts).
    pub fn into_fields(self) -> AudioListener {
        AudioListener {
            position_x: self.position_x,
            position_y: self.position_y,
            position_z: self.position_z,
            forward_x: self.forward_x,
            forward_y: self.forward_y,
            forward_z: self.forward_z,
            up_x: self.up_x,
            up_y: self.up_y,
            up_z: self.up_z,
        }
    }
}

struct ListenerRenderer;

impl AudioProcessor for ListenerRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        for (output, input) in outputs.iter_mut().zip(inputs.iter()) {
            *output = input.clone();
        }
    }

    fn tail_time(&self) -> bool {
        false
    }
}
