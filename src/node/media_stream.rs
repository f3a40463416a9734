//! MediaStreamAudioSourceNode: wraps an arbitrary [`MediaStream`] as a source.

use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::control::Scheduler;
use crate::media::MediaStream;

use super::{AudioNode, AudioScheduledSourceNode, MediaStreamRenderer};

/// Options for constructing a [`MediaStreamAudioSourceNode`].
pub struct MediaStreamAudioSourceNodeOptions<M> {
    pub media: M,
    pub channel_config: ChannelConfigOptions,
}

/// AudioNode sourcing its output from an external [`MediaStream`] (e.g. a
/// decoded file, or a live capture feed).
pub struct MediaStreamAudioSourceNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    scheduler: Scheduler,
}

impl AudioNode for MediaStreamAudioSourceNode {
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

impl AudioScheduledSourceNode for MediaStreamAudioSourceNode {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl MediaStreamAudioSourceNode {
    pub fn new<C: AsBaseAudioContext, M: MediaStream>(
        context: &C,
        options: MediaStreamAudioSourceNodeOptions<M>,
    ) -> Self {
        context.base().register(move |registration| {
            let scheduler = Scheduler::new();
            // a media stream source starts as soon as it's connected; there
            // is no explicit start()/stop() gate in the Web Audio API for it.
            scheduler.start_at(0.);

            let node = MediaStreamAudioSourceNode {
                registration,
                channel_config: options.channel_config.into(),
                scheduler: scheduler.clone(),
            };

            let render = MediaStreamRenderer::new(options.media, scheduler);

            (node, Box::new(render))
        })
    }
}
