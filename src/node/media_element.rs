//! MediaElementAudioSourceNode: a seekable/loopable source backed by a
//! [`MediaElement`] (e.g. a fully decoded file).

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::control::{Controller, Scheduler};
use crate::media::MediaElement;
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{BufferDepletedError, SampleRate};

use super::{AudioControllableSourceNode, AudioNode, AudioScheduledSourceNode};

/// Options for constructing a [`MediaElementAudioSourceNode`].
pub struct MediaElementAudioSourceNodeOptions {
    pub media: MediaElement,
    pub channel_config: ChannelConfigOptions,
}

/// AudioNode sourcing its output from a [`MediaElement`], supporting
/// pause/loop/seek via [`AudioControllableSourceNode`].
pub struct MediaElementAudioSourceNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    controller: Controller,
}

impl AudioNode for MediaElementAudioSourceNode {
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

impl AudioScheduledSourceNode for MediaElementAudioSourceNode {
    fn scheduler(&self) -> &Scheduler {
        self.controller.scheduler()
    }
}

impl AudioControllableSourceNode for MediaElementAudioSourceNode {
    fn controller(&self) -> &Controller {
        &self.controller
    }
}

impl MediaElementAudioSourceNode {
    /// Note: the caller must still call `start()` — unlike
    /// `MediaStreamAudioSourceNode`, a media element source waits for an
    /// explicit start time, matching the Web Audio API's `start()`-gated
    /// source nodes.
    pub fn new<C: AsBaseAudioContext>(
        context: &C,
        options: MediaElementAudioSourceNodeOptions,
    ) -> Self {
        context.base().register(move |registration| {
            let controller = Controller::new();

            let node = MediaElementAudioSourceNode {
                registration,
                channel_config: options.channel_config.into(),
                controller: controller.clone(),
            };

            let render = MediaElementRenderer {
                media: options.media,
                controller,
                finished: false,
            };

            (node, Box::new(render))
        })
    }
}

struct MediaElementRenderer {
    media: MediaElement,
    controller: Controller,
    finished: bool,
}

impl AudioProcessor for MediaElementRenderer {
    fn process(
        &mut self,
        _inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        let output = &mut outputs[0];

        if !self.controller.scheduler().is_active(timestamp) {
            output.make_silent();
            return;
        }

        if let Some(seek_to) = self.controller.should_seek() {
            self.media.seek(seek_to);
        }

        match self.media.next() {
            Some(Ok(buffer)) => {
                let channels = buffer.number_of_channels();
                output.set_number_of_channels(channels);
                output
                    .channels_mut()
                    .iter_mut()
                    .zip(buffer.channels())
                    .for_each(|(o, i)| o.copy_from_slice(i.as_slice()));
            }
            Some(Err(e)) if e.is::<BufferDepletedError>() => {
                log::debug!("media element buffer depleted");
                output.make_silent();
            }
            Some(Err(e)) => {
                log::warn!("error playing media element: {}", e);
                self.finished = true;
                output.make_silent();
            }
            None => {
                if self.controller.loop_() {
                    // rewind now; the next quantum's `next()` call picks up
                    // playback from `loop_start` instead of staying depleted.
                    self.media.seek(self.controller.loop_start());
                    output.make_silent();
                } else {
                    if !self.finished {
                        log::debug!("media element playback finished");
                        self.finished = true;
                    }
                    output.make_silent();
                }
            }
        }
    }

    fn tail_time(&self) -> bool {
        !self.finished
    }
}
