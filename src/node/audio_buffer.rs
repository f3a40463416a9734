//! AudioBufferSourceNode: plays back a decoded [`crate::buffer::AudioBuffer`]
//! at an automatable rate, with optional looping.

use std::sync::{Arc, Mutex};

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{AudioBuffer, ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::control::{Controller, Scheduler};
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{RENDER_QUANTUM_SIZE, SampleRate};

use super::{AudioControllableSourceNode, AudioNode, AudioScheduledSourceNode};

/// Options for constructing an [`AudioBufferSourceNode`].
#[derive(Clone)]
pub struct AudioBufferOptions {
    pub buffer: Option<AudioBuffer>,
    pub playback_rate: f32,
    pub detune: f32,
    pub loop_: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub channel_config: ChannelConfigOptions,
}

impl Default for AudioBufferOptions {
    fn default() -> Self {
        Self {
            buffer: None,
            playback_rate: 1.,
            detune: 0.,
            loop_: false,
            loop_start: 0.,
            loop_end: 0.,
            channel_config: ChannelConfigOptions {
                count: 2,
                ..ChannelConfigOptions::default()
            },
        }
    }
}

type SharedBuffer = Arc<Mutex<Option<Arc<AudioBuffer>>>>;

/// AudioNode representing an audio source consisting of an in-memory buffer,
/// played back at a configurable, automatable rate. The spec calls this the
/// "sampled source".
pub struct AudioBufferSourceNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    playback_rate: AudioParam,
    detune: AudioParam,
    scheduler: Scheduler,
    controller: Controller,
    buffer: SharedBuffer,
    on_ended: Arc<Mutex<Option<Box<dyn FnMut() + Send>>>>,
}

impl AudioNode for AudioBufferSourceNode {
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

impl AudioScheduledSourceNode for AudioBufferSourceNode {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl AudioControllableSourceNode for AudioBufferSourceNode {
    fn controller(&self) -> &Controller {
        &self.controller
    }
}

impl AudioBufferSourceNode {
    /// Note: do not forget to `start()` the node.
    pub fn new<C: AsBaseAudioContext>(context: &C, options: AudioBufferOptions) -> Self {
        context.base().register(move |registration| {
            let rate_opts = AudioParamOptions {
                default_value: options.playback_rate,
                min_value: f32::MIN,
                max_value: f32::MAX,
                automation_rate: AutomationRate::A,
            };
            let (playback_rate, rate_id) =
                context.create_audio_param(rate_opts, registration.id());

            let detune_opts = AudioParamOptions {
                default_value: options.detune,
                min_value: -153600.,
                max_value: 153600.,
                automation_rate: AutomationRate::A,
            };
            let (detune, detune_id) = context.create_audio_param(detune_opts, registration.id());

            let scheduler = Scheduler::new();
            let controller = Controller::new();
            controller.set_loop(options.loop_);
            controller.set_loop_start(options.loop_start);
            if options.loop_end > 0. {
                controller.set_loop_end(options.loop_end);
            }

            let buffer: SharedBuffer = Arc::new(Mutex::new(options.buffer.map(Arc::new)));
            let on_ended = Arc::new(Mutex::new(None));

            let node = AudioBufferSourceNode {
                registration,
                channel_config: options.channel_config.into(),
                playback_rate,
                detune,
                scheduler: scheduler.clone(),
                controller: controller.clone(),
                buffer: buffer.clone(),
                on_ended: on_ended.clone(),
            };

            let render = AudioBufferSourceRenderer {
                playback_rate: rate_id,
                detune: detune_id,
                scheduler,
                controller,
                buffer,
                cached_buffer: None,
                read_position: 0.,
                finished: false,
                on_ended,
            };

            (node, Box::new(render))
        })
    }

    pub fn playback_rate(&self) -> &AudioParam {
        &self.playback_rate
    }

    pub fn detune(&self) -> &AudioParam {
        &self.detune
    }

    /// Set (or replace) the underlying source buffer. Should be called before
    /// `start()`: replacing the buffer of an already-playing source resets
    /// its read position to zero.
    pub fn set_buffer(&self, buffer: AudioBuffer) {
        *self.buffer.lock().unwrap() = Some(Arc::new(buffer));
    }

    /// Register a callback fired once, from the render thread, when playback
    /// naturally ends (buffer exhausted without looping, or an explicit
    /// `stop()` time is reached). The callback runs inline on the render
    /// thread via `try_lock`, so it must be cheap and non-blocking.
    pub fn set_on_ended<F: FnMut() + Send + 'static>(&self, callback: F) {
        *self.on_ended.lock().unwrap() = Some(Box::new(callback));
    }
}

struct AudioBufferSourceRenderer {
    playback_rate: AudioParamId,
    detune: AudioParamId,
    scheduler: Scheduler,
    controller: Controller,
    buffer: SharedBuffer,
    cached_buffer: Option<Arc<AudioBuffer>>,
    /// fractional read position, in source sample-frames
    read_position: f64,
    finished: bool,
    on_ended: Arc<Mutex<Option<Box<dyn FnMut() + Send>>>>,
}

impl AudioBufferSourceRenderer {
    fn fire_on_ended(&mut self) {
        if let Ok(mut guard) = self.on_ended.try_lock() {
            if let Some(cb) = guard.as_mut() {
                cb();
            }
        }
    }
}

impl AudioProcessor for AudioBufferSourceRenderer {
    fn process(
        &mut self,
        _inputs: &[Quantum],
        outputs: &mut [Quantum],
        params: AudioParamValues,
        timestamp: f64,
        sample_rate: SampleRate,
    ) {
        let output = &mut outputs[0];

        if self.cached_buffer.is_none() {
            if let Ok(guard) = self.buffer.try_lock() {
                self.cached_buffer = guard.clone();
            }
        }

        let sr = sample_rate.0 as f64;
        let quantum_duration = RENDER_QUANTUM_SIZE as f64 / sr;

        if self.finished {
            output.make_silent();
            return;
        }

        // Fully-Scheduled (not yet started) for the whole quantum.
        if !self.scheduler.is_active(timestamp)
            && !self.scheduler.is_active(timestamp + quantum_duration)
        {
            output.make_silent();
            return;
        }

        let buffer = match &self.cached_buffer {
            Some(b) => b.clone(),
            None => {
                output.make_silent();
                return;
            }
        };

        let channels = buffer.number_of_channels().max(1);
        output.set_number_of_channels(channels);

        let loop_enabled = self.controller.loop_();
        let loop_start_frame = self.controller.loop_start() * buffer.sample_rate().0 as f64;
        let loop_end_frame = {
            let end = self.controller.loop_end();
            if end > 0. {
                end * buffer.sample_rate().0 as f64
            } else {
                buffer.sample_len() as f64
            }
        };

        let rates = params.get(&self.playback_rate);
        let detunes = params.get(&self.detune);

        let mut ended_this_quantum = false;

        for i in 0..RENDER_QUANTUM_SIZE {
            let sample_time = timestamp + i as f64 / sr;
            let active = self.scheduler.is_active(sample_time);

            if !active {
                for ch in 0..channels {
                    output.channel_data_mut(ch).as_mut_slice()[i] = 0.;
                }
                continue;
            }

            let detune_ratio = 2f64.powf(detunes[i] as f64 / 1200.);
            let rate = rates[i] as f64 * detune_ratio;

            if self.read_position >= loop_end_frame.min(buffer.sample_len() as f64) {
                if loop_enabled {
                    self.read_position = loop_start_frame;
                } else {
                    for ch in 0..channels {
                        output.channel_data_mut(ch).as_mut_slice()[i] = 0.;
                    }
                    ended_this_quantum = true;
                    continue;
                }
            }

            let pos = self.read_position;
            let i0 = pos.floor() as usize;
            let i1 = i0 + 1;
            let frac = (pos - pos.floor()) as f32;

            for ch in 0..channels {
                let data = buffer.channel_data(ch.min(buffer.number_of_channels() - 1)).as_slice();
                let s0 = data.get(i0).copied().unwrap_or(0.);
                let s1 = data.get(i1).copied().unwrap_or(s0);
                output.channel_data_mut(ch).as_mut_slice()[i] = s0 * (1. - frac) + s1 * frac;
            }

            self.read_position += rate;
        }

        if ended_this_quantum {
            self.finished = true;
            self.fire_on_ended();
        } else if !self.scheduler.is_active(timestamp + quantum_duration) {
            // the scheduler's stop time falls inside (or right after) this
            // quantum: finish now, firing on_ended at end of the quantum in
            // which the transition occurs.
            self.finished = true;
            self.fire_on_ended();
        }
    }

    fn tail_time(&self) -> bool {
        !self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OfflineAudioContext;

    fn mono_buffer(samples: Vec<f32>) -> AudioBuffer {
        AudioBuffer::from_channels(
            vec![crate::buffer::ChannelData::from(samples)],
            SampleRate(44_100),
        )
    }

    #[test]
    fn test_plays_back_at_unity_rate() {
        let mut renderer = AudioBufferSourceRenderer {
            playback_rate: AudioParamId(0),
            detune: AudioParamId(1),
            scheduler: Scheduler::new(),
            controller: Controller::new(),
            buffer: Arc::new(Mutex::new(Some(Arc::new(mono_buffer(vec![1., 2., 3., 4.]))))),
            cached_buffer: None,
            read_position: 0.,
            finished: false,
            on_ended: Arc::new(Mutex::new(None)),
        };
        renderer.scheduler.start_at(0.);

        let mut values = std::collections::HashMap::new();
        values.insert(AudioParamId(0), [1.; RENDER_QUANTUM_SIZE]);
        values.insert(AudioParamId(1), [0.; RENDER_QUANTUM_SIZE]);

        let mut outputs = vec![Quantum::new(1)];
        renderer.process(
            &[],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );

        let out = outputs[0].channel_data(0).as_slice();
        assert!((out[0] - 1.0).abs() < 1e-4);
        assert!((out[1] - 2.0).abs() < 1e-4);
        // exhausted the 4-sample buffer; rest is silent and playback ends
        assert_eq!(out[4], 0.);
        assert!(renderer.finished);
    }

    #[test]
    fn test_factory_sets_default_playback_rate() {
        let context = OfflineAudioContext::new(1, 128, SampleRate(44_100));
        let src = context.create_buffer_source();
        assert_eq!(src.playback_rate().value(), 1.0);
    }
}
