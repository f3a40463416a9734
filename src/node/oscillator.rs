//! OscillatorNode: a periodic-waveform signal generator.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::control::Scheduler;
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{RENDER_QUANTUM_SIZE, SampleRate};

use super::{AudioNode, AudioScheduledSourceNode};

/// The shape of periodic waveform an [`OscillatorNode`] produces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum OscillatorType {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

impl Default for OscillatorType {
    fn default() -> Self {
        OscillatorType::Sine
    }
}

/// Options for constructing an [`OscillatorNode`].
#[derive(Clone, Debug)]
pub struct OscillatorOptions {
    pub type_: OscillatorType,
    pub frequency: f32,
    pub detune: f32,
    pub channel_config: ChannelConfigOptions,
}

impl Default for OscillatorOptions {
    fn default() -> Self {
        Self {
            type_: OscillatorType::Sine,
            frequency: 440.,
            detune: 0.,
            channel_config: ChannelConfigOptions::default(),
        }
    }
}

/// AudioNode representing a periodic waveform, such as a sine wave.
pub struct OscillatorNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    frequency: AudioParam,
    detune: AudioParam,
    type_: std::sync::Arc<std::sync::atomic::AtomicU32>,
    scheduler: Scheduler,
}

impl AudioNode for OscillatorNode {
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

impl AudioScheduledSourceNode for OscillatorNode {
    fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl OscillatorNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: OscillatorOptions) -> Self {
        context.base().register(move |registration| {
            let freq_opts = AudioParamOptions {
                default_value: options.frequency,
                min_value: -(context.sample_rate().0 as f32) / 2.,
                max_value: context.sample_rate().0 as f32 / 2.,
                automation_rate: AutomationRate::A,
            };
            let (frequency, freq_id) = context.create_audio_param(freq_opts, registration.id());

            let detune_opts = AudioParamOptions {
                default_value: options.detune,
                min_value: -153600.,
                max_value: 153600.,
                automation_rate: AutomationRate::A,
            };
            let (detune, detune_id) = context.create_audio_param(detune_opts, registration.id());

            let type_ = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(options.type_ as u32));
            let scheduler = Scheduler::new();

            let node = OscillatorNode {
                registration,
                channel_config: options.channel_config.into(),
                frequency,
                detune,
                type_: type_.clone(),
                scheduler: scheduler.clone(),
            };

            let render = OscillatorRenderer {
                frequency: freq_id,
                detune: detune_id,
                type_,
                scheduler,
                phase: 0.,
            };

            (node, Box::new(render))
        })
    }

    pub fn frequency(&self) -> &AudioParam {
        &self.frequency
    }
    pub fn detune(&self) -> &AudioParam {
        &self.detune
    }
    pub fn type_(&self) -> OscillatorType {
        match self.type_.load(std::sync::atomic::Ordering::SeqCst) {
            0 => OscillatorType::Sine,
            1 => OscillatorType::Square,
            2 => OscillatorType::Sawtooth,
            _ => OscillatorType::Triangle,
        }
    }
    pub fn set_type(&self, type_: OscillatorType) {
        self.type_.store(type_ as u32, std::sync::atomic::Ordering::SeqCst);
    }
}

struct OscillatorRenderer {
    frequency: AudioParamId,
    detune: AudioParamId,
    type_: std::sync::Arc<std::sync::atomic::AtomicU32>,
    scheduler: Scheduler,
    /// phase in [0, TABLE_LENGTH)
    phase: f32,
}

impl OscillatorRenderer {
    fn sample(&self, type_: OscillatorType, phase_norm: f32) -> f32 {
        // phase_norm in [0, 1)
        match type_ {
            OscillatorType::Sine => {
                let idx = phase_norm * super::TABLE_LENGTH_F32;
                let i0 = idx as usize % super::TABLE_LENGTH_USIZE;
                let i1 = (i0 + 1) % super::TABLE_LENGTH_USIZE;
                let frac = idx - idx.floor();
                super::SINETABLE[i0] * (1. - frac) + super::SINETABLE[i1] * frac
            }
            OscillatorType::Sawtooth => 2. * phase_norm - 1.,
            OscillatorType::Square => {
                if phase_norm < 0.5 {
                    1.
                } else {
                    -1.
                }
            }
            OscillatorType::Triangle => {
                if phase_norm < 0.5 {
                    4. * phase_norm - 1.
                } else {
                    3. - 4. * phase_norm
                }
            }
        }
    }
}

impl AudioProcessor for OscillatorRenderer {
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

        let quantum_duration = RENDER_QUANTUM_SIZE as f64 / sample_rate.0 as f64;
        if !self.scheduler.is_active(timestamp) && !self.scheduler.is_active(timestamp + quantum_duration) {
            output.make_silent();
            return;
        }

        let type_ = match self.type_.load(std::sync::atomic::Ordering::SeqCst) {
            0 => OscillatorType::Sine,
            1 => OscillatorType::Square,
            2 => OscillatorType::Sawtooth,
            _ => OscillatorType::Triangle,
        };

        let freqs = params.get(&self.frequency);
        let detunes = params.get(&self.detune);
        let sr = sample_rate.0 as f32;

        let out = output.channel_data_mut(0).as_mut_slice();
        for i in 0..RENDER_QUANTUM_SIZE {
            let active = self.scheduler.is_active(timestamp + i as f64 / sr as f64);
            if !active {
                out[i] = 0.;
                continue;
            }
            let detune_ratio = 2f32.powf(detunes[i] / 1200.);
            let freq = freqs[i] * detune_ratio;
            let phase_norm = self.phase;
            out[i] = self.sample(type_, phase_norm);
            self.phase = (self.phase + freq / sr).rem_euclid(1.0);
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
    fn test_sine_table_is_periodic() {
        let renderer = OscillatorRenderer {
            frequency: AudioParamId(0),
            detune: AudioParamId(0),
            type_: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
            scheduler: Scheduler::new(),
            phase: 0.,
        };
        let a = renderer.sample(OscillatorType::Sine, 0.0);
        let b = renderer.sample(OscillatorType::Sine, 1.0 - 1e-6);
        assert!((a - b).abs() < 1e-2);
    }

    #[test]
    fn test_sawtooth_ramps() {
        let renderer = OscillatorRenderer {
            frequency: AudioParamId(0),
            detune: AudioParamId(0),
            type_: std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0)),
            scheduler: Scheduler::new(),
            phase: 0.,
        };
        assert_eq!(renderer.sample(OscillatorType::Sawtooth, 0.0), -1.0);
        assert_eq!(renderer.sample(OscillatorType::Sawtooth, 0.5), 0.0);
    }
}
