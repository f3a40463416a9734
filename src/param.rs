//! `AudioParam`: a scalar automatable value with a scheduled event timeline,
//! plus an optional audio-rate driver input summed into its a-rate output.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::AudioContextRegistration;
use crate::node::AudioNode;
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{AtomicF64, SampleRate, RENDER_QUANTUM_SIZE};

/// Whether an `AudioParam` is sampled once per quantum (`K`) or once per
/// frame (`A`). Per spec §4.2, a param with a connected driver output is
/// always evaluated sample-accurately for that quantum regardless of its
/// declared rate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AutomationRate {
    A,
    K,
}

/// Construction options for an `AudioParam`.
#[derive(Clone, Debug)]
pub struct AudioParamOptions {
    pub default_value: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub automation_rate: AutomationRate,
}

impl Default for AudioParamOptions {
    fn default() -> Self {
        Self {
            default_value: 0.,
            min_value: f32::MIN,
            max_value: f32::MAX,
            automation_rate: AutomationRate::A,
        }
    }
}

/// One scheduled automation event. Field names mirror the Web Audio API
/// method that produces them.
#[derive(Clone, Debug)]
pub enum AutomationEvent {
    SetValueAtTime { value: f32, time: f64 },
    LinearRampToValueAtTime { value: f32, time: f64 },
    ExponentialRampToValueAtTime { value: f32, time: f64 },
    SetTargetAtTime { value: f32, time: f64, time_constant: f64 },
    SetValueCurveAtTime { values: Arc<Vec<f32>>, time: f64, duration: f64 },
    CancelScheduledValues { time: f64 },
}

impl AutomationEvent {
    fn time(&self) -> f64 {
        match self {
            AutomationEvent::SetValueAtTime { time, .. }
            | AutomationEvent::LinearRampToValueAtTime { time, .. }
            | AutomationEvent::ExponentialRampToValueAtTime { time, .. }
            | AutomationEvent::SetTargetAtTime { time, .. }
            | AutomationEvent::SetValueCurveAtTime { time, .. }
            | AutomationEvent::CancelScheduledValues { time, .. } => *time,
        }
    }
}

/// The parts of an `AudioParam` that can be detached from its
/// `AudioContextRegistration` and later reattached elsewhere.
///
/// Used for the `AudioListener`'s nine coordinate params: they are
/// constructed once up front (to avoid a cyclic Context<->Node reference)
/// and a fresh handle is reconstructed on each call to `listener()`.
#[derive(Clone)]
pub struct AudioParamRaw {
    shared_value: Arc<AtomicF64>,
    sender: Sender<AutomationEvent>,
    default_value: f32,
    min_value: f32,
    max_value: f32,
    automation_rate: AutomationRate,
}

/// A scalar value that can be scheduled to change over time, optionally
/// driven by the audio-rate output of another node.
///
/// `AudioParam` is itself registered as a graph node (see
/// [`AudioNode`] impl below) so that it can be wired to its driver input
/// through the ordinary connect machinery; it is attached to its owning
/// node through the hidden `u32::MAX` input rather than appearing in that
/// node's `numberOfInputs`.
pub struct AudioParam {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    raw: AudioParamRaw,
}

impl AudioParam {
    pub fn from_raw_parts(registration: AudioContextRegistration, raw: AudioParamRaw) -> Self {
        let channel_config = ChannelConfigOptions {
            count: 1,
            mode: ChannelCountMode::Explicit,
            interpretation: ChannelInterpretation::Discrete,
        }
        .into();
        Self {
            registration,
            channel_config,
            raw,
        }
    }

    pub fn into_raw_parts(self) -> AudioParamRaw {
        self.raw
    }

    pub fn default_value(&self) -> f32 {
        self.raw.default_value
    }
    pub fn min_value(&self) -> f32 {
        self.raw.min_value
    }
    pub fn max_value(&self) -> f32 {
        self.raw.max_value
    }
    pub fn automation_rate(&self) -> AutomationRate {
        self.raw.automation_rate
    }

    /// The most recently set value, clamped to `[min_value, max_value]`.
    ///
    /// This is an optimistic, control-thread-side cache: the authoritative
    /// evaluation happens on the render thread against the event timeline.
    pub fn value(&self) -> f32 {
        self.raw.shared_value.load() as f32
    }

    fn send(&self, event: AutomationEvent) {
        self.raw.shared_value.store(self.clamp(event_preview_value(&event)) as f64);
        self.registration
            .context()
            .pass_audio_param_event(&self.raw.sender, event);
    }

    fn clamp(&self, v: f32) -> f32 {
        v.clamp(self.raw.min_value, self.raw.max_value)
    }

    pub fn set_value(&self, value: f32) -> &Self {
        self.set_value_at_time(value, self.registration.context().current_time())
    }

    pub fn set_value_at_time(&self, value: f32, start_time: f64) -> &Self {
        self.send(AutomationEvent::SetValueAtTime {
            value: self.clamp(value),
            time: start_time,
        });
        self
    }

    pub fn linear_ramp_to_value_at_time(&self, value: f32, end_time: f64) -> &Self {
        self.send(AutomationEvent::LinearRampToValueAtTime {
            value: self.clamp(value),
            time: end_time,
        });
        self
    }

    /// Requires a strictly positive target value. Per the decision recorded
    /// in SPEC_FULL.md (the source exhibits inconsistent behavior here), a
    /// non-positive target is handled by falling back to a linear ramp and
    /// logging a warning, rather than failing the call outright.
    pub fn exponential_ramp_to_value_at_time(&self, value: f32, end_time: f64) -> &Self {
        if value <= 0. {
            log::warn!(
                "exponential_ramp_to_value_at_time target must be > 0, got {}; falling back to linear ramp",
                value
            );
            return self.linear_ramp_to_value_at_time(value, end_time);
        }
        self.send(AutomationEvent::ExponentialRampToValueAtTime {
            value: self.clamp(value),
            time: end_time,
        });
        self
    }

    pub fn set_target_at_time(&self, value: f32, start_time: f64, time_constant: f64) -> &Self {
        self.send(AutomationEvent::SetTargetAtTime {
            value: self.clamp(value),
            time: start_time,
            time_constant,
        });
        self
    }

    pub fn set_value_curve_at_time(&self, values: &[f32], start_time: f64, duration: f64) -> &Self {
        self.send(AutomationEvent::SetValueCurveAtTime {
            values: Arc::new(values.to_vec()),
            time: start_time,
            duration,
        });
        self
    }

    pub fn cancel_scheduled_values(&self, cancel_time: f64) -> &Self {
        self.send(AutomationEvent::CancelScheduledValues { time: cancel_time });
        self
    }
}

impl AudioNode for AudioParam {
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

fn event_preview_value(event: &AutomationEvent) -> f32 {
    match event {
        AutomationEvent::SetValueAtTime { value, .. }
        | AutomationEvent::LinearRampToValueAtTime { value, .. }
        | AutomationEvent::ExponentialRampToValueAtTime { value, .. }
        | AutomationEvent::SetTargetAtTime { value, .. } => *value,
        AutomationEvent::SetValueCurveAtTime { values, .. } => {
            *values.last().unwrap_or(&0.)
        }
        AutomationEvent::CancelScheduledValues { .. } => 0.,
    }
}

/// Build a fresh `(AudioParam, AudioParamProcessor)` pair. Call this inside
/// the `register` closure when setting up a node that owns params.
pub fn audio_param_pair(
    opts: AudioParamOptions,
    registration: AudioContextRegistration,
) -> (AudioParam, AudioParamProcessor) {
    let shared_value = Arc::new(AtomicF64::new(opts.default_value as f64));
    let (sender, receiver) = crossbeam_channel::unbounded();

    let raw = AudioParamRaw {
        shared_value,
        sender,
        default_value: opts.default_value,
        min_value: opts.min_value,
        max_value: opts.max_value,
        automation_rate: opts.automation_rate,
    };

    let processor = AudioParamProcessor {
        intrinsic_value: opts.default_value,
        events: Vec::new(),
        receiver,
        default_value: opts.default_value,
        min_value: opts.min_value,
        max_value: opts.max_value,
        automation_rate: opts.automation_rate,
    };

    (AudioParam::from_raw_parts(registration, raw), processor)
}

/// Result of evaluating a param's timeline for one quantum.
pub enum ParamValue {
    Constant(f32),
    ARate(Box<[f32; RENDER_QUANTUM_SIZE]>),
}

impl ParamValue {
    pub fn at(&self, index: usize) -> f32 {
        match self {
            ParamValue::Constant(v) => *v,
            ParamValue::ARate(values) => values[index],
        }
    }
}

/// The render-thread half of an `AudioParam`: owns the event timeline and
/// produces the per-quantum value (or array of values).
///
/// Registered as its own node in the render graph (its single input
/// receives the driver bus, down-mixed to mono; its single output is its
/// own computed a-rate value, picked up by the owning node via the hidden
/// parameter input).
pub struct AudioParamProcessor {
    intrinsic_value: f32,
    events: Vec<AutomationEvent>,
    receiver: Receiver<AutomationEvent>,
    default_value: f32,
    min_value: f32,
    max_value: f32,
    automation_rate: AutomationRate,
}

impl AudioParamProcessor {
    fn drain_events(&mut self) {
        for event in self.receiver.try_iter() {
            if let AutomationEvent::CancelScheduledValues { time } = &event {
                let time = *time;
                self.events.retain(|e| e.time() < time);
                continue;
            }
            let time = event.time();
            // keep sorted by time, stable on ties (insertion order preserved).
            let pos = self
                .events
                .iter()
                .position(|e| e.time() > time)
                .unwrap_or(self.events.len());
            self.events.insert(pos, event);
        }
    }

    /// Remove consumed events that can never affect the future again, i.e.
    /// all events strictly before the second-to-last event whose time is
    /// `<= now`. Keeps memory bounded for long-running contexts.
    fn prune(&mut self, now: f64) {
        let keep_from = self
            .events
            .iter()
            .rposition(|e| e.time() <= now)
            .unwrap_or(0);
        if keep_from > 0 {
            self.events.drain(..keep_from);
        }
    }

    /// Evaluate the scalar value at an arbitrary instant `t`, given the
    /// value that was in effect before the first scheduled event.
    fn value_at(&self, t: f64) -> f32 {
        if self.events.is_empty() {
            return self.intrinsic_value;
        }

        // index of the last event with startTime <= t
        let idx = match self.events.iter().rposition(|e| e.time() <= t) {
            None => return self.intrinsic_value,
            Some(i) => i,
        };

        let event = &self.events[idx];

        match event {
            AutomationEvent::SetValueAtTime { value, .. } => *value,
            AutomationEvent::SetTargetAtTime {
                value,
                time,
                time_constant,
            } => {
                let prev = if idx == 0 {
                    self.intrinsic_value
                } else {
                    self.value_at_event_end(idx - 1)
                };
                if *time_constant <= 0. {
                    *value
                } else {
                    let elapsed = t - time;
                    value - (value - prev) * (-elapsed / time_constant).exp() as f32
                }
            }
            AutomationEvent::SetValueCurveAtTime {
                values,
                time,
                duration,
            } => {
                if values.is_empty() {
                    return self.intrinsic_value;
                }
                if *duration <= 0. {
                    return *values.last().unwrap();
                }
                let frac = ((t - time) / duration).clamp(0., 1.);
                let n = values.len();
                let pos = frac * (n - 1) as f64;
                let i0 = pos.floor() as usize;
                let i1 = (i0 + 1).min(n - 1);
                let local = (pos - i0 as f64) as f32;
                values[i0] + (values[i1] - values[i0]) * local
            }
            AutomationEvent::LinearRampToValueAtTime { value, time } => {
                let start_value = if idx == 0 {
                    self.intrinsic_value
                } else {
                    self.value_at_event_end(idx - 1)
                };
                let start_time = if idx == 0 { 0.0 } else { self.events[idx - 1].time() };
                linear_interp(start_value, *value, start_time, *time, t)
            }
            AutomationEvent::ExponentialRampToValueAtTime { value, time } => {
                let start_value = if idx == 0 {
                    self.intrinsic_value
                } else {
                    self.value_at_event_end(idx - 1)
                };
                let start_time = if idx == 0 { 0.0 } else { self.events[idx - 1].time() };
                exponential_interp(start_value, *value, start_time, *time, t)
            }
            AutomationEvent::CancelScheduledValues { .. } => self.intrinsic_value,
        }
    }

    /// The value this param settles to exactly at the end time of event
    /// `idx` (used as the starting point for the ramp that follows it).
    fn value_at_event_end(&self, idx: usize) -> f32 {
        self.value_at(self.events[idx].time())
    }

    fn current_value_for_quantum(&mut self, start_time: f64) -> f32 {
        self.intrinsic_value = self.value_at(start_time);
        self.intrinsic_value
    }

    /// Fill `out` with the sample-accurate timeline value at each frame of
    /// `[start_time, start_time + frames/sample_rate)`.
    fn fill_timeline(&mut self, out: &mut [f32], start_time: f64, sample_rate: f32) {
        let dt = 1.0 / sample_rate as f64;
        for (i, slot) in out.iter_mut().enumerate() {
            let t = start_time + i as f64 * dt;
            *slot = self.value_at(t);
        }
        if let Some(last) = out.last() {
            self.intrinsic_value = *last;
        }
    }

    fn events_span_quantum(&self, start: f64, end: f64) -> bool {
        self.events
            .iter()
            .any(|e| e.time() > start && e.time() < end)
    }
}

fn linear_interp(v0: f32, v1: f32, t0: f64, t1: f64, t: f64) -> f32 {
    if t1 <= t0 {
        return v1;
    }
    let frac = ((t - t0) / (t1 - t0)).clamp(0., 1.) as f32;
    v0 + (v1 - v0) * frac
}

fn exponential_interp(v0: f32, v1: f32, t0: f64, t1: f64, t: f64) -> f32 {
    if v0 <= 0. || v1 <= 0. {
        return linear_interp(v0, v1, t0, t1, t);
    }
    if t1 <= t0 {
        return v1;
    }
    let frac = ((t - t0) / (t1 - t0)).clamp(0., 1.) as f32;
    v0 * (v1 / v0).powf(frac)
}

impl AudioProcessor for AudioParamProcessor {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        timestamp: f64,
        sample_rate: SampleRate,
    ) {
        self.drain_events();

        let duration = RENDER_QUANTUM_SIZE as f64 / sample_rate.0 as f64;
        let end = timestamp + duration;

        let has_driver = inputs.get(0).map_or(false, |b| !b.is_silent());
        let force_a_rate = has_driver || self.events_span_quantum(timestamp, end);

        let output = &mut outputs[0];
        output.set_number_of_channels(1);
        output.clear_silent();

        if self.automation_rate == AutomationRate::A || force_a_rate {
            let mut values = [0_f32; RENDER_QUANTUM_SIZE];
            self.fill_timeline(&mut values, timestamp, sample_rate.0 as f32);
            output.channel_data_mut(0).as_mut_slice().copy_from_slice(&values);
        } else {
            let v = self.current_value_for_quantum(timestamp);
            output.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = v);
        }

        if has_driver {
            let driver = &inputs[0];
            // down-mix the driver bus to mono by averaging, then sum.
            let mut mono = [0_f32; RENDER_QUANTUM_SIZE];
            let n = driver.number_of_channels().max(1) as f32;
            for ch in driver.channels() {
                let s = ch.as_slice();
                for i in 0..RENDER_QUANTUM_SIZE {
                    mono[i] += s[i] / n;
                }
            }
            let out = output.channel_data_mut(0).as_mut_slice();
            let (min, max) = (self.min_value, self.max_value);
            for i in 0..RENDER_QUANTUM_SIZE {
                out[i] = (out[i] + mono[i]).clamp(min, max);
            }
        }

        self.prune(timestamp);
    }

    fn tail_time(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor(rate: AutomationRate) -> AudioParamProcessor {
        let (_tx, rx) = crossbeam_channel::unbounded();
        AudioParamProcessor {
            intrinsic_value: 0.,
            events: Vec::new(),
            receiver: rx,
            default_value: 0.,
            min_value: f32::MIN,
            max_value: f32::MAX,
            automation_rate: rate,
        }
    }

    #[test]
    fn test_set_value_at_time() {
        let mut p = processor(AutomationRate::K);
        p.events.push(AutomationEvent::SetValueAtTime { value: 5., time: 1.0 });
        assert_eq!(p.value_at(0.5), 0.);
        assert_eq!(p.value_at(1.0), 5.);
        assert_eq!(p.value_at(2.0), 5.);
    }

    #[test]
    fn test_linear_ramp() {
        let mut p = processor(AutomationRate::K);
        p.events.push(AutomationEvent::SetValueAtTime { value: 0., time: 0.0 });
        p.events.push(AutomationEvent::LinearRampToValueAtTime { value: 10., time: 1.0 });
        assert_eq!(p.value_at(0.0), 0.);
        assert_eq!(p.value_at(0.5), 5.);
        assert_eq!(p.value_at(1.0), 10.);
    }

    #[test]
    fn test_exponential_ramp_requires_positive() {
        let v = exponential_interp(-1.0, 2.0, 0.0, 1.0, 0.5);
        // falls back to linear
        assert_eq!(v, 0.5);
    }

    #[test]
    fn test_set_target_approaches_value() {
        let mut p = processor(AutomationRate::K);
        p.events.push(AutomationEvent::SetTargetAtTime {
            value: 1.0,
            time: 0.0,
            time_constant: 1.0,
        });
        let v_far = p.value_at(0.0);
        let v_later = p.value_at(5.0);
        assert_eq!(v_far, 1.0 - (1.0 - 0.0));
        assert!(v_later > 0.99);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let mut p = processor(AutomationRate::K);
        p.events.push(AutomationEvent::SetValueAtTime { value: 1., time: 0.0 });
        p.events.push(AutomationEvent::SetValueAtTime { value: 2., time: 1.0 });
        p.events.retain(|e| e.time() < 1.0);
        assert_eq!(p.value_at(2.0), 1.);
    }

    #[test]
    fn test_value_curve() {
        let mut p = processor(AutomationRate::K);
        p.events.push(AutomationEvent::SetValueCurveAtTime {
            values: Arc::new(vec![0., 1., 0.]),
            time: 0.0,
            duration: 2.0,
        });
        assert_eq!(p.value_at(0.0), 0.);
        assert!((p.value_at(1.0) - 1.0).abs() < 1e-6);
        assert_eq!(p.value_at(2.0), 0.);
    }
}
