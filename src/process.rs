//! The render-thread side of a node: [`AudioProcessor`] is to [`AudioProcessor::process`]
//! what [`crate::node::AudioNode`] is to the control-thread handle a user holds.

use std::collections::HashMap;

use crate::alloc::AudioBuffer;
use crate::context::AudioParamId;

/// Sample-accurate parameter values made available to a node's processor for
/// the current render quantum.
///
/// Every entry is `RENDER_QUANTUM_SIZE` samples long even for params that are
/// constant for the quantum: callers that only need the scalar should read
/// index 0, callers that need the a-rate curve can read the whole slice.
pub struct AudioParamValues<'a> {
    values: &'a HashMap<AudioParamId, [f32; crate::RENDER_QUANTUM_SIZE]>,
}

impl<'a> AudioParamValues<'a> {
    pub fn new(values: &'a HashMap<AudioParamId, [f32; crate::RENDER_QUANTUM_SIZE]>) -> Self {
        Self { values }
    }

    /// The full per-sample array for `id`, or a quantum of zeroes if `id` is
    /// not a param of the node currently being processed (should not happen
    /// in a correctly wired graph; a node only ever looks up ids it created
    /// itself via `create_audio_param`).
    pub fn get(&self, id: &AudioParamId) -> &[f32; crate::RENDER_QUANTUM_SIZE] {
        const ZERO: [f32; crate::RENDER_QUANTUM_SIZE] = [0.; crate::RENDER_QUANTUM_SIZE];
        self.values.get(id).unwrap_or(&ZERO)
    }

    /// The scalar value of `id` at the start of the quantum. Most consumers
    /// that do not need sample accuracy should use this.
    pub fn get_scalar(&self, id: &AudioParamId) -> f32 {
        self.get(id)[0]
    }
}

/// The per-node render-thread behavior: given this quantum's inputs (already
/// down/up-mixed per the node's `ChannelConfig`) and this quantum's param
/// values, fill in the outputs.
///
/// Implementors must never allocate, lock a non-trylock mutex, or block in
/// `process()`: it runs on the real-time audio callback.
pub trait AudioProcessor: Send {
    /// Process one render quantum in place. `inputs` and `outputs` are both
    /// already sized to the node's computed channel counts for this quantum.
    fn process(
        &mut self,
        inputs: &[AudioBuffer],
        outputs: &mut [AudioBuffer],
        params: AudioParamValues,
        timestamp: f64,
        sample_rate: crate::SampleRate,
    );

    /// Whether this node can still produce non-silent output even once all of
    /// its inputs have gone silent (e.g. a filter's ringing, a delay line
    /// draining, a convolution reverb tail). The graph uses this to decide
    /// whether it may skip calling `process()` once inputs are silent.
    fn tail_time(&self) -> bool;

    /// Extra output latency introduced by this node, in seconds, beyond the
    /// unavoidable one-quantum pull latency. Informational only; no node in
    /// this crate currently reports a nonzero value.
    fn latency_time(&self) -> f64 {
        0.
    }
}
