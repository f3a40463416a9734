//! The render graph: a pull-based scheduler over an arena of node processors,
//! driven once per render quantum from the audio callback (or, for an
//! `OfflineAudioContext`, from a plain loop on the control thread).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelCountMode, ChannelInterpretation};
use crate::context::AudioParamId;
use crate::message::ControlMessage;
use crate::process::{AudioParamValues, AudioProcessor};
use crate::{SampleRate, RENDER_QUANTUM_SIZE};

/// Index of a node within a [`Graph`]'s arena. Every `AudioNode`, every
/// `AudioParam`, and the `AudioListener` share this same id space: a param
/// or the listener is, from the graph's point of view, just another node
/// whose single output feeds a destination through the hidden `u32::MAX`
/// input port instead of one of the destination's visible inputs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(pub(crate) u64);

/// The destination node is always the first one registered by
/// `BaseAudioContext::new`.
const DESTINATION: NodeIndex = NodeIndex(0);

/// Input port value used to mark an edge as feeding an `AudioParam`'s driver
/// input or the `AudioListener`'s keep-alive edge, rather than one of a
/// node's ordinary, user-visible inputs.
pub const HIDDEN_PARAM_INPUT: u32 = u32::MAX;

/// How many quanta an edge keeps rendering, at a ramped-down gain, after a
/// `disconnect` before it is physically removed from the graph. One extra
/// quantum beyond reaching zero gain ensures the de-zipper ramp is fully
/// heard rather than truncated.
const REMOVAL_GRACE_QUANTA: u8 = 1;

struct Edge {
    from: NodeIndex,
    from_output: u32,
    to: NodeIndex,
    to_input: u32,
    /// gain this edge was contributing at the end of the last quantum it was
    /// rendered. 1.0 for an ordinary steady connection.
    last_gain: f32,
    /// 0.0 once `disconnect` has been requested, 1.0 otherwise.
    target_gain: f32,
    /// Number of quanta this edge has spent at (or past) zero gain. Once
    /// this exceeds `REMOVAL_GRACE_QUANTA` the edge is dropped.
    zero_quanta: u8,
}

impl Edge {
    fn pending_removal(&self) -> bool {
        self.zero_quanta > REMOVAL_GRACE_QUANTA
    }
}

struct NodeData {
    processor: Box<dyn AudioProcessor>,
    number_of_inputs: usize,
    number_of_outputs: usize,
    channel_config: ChannelConfig,
    outputs: Vec<Quantum>,
    /// set by `ControlMessage::FreeWhenFinished`; the node is dropped once
    /// its processor reports no tail time and all of its inputs are silent.
    free_when_finished: bool,
}

/// The node arena plus the edge list, with a cached topological order that is
/// recomputed whenever the edge set changes.
pub(crate) struct Graph {
    nodes: HashMap<NodeIndex, NodeData>,
    edges: Vec<Edge>,
    ordered: Vec<NodeIndex>,
    order_dirty: bool,
}

impl Graph {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            edges: Vec::new(),
            ordered: Vec::new(),
            order_dirty: true,
        }
    }

    fn add_node(
        &mut self,
        index: NodeIndex,
        processor: Box<dyn AudioProcessor>,
        number_of_inputs: usize,
        number_of_outputs: usize,
        channel_config: ChannelConfig,
    ) {
        let outputs = vec![Quantum::new(1); number_of_outputs];
        self.nodes.insert(
            index,
            NodeData {
                processor,
                number_of_inputs,
                number_of_outputs,
                channel_config,
                outputs,
                free_when_finished: false,
            },
        );
        self.order_dirty = true;
    }

    fn connect(&mut self, from: NodeIndex, to: NodeIndex, output: u32, input: u32) {
        // reconnecting an edge that was mid-removal revives it instead of
        // duplicating it.
        if let Some(edge) = self.edges.iter_mut().find(|e| {
            e.from == from && e.to == to && e.from_output == output && e.to_input == input
        }) {
            edge.target_gain = 1.0;
            edge.zero_quanta = 0;
            return;
        }

        self.edges.push(Edge {
            from,
            from_output: output,
            to,
            to_input: input,
            last_gain: 0.0,
            target_gain: 1.0,
            zero_quanta: 0,
        });
        self.order_dirty = true;
    }

    fn disconnect(&mut self, from: NodeIndex, to: NodeIndex) {
        for edge in self.edges.iter_mut().filter(|e| e.from == from && e.to == to) {
            edge.target_gain = 0.0;
        }
    }

    fn disconnect_all(&mut self, from: NodeIndex) {
        for edge in self.edges.iter_mut().filter(|e| e.from == from) {
            edge.target_gain = 0.0;
        }
    }

    fn mark_free_when_finished(&mut self, id: NodeIndex) {
        if let Some(node) = self.nodes.get_mut(&id) {
            node.free_when_finished = true;
        }
    }

    fn apply(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::RegisterNode {
                id,
                node,
                inputs,
                outputs,
                channel_config,
            } => self.add_node(NodeIndex(id), node, inputs, outputs, channel_config),
            ControlMessage::ConnectNode {
                from,
                to,
                output,
                input,
            } => self.connect(NodeIndex(from), NodeIndex(to), output, input),
            ControlMessage::DisconnectNode { from, to } => {
                self.disconnect(NodeIndex(from), NodeIndex(to))
            }
            ControlMessage::DisconnectAll { from } => self.disconnect_all(NodeIndex(from)),
            ControlMessage::AudioParamEvent { to, event } => {
                // Best-effort: the render-side `AudioParamProcessor` drains
                // its own receiver; this just forwards the event there.
                let _ = to.send(event);
            }
            ControlMessage::FreeWhenFinished { id } => self.mark_free_when_finished(NodeIndex(id)),
        }
    }

    /// Recompute `self.ordered` as a reverse-postorder (leaves first)
    /// traversal from the destination. Nodes unreachable from the
    /// destination (already disconnected, about to be GC'd) are appended at
    /// the end so they still get a chance to finish their tail.
    fn update_order(&mut self) {
        let mut visited: HashMap<NodeIndex, bool> = HashMap::new();
        let mut ordered = Vec::with_capacity(self.nodes.len());

        fn visit(
            node: NodeIndex,
            edges: &[Edge],
            visited: &mut HashMap<NodeIndex, bool>,
            ordered: &mut Vec<NodeIndex>,
        ) {
            match visited.get(&node) {
                Some(_) => return, // already visited, or cycle guard
                None => {}
            }
            visited.insert(node, false);
            for edge in edges.iter().filter(|e| e.to == node) {
                visit(edge.from, edges, visited, ordered);
            }
            visited.insert(node, true);
            ordered.push(node);
        }

        if self.nodes.contains_key(&DESTINATION) {
            visit(DESTINATION, &self.edges, &mut visited, &mut ordered);
        }
        let remaining: Vec<NodeIndex> = self.nodes.keys().copied().collect();
        for node in remaining {
            if !visited.contains_key(&node) {
                visit(node, &self.edges, &mut visited, &mut ordered);
            }
        }

        self.ordered = ordered;
        self.order_dirty = false;
    }

    /// Garbage collect nodes that are done: marked `free_when_finished`, with
    /// no remaining tail and no incoming edges still carrying signal.
    fn collect_garbage(&mut self) {
        let mut to_remove = Vec::new();
        for (&index, node) in self.nodes.iter() {
            if index == DESTINATION {
                continue;
            }
            if !node.free_when_finished {
                continue;
            }
            let has_live_input = self
                .edges
                .iter()
                .any(|e| e.to == index && !e.pending_removal());
            if has_live_input {
                continue;
            }
            if node.processor.tail_time() {
                continue;
            }
            to_remove.push(index);
        }

        if to_remove.is_empty() {
            return;
        }

        for index in &to_remove {
            self.nodes.remove(index);
        }
        self.edges
            .retain(|e| !to_remove.contains(&e.from) && !to_remove.contains(&e.to));
        self.order_dirty = true;
    }

    /// Age out fully-ramped-down edges so they stop being considered at all
    /// (but keep them one extra quantum so the ramp-to-zero is fully heard).
    fn prune_edges(&mut self) {
        let before = self.edges.len();
        self.edges.retain(|e| !e.pending_removal());
        if self.edges.len() != before {
            self.order_dirty = true;
        }
    }

    /// Compute the up/down-mixed, de-zippered input bus for `(node, input)`
    /// by summing every live edge targeting it.
    fn compute_input(
        &mut self,
        node: NodeIndex,
        input: u32,
        channel_config: &ChannelConfig,
    ) -> Quantum {
        let computed_channels = self.computed_channel_count(node, input, channel_config);
        let mut acc = Quantum::new(computed_channels);

        // Collect indices first to satisfy the borrow checker (we need both
        // shared access to outputs and mutable access to edge ramp state).
        let edge_indices: Vec<usize> = self
            .edges
            .iter()
            .enumerate()
            .filter(|(_, e)| e.to == node && e.to_input == input)
            .map(|(i, _)| i)
            .collect();

        for i in edge_indices {
            let (from, from_output, target_gain, mut last_gain) = {
                let e = &self.edges[i];
                (e.from, e.from_output, e.target_gain, e.last_gain)
            };

            let source = self
                .nodes
                .get(&from)
                .and_then(|n| n.outputs.get(from_output as usize))
                .cloned();
            let source = match source {
                Some(s) => s,
                None => continue,
            };

            let mut mixed = Quantum::new(computed_channels);
            mixed.copy_from(&source, channel_config.interpretation());

            let mut contribution = Quantum::new(computed_channels);
            contribution.copy_with_gain_from(&mixed, &mut last_gain, target_gain);
            acc.sum_from(&contribution, channel_config.interpretation());

            self.edges[i].last_gain = last_gain;
            if target_gain == 0.0 && last_gain == 0.0 {
                self.edges[i].zero_quanta = self.edges[i].zero_quanta.saturating_add(1);
            } else {
                self.edges[i].zero_quanta = 0;
            }
        }

        acc
    }

    fn computed_channel_count(
        &self,
        node: NodeIndex,
        input: u32,
        channel_config: &ChannelConfig,
    ) -> usize {
        match channel_config.count_mode() {
            ChannelCountMode::Explicit => channel_config.count(),
            mode => {
                let max_incoming = self
                    .edges
                    .iter()
                    .filter(|e| e.to == node && e.to_input == input && !e.pending_removal())
                    .filter_map(|e| self.nodes.get(&e.from))
                    .map(|n| n.outputs.get(0).map_or(1, |o| o.number_of_channels()))
                    .max()
                    .unwrap_or(1);
                match mode {
                    ChannelCountMode::Max => max_incoming.max(1),
                    ChannelCountMode::ClampedMax => max_incoming.max(1).min(channel_config.count()),
                    ChannelCountMode::Explicit => unreachable!(),
                }
            }
        }
    }

    /// Render one quantum, returning the destination's mixed output.
    fn render_quantum(&mut self, timestamp: f64, sample_rate: SampleRate) -> Quantum {
        self.prune_edges();
        if self.order_dirty {
            self.update_order();
        }

        let order = self.ordered.clone();

        for node_index in order {
            let (number_of_inputs, number_of_outputs, channel_config) = {
                let node = match self.nodes.get(&node_index) {
                    Some(n) => n,
                    None => continue,
                };
                (
                    node.number_of_inputs,
                    node.number_of_outputs,
                    node.channel_config.clone(),
                )
            };

            // gather the node's ordinary (visible) inputs
            let mut inputs = Vec::with_capacity(number_of_inputs.max(1));
            for input_idx in 0..number_of_inputs as u32 {
                inputs.push(self.compute_input(node_index, input_idx, &channel_config));
            }
            if inputs.is_empty() {
                // source nodes still get a single (possibly unused) silent
                // input bus so processors never special-case an empty slice.
                inputs.push(Quantum::new(1));
            }

            // gather hidden-port AudioParam driver values feeding this node
            let mut param_values: HashMap<AudioParamId, [f32; RENDER_QUANTUM_SIZE]> =
                HashMap::new();
            for edge in self
                .edges
                .iter()
                .filter(|e| e.to == node_index && e.to_input == HIDDEN_PARAM_INPUT)
            {
                if let Some(source) = self.nodes.get(&edge.from) {
                    if let Some(out) = source.outputs.get(edge.from_output as usize) {
                        param_values.insert(
                            AudioParamId(edge.from.0),
                            *out.channel_data(0).as_slice(),
                        );
                    }
                }
            }

            let node = match self.nodes.get_mut(&node_index) {
                Some(n) => n,
                None => continue,
            };

            let mut outputs: Vec<Quantum> = (0..number_of_outputs.max(1))
                .map(|_| Quantum::new(1))
                .collect();

            node.processor.process(
                &inputs,
                &mut outputs,
                AudioParamValues::new(&param_values),
                timestamp,
                sample_rate,
            );

            if number_of_outputs == 0 {
                node.outputs.clear();
            } else {
                node.outputs = outputs;
            }
        }

        self.collect_garbage();

        self.nodes
            .get(&DESTINATION)
            .and_then(|n| n.outputs.get(0).cloned())
            .unwrap_or_else(|| Quantum::new(1))
    }
}

/// Owns the [`Graph`] and drains the control-message queue; this is the type
/// handed to the audio callback for an `AudioContext`, and driven directly
/// in a loop by an `OfflineAudioContext`.
pub struct RenderThread {
    graph: Graph,
    sample_rate: SampleRate,
    channels: usize,
    receiver: Receiver<ControlMessage>,
    /// Shared with the owning `BaseAudioContext` so that
    /// `BaseAudioContext::current_time`/`current_sample_frame` observe the
    /// render thread's actual progress rather than staying at zero (spec
    /// §8: `currentSampleFrame` is strictly monotonic and advances by
    /// exactly `Q` per quantum processed).
    frames_played: Arc<AtomicU64>,
}

impl RenderThread {
    pub fn new(sample_rate: SampleRate, channels: usize, receiver: Receiver<ControlMessage>) -> Self {
        Self::with_frame_counter(sample_rate, channels, receiver, Arc::new(AtomicU64::new(0)))
    }

    /// Construct a `RenderThread` that publishes its frame counter into an
    /// externally-owned `AtomicU64`, shared with the `BaseAudioContext` that
    /// spawned it.
    pub(crate) fn with_frame_counter(
        sample_rate: SampleRate,
        channels: usize,
        receiver: Receiver<ControlMessage>,
        frames_played: Arc<AtomicU64>,
    ) -> Self {
        Self {
            graph: Graph::new(),
            sample_rate,
            channels,
            receiver,
            frames_played,
        }
    }

    fn drain_control_messages(&mut self) {
        for msg in self.receiver.try_iter() {
            self.graph.apply(msg);
        }
    }

    fn current_time(&self) -> f64 {
        self.frames_played.load(Ordering::SeqCst) as f64 / self.sample_rate.0 as f64
    }

    /// Render a single `RENDER_QUANTUM_SIZE`-frame quantum and return the
    /// destination's mixed output bus.
    pub fn render_quantum(&mut self) -> Quantum {
        self.drain_control_messages();
        let timestamp = self.current_time();
        let result = self.graph.render_quantum(timestamp, self.sample_rate);
        self.frames_played
            .fetch_add(RENDER_QUANTUM_SIZE as u64, Ordering::SeqCst);
        result
    }

    /// Render `length` frames (rounded up to a whole number of quanta) into
    /// a plain, arbitrary-length [`crate::buffer::AudioBuffer`]. Used by
    /// `OfflineAudioContext::start_rendering`.
    pub fn render_audiobuffer(&mut self, length: usize) -> crate::buffer::AudioBuffer {
        let quanta = (length + RENDER_QUANTUM_SIZE - 1) / RENDER_QUANTUM_SIZE;
        let channels = self.channels.max(1);

        let mut out = crate::buffer::AudioBuffer::new(channels, length, self.sample_rate);

        for i in 0..quanta {
            let rendered = self.render_quantum();
            let start = i * RENDER_QUANTUM_SIZE;
            let end = (start + RENDER_QUANTUM_SIZE).min(length);
            for ch in 0..channels.min(rendered.number_of_channels()) {
                let src = rendered.channel_data(ch).as_slice();
                out.channel_data_mut(ch).as_mut_slice()[start..end]
                    .copy_from_slice(&src[..end - start]);
            }
        }

        out
    }

    /// Fill an interleaved output buffer (as handed to us by a cpal stream
    /// callback), one quantum at a time.
    pub fn render_interleaved(&mut self, output: &mut [f32]) {
        let channels = self.channels.max(1);
        for frame_chunk in output.chunks_mut(channels * RENDER_QUANTUM_SIZE) {
            let quantum = self.render_quantum();
            for (frame_idx, frame) in frame_chunk.chunks_mut(channels).enumerate() {
                for (ch, sample) in frame.iter_mut().enumerate() {
                    *sample = quantum
                        .channels()
                        .get(ch)
                        .map_or(0., |c| c.as_slice()[frame_idx]);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ChannelConfigOptions, ChannelCountMode as CCM, ChannelInterpretation as CI};

    struct ConstantNode(f32);
    impl AudioProcessor for ConstantNode {
        fn process(
            &mut self,
            _inputs: &[Quantum],
            outputs: &mut [Quantum],
            _params: AudioParamValues,
            _timestamp: f64,
            _sample_rate: SampleRate,
        ) {
            outputs[0]
                .channel_data_mut(0)
                .as_mut_slice()
                .iter_mut()
                .for_each(|s| *s = self.0);
        }
        fn tail_time(&self) -> bool {
            false
        }
    }

    struct PassThrough;
    impl AudioProcessor for PassThrough {
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

    fn default_channel_config() -> ChannelConfig {
        ChannelConfigOptions {
            count: 1,
            mode: CCM::Explicit,
            interpretation: CI::Speakers,
        }
        .into()
    }

    #[test]
    fn test_simple_render() {
        let mut graph = Graph::new();
        graph.add_node(DESTINATION, Box::new(PassThrough), 1, 1, default_channel_config());
        graph.add_node(NodeIndex(1), Box::new(ConstantNode(0.5)), 0, 1, default_channel_config());
        graph.connect(NodeIndex(1), DESTINATION, 0, 0);

        let out = graph.render_quantum(0.0, SampleRate(44_100));
        assert_eq!(out.channel_data(0).as_slice()[0], 0.5);
    }

    #[test]
    fn test_disconnect_ramps_to_silence_then_removes() {
        let mut graph = Graph::new();
        graph.add_node(DESTINATION, Box::new(PassThrough), 1, 1, default_channel_config());
        graph.add_node(NodeIndex(1), Box::new(ConstantNode(1.0)), 0, 1, default_channel_config());
        graph.connect(NodeIndex(1), DESTINATION, 0, 0);

        graph.render_quantum(0.0, SampleRate(44_100));
        graph.disconnect(NodeIndex(1), DESTINATION);

        let ramping = graph.render_quantum(0.0, SampleRate(44_100));
        let s = ramping.channel_data(0).as_slice();
        assert!(s[0] > s[RENDER_QUANTUM_SIZE - 1]);

        let silent = graph.render_quantum(0.0, SampleRate(44_100));
        assert!(silent.channel_data(0).as_slice()[0].abs() < 1e-6);

        assert_eq!(graph.edges.len(), 0);
    }
}
