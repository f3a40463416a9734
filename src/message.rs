//! Messages sent from the control thread to the render thread to edit the
//! render graph or schedule a parameter automation event.
//!
//! The render thread drains these from an unbounded [`crossbeam_channel`]
//! at the start of every quantum, before pulling the graph. Nothing about
//! applying a message blocks or allocates on a hot path that matters: graph
//! edits are rare compared to render calls.

use crossbeam_channel::Sender;

use crate::buffer::ChannelConfig;
use crate::param::AutomationEvent;
use crate::process::AudioProcessor;

pub enum ControlMessage {
    /// Register a newly constructed node's processor with the graph.
    RegisterNode {
        id: u64,
        node: Box<dyn AudioProcessor>,
        inputs: usize,
        outputs: usize,
        channel_config: ChannelConfig,
    },

    /// Connect output `output` of node `from` to input `input` of node `to`.
    ConnectNode {
        from: u64,
        to: u64,
        output: u32,
        input: u32,
    },

    /// Remove every edge from node `from` to node `to`.
    DisconnectNode { from: u64, to: u64 },

    /// Remove every outgoing edge from node `from`.
    DisconnectAll { from: u64 },

    /// Append an automation event to an `AudioParam`'s timeline. Wrapping the
    /// per-param `Sender` inside this message (rather than sending directly
    /// on it) ensures automation events are applied in the same relative
    /// order as other graph edits the control thread issued.
    AudioParamEvent {
        to: Sender<AutomationEvent>,
        event: AutomationEvent,
    },

    /// Drop node `id` once its processor reports it is done producing
    /// sound (no tail time and silent inputs). Used for source nodes and
    /// other nodes whose `AudioNode` handle has already been dropped on the
    /// control thread but whose render-side tail may still be ringing.
    FreeWhenFinished { id: u64 },
}
