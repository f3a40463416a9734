//! A pure Rust implementation of the Web Audio API render engine, for use in
//! non-browser contexts.
//!
//! This crate owns the render graph, the parameter automation model, sample
//! accurate source scheduling, channel mixing, HRTF spatialization and the
//! partitioned convolution reverb. It does not own audio device I/O beyond a
//! small [`io::AudioDevice`] trait, nor file decoding beyond [`decoding::decode`].

#![warn(clippy::all)]

use std::fmt;

pub mod alloc;
pub mod analysis;
pub mod buffer;
pub mod context;
pub mod control;
pub mod decoding;
pub mod graph;
pub mod hrtf;
pub mod io;
pub mod media;
pub mod message;
pub mod node;
pub mod param;
pub mod process;
pub mod reverb;
pub mod spatial;

/// Render quantum size, the fixed number of frames processed per graph pull.
///
/// The Web Audio API spec calls this `render quantum size`; it is fixed at
/// 128 frames for all contexts.
pub const RENDER_QUANTUM_SIZE: usize = 128;

/// `u32` alias of [`RENDER_QUANTUM_SIZE`] for call sites that need a frame
/// count in the same integer width as `SampleRate`.
pub const BUFFER_SIZE: u32 = RENDER_QUANTUM_SIZE as u32;

/// Sample rate in Hertz, as an integer (the Web Audio API spec allows
/// fractional sample rates, but no real device exposes one).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleRate(pub u32);

impl From<u32> for SampleRate {
    fn from(v: u32) -> Self {
        SampleRate(v)
    }
}

impl fmt::Display for SampleRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} Hz", self.0)
    }
}

/// An atomic float, backed by bit-transmutation into `AtomicU64`.
///
/// `std::sync::atomic` has no `AtomicF64`, so we roll our own the way the
/// teacher crate does (see `control::Scheduler`).
#[derive(Debug)]
pub struct AtomicF64 {
    inner: std::sync::atomic::AtomicU64,
}

impl AtomicF64 {
    pub fn new(v: f64) -> Self {
        Self {
            inner: std::sync::atomic::AtomicU64::new(v.to_bits()),
        }
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.inner.load(std::sync::atomic::Ordering::SeqCst))
    }

    pub fn store(&self, v: f64) {
        self.inner
            .store(v.to_bits(), std::sync::atomic::Ordering::SeqCst)
    }

    pub fn swap(&self, v: f64) -> f64 {
        f64::from_bits(
            self.inner
                .swap(v.to_bits(), std::sync::atomic::Ordering::SeqCst),
        )
    }
}

/// Error raised when an index or count argument is out of the valid range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexSizeError {}

impl fmt::Display for IndexSizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "index or size was negative or greater than the allowed value")
    }
}

impl std::error::Error for IndexSizeError {}

/// Error raised when an operation is attempted that is not valid for the
/// current state of the node or context (e.g. scheduling a source that has
/// already finished).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidStateError {
    pub message: String,
}

impl fmt::Display for InvalidStateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid state: {}", self.message)
    }
}

impl std::error::Error for InvalidStateError {}

/// Error raised when an automation call cannot be honored as specified
/// (e.g. an exponential ramp targeting a non-positive value).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationError {
    pub message: String,
}

impl fmt::Display for AutomationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "automation error: {}", self.message)
    }
}

impl std::error::Error for AutomationError {}

/// Error raised when the requested configuration is not supported (e.g. a
/// channel count of zero, or an HRTF database that could not be located).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotSupportedError {
    pub message: String,
}

impl fmt::Display for NotSupportedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "not supported: {}", self.message)
    }
}

impl std::error::Error for NotSupportedError {}

/// Raised by a [`media::MediaStream`] when no new data is available yet but
/// the stream has not ended either.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferDepletedError {}

impl fmt::Display for BufferDepletedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer depleted")
    }
}

impl std::error::Error for BufferDepletedError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f64() {
        let a = AtomicF64::new(1.5);
        assert_eq!(a.load(), 1.5);
        assert_eq!(a.swap(2.5), 1.5);
        assert_eq!(a.load(), 2.5);
    }
}
