//! External media input: the [`MediaStream`] trait that any external audio
//! producer (a microphone capture loop, a decoded file, a network stream)
//! implements to be usable as a node's source, and [`MediaElement`], a
//! concrete seekable/loopable wrapper used by `MediaElementAudioSourceNode`.

use std::error::Error;
use std::fmt;
use std::sync::mpsc::{Receiver, Sender};

use crate::buffer::AudioBuffer;
use crate::BufferDepletedError;

/// A stream of audio data, delivered one (arbitrarily-sized) buffer at a
/// time. This is the trait `AudioContext::create_media_stream_source` and
/// `Resampler` are generic over.
///
/// Implemented for any `Iterator<Item = Result<AudioBuffer, Box<dyn Error + Send>>>`,
/// so a plain `std::iter::Iterator` of decoded chunks (e.g. from
/// [`crate::decoding::decode`]) is usable directly.
pub trait MediaStream:
    Iterator<Item = Result<AudioBuffer, Box<dyn Error + Send>>> + Send + 'static
{
}

impl<M: Iterator<Item = Result<AudioBuffer, Box<dyn Error + Send>>> + Send + 'static> MediaStream
    for M
{
}

/// Error raised when pushing a chunk onto a `MediaElement` that has already
/// been marked as ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaElementClosedError {}

impl fmt::Display for MediaElementClosedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "media element has already been closed")
    }
}

impl Error for MediaElementClosedError {}

/// A pull-based, possibly looping source of decoded audio chunks, fed from
/// another thread (e.g. a file decoder or a network download) through a
/// channel. Used by `MediaElementAudioSourceNode` and, unlike a raw
/// [`MediaStream`], supports [`crate::node::AudioControllableSourceNode`]'s
/// loop/seek controls by buffering everything it has seen so far.
pub struct MediaElement {
    receiver: Receiver<Result<AudioBuffer, Box<dyn Error + Send>>>,
    /// chunks already pulled from `receiver`, kept around so `seek`/looping
    /// can replay them without re-requesting from the producer.
    buffered: Vec<AudioBuffer>,
    /// index into `buffered` of the next chunk to hand out
    cursor: usize,
    finished: bool,
}

/// The producer-side handle for a [`MediaElement`]: push decoded chunks to
/// it from a decoder thread, and signal end-of-stream when done.
pub struct MediaElementSink {
    sender: Sender<Result<AudioBuffer, Box<dyn Error + Send>>>,
}

impl MediaElementSink {
    pub fn send(&self, buffer: AudioBuffer) {
        let _ = self.sender.send(Ok(buffer));
    }

    pub fn send_error(&self, error: Box<dyn Error + Send>) {
        let _ = self.sender.send(Err(error));
    }
}

impl MediaElement {
    /// Create a connected `(MediaElement, MediaElementSink)` pair: chunks
    /// pushed to the sink become available, in order, from the element.
    pub fn new() -> (Self, MediaElementSink) {
        let (sender, receiver) = std::sync::mpsc::channel();
        (
            Self {
                receiver,
                buffered: Vec::new(),
                cursor: 0,
                finished: false,
            },
            MediaElementSink { sender },
        )
    }

    /// Wrap an already-fully-decoded buffer (e.g. the result of
    /// [`crate::decoding::decode`]) as a `MediaElement`, split into
    /// `RENDER_QUANTUM_SIZE`-ish chunks.
    pub fn from_buffer(buffer: AudioBuffer, chunk_len: usize) -> Self {
        let chunk_len = chunk_len.max(1);
        let mut remaining = buffer;
        let mut buffered = Vec::new();
        loop {
            if remaining.sample_len() <= chunk_len {
                buffered.push(remaining);
                break;
            }
            let rest = remaining.split_off(chunk_len as u32);
            buffered.push(remaining);
            remaining = rest;
        }

        let (_tx, rx) = std::sync::mpsc::channel();
        Self {
            receiver: rx,
            buffered,
            cursor: 0,
            finished: true,
        }
    }

    fn pull_more(&mut self) {
        while let Ok(item) = self.receiver.try_recv() {
            match item {
                Ok(buffer) => self.buffered.push(buffer),
                Err(_) => self.finished = true,
            }
        }
    }

    /// Rewind playback to the chunk covering `timestamp` seconds. A coarse
    /// seek: it lands on the closest chunk boundary at or before `timestamp`.
    pub fn seek(&mut self, timestamp: f64) {
        let mut elapsed = 0.0;
        self.cursor = 0;
        for (i, chunk) in self.buffered.iter().enumerate() {
            let duration = chunk.duration();
            if elapsed + duration > timestamp {
                self.cursor = i;
                return;
            }
            elapsed += duration;
        }
        self.cursor = self.buffered.len();
    }
}

impl Iterator for MediaElement {
    type Item = Result<AudioBuffer, Box<dyn Error + Send>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.pull_more();

        if let Some(chunk) = self.buffered.get(self.cursor) {
            self.cursor += 1;
            return Some(Ok(chunk.clone()));
        }

        if self.finished {
            None
        } else {
            Some(Err(Box::new(BufferDepletedError {})))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ChannelData;
    use crate::SampleRate;

    #[test]
    fn test_media_element_from_buffer_chunks() {
        let channel = ChannelData::from(vec![1., 2., 3., 4., 5., 6.]);
        let buffer = AudioBuffer::from_channels(vec![channel], SampleRate(44_100));
        let mut element = MediaElement::from_buffer(buffer, 2);

        let c0 = element.next().unwrap().unwrap();
        assert_eq!(c0.sample_len(), 2);
        let c1 = element.next().unwrap().unwrap();
        assert_eq!(c1.sample_len(), 2);
        let c2 = element.next().unwrap().unwrap();
        assert_eq!(c2.sample_len(), 2);
        assert!(element.next().is_none());
    }

    #[test]
    fn test_media_element_sink_depleted_then_resumes() {
        let (mut element, sink) = MediaElement::new();
        assert!(element.next().unwrap().is_err());

        let channel = ChannelData::from(vec![1., 2., 3.]);
        sink.send(AudioBuffer::from_channels(
            vec![channel],
            SampleRate(44_100),
        ));
        let chunk = element.next().unwrap().unwrap();
        assert_eq!(chunk.sample_len(), 3);
    }
}
