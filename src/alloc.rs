//! The fixed-size, per-render-quantum audio buffer (`Bus`/`Channel` in the
//! Web Audio API spec prose).
//!
//! This is deliberately a separate type from [`crate::buffer::AudioBuffer`]:
//! that one is an arbitrary-length, user-facing audio asset (a decoded file,
//! or the output of an `OfflineAudioContext`). This one is the fixed
//! `RENDER_QUANTUM_SIZE`-frame buffer that nodes read and write once per
//! graph pull. Every `AudioProcessor::process` call receives and returns
//! slices of this type.

use std::sync::Arc;

use crate::buffer::ChannelInterpretation;
use crate::RENDER_QUANTUM_SIZE;

/// Single channel of audio data for one render quantum.
///
/// Copy-on-write: cloning is a cheap `Arc` bump. A channel that has not been
/// written to since its last clear reports `is_silent() == true`, which
/// lets downstream code skip real work (the "silent since last clear" bit
/// from the spec's Bus invariant).
#[derive(Clone, Debug)]
pub struct Channel {
    data: Arc<[f32; RENDER_QUANTUM_SIZE]>,
    silent: bool,
}

fn silent_storage() -> Arc<[f32; RENDER_QUANTUM_SIZE]> {
    thread_local! {
        static ZERO: Arc<[f32; RENDER_QUANTUM_SIZE]> = Arc::new([0.; RENDER_QUANTUM_SIZE]);
    }
    ZERO.with(Arc::clone)
}

impl Default for Channel {
    fn default() -> Self {
        Self::silent()
    }
}

impl Channel {
    /// A channel full of zeroes, with the silence bit set.
    pub fn silent() -> Self {
        Self {
            data: silent_storage(),
            silent: true,
        }
    }

    pub fn from_values(values: [f32; RENDER_QUANTUM_SIZE]) -> Self {
        Self {
            data: Arc::new(values),
            silent: false,
        }
    }

    pub fn as_slice(&self) -> &[f32; RENDER_QUANTUM_SIZE] {
        &self.data
    }

    /// Mutable access. Clears the silence bit: the spec requires any
    /// operation that mutates channel data to do so, since the bit is purely
    /// informational bookkeeping, not a correctness guarantee about content.
    pub fn as_mut_slice(&mut self) -> &mut [f32; RENDER_QUANTUM_SIZE] {
        self.silent = false;
        Arc::make_mut(&mut self.data)
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    /// Mark this channel as produced-from-silence without touching its data.
    /// Cheap: swaps in the shared zero buffer rather than clearing in place.
    pub fn make_silent(&mut self) {
        self.data = silent_storage();
        self.silent = true;
    }

    /// Clear the silence bit without changing the underlying samples. Used
    /// right before a processor writes fresh content into a buffer it knows
    /// will not be all-zero.
    pub fn clear_silent(&mut self) {
        self.silent = false;
    }

    pub fn copy_from_slice(&mut self, src: &[f32]) {
        self.as_mut_slice().copy_from_slice(src);
    }

    pub fn scale(&mut self, factor: f32) {
        if self.silent {
            return;
        }
        self.as_mut_slice().iter_mut().for_each(|s| *s *= factor);
    }

    pub fn add_scaled(&mut self, other: &Channel, factor: f32) {
        if other.silent || factor == 0. {
            return;
        }
        let src = *other.as_slice();
        let dst = self.as_mut_slice();
        for i in 0..RENDER_QUANTUM_SIZE {
            dst[i] += src[i] * factor;
        }
    }
}

/// A fixed `RENDER_QUANTUM_SIZE`-frame, multi-channel buffer: the unit of
/// work that flows through the render graph once per quantum.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    channels: Vec<Channel>,
}

impl AudioBuffer {
    /// Allocate a silent buffer with the given channel count.
    pub fn new(number_of_channels: usize) -> Self {
        Self {
            channels: vec![Channel::silent(); number_of_channels],
        }
    }

    pub fn from_channels(channels: Vec<Channel>) -> Self {
        Self { channels }
    }

    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Resize the channel vector, padding with silence or truncating.
    pub fn set_number_of_channels(&mut self, n: usize) {
        if n < self.channels.len() {
            self.channels.truncate(n);
        } else {
            self.channels.resize_with(n, Channel::silent);
        }
    }

    pub fn force_mono(&mut self) {
        self.set_number_of_channels(1);
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    pub fn channel_data(&self, index: usize) -> &Channel {
        &self.channels[index]
    }

    pub fn channel_data_mut(&mut self, index: usize) -> &mut Channel {
        &mut self.channels[index]
    }

    /// Zero every channel and mark it silent.
    pub fn zero(&mut self) {
        self.channels.iter_mut().for_each(Channel::make_silent);
    }

    pub fn make_silent(&mut self) {
        self.zero();
    }

    pub fn clear_silent(&mut self) {
        self.channels.iter_mut().for_each(Channel::clear_silent);
    }

    pub fn is_silent(&self) -> bool {
        self.channels.iter().all(Channel::is_silent)
    }

    pub fn max_abs_value(&self) -> f32 {
        self.channels
            .iter()
            .flat_map(|c| c.as_slice().iter())
            .fold(0_f32, |acc, v| acc.max(v.abs()))
    }

    pub fn scale(&mut self, factor: f32) {
        self.channels.iter_mut().for_each(|c| c.scale(factor));
    }

    pub fn normalize(&mut self) {
        let max = self.max_abs_value();
        if max > 0. {
            self.scale(1. / max);
        }
    }

    /// Up/down-mix `src` into `self`, replacing (not summing) content.
    ///
    /// Topology-matching fast path when channel counts are equal; otherwise
    /// dispatch to the speakers- or discrete-mix rules.
    pub fn copy_from(&mut self, src: &Self, interpretation: ChannelInterpretation) {
        self.zero();
        self.sum_from(src, interpretation);
    }

    /// Up/down-mix `src` into `self`, summing into existing content.
    /// A silent `src` is a no-op, leaving `self` untouched (the spec's
    /// round-trip invariant: summing silence never changes a non-silent bus).
    pub fn sum_from(&mut self, src: &Self, interpretation: ChannelInterpretation) {
        if src.is_silent() {
            return;
        }

        let src_n = src.number_of_channels();
        let dst_n = self.number_of_channels();

        if src_n == dst_n {
            for (d, s) in self.channels.iter_mut().zip(src.channels.iter()) {
                d.add_scaled(s, 1.0);
            }
            return;
        }

        match interpretation {
            ChannelInterpretation::Speakers => self.sum_speakers(src, src_n, dst_n),
            ChannelInterpretation::Discrete => self.sum_discrete(src, src_n, dst_n),
        }
    }

    fn sum_discrete(&mut self, src: &Self, src_n: usize, dst_n: usize) {
        let n = src_n.min(dst_n);
        for i in 0..n {
            self.channels[i].add_scaled(&src.channels[i], 1.0);
        }
        // channels beyond `n` on the destination keep whatever they had: the
        // discrete rule neither zeroes nor invents channels past the min.
    }

    /// Implements the ITU-derived speakers up/down-mix table from the spec.
    /// Falls back to discrete mixing for any combination not enumerated
    /// there (matches the "Any unsupported up/down combination... falls
    /// back to Discrete" rule).
    fn sum_speakers(&mut self, src: &Self, src_n: usize, dst_n: usize) {
        const INV_SQRT2: f32 = std::f32::consts::FRAC_1_SQRT_2;

        match (src_n, dst_n) {
            (1, 2) => {
                // duplicate mono into L and R
                self.channels[0].add_scaled(&src.channels[0], 1.0);
                self.channels[1].add_scaled(&src.channels[0], 1.0);
            }
            (1, 4) => {
                // L = R = mono, SL = SR = 0 is browser-inconsistent; we
                // follow the common "front L/R carry mono, surrounds silent"
                // interpretation named in the spec.
                self.channels[0].add_scaled(&src.channels[0], 1.0);
                self.channels[1].add_scaled(&src.channels[0], 1.0);
            }
            (1, 6) => {
                // mono -> 5.1: center channel carries the signal
                self.channels[2].add_scaled(&src.channels[0], 1.0);
            }
            (2, 1) => {
                // 0.5*(L+R)
                self.channels[0].add_scaled(&src.channels[0], 0.5);
                self.channels[0].add_scaled(&src.channels[1], 0.5);
            }
            (2, 4) => {
                self.channels[0].add_scaled(&src.channels[0], 1.0);
                self.channels[1].add_scaled(&src.channels[1], 1.0);
            }
            (2, 6) => {
                self.channels[0].add_scaled(&src.channels[0], 1.0);
                self.channels[1].add_scaled(&src.channels[1], 1.0);
            }
            (4, 1) => {
                // average all four
                for c in &src.channels {
                    self.channels[0].add_scaled(c, 0.25);
                }
            }
            (4, 2) => {
                self.channels[0].add_scaled(&src.channels[0], 1.0);
                self.channels[0].add_scaled(&src.channels[2], INV_SQRT2);
                self.channels[1].add_scaled(&src.channels[1], 1.0);
                self.channels[1].add_scaled(&src.channels[3], INV_SQRT2);
            }
            (6, 1) => {
                // sqrt(0.5)*(L+R) + C + 0.5*(SL+SR)
                let l = &src.channels[0];
                let r = &src.channels[1];
                let c = &src.channels[2];
                let sl = &src.channels[4];
                let sr = &src.channels[5];
                self.channels[0].add_scaled(l, INV_SQRT2);
                self.channels[0].add_scaled(r, INV_SQRT2);
                self.channels[0].add_scaled(c, 1.0);
                self.channels[0].add_scaled(sl, 0.5);
                self.channels[0].add_scaled(sr, 0.5);
            }
            (6, 2) => {
                // L' = L + sqrt(0.5)*(C+SL), R' = R + sqrt(0.5)*(C+SR)
                let l = &src.channels[0];
                let r = &src.channels[1];
                let c = &src.channels[2];
                let sl = &src.channels[4];
                let sr = &src.channels[5];
                self.channels[0].add_scaled(l, 1.0);
                self.channels[0].add_scaled(c, INV_SQRT2);
                self.channels[0].add_scaled(sl, INV_SQRT2);
                self.channels[1].add_scaled(r, 1.0);
                self.channels[1].add_scaled(c, INV_SQRT2);
                self.channels[1].add_scaled(sr, INV_SQRT2);
            }
            _ => self.sum_discrete(src, src_n, dst_n),
        }
    }

    /// Up/down-mix in place to `channels` using the given interpretation.
    /// Used by the summing junction once the computed channel count for a
    /// quantum is known.
    pub fn mix(&mut self, channels: usize, interpretation: ChannelInterpretation) {
        if channels == self.number_of_channels() {
            return;
        }
        let src = self.clone();
        self.channels = vec![Channel::silent(); channels];
        self.sum_from(&src, interpretation);
    }

    /// De-zippered gain summation: ramps `last_mix_gain` linearly to
    /// `target_gain` over this quantum, applying the ramp sample-accurately,
    /// and leaves `last_mix_gain` holding the gain that was in effect at the
    /// end of the quantum (so the next call starts where this one left off).
    pub fn copy_with_gain_from(&mut self, src: &Self, last_mix_gain: &mut f32, target_gain: f32) {
        self.set_number_of_channels(src.number_of_channels());

        let start = *last_mix_gain;
        let end = target_gain;

        if (start - end).abs() < 1e-9 {
            for (d, s) in self.channels.iter_mut().zip(src.channels.iter()) {
                if s.is_silent() || end == 0. {
                    d.make_silent();
                } else {
                    d.clear_silent();
                    let dst = d.as_mut_slice();
                    let srcs = s.as_slice();
                    for i in 0..RENDER_QUANTUM_SIZE {
                        dst[i] = srcs[i] * end;
                    }
                }
            }
            *last_mix_gain = end;
            return;
        }

        let step = (end - start) / RENDER_QUANTUM_SIZE as f32;
        for (d, s) in self.channels.iter_mut().zip(src.channels.iter()) {
            d.clear_silent();
            let dst = d.as_mut_slice();
            let srcs = s.as_slice();
            for i in 0..RENDER_QUANTUM_SIZE {
                let gain = start + step * (i + 1) as f32;
                dst[i] = srcs[i] * gain;
            }
        }

        *last_mix_gain = end;
    }

    /// Per-sample multiply by an explicit a-rate gain curve.
    pub fn copy_with_sample_accurate_gain_values_from(
        &mut self,
        src: &Self,
        gains: &[f32; RENDER_QUANTUM_SIZE],
    ) {
        self.set_number_of_channels(src.number_of_channels());
        for (d, s) in self.channels.iter_mut().zip(src.channels.iter()) {
            if s.is_silent() {
                d.make_silent();
                continue;
            }
            d.clear_silent();
            let dst = d.as_mut_slice();
            let srcs = s.as_slice();
            for i in 0..RENDER_QUANTUM_SIZE {
                dst[i] = srcs[i] * gains[i];
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_silence_roundtrip() {
        let mut a = AudioBuffer::new(2);
        assert!(a.is_silent());
        a.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        assert!(!a.is_silent());
        a.make_silent();
        assert!(a.is_silent());
    }

    #[test]
    fn test_copy_from_idempotent() {
        let mut src = AudioBuffer::new(1);
        src.channel_data_mut(0).as_mut_slice()[0] = 0.5;

        let mut dst = AudioBuffer::new(1);
        dst.copy_from(&src, ChannelInterpretation::Speakers);
        let once = dst.channel_data(0).as_slice()[0];

        dst.copy_from(&src, ChannelInterpretation::Speakers);
        let twice = dst.channel_data(0).as_slice()[0];

        assert_eq!(once, twice);
        assert_eq!(once, 0.5);
    }

    #[test]
    fn test_sum_silence_is_noop() {
        let silent = AudioBuffer::new(1);
        let mut dst = AudioBuffer::new(1);
        dst.channel_data_mut(0).as_mut_slice()[0] = 0.25;

        dst.sum_from(&silent, ChannelInterpretation::Speakers);
        assert_eq!(dst.channel_data(0).as_slice()[0], 0.25);
    }

    #[test]
    fn test_stereo_to_mono_down_mix() {
        let mut src = AudioBuffer::new(2);
        src.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        src.channel_data_mut(1).as_mut_slice()[0] = 3.0;

        let mut dst = AudioBuffer::new(1);
        dst.copy_from(&src, ChannelInterpretation::Speakers);
        assert_eq!(dst.channel_data(0).as_slice()[0], 2.0);
    }

    #[test]
    fn test_51_to_stereo_down_mix() {
        let mut src = AudioBuffer::new(6);
        // L R C LFE SL SR
        src.channel_data_mut(0).as_mut_slice()[0] = 1.0;
        src.channel_data_mut(2).as_mut_slice()[0] = 2.0;
        src.channel_data_mut(4).as_mut_slice()[0] = 4.0;

        let mut dst = AudioBuffer::new(2);
        dst.copy_from(&src, ChannelInterpretation::Speakers);

        let inv_sqrt2 = std::f32::consts::FRAC_1_SQRT_2;
        let expected_l = 1.0 + inv_sqrt2 * (2.0 + 4.0);
        assert!((dst.channel_data(0).as_slice()[0] - expected_l).abs() < 1e-6);
    }

    #[test]
    fn test_gain_dezipper_reaches_target() {
        let mut src = AudioBuffer::new(1);
        src.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 1.0);

        let mut dst = AudioBuffer::new(1);
        let mut last_gain = 0.0;
        dst.copy_with_gain_from(&src, &mut last_gain, 1.0);

        assert_eq!(last_gain, 1.0);
        assert_eq!(dst.channel_data(0).as_slice()[0], 1.0 / RENDER_QUANTUM_SIZE as f32);
        assert_eq!(
            dst.channel_data(0).as_slice()[RENDER_QUANTUM_SIZE - 1],
            1.0
        );
    }
}
