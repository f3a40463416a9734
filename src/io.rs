//! Adapts the render graph's pull model to a host audio device. Out of core
//! scope per spec §1/§5 ("a trait with start/stop/render"); this module is
//! the one concrete realization of that trait, built on `cpal` the way the
//! teacher crate wires its device layer.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BuildStreamError, Device, Sample, SampleFormat, Stream, StreamConfig};

use crate::graph::RenderThread;

/// Picks the system's default output device and a working `StreamConfig`,
/// deferring the actual `cpal::Stream` construction until the render thread
/// (and hence the sample rate/channel count the rest of the context is
/// built around) is known.
pub struct OutputBuilder {
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
}

impl OutputBuilder {
    /// Open the default host's default output device. Panics if no output
    /// device is available or it reports no usable config — this runs once
    /// at `AudioContext::new()`, on the main thread, where a hard failure
    /// to find a sound card is fail-fast by design (spec §7: factory calls
    /// that violate preconditions fail fast).
    pub fn new() -> Self {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .expect("no output device available");

        let supported = device
            .default_output_config()
            .expect("no default output config for device");

        let sample_format = supported.sample_format();
        let config = supported.config();

        log::debug!(
            "opened output device {:?} at {} Hz, {} channels",
            device.name().ok(),
            config.sample_rate.0,
            config.channels,
        );

        Self {
            device,
            config,
            sample_format,
        }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Build and start the output stream, driving `render` once per host
    /// buffer callback via [`RenderThread::render_interleaved`].
    ///
    /// The callback runs on cpal's real-time thread: it must not allocate or
    /// block, a contract `RenderThread` upholds by construction (spec §5).
    pub fn build(self, render: RenderThread) -> Stream {
        match self.sample_format {
            SampleFormat::F32 => self.build_typed::<f32>(render),
            SampleFormat::I16 => self.build_typed::<i16>(render),
            SampleFormat::U16 => self.build_typed::<u16>(render),
        }
        .expect("failed to build output stream")
    }

    fn build_typed<T: Sample>(self, mut render: RenderThread) -> Result<Stream, BuildStreamError> {
        let err_fn = |err| log::error!("an error occurred on the output audio stream: {}", err);

        let mut scratch: Vec<f32> = Vec::new();

        let stream = self.device.build_output_stream(
            &self.config,
            move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
                if scratch.len() != data.len() {
                    scratch.resize(data.len(), 0.);
                }
                render.render_interleaved(&mut scratch);
                for (out, &sample) in data.iter_mut().zip(scratch.iter()) {
                    *out = Sample::from(&sample.clamp(-1., 1.));
                }
            },
            err_fn,
        )?;

        stream.play().expect("failed to start output stream");
        Ok(stream)
    }
}

impl Default for OutputBuilder {
    fn default() -> Self {
        Self::new()
    }
}
