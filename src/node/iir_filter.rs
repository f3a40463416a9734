//! IIRFilterNode: a general-purpose IIR filter with client-supplied coefficients.

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions};
use crate::context::{AsBaseAudioContext, AudioContextRegistration};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::SampleRate;

use super::AudioNode;

/// Options for constructing an [`IirFilterNode`].
#[derive(Clone, Debug)]
pub struct IirFilterOptions {
    pub feedforward: Vec<f64>,
    pub feedback: Vec<f64>,
    pub channel_config: ChannelConfigOptions,
}

/// AudioNode implementing a general IIR filter, `y[n] = sum(b_i*x[n-i]) - sum(a_j*y[n-j])`
/// (normalized so `a_0 == 1`).
pub struct IirFilterNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
}

impl AudioNode for IirFilterNode {
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

impl IirFilterNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: IirFilterOptions) -> Self {
        if options.feedforward.is_empty() || options.feedforward.len() > 20 {
            panic!("feedforward coefficients must have length in [1, 20]");
        }
        if options.feedback.is_empty() || options.feedback.len() > 20 {
            panic!("feedback coefficients must have length in [1, 20]");
        }
        if options.feedback[0] == 0. {
            panic!("feedback[0] must not be zero");
        }

        context.base().register(move |registration| {
            let node = IirFilterNode {
                registration,
                channel_config: options.channel_config.into(),
            };

            let a0 = options.feedback[0];
            let feedforward: Vec<f64> = options.feedforward.iter().map(|b| b / a0).collect();
            let feedback: Vec<f64> = options.feedback.iter().map(|a| a / a0).collect();

            let render = IirFilterRenderer {
                feedforward,
                feedback,
                x_history: Vec::new(),
                y_history: Vec::new(),
            };

            (node, Box::new(render))
        })
    }
}

struct IirFilterRenderer {
    feedforward: Vec<f64>,
    feedback: Vec<f64>,
    /// per-channel ring of past input samples, most recent last
    x_history: Vec<Vec<f64>>,
    /// per-channel ring of past output samples, most recent last
    y_history: Vec<Vec<f64>>,
}

impl AudioProcessor for IirFilterRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        _params: AudioParamValues,
        _timestamp: f64,
        _sample_rate: SampleRate,
    ) {
        let input = &inputs[0];
        let output = &mut outputs[0];
        let channels = input.number_of_channels().max(1);
        output.set_number_of_channels(channels);

        if self.x_history.len() != channels {
            self.x_history = vec![vec![0.; self.feedforward.len()]; channels];
            self.y_history = vec![vec![0.; self.feedback.len() - 1]; channels];
        }

        for ch in 0..channels {
            let src = input.channel_data(ch.min(input.number_of_channels() - 1)).as_slice();
            let dst = output.channel_data_mut(ch).as_mut_slice();
            let xh = &mut self.x_history[ch];
            let yh = &mut self.y_history[ch];

            for i in 0..crate::RENDER_QUANTUM_SIZE {
                xh.rotate_left(1);
                let n = xh.len();
                xh[n - 1] = src[i] as f64;

                let mut y = 0.0_f64;
                for (k, coeff) in self.feedforward.iter().enumerate() {
                    y += coeff * xh[n - 1 - k];
                }
                for (k, coeff) in self.feedback.iter().skip(1).enumerate() {
                    if k < yh.len() {
                        y -= coeff * yh[yh.len() - 1 - k];
                    }
                }

                if !yh.is_empty() {
                    yh.rotate_left(1);
                    let m = yh.len();
                    yh[m - 1] = y;
                }

                dst[i] = y as f32;
            }
        }
    }

    fn tail_time(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iir_identity_passthrough() {
        let mut renderer = IirFilterRenderer {
            feedforward: vec![1.0],
            feedback: vec![1.0],
            x_history: Vec::new(),
            y_history: Vec::new(),
        };
        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice()[0] = 0.5;
        let mut outputs = vec![Quantum::new(1)];
        let values = std::collections::HashMap::new();
        renderer.process(
            &[input],
            &mut outputs,
            AudioParamValues::new(&values),
            0.,
            SampleRate(44_100),
        );
        assert_eq!(outputs[0].channel_data(0).as_slice()[0], 0.5);
    }
}
