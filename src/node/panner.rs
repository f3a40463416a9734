//! PannerNode: spatializes a source in 3D space relative to the
//! [`crate::spatial::AudioListener`], either via cheap equal-power stereo
//! panning or, when an [`crate::hrtf::HrtfDatabase`] is supplied, measured
//! HRTF convolution (spec §4.8).
//!
//! Grounded on LabSound's `PannerNode`/`Spatializer`: azimuth/elevation and
//! distance/cone gain follow the Web Audio API's published formulas; the
//! HRTF path reuses this crate's [`crate::hrtf`] kernel database and the
//! reverb module's scatter-add ring (`crate::reverb::scatter_add`) for its
//! per-ear overlap-add convolution.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use vecmath::{vec3_cross, vec3_dot, vec3_len, vec3_normalized, vec3_scale, vec3_sub, Vector3};

use crate::alloc::AudioBuffer as Quantum;
use crate::buffer::{ChannelConfig, ChannelConfigOptions, ChannelCountMode, ChannelInterpretation};
use crate::context::{AsBaseAudioContext, AudioContextRegistration, AudioParamId};
use crate::hrtf::{HrtfDatabase, HrtfDatabaseHandle, HrtfKernel};
use crate::param::{AudioParam, AudioParamOptions, AutomationRate};
use crate::process::{AudioParamValues, AudioProcessor};
use crate::reverb::scatter_add;
use crate::{AtomicF64, RENDER_QUANTUM_SIZE, SampleRate};

use super::AudioNode;

/// Spatialization algorithm used by a [`PannerNode`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PanningModel {
    EqualPower,
    Hrtf,
}

impl Default for PanningModel {
    fn default() -> Self {
        PanningModel::EqualPower
    }
}

fn decode_panning_model(v: u32) -> PanningModel {
    match v {
        1 => PanningModel::Hrtf,
        _ => PanningModel::EqualPower,
    }
}

/// How a [`PannerNode`] attenuates gain over distance.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DistanceModel {
    Linear,
    Inverse,
    Exponential,
}

impl Default for DistanceModel {
    fn default() -> Self {
        DistanceModel::Inverse
    }
}

fn decode_distance_model(v: u32) -> DistanceModel {
    match v {
        0 => DistanceModel::Linear,
        2 => DistanceModel::Exponential,
        _ => DistanceModel::Inverse,
    }
}

/// Options for constructing a [`PannerNode`].
#[derive(Clone)]
pub struct PannerOptions {
    pub panning_model: PanningModel,
    pub distance_model: DistanceModel,
    pub position_x: f32,
    pub position_y: f32,
    pub position_z: f32,
    pub orientation_x: f32,
    pub orientation_y: f32,
    pub orientation_z: f32,
    pub ref_distance: f64,
    pub max_distance: f64,
    pub rolloff_factor: f64,
    pub cone_inner_angle: f64,
    pub cone_outer_angle: f64,
    pub cone_outer_gain: f64,
    /// Measured HRTF impulse responses to spatialize against when
    /// `panning_model` is [`PanningModel::Hrtf`]. `None` falls back to
    /// equal-power panning (with a one-time warning) so a panner can always
    /// be constructed even before a database has finished loading elsewhere.
    pub hrtf_database: Option<Arc<HrtfDatabaseHandle>>,
    pub channel_config: ChannelConfigOptions,
}

impl Default for PannerOptions {
    fn default() -> Self {
        Self {
            panning_model: PanningModel::EqualPower,
            distance_model: DistanceModel::Inverse,
            position_x: 0.,
            position_y: 0.,
            position_z: 0.,
            orientation_x: 1.,
            orientation_y: 0.,
            orientation_z: 0.,
            ref_distance: 1.,
            max_distance: 10_000.,
            rolloff_factor: 1.,
            cone_inner_angle: 360.,
            cone_outer_angle: 360.,
            cone_outer_gain: 0.,
            hrtf_database: None,
            channel_config: ChannelConfigOptions {
                count: 2,
                mode: ChannelCountMode::ClampedMax,
                interpretation: ChannelInterpretation::Speakers,
            },
        }
    }
}

/// The non-automatable part of a panner's configuration (everything except
/// position/orientation, which are `AudioParam`s). Each field is a plain
/// `Setting` (spec §3): no event list, no interpolation, just a value the
/// render thread reads via a memory-ordered load, matching
/// [`BiquadFilterNode`]'s `AtomicU32`-backed `type_`.
struct PannerSettings {
    panning_model: AtomicU32,
    distance_model: AtomicU32,
    ref_distance: AtomicF64,
    max_distance: AtomicF64,
    rolloff_factor: AtomicF64,
    cone_inner_angle: AtomicF64,
    cone_outer_angle: AtomicF64,
    cone_outer_gain: AtomicF64,
}

/// AudioNode for spatializing a source in 3D space. Has 10 inputs: input 0
/// is the audio signal, inputs 1-9 are the listener's 9 coordinate signals
/// (wired automatically by `connect_listener_to_panner`); it has a single
/// stereo output.
pub struct PannerNode {
    registration: AudioContextRegistration,
    channel_config: ChannelConfig,
    position_x: AudioParam,
    position_y: AudioParam,
    position_z: AudioParam,
    orientation_x: AudioParam,
    orientation_y: AudioParam,
    orientation_z: AudioParam,
    settings: Arc<PannerSettings>,
}

impl AudioNode for PannerNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
    fn channel_config_raw(&self) -> &ChannelConfig {
        &self.channel_config
    }
    fn number_of_inputs(&self) -> u32 {
        10
    }
    fn number_of_outputs(&self) -> u32 {
        1
    }
}

impl PannerNode {
    pub fn new<C: AsBaseAudioContext>(context: &C, options: PannerOptions) -> Self {
        context.base().register(move |registration| {
            let a_rate = |default_value: f32| AudioParamOptions {
                default_value,
                min_value: f32::MIN,
                max_value: f32::MAX,
                automation_rate: AutomationRate::A,
            };

            let (position_x, position_x_id) =
                context.create_audio_param(a_rate(options.position_x), registration.id());
            let (position_y, position_y_id) =
                context.create_audio_param(a_rate(options.position_y), registration.id());
            let (position_z, position_z_id) =
                context.create_audio_param(a_rate(options.position_z), registration.id());
            let (orientation_x, orientation_x_id) =
                context.create_audio_param(a_rate(options.orientation_x), registration.id());
            let (orientation_y, orientation_y_id) =
                context.create_audio_param(a_rate(options.orientation_y), registration.id());
            let (orientation_z, orientation_z_id) =
                context.create_audio_param(a_rate(options.orientation_z), registration.id());

            context.base().connect_listener_to_panner(registration.id());

            let settings = Arc::new(PannerSettings {
                panning_model: AtomicU32::new(options.panning_model as u32),
                distance_model: AtomicU32::new(options.distance_model as u32),
                ref_distance: AtomicF64::new(options.ref_distance),
                max_distance: AtomicF64::new(options.max_distance),
                rolloff_factor: AtomicF64::new(options.rolloff_factor),
                cone_inner_angle: AtomicF64::new(options.cone_inner_angle),
                cone_outer_angle: AtomicF64::new(options.cone_outer_angle),
                cone_outer_gain: AtomicF64::new(options.cone_outer_gain),
            });

            let node = PannerNode {
                registration,
                channel_config: options.channel_config.into(),
                position_x,
                position_y,
                position_z,
                orientation_x,
                orientation_y,
                orientation_z,
                settings: settings.clone(),
            };

            let render = PannerRenderer {
                position_x: position_x_id,
                position_y: position_y_id,
                position_z: position_z_id,
                orientation_x: orientation_x_id,
                orientation_y: orientation_y_id,
                orientation_z: orientation_z_id,
                settings,
                hrtf_database: options.hrtf_database,
                hrtf_state: None,
                warned_no_hrtf: false,
            };

            (node, Box::new(render) as Box<dyn AudioProcessor>)
        })
    }

    pub fn position_x(&self) -> &AudioParam {
        &self.position_x
    }
    pub fn position_y(&self) -> &AudioParam {
        &self.position_y
    }
    pub fn position_z(&self) -> &AudioParam {
        &self.position_z
    }
    pub fn orientation_x(&self) -> &AudioParam {
        &self.orientation_x
    }
    pub fn orientation_y(&self) -> &AudioParam {
        &self.orientation_y
    }
    pub fn orientation_z(&self) -> &AudioParam {
        &self.orientation_z
    }

    pub fn panning_model(&self) -> PanningModel {
        decode_panning_model(self.settings.panning_model.load(Ordering::SeqCst))
    }
    pub fn set_panning_model(&self, model: PanningModel) {
        self.settings.panning_model.store(model as u32, Ordering::SeqCst);
    }
    pub fn distance_model(&self) -> DistanceModel {
        decode_distance_model(self.settings.distance_model.load(Ordering::SeqCst))
    }
    pub fn set_distance_model(&self, model: DistanceModel) {
        self.settings.distance_model.store(model as u32, Ordering::SeqCst);
    }
    pub fn ref_distance(&self) -> f64 {
        self.settings.ref_distance.load()
    }
    pub fn set_ref_distance(&self, value: f64) {
        self.settings.ref_distance.store(value);
    }
    pub fn max_distance(&self) -> f64 {
        self.settings.max_distance.load()
    }
    pub fn set_max_distance(&self, value: f64) {
        self.settings.max_distance.store(value);
    }
    pub fn rolloff_factor(&self) -> f64 {
        self.settings.rolloff_factor.load()
    }
    pub fn set_rolloff_factor(&self, value: f64) {
        self.settings.rolloff_factor.store(value);
    }
    pub fn cone_inner_angle(&self) -> f64 {
        self.settings.cone_inner_angle.load()
    }
    pub fn set_cone_inner_angle(&self, value: f64) {
        self.settings.cone_inner_angle.store(value);
    }
    pub fn cone_outer_angle(&self) -> f64 {
        self.settings.cone_outer_angle.load()
    }
    pub fn set_cone_outer_angle(&self, value: f64) {
        self.settings.cone_outer_angle.store(value);
    }
    pub fn cone_outer_gain(&self) -> f64 {
        self.settings.cone_outer_gain.load()
    }
    pub fn set_cone_outer_gain(&self, value: f64) {
        self.settings.cone_outer_gain.store(value);
    }
}

/// Frames a crossfade between the currently-active HRTF voice and the one
/// fading in runs for. 2048 frames (~46ms at 44.1kHz) below 88.2kHz, double
/// that above, so the fade duration stays roughly constant in wall-clock
/// time regardless of sample rate.
fn hrtf_fade_frames(sample_rate: f32) -> usize {
    if sample_rate >= 88_200. {
        4096
    } else {
        2048
    }
}

/// Per-ear overlap-add block convolver against a single (possibly changing)
/// [`HrtfKernel`]. The kernel's own FFT size determines the ring length:
/// since the kernel never has more taps than `fft_size / 2`, one ring the
/// size of the FFT is enough headroom for the full linear-convolution tail.
struct EarConvolver {
    ring: Vec<f32>,
    ring_len: usize,
    cursor: usize,
}

impl EarConvolver {
    fn new(fft_size: usize) -> Self {
        Self {
            ring: vec![0.; fft_size],
            ring_len: fft_size,
            cursor: 0,
        }
    }

    fn process(&mut self, kernel: &HrtfKernel, input: &[f32; RENDER_QUANTUM_SIZE]) -> [f32; RENDER_QUANTUM_SIZE] {
        let spectrum = kernel.fft().forward(input);
        let wet = kernel.convolve(&spectrum);
        scatter_add(&mut self.ring, self.ring_len, self.cursor, &wet);

        let mut out = [0f32; RENDER_QUANTUM_SIZE];
        for (i, sample) in out.iter_mut().enumerate() {
            let pos = (self.cursor + i) % self.ring_len;
            *sample = self.ring[pos];
            self.ring[pos] = 0.;
        }
        self.cursor = (self.cursor + RENDER_QUANTUM_SIZE) % self.ring_len;
        out
    }
}

/// Small fractional delay line applying the per-ear head delay extracted by
/// [`HrtfKernel::from_impulse_response`] (interaural time difference), with
/// linear interpolation between samples.
struct FractionalDelayLine {
    ring: Vec<f32>,
    write_index: usize,
}

impl FractionalDelayLine {
    fn new(len: usize) -> Self {
        Self {
            ring: vec![0.; len.max(2)],
            write_index: 0,
        }
    }

    fn process(&mut self, input: &[f32; RENDER_QUANTUM_SIZE], delay_samples: f32) -> [f32; RENDER_QUANTUM_SIZE] {
        let len = self.ring.len();
        let delay_samples = delay_samples.clamp(0., (len - 2) as f32);

        let mut out = [0f32; RENDER_QUANTUM_SIZE];
        for (i, sample) in out.iter_mut().enumerate() {
            let read_pos = (self.write_index as f32 - delay_samples + len as f32) % len as f32;
            let i0 = read_pos.floor() as usize % len;
            let i1 = (i0 + 1) % len;
            let frac = read_pos - read_pos.floor();
            *sample = self.ring[i0] * (1. - frac) + self.ring[i1] * frac;

            self.ring[self.write_index] = input[i];
            self.write_index = (self.write_index + 1) % len;
        }
        out
    }
}

/// One complete HRTF convolution chain (both ears): used in pairs so one can
/// fade in while the other fades out on a discrete azimuth/elevation index
/// change.
struct HrtfVoice {
    left: EarConvolver,
    right: EarConvolver,
    left_delay: FractionalDelayLine,
    right_delay: FractionalDelayLine,
}

impl HrtfVoice {
    fn new(fft_size: usize, delay_ring_len: usize) -> Self {
        Self {
            left: EarConvolver::new(fft_size),
            right: EarConvolver::new(fft_size),
            left_delay: FractionalDelayLine::new(delay_ring_len),
            right_delay: FractionalDelayLine::new(delay_ring_len),
        }
    }

    fn process(
        &mut self,
        kernel_l: &HrtfKernel,
        kernel_r: &HrtfKernel,
        delay_l: f32,
        delay_r: f32,
        input: &[f32; RENDER_QUANTUM_SIZE],
        sample_rate: f32,
    ) -> ([f32; RENDER_QUANTUM_SIZE], [f32; RENDER_QUANTUM_SIZE]) {
        let wet_l = self.left.process(kernel_l, input);
        let wet_r = self.right.process(kernel_r, input);
        let out_l = self.left_delay.process(&wet_l, delay_l * sample_rate);
        let out_r = self.right_delay.process(&wet_r, delay_r * sample_rate);
        (out_l, out_r)
    }
}

struct Crossfade {
    frames_done: usize,
    total_frames: usize,
}

/// Lazily constructed once an [`HrtfDatabaseHandle`] reports ready: holds the
/// two voices, which one is active, and any crossfade in flight.
struct HrtfState {
    voices: [HrtfVoice; 2],
    active: usize,
    crossfade: Option<Crossfade>,
    selection: Option<(usize, usize)>,
    current_kernel_l: HrtfKernel,
    current_kernel_r: HrtfKernel,
    current_delay_l: f32,
    current_delay_r: f32,
    pending: Option<(HrtfKernel, HrtfKernel, f32, f32)>,
}

/// Interaural delay line length: generous headroom over the largest
/// plausible head-radius propagation delay (a few hundred microseconds).
const DELAY_LINE_LENGTH: usize = 256;

impl HrtfState {
    fn new(db: &HrtfDatabase, azimuth: f32, elevation: f32) -> Self {
        let (el_idx, az_idx, kernel_l, kernel_r, delay_l, delay_r) = select_kernels(db, azimuth, elevation);
        let fft_size = kernel_l.fft().len();

        Self {
            voices: [
                HrtfVoice::new(fft_size, DELAY_LINE_LENGTH),
                HrtfVoice::new(fft_size, DELAY_LINE_LENGTH),
            ],
            active: 0,
            crossfade: None,
            selection: Some((el_idx, az_idx)),
            current_kernel_l: kernel_l,
            current_kernel_r: kernel_r,
            current_delay_l: delay_l,
            current_delay_r: delay_r,
            pending: None,
        }
    }

    fn process(
        &mut self,
        db: &HrtfDatabase,
        azimuth: f32,
        elevation: f32,
        mono: &[f32; RENDER_QUANTUM_SIZE],
        fade_total: usize,
    ) -> ([f32; RENDER_QUANTUM_SIZE], [f32; RENDER_QUANTUM_SIZE]) {
        let (el_idx, az_idx, kernel_l, kernel_r, delay_l, delay_r) = select_kernels(db, azimuth, elevation);
        let changed = self.selection != Some((el_idx, az_idx));

        if changed {
            if self.crossfade.is_some() {
                // a fade was already running: snap it to completion (adopt
                // whatever it was fading towards) before starting a fresh
                // one, so at most one crossfade is ever in flight.
                self.active = 1 - self.active;
                if let Some((pl, pr, pdl, pdr)) = self.pending.take() {
                    self.current_kernel_l = pl;
                    self.current_kernel_r = pr;
                    self.current_delay_l = pdl;
                    self.current_delay_r = pdr;
                }
            }
            self.pending = Some((kernel_l, kernel_r, delay_l, delay_r));
            self.crossfade = Some(Crossfade {
                frames_done: 0,
                total_frames: fade_total,
            });
            self.selection = Some((el_idx, az_idx));
        }

        let sample_rate = db.sample_rate().0 as f32;
        let active = self.active;

        if self.crossfade.is_none() {
            let voice = &mut self.voices[active];
            return voice.process(
                &self.current_kernel_l,
                &self.current_kernel_r,
                self.current_delay_l,
                self.current_delay_r,
                mono,
                sample_rate,
            );
        }

        let (pl, pr, pdl, pdr) = self.pending.clone().expect("pending set alongside crossfade");
        let cur_l = self.current_kernel_l.clone();
        let cur_r = self.current_kernel_r.clone();
        let (cur_dl, cur_dr) = (self.current_delay_l, self.current_delay_r);

        let (voice_active, voice_fading_in) = split_voices(&mut self.voices, active);
        let (a_l, a_r) = voice_active.process(&cur_l, &cur_r, cur_dl, cur_dr, mono, sample_rate);
        let (b_l, b_r) = voice_fading_in.process(&pl, &pr, pdl, pdr, mono, sample_rate);

        let crossfade = self.crossfade.as_mut().unwrap();
        let total = crossfade.total_frames;
        let done = crossfade.frames_done;

        let mut out_l = [0f32; RENDER_QUANTUM_SIZE];
        let mut out_r = [0f32; RENDER_QUANTUM_SIZE];
        for i in 0..RENDER_QUANTUM_SIZE {
            let t = ((done + i) as f32 / total as f32).min(1.0);
            out_l[i] = a_l[i] * (1. - t) + b_l[i] * t;
            out_r[i] = a_r[i] * (1. - t) + b_r[i] * t;
        }

        crossfade.frames_done += RENDER_QUANTUM_SIZE;
        if crossfade.frames_done >= total {
            self.active = 1 - active;
            self.current_kernel_l = pl;
            self.current_kernel_r = pr;
            self.current_delay_l = pdl;
            self.current_delay_r = pdr;
            self.crossfade = None;
            self.pending = None;
        }

        (out_l, out_r)
    }
}

fn split_voices(voices: &mut [HrtfVoice; 2], active: usize) -> (&mut HrtfVoice, &mut HrtfVoice) {
    let (a, b) = voices.split_at_mut(1);
    if active == 0 {
        (&mut a[0], &mut b[0])
    } else {
        (&mut b[0], &mut a[0])
    }
}

/// Pick (and elevation/delay-interpolate) the kernel pair for `azimuth`/
/// `elevation`, returning the discrete (elevation, azimuth) index the
/// selection was keyed on, so callers can detect when it changes.
fn select_kernels(
    db: &HrtfDatabase,
    azimuth_deg: f32,
    elevation_deg: f32,
) -> (usize, usize, HrtfKernel, HrtfKernel, f32, f32) {
    let elevations = db.elevations();
    let (el_idx, el_blend) = db.elevation_index_and_blend(elevation_deg);
    let hi_idx = (el_idx + 1).min(elevations.len() - 1);

    let n_az = elevations[el_idx].number_of_azimuths();
    let step = 360. / n_az as f32;
    let az_norm = ((azimuth_deg % 360.) + 360.) % 360.;
    let az_pos = az_norm / step;
    let az_idx = (az_pos.round() as usize) % n_az;
    let az_blend = az_pos - az_pos.floor();

    let (kl_lo, kr_lo, dl_lo, dr_lo) = elevations[el_idx].kernels_from_azimuth(az_blend, az_idx);
    let (kl_hi, kr_hi, dl_hi, dr_hi) = elevations[hi_idx].kernels_from_azimuth(az_blend, az_idx);

    let kernel_l = kl_lo.interpolate(kl_hi, el_blend);
    let kernel_r = kr_lo.interpolate(kr_hi, el_blend);
    let delay_l = (1. - el_blend) * dl_lo + el_blend * dl_hi;
    let delay_r = (1. - el_blend) * dr_lo + el_blend * dr_hi;

    (el_idx, az_idx, kernel_l, kernel_r, delay_l, delay_r)
}

fn safe_normalize(v: Vector3<f32>, fallback: Vector3<f32>) -> Vector3<f32> {
    let len = vec3_len(v);
    if len < 1e-6 {
        fallback
    } else {
        vec3_scale(v, 1. / len)
    }
}

/// Azimuth/elevation of `source_pos` relative to the listener, in degrees,
/// following the Web Audio API's published "Azimuth and Elevation"
/// algorithm: project the source direction onto the listener's
/// right/forward plane for azimuth, and onto its up axis for elevation.
fn azimuth_elevation(
    source_pos: Vector3<f32>,
    listener_pos: Vector3<f32>,
    listener_forward: Vector3<f32>,
    listener_up: Vector3<f32>,
) -> (f32, f32) {
    let to_source = vec3_sub(source_pos, listener_pos);
    let distance = vec3_len(to_source);
    if distance < 1e-6 {
        return (0., 0.);
    }
    let to_source = vec3_scale(to_source, 1. / distance);

    let forward = safe_normalize(listener_forward, [0., 0., -1.]);
    let up_hint = safe_normalize(listener_up, [0., 1., 0.]);
    let right = safe_normalize(vec3_cross(forward, up_hint), [1., 0., 0.]);
    let up = vec3_cross(right, forward);

    let up_component = vec3_dot(to_source, up);
    let projected = vec3_sub(to_source, vec3_scale(up, up_component));
    let projected_len = vec3_len(projected);

    let azimuth = if projected_len < 1e-6 {
        0.
    } else {
        let projected = vec3_scale(projected, 1. / projected_len);
        let cos_angle = vec3_dot(projected, right).clamp(-1., 1.);
        let mut angle = cos_angle.acos().to_degrees();
        if vec3_dot(projected, forward) > 0. {
            angle = -angle;
        }
        angle
    };

    let elevation_cos = vec3_dot(to_source, up).clamp(-1., 1.);
    let elevation = (90. - elevation_cos.acos().to_degrees()).clamp(-90., 90.);

    (azimuth, elevation)
}

/// Distance attenuation, per the Web Audio API's three distance models.
fn distance_gain(
    distance: f64,
    model: DistanceModel,
    ref_distance: f64,
    max_distance: f64,
    rolloff_factor: f64,
) -> f64 {
    let gain = match model {
        DistanceModel::Linear => {
            let denom = max_distance - ref_distance;
            if denom.abs() < 1e-9 {
                1.0
            } else {
                let d = distance.clamp(ref_distance.min(max_distance), ref_distance.max(max_distance));
                1.0 - rolloff_factor * (d - ref_distance) / denom
            }
        }
        DistanceModel::Inverse => {
            if ref_distance < 1e-9 {
                1.0
            } else {
                let d = distance.max(ref_distance);
                ref_distance / (ref_distance + rolloff_factor * (d - ref_distance))
            }
        }
        DistanceModel::Exponential => {
            if ref_distance < 1e-9 {
                1.0
            } else {
                let d = distance.max(ref_distance);
                (d / ref_distance).powf(-rolloff_factor)
            }
        }
    };
    gain.max(0.0)
}

/// Cone (directional source) gain: 1.0 inside `cone_inner_angle`, linearly
/// interpolated to `cone_outer_gain` at `cone_outer_angle`, per the Web
/// Audio API's cone effect.
fn cone_gain(
    source_pos: Vector3<f32>,
    source_orientation: Vector3<f32>,
    listener_pos: Vector3<f32>,
    cone_inner_angle: f64,
    cone_outer_angle: f64,
    cone_outer_gain: f64,
) -> f64 {
    if cone_inner_angle >= 360. && cone_outer_angle >= 360. {
        return 1.0;
    }

    let orientation = safe_normalize(source_orientation, [1., 0., 0.]);
    let to_listener = vec3_sub(listener_pos, source_pos);
    let len = vec3_len(to_listener);
    if len < 1e-6 {
        return 1.0;
    }
    let to_listener = vec3_scale(to_listener, 1. / len);

    let cos_angle = vec3_dot(orientation, to_listener).clamp(-1., 1.);
    let angle = (cos_angle.acos().to_degrees() as f64).abs();

    let inner_half = cone_inner_angle.abs().min(360.) / 2.0;
    let outer_half = (cone_outer_angle.abs().min(360.) / 2.0).max(inner_half);

    if angle <= inner_half {
        1.0
    } else if angle >= outer_half || (outer_half - inner_half).abs() < 1e-9 {
        cone_outer_gain
    } else {
        let x = (angle - inner_half) / (outer_half - inner_half);
        1.0 + x * (cone_outer_gain - 1.0)
    }
}

/// Equal-power stereo pan of a mono-downmixed signal, clamping azimuth to
/// the front hemisphere the way the Web Audio API's equalpower model does.
fn equal_power_pan(
    mono: &[f32; RENDER_QUANTUM_SIZE],
    azimuth: f32,
) -> ([f32; RENDER_QUANTUM_SIZE], [f32; RENDER_QUANTUM_SIZE]) {
    let azimuth = azimuth.clamp(-90., 90.);
    let x = (azimuth + 90.) / 180.;
    let angle = x * std::f32::consts::FRAC_PI_2;
    let (gain_l, gain_r) = (angle.cos(), angle.sin());

    let mut l = [0f32; RENDER_QUANTUM_SIZE];
    let mut r = [0f32; RENDER_QUANTUM_SIZE];
    for i in 0..RENDER_QUANTUM_SIZE {
        l[i] = mono[i] * gain_l;
        r[i] = mono[i] * gain_r;
    }
    (l, r)
}

struct PannerRenderer {
    position_x: AudioParamId,
    position_y: AudioParamId,
    position_z: AudioParamId,
    orientation_x: AudioParamId,
    orientation_y: AudioParamId,
    orientation_z: AudioParamId,
    settings: Arc<PannerSettings>,
    hrtf_database: Option<Arc<HrtfDatabaseHandle>>,
    hrtf_state: Option<HrtfState>,
    warned_no_hrtf: bool,
}

impl PannerRenderer {
    fn process_hrtf(
        &mut self,
        db_handle: &Arc<HrtfDatabaseHandle>,
        azimuth: f32,
        elevation: f32,
        mono: &[f32; RENDER_QUANTUM_SIZE],
        sample_rate: f32,
    ) -> ([f32; RENDER_QUANTUM_SIZE], [f32; RENDER_QUANTUM_SIZE]) {
        let fade_total = hrtf_fade_frames(sample_rate);
        let state = &mut self.hrtf_state;
        let result = db_handle.with(|db| {
            let hrtf_state = state.get_or_insert_with(|| HrtfState::new(db, azimuth, elevation));
            hrtf_state.process(db, azimuth, elevation, mono, fade_total)
        });
        result.unwrap_or(([0.; RENDER_QUANTUM_SIZE], [0.; RENDER_QUANTUM_SIZE]))
    }
}

impl AudioProcessor for PannerRenderer {
    fn process(
        &mut self,
        inputs: &[Quantum],
        outputs: &mut [Quantum],
        params: AudioParamValues,
        _timestamp: f64,
        sample_rate: SampleRate,
    ) {
        let input = &inputs[0];
        let output = &mut outputs[0];
        output.set_number_of_channels(2);

        let sr = sample_rate.0 as f32;

        // down-mix to mono: HRTF convolution and equal-power panning both
        // spatialize a single source signal, not independent per-channel ones.
        let channels = input.number_of_channels().max(1);
        let mut mono = [0f32; RENDER_QUANTUM_SIZE];
        for ch in 0..channels {
            let data = input.channel_data(ch).as_slice();
            for (acc, &s) in mono.iter_mut().zip(data.iter()) {
                *acc += s;
            }
        }
        if channels > 1 {
            let scale = 1. / channels as f32;
            mono.iter_mut().for_each(|s| *s *= scale);
        }

        // geometry is sampled once per quantum (not per-frame): a k-rate
        // approximation, consistent with how expensive kernel selection and
        // the HRTF path's crossfade state machine are driven.
        let source_pos = [
            params.get_scalar(&self.position_x),
            params.get_scalar(&self.position_y),
            params.get_scalar(&self.position_z),
        ];
        let source_orientation = [
            params.get_scalar(&self.orientation_x),
            params.get_scalar(&self.orientation_y),
            params.get_scalar(&self.orientation_z),
        ];
        let listener_pos = [
            inputs[1].channel_data(0).as_slice()[0],
            inputs[2].channel_data(0).as_slice()[0],
            inputs[3].channel_data(0).as_slice()[0],
        ];
        let listener_forward = [
            inputs[4].channel_data(0).as_slice()[0],
            inputs[5].channel_data(0).as_slice()[0],
            inputs[6].channel_data(0).as_slice()[0],
        ];
        let listener_up = [
            inputs[7].channel_data(0).as_slice()[0],
            inputs[8].channel_data(0).as_slice()[0],
            inputs[9].channel_data(0).as_slice()[0],
        ];

        let (azimuth, elevation) = azimuth_elevation(source_pos, listener_pos, listener_forward, listener_up);
        let distance = vec3_len(vec3_sub(source_pos, listener_pos)) as f64;

        let s = &self.settings;
        let panning_model = decode_panning_model(s.panning_model.load(Ordering::SeqCst));
        let distance_model = decode_distance_model(s.distance_model.load(Ordering::SeqCst));
        let ref_distance = s.ref_distance.load();
        let max_distance = s.max_distance.load();
        let rolloff_factor = s.rolloff_factor.load();
        let cone_inner = s.cone_inner_angle.load();
        let cone_outer = s.cone_outer_angle.load();
        let cone_gain_outer = s.cone_outer_gain.load();

        let gain = distance_gain(distance, distance_model, ref_distance, max_distance, rolloff_factor)
            * cone_gain(source_pos, source_orientation, listener_pos, cone_inner, cone_outer, cone_gain_outer);
        let gain = gain as f32;

        let hrtf_db = self.hrtf_database.clone();
        let (mut l, mut r) = match panning_model {
            PanningModel::EqualPower => equal_power_pan(&mono, azimuth),
            PanningModel::Hrtf => match hrtf_db {
                Some(db_handle) if db_handle.is_ready() => {
                    self.process_hrtf(&db_handle, azimuth, elevation, &mono, sr)
                }
                // still loading: stay silent rather than pop between
                // panning models mid-load.
                Some(_) => ([0f32; RENDER_QUANTUM_SIZE], [0f32; RENDER_QUANTUM_SIZE]),
                None => {
                    if !self.warned_no_hrtf {
                        log::warn!(
                            "PannerNode panningModel is Hrtf but no HrtfDatabase is configured; \
                             falling back to equalpower"
                        );
                        self.warned_no_hrtf = true;
                    }
                    equal_power_pan(&mono, azimuth)
                }
            },
        };

        for i in 0..RENDER_QUANTUM_SIZE {
            l[i] *= gain;
            r[i] *= gain;
        }

        output.channel_data_mut(0).as_mut_slice().copy_from_slice(&l);
        output.channel_data_mut(1).as_mut_slice().copy_from_slice(&r);
    }

    fn tail_time(&self) -> bool {
        // the HRTF path's overlap-add ring and crossfade can still be
        // producing non-silent output several quanta after the input goes
        // silent.
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn values(entries: &[(AudioParamId, f32)]) -> HashMap<AudioParamId, [f32; RENDER_QUANTUM_SIZE]> {
        entries
            .iter()
            .map(|&(id, v)| (id, [v; RENDER_QUANTUM_SIZE]))
            .collect()
    }

    #[test]
    fn test_azimuth_zero_when_source_directly_ahead() {
        let (azimuth, elevation) = azimuth_elevation([0., 0., -10.], [0., 0., 0.], [0., 0., -1.], [0., 1., 0.]);
        assert!(azimuth.abs() < 1e-3, "expected azimuth ~0, got {}", azimuth);
        assert!(elevation.abs() < 1e-3, "expected elevation ~0, got {}", elevation);
    }

    #[test]
    fn test_azimuth_ninety_degrees_to_the_right() {
        let (azimuth, _) = azimuth_elevation([10., 0., 0.], [0., 0., 0.], [0., 0., -1.], [0., 1., 0.]);
        assert!((azimuth - 90.).abs() < 1., "expected ~90 degrees, got {}", azimuth);
    }

    #[test]
    fn test_distance_gain_inverse_decreases_with_distance() {
        let near = distance_gain(1., DistanceModel::Inverse, 1., 10_000., 1.);
        let far = distance_gain(10., DistanceModel::Inverse, 1., 10_000., 1.);
        assert!(near > far);
        assert!((near - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cone_gain_full_outside_wide_cone() {
        let gain = cone_gain([0., 0., 0.], [1., 0., 0.], [10., 0., 0.], 360., 360., 0.);
        assert!((gain - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cone_gain_attenuates_behind_narrow_source() {
        let gain = cone_gain([0., 0., 0.], [1., 0., 0.], [-10., 0., 0.], 10., 20., 0.1);
        assert!((gain - 0.1).abs() < 1e-6, "expected outer gain, got {}", gain);
    }

    #[test]
    fn test_equal_power_pan_hard_right_silences_left() {
        let mono = [1.0; RENDER_QUANTUM_SIZE];
        let (l, r) = equal_power_pan(&mono, 90.);
        assert!(l[0].abs() < 1e-5);
        assert!((r[0] - 1.0).abs() < 1e-5);
    }

    fn impulse_ir(len: usize, peak: usize) -> Vec<f32> {
        let mut v = vec![0f32; len];
        v[peak] = 1.0;
        v
    }

    #[test]
    fn test_hrtf_path_produces_stereo_output_without_panicking() {
        use crate::hrtf::database::ELEVATIONS;

        let responses = vec![
            vec![(impulse_ir(32, 2), impulse_ir(32, 2)); crate::hrtf::database::NUMBER_OF_RAW_AZIMUTHS as usize];
            ELEVATIONS.len()
        ];
        let db = HrtfDatabase::from_impulse_responses(SampleRate(44_100), responses);
        let handle = Arc::new(HrtfDatabaseHandle::from_loaded(db));

        let mut renderer = PannerRenderer {
            position_x: AudioParamId(0),
            position_y: AudioParamId(1),
            position_z: AudioParamId(2),
            orientation_x: AudioParamId(3),
            orientation_y: AudioParamId(4),
            orientation_z: AudioParamId(5),
            settings: Arc::new(PannerSettings {
                panning_model: AtomicU32::new(PanningModel::Hrtf as u32),
                distance_model: AtomicU32::new(DistanceModel::Inverse as u32),
                ref_distance: AtomicF64::new(1.),
                max_distance: AtomicF64::new(10_000.),
                rolloff_factor: AtomicF64::new(1.),
                cone_inner_angle: AtomicF64::new(360.),
                cone_outer_angle: AtomicF64::new(360.),
                cone_outer_gain: AtomicF64::new(0.),
            }),
            hrtf_database: Some(handle),
            hrtf_state: None,
            warned_no_hrtf: false,
        };

        let mut input = Quantum::new(1);
        input.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 1.0);
        let mut listener_inputs: Vec<Quantum> = Vec::new();
        listener_inputs.push(Quantum::new(1)); // position_x = 0
        listener_inputs.push(Quantum::new(1)); // position_y = 0
        let mut pos_z = Quantum::new(1);
        pos_z.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = -1.0);
        listener_inputs.push(pos_z); // position_z = -1
        let mut fwd_z = Quantum::new(1);
        fwd_z.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = -1.0);
        listener_inputs.push(Quantum::new(1)); // forward_x = 0
        listener_inputs.push(Quantum::new(1)); // forward_y = 0
        listener_inputs.push(fwd_z); // forward_z = -1
        listener_inputs.push(Quantum::new(1)); // up_x = 0
        let mut up_y = Quantum::new(1);
        up_y.channel_data_mut(0).as_mut_slice().iter_mut().for_each(|s| *s = 1.0);
        listener_inputs.push(up_y); // up_y = 1
        listener_inputs.push(Quantum::new(1)); // up_z = 0

        let mut all_inputs = vec![input];
        all_inputs.extend(listener_inputs);

        let param_values = values(&[
            (AudioParamId(0), 0.),
            (AudioParamId(1), 0.),
            (AudioParamId(2), -1.),
            (AudioParamId(3), 1.),
            (AudioParamId(4), 0.),
            (AudioParamId(5), 0.),
        ]);

        let mut outputs = vec![Quantum::new(2)];
        renderer.process(
            &all_inputs,
            &mut outputs,
            AudioParamValues::new(&param_values),
            0.,
            SampleRate(44_100),
        );

        assert_eq!(outputs[0].number_of_channels(), 2);
    }
}
