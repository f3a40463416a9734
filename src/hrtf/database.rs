//! `HRTFElevation`/`HRTFDatabase`: the measured-and-interpolated impulse
//! response set a [`crate::node::PannerNode`] consults to spatialize a
//! source, grounded on LabSound's `HRTFElevation`/`HRTFDatabaseLoader`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::analysis::Fft;
use crate::hrtf::kernel::HrtfKernel;
use crate::SampleRate;

/// Degrees between azimuths as measured on disk.
pub const RAW_AZIMUTH_SPACING: u32 = 15;
/// Number of azimuths measured on disk (0, 15, ..., 345).
pub const NUMBER_OF_RAW_AZIMUTHS: u32 = 24;
/// Interpolation factor applied to the raw azimuth set.
pub const INTERPOLATION_FACTOR: u32 = 8;
/// Total azimuth positions after interpolation.
pub const NUMBER_OF_TOTAL_AZIMUTHS: u32 = NUMBER_OF_RAW_AZIMUTHS * INTERPOLATION_FACTOR;
/// Elevations measured on disk, −45° to +90° in 15° steps.
pub const ELEVATIONS: [i32; 10] = [-45, -30, -15, 0, 15, 30, 45, 60, 75, 90];

/// FFT analysis size for impulse responses. 256 samples at 44.1kHz, scaled
/// with sample rate per the spec's `round(256 * sr / 44100)` rule, rounded
/// up to the next power of two for the FFT itself.
pub fn impulse_length(sample_rate: u32) -> usize {
    (256. * sample_rate as f64 / 44_100.).round() as usize
}

fn fft_size_for(sample_rate: u32) -> usize {
    (impulse_length(sample_rate) * 2).next_power_of_two()
}

/// All azimuth kernels (left and right ear) for one measured elevation,
/// interpolated up from [`NUMBER_OF_RAW_AZIMUTHS`] to
/// [`NUMBER_OF_TOTAL_AZIMUTHS`] positions.
pub struct HrtfElevation {
    left: Vec<HrtfKernel>,
    right: Vec<HrtfKernel>,
    elevation_angle: i32,
}

impl HrtfElevation {
    /// Build from the raw, measured per-azimuth kernel pairs (one pair per
    /// `RAW_AZIMUTH_SPACING` degrees, in ascending azimuth order) by
    /// linearly interpolating [`INTERPOLATION_FACTOR`] steps between each
    /// neighboring pair.
    fn from_raw(raw_left: Vec<HrtfKernel>, raw_right: Vec<HrtfKernel>, elevation_angle: i32) -> Self {
        assert_eq!(raw_left.len(), NUMBER_OF_RAW_AZIMUTHS as usize);
        assert_eq!(raw_right.len(), NUMBER_OF_RAW_AZIMUTHS as usize);

        let interpolate_ring = |raw: &[HrtfKernel]| -> Vec<HrtfKernel> {
            let n = raw.len();
            let mut out = Vec::with_capacity(n * INTERPOLATION_FACTOR as usize);
            for i in 0..n {
                let a = &raw[i];
                let b = &raw[(i + 1) % n];
                for step in 0..INTERPOLATION_FACTOR {
                    let x = step as f32 / INTERPOLATION_FACTOR as f32;
                    out.push(a.interpolate(b, x));
                }
            }
            out
        };

        Self {
            left: interpolate_ring(&raw_left),
            right: interpolate_ring(&raw_right),
            elevation_angle,
        }
    }

    pub fn elevation_angle(&self) -> i32 {
        self.elevation_angle
    }

    pub fn number_of_azimuths(&self) -> usize {
        self.left.len()
    }

    /// Returns the left/right kernel at `azimuth_index`, and the interpolated
    /// per-ear frame delay blended toward the next azimuth by `azimuth_blend`.
    pub fn kernels_from_azimuth(
        &self,
        azimuth_blend: f32,
        azimuth_index: usize,
    ) -> (&HrtfKernel, &HrtfKernel, f32, f32) {
        let n = self.left.len();
        let i0 = azimuth_index % n;
        let i1 = (azimuth_index + 1) % n;

        let delay_l = (1. - azimuth_blend) * self.left[i0].frame_delay()
            + azimuth_blend * self.left[i1].frame_delay();
        let delay_r = (1. - azimuth_blend) * self.right[i0].frame_delay()
            + azimuth_blend * self.right[i1].frame_delay();

        (&self.left[i0], &self.right[i0], delay_l, delay_r)
    }
}

/// The full set of measured-and-interpolated elevations a [`crate::node::PannerNode`]
/// consults for HRTF spatialization. Loading reads one stereo WAV file per
/// (azimuth, elevation) pair from disk, so it happens on a background
/// thread; `is_ready()` must be polled before the database is consulted.
pub struct HrtfDatabase {
    elevations: Vec<HrtfElevation>,
    sample_rate: SampleRate,
    ready: Arc<AtomicBool>,
}

impl HrtfDatabase {
    /// Synchronously build a database from already-decoded per-(azimuth,
    /// elevation) impulse response pairs, ordered first by elevation (per
    /// [`ELEVATIONS`]) then by azimuth (`0, 15, .., 345`).
    ///
    /// Exposed separately from [`Self::load`] so tests and callers with
    /// their own IR source (e.g. embedded resources) can skip the WAV/file
    /// I/O path entirely.
    pub fn from_impulse_responses(
        sample_rate: SampleRate,
        // one (left_ir, right_ir) pair per (elevation, azimuth), in that
        // nesting order
        responses: Vec<Vec<(Vec<f32>, Vec<f32>)>>,
    ) -> Self {
        assert_eq!(responses.len(), ELEVATIONS.len());

        let fft = Arc::new(Fft::new(fft_size_for(sample_rate.0)));
        let fft_size = fft.len();

        let elevations = responses
            .into_iter()
            .zip(ELEVATIONS.iter())
            .map(|(per_azimuth, &elevation_angle)| {
                let mut raw_left = Vec::with_capacity(NUMBER_OF_RAW_AZIMUTHS as usize);
                let mut raw_right = Vec::with_capacity(NUMBER_OF_RAW_AZIMUTHS as usize);
                for (left_ir, right_ir) in per_azimuth {
                    raw_left.push(HrtfKernel::from_impulse_response(
                        fft.clone(),
                        &left_ir,
                        fft_size,
                        sample_rate.0 as f32,
                    ));
                    raw_right.push(HrtfKernel::from_impulse_response(
                        fft.clone(),
                        &right_ir,
                        fft_size,
                        sample_rate.0 as f32,
                    ));
                }
                HrtfElevation::from_raw(raw_left, raw_right, elevation_angle)
            })
            .collect();

        Self {
            elevations,
            sample_rate,
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn a background thread that loads `IRC_<subject>_C_R0195_T<azimuth>_P<elevation>.wav`
    /// files from `base_path` for every (azimuth, elevation) pair, and
    /// returns a handle whose `is_ready()` flips to `true` once loading
    /// completes (or stays `false` forever on failure, logging the error).
    ///
    /// The render thread must never block on this: it should skip
    /// spatialization (silence, or direct pass-through) until `is_ready()`.
    pub fn load(base_path: PathBuf, subject: String, sample_rate: SampleRate) -> Arc<HrtfDatabaseHandle> {
        let ready = Arc::new(AtomicBool::new(false));
        let handle = Arc::new(HrtfDatabaseHandle {
            database: std::sync::Mutex::new(None),
            ready: ready.clone(),
        });

        let handle_clone = handle.clone();
        std::thread::spawn(move || match load_from_disk(&base_path, &subject, sample_rate) {
            Ok(db) => {
                *handle_clone.database.lock().unwrap() = Some(db);
                ready.store(true, Ordering::Release);
                log::debug!("HRTF database loaded from {:?}", base_path);
            }
            Err(e) => {
                log::error!("failed to load HRTF database from {:?}: {}", base_path, e);
            }
        });

        handle
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    pub fn elevations(&self) -> &[HrtfElevation] {
        &self.elevations
    }

    /// Map an elevation angle in degrees to the nearest two measured
    /// elevation indices and the blend between them.
    pub fn elevation_index_and_blend(&self, elevation_deg: f32) -> (usize, f32) {
        let clamped = elevation_deg.clamp(ELEVATIONS[0] as f32, *ELEVATIONS.last().unwrap() as f32);
        let step = 15.0;
        let rel = (clamped - ELEVATIONS[0] as f32) / step;
        let idx = (rel.floor() as usize).min(ELEVATIONS.len() - 2);
        let blend = rel - idx as f32;
        (idx, blend)
    }
}

/// Owned, shared handle to a database being (or already) loaded on a
/// background thread.
pub struct HrtfDatabaseHandle {
    database: std::sync::Mutex<Option<HrtfDatabase>>,
    ready: Arc<AtomicBool>,
}

impl HrtfDatabaseHandle {
    /// Wrap an already-built [`HrtfDatabase`] (e.g. one built synchronously
    /// via [`HrtfDatabase::from_impulse_responses`]) in a handle that
    /// reports ready immediately. Lets callers with their own IR source
    /// skip [`HrtfDatabase::load`]'s background-thread disk path entirely.
    pub fn from_loaded(database: HrtfDatabase) -> Self {
        Self {
            database: std::sync::Mutex::new(Some(database)),
            ready: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Borrow the loaded database. Panics if called before `is_ready()`.
    pub fn with<R>(&self, f: impl FnOnce(&HrtfDatabase) -> R) -> Option<R> {
        if !self.is_ready() {
            return None;
        }
        self.database.lock().unwrap().as_ref().map(f)
    }
}

fn load_from_disk(
    base_path: &Path,
    subject: &str,
    sample_rate: SampleRate,
) -> Result<HrtfDatabase, crate::NotSupportedError> {
    let mut responses = Vec::with_capacity(ELEVATIONS.len());

    for &elevation in ELEVATIONS.iter() {
        let mut per_azimuth = Vec::with_capacity(NUMBER_OF_RAW_AZIMUTHS as usize);
        for i in 0..NUMBER_OF_RAW_AZIMUTHS {
            let azimuth = i * RAW_AZIMUTH_SPACING;
            let filename = format!("IRC_{}_C_R0195_T{:03}_P{:03}.wav", subject, azimuth, elevation);
            let path = base_path.join(filename);

            let bytes = std::fs::read(&path).map_err(|_| crate::NotSupportedError {
                message: format!("HRTF impulse response not found: {:?}", path),
            })?;
            let buffer = crate::decoding::decode(&bytes, "wav").map_err(|_| crate::NotSupportedError {
                message: format!("could not decode HRTF impulse response: {:?}", path),
            })?;

            if buffer.number_of_channels() < 2 {
                return Err(crate::NotSupportedError {
                    message: format!("HRTF impulse response is not stereo: {:?}", path),
                });
            }

            let left = buffer.channel_data(0).as_slice().to_vec();
            let right = buffer.channel_data(1).as_slice().to_vec();
            per_azimuth.push((left, right));
        }
        responses.push(per_azimuth);
    }

    Ok(HrtfDatabase::from_impulse_responses(sample_rate, responses))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn impulse_at(len: usize, peak: usize) -> Vec<f32> {
        let mut v = vec![0f32; len];
        v[peak] = 1.0;
        v
    }

    #[test]
    fn test_elevation_interpolates_to_total_azimuth_count() {
        let raw_left: Vec<_> = (0..NUMBER_OF_RAW_AZIMUTHS)
            .map(|_| {
                HrtfKernel::from_impulse_response(
                    Arc::new(Fft::new(64)),
                    &impulse_at(32, 4),
                    64,
                    44_100.,
                )
            })
            .collect();
        let raw_right = raw_left.clone();

        let elevation = HrtfElevation::from_raw(raw_left, raw_right, 0);
        assert_eq!(elevation.number_of_azimuths() as u32, NUMBER_OF_TOTAL_AZIMUTHS);
    }

    #[test]
    fn test_elevation_index_and_blend_clamps_range() {
        let responses = vec![
            vec![(impulse_at(32, 4), impulse_at(32, 4)); NUMBER_OF_RAW_AZIMUTHS as usize];
            ELEVATIONS.len()
        ];
        let db = HrtfDatabase::from_impulse_responses(SampleRate(44_100), responses);

        let (idx, blend) = db.elevation_index_and_blend(-100.);
        assert_eq!(idx, 0);
        assert_eq!(blend, 0.);

        let (idx, _) = db.elevation_index_and_blend(1000.);
        assert_eq!(idx, ELEVATIONS.len() - 2);
    }
}
