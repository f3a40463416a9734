//! HRTF spatialization support for [`crate::node::PannerNode`]: single-ear
//! impulse response kernels ([`kernel`]) and the measured elevation/azimuth
//! database built from them ([`database`]).

pub mod database;
pub mod kernel;

pub use database::{HrtfDatabase, HrtfDatabaseHandle, HrtfElevation};
pub use kernel::HrtfKernel;
