//! Target profiles for a transcode job.
//!
//! A [`TranscodeProfile`] names the codec, container, bounding resolution and
//! rate control of the output. Profiles are checked with [`validate_profile`]
//! before a job is accepted; validation is pure and never touches the
//! filesystem.

mod geometry;
mod types;
mod validate;

pub use geometry::fit_within;
pub use types::{Container, RateControl, Resolution, TranscodeProfile, VideoCodec};
pub use validate::validate_profile;
