//! Testing utilities and mock implementations.
//!
//! The mock transcoder lets the engine, the HTTP server and the C ABI be
//! exercised end to end without an ffmpeg install.
//!
//! # Example
//!
//! ```rust,ignore
//! use vidpress_core::testing::{fixtures, MockTranscoder};
//!
//! let transcoder = MockTranscoder::new();
//! transcoder.fail_transiently(2).await;
//!
//! let engine = TranscodeEngine::new(EngineConfig::default(), transcoder.clone());
//! let handle = engine.submit(fixtures::request(dir.path(), "clip_720p.mp4")).await?;
//! ```

mod mock_transcoder;

pub use mock_transcoder::{MockTranscoder, RecordedTranscode};

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::Path;

    use crate::engine::TranscodeRequest;
    use crate::profile::TranscodeProfile;

    /// H.264 in MP4, fitted into 720p at 2 Mbps.
    pub fn mobile_profile() -> TranscodeProfile {
        TranscodeProfile::default().with_bitrate_kbps(2000)
    }

    /// A request reading `clip.mp4` from `dir` and writing `dir/out/<name>`.
    pub fn request(dir: &Path, name: &str) -> TranscodeRequest {
        TranscodeRequest::new(
            dir.join("clip.mp4"),
            mobile_profile(),
            dir.join("out").join(name),
        )
    }
}
