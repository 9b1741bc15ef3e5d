pub mod auth;
pub mod config;
pub mod engine;
pub mod profile;
pub mod testing;
pub mod transcoder;

pub use auth::{create_authenticator, AuthError, AuthRequest, Authenticator, Identity};
pub use config::{
    load_config, load_config_from_str, validate_config, AuthConfig, AuthMethod, Config,
    ConfigError, LogFormat, LoggingConfig, ServerConfig,
};
pub use engine::{
    EngineConfig, EngineError, JobEvent, JobEventStream, JobHandle, JobId, JobResult,
    JobSnapshot, JobState, OutputArtifact, PoolStatus, ProgressEvent, RetryConfig,
    TranscodeEngine, TranscodeRequest,
};
pub use profile::{Container, Resolution, TranscodeProfile, VideoCodec};
pub use transcoder::{
    ErrorKind, FfmpegConfig, FfmpegTranscoder, MediaInfo, Stage, TranscodeError, Transcoder,
};
