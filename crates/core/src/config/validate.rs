use super::{
    types::{AuthMethod, Config},
    ConfigError,
};

const FFMPEG_LOG_LEVELS: &[&str] = &[
    "quiet", "panic", "fatal", "error", "warning", "info", "verbose", "debug", "trace",
];

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Anonymous access is only allowed on a loopback bind
/// - Engine has at least one worker slot and a live event buffer
/// - Retry policy makes at least one attempt and never shrinks its delay
/// - ffmpeg paths, timeout and log level are usable
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    // Server validation
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    // Auth validation
    match config.auth.method {
        AuthMethod::None if !config.server.host.is_loopback() => {
            return Err(ConfigError::ValidationError(format!(
                "server.host {} accepts remote clients; set auth.method = \"api_key\"",
                config.server.host
            )));
        }
        AuthMethod::ApiKey if config.auth.api_key.as_deref().map_or(true, str::is_empty) => {
            return Err(invalid("auth.api_key must be set when auth.method is \"api_key\""));
        }
        _ => {}
    }
    if let Some(root) = config.engine.allowed_roots.iter().find(|r| !r.is_absolute()) {
        return Err(ConfigError::ValidationError(format!(
            "engine.allowed_roots entry {} must be absolute",
            root.display()
        )));
    }

    // Engine validation
    let engine = &config.engine;
    if engine.max_concurrent_jobs == 0 {
        return Err(invalid("engine.max_concurrent_jobs must be at least 1"));
    }
    if engine.event_buffer == 0 {
        return Err(invalid("engine.event_buffer must be at least 1"));
    }
    if engine.event_history == 0 {
        return Err(invalid("engine.event_history must be at least 1"));
    }

    let retry = &engine.retry;
    if retry.max_attempts == 0 {
        return Err(invalid("engine.retry.max_attempts must be at least 1"));
    }
    if !retry.backoff_multiplier.is_finite() || retry.backoff_multiplier < 1.0 {
        return Err(invalid("engine.retry.backoff_multiplier must be >= 1.0"));
    }
    if retry.initial_delay_ms > retry.max_delay_ms {
        return Err(invalid(
            "engine.retry.initial_delay_ms cannot exceed engine.retry.max_delay_ms",
        ));
    }

    // ffmpeg validation
    let ffmpeg = &config.ffmpeg;
    if ffmpeg.ffmpeg_path.as_os_str().is_empty() || ffmpeg.ffprobe_path.as_os_str().is_empty() {
        return Err(invalid("ffmpeg.ffmpeg_path and ffmpeg.ffprobe_path cannot be empty"));
    }
    if ffmpeg.timeout_secs == 0 {
        return Err(invalid("ffmpeg.timeout_secs cannot be 0"));
    }
    if ffmpeg.progress_interval_ms == 0 {
        return Err(invalid("ffmpeg.progress_interval_ms cannot be 0"));
    }
    if !FFMPEG_LOG_LEVELS.contains(&ffmpeg.log_level.as_str()) {
        return Err(ConfigError::ValidationError(format!(
            "ffmpeg.log_level '{}' is not one of {}",
            ffmpeg.log_level,
            FFMPEG_LOG_LEVELS.join(", ")
        )));
    }

    Ok(())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::ValidationError(msg.to_string())
}
