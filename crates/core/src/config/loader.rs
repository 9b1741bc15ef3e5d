use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Prefix of environment variable overrides, e.g. `VIDPRESS_ENGINE__MAX_CONCURRENT_JOBS`.
const ENV_PREFIX: &str = "VIDPRESS_";

/// Load configuration from file with environment variable overrides
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthMethod, LogFormat};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[server]
port = 9000

[engine]
max_concurrent_jobs = 4

[engine.retry]
max_attempts = 5

[ffmpeg]
ffmpeg_path = "/opt/ffmpeg/bin/ffmpeg"

[logging]
format = "json"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.engine.max_concurrent_jobs, 4);
        assert_eq!(config.engine.retry.max_attempts, 5);
        assert_eq!(config.engine.retry.initial_delay_ms, 200);
        assert_eq!(
            config.ffmpeg.ffmpeg_path.to_string_lossy(),
            "/opt/ffmpeg/bin/ffmpeg"
        );
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_load_config_from_str_empty_uses_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.server.port, 8080);
        assert!(config.server.host.is_loopback());
        assert_eq!(config.auth.method, AuthMethod::None);
        assert_eq!(config.ffmpeg.timeout_secs, 3600);
    }

    #[test]
    fn test_api_key_is_read_but_never_written() {
        let toml = r#"
[auth]
method = "api_key"
api_key = "s3cret"

[engine]
allowed_roots = ["/srv/media"]
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.auth.method, AuthMethod::ApiKey);
        assert_eq!(config.auth.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.engine.allowed_roots.len(), 1);

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(json.contains("api_key"));
    }

    #[test]
    fn test_load_config_from_str_bad_type() {
        let toml = r#"
[engine]
max_concurrent_jobs = "many"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[engine]
overwrite_existing = true
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert!(config.engine.overwrite_existing);
    }
}
