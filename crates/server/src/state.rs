use std::sync::Arc;
use vidpress_core::{Authenticator, Config, TranscodeEngine, Transcoder};

/// Engine shared by all handlers, transcoder erased.
pub type SharedEngine = Arc<TranscodeEngine<dyn Transcoder>>;

/// Shared application state
pub struct AppState {
    config: Config,
    engine: SharedEngine,
    authenticator: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(
        config: Config,
        engine: SharedEngine,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        Self {
            config,
            engine,
            authenticator,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &SharedEngine {
        &self.engine
    }

    pub fn authenticator(&self) -> &dyn Authenticator {
        self.authenticator.as_ref()
    }
}
