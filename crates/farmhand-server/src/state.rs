//! Shared application state.

use crate::config::Config;
use farmhand_core::{AnalysisClient, GeminiClient, HistoryStore, Orchestrator};
use std::sync::Arc;
use tracing::warn;

pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub config: Config,
}

impl AppState {
    /// Build state with the Gemini client from config.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let client = Arc::new(GeminiClient::new(config.gemini_config())?);
        Ok(Self::with_client(config, client))
    }

    /// Build state around any analysis client.
    ///
    /// If the history database cannot be opened the server still starts,
    /// keeping history in memory only.
    pub fn with_client(config: Config, client: Arc<dyn AnalysisClient>) -> Self {
        let store = match HistoryStore::open(&config.db_path) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    target: "farmhand::store",
                    "Could not open {} ({}); history will not be persisted",
                    config.db_path.display(),
                    e
                );
                None
            }
        };

        let orchestrator = Arc::new(Orchestrator::new(
            client,
            store,
            config.history_capacity,
            config.normalize_options(),
        ));

        Self {
            orchestrator,
            config,
        }
    }
}
