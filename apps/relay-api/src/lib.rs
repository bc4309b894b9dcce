pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod identity;
pub mod models;
pub mod routes;

use std::sync::Arc;

use config::Config;
use db::store::MessageStore;
use gateway::engine::{EngineSettings, RelayEngine};
use identity::IdentityDirectory;

/// Shared application state available to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub relay: RelayEngine,
}

impl AppState {
    /// Wire a relay to its message store and identity directory.
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn IdentityDirectory>,
    ) -> Self {
        let relay = RelayEngine::new(store, directory, EngineSettings::from(&config));
        Self {
            config: Arc::new(config),
            relay,
        }
    }
}
