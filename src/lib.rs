// Mergen - database administration engine
// Core library

pub mod config;
pub mod engine;
pub mod observability;
pub mod service;

use std::sync::Arc;

use config::EngineConfig;
use engine::{DriverRegistry, SessionManager};
use service::DatabaseService;

pub struct AppState {
    pub registry: Arc<DriverRegistry>,
    pub session_manager: Arc<SessionManager>,
    pub service: DatabaseService,
    pub config: EngineConfig,
}

impl AppState {
    /// State built from the per-user config file
    pub fn new() -> Self {
        Self::with_config(EngineConfig::load())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let registry = Arc::new(DriverRegistry::with_default_drivers());
        let session_manager = Arc::new(SessionManager::new(Arc::clone(&registry), &config));
        let service = DatabaseService::new(Arc::clone(&session_manager), config.clone());

        Self {
            registry,
            session_manager,
            service,
            config,
        }
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_wires_every_driver() {
        let state = AppState::with_config(EngineConfig::default());

        assert_eq!(state.registry.list(), vec!["mysql", "postgres", "sqlite"]);
        assert!(Arc::ptr_eq(state.service.sessions(), &state.session_manager));
    }
}
