//! Session Manager
//!
//! Centralized management of all active database sessions. Drivers are
//! stateless; the handles they open are stored here and handed back to the
//! driver on every call.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{timeout, Duration};
use tracing::{info, instrument};

use crate::config::EngineConfig;
use crate::engine::error::{EngineError, EngineResult};
use crate::engine::handle::ConnectionHandle;
use crate::engine::traits::DataEngine;
use crate::engine::types::{ConnectionConfig, SessionId};
use crate::engine::DriverRegistry;

const PRODUCTION: &str = "production";
const DEFAULT_ENVIRONMENT: &str = "development";

/// Active session with its connection handle
pub struct ActiveSession {
    pub driver_id: String,
    pub config: ConnectionConfig,
    pub display_name: String,
    pub handle: ConnectionHandle,
}

/// Manages all active database sessions
pub struct SessionManager {
    registry: Arc<DriverRegistry>,
    sessions: RwLock<HashMap<SessionId, ActiveSession>>,
    connect_timeout_ms: u64,
}

/// Canonical driver id, host, port and environment for a config.
///
/// Accepts common aliases (`postgresql`, `mariadb`), fills in the default
/// host and port of network engines and requires a path for SQLite.
pub fn normalize_config(mut config: ConnectionConfig) -> EngineResult<ConnectionConfig> {
    let driver = config.driver.trim().to_ascii_lowercase();
    config.driver = match driver.as_str() {
        "postgres" | "postgresql" | "pg" => "postgres",
        "mysql" | "mariadb" => "mysql",
        "sqlite" | "sqlite3" => "sqlite",
        "" => return Err(EngineError::validation("driver is required")),
        _ => return Err(EngineError::driver_not_found(config.driver.trim())),
    }
    .to_string();

    let default_port = match config.driver.as_str() {
        "postgres" => Some(5432),
        "mysql" => Some(3306),
        _ => None,
    };

    match default_port {
        Some(port) => {
            config.host = config.host.trim().to_string();
            if config.host.is_empty() {
                config.host = "localhost".to_string();
            }
            if config.port == 0 {
                config.port = port;
            }
        }
        None => {
            if config.database_name().is_none() {
                return Err(EngineError::validation("sqlite requires a database path"));
            }
        }
    }

    let environment = config.environment.trim().to_ascii_lowercase();
    config.environment = if environment.is_empty() {
        DEFAULT_ENVIRONMENT.to_string()
    } else {
        environment
    };

    Ok(config)
}

fn display_name(config: &ConnectionConfig) -> String {
    let database = config.database_name().unwrap_or("default");
    if config.driver == "sqlite" {
        format!("sqlite:{}", database)
    } else {
        format!(
            "{}@{}:{}/{}",
            config.username, config.host, config.port, database
        )
    }
}

impl SessionManager {
    pub fn new(registry: Arc<DriverRegistry>, config: &EngineConfig) -> Self {
        Self {
            registry,
            sessions: RwLock::new(HashMap::new()),
            connect_timeout_ms: config.connect_timeout_ms,
        }
    }

    /// Establishes a new connection and returns its session ID
    #[instrument(
        skip(self, config),
        fields(
            driver = %config.driver,
            host = %config.host,
            port = config.port,
            database = ?config.database
        )
    )]
    pub async fn connect(&self, config: ConnectionConfig) -> EngineResult<SessionId> {
        let config = normalize_config(config)?;
        let driver = self.registry.resolve(&config.driver)?;

        let handle = match timeout(
            Duration::from_millis(self.connect_timeout_ms),
            driver.connect(&config),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(EngineError::Timeout {
                    timeout_ms: self.connect_timeout_ms,
                })
            }
        };

        let session_id = SessionId::new();
        let session = ActiveSession {
            driver_id: config.driver.clone(),
            display_name: display_name(&config),
            config,
            handle,
        };

        info!(session_id = %session_id.0, name = %session.display_name, "session opened");
        let mut sessions = self.sessions.write().await;
        sessions.insert(session_id, session);

        Ok(session_id)
    }

    /// Disconnects a session and closes its handle
    #[instrument(skip(self), fields(session_id = %session_id.0))]
    pub async fn disconnect(&self, session_id: SessionId) -> EngineResult<()> {
        let session = {
            let mut sessions = self.sessions.write().await;
            sessions
                .remove(&session_id)
                .ok_or_else(|| EngineError::session_not_found(session_id.0.to_string()))?
        };

        session.handle.close().await;
        info!(name = %session.display_name, "session closed");
        Ok(())
    }

    /// Closes every open session
    pub async fn disconnect_all(&self) {
        let sessions: Vec<ActiveSession> = {
            let mut sessions = self.sessions.write().await;
            sessions.drain().map(|(_, session)| session).collect()
        };

        for session in sessions {
            session.handle.close().await;
        }
    }

    /// Driver and handle of an existing session
    pub async fn session(
        &self,
        session_id: SessionId,
    ) -> EngineResult<(Arc<dyn DataEngine>, ConnectionHandle)> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::session_not_found(session_id.0.to_string()))?;

        let driver = self.registry.resolve(&session.driver_id)?;
        Ok((driver, session.handle.clone()))
    }

    /// Gets a driver for an existing session
    pub async fn get_driver(&self, session_id: SessionId) -> EngineResult<Arc<dyn DataEngine>> {
        self.session(session_id).await.map(|(driver, _)| driver)
    }

    /// Lists all active sessions
    pub async fn list_sessions(&self) -> Vec<(SessionId, String)> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .map(|(id, session)| (*id, session.display_name.clone()))
            .collect()
    }

    /// Checks if the session is read-only
    pub async fn is_read_only(&self, session_id: SessionId) -> EngineResult<bool> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::session_not_found(session_id.0.to_string()))?;

        Ok(session.config.read_only)
    }

    /// Checks if the session is a production environment
    pub async fn is_production(&self, session_id: SessionId) -> EngineResult<bool> {
        let sessions = self.sessions.read().await;
        let session = sessions
            .get(&session_id)
            .ok_or_else(|| EngineError::session_not_found(session_id.0.to_string()))?;

        Ok(session.config.environment == PRODUCTION)
    }

    /// Checks if a session exists
    pub async fn session_exists(&self, session_id: SessionId) -> bool {
        let sessions = self.sessions.read().await;
        sessions.contains_key(&session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_config() -> ConnectionConfig {
        ConnectionConfig {
            driver: "SQLite".to_string(),
            host: String::new(),
            port: 0,
            username: String::new(),
            password: String::new(),
            database: Some(":memory:".to_string()),
            ssl: false,
            environment: " Production ".to_string(),
            read_only: true,
        }
    }

    fn manager() -> SessionManager {
        SessionManager::new(
            Arc::new(DriverRegistry::with_default_drivers()),
            &EngineConfig::default(),
        )
    }

    #[test]
    fn network_engines_get_default_host_and_port() {
        let mut config = sqlite_config();
        config.driver = "postgresql".to_string();
        config.environment = String::new();

        let config = normalize_config(config).unwrap();
        assert_eq!(config.driver, "postgres");
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.environment, "development");

        let mut mariadb = sqlite_config();
        mariadb.driver = "mariadb".to_string();
        mariadb.port = 3307;
        let mariadb = normalize_config(mariadb).unwrap();
        assert_eq!(mariadb.driver, "mysql");
        assert_eq!(mariadb.port, 3307);
    }

    #[test]
    fn invalid_configs_are_rejected() {
        let mut unknown = sqlite_config();
        unknown.driver = "oracle".to_string();
        assert!(matches!(
            normalize_config(unknown),
            Err(EngineError::DriverNotFound { .. })
        ));

        let mut no_path = sqlite_config();
        no_path.database = Some("  ".to_string());
        assert!(matches!(
            normalize_config(no_path),
            Err(EngineError::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn sessions_open_and_close() {
        let manager = manager();
        let id = manager.connect(sqlite_config()).await.unwrap();

        assert!(manager.session_exists(id).await);
        assert!(manager.is_read_only(id).await.unwrap());
        assert!(manager.is_production(id).await.unwrap());
        assert_eq!(manager.get_driver(id).await.unwrap().driver_id(), "sqlite");

        let sessions = manager.list_sessions().await;
        assert_eq!(sessions, vec![(id, "sqlite::memory:".to_string())]);

        let (_, handle) = manager.session(id).await.unwrap();
        manager.disconnect(id).await.unwrap();
        assert!(handle.is_closed());
        assert!(!manager.session_exists(id).await);
    }

    #[tokio::test]
    async fn unknown_sessions_are_reported() {
        let manager = manager();
        let id = SessionId::new();

        assert!(matches!(
            manager.disconnect(id).await,
            Err(EngineError::SessionNotFound { .. })
        ));
        assert!(manager.session(id).await.is_err());
    }

    #[tokio::test]
    async fn disconnect_all_closes_every_handle() {
        let manager = manager();
        let first = manager.connect(sqlite_config()).await.unwrap();
        manager.connect(sqlite_config()).await.unwrap();
        let (_, handle) = manager.session(first).await.unwrap();

        manager.disconnect_all().await;
        assert!(manager.list_sessions().await.is_empty());
        assert!(handle.is_closed());
    }
}
