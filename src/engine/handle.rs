//! Connection handles
//!
//! A handle is opened by a driver and then owned by the caller, which passes
//! it back into every driver call. Each variant wraps the engine's sqlx pool.
//! Concurrent use of one handle is only as safe as the pool itself; the
//! drivers add no synchronization on top of it.

use sqlx::mysql::MySqlPool;
use sqlx::postgres::PgPool;
use sqlx::sqlite::SqlitePool;

#[derive(Debug, Clone)]
pub enum ConnectionHandle {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

impl ConnectionHandle {
    /// Driver id of the engine this handle belongs to
    pub fn driver_id(&self) -> &'static str {
        match self {
            ConnectionHandle::Postgres(_) => "postgres",
            ConnectionHandle::MySql(_) => "mysql",
            ConnectionHandle::Sqlite(_) => "sqlite",
        }
    }

    /// Closes the underlying pool, waiting for checked-out connections
    pub async fn close(&self) {
        match self {
            ConnectionHandle::Postgres(pool) => pool.close().await,
            ConnectionHandle::MySql(pool) => pool.close().await,
            ConnectionHandle::Sqlite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            ConnectionHandle::Postgres(pool) => pool.is_closed(),
            ConnectionHandle::MySql(pool) => pool.is_closed(),
            ConnectionHandle::Sqlite(pool) => pool.is_closed(),
        }
    }
}
