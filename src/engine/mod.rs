// Data Engine Module
// Per-engine SQL generation and schema introspection behind one trait

pub mod drivers;
pub mod error;
pub mod handle;
pub mod registry;
pub mod session_manager;
pub mod sql;
pub mod sql_safety;
pub mod traits;
pub mod types;

pub use error::{EngineError, EngineResult};
pub use handle::ConnectionHandle;
pub use registry::DriverRegistry;
pub use session_manager::SessionManager;
pub use traits::DataEngine;
pub use types::*;
