pub mod api;
pub mod auth;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod pool;
pub mod store;

// Export API types
pub use api::{create_router, AppState};

// Export the error taxonomy
pub use error::{RegistryError, Result};

// Export all model types
pub use model::*;

// Export pool and store types
pub use pool::{ContextPool, PoolContext};
pub use store::{MemoryStore, PostgresStore, Store};

/// The advertised machine name, surfaced through registration entries.
pub fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
