pub mod access;
pub mod config;
pub mod error;
pub mod hooks;
pub mod metadata;
pub mod server;
pub mod storage;

pub use config::ServerConfig;
pub use error::{DbError, DbResult};
pub use server::{build_state, create_router, AppState};
pub use storage::StorageEngine;
