pub mod clock;
pub mod dirs;
pub mod error;
pub mod handlers;
pub mod id;
pub mod janitor;
pub mod metrics;
pub mod server;
pub mod service;
pub mod store;

use std::sync::Arc;

/// Shared application state threaded through axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<service::Service>,
}

pub use error::Error;
pub use id::SecretId;
pub use server::{resolve_data_dir, run, ServerConfig};
