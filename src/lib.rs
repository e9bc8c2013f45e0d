pub mod api;
pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod token;

pub use config::Config;
pub use error::AuthError;

use std::sync::Arc;

use session::RotationProtocol;
use store::PgManager;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub protocol: RotationProtocol<PgManager>,
}

pub type SharedState = Arc<AppState>;
