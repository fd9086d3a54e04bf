//! Shared utilities: error taxonomy, validation, configuration, logging.

pub mod config;
pub mod error;
pub mod logging;
pub mod validation;

pub use config::AppConfig;
pub use error::{ErrorResponse, ProcuraError, ProcuraResult};
pub use logging::init_logging;
