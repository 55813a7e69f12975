//! Ferrous Tunnel Domain Layer
pub mod config;
pub mod errors;
pub mod record_type;

pub use config::{CliOverrides, Config, Role};
pub use errors::{ResolveError, ServerError};
pub use record_type::RecordType;
