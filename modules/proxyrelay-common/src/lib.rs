pub mod types;
pub mod config;
pub mod error;

pub use types::*;
pub use config::{Config, RelayPolicy, ScoringPolicy};
pub use error::{RelayError, TransportError};
