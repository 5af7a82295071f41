pub mod api;
pub mod config;
pub mod utils;

// Re-export commonly used types
pub use config::{AccessDefaults, ConnectorConfig, PermRule, UploadOrder};
