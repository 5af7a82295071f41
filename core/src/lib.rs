// Config module lives in elfport-shared
pub mod connector;
pub mod error;
pub mod logger;
pub mod server;
pub mod vfs;

// Re-export most common types for convenience
pub use connector::{Connector, ConnectorRequest, Reply};
pub use error::{ConnectorError, ConnectorResult, ErrorKind};
pub use server::ConnectorServer;
pub use vfs::Volume;
