//! elFinder connector - command dispatch
//!
//! Stateless: every request is decoded, dispatched to one handler and turned
//! into a [`Reply`]. Nothing survives between requests except the immutable
//! configuration, the volume and the command registry.

use crate::error::{ConnectorError, ConnectorResult};
use crate::vfs::Volume;
use elfport_shared::ConnectorConfig;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

pub mod assembler;
pub mod command;
mod handlers;
pub mod request;
pub mod response;


// Re-export core types for convenience
pub use assembler::Assembler;
pub use command::{Command, CommandRegistry};
pub use request::{ConnectorRequest, StagedUpload};
pub use response::{BatchOutcome, Envelope, ErrorEnvelope, FailedItem, FileDownload, FileInfo, Reply};

/// Connector bound to one volume
#[derive(Debug, Clone)]
pub struct Connector {
    config: ConnectorConfig,
    volume: Volume,
    registry: CommandRegistry,
}

impl Connector {
    pub fn new(config: ConnectorConfig) -> ConnectorResult<Self> {
        let volume = Volume::new(&config)?;
        let registry = CommandRegistry::from_config(&config);
        info!(
            "Connector ready on {} ({} commands disabled)",
            volume.root().display(),
            registry.disabled_names().len()
        );
        Ok(Self {
            config,
            volume,
            registry,
        })
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn volume(&self) -> &Volume {
        &self.volume
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    fn assembler(&self) -> Assembler<'_> {
        Assembler::new(&self.volume)
    }

    /// Run one request to completion. Never fails: errors become error replies.
    pub fn run(&self, request: &ConnectorRequest) -> Reply {
        let name = match request.command() {
            Some(name) if !name.is_empty() => name,
            _ => {
                warn!("Request without cmd");
                return Reply::Error(ConnectorError::MissingParameter("cmd".to_string()));
            }
        };

        let cmd = match self.registry.resolve(name) {
            Some(cmd) => cmd,
            None => {
                warn!("Unknown or disabled command: {}", name);
                return Reply::Error(ConnectorError::UnknownCommand(name.to_string()));
            }
        };

        let span = info_span!("command", cmd = %cmd);
        let _enter = span.enter();
        debug!("Dispatching");

        match self.dispatch(cmd, request) {
            Ok(reply) => {
                if cmd.is_mutation() {
                    info!("Command completed");
                } else {
                    debug!("Command completed");
                }
                reply
            }
            Err(err) => {
                warn!(kind = %err.kind(), "Command failed: {}", err);
                Reply::Error(err)
            }
        }
    }

    fn dispatch(&self, cmd: Command, request: &ConnectorRequest) -> ConnectorResult<Reply> {
        let envelope = match cmd {
            Command::Open => self.open(request),
            Command::Tree => self.tree(request),
            Command::Parents => self.parents(request),
            Command::Ls => self.ls(request),
            Command::Info => self.info(request),
            Command::File => return self.file(request).map(Reply::File),
            Command::Get => self.get(request),
            Command::Put => self.put(request),
            Command::Mkdir => self.mkdir(request),
            Command::Mkfile => self.mkfile(request),
            Command::Rename => self.rename(request),
            Command::Rm => self.rm(request),
            Command::Paste => self.paste(request),
            Command::Duplicate => self.duplicate(request),
            Command::Upload => self.upload(request),
            Command::Search => self.search(request),
            Command::Size => self.size(request),
            Command::Archive => self.archive(request),
            Command::Extract => self.extract(request),
            Command::Resize => self.resize(request),
            Command::Dim => self.dim(request),
            Command::Ping => Ok(Envelope::new()),
        }?;
        Ok(Reply::Json(envelope))
    }

    /// Decode a required identifier parameter
    fn target(&self, request: &ConnectorRequest, name: &str) -> ConnectorResult<PathBuf> {
        self.volume.decode(request.required(name)?)
    }

    /// Decode a required identifier that must name a directory
    fn target_dir(&self, request: &ConnectorRequest, name: &str) -> ConnectorResult<PathBuf> {
        let dir = self.target(request, name)?;
        self.volume.require_dir(&dir)?;
        Ok(dir)
    }

    fn hash(&self, path: &Path) -> ConnectorResult<String> {
        self.volume.encode(path)
    }
}
