//! Command set and the registry resolved at startup

use elfport_shared::ConnectorConfig;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Every command the connector understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Command {
    Open,
    Tree,
    Parents,
    Ls,
    Info,
    File,
    Get,
    Put,
    Mkdir,
    Mkfile,
    Rename,
    Rm,
    Paste,
    Duplicate,
    Upload,
    Search,
    Size,
    Archive,
    Extract,
    Resize,
    Dim,
    Ping,
}

impl Command {
    pub const ALL: [Command; 22] = [
        Command::Open,
        Command::Tree,
        Command::Parents,
        Command::Ls,
        Command::Info,
        Command::File,
        Command::Get,
        Command::Put,
        Command::Mkdir,
        Command::Mkfile,
        Command::Rename,
        Command::Rm,
        Command::Paste,
        Command::Duplicate,
        Command::Upload,
        Command::Search,
        Command::Size,
        Command::Archive,
        Command::Extract,
        Command::Resize,
        Command::Dim,
        Command::Ping,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Command::Open => "open",
            Command::Tree => "tree",
            Command::Parents => "parents",
            Command::Ls => "ls",
            Command::Info => "info",
            Command::File => "file",
            Command::Get => "get",
            Command::Put => "put",
            Command::Mkdir => "mkdir",
            Command::Mkfile => "mkfile",
            Command::Rename => "rename",
            Command::Rm => "rm",
            Command::Paste => "paste",
            Command::Duplicate => "duplicate",
            Command::Upload => "upload",
            Command::Search => "search",
            Command::Size => "size",
            Command::Archive => "archive",
            Command::Extract => "extract",
            Command::Resize => "resize",
            Command::Dim => "dim",
            Command::Ping => "ping",
        }
    }

    /// Commands that change the filesystem
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Command::Put
                | Command::Mkdir
                | Command::Mkfile
                | Command::Rename
                | Command::Rm
                | Command::Paste
                | Command::Duplicate
                | Command::Upload
                | Command::Archive
                | Command::Extract
                | Command::Resize
        )
    }

    /// Commands that can be switched off with `archivers_enabled = false`
    pub fn needs_archivers(&self) -> bool {
        matches!(self, Command::Archive | Command::Extract)
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|cmd| cmd.name() == name)
            .ok_or_else(|| name.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable set of enabled commands
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    enabled: BTreeSet<Command>,
}

impl CommandRegistry {
    /// All commands enabled
    pub fn new() -> Self {
        Self {
            enabled: Command::ALL.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        let mut enabled: BTreeSet<Command> = Command::ALL.into_iter().collect();

        for name in &config.disabled {
            match name.parse::<Command>() {
                // open is the entry point of every client session
                Ok(Command::Open) => warn!("Command open cannot be disabled"),
                Ok(cmd) => {
                    enabled.remove(&cmd);
                }
                Err(name) => warn!("Ignoring unknown command in disabled list: {}", name),
            }
        }
        if !config.archivers_enabled {
            enabled.retain(|cmd| !cmd.needs_archivers());
        }

        Self { enabled }
    }

    /// Resolve a command name; disabled and unknown names give `None`
    pub fn resolve(&self, name: &str) -> Option<Command> {
        name.parse::<Command>()
            .ok()
            .filter(|cmd| self.enabled.contains(cmd))
    }

    /// Names of disabled commands, as advertised to the client
    pub fn disabled_names(&self) -> Vec<&'static str> {
        Command::ALL
            .into_iter()
            .filter(|cmd| !self.enabled.contains(cmd))
            .map(|cmd| cmd.name())
            .collect()
    }
}

impl Default for CommandRegistry {
    fn default() -> Self {
        Self::new()
    }
}
