//! Local volume - Core Module
//!
//! One directory tree rooted at a configured path. Every path that enters
//! this module comes from [`PathResolver::decode`] or is built from one with
//! a validated name, so operations never see a path outside the root.

use crate::error::{display_name, ConnectorError, ConnectorResult};
use elfport_shared::ConnectorConfig;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

pub mod archive;
pub mod image;
pub mod mime;
pub mod operations;
pub mod path_resolver;
pub mod permissions;


// Re-export core types for convenience
pub use archive::ArchiveFormat;
pub use image::ImageEdit;
pub use operations::validate_name;
pub use path_resolver::PathResolver;
pub use permissions::{Access, PermissionManager};

/// Volume behaviour switches taken from configuration
#[derive(Debug, Clone)]
pub struct VolumeOptions {
    pub root_alias: String,
    pub dot_files: bool,
    pub dir_size: bool,
    pub expose_real_path: bool,
}

impl From<&ConnectorConfig> for VolumeOptions {
    fn from(config: &ConnectorConfig) -> Self {
        Self {
            root_alias: config.root_alias.clone(),
            dot_files: config.dot_files,
            dir_size: config.dir_size,
            expose_real_path: config.expose_real_path,
        }
    }
}

/// Recursive totals for the `size` command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Usage {
    pub size: u64,
    pub files: u64,
    pub dirs: u64,
}

impl std::ops::AddAssign for Usage {
    fn add_assign(&mut self, other: Self) {
        self.size += other.size;
        self.files += other.files;
        self.dirs += other.dirs;
    }
}

/// Outcome of pasting one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasteOutcome {
    /// Where the entry ended up
    pub dst: PathBuf,
    /// The entry was moved away from its source
    pub moved: bool,
    /// An existing destination was replaced
    pub replaced: bool,
}

/// The sandboxed local volume
#[derive(Debug, Clone)]
pub struct Volume {
    resolver: PathResolver,
    permissions: PermissionManager,
    options: VolumeOptions,
}

impl Volume {
    pub fn new(config: &ConnectorConfig) -> ConnectorResult<Self> {
        let resolver = PathResolver::new(&config.root)?;
        let permissions = PermissionManager::from_config(config.defaults, &config.perms)?;
        Ok(Self {
            resolver,
            permissions,
            options: VolumeOptions::from(config),
        })
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn permissions(&self) -> &PermissionManager {
        &self.permissions
    }

    pub fn options(&self) -> &VolumeOptions {
        &self.options
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    pub fn is_root(&self, path: &Path) -> bool {
        self.resolver.is_root(path)
    }

    pub fn decode(&self, hash: &str) -> ConnectorResult<PathBuf> {
        self.resolver.decode(hash)
    }

    pub fn encode(&self, path: &Path) -> ConnectorResult<String> {
        self.resolver.encode(path)
    }

    /// Whether a directory entry with this name is shown to the client
    pub fn is_accepted(&self, name: &OsStr) -> bool {
        self.options.dot_files || !name.to_string_lossy().starts_with('.')
    }

    pub fn is_allowed(&self, path: &Path, access: Access) -> bool {
        let rel = self.resolver.display_path(path);
        self.permissions.is_allowed(path, &rel, access)
    }

    /// Fail with `PermissionDenied` unless `access` is allowed on `path`
    pub fn ensure(&self, path: &Path, access: Access) -> ConnectorResult<()> {
        if self.is_allowed(path, access) {
            Ok(())
        } else {
            debug!("Denied {} on {}", access.as_str(), self.resolver.display_path(path));
            Err(ConnectorError::PermissionDenied(self.name_of(path)))
        }
    }

    /// Display name, the root alias for the root itself
    pub fn name_of(&self, path: &Path) -> String {
        if self.is_root(path) {
            self.options.root_alias.clone()
        } else {
            display_name(path)
        }
    }

    /// Metadata of `path` without following a final symlink
    pub fn lstat(&self, path: &Path) -> ConnectorResult<fs::Metadata> {
        fs::symlink_metadata(path).map_err(|e| ConnectorError::io(e, path))
    }

    /// Require an existing directory
    pub fn require_dir(&self, path: &Path) -> ConnectorResult<()> {
        let meta = fs::metadata(path).map_err(|e| ConnectorError::io(e, path))?;
        if meta.is_dir() {
            Ok(())
        } else {
            Err(ConnectorError::NotADirectory(self.name_of(path)))
        }
    }

    /// Require an existing regular file
    pub fn require_file(&self, path: &Path) -> ConnectorResult<()> {
        let meta = fs::metadata(path).map_err(|e| ConnectorError::io(e, path))?;
        if meta.is_dir() {
            Err(ConnectorError::IsADirectory(self.name_of(path)))
        } else {
            Ok(())
        }
    }
}
