//! Builds client-facing entry metadata from live filesystem state

use super::command::CommandRegistry;
use super::response::FileInfo;
use crate::error::{ConnectorError, ConnectorResult};
use crate::vfs::{mime, Access, ArchiveFormat, Volume};
use chrono::{DateTime, Utc};
use elfport_shared::api::{MIME_BROKEN_LINK, MIME_DIRECTORY, VOLUME_ID};
use elfport_shared::ConnectorConfig;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::SystemTime;

/// Maximum number of files per upload request advertised to the client
pub const UPLOAD_MAX_FILES: u64 = 1000;

pub struct Assembler<'a> {
    volume: &'a Volume,
}

impl<'a> Assembler<'a> {
    pub fn new(volume: &'a Volume) -> Self {
        Self { volume }
    }

    /// Metadata for one entry, re-read from disk
    pub fn entry(&self, path: &Path) -> ConnectorResult<FileInfo> {
        let volume = self.volume;
        let resolver = volume.resolver();
        let meta = volume.lstat(path)?;
        let is_root = volume.is_root(path);

        let mut info = FileInfo {
            name: volume.name_of(path),
            hash: resolver.encode(path)?,
            phash: resolver.parent_hash(path)?,
            mime: String::new(),
            ts: timestamp(meta.modified().ok()),
            size: 0,
            read: volume.is_allowed(path, Access::Read),
            write: volume.is_allowed(path, Access::Write),
            locked: is_root || !volume.is_allowed(path, Access::Remove),
            dirs: None,
            volumeid: None,
            isroot: None,
            link: None,
            alias: None,
            path: None,
        };

        if meta.file_type().is_symlink() {
            self.describe_link(path, &mut info);
        } else if meta.is_dir() {
            info.mime = MIME_DIRECTORY.to_string();
            info.dirs = Some(u8::from(volume.has_subdirs(path)));
            info.volumeid = Some(VOLUME_ID.to_string());
            if volume.options().dir_size {
                info.size = volume.disk_usage(path).map(|usage| usage.size).unwrap_or(0);
            }
        } else {
            info.mime = mime::mime_for(path);
            info.size = meta.len();
        }

        if is_root {
            info.isroot = Some(1);
        }
        if volume.options().expose_real_path {
            info.path = Some(path.display().to_string());
        }

        Ok(info)
    }

    /// Symlinks are shown with their target's type; a target that is
    /// missing or outside the root makes the link unusable
    fn describe_link(&self, path: &Path, info: &mut FileInfo) {
        let volume = self.volume;
        let target = match path.canonicalize() {
            Ok(target) if volume.resolver().contains(&target) => target,
            _ => {
                info.mime = MIME_BROKEN_LINK.to_string();
                info.read = false;
                info.write = false;
                info.locked = true;
                return;
            }
        };

        if target.is_dir() {
            info.mime = MIME_DIRECTORY.to_string();
            info.dirs = Some(u8::from(volume.has_subdirs(&target)));
            info.volumeid = Some(VOLUME_ID.to_string());
        } else {
            info.mime = mime::mime_for(&target);
        }

        info.read = info.read && volume.is_allowed(&target, Access::Read);
        info.write = info.write && volume.is_allowed(&target, Access::Write);
        info.link = volume.encode(&target).ok();
        info.alias = Some(self.alias(&target));
    }

    /// Client-visible path of an entry, starting with the root alias
    pub fn alias(&self, path: &Path) -> String {
        let rel = self.volume.resolver().display_path(path);
        let alias = &self.volume.options().root_alias;
        if rel == "/" {
            alias.clone()
        } else {
            format!("{}{}", alias, rel)
        }
    }

    /// Metadata for several entries, skipping any that vanished meanwhile
    pub fn entries<'p, I>(&self, paths: I) -> Vec<FileInfo>
    where
        I: IntoIterator<Item = &'p std::path::PathBuf>,
    {
        paths
            .into_iter()
            .filter_map(|path| match self.entry(path) {
                Ok(info) => Some(info),
                Err(ConnectorError::NotFound(_)) => None,
                Err(e) => {
                    tracing::debug!("Skipping entry {}: {}", path.display(), e);
                    None
                }
            })
            .collect()
    }

    /// The `options` object returned by `open`
    pub fn options(&self, cwd: &Path, config: &ConnectorConfig, registry: &CommandRegistry) -> Value {
        let formats = |cmd: &str| -> Vec<ArchiveFormat> {
            match registry.resolve(cmd) {
                Some(_) => ArchiveFormat::ALL.to_vec(),
                None => Vec::new(),
            }
        };
        let create = formats("archive");
        let extract = formats("extract");
        let createext: serde_json::Map<String, Value> = create
            .iter()
            .map(|f| (f.mime().to_string(), Value::from(f.extension())))
            .collect();
        let mimes = |list: &[ArchiveFormat]| -> Vec<&'static str> {
            list.iter().map(|f| f.mime()).collect()
        };

        json!({
            "path": self.alias(cwd),
            "separator": "/",
            "url": "",
            "tmbURL": "",
            "disabled": registry.disabled_names(),
            "dotFiles": config.dot_files,
            "archivers": {
                "create": mimes(&create),
                "extract": mimes(&extract),
                "createext": createext,
            },
            "copyOverwrite": config.copy_overwrite,
            "uploadOverwrite": config.upload_overwrite,
            "uploadMaxSize": config.upload_max_size,
            "uploadMaxConn": 3,
            "uploadMime": {
                "allow": config.upload_allow,
                "deny": config.upload_deny,
                "firstOrder": config.upload_order.first(),
            },
            "i18nFolderName": true,
            "dispInlineRegex": "^(?:(?:image|video|audio)|application/(?:x-mpegURL|dash\\+xml)|(?:text/plain|application/pdf)$)",
            "jpgQuality": 100,
            "syncChkAsTs": 1,
            "syncMinMs": 30000,
            "uiCmdMap": {},
        })
    }
}

/// Drop entries whose hash was already seen, keeping the first occurrence
pub fn dedup_by_hash(entries: Vec<FileInfo>) -> Vec<FileInfo> {
    let mut seen = HashSet::new();
    entries
        .into_iter()
        .filter(|info| seen.insert(info.hash.clone()))
        .collect()
}

fn timestamp(modified: Option<SystemTime>) -> i64 {
    modified
        .map(|time| DateTime::<Utc>::from(time).timestamp())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use elfport_shared::UploadOrder;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Volume) {
        let dir = TempDir::new().unwrap();
        let volume = Volume::new(&ConnectorConfig::with_root(dir.path())).unwrap();
        (dir, volume)
    }

    #[test]
    fn test_root_entry() {
        let (_dir, volume) = setup();
        fs::create_dir(volume.root().join("sub")).unwrap();
        let info = Assembler::new(&volume).entry(volume.root()).unwrap();

        assert_eq!(info.name, "Home");
        assert_eq!(info.hash, "l1_Lw");
        assert_eq!(info.phash, None);
        assert_eq!(info.mime, "directory");
        assert_eq!(info.isroot, Some(1));
        assert_eq!(info.dirs, Some(1));
        assert_eq!(info.volumeid.as_deref(), Some("l1_"));
        assert!(info.locked);
        assert!(info.read && info.write);
    }

    #[test]
    fn test_file_entry() {
        let (_dir, volume) = setup();
        let path = volume.root().join("a.txt");
        fs::write(&path, b"abc").unwrap();
        let info = Assembler::new(&volume).entry(&path).unwrap();

        assert_eq!(info.name, "a.txt");
        assert_eq!(info.phash.as_deref(), Some("l1_Lw"));
        assert_eq!(info.mime, "text/plain");
        assert_eq!(info.size, 3);
        assert!(info.ts > 0);
        assert!(!info.locked);
        assert_eq!(info.dirs, None);
        assert_eq!(info.path, None);
    }

    #[test]
    fn test_dir_size_and_real_path_options() {
        let dir = TempDir::new().unwrap();
        let config = ConnectorConfig {
            dir_size: true,
            expose_real_path: true,
            ..ConnectorConfig::with_root(dir.path())
        };
        let volume = Volume::new(&config).unwrap();
        let sub = volume.root().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join("x.bin"), [0u8; 10]).unwrap();

        let info = Assembler::new(&volume).entry(&sub).unwrap();
        assert_eq!(info.size, 10);
        assert_eq!(info.dirs, Some(0));
        assert_eq!(info.path, Some(sub.display().to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_entries() {
        let (_dir, volume) = setup();
        let root = volume.root().to_path_buf();
        fs::create_dir(root.join("target")).unwrap();
        std::os::unix::fs::symlink(root.join("target"), root.join("inside")).unwrap();
        std::os::unix::fs::symlink("/etc", root.join("outside")).unwrap();
        std::os::unix::fs::symlink(root.join("missing"), root.join("dangling")).unwrap();

        let assembler = Assembler::new(&volume);
        let inside = assembler.entry(&root.join("inside")).unwrap();
        assert_eq!(inside.mime, "directory");
        assert_eq!(inside.link, Some(volume.encode(&root.join("target")).unwrap()));
        assert_eq!(inside.alias.as_deref(), Some("Home/target"));

        for broken in ["outside", "dangling"] {
            let info = assembler.entry(&root.join(broken)).unwrap();
            assert_eq!(info.mime, "symlink-broken");
            assert!(!info.read && !info.write && info.locked);
            assert_eq!(info.link, None);
        }
    }

    #[test]
    fn test_options_object() {
        let (_dir, volume) = setup();
        let config = ConnectorConfig {
            disabled: vec!["rename".to_string()],
            ..ConnectorConfig::with_root(volume.root())
        };
        let registry = CommandRegistry::from_config(&config);
        let options = Assembler::new(&volume).options(&volume.root().join("docs"), &config, &registry);

        assert_eq!(options["path"], "Home/docs");
        assert_eq!(options["separator"], "/");
        assert_eq!(options["url"], "");
        assert_eq!(options["disabled"], json!(["rename"]));
        assert_eq!(options["uploadOverwrite"], true);
        assert_eq!(options["archivers"]["createext"]["application/x-gzip"], "tar.gz");
        assert_eq!(
            options["uploadMime"],
            json!({"allow": [], "deny": [], "firstOrder": "deny"})
        );
    }

    #[test]
    fn test_options_follow_registry_and_upload_rules() {
        let (_dir, volume) = setup();
        let config = ConnectorConfig {
            disabled: vec!["archive".to_string()],
            upload_allow: vec!["image".to_string()],
            upload_deny: vec!["all".to_string()],
            upload_order: UploadOrder::AllowDeny,
            ..ConnectorConfig::with_root(volume.root())
        };
        let registry = CommandRegistry::from_config(&config);
        let options = Assembler::new(&volume).options(volume.root(), &config, &registry);

        assert_eq!(options["archivers"]["create"], json!([]));
        assert_eq!(options["archivers"]["createext"], json!({}));
        assert!(!options["archivers"]["extract"].as_array().unwrap().is_empty());
        assert_eq!(
            options["uploadMime"],
            json!({"allow": ["image"], "deny": ["all"], "firstOrder": "allow"})
        );
    }

    #[test]
    fn test_dedup_by_hash() {
        let (_dir, volume) = setup();
        let info = Assembler::new(&volume).entry(volume.root()).unwrap();
        let deduped = dedup_by_hash(vec![info.clone(), info.clone()]);
        assert_eq!(deduped, vec![info]);
    }
}
