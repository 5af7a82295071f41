//! Path Resolution Utilities
//!
//! Maps entries under the volume root to opaque identifiers and back.
//! An identifier is the volume prefix followed by the unpadded URL-safe
//! base64 of the root-relative path, so it never contains `/`, `+` or `=`.

use crate::error::{ConnectorError, ConnectorResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use elfport_shared::api::VOLUME_ID;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Relative form of the root itself
const ROOT_REL: &[u8] = b"/";

/// Path resolver bound to one canonical root directory
#[derive(Debug, Clone)]
pub struct PathResolver {
    /// Canonical root of the volume
    root: PathBuf,
    /// Maximum decoded path length
    max_path_length: usize,
}

impl PathResolver {
    /// Create a resolver for `root`, which must be an existing directory
    pub fn new<P: AsRef<Path>>(root: P) -> ConnectorResult<Self> {
        Self::with_config(root, 4096)
    }

    pub fn with_config<P: AsRef<Path>>(root: P, max_path_length: usize) -> ConnectorResult<Self> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|e| ConnectorError::io(e, root))?;
        if !canonical.is_dir() {
            return Err(ConnectorError::NotADirectory(root.display().to_string()));
        }

        Ok(Self {
            root: canonical,
            max_path_length,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn is_root(&self, path: &Path) -> bool {
        path == self.root
    }

    /// Identifier of the root directory
    pub fn root_hash(&self) -> String {
        format!("{}{}", VOLUME_ID, URL_SAFE_NO_PAD.encode(ROOT_REL))
    }

    /// Encode a path that lies inside the root
    pub fn encode(&self, path: &Path) -> ConnectorResult<String> {
        let rel = self
            .relative(path)
            .ok_or_else(|| ConnectorError::InvalidTarget(crate::error::display_name(path)))?;

        if rel.as_os_str().is_empty() {
            return Ok(self.root_hash());
        }

        let bytes = rel_to_bytes(rel)?;
        Ok(format!("{}{}", VOLUME_ID, URL_SAFE_NO_PAD.encode(bytes)))
    }

    /// Identifier of the parent directory, `None` for the root
    pub fn parent_hash(&self, path: &Path) -> ConnectorResult<Option<String>> {
        if self.is_root(path) {
            return Ok(None);
        }
        match path.parent() {
            Some(parent) => self.encode(parent).map(Some),
            None => Ok(None),
        }
    }

    /// Decode an identifier into an absolute path inside the root.
    ///
    /// The returned path is lexical (`root.join(rel)`), but the real location
    /// it refers to, following symlinks, is checked against the root. For an
    /// entry that does not exist yet the parent is checked instead.
    pub fn decode(&self, hash: &str) -> ConnectorResult<PathBuf> {
        let invalid = || ConnectorError::InvalidTarget(hash.to_string());

        let encoded = hash.strip_prefix(VOLUME_ID).ok_or_else(invalid)?;
        let bytes = URL_SAFE_NO_PAD.decode(encoded).map_err(|_| invalid())?;

        if bytes.len() > self.max_path_length {
            return Err(invalid());
        }
        if bytes == ROOT_REL {
            return Ok(self.root.clone());
        }

        let rel = self.normalize(&bytes).ok_or_else(invalid)?;
        let path = self.root.join(rel);
        self.confine(&path).map_err(|_| invalid())?;

        Ok(path)
    }

    /// Root-relative part of a path, empty for the root itself
    pub fn relative<'a>(&self, path: &'a Path) -> Option<&'a Path> {
        path.strip_prefix(&self.root).ok()
    }

    /// Root-relative path with a leading `/`, the form permission rules match against
    pub fn display_path(&self, path: &Path) -> String {
        match self.relative(path) {
            Some(rel) if !rel.as_os_str().is_empty() => {
                format!("/{}", rel.to_string_lossy())
            }
            _ => "/".to_string(),
        }
    }

    /// Whether the real location of `path` lies inside the root
    pub fn contains(&self, path: &Path) -> bool {
        match path.canonicalize() {
            Ok(real) => real.starts_with(&self.root),
            Err(_) => false,
        }
    }

    /// Reject identifiers whose real location leaves the root
    pub fn confine(&self, path: &Path) -> ConnectorResult<()> {
        let outside = || ConnectorError::InvalidTarget(crate::error::display_name(path));

        match fs::symlink_metadata(path) {
            Ok(meta) => match path.canonicalize() {
                Ok(real) if real.starts_with(&self.root) => Ok(()),
                Ok(_) => Err(outside()),
                // Dangling symlink: only the link itself is addressable
                Err(_) if meta.file_type().is_symlink() => self.confine_parent(path),
                Err(e) => Err(ConnectorError::io(e, path)),
            },
            Err(_) => self.confine_parent(path),
        }
    }

    fn confine_parent(&self, path: &Path) -> ConnectorResult<()> {
        let outside = || ConnectorError::InvalidTarget(crate::error::display_name(path));
        let mut ancestor = path.parent().ok_or_else(outside)?;

        // Deepest existing ancestor decides where the path really lands
        loop {
            match ancestor.canonicalize() {
                Ok(real) if real.starts_with(&self.root) => return Ok(()),
                Ok(_) => return Err(outside()),
                Err(_) if fs::symlink_metadata(ancestor).is_ok() => return Err(outside()),
                Err(_) => ancestor = ancestor.parent().ok_or_else(outside)?,
            }
        }
    }

    /// Validate decoded relative bytes: only plain components are accepted
    fn normalize(&self, bytes: &[u8]) -> Option<PathBuf> {
        if bytes.is_empty() || bytes.contains(&0) {
            return None;
        }

        let rel = bytes_to_path(bytes)?;
        if rel.is_absolute() {
            return None;
        }

        let mut normalized = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(name) => normalized.push(name),
                _ => return None,
            }
        }

        // `a//b` or a trailing slash would collapse silently
        if rel_to_bytes(&normalized).ok()? != bytes {
            return None;
        }

        Some(normalized)
    }
}

#[cfg(unix)]
fn rel_to_bytes(rel: &Path) -> ConnectorResult<Vec<u8>> {
    use std::os::unix::ffi::OsStrExt;
    Ok(rel.as_os_str().as_bytes().to_vec())
}

#[cfg(not(unix))]
fn rel_to_bytes(rel: &Path) -> ConnectorResult<Vec<u8>> {
    let text = rel
        .to_str()
        .ok_or_else(|| ConnectorError::InvalidTarget(rel.to_string_lossy().into_owned()))?;
    Ok(text.replace('\\', "/").into_bytes())
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> Option<PathBuf> {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    Some(PathBuf::from(OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> Option<PathBuf> {
    let text = std::str::from_utf8(bytes).ok()?;
    if text.contains('\\') {
        return None;
    }
    Some(PathBuf::from(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathResolver) {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("docs/nested")).unwrap();
        fs::write(dir.path().join("docs/readme.txt"), b"hi").unwrap();
        let resolver = PathResolver::new(dir.path()).unwrap();
        (dir, resolver)
    }

    fn raw_hash(rel: &[u8]) -> String {
        format!("{}{}", VOLUME_ID, URL_SAFE_NO_PAD.encode(rel))
    }

    #[test]
    fn test_root_hash() {
        let (_dir, resolver) = setup();
        assert_eq!(resolver.root_hash(), "l1_Lw");
        assert_eq!(resolver.encode(resolver.root()).unwrap(), "l1_Lw");
        assert_eq!(resolver.decode("l1_Lw").unwrap(), resolver.root());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let (_dir, resolver) = setup();
        let path = resolver.root().join("docs/readme.txt");

        let hash = resolver.encode(&path).unwrap();
        assert!(hash.starts_with("l1_"));
        assert!(!hash.contains(['/', '+', '=']));
        assert_eq!(resolver.decode(&hash).unwrap(), path);

        // Entries that do not exist yet still resolve
        let missing = resolver.root().join("docs/new.txt");
        let hash = resolver.encode(&missing).unwrap();
        assert_eq!(resolver.decode(&hash).unwrap(), missing);
    }

    #[test]
    fn test_identifiers_are_unique() {
        let (_dir, resolver) = setup();
        let a = resolver.encode(&resolver.root().join("docs")).unwrap();
        let b = resolver.encode(&resolver.root().join("docs/nested")).unwrap();
        let c = resolver.encode(&resolver.root().join("docs/readme.txt")).unwrap();
        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_parent_hash() {
        let (_dir, resolver) = setup();
        let docs = resolver.root().join("docs");
        let file = docs.join("readme.txt");

        assert_eq!(resolver.parent_hash(resolver.root()).unwrap(), None);
        assert_eq!(
            resolver.parent_hash(&docs).unwrap(),
            Some(resolver.root_hash())
        );
        assert_eq!(
            resolver.parent_hash(&file).unwrap(),
            Some(resolver.encode(&docs).unwrap())
        );
    }

    #[test]
    fn test_rejects_malformed_identifiers() {
        let (_dir, resolver) = setup();

        for hash in ["", "l1_", "x1_Lw", "Lw", "l1_!!!", "l1_Lw=="] {
            let err = resolver.decode(hash).unwrap_err();
            assert!(
                matches!(err, ConnectorError::InvalidTarget(_)),
                "{hash} should be rejected"
            );
        }
    }

    #[test]
    fn test_rejects_traversal() {
        let (_dir, resolver) = setup();

        for rel in [
            &b".."[..],
            b"../etc/passwd",
            b"docs/../../etc",
            b"./docs",
            b"/etc/passwd",
            b"docs//nested",
            b"docs/",
            b"docs\0",
        ] {
            assert!(
                resolver.decode(&raw_hash(rel)).is_err(),
                "{:?} should be rejected",
                String::from_utf8_lossy(rel)
            );
        }
    }

    #[test]
    fn test_outside_path_cannot_be_encoded() {
        let (_dir, resolver) = setup();
        assert!(resolver.encode(Path::new("/etc/passwd")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let (dir, resolver) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("secret.txt"), b"secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let link = resolver.root().join("escape");
        let hash = resolver.encode(&link).unwrap();
        assert!(resolver.decode(&hash).is_err());

        let through = resolver.encode(&link.join("secret.txt")).unwrap();
        assert!(resolver.decode(&through).is_err());

        let new_inside_escape = resolver.encode(&link.join("new.txt")).unwrap();
        assert!(resolver.decode(&new_inside_escape).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_missing_path_below_symlink_escape() {
        let (dir, resolver) = setup();
        let outside = TempDir::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("escape")).unwrap();

        let deep = resolver.root().join("escape/missing/new.txt");
        let hash = resolver.encode(&deep).unwrap();
        assert_matches!(resolver.decode(&hash), Err(ConnectorError::InvalidTarget(_)));

        // Missing chains inside the root still resolve
        let inside = resolver.root().join("docs/missing/deeper/new.txt");
        let hash = resolver.encode(&inside).unwrap();
        assert_eq!(resolver.decode(&hash).unwrap(), inside);
    }

    #[cfg(unix)]
    #[test]
    fn test_internal_symlink_is_allowed() {
        let (dir, resolver) = setup();
        std::os::unix::fs::symlink(dir.path().join("docs"), dir.path().join("shortcut")).unwrap();

        let link = resolver.root().join("shortcut");
        let hash = resolver.encode(&link).unwrap();
        assert_eq!(resolver.decode(&hash).unwrap(), link);
        assert!(resolver.contains(&link));
    }

    #[test]
    fn test_display_path() {
        let (_dir, resolver) = setup();
        assert_eq!(resolver.display_path(resolver.root()), "/");
        assert_eq!(
            resolver.display_path(&resolver.root().join("docs/readme.txt")),
            "/docs/readme.txt"
        );
    }

    #[test]
    fn test_root_must_be_directory() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("plain.txt");
        fs::write(&file, b"x").unwrap();

        assert!(PathResolver::new(&file).is_err());
        assert!(PathResolver::new(dir.path().join("missing")).is_err());
    }
}
