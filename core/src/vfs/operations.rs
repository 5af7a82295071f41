//! Filesystem operations on the volume
//!
//! Every operation checks permissions itself and maps I/O failures onto
//! [`ConnectorError`] before returning. Recursive copies are all-or-nothing:
//! a failed copy removes what it wrote. Recursive deletes check the whole
//! subtree first.

use super::archive::{self, ArchiveFormat};
use super::image::{self, ImageEdit};
use super::{mime, Access, PasteOutcome, Usage, Volume};
use crate::error::{display_name, ConnectorError, ConnectorResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Characters never accepted in a client-supplied name
const FORBIDDEN_CHARS: &[char] = &['/', '\\', ':', '<', '>', '\0'];

/// Compound extensions kept together when numbering copies
const COMPOUND_EXTENSIONS: &[&str] = &[".tar.gz", ".tar.bz2", ".tar.xz"];

/// Only the prefix of a `put` body is searched for the data URI marker
const DATA_URI_SCAN: usize = 100;

/// Validate a single entry name supplied by the client
pub fn validate_name(name: &str) -> ConnectorResult<()> {
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.len() > 255
        || name.contains(FORBIDDEN_CHARS)
    {
        return Err(ConnectorError::InvalidName(name.to_string()));
    }
    Ok(())
}

impl Volume {
    /// Visible children of a directory: directories first, then files,
    /// each group sorted by name
    pub fn list_dir(&self, dir: &Path) -> ConnectorResult<Vec<PathBuf>> {
        self.require_dir(dir)?;
        self.ensure(dir, Access::Read)?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).map_err(|e| ConnectorError::io(e, dir))? {
            let entry = entry.map_err(|e| ConnectorError::io(e, dir))?;
            if !self.is_accepted(&entry.file_name()) {
                continue;
            }
            let path = entry.path();
            if path.is_dir() {
                dirs.push(path);
            } else {
                files.push(path);
            }
        }

        dirs.sort();
        files.sort();
        dirs.extend(files);
        Ok(dirs)
    }

    /// Visible subdirectories, symlinks excluded
    pub fn subdirs(&self, dir: &Path) -> ConnectorResult<Vec<PathBuf>> {
        Ok(self
            .list_dir(dir)?
            .into_iter()
            .filter(|path| is_real_dir(path))
            .collect())
    }

    pub fn has_subdirs(&self, dir: &Path) -> bool {
        match fs::read_dir(dir) {
            Ok(entries) => entries.filter_map(Result::ok).any(|entry| {
                self.is_accepted(&entry.file_name())
                    && entry.file_type().map(|t| t.is_dir()).unwrap_or(false)
            }),
            Err(_) => false,
        }
    }

    /// Ancestors of `path` up to and including the root, nearest first
    pub fn ancestors(&self, path: &Path) -> Vec<PathBuf> {
        path.ancestors()
            .skip(1)
            .take_while(|ancestor| ancestor.starts_with(self.root()))
            .map(Path::to_path_buf)
            .collect()
    }

    pub fn make_dir(&self, parent: &Path, name: &str) -> ConnectorResult<PathBuf> {
        validate_name(name)?;
        self.require_dir(parent)?;
        self.ensure(parent, Access::Write)?;

        let path = parent.join(name);
        fs::create_dir(&path).map_err(|e| ConnectorError::io(e, &path))?;
        info!("Created directory {}", self.resolver().display_path(&path));
        Ok(path)
    }

    /// Create a nested relative path such as `a/b/c` below `parent`.
    ///
    /// Existing directories along the way are reused. Returns the final
    /// directory and the directories that were actually created.
    pub fn make_dirs(&self, parent: &Path, rel: &str) -> ConnectorResult<(PathBuf, Vec<PathBuf>)> {
        self.require_dir(parent)?;
        self.ensure(parent, Access::Write)?;

        let segments: Vec<&str> = rel.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return Err(ConnectorError::InvalidName(rel.to_string()));
        }
        for segment in &segments {
            validate_name(segment)?;
        }

        let mut current = parent.to_path_buf();
        let mut created = Vec::new();
        for segment in segments {
            current.push(segment);
            match fs::symlink_metadata(&current) {
                Ok(meta) if meta.is_dir() => {}
                Ok(_) => return Err(ConnectorError::AlreadyExists(segment.to_string())),
                Err(_) => {
                    fs::create_dir(&current).map_err(|e| ConnectorError::io(e, &current))?;
                    created.push(current.clone());
                }
            }
        }

        info!(
            "Created {} directories for {}",
            created.len(),
            self.resolver().display_path(&current)
        );
        Ok((current, created))
    }

    /// Create an empty file; fails if anything already has that name
    pub fn make_file(&self, parent: &Path, name: &str) -> ConnectorResult<PathBuf> {
        validate_name(name)?;
        self.require_dir(parent)?;
        self.ensure(parent, Access::Write)?;

        let path = parent.join(name);
        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| ConnectorError::io(e, &path))?;
        info!("Created file {}", self.resolver().display_path(&path));
        Ok(path)
    }

    /// Rename in place. An existing entry with the new name is never replaced.
    pub fn rename_entry(&self, path: &Path, name: &str) -> ConnectorResult<PathBuf> {
        validate_name(name)?;
        if self.is_root(path) {
            return Err(ConnectorError::PermissionDenied(self.name_of(path)));
        }
        self.lstat(path)?;

        let parent = parent_of(path)?;
        self.ensure(path, Access::Remove)?;
        self.ensure(parent, Access::Write)?;

        let dst = parent.join(name);
        if dst == path {
            return Ok(dst);
        }
        if fs::symlink_metadata(&dst).is_ok() {
            return Err(ConnectorError::AlreadyExists(name.to_string()));
        }

        fs::rename(path, &dst).map_err(|e| ConnectorError::io(e, path))?;
        info!(
            "Renamed {} to {}",
            self.resolver().display_path(path),
            self.resolver().display_path(&dst)
        );
        Ok(dst)
    }

    /// Remove a file, symlink, or whole directory tree
    pub fn remove_entry(&self, path: &Path) -> ConnectorResult<()> {
        if self.is_root(path) {
            return Err(ConnectorError::PermissionDenied(self.name_of(path)));
        }
        let meta = self.lstat(path)?;
        self.ensure_removable(path, &meta)?;

        if meta.is_dir() {
            fs::remove_dir_all(path)
        } else {
            fs::remove_file(path)
        }
        .map_err(|e| ConnectorError::io(e, path))?;

        info!("Removed {}", self.resolver().display_path(path));
        Ok(())
    }

    fn ensure_removable(&self, path: &Path, meta: &fs::Metadata) -> ConnectorResult<()> {
        self.ensure(path, Access::Remove)?;
        if meta.is_dir() {
            for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
                let entry = entry.map_err(|e| walk_error(e, path))?;
                self.ensure(entry.path(), Access::Remove)?;
            }
        }
        Ok(())
    }

    /// Copy `src` to `dst`, which must not exist. A failed copy leaves no
    /// trace at `dst`.
    pub fn copy_entry(&self, src: &Path, dst: &Path) -> ConnectorResult<()> {
        if let Err(e) = copy_tree(src, dst) {
            if fs::symlink_metadata(dst).is_ok() {
                if let Err(cleanup) = remove_any(dst) {
                    warn!("Failed to roll back partial copy {}: {}", dst.display(), cleanup);
                }
            }
            return Err(ConnectorError::io(e, src));
        }
        debug!(
            "Copied {} to {}",
            self.resolver().display_path(src),
            self.resolver().display_path(dst)
        );
        Ok(())
    }

    /// Copy or move `src` into the directory `dst_dir`
    pub fn paste_entry(
        &self,
        src: &Path,
        dst_dir: &Path,
        cut: bool,
        overwrite: bool,
    ) -> ConnectorResult<PasteOutcome> {
        if self.is_root(src) {
            return Err(ConnectorError::PermissionDenied(self.name_of(src)));
        }
        let src_meta = self.lstat(src)?;
        self.require_dir(dst_dir)?;
        self.ensure(src, Access::Read)?;
        self.ensure(dst_dir, Access::Write)?;
        if cut {
            self.ensure(src, Access::Remove)?;
        }

        let name = src
            .file_name()
            .ok_or_else(|| ConnectorError::InvalidTarget(display_name(src)))?;
        if is_inside(dst_dir, src) {
            return Err(ConnectorError::CopyIntoItself(display_name(src)));
        }

        if src.parent() == Some(dst_dir) {
            if cut {
                return Ok(PasteOutcome {
                    dst: src.to_path_buf(),
                    moved: false,
                    replaced: false,
                });
            }
            let dst = numbered_sibling(src);
            self.copy_entry(src, &dst)?;
            return Ok(PasteOutcome {
                dst,
                moved: false,
                replaced: false,
            });
        }

        let dst = dst_dir.join(name);
        let existing = match fs::symlink_metadata(&dst) {
            Ok(meta) => meta,
            Err(_) => {
                self.transfer(src, &dst, cut)?;
                return Ok(PasteOutcome {
                    dst,
                    moved: cut,
                    replaced: false,
                });
            }
        };

        if !overwrite || existing.is_dir() != src_meta.is_dir() {
            return Err(ConnectorError::AlreadyExists(display_name(&dst)));
        }
        self.ensure_removable(&dst, &existing)?;

        // Land next to the destination first so a failed transfer keeps the old entry
        let staged = numbered_name(dst_dir, &format!(".{}.part", display_name(&dst)), false);
        self.transfer(src, &staged, cut)?;
        if let Err(e) = self.remove_entry(&dst) {
            let undo = if cut {
                move_path(&staged, src)
            } else {
                remove_any(&staged)
            };
            if let Err(undo) = undo {
                warn!("Failed to restore {}: {}", staged.display(), undo);
            }
            return Err(e);
        }
        fs::rename(&staged, &dst).map_err(|e| ConnectorError::io(e, &dst))?;

        info!("Replaced {}", self.resolver().display_path(&dst));
        Ok(PasteOutcome {
            dst,
            moved: cut,
            replaced: true,
        })
    }

    fn transfer(&self, src: &Path, dst: &Path, cut: bool) -> ConnectorResult<()> {
        if cut {
            move_path(src, dst).map_err(|e| ConnectorError::io(e, src))?;
            info!(
                "Moved {} to {}",
                self.resolver().display_path(src),
                self.resolver().display_path(dst)
            );
            Ok(())
        } else {
            self.copy_entry(src, dst)
        }
    }

    /// Copy an entry next to itself under a numbered name
    pub fn duplicate_entry(&self, path: &Path) -> ConnectorResult<PathBuf> {
        if self.is_root(path) {
            return Err(ConnectorError::PermissionDenied(self.name_of(path)));
        }
        self.lstat(path)?;
        let parent = parent_of(path)?;
        self.ensure(path, Access::Read)?;
        self.ensure(parent, Access::Write)?;

        let dst = numbered_sibling(path);
        self.copy_entry(path, &dst)?;
        info!("Duplicated {}", self.resolver().display_path(path));
        Ok(dst)
    }

    /// Store an uploaded payload as `dir/name`.
    ///
    /// The bytes go to a temporary file in `dir` that is moved into place
    /// only once fully written. Returns the stored path and whether an
    /// existing file was replaced.
    pub fn write_upload<R: Read>(
        &self,
        dir: &Path,
        name: &str,
        source: &mut R,
        overwrite: bool,
    ) -> ConnectorResult<(PathBuf, bool)> {
        validate_name(name)?;
        self.require_dir(dir)?;
        self.ensure(dir, Access::Write)?;

        let dst = dir.join(name);
        let replaced = match fs::symlink_metadata(&dst) {
            Ok(meta) => {
                if !overwrite || !meta.is_file() {
                    return Err(ConnectorError::AlreadyExists(name.to_string()));
                }
                self.ensure(&dst, Access::Write)?;
                true
            }
            Err(_) => false,
        };

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| ConnectorError::io(e, dir))?;
        io::copy(source, tmp.as_file_mut()).map_err(|e| ConnectorError::io(e, &dst))?;
        publish_mode(tmp.as_file()).map_err(|e| ConnectorError::io(e, &dst))?;

        let persisted = if replaced {
            tmp.persist(&dst)
        } else {
            tmp.persist_noclobber(&dst)
        };
        persisted.map_err(|e| ConnectorError::io(e.error, &dst))?;

        info!("Stored upload {}", self.resolver().display_path(&dst));
        Ok((dst, replaced))
    }

    /// File content as text, or as a base64 data URI when it is not UTF-8
    pub fn read_content(&self, path: &Path) -> ConnectorResult<String> {
        self.require_file(path)?;
        self.ensure(path, Access::Read)?;

        let bytes = fs::read(path).map_err(|e| ConnectorError::io(e, path))?;
        match String::from_utf8(bytes) {
            Ok(text) => Ok(text),
            Err(e) => Ok(format!(
                "data:{};base64,{}",
                mime::mime_for(path),
                STANDARD.encode(e.into_bytes())
            )),
        }
    }

    /// Replace file content with text, or with the bytes of a base64 data URI
    pub fn write_content(&self, path: &Path, content: &str) -> ConnectorResult<()> {
        self.require_file(path)?;
        self.ensure(path, Access::Write)?;

        let bytes = match decode_data_uri(content) {
            Some(decoded) => decoded?,
            None => content.as_bytes().to_vec(),
        };

        let parent = parent_of(path)?;
        let original = fs::metadata(path).map_err(|e| ConnectorError::io(e, path))?;
        let mut tmp = NamedTempFile::new_in(parent).map_err(|e| ConnectorError::io(e, path))?;
        io::Write::write_all(tmp.as_file_mut(), &bytes).map_err(|e| ConnectorError::io(e, path))?;
        tmp.as_file()
            .set_permissions(original.permissions())
            .map_err(|e| ConnectorError::io(e, path))?;
        tmp.persist(path)
            .map_err(|e| ConnectorError::io(e.error, path))?;

        info!(
            "Wrote {} bytes to {}",
            bytes.len(),
            self.resolver().display_path(path)
        );
        Ok(())
    }

    /// Case-insensitive substring search on names below `dir`.
    ///
    /// Directories are reported only when no MIME filter is given.
    pub fn search(&self, dir: &Path, query: &str, mimes: &[String]) -> ConnectorResult<Vec<PathBuf>> {
        self.require_dir(dir)?;
        self.ensure(dir, Access::Read)?;

        let needle = query.to_lowercase();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || self.is_accepted(entry.file_name()));

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry during search: {}", e);
                    continue;
                }
            };

            let name = entry.file_name().to_string_lossy().to_lowercase();
            if !name.contains(&needle) {
                continue;
            }

            if entry.file_type().is_dir() {
                if mimes.is_empty() {
                    found.push(entry.into_path());
                }
                continue;
            }

            if !mimes.is_empty() {
                let mime = mime::mime_for(entry.path());
                if !mimes.iter().any(|filter| mime_matches(&mime, filter)) {
                    continue;
                }
            }
            found.push(entry.into_path());
        }

        debug!("Search for {:?} matched {} entries", query, found.len());
        Ok(found)
    }

    /// Recursive size and entry counts; symlinks are counted, not followed
    pub fn disk_usage(&self, path: &Path) -> ConnectorResult<Usage> {
        let meta = self.lstat(path)?;
        self.ensure(path, Access::Read)?;

        if !meta.is_dir() {
            return Ok(Usage {
                size: meta.len(),
                files: 1,
                dirs: 0,
            });
        }

        let mut usage = Usage::default();
        for entry in WalkDir::new(path).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!("Skipping unreadable entry while sizing: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                usage.dirs += 1;
            } else {
                usage.files += 1;
                usage.size += entry.metadata().map(|m| m.len()).unwrap_or(0);
            }
        }
        Ok(usage)
    }

    /// Pack `targets` into a new archive inside `dir`
    pub fn make_archive(
        &self,
        dir: &Path,
        targets: &[PathBuf],
        format: ArchiveFormat,
        name: Option<&str>,
    ) -> ConnectorResult<PathBuf> {
        self.require_dir(dir)?;
        self.ensure(dir, Access::Write)?;
        if targets.is_empty() {
            return Err(ConnectorError::MissingParameter("targets[]".to_string()));
        }
        for target in targets {
            self.lstat(target)?;
            self.ensure(target, Access::Read)?;
            if dir.starts_with(target) {
                return Err(ConnectorError::CopyIntoItself(self.name_of(target)));
            }
        }

        let archive_path = match name {
            Some(name) => {
                validate_name(name)?;
                let path = dir.join(name);
                if fs::symlink_metadata(&path).is_ok() {
                    return Err(ConnectorError::AlreadyExists(name.to_string()));
                }
                path
            }
            None => {
                let base = match targets {
                    [single] => display_name(single),
                    _ => "Archive".to_string(),
                };
                free_name(dir, &format!("{}.{}", base, format.extension()), false)
            }
        };

        archive::create_archive(format, &archive_path, targets)
            .map_err(|e| ConnectorError::io(e, &archive_path))?;
        info!(
            "Created archive {} with {} entries",
            self.resolver().display_path(&archive_path),
            targets.len()
        );
        Ok(archive_path)
    }

    /// Unpack an archive next to itself, or into a fresh directory when
    /// `makedir` is set. Returns the new top-level entries.
    pub fn unpack_archive(&self, archive: &Path, makedir: bool) -> ConnectorResult<Vec<PathBuf>> {
        self.require_file(archive)?;
        self.ensure(archive, Access::Read)?;

        let format = ArchiveFormat::from_mime(&mime::mime_for(archive))
            .ok_or_else(|| ConnectorError::UnsupportedFormat(display_name(archive)))?;
        let parent = parent_of(archive)?;
        self.ensure(parent, Access::Write)?;

        if !makedir {
            let report = archive::extract_archive(format, archive, parent)
                .map_err(|e| ConnectorError::io(e, archive))?;
            log_skipped(archive, report.skipped);
            return Ok(report.created);
        }

        let base = archive_stem(archive);
        let dest = free_name(parent, &base, true);
        fs::create_dir(&dest).map_err(|e| ConnectorError::io(e, &dest))?;
        match archive::extract_archive(format, archive, &dest) {
            Ok(report) => {
                log_skipped(archive, report.skipped);
                Ok(vec![dest])
            }
            Err(e) => {
                if let Err(cleanup) = fs::remove_dir_all(&dest) {
                    warn!("Failed to remove {}: {}", dest.display(), cleanup);
                }
                Err(ConnectorError::io(e, archive))
            }
        }
    }

    /// Resize, crop, or rotate an image in place, returning the new dimensions
    pub fn edit_image(&self, path: &Path, edit: ImageEdit) -> ConnectorResult<(u32, u32)> {
        self.require_file(path)?;
        self.ensure(path, Access::Write)?;
        if !mime::is_image(&mime::mime_for(path)) {
            return Err(ConnectorError::UnsupportedImage(display_name(path)));
        }

        let dims = image::apply(path, edit)?;
        info!(
            "Edited image {} ({:?}), now {}x{}",
            self.resolver().display_path(path),
            edit,
            dims.0,
            dims.1
        );
        Ok(dims)
    }

    pub fn image_dimensions(&self, path: &Path) -> ConnectorResult<(u32, u32)> {
        self.require_file(path)?;
        self.ensure(path, Access::Read)?;
        image::dimensions(path)
    }
}

fn log_skipped(archive: &Path, skipped: usize) {
    if skipped > 0 {
        warn!("Skipped {} entries while extracting {}", skipped, display_name(archive));
    }
}

fn parent_of(path: &Path) -> ConnectorResult<&Path> {
    path.parent()
        .ok_or_else(|| ConnectorError::InvalidTarget(display_name(path)))
}

fn is_real_dir(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|meta| meta.is_dir())
        .unwrap_or(false)
}

/// Whether `dir` is `src` or lies below it, checked both lexically and on disk
fn is_inside(dir: &Path, src: &Path) -> bool {
    if dir.starts_with(src) {
        return true;
    }
    match (dir.canonicalize(), src.canonicalize()) {
        (Ok(dir), Ok(src)) => dir.starts_with(src),
        _ => false,
    }
}

fn mime_matches(mime: &str, filter: &str) -> bool {
    let filter = filter.trim_end_matches('/');
    mime == filter
        || mime
            .strip_prefix(filter)
            .map(|rest| rest.starts_with('/'))
            .unwrap_or(false)
}

/// Bytes of a `data:<mime>;base64,<payload>` body, `None` for plain text
fn decode_data_uri(content: &str) -> Option<ConnectorResult<Vec<u8>>> {
    if !content.starts_with("data:") {
        return None;
    }
    let scan = &content.as_bytes()[..content.len().min(DATA_URI_SCAN)];
    let marker = b";base64,";
    let pos = scan.windows(marker.len()).position(|w| w == marker)?;

    let payload = &content[pos + marker.len()..];
    Some(
        STANDARD
            .decode(payload.trim())
            .map_err(|_| ConnectorError::MissingParameter("content".to_string())),
    )
}

/// Archive name up to its first dot, the default directory name for `makedir`
fn archive_stem(archive: &Path) -> String {
    let name = display_name(archive);
    match name.split('.').next() {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => "New Folder".to_string(),
    }
}

/// Split a file name into stem and extension, keeping `.tar.gz` together
fn split_name(name: &str, is_dir: bool) -> (&str, &str) {
    if is_dir {
        return (name, "");
    }
    let lower = name.to_ascii_lowercase();
    for ext in COMPOUND_EXTENSIONS {
        if lower.ends_with(ext) && name.len() > ext.len() {
            let idx = name.len() - ext.len();
            return (&name[..idx], &name[idx..]);
        }
    }
    match name.rfind('.') {
        Some(idx) if idx > 0 => (&name[..idx], &name[idx..]),
        _ => (name, ""),
    }
}

/// Drop a trailing copy counter: `report(2)` becomes `report`
fn strip_counter(stem: &str) -> &str {
    if let Some(inner) = stem.strip_suffix(')') {
        if let Some(open) = inner.rfind('(') {
            let digits = &inner[open + 1..];
            if open > 0 && !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
                return &stem[..open];
            }
        }
    }
    stem
}

/// First free `stem(n).ext` in `parent`, counting from 1
pub fn numbered_name(parent: &Path, name: &str, is_dir: bool) -> PathBuf {
    let (stem, ext) = split_name(name, is_dir);
    let base = strip_counter(stem);
    let mut n: u64 = 1;
    loop {
        let candidate = parent.join(format!("{}({}){}", base, n, ext));
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }
        n += 1;
    }
}

/// `name` itself when free, otherwise the first free numbered variant
pub fn free_name(parent: &Path, name: &str, is_dir: bool) -> PathBuf {
    let candidate = parent.join(name);
    if fs::symlink_metadata(&candidate).is_err() {
        candidate
    } else {
        numbered_name(parent, name, is_dir)
    }
}

fn numbered_sibling(path: &Path) -> PathBuf {
    let parent = path.parent().unwrap_or_else(|| Path::new(""));
    numbered_name(parent, &display_name(path), is_real_dir(path))
}

/// Temporary files are created owner-only; published files get the usual mode
#[cfg(unix)]
pub(crate) fn publish_mode(file: &File) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
pub(crate) fn publish_mode(_file: &File) -> io::Result<()> {
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(src)?;
    if meta.file_type().is_symlink() {
        return copy_symlink(src, dst);
    }
    if !meta.is_dir() {
        return copy_file(src, dst);
    }

    fs::create_dir(dst)?;
    for entry in WalkDir::new(src).min_depth(1).follow_links(false) {
        let entry = entry?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        let target = dst.join(rel);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            fs::create_dir(&target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        } else {
            copy_file(entry.path(), &target)?;
        }
    }
    fs::set_permissions(dst, meta.permissions())
}

fn copy_file(src: &Path, dst: &Path) -> io::Result<()> {
    let mut input = File::open(src)?;
    let mut output = OpenOptions::new().write(true).create_new(true).open(dst)?;
    io::copy(&mut input, &mut output)?;
    output.set_permissions(input.metadata()?.permissions())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(fs::read_link(src)?, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> io::Result<()> {
    copy_file(src, dst)
}

/// Rename, falling back to copy and delete across filesystems
fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            if let Err(e) = copy_tree(src, dst) {
                let _ = remove_any(dst);
                return Err(e);
            }
            remove_any(src)
        }
        Err(e) => Err(e),
    }
}

#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::EXDEV)
}

#[cfg(not(unix))]
fn is_cross_device(_err: &io::Error) -> bool {
    false
}

fn remove_any(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

fn walk_error(err: walkdir::Error, root: &Path) -> ConnectorError {
    let path = err.path().unwrap_or(root).to_path_buf();
    match err.into_io_error() {
        Some(io_err) => ConnectorError::io(io_err, &path),
        None => ConnectorError::Internal(format!("filesystem loop at {}", display_name(&path))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("report.txt").is_ok());
        assert!(validate_name(".hidden").is_ok());
        assert!(validate_name("with space").is_ok());

        for bad in ["", ".", "..", "a/b", "a\\b", "c:", "<x>", "nul\0"] {
            assert!(validate_name(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(validate_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("a.txt", false), ("a", ".txt"));
        assert_eq!(split_name("a.b.txt", false), ("a.b", ".txt"));
        assert_eq!(split_name("a.tar.gz", false), ("a", ".tar.gz"));
        assert_eq!(split_name(".bashrc", false), (".bashrc", ""));
        assert_eq!(split_name("Makefile", false), ("Makefile", ""));
        assert_eq!(split_name("dir.d", true), ("dir.d", ""));
    }

    #[test]
    fn test_strip_counter() {
        assert_eq!(strip_counter("a(2)"), "a");
        assert_eq!(strip_counter("a (copy)"), "a (copy)");
        assert_eq!(strip_counter("(3)"), "(3)");
        assert_eq!(strip_counter("a()"), "a()");
    }

    #[test]
    fn test_numbered_names() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::write(dir.path().join("a.txt"), b"").unwrap();

        assert_eq!(numbered_name(dir.path(), "a.txt", false), dir.path().join("a(1).txt"));
        fs::write(dir.path().join("a(1).txt"), b"").unwrap();
        assert_eq!(numbered_name(dir.path(), "a.txt", false), dir.path().join("a(2).txt"));
        // A copy of a copy counts from the original stem
        assert_eq!(numbered_name(dir.path(), "a(1).txt", false), dir.path().join("a(2).txt"));

        assert_eq!(free_name(dir.path(), "b.txt", false), dir.path().join("b.txt"));
        assert_eq!(free_name(dir.path(), "a.txt", false), dir.path().join("a(2).txt"));
    }

    #[test]
    fn test_mime_matches() {
        assert!(mime_matches("image/png", "image"));
        assert!(mime_matches("image/png", "image/"));
        assert!(mime_matches("image/png", "image/png"));
        assert!(!mime_matches("image/png", "text"));
        assert!(!mime_matches("imagex/png", "image"));
    }

    #[test]
    fn test_decode_data_uri() {
        assert!(decode_data_uri("plain text").is_none());
        assert!(decode_data_uri("data: but no marker").is_none());
        assert_eq!(
            decode_data_uri("data:text/plain;base64,aGVsbG8=").unwrap().unwrap(),
            b"hello"
        );
        assert!(decode_data_uri("data:text/plain;base64,***").unwrap().is_err());
    }

    #[test]
    fn test_archive_stem() {
        assert_eq!(archive_stem(Path::new("/x/bundle.tar.gz")), "bundle");
        assert_eq!(archive_stem(Path::new("/x/.hidden.tar")), "New Folder");
    }
}
