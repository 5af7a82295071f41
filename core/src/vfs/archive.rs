//! Tar and gzip-compressed tar archives

use super::operations::publish_mode;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Supported archive formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Tar,
    TarGz,
}

impl ArchiveFormat {
    pub const ALL: [ArchiveFormat; 2] = [ArchiveFormat::Tar, ArchiveFormat::TarGz];

    pub fn mime(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "application/x-tar",
            ArchiveFormat::TarGz => "application/x-gzip",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::TarGz => "tar.gz",
        }
    }

    pub fn from_mime(mime: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|format| format.mime() == mime)
    }
}

/// Result of unpacking an archive
#[derive(Debug, Default)]
pub struct ExtractReport {
    /// Top-level entries that did not exist before
    pub created: Vec<PathBuf>,
    /// Entries skipped because they were links, escaped the destination,
    /// or would have replaced an existing file
    pub skipped: usize,
}

/// Pack `entries` into a new archive at `archive_path`, each under its own name.
///
/// The archive is built in a temporary file next to the destination and only
/// moved into place once complete; an existing file is never replaced.
pub fn create_archive(
    format: ArchiveFormat,
    archive_path: &Path,
    entries: &[PathBuf],
) -> io::Result<()> {
    let dir = archive_path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "archive has no parent"))?;
    let mut tmp = NamedTempFile::new_in(dir)?;

    match format {
        ArchiveFormat::Tar => {
            append_entries(tmp.as_file_mut(), entries)?;
        }
        ArchiveFormat::TarGz => {
            let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
            append_entries(&mut encoder, entries)?;
            encoder.finish()?;
        }
    }

    tmp.as_file().sync_all()?;
    publish_mode(tmp.as_file())?;
    tmp.persist_noclobber(archive_path).map_err(|e| e.error)?;
    debug!("Created {} archive {}", format.extension(), archive_path.display());
    Ok(())
}

fn append_entries<W: Write>(writer: W, entries: &[PathBuf]) -> io::Result<()> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);

    for entry in entries {
        let name = entry
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "entry has no name"))?;
        let meta = fs::symlink_metadata(entry)?;
        if meta.is_dir() {
            builder.append_dir_all(name, entry)?;
        } else {
            builder.append_path_with_name(entry, name)?;
        }
    }

    builder.into_inner()?.flush()
}

/// Unpack `archive` into `dest`.
///
/// Links, absolute paths and entries with `..` are skipped, as are files
/// that already exist in `dest`.
pub fn extract_archive(format: ArchiveFormat, archive: &Path, dest: &Path) -> io::Result<ExtractReport> {
    let file = File::open(archive)?;
    let reader: Box<dyn Read> = match format {
        ArchiveFormat::Tar => Box::new(file),
        ArchiveFormat::TarGz => Box::new(GzDecoder::new(file)),
    };

    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(false);

    let mut report = ExtractReport::default();
    let mut seen: HashSet<PathBuf> = HashSet::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let entry_type = entry.header().entry_type();
        let rel = match safe_relative(&entry.path()?) {
            Some(rel) if !entry_type.is_symlink() && !entry_type.is_hard_link() => rel,
            _ => {
                warn!("Skipping unsafe archive entry {:?}", entry.path()?);
                report.skipped += 1;
                continue;
            }
        };

        let target = dest.join(&rel);
        if !entry_type.is_dir() && fs::symlink_metadata(&target).is_ok() {
            report.skipped += 1;
            continue;
        }

        let top = match rel.components().next() {
            Some(Component::Normal(name)) => dest.join(name),
            _ => continue,
        };
        if seen.insert(top.clone()) && fs::symlink_metadata(&top).is_err() {
            report.created.push(top);
        }

        if !entry.unpack_in(dest)? {
            report.skipped += 1;
        }
    }

    Ok(report)
}

/// Plain relative form of an archive path, `None` when it could escape
fn safe_relative(path: &Path) -> Option<PathBuf> {
    let mut rel = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(name) => rel.push(name),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if rel.as_os_str().is_empty() {
        None
    } else {
        Some(rel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree(dir: &Path) -> Vec<PathBuf> {
        fs::create_dir_all(dir.join("src/inner")).unwrap();
        fs::write(dir.join("src/inner/a.txt"), b"alpha").unwrap();
        fs::write(dir.join("notes.txt"), b"notes").unwrap();
        vec![dir.join("src"), dir.join("notes.txt")]
    }

    #[test]
    fn test_format_lookup() {
        assert_eq!(ArchiveFormat::from_mime("application/x-tar"), Some(ArchiveFormat::Tar));
        assert_eq!(ArchiveFormat::from_mime("application/x-gzip"), Some(ArchiveFormat::TarGz));
        assert_eq!(ArchiveFormat::from_mime("application/zip"), None);
        assert_eq!(ArchiveFormat::TarGz.extension(), "tar.gz");
    }

    #[test]
    fn test_create_and_extract_each_format() {
        for format in ArchiveFormat::ALL {
            let src = TempDir::new().unwrap();
            let entries = sample_tree(src.path());
            let archive = src.path().join(format!("bundle.{}", format.extension()));

            create_archive(format, &archive, &entries).unwrap();
            assert!(archive.is_file());

            let dest = TempDir::new().unwrap();
            let report = extract_archive(format, &archive, dest.path()).unwrap();

            assert_eq!(report.skipped, 0);
            assert_eq!(report.created.len(), 2);
            assert_eq!(fs::read(dest.path().join("src/inner/a.txt")).unwrap(), b"alpha");
            assert_eq!(fs::read(dest.path().join("notes.txt")).unwrap(), b"notes");
        }
    }

    #[test]
    fn test_create_never_replaces_existing() {
        let src = TempDir::new().unwrap();
        let entries = sample_tree(src.path());
        let archive = src.path().join("bundle.tar");
        fs::write(&archive, b"keep").unwrap();

        assert!(create_archive(ArchiveFormat::Tar, &archive, &entries).is_err());
        assert_eq!(fs::read(&archive).unwrap(), b"keep");
    }

    #[test]
    fn test_extract_keeps_existing_files() {
        let src = TempDir::new().unwrap();
        let entries = sample_tree(src.path());
        let archive = src.path().join("bundle.tar");
        create_archive(ArchiveFormat::Tar, &archive, &entries).unwrap();

        let dest = TempDir::new().unwrap();
        fs::write(dest.path().join("notes.txt"), b"mine").unwrap();

        let report = extract_archive(ArchiveFormat::Tar, &archive, dest.path()).unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, vec![dest.path().join("src")]);
        assert_eq!(fs::read(dest.path().join("notes.txt")).unwrap(), b"mine");
    }

    #[test]
    fn test_extract_skips_escaping_entries() {
        let src = TempDir::new().unwrap();
        let archive = src.path().join("evil.tar");
        {
            let file = File::create(&archive).unwrap();
            let mut builder = tar::Builder::new(file);

            let data = b"owned";
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            // set_path refuses "..", so write the raw name
            let name = b"../escaped.txt";
            header.as_old_mut().name[..name.len()].copy_from_slice(name);
            header.set_cksum();
            builder.append(&header, &data[..]).unwrap();

            let mut header = tar::Header::new_gnu();
            header.set_size(2);
            header.set_mode(0o644);
            header.set_path("ok.txt").unwrap();
            header.set_cksum();
            builder.append(&header, &b"ok"[..]).unwrap();
            builder.finish().unwrap();
        }

        let dest_parent = TempDir::new().unwrap();
        let dest = dest_parent.path().join("out");
        fs::create_dir(&dest).unwrap();

        let report = extract_archive(ArchiveFormat::Tar, &archive, &dest).unwrap();
        assert_eq!(report.skipped, 1);
        assert!(!dest_parent.path().join("escaped.txt").exists());
        assert_eq!(fs::read(dest.join("ok.txt")).unwrap(), b"ok");
    }

    #[test]
    fn test_safe_relative() {
        assert_eq!(safe_relative(Path::new("./a/b")), Some(PathBuf::from("a/b")));
        assert_eq!(safe_relative(Path::new("../a")), None);
        assert_eq!(safe_relative(Path::new("/etc/passwd")), None);
        assert_eq!(safe_relative(Path::new(".")), None);
    }
}
