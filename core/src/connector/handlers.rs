//! One handler per command

use super::assembler::{dedup_by_hash, UPLOAD_MAX_FILES};
use super::request::{ConnectorRequest, StagedUpload};
use super::response::{BatchOutcome, Envelope, FileDownload};
use super::Connector;
use crate::error::{ConnectorError, ConnectorResult};
use crate::vfs::{mime, Access, ArchiveFormat, ImageEdit, Usage};
use elfport_shared::api::{field, param, API_VERSION};
use elfport_shared::utils::common::size_shorthand;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use tracing::debug;

impl Connector {
    /// Open a directory; with `init` the session bootstrap data is added and
    /// an unusable target falls back to the root
    pub(super) fn open(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let init = request.flag(param::INIT);
        let root = self.volume.root().to_path_buf();

        let cwd = match request.get(param::TARGET).filter(|t| !t.is_empty()) {
            None => root.clone(),
            Some(hash) => match self.open_dir(hash) {
                Ok(dir) => dir,
                Err(e) if init => {
                    debug!("Falling back to root, target {} unusable: {}", hash, e);
                    root.clone()
                }
                Err(e) => return Err(e),
            },
        };

        let assembler = self.assembler();
        let cwd_info = assembler.entry(&cwd)?;
        let mut files = assembler.entries(&self.volume.list_dir(&cwd)?);
        if request.flag(param::TREE) {
            files.push(assembler.entry(&root)?);
            files.extend(assembler.entries(&self.volume.subdirs(&root)?));
        }

        let options = assembler.options(&cwd, &self.config, &self.registry);
        let mut envelope = Envelope::listing(cwd_info, dedup_by_hash(files)).insert(field::OPTIONS, options);
        if init {
            envelope = envelope
                .insert(field::API, API_VERSION)
                .insert(field::UPL_MAX_SIZE, size_shorthand(self.config.upload_max_size))
                .insert(field::UPL_MAX_FILE, UPLOAD_MAX_FILES)
                .insert(field::NET_DRIVERS, Value::Array(Vec::new()));
        }
        Ok(envelope)
    }

    fn open_dir(&self, hash: &str) -> ConnectorResult<PathBuf> {
        let dir = self.volume.decode(hash)?;
        self.volume.require_dir(&dir)?;
        self.volume.ensure(&dir, Access::Read)?;
        Ok(dir)
    }

    pub(super) fn tree(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        let subdirs = self.volume.subdirs(&dir)?;
        Ok(Envelope::tree(self.assembler().entries(&subdirs)))
    }

    /// Root plus the subdirectories of every ancestor of the target
    pub(super) fn parents(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        let assembler = self.assembler();

        let mut tree = vec![assembler.entry(self.volume.root())?];
        for ancestor in self.volume.ancestors(&dir) {
            tree.extend(assembler.entries(&self.volume.subdirs(&ancestor)?));
        }
        Ok(Envelope::tree(dedup_by_hash(tree)))
    }

    /// `{hash: name}` of the children, optionally narrowed to `intersect[]`
    pub(super) fn ls(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        self.volume.ensure(&dir, Access::Read)?;
        let intersect = request.list(param::INTERSECT);

        let mut list = Map::new();
        for child in self.volume.list_dir(&dir)? {
            let name = self.volume.name_of(&child);
            if !intersect.is_empty() && !intersect.contains(&name.as_str()) {
                continue;
            }
            list.insert(self.hash(&child)?, Value::from(name));
        }
        Ok(Envelope::new().insert(field::LIST, list))
    }

    /// Metadata of each resolvable target; unresolvable ones are left out
    pub(super) fn info(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let targets = request.required_list(param::TARGETS)?;
        let paths: Vec<PathBuf> = targets
            .into_iter()
            .filter_map(|hash| match self.volume.decode(hash) {
                Ok(path) => Some(path),
                Err(e) => {
                    debug!("Skipping {} in info: {}", hash, e);
                    None
                }
            })
            .collect();
        Ok(Envelope::files(self.assembler().entries(&paths)))
    }

    pub(super) fn file(&self, request: &ConnectorRequest) -> ConnectorResult<FileDownload> {
        let path = self.target(request, param::TARGET)?;
        self.volume.require_file(&path)?;
        self.volume.ensure(&path, Access::Read)?;

        let meta = std::fs::metadata(&path).map_err(|e| ConnectorError::io(e, &path))?;
        Ok(FileDownload {
            name: self.volume.name_of(&path),
            mime: mime::mime_for(&path),
            size: meta.len(),
            attachment: request.flag(param::DOWNLOAD),
            path,
        })
    }

    pub(super) fn get(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let path = self.target(request, param::TARGET)?;
        let content = self.volume.read_content(&path)?;
        Ok(Envelope::new().insert(field::CONTENT, content))
    }

    pub(super) fn put(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let path = self.target(request, param::TARGET)?;
        // empty content is a valid way to truncate a file
        let content = request
            .get(param::CONTENT)
            .ok_or_else(|| ConnectorError::MissingParameter(param::CONTENT.to_string()))?;
        self.volume.write_content(&path, content)?;
        Ok(Envelope::changed(vec![self.assembler().entry(&path)?]))
    }

    /// `name` creates one directory, `dirs[]` creates nested paths and
    /// reports their identifiers under `hashes`
    pub(super) fn mkdir(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        let name = request.get(param::NAME).filter(|n| !n.is_empty());
        let dirs: Vec<&str> = request
            .list(param::DIRS)
            .into_iter()
            .filter(|d| !d.is_empty())
            .collect();
        if name.is_none() && dirs.is_empty() {
            return Err(ConnectorError::MissingParameter(param::NAME.to_string()));
        }

        let mut added = Vec::new();
        if let Some(name) = name {
            added.push(self.volume.make_dir(&dir, name)?);
        }

        let mut hashes = Map::new();
        for rel in dirs {
            let (leaf, created) = self.volume.make_dirs(&dir, rel)?;
            added.extend(created);
            hashes.insert(rel.to_string(), Value::from(self.hash(&leaf)?));
        }

        let envelope = Envelope::added(self.assembler().entries(&added));
        if hashes.is_empty() {
            Ok(envelope)
        } else {
            Ok(envelope.insert(field::HASHES, hashes))
        }
    }

    pub(super) fn mkfile(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        let path = self.volume.make_file(&dir, request.required(param::NAME)?)?;
        Ok(Envelope::added(vec![self.assembler().entry(&path)?]))
    }

    pub(super) fn rename(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let hash = request.required(param::TARGET)?;
        let path = self.volume.decode(hash)?;
        let renamed = self.volume.rename_entry(&path, request.required(param::NAME)?)?;
        Ok(Envelope::added(vec![self.assembler().entry(&renamed)?]).with_removed(vec![hash.to_string()]))
    }

    /// Remove each target independently; `removed` lists what is gone
    pub(super) fn rm(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let mut outcome = BatchOutcome::new();
        for hash in request.required_list(param::TARGETS)? {
            let result = self
                .volume
                .decode(hash)
                .and_then(|path| self.volume.remove_entry(&path))
                .map(|()| hash.to_string());
            outcome.record(hash, result);
        }
        Ok(Envelope::new()
            .with_removed(outcome.succeeded)
            .with_failures(outcome.failed))
    }

    pub(super) fn paste(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dst_dir = self.target_dir(request, param::DST)?;
        let targets = request.required_list(param::TARGETS)?;
        let cut = request.flag(param::CUT);
        let overwrite = request
            .optional_flag(param::OVERWRITE)
            .unwrap_or(self.config.copy_overwrite);

        let mut outcome = BatchOutcome::new();
        let mut removed = Vec::new();
        for hash in targets {
            let result = self.volume.decode(hash).and_then(|src| {
                let pasted = self.volume.paste_entry(&src, &dst_dir, cut, overwrite)?;
                if pasted.replaced {
                    removed.push(self.hash(&pasted.dst)?);
                }
                if pasted.moved {
                    removed.push(hash.to_string());
                }
                Ok(pasted.dst)
            });
            outcome.record(hash, result);
        }

        let added = dedup_by_hash(self.assembler().entries(&outcome.succeeded));
        Ok(Envelope::added(added)
            .with_removed(removed)
            .with_failures(outcome.failed))
    }

    /// Accepts `targets[]`, or a single `target` as older clients send
    pub(super) fn duplicate(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let targets = match request.required_list(param::TARGETS) {
            Ok(targets) => targets,
            Err(_) => vec![request.required(param::TARGET)?],
        };

        let mut outcome = BatchOutcome::new();
        for hash in targets {
            let result = self
                .volume
                .decode(hash)
                .and_then(|path| self.volume.duplicate_entry(&path));
            outcome.record(hash, result);
        }
        Ok(Envelope::added(self.assembler().entries(&outcome.succeeded)).with_failures(outcome.failed))
    }

    /// Store each staged upload; `upload_path[i]` may redirect the i-th
    /// payload to another directory
    pub(super) fn upload(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        let uploads = request.uploads();
        if uploads.is_empty() {
            return Err(ConnectorError::MissingParameter(param::UPLOAD.to_string()));
        }
        let upload_paths = request.list(param::UPLOAD_PATH);
        let overwrite = request
            .optional_flag(param::OVERWRITE)
            .unwrap_or(self.config.upload_overwrite);

        let mut outcome = BatchOutcome::new();
        for (i, upload) in uploads.iter().enumerate() {
            let name = client_file_name(upload.file_name());
            let result = match upload_paths.get(i).filter(|h| !h.is_empty()) {
                Some(hash) => self.volume.decode(hash),
                None => Ok(dir.clone()),
            }
            .and_then(|target| self.store_upload(upload, &target, name, overwrite));
            outcome.record(name, result);
        }

        Ok(Envelope::added(self.assembler().entries(&outcome.succeeded)).with_failures(outcome.failed))
    }

    fn store_upload(
        &self,
        upload: &StagedUpload,
        dir: &Path,
        name: &str,
        overwrite: bool,
    ) -> ConnectorResult<PathBuf> {
        let limit = self.config.upload_max_size;
        if upload.exceeded() || upload.size() > limit {
            return Err(ConnectorError::PayloadTooLarge {
                name: name.to_string(),
                limit,
            });
        }
        if !self.config.upload_allowed(&mime::mime_for(Path::new(name))) {
            return Err(ConnectorError::UploadNotAllowed(name.to_string()));
        }
        let mut source = upload.open().map_err(|e| ConnectorError::io(e, dir))?;
        let (path, _replaced) = self.volume.write_upload(dir, name, &mut source, overwrite)?;
        Ok(path)
    }

    pub(super) fn search(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let query = request.required(param::Q)?;
        let dir = match request.get(param::TARGET).filter(|t| !t.is_empty()) {
            Some(hash) => self.volume.decode(hash)?,
            None => self.volume.root().to_path_buf(),
        };
        let mimes: Vec<String> = request
            .list(param::MIMES)
            .into_iter()
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();

        let found = self.volume.search(&dir, query, &mimes)?;
        Ok(Envelope::files(self.assembler().entries(&found)))
    }

    /// Total size and counts over all targets, plus a per-target breakdown
    pub(super) fn size(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let mut total = Usage::default();
        let mut sizes = Map::new();
        for hash in request.required_list(param::TARGETS)? {
            let usage = match self
                .volume
                .decode(hash)
                .and_then(|path| self.volume.disk_usage(&path))
            {
                Ok(usage) => usage,
                Err(e) => {
                    debug!("Skipping {} in size: {}", hash, e);
                    continue;
                }
            };
            sizes.insert(
                hash.to_string(),
                json!({
                    "size": usage.size,
                    "fileCnt": usage.files,
                    "dirCnt": usage.dirs,
                }),
            );
            total += usage;
        }

        Ok(Envelope::new()
            .insert(field::SIZE, total.size)
            .insert(field::FILE_CNT, total.files)
            .insert(field::DIR_CNT, total.dirs)
            .insert(field::SIZES, sizes))
    }

    pub(super) fn archive(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let dir = self.target_dir(request, param::TARGET)?;
        let mime_type = request.required(param::TYPE)?;
        let format = ArchiveFormat::from_mime(mime_type)
            .ok_or_else(|| ConnectorError::UnsupportedFormat(mime_type.to_string()))?;
        let targets = request
            .required_list(param::TARGETS)?
            .into_iter()
            .map(|hash| self.volume.decode(hash))
            .collect::<ConnectorResult<Vec<_>>>()?;
        let name = request.get(param::NAME).filter(|n| !n.is_empty());

        let archive = self.volume.make_archive(&dir, &targets, format, name)?;
        Ok(Envelope::added(vec![self.assembler().entry(&archive)?]))
    }

    pub(super) fn extract(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let archive = self.target(request, param::TARGET)?;
        let created = self
            .volume
            .unpack_archive(&archive, request.flag(param::MAKEDIR))?;
        Ok(Envelope::added(self.assembler().entries(&created)))
    }

    /// `mode` is `resize` (default), `crop` or `rotate`
    pub(super) fn resize(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let path = self.target(request, param::TARGET)?;
        let edit = match request.get(param::MODE).unwrap_or("resize") {
            "" | "resize" => ImageEdit::Resize {
                width: request.required_number(param::WIDTH)?,
                height: request.required_number(param::HEIGHT)?,
            },
            "crop" => ImageEdit::Crop {
                x: request.number(param::X)?.unwrap_or(0),
                y: request.number(param::Y)?.unwrap_or(0),
                width: request.required_number(param::WIDTH)?,
                height: request.required_number(param::HEIGHT)?,
            },
            "rotate" => ImageEdit::rotate(request.required_number(param::DEGREE)?)?,
            other => return Err(ConnectorError::MissingParameter(format!("{}={}", param::MODE, other))),
        };

        self.volume.edit_image(&path, edit)?;
        Ok(Envelope::changed(vec![self.assembler().entry(&path)?]))
    }

    pub(super) fn dim(&self, request: &ConnectorRequest) -> ConnectorResult<Envelope> {
        let path = self.target(request, param::TARGET)?;
        let (width, height) = self.volume.image_dimensions(&path)?;
        Ok(Envelope::new().insert(field::DIM, format!("{}x{}", width, height)))
    }
}

/// Strip any directory part a browser may send with the file name
fn client_file_name(raw: &str) -> &str {
    raw.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_file_name() {
        assert_eq!(client_file_name("a.txt"), "a.txt");
        assert_eq!(client_file_name("C:\\fakepath\\photo.jpg"), "photo.jpg");
        assert_eq!(client_file_name("dir/sub/b.bin"), "b.bin");
        assert_eq!(client_file_name(""), "");
    }
}
