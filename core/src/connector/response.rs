//! Response envelopes

use crate::error::{ConnectorError, ErrorKind};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::PathBuf;

fn flag<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

/// Metadata of one file or directory as the client sees it
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileInfo {
    pub name: String,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phash: Option<String>,
    pub mime: String,
    pub ts: i64,
    pub size: u64,
    #[serde(serialize_with = "flag")]
    pub read: bool,
    #[serde(serialize_with = "flag")]
    pub write: bool,
    #[serde(serialize_with = "flag")]
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dirs: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volumeid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub isroot: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl FileInfo {
    pub fn is_dir(&self) -> bool {
        self.mime == elfport_shared::api::MIME_DIRECTORY
    }
}

/// One failed item of a batch command
#[derive(Debug, Clone, Serialize)]
pub struct FailedItem {
    /// Identifier or upload name the failure refers to
    pub hash: String,
    pub kind: ErrorKind,
    pub error: Vec<String>,
    pub message: String,
}

impl FailedItem {
    pub fn new(hash: impl Into<String>, err: &ConnectorError) -> Self {
        Self {
            hash: hash.into(),
            kind: err.kind(),
            error: error_array(err),
            message: err.to_string(),
        }
    }
}

/// Per-item results of a batch command; committed items are never rolled back
#[derive(Debug)]
pub struct BatchOutcome<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<FailedItem>,
}

impl<T> BatchOutcome<T> {
    pub fn new() -> Self {
        Self {
            succeeded: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn record(&mut self, key: &str, result: Result<T, ConnectorError>) {
        match result {
            Ok(value) => self.succeeded.push(value),
            Err(err) => self.failed.push(FailedItem::new(key, &err)),
        }
    }
}

impl<T> Default for BatchOutcome<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Success envelope. Only populated fields are serialized.
#[derive(Debug, Default, Serialize)]
pub struct Envelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwd: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub added: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changed: Option<Vec<FileInfo>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<Vec<FailedItem>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listing(cwd: FileInfo, files: Vec<FileInfo>) -> Self {
        Self {
            cwd: Some(cwd),
            files: Some(files),
            ..Default::default()
        }
    }

    pub fn files(files: Vec<FileInfo>) -> Self {
        Self {
            files: Some(files),
            ..Default::default()
        }
    }

    pub fn tree(tree: Vec<FileInfo>) -> Self {
        Self {
            tree: Some(tree),
            ..Default::default()
        }
    }

    pub fn added(added: Vec<FileInfo>) -> Self {
        Self {
            added: Some(added),
            ..Default::default()
        }
    }

    pub fn changed(changed: Vec<FileInfo>) -> Self {
        Self {
            changed: Some(changed),
            ..Default::default()
        }
    }

    pub fn with_removed(mut self, removed: Vec<String>) -> Self {
        self.removed = Some(removed);
        self
    }

    pub fn insert(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(key.to_string(), value.into());
        self
    }

    /// Attach batch failures: `failed` for machines, `warning` for the client UI
    pub fn with_failures(mut self, failed: Vec<FailedItem>) -> Self {
        if failed.is_empty() {
            return self;
        }
        self.warning = Some(failed.iter().flat_map(|f| f.error.clone()).collect());
        self.failed = Some(failed);
        self
    }
}

/// Error envelope; presence of `error` means the command produced nothing
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: Vec<String>,
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ConnectorError> for ErrorEnvelope {
    fn from(err: &ConnectorError) -> Self {
        Self {
            error: error_array(err),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// `[key, argument]` as the client expects in `error`
pub fn error_array(err: &ConnectorError) -> Vec<String> {
    let mut array = vec![err.code().to_string()];
    if !err.subject().is_empty() {
        array.push(err.subject().to_string());
    }
    array
}

/// A file to be streamed back to the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileDownload {
    pub path: PathBuf,
    pub name: String,
    pub mime: String,
    pub size: u64,
    /// `Content-Disposition: attachment` rather than inline
    pub attachment: bool,
}

/// Result of dispatching one command
#[derive(Debug)]
pub enum Reply {
    Json(Envelope),
    Error(ConnectorError),
    File(FileDownload),
}

impl From<Envelope> for Reply {
    fn from(envelope: Envelope) -> Self {
        Reply::Json(envelope)
    }
}

impl From<ConnectorError> for Reply {
    fn from(err: ConnectorError) -> Self {
        Reply::Error(err)
    }
}
