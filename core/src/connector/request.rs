//! Decoded connector requests

use crate::error::{ConnectorError, ConnectorResult};
use elfport_shared::api::{is_truthy, param};
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use tempfile::NamedTempFile;

/// An uploaded payload already staged on local disk by the transport
#[derive(Debug)]
pub struct StagedUpload {
    file_name: String,
    file: NamedTempFile,
    size: u64,
    /// The payload was larger than the limit and was truncated while staging
    exceeded: bool,
}

impl StagedUpload {
    pub fn new(file_name: String, file: NamedTempFile, size: u64, exceeded: bool) -> Self {
        Self {
            file_name,
            file,
            size,
            exceeded,
        }
    }

    /// Stage an in-memory payload, stopping after `limit` bytes
    pub fn from_bytes(file_name: &str, bytes: &[u8], limit: u64, dir: &Path) -> io::Result<Self> {
        let mut file = NamedTempFile::new_in(dir)?;
        let exceeded = bytes.len() as u64 > limit;
        let kept = if exceeded {
            &bytes[..limit as usize]
        } else {
            bytes
        };
        file.write_all(kept)?;
        file.flush()?;

        Ok(Self::new(
            file_name.to_string(),
            file,
            bytes.len() as u64,
            exceeded,
        ))
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Total payload size as received, including any truncated part
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn exceeded(&self) -> bool {
        self.exceeded
    }

    /// A fresh read handle positioned at the start of the staged bytes
    pub fn open(&self) -> io::Result<File> {
        self.file.reopen()
    }
}

/// Connector request: an ordered multimap of string parameters plus uploads
#[derive(Debug, Default)]
pub struct ConnectorRequest {
    params: Vec<(String, String)>,
    uploads: Vec<StagedUpload>,
}

impl ConnectorRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            params: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            uploads: Vec::new(),
        }
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push_upload(&mut self, upload: StagedUpload) {
        self.uploads.push(upload);
    }

    pub fn with_upload(mut self, upload: StagedUpload) -> Self {
        self.push_upload(upload);
        self
    }

    pub fn command(&self) -> Option<&str> {
        self.get(param::CMD)
    }

    /// First value of a parameter
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// First non-empty value of a parameter, or `MissingParameter`
    pub fn required(&self, name: &str) -> ConnectorResult<&str> {
        match self.get(name) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(ConnectorError::MissingParameter(name.to_string())),
        }
    }

    /// All values of a list parameter, in request order
    pub fn list(&self, name: &str) -> Vec<&str> {
        self.params
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    /// All non-empty values of a list parameter; at least one is required
    pub fn required_list(&self, name: &str) -> ConnectorResult<Vec<&str>> {
        let values: Vec<&str> = self
            .list(name)
            .into_iter()
            .filter(|v| !v.is_empty())
            .collect();
        if values.is_empty() {
            return Err(ConnectorError::MissingParameter(name.to_string()));
        }
        Ok(values)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.optional_flag(name).unwrap_or(false)
    }

    pub fn optional_flag(&self, name: &str) -> Option<bool> {
        self.get(name).map(is_truthy)
    }

    /// Parse an optional numeric parameter; a present but malformed value is an error
    pub fn number<T: FromStr>(&self, name: &str) -> ConnectorResult<Option<T>> {
        match self.get(name) {
            None | Some("") => Ok(None),
            Some(value) => value
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| ConnectorError::MissingParameter(name.to_string())),
        }
    }

    pub fn required_number<T: FromStr>(&self, name: &str) -> ConnectorResult<T> {
        self.number(name)?
            .ok_or_else(|| ConnectorError::MissingParameter(name.to_string()))
    }

    pub fn uploads(&self) -> &[StagedUpload] {
        &self.uploads
    }
}
