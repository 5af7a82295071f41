//! multipart/form-data decoding
//!
//! File parts named `upload[]` are streamed chunk by chunk into temporary
//! files in the staging directory. Writing stops once a part grows past the
//! upload limit; the rest of the part is drained so later fields can still be
//! read, and the upload is marked as exceeded.

use crate::connector::{ConnectorRequest, StagedUpload};
use crate::error::{ConnectorError, ConnectorResult};
use elfport_shared::api::param;
use hyper::Body;
use multer::{Field, Multipart};
use std::path::Path;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Read every part of a multipart body into `request`
pub async fn read_multipart(
    body: Body,
    boundary: String,
    limit: u64,
    staging: &Path,
    request: &mut ConnectorRequest,
) -> ConnectorResult<()> {
    let mut multipart = Multipart::new(body, boundary);

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match field.file_name().map(str::to_string) {
            Some(file_name) if name == param::UPLOAD => {
                let upload = stage_upload(field, file_name, limit, staging).await?;
                debug!(
                    "Staged upload {} ({} bytes{})",
                    upload.file_name(),
                    upload.size(),
                    if upload.exceeded() { ", over limit" } else { "" }
                );
                request.push_upload(upload);
            }
            _ => {
                let value = read_text(field, &name, limit).await?;
                request.push(name, value);
            }
        }
    }

    Ok(())
}

async fn stage_upload(
    mut field: Field<'_>,
    file_name: String,
    limit: u64,
    staging: &Path,
) -> ConnectorResult<StagedUpload> {
    let tmp = NamedTempFile::new_in(staging).map_err(|e| ConnectorError::io(e, staging))?;
    let handle = tmp
        .as_file()
        .try_clone()
        .map_err(|e| ConnectorError::io(e, tmp.path()))?;
    let mut writer = tokio::fs::File::from_std(handle);

    let mut size: u64 = 0;
    let mut exceeded = false;
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        size += chunk.len() as u64;
        if exceeded {
            continue;
        }
        if size > limit {
            exceeded = true;
            continue;
        }
        writer
            .write_all(&chunk)
            .await
            .map_err(|e| ConnectorError::io(e, tmp.path()))?;
    }
    writer
        .flush()
        .await
        .map_err(|e| ConnectorError::io(e, tmp.path()))?;

    Ok(StagedUpload::new(file_name, tmp, size, exceeded))
}

/// Plain form fields share the upload limit
async fn read_text(mut field: Field<'_>, name: &str, limit: u64) -> ConnectorResult<String> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(malformed)? {
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(ConnectorError::PayloadTooLarge {
                name: name.to_string(),
                limit,
            });
        }
        buf.extend_from_slice(&chunk);
    }
    String::from_utf8(buf).map_err(|_| ConnectorError::MissingParameter(name.to_string()))
}

fn malformed(err: multer::Error) -> ConnectorError {
    ConnectorError::MissingParameter(format!("multipart body: {}", err))
}
