//! HTTP transport for the connector
//!
//! A single endpoint accepts GET and POST. Query parameters are merged with
//! urlencoded or multipart body parameters, the decoded request is run on a
//! blocking worker and the reply is rendered as JSON or as a file stream.

use crate::connector::{Connector, ConnectorRequest, ErrorEnvelope, FileDownload, Reply};
use crate::error::{ConnectorError, ConnectorResult, ErrorKind};
use anyhow::{Context, Result};
use elfport_shared::ConnectorConfig;
use hyper::header::{self, HeaderValue};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::Value;
use std::convert::Infallible;
use std::future::Future;
use std::net::TcpListener;
use std::sync::Arc;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info, warn};

pub mod multipart;

#[cfg(test)]
mod tests;

/// HTTP server hosting one connector
pub struct ConnectorServer {
    connector: Arc<Connector>,
}

impl ConnectorServer {
    pub fn new(config: ConnectorConfig) -> Result<Self> {
        config.validate()?;
        let connector = Connector::new(config).context("Failed to open the connector root")?;
        Ok(Self {
            connector: Arc::new(connector),
        })
    }

    pub fn connector(&self) -> &Connector {
        &self.connector
    }

    /// Bind the configured address. Port 0 picks a free port.
    pub fn bind(&self) -> Result<TcpListener> {
        let address = self.connector.config().bind_address();
        let listener =
            TcpListener::bind(&address).with_context(|| format!("Failed to bind {}", address))?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    /// Serve requests until `shutdown` resolves, then drain open connections
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let addr = listener.local_addr()?;
        let connector = self.connector;

        let make_svc = make_service_fn(move |_conn| {
            let connector = connector.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| handle(connector.clone(), req)))
            }
        });

        info!("Serving connector on http://{}", addr);
        Server::from_tcp(listener)?
            .serve(make_svc)
            .with_graceful_shutdown(shutdown)
            .await
            .context("HTTP server failed")?;
        info!("Server stopped");
        Ok(())
    }
}

async fn handle(connector: Arc<Connector>, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let config = connector.config();

    if req.uri().path() != config.connector_path {
        debug!("No route for {}", req.uri().path());
        let err = ConnectorError::UnknownCommand(req.uri().path().to_string());
        return Ok(json_response(StatusCode::NOT_FOUND, &error_body(&err)));
    }
    if req.method() != Method::GET && req.method() != Method::POST {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, POST"));
        return Ok(response);
    }

    let request = match decode_request(config, req).await {
        Ok(request) => request,
        Err(err) => {
            warn!("Rejected undecodable request: {}", err);
            return Ok(json_response(StatusCode::BAD_REQUEST, &error_body(&err)));
        }
    };

    let is_file = request.command() == Some("file");
    let worker = connector.clone();
    let reply = match tokio::task::spawn_blocking(move || worker.run(&request)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!("Command worker failed: {}", e);
            Reply::Error(ConnectorError::Internal(e.to_string()))
        }
    };

    Ok(render(reply, is_file).await)
}

/// Merge query and body parameters into one request, query first
async fn decode_request(config: &ConnectorConfig, req: Request<Body>) -> ConnectorResult<ConnectorRequest> {
    let mut request = ConnectorRequest::new();
    if let Some(query) = req.uri().query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            request.push(name, value);
        }
    }
    if req.method() != Method::POST {
        return Ok(request);
    }

    let content_type = req
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let limit = config.upload_max_size;

    if content_type.starts_with("multipart/form-data") {
        let boundary = multer::parse_boundary(&content_type)
            .map_err(|e| ConnectorError::MissingParameter(format!("multipart boundary: {}", e)))?;
        let staging = config.staging_dir();
        multipart::read_multipart(req.into_body(), boundary, limit, &staging, &mut request).await?;
        return Ok(request);
    }

    let declared = req
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    if declared.map_or(false, |length| length > limit) {
        return Err(ConnectorError::PayloadTooLarge {
            name: "request body".to_string(),
            limit,
        });
    }

    let body = hyper::body::to_bytes(req.into_body())
        .await
        .map_err(|e| ConnectorError::Internal(format!("Failed to read request body: {}", e)))?;
    if body.len() as u64 > limit {
        return Err(ConnectorError::PayloadTooLarge {
            name: "request body".to_string(),
            limit,
        });
    }
    for (name, value) in url::form_urlencoded::parse(&body) {
        request.push(name, value);
    }
    Ok(request)
}

async fn render(reply: Reply, is_file: bool) -> Response<Body> {
    match reply {
        Reply::File(download) => stream_file(download).await,
        Reply::Error(err) if is_file => json_response(file_error_status(&err), &error_body(&err)),
        Reply::Error(err) => json_response(StatusCode::OK, &error_body(&err)),
        Reply::Json(envelope) => match serde_json::to_value(&envelope) {
            Ok(body) => json_response(StatusCode::OK, &body),
            Err(e) => {
                error!("Failed to serialize reply: {}", e);
                let err = ConnectorError::Internal(e.to_string());
                json_response(StatusCode::INTERNAL_SERVER_ERROR, &error_body(&err))
            }
        },
    }
}

async fn stream_file(download: FileDownload) -> Response<Body> {
    let file = match tokio::fs::File::open(&download.path).await {
        Ok(file) => file,
        Err(e) => {
            let err = ConnectorError::io(e, &download.path);
            return json_response(file_error_status(&err), &error_body(&err));
        }
    };

    let mut response = Response::new(Body::wrap_stream(ReaderStream::new(file)));
    let headers = response.headers_mut();
    let mime = HeaderValue::from_str(&download.mime)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    headers.insert(header::CONTENT_TYPE, mime);
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(download.size));
    let disposition = content_disposition(&download.name, download.attachment);
    let disposition = HeaderValue::from_str(&disposition)
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));
    headers.insert(header::CONTENT_DISPOSITION, disposition);
    response
}

/// The browser reads `file` responses directly, so failures need real statuses
fn file_error_status(err: &ConnectorError) -> StatusCode {
    match err.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidTarget => StatusCode::NOT_FOUND,
        ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
        _ => StatusCode::BAD_REQUEST,
    }
}

/// `inline` or `attachment` with an ASCII fallback and an RFC 5987 `filename*`
fn content_disposition(name: &str, attachment: bool) -> String {
    let kind = if attachment { "attachment" } else { "inline" };
    let fallback: String = name
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        fallback,
        encode_rfc5987(name)
    )
}

fn encode_rfc5987(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

fn error_body(err: &ConnectorError) -> Value {
    serde_json::to_value(ErrorEnvelope::from(err)).unwrap_or(Value::Null)
}

fn json_response(status: StatusCode, body: &Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    response
}

fn text_response(status: StatusCode, text: &'static str) -> Response<Body> {
    let mut response = Response::new(Body::from(text));
    *response.status_mut() = status;
    response
}
