//! Error types for the connector

use serde::Serialize;
use std::fmt;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Machine-readable error kind, stable across releases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidTarget,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    IsADirectory,
    NotADirectory,
    PayloadTooLarge,
    UnknownCommand,
    MissingParameter,
    InvalidName,
    CopyIntoItself,
    UnsupportedFormat,
    Io,
    Internal,
}

impl ErrorKind {
    /// Message key understood by the elFinder client
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTarget => "errTrgFolderNotFound",
            ErrorKind::NotFound => "errFileNotFound",
            ErrorKind::AlreadyExists => "errExists",
            ErrorKind::PermissionDenied => "errPerm",
            ErrorKind::IsADirectory => "errNotFile",
            ErrorKind::NotADirectory => "errNotFolder",
            ErrorKind::PayloadTooLarge => "errUploadFileSize",
            ErrorKind::UnknownCommand => "errUnknownCmd",
            ErrorKind::MissingParameter => "errCmdParams",
            ErrorKind::InvalidName => "errInvName",
            ErrorKind::CopyIntoItself => "errCopyInItself",
            ErrorKind::UnsupportedFormat => "errArcType",
            ErrorKind::Io | ErrorKind::Internal => "errUnknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Connector error types
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("File or folder with the same name already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not a file: {0}")]
    IsADirectory(String),

    #[error("Not a folder: {0}")]
    NotADirectory(String),

    #[error("File {name} exceeds the maximum allowed size of {limit} bytes")]
    PayloadTooLarge { name: String, limit: u64 },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid parameters: {0}")]
    MissingParameter(String),

    #[error("Invalid name: {0}")]
    InvalidName(String),

    #[error("Unable to copy {0} into itself")]
    CopyIntoItself(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Unable to edit image: {0}")]
    UnsupportedImage(String),

    #[error("File type not allowed for upload: {0}")]
    UploadNotAllowed(String),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience type alias for Results
pub type ConnectorResult<T> = std::result::Result<T, ConnectorError>;

impl ConnectorError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectorError::InvalidTarget(_) => ErrorKind::InvalidTarget,
            ConnectorError::NotFound(_) => ErrorKind::NotFound,
            ConnectorError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            ConnectorError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            ConnectorError::IsADirectory(_) => ErrorKind::IsADirectory,
            ConnectorError::NotADirectory(_) => ErrorKind::NotADirectory,
            ConnectorError::PayloadTooLarge { .. } => ErrorKind::PayloadTooLarge,
            ConnectorError::UnknownCommand(_) => ErrorKind::UnknownCommand,
            ConnectorError::MissingParameter(_) => ErrorKind::MissingParameter,
            ConnectorError::InvalidName(_) => ErrorKind::InvalidName,
            ConnectorError::CopyIntoItself(_) => ErrorKind::CopyIntoItself,
            ConnectorError::UnsupportedFormat(_) | ConnectorError::UnsupportedImage(_) => {
                ErrorKind::UnsupportedFormat
            }
            ConnectorError::UploadNotAllowed(_) => ErrorKind::PermissionDenied,
            ConnectorError::Io { .. } => ErrorKind::Io,
            ConnectorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Message key sent to the client; a few errors use a more specific key than their kind
    pub fn code(&self) -> &'static str {
        match self {
            ConnectorError::UnsupportedImage(_) => "errResize",
            ConnectorError::UploadNotAllowed(_) => "errUploadMime",
            err => err.kind().code(),
        }
    }

    /// The argument shown next to the message key, usually an entry name
    pub fn subject(&self) -> &str {
        match self {
            ConnectorError::InvalidTarget(s)
            | ConnectorError::NotFound(s)
            | ConnectorError::AlreadyExists(s)
            | ConnectorError::PermissionDenied(s)
            | ConnectorError::IsADirectory(s)
            | ConnectorError::NotADirectory(s)
            | ConnectorError::UnknownCommand(s)
            | ConnectorError::MissingParameter(s)
            | ConnectorError::InvalidName(s)
            | ConnectorError::CopyIntoItself(s)
            | ConnectorError::UnsupportedFormat(s)
            | ConnectorError::UnsupportedImage(s)
            | ConnectorError::UploadNotAllowed(s)
            | ConnectorError::Internal(s) => s,
            ConnectorError::PayloadTooLarge { name, .. } => name,
            ConnectorError::Io { path, .. } => path,
        }
    }

    /// Map an I/O failure on `path` onto the connector taxonomy.
    ///
    /// Only the entry name is kept so real paths never reach the client.
    pub fn io(err: io::Error, path: &Path) -> Self {
        let name = display_name(path);

        #[cfg(unix)]
        {
            match err.raw_os_error() {
                Some(libc::EISDIR) => return ConnectorError::IsADirectory(name),
                Some(libc::ENOTDIR) => return ConnectorError::NotADirectory(name),
                Some(libc::ENOTEMPTY) | Some(libc::EEXIST) => {
                    return ConnectorError::AlreadyExists(name)
                }
                Some(libc::EROFS) | Some(libc::EACCES) | Some(libc::EPERM) => {
                    return ConnectorError::PermissionDenied(name)
                }
                _ => {}
            }
        }

        match err.kind() {
            io::ErrorKind::NotFound => ConnectorError::NotFound(name),
            io::ErrorKind::AlreadyExists => ConnectorError::AlreadyExists(name),
            io::ErrorKind::PermissionDenied => ConnectorError::PermissionDenied(name),
            _ => ConnectorError::Io {
                path: name,
                source: err,
            },
        }
    }
}

/// Last path component, or "/" for paths without one
pub fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "/".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_io_mapping_keeps_only_the_name() {
        let path = PathBuf::from("/srv/files/private/report.txt");

        let err = ConnectorError::io(io::Error::from(io::ErrorKind::NotFound), &path);
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.subject(), "report.txt");
        assert!(!err.to_string().contains("/srv"));

        let err = ConnectorError::io(io::Error::from(io::ErrorKind::AlreadyExists), &path);
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = ConnectorError::io(io::Error::from(io::ErrorKind::PermissionDenied), &path);
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = ConnectorError::io(io::Error::new(io::ErrorKind::Other, "disk on fire"), &path);
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[cfg(unix)]
    #[test]
    fn test_io_mapping_of_raw_os_errors() {
        let path = PathBuf::from("dir");
        let err = ConnectorError::io(io::Error::from_raw_os_error(libc::EISDIR), &path);
        assert_eq!(err.kind(), ErrorKind::IsADirectory);

        let err = ConnectorError::io(io::Error::from_raw_os_error(libc::ENOTDIR), &path);
        assert_eq!(err.kind(), ErrorKind::NotADirectory);

        let err = ConnectorError::io(io::Error::from_raw_os_error(libc::ENOTEMPTY), &path);
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorKind::AlreadyExists.code(), "errExists");
        assert_eq!(ErrorKind::UnknownCommand.code(), "errUnknownCmd");
        assert_eq!(ErrorKind::MissingParameter.code(), "errCmdParams");
        assert_eq!(ErrorKind::PayloadTooLarge.code(), "errUploadFileSize");

        let err = ConnectorError::UnsupportedImage("a.png".to_string());
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormat);
        assert_eq!(err.code(), "errResize");
        assert_eq!(ConnectorError::UnsupportedFormat("a.rar".to_string()).code(), "errArcType");

        let err = ConnectorError::UploadNotAllowed("a.exe".to_string());
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
        assert_eq!(err.code(), "errUploadMime");
    }

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Path::new("/a/b.txt")), "b.txt");
        assert_eq!(display_name(Path::new("/")), "/");
    }
}
