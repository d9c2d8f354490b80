use std::{fmt, io};

use camino::Utf8PathBuf;
use thiserror::Error;

/// The broad category of a VFS failure.
///
/// Every [`Error`] maps onto exactly one kind, and wrapping an error with
/// path context never changes it, so callers can branch on the kind no
/// matter how many layers of context were added on the way out.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    PermissionDenied,
    InvalidArgument,
    NotSupported,
    BackendSpecific,
}

impl ErrorKind {
    /// A stable identifier, used as a metrics label.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotSupported => "not_supported",
            ErrorKind::BackendSpecific => "backend_specific",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotFound => "not found",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::InvalidArgument => "invalid argument",
            ErrorKind::NotSupported => "operation not supported",
            ErrorKind::BackendSpecific => "backend error",
        };

        f.write_str(name)
    }
}

#[derive(Error, Debug, thiserror_ext::ContextInto)]
#[non_exhaustive]
pub enum Error {
    #[error("no such file or directory: {0}")]
    NotFound(Utf8PathBuf),
    #[error("no backend mounted for path {0}")]
    NoMount(Utf8PathBuf),
    #[error("unknown backend `{0}`")]
    UnknownBackend(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("backend `{0}` is read-only")]
    ReadOnly(String),
    #[error("not a directory: {0}")]
    NotADirectory(Utf8PathBuf),
    #[error("is a directory: {0}")]
    IsADirectory(Utf8PathBuf),
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(Utf8PathBuf),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation not supported: {0}")]
    NotSupported(String),
    #[error("content hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("I/O error: {from}")]
    IoError { source: io::Error, from: String },
    #[error("HTTP error: {from}")]
    HttpError { source: reqwest::Error, from: String },
    #[error("serialization error: {from}")]
    JsonError {
        source: serde_json::Error,
        from: String,
    },
    #[error("{op} {path}")]
    Context {
        source: Box<Error>,
        op: &'static str,
        path: String,
    },
}

impl Error {
    /// Classify this error, looking through any added context.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) | Error::NoMount(_) | Error::UnknownBackend(_) => {
                ErrorKind::NotFound
            }
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::ReadOnly(_) => ErrorKind::PermissionDenied,
            Error::NotADirectory(_) | Error::NotSupported(_) => ErrorKind::NotSupported,
            Error::IsADirectory(_) | Error::DirectoryNotEmpty(_) | Error::InvalidArgument(_) => {
                ErrorKind::InvalidArgument
            }
            Error::HashMismatch { .. } | Error::JsonError { .. } => ErrorKind::BackendSpecific,
            Error::IoError { source, .. } => io_kind(source.kind()),
            Error::HttpError { source, .. } => match source.status() {
                Some(reqwest::StatusCode::NOT_FOUND) => ErrorKind::NotFound,
                Some(reqwest::StatusCode::FORBIDDEN | reqwest::StatusCode::UNAUTHORIZED) => {
                    ErrorKind::PermissionDenied
                }
                _ => ErrorKind::BackendSpecific,
            },
            Error::Context { source, .. } => source.kind(),
        }
    }

    pub fn not_supported(what: impl Into<String>) -> Self {
        Error::NotSupported(what.into())
    }

    pub fn invalid_argument(what: impl Into<String>) -> Self {
        Error::InvalidArgument(what.into())
    }
}

fn io_kind(kind: io::ErrorKind) -> ErrorKind {
    match kind {
        io::ErrorKind::NotFound => ErrorKind::NotFound,
        io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
        io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
            ErrorKind::PermissionDenied
        }
        io::ErrorKind::InvalidInput
        | io::ErrorKind::IsADirectory
        | io::ErrorKind::DirectoryNotEmpty => ErrorKind::InvalidArgument,
        io::ErrorKind::NotADirectory | io::ErrorKind::Unsupported => ErrorKind::NotSupported,
        _ => ErrorKind::BackendSpecific,
    }
}

/// Attaches the virtual path an operation was working on to any error it
/// returns.
pub trait ResultExt<T> {
    fn at(self, op: &'static str, path: impl fmt::Display) -> Result<T, Error>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn at(self, op: &'static str, path: impl fmt::Display) -> Result<T, Error> {
        self.map_err(|err| Error::Context {
            source: Box::new(err),
            op,
            path: path.to_string(),
        })
    }
}
