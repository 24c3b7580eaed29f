//! Error taxonomy for the filesystem core.
//!
//! Every fallible operation in the index, prefetcher, upload subsystem, and
//! dispatch layer returns `Result<T, Error>`. The dispatch layer is the only
//! place that translates an `Error` into an errno via [`errno_for`]; nothing
//! below it should know about `libc`.

/// The kind of failure, independent of any human-readable context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Exists,
    PermissionDenied,
    NotSupported,
    IoError,
    Auth,
    Corrupt,
    Timeout,
}

/// An error with its kind and a short message describing what was attempted.
#[derive(Debug, thiserror::Error)]
#[error("{kind:?}: {message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Exists, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::IoError, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Corrupt, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_corrupt(&self) -> bool {
        self.kind == ErrorKind::Corrupt
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::corrupt(format!("sqlite: {e}"))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(format!("io: {e}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Error::timeout(format!("request timed out: {e}"))
        } else if e.status().map(|s| s.as_u16()) == Some(401) || e.status().map(|s| s.as_u16()) == Some(403) {
            Error::auth(format!("request unauthorized: {e}"))
        } else {
            Error::io(format!("request failed: {e}"))
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// The sole place kind-to-errno mapping happens. Called at every dispatch-layer
/// reply site instead of scattering `libc::E*` constants through the handlers.
pub fn errno_for(err: &Error) -> libc::c_int {
    match err.kind() {
        ErrorKind::NotFound => libc::ENOENT,
        ErrorKind::Exists => libc::EEXIST,
        ErrorKind::PermissionDenied => libc::EACCES,
        ErrorKind::NotSupported => libc::ENOTSUP,
        ErrorKind::IoError => libc::EIO,
        ErrorKind::Auth => libc::EACCES,
        ErrorKind::Corrupt => libc::EIO,
        ErrorKind::Timeout => libc::ETIMEDOUT,
    }
}
