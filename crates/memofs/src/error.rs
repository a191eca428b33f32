use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

use crate::syntax::ParseError;
use crate::value::CallError;

/// An error that happens while memoizing a function call.
///
/// The error is [`Clone`] because every caller that joined a deduplicated call receives the same
/// error. I/O errors are kept behind an [`Arc`] for that reason.
///
/// None of these errors are ever written to the cache.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The memoizer or one of the per-call options is misconfigured.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// The cache directory for a namespace could not be created.
    #[error("failed to create cache directory {}", path.display())]
    Namespace {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    /// The memoized function threw, returned a failing future, or passed an error to its
    /// callback.
    #[error("{0}")]
    Execution(CallError),
    /// The memoized function dropped its callback without ever invoking it.
    #[error("the callback was dropped without being invoked")]
    CallbackDropped,
    /// An existing cache file could not be read.
    #[error("failed to read cache file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    /// The computed result could not be written to the cache.
    #[error("failed to write cache file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    /// A cache namespace could not be removed.
    #[error("failed to invalidate cache directory {}", path.display())]
    Invalidate {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
    /// The source of the memoized function could not be parsed into a syntax tree.
    #[error("failed to parse function source")]
    Parse(#[from] ParseError),
    /// The task executing the call panicked.
    #[error("memoized call panicked: {0}")]
    Panicked(String),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// The [`io::ErrorKind`] of the underlying file system error, if any.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Namespace { source, .. }
            | Self::Read { source, .. }
            | Self::Write { source, .. }
            | Self::Invalidate { source, .. } => Some(source.kind()),
            _ => None,
        }
    }
}

impl From<CallError> for Error {
    fn from(err: CallError) -> Self {
        Self::Execution(err)
    }
}

/// Helpers to attach a path to an [`io::Error`].
pub(crate) trait IoResultExt<T> {
    fn or_namespace(self, path: &std::path::Path) -> Result<T, Error>;
    fn or_read(self, path: &std::path::Path) -> Result<T, Error>;
    fn or_write(self, path: &std::path::Path) -> Result<T, Error>;
    fn or_invalidate(self, path: &std::path::Path) -> Result<T, Error>;
}

impl<T> IoResultExt<T> for io::Result<T> {
    fn or_namespace(self, path: &std::path::Path) -> Result<T, Error> {
        self.map_err(|e| Error::Namespace {
            path: path.to_owned(),
            source: Arc::new(e),
        })
    }

    fn or_read(self, path: &std::path::Path) -> Result<T, Error> {
        self.map_err(|e| Error::Read {
            path: path.to_owned(),
            source: Arc::new(e),
        })
    }

    fn or_write(self, path: &std::path::Path) -> Result<T, Error> {
        self.map_err(|e| Error::Write {
            path: path.to_owned(),
            source: Arc::new(e),
        })
    }

    fn or_invalidate(self, path: &std::path::Path) -> Result<T, Error> {
        self.map_err(|e| Error::Invalidate {
            path: path.to_owned(),
            source: Arc::new(e),
        })
    }
}
