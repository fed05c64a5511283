//! Error types and result definitions for pipeline stages.
//!
//! Every item that cannot reach its destination is handed to
//! [`crate::processor::Processor::on_undeliverable`] together with a [`PlumbError`]. The error's
//! [`ErrorKind`] tells processing failures apart from cancellation and from a closed downstream.
//! Contract violations (invalid semaphore deltas, out-of-range partition indices) are panics and
//! never show up here.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type for stage and processor operations.
pub type PlumbResult<T> = Result<T, PlumbError>;

/// Categories of failures an undeliverable item can be paired with.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Processing Errors
    ProcessingFailed,
    InvalidData,

    // Cancellation Errors
    Cancelled,
    DeadlineExceeded,

    // Stream Errors
    OutputClosed,
}

impl ErrorKind {
    /// Returns `true` for kinds produced by a fired cancellation signal.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }

    /// Returns a stable snake case name, used as metric label value.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::InvalidData => "invalid_data",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::OutputClosed => "output_closed",
        }
    }
}

/// Error paired with an item that could not be delivered.
///
/// Cloning is cheap: the source and backtrace are shared.
#[derive(Debug, Clone)]
pub struct PlumbError {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

impl PlumbError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the static description of this error.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the dynamic detail, if any.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns the captured backtrace.
    pub fn backtrace(&self) -> &Backtrace {
        self.backtrace.as_ref()
    }

    /// Returns the callsite that created this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.location
    }

    /// Attaches an originating error, exposed through [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.source = Some(Arc::new(source));
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        PlumbError {
            kind,
            description,
            detail,
            source,
            location: Location::caller(),
            backtrace: Arc::new(Backtrace::capture()),
        }
    }
}

impl PartialEq for PlumbError {
    fn eq(&self, other: &PlumbError) -> bool {
        self.kind == other.kind
    }
}

impl Hash for PlumbError {
    /// Hashes only the kind and static description so repeated occurrences group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind.hash(state);
        self.description.hash(state);
    }
}

impl fmt::Display for PlumbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.kind,
            self.description,
            self.location.file(),
            self.location.line(),
            self.location.column()
        )?;

        if let Some(detail) = self.detail.as_deref() {
            write!(f, "\n  Detail:")?;
            for line in detail.lines() {
                write!(f, "\n    {line}")?;
            }
        }

        Ok(())
    }
}

impl error::Error for PlumbError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`PlumbError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for PlumbError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> PlumbError {
        PlumbError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`PlumbError`] from an error kind, static description and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for PlumbError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> PlumbError {
        PlumbError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}
