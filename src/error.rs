//! Error type shared by discovery, providers and the limiter.

use std::io;

use crate::collector::procfs::ParseError;

/// Errors produced while discovering or applying a memory limit.
#[derive(Debug)]
pub enum Error {
    /// Malformed kernel text.
    Parse(ParseError),
    /// Reading a file failed for a reason other than a tolerated not-found.
    Io { context: String, source: io::Error },
    /// No cgroup hierarchy is mounted.
    NoCgroup,
    /// The platform has no cgroups at all.
    CgroupsNotSupported,
    /// A cgroup exists but no memory ceiling is configured.
    NoLimit,
    /// A cgroup path could not be resolved against its mount.
    Path(String),
    /// Invalid ratio, ratio override or experiment flag.
    Config(String),
    /// A panic happened while applying the limit; the budget was restored
    /// to `snapshot`.
    PanicRecovered { snapshot: i64, message: String },
    /// An inner error with added context.
    Context { context: String, source: Box<Error> },
    /// Failure reported by a user-supplied provider.
    Provider(String),
}

impl Error {
    /// Wraps `self` with a context message.
    pub fn context(self, context: impl Into<String>) -> Self {
        Error::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    /// Returns `true` if this error, or any error it wraps, is [`Error::NoLimit`].
    pub fn is_no_limit(&self) -> bool {
        match self {
            Error::NoLimit => true,
            Error::Context { source, .. } => source.is_no_limit(),
            _ => false,
        }
    }

    /// Returns the innermost error below any context layers.
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Parse(e) => write!(f, "{}", e),
            Error::Io { context, source } => write!(f, "{}: {}", context, source),
            Error::NoCgroup => write!(f, "process is not in a cgroup"),
            Error::CgroupsNotSupported => write!(f, "cgroups is not supported on this system"),
            Error::NoLimit => write!(f, "memory is not limited"),
            Error::Path(msg) => write!(f, "{}", msg),
            Error::Config(msg) => write!(f, "invalid configuration: {}", msg),
            Error::PanicRecovered { snapshot, message } => write!(
                f,
                "panic while setting the memory limit, rolled back to previous limit {}: {}",
                snapshot, message
            ),
            Error::Context { context, source } => write!(f, "{}: {}", context, source),
            Error::Provider(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Parse(e) => Some(e),
            Error::Io { source, .. } => Some(source),
            Error::Context { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<ParseError> for Error {
    fn from(e: ParseError) -> Self {
        Error::Parse(e)
    }
}
