//! Error types for the binding layer

use std::any::Any;
use std::error::Error;
use std::fmt;

use luna_engine::VmError;

/// Result type for binding operations
pub type BindResult<T> = Result<T, BindError>;

/// Binding layer errors
#[derive(Debug, thiserror::Error)]
pub enum BindError {
    /// Source failed to compile
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A protected call failed at runtime
    #[error("{message}")]
    Execution {
        /// Error message reported by the runtime
        message: String,
        /// Host error raised by a callback, if that is what failed
        #[source]
        cause: Option<HostError>,
    },

    /// A value had an incompatible type
    #[error("wrong type: cannot read a {observed} value as {target}")]
    WrongType {
        /// Type name of the value found on the stack
        observed: String,
        /// Requested host type
        target: &'static str,
    },

    /// The runtime ran out of memory
    #[error("the runtime ran out of memory")]
    Allocation,

    /// Reading script source failed
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A configuration document could not be parsed
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Host error in transit through the runtime
    #[error("{0}")]
    Host(HostError),
}

impl BindError {
    /// An execution error without a host cause.
    pub fn execution(message: impl Into<String>) -> Self {
        BindError::Execution {
            message: message.into(),
            cause: None,
        }
    }

    /// Report a host error that never entered the runtime as the execution
    /// error it causes.
    pub(crate) fn surfaced(self) -> Self {
        match self {
            BindError::Host(host) => BindError::Execution {
                message: host.to_string(),
                cause: Some(host),
            },
            other => other,
        }
    }
}

impl From<VmError> for BindError {
    fn from(err: VmError) -> Self {
        match err {
            VmError::OutOfMemory => BindError::Allocation,
            VmError::Syntax(message) => BindError::Syntax(message),
            other => BindError::execution(other.to_string()),
        }
    }
}

/// An error raised by host code called from a script.
///
/// Wraps either the error a callback returned or the message of a panic it
/// raised.
#[derive(Debug)]
pub struct HostError {
    inner: Box<dyn Error + 'static>,
}

/// A panic caught at the callback boundary
#[derive(Debug, thiserror::Error)]
#[error("callback panicked: {0}")]
pub struct Panicked(pub String);

impl HostError {
    /// Wrap a host error.
    pub fn new(err: impl Into<Box<dyn Error + 'static>>) -> Self {
        Self { inner: err.into() }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        Self::new(Panicked(message))
    }

    /// Whether the wrapped error is an `E`.
    pub fn is<E: Error + 'static>(&self) -> bool {
        self.inner.is::<E>()
    }

    /// The wrapped error as an `E`, if it is one.
    pub fn downcast_ref<E: Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Unwrap the original error.
    pub fn into_inner(self) -> Box<dyn Error + 'static> {
        self.inner
    }
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}

impl Error for HostError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.inner.source()
    }
}
