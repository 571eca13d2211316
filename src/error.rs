use std::fmt;

#[derive(Debug)]
pub enum MirrorError {
    InvalidConfig(String),

    /// No output exists at the requested index on the capture adapter.
    OutputNotFound(u32),

    AccessLost,

    /// The platform wrote a different number of pointer-shape bytes than it
    /// announced in the frame info.
    PointerShapeMismatch { expected: u32, written: u32 },

    WorkerDead,

    Unsupported(String),

    /// A platform failure that the retry loop is expected to recover from
    /// (device removal, desktop switch, session disconnect).
    Transient(anyhow::Error),

    Platform(anyhow::Error),
}

/// Whether a failure is part of normal operation (desktop switches, mode
/// changes, device resets) or a programming/environment fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Expected,
    Unexpected,
}

impl MirrorError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::OutputNotFound(_)
            | Self::AccessLost
            | Self::PointerShapeMismatch { .. }
            | Self::WorkerDead
            | Self::Transient(_) => ErrorClass::Expected,
            Self::InvalidConfig(_) | Self::Unsupported(_) | Self::Platform(_) => {
                ErrorClass::Unexpected
            }
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(self.class(), ErrorClass::Expected)
    }

    /// Attach a context line to platform-backed variants, leaving the
    /// others untouched.
    pub fn context(self, message: impl fmt::Display + Send + Sync + 'static) -> Self {
        match self {
            Self::Transient(inner) => Self::Transient(inner.context(message)),
            Self::Platform(inner) => Self::Platform(inner.context(message)),
            other => other,
        }
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(message) => write!(f, "invalid mirror configuration: {message}"),
            Self::OutputNotFound(index) => write!(f, "no output at index {index}"),
            Self::AccessLost => write!(f, "desktop duplication access lost"),
            Self::PointerShapeMismatch { expected, written } => write!(
                f,
                "pointer shape size mismatch: expected {expected} bytes, platform wrote {written}"
            ),
            Self::WorkerDead => write!(f, "capture thread is not running"),
            Self::Unsupported(message) => write!(f, "unsupported: {message}"),
            Self::Transient(inner) => write!(f, "{inner:#}"),
            Self::Platform(inner) => write!(f, "{inner:#}"),
        }
    }
}

impl std::error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transient(inner) | Self::Platform(inner) => Some(inner.as_ref()),
            _ => None,
        }
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;
