#![forbid(unsafe_code)]

//! Errors surfaced by roots and hosts.

use std::fmt;

use frx_core::CapturedError;

/// A host renderer refused or failed a mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host does not implement an optional primitive.
    Unsupported(&'static str),
    /// A node handle the host does not know.
    UnknownNode(String),
    /// Portal target could not be resolved.
    UnknownPortal(u32),
    /// Any other host-specific failure.
    Failed(String),
}

impl fmt::Display for HostError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported(op) => write!(f, "host does not support {op}"),
            Self::UnknownNode(node) => write!(f, "unknown host node {node}"),
            Self::UnknownPortal(id) => write!(f, "unknown portal container {id}"),
            Self::Failed(msg) => write!(f, "host failure: {msg}"),
        }
    }
}

impl std::error::Error for HostError {}

/// Errors returned from root operations.
#[derive(Debug, Clone)]
pub enum ReconcileError {
    /// A host primitive failed during commit. The root is unusable afterwards.
    Host(HostError),
    /// An error reached the root with no error boundary to catch it. The tree
    /// has been unmounted.
    Uncaught(CapturedError),
    /// Too many consecutive synchronous commits scheduled from commit-phase
    /// effects.
    MaxUpdateDepth { limit: u32 },
    /// The root was unmounted or poisoned by a host failure.
    RootUnmounted,
}

impl fmt::Display for ReconcileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Host(e) => write!(f, "{e}"),
            Self::Uncaught(e) => write!(f, "uncaught error in {}: {}", e.component, e.message),
            Self::MaxUpdateDepth { limit } => write!(
                f,
                "maximum update depth exceeded: more than {limit} nested synchronous commits"
            ),
            Self::RootUnmounted => write!(f, "root is unmounted"),
        }
    }
}

impl std::error::Error for ReconcileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Host(e) => Some(e),
            Self::Uncaught(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HostError> for ReconcileError {
    fn from(err: HostError) -> Self {
        Self::Host(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn host_error_converts_and_chains() {
        let err: ReconcileError = HostError::Unsupported("hide_instance").into();
        assert_eq!(err.to_string(), "host does not support hide_instance");
        assert!(err.source().is_some());
    }

    #[test]
    fn depth_message() {
        let err = ReconcileError::MaxUpdateDepth { limit: 50 };
        assert!(err.to_string().contains("more than 50"));
    }
}
