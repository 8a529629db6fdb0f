#![forbid(unsafe_code)]

//! Render-phase interrupts and captured errors.

use std::any::Any;
use std::fmt;
use std::time::Instant;

use crate::dependency::Dependency;

/// An error raised while rendering a component or running an effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderError {
    message: String,
    from_panic: bool,
}

impl RenderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            from_panic: false,
        }
    }

    /// Convert a panic payload caught with `catch_unwind`.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let mut message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        if let Some(stripped) = message.strip_prefix("internal error: entered unreachable code: ") {
            message = stripped.to_string();
        }
        Self {
            message,
            from_panic: true,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// True if this error came from a caught panic.
    pub fn is_panic(&self) -> bool {
        self.from_panic
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.from_panic {
            write!(f, "panicked: {}", self.message)
        } else {
            f.write_str(&self.message)
        }
    }
}

impl std::error::Error for RenderError {}

impl From<&str> for RenderError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for RenderError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Why a unit of work did not finish.
#[derive(Debug, Clone)]
pub enum Interrupt {
    /// Waiting on an unresolved dependency. Never seen by error boundaries.
    Suspend(Dependency),
    /// A genuine failure.
    Error(RenderError),
}

impl Interrupt {
    pub fn is_suspend(&self) -> bool {
        matches!(self, Self::Suspend(_))
    }
}

impl From<RenderError> for Interrupt {
    fn from(error: RenderError) -> Self {
        Self::Error(error)
    }
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Suspend(dep) => write!(f, "suspended on {}", dep.id()),
            Self::Error(e) => write!(f, "{e}"),
        }
    }
}

/// Result of a render-phase computation.
pub type RenderResult<T> = Result<T, Interrupt>;

/// An error together with where it happened.
#[derive(Debug, Clone)]
pub struct CapturedError {
    pub message: String,
    /// Name of the component (or host kind) that failed.
    pub component: String,
    /// Owner chain, innermost first.
    pub component_stack: Vec<String>,
    /// When the error was captured.
    pub timestamp: Instant,
    pub from_panic: bool,
}

impl CapturedError {
    pub fn new(
        error: &RenderError,
        component: impl Into<String>,
        component_stack: Vec<String>,
        timestamp: Instant,
    ) -> Self {
        Self {
            message: error.message().to_string(),
            component: component.into(),
            component_stack,
            timestamp,
            from_panic: error.is_panic(),
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.component, self.message)?;
        for frame in &self.component_stack {
            write!(f, "\n    in {frame}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CapturedError {}
