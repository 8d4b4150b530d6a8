//! Unified error handling for chunkalloc
//!
//! All fallible allocator operations return [`AllocResult`]. Errors are
//! categorized so callers can tell a recoverable provider exhaustion apart
//! from a programming error (foreign handle, bogus free range) or an
//! internal bug.

use std::fmt;

/// Unified error type for chunkalloc
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    // ========== Provider Errors ==========
    /// The chunk provider could not satisfy a growth request
    #[error("Chunk provider exhausted: {0}")]
    ProviderExhausted(String),

    // ========== Caller Errors ==========
    /// Handle or memory identity not owned by this allocator
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Allocation of zero bytes requested
    #[error("Allocation size cannot be zero")]
    SizeZero,

    /// Argument does not describe the current allocator state
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transfer buffer does not cover the region exactly
    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Invalid allocator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    // ========== Internal Errors ==========
    /// Lock poisoned (a thread panicked while holding the allocator lock)
    #[error("Internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// Internal error (indicates a bug)
    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AllocError {
    /// Categorize the error for handling decisions
    pub fn category(&self) -> ErrorCategory {
        match self {
            AllocError::SizeZero
            | AllocError::SizeMismatch { .. }
            | AllocError::InvalidConfiguration(_) => ErrorCategory::User,

            AllocError::ProviderExhausted(_) => ErrorCategory::Backend,

            AllocError::InvalidHandle(_) | AllocError::InvalidArgument(_) => {
                ErrorCategory::Programming
            }

            AllocError::LockPoisoned(_) | AllocError::InternalError(_) => ErrorCategory::Internal,
        }
    }

    /// Check if the caller may retry (e.g. with a smaller chunk size)
    pub fn is_recoverable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Backend)
    }

    /// Check if this error means the caller corrupted its ownership tracking
    pub fn is_programming_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Programming)
    }

    /// Check if this is an internal error (indicates a bug in this crate)
    pub fn is_internal_error(&self) -> bool {
        matches!(self.category(), ErrorCategory::Internal)
    }
}

/// Error category for handling decisions
///
/// - User: invalid input, fix the request
/// - Backend: the chunk provider ran out of memory
/// - Programming: caller-side misuse of handles or ranges
/// - Internal: bug in the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    User,
    Backend,
    Programming,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::User => write!(f, "User"),
            ErrorCategory::Backend => write!(f, "Backend"),
            ErrorCategory::Programming => write!(f, "Programming"),
            ErrorCategory::Internal => write!(f, "Internal"),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for AllocError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        AllocError::LockPoisoned(err.to_string())
    }
}

/// Helper type alias for Results using AllocError
pub type AllocResult<T> = std::result::Result<T, AllocError>;

/// Create an internal error with context
///
/// # Examples
/// ```ignore
/// return Err(internal_error!("free list out of order in chunk {}", idx));
/// ```
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::error::AllocError::InternalError($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AllocError::InternalError(format!($fmt, $($arg)*))
    };
}

/// Create an invalid-handle error with context
#[macro_export]
macro_rules! invalid_handle {
    ($msg:expr) => {
        $crate::error::AllocError::InvalidHandle($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::AllocError::InvalidHandle(format!($fmt, $($arg)*))
    };
}
