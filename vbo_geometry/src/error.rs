//! Error types for VBO geometry
//!
//! Every fallible operation of the buffer layer returns [`Result`]. Failures
//! are local and synchronous: a call either completes or leaves the registry
//! exactly as it was before the call.

use std::fmt;
use crate::resource::ElementKind;

/// Result type for buffer operations
pub type Result<T> = std::result::Result<T, Error>;

/// VBO geometry errors
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A precondition on the geometry state was violated
    /// (e.g. setting indices before any vertex data exists)
    InvalidState(String),

    /// Structurally invalid input (unsupported element kind, zero stride,
    /// write past the capacity of an existing CPU buffer...)
    InvalidArgument(String),

    /// Interleaved contributor indices for `kind` do not form a contiguous
    /// run starting at 0; `index` is the first position that breaks it
    InterleaveGap {
        kind: ElementKind,
        index: usize,
    },

    /// Failure reported by the graphics device
    BackendError(String),

    /// The graphics device ran out of buffer memory
    OutOfMemory,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Error::InterleaveGap { kind, index } => write!(
                f,
                "Gap in interleaved {:?} data at index {}", kind, index
            ),
            Error::BackendError(msg) => write!(f, "Backend error: {}", msg),
            Error::OutOfMemory => write!(f, "Out of GPU memory"),
        }
    }
}

impl std::error::Error for Error {}

// ===== ERROR MACROS =====

/// Build an [`Error`] variant carrying a formatted message, logging it at
/// ERROR severity (with file:line) on the way.
///
/// # Example
///
/// ```ignore
/// return Err(engine_err!("vbo::BufferRegistry", InvalidState, "no buffer at key {}", key));
/// ```
#[macro_export]
macro_rules! engine_err {
    ($source:expr, $variant:ident, $($arg:tt)*) => {{
        let message = format!($($arg)*);
        $crate::engine_error!($source, "{}", message);
        $crate::vbo::Error::$variant(message)
    }};
}

/// Log and return an [`Error`] variant from the current function
///
/// # Example
///
/// ```ignore
/// engine_bail!("vbo::IndexedBufferSet", InvalidState, "Vertex data must be present");
/// ```
#[macro_export]
macro_rules! engine_bail {
    ($source:expr, $variant:ident, $($arg:tt)*) => {
        return Err($crate::engine_err!($source, $variant, $($arg)*))
    };
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
