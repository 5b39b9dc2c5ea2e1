//! Result type definition and extension traits.
//!
//! Best-effort steps inside a handler (secondary attachments, cleanup after a
//! failed create) never abort the lifecycle operation. They go through
//! [`ResultExt`], which logs the failure and keeps going.

use crate::error::Error;

/// The standard Result type for rekon operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait providing safe combinators for Results.
pub trait ResultExt<T> {
    /// Convert a Result to an Option, logging the error if present.
    fn into_option_logged(self) -> Option<T>;

    /// Convert a failure into a warning entry, logging it.
    ///
    /// The warning text is `"{context}: {error}"`.
    fn or_warn(self, context: &str, warnings: &mut Vec<String>) -> Option<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn into_option_logged(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(error = %e, "Operation failed");
                None
            }
        }
    }

    fn or_warn(self, context: &str, warnings: &mut Vec<String>) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(error = %e, context, "Best-effort step failed");
                warnings.push(format!("{context}: {e}"));
                None
            }
        }
    }
}
