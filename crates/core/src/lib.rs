//! rekon core: error taxonomy, lifecycle event model, and operation outcomes.
//!
//! Everything that crosses a crate boundary in rekon is defined here.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod error;
pub mod event;
pub mod outcome;
pub mod properties;
pub mod result;

pub use error::{Error, ErrorClass, RemoteError, RetryClass, classify_remote};
pub use event::{CorrelationIds, LifecycleEvent, RawEvent, Verb, sanitize_for_logging};
pub use outcome::{DeleteStatus, Outcome, ResourceOutput};
pub use properties::Properties;
pub use result::{Result, ResultExt};
