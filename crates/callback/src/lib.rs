//! Response delivery for rekon.
//!
//! Every invocation ends with exactly one PUT of a [`ResponseEnvelope`] to
//! the orchestrator's callback address. [`ResponseDelivery`] owns the
//! fallback rules; [`CallbackTransport`] is the seam for the wire.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod delivery;
pub mod envelope;
pub mod transport;

pub use delivery::{DeliveryConfig, DeliveryReport, ResponseDelivery};
pub use envelope::{CallbackTarget, ResponseEnvelope, ResponseStatus};
pub use transport::{CallbackTransport, HttpTransport, MemoryTransport, RecordedPut, TransportError};
