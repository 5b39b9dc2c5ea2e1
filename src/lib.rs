//! # rekon
//!
//! Custom-resource reconciliation engine. One lifecycle event in, exactly one
//! callback out: the [`Dispatcher`] validates the event, runs the matching
//! resource handler under a time budget, and delivers the result.
//!
//! The workspace crates are re-exported for convenience.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod config;
pub mod dispatcher;
pub mod fixtures;

pub use config::AppConfig;
pub use dispatcher::{DispatchReport, DispatchState, Dispatcher};

pub use rekon_callback;
pub use rekon_core;
pub use rekon_reconciler;
pub use rekon_resources;
