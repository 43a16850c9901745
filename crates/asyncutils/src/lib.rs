//! Small async helpers shared by the encore crates.
//!
//! The only resident right now is [`supervise`]: a restart-on-failure loop
//! with a bounded exponential [`Backoff`], kept apart from the loops it
//! supervises so that the policy can be tested without any I/O behind it.

mod retry;

pub use crate::retry::{Backoff, supervise};
