//! # Tradewind Core
//!
//! Shared primitives for the Tradewind deployment control plane:
//!
//! - `kind`: the closed error-kind taxonomy every subsystem maps its
//!   failures onto, used for exit codes, retry classification and
//!   structured reports
//! - `retry`: the uniform retry helper (attempts, initial delay, backoff
//!   factor, cancellation signal, recoverability predicate)
//! - `cancel`: the graceful-cancellation budget wrapper
//!
//! Every other `tradewind-*` crate depends on this one; it depends on
//! nothing inside the workspace.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod kind;
pub mod retry;

pub use cancel::{with_graceful_budget, GracefulOutcome};
pub use kind::{ErrorKind, Kinded};
pub use retry::{retry_with, RetryError, RetryPolicy};
