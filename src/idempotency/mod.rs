//! Idempotency module for duplicate suppression
//!
//! # Components
//!
//! - `request_fingerprint` / `content_fingerprint`: SHA-256 over canonical payloads
//! - `IdempotencyStore`: atomic check-and-reserve against the fingerprint index

mod fingerprint;
mod store;

pub use fingerprint::{content_fingerprint, request_fingerprint};
pub use store::IdempotencyStore;

/// Outcome of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The caller owns the fingerprint and may process the payload
    Reserved,

    /// Another job already owns the fingerprint
    AlreadyProcessed { owner: String },
}
