//! Publish-state tracking.
//!
//! # Responsibility
//! - Correlate local publish/unpublish requests with remote acknowledgments.
//! - Expose the clock and scheduling seams the tracker is built on.
//!
//! # See also
//! - `sync` for the notification side of the round-trip.

pub mod clock;
pub mod controller;
pub mod scheduler;
