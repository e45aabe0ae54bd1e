//! Domain model for synchronized notes.
//!
//! # Responsibility
//! - Define canonical data structures used by the publish tracker and storage.
//!
//! # Invariants
//! - Every note is identified by a stable remote-store key.

pub mod note;
