//! # relaychat-types
//!
//! Event vocabulary for the relaychat synchronization engine.
//!
//! This crate provides the foundational types used across all relaychat crates:
//! - [`EventId`], [`PublicKey`] - Identity types (32 bytes, hex encoded)
//! - [`RawEvent`], [`UnsignedEvent`] - Signed relay events and unsigned rumors
//! - [`Kind`], [`Tag`] - Event discriminators and tag arrays
//! - [`Filter`] - Relay query filters with local matching
//! - [`TypesError`] - Error types
//!
//! These are domain vocabulary, not an owned wire format: events arrive
//! already parsed and verified from the transport collaborator.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod event;
mod filter;
mod ids;

pub use error::TypesError;
pub use event::{Kind, RawEvent, Tag, UnsignedEvent};
pub use filter::Filter;
pub use ids::{EventId, PublicKey};
