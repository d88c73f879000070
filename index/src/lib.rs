// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Hashchain Index
//!
//! The in-memory chain index a light client keeps while it syncs block
//! headers: an ordered `height → hash` map, the current tip, and a running
//! count of how far behind the remote server we still are.
//!
//! Header validation, networking and persistence all happen somewhere else.
//! By the time a `(height, hash)` pair reaches this crate it has already been
//! checked, so the index just stores it and keeps the bookkeeping honest
//! while other threads read along.
//!
//! ## Architecture
//!
//! - **hash** — `BlockHash`, the 256-bit block identifier.
//! - **error** — Error types. There are very few, on purpose.
//! - **events** — Per-field change notifications and the observer registry.
//! - **status** — `ChainStatus`, a point-in-time snapshot for progress UIs.
//! - **chain** — `HashChain`, the store. One lock, five scalars, one map.
//!
//! ## Threading Model
//!
//! Every public method on [`HashChain`] takes `&self` and serializes on a
//! single `parking_lot::Mutex`. Share the store through an `Arc` and call it
//! from as many threads as you like.

pub mod chain;
pub mod error;
pub mod events;
pub mod hash;
pub mod status;

pub use chain::HashChain;
pub use error::HashParseError;
pub use events::{ChainObserver, ChainProperty, PropertyChange, SubscriptionId};
pub use hash::BlockHash;
pub use status::ChainStatus;
