//! # JotDB KV
//!
//! Ordered key-value store contract for the JotDB document engine.
//!
//! This crate provides:
//! - The [`KvStore`] / [`KvTx`] traits the engine is written against
//! - [`MemoryKv`], an in-memory ordered store with optimistic transactions
//!   and write-write conflict detection
//!
//! Backends are **opaque byte stores**: they order keys lexicographically
//! and detect commit conflicts, but do not understand documents, schemas
//! or index entries - the engine owns all key format interpretation.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
mod store;

pub use error::{KvError, KvResult};
pub use memory::MemoryKv;
pub use store::{KvStore, KvTx, ScanOpts};
