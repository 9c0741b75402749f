//! Index maintenance: order-preserving value encodings, key layout, and
//! the engine keeping index entries in lock-step with document writes.
//!
//! All index mutations for one document write happen inside the same
//! store transaction as the document write itself, so no intermediate
//! index state is ever externally observable.

pub(crate) mod encoding;
mod engine;
mod fts;
pub(crate) mod keys;

pub use encoding::{encode_duration, encode_instant, encode_value};
pub use engine::{FtsOp, IndexEngine};
pub use fts::{FullTextEngine, MemoryFullText};
