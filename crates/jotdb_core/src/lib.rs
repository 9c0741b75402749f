//! # JotDB Core
//!
//! Embeddable JSON document database engine.
//!
//! This crate provides:
//! - A dynamic JSON [`Document`] model with dotted-path field access
//! - Runtime [`schema`]s with secondary, unique and full-text indexes
//! - Transactional index maintenance with order-preserving key encodings
//! - A [`query`] planner that selects point lookups, index scans,
//!   full-text queries or collection scans
//! - Buffered [`transaction`]s with interactive and batch modes
//! - A composable [`hooks`] pipeline and a post-commit change stream
//!
//! Storage is delegated to any [`jotdb_kv::KvStore`]; full-text search to
//! any [`index::FullTextEngine`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod change_stream;
mod config;
mod database;
mod document;
mod error;
mod metadata;

pub mod hooks;
pub mod index;
pub mod query;
pub mod schema;
pub mod transaction;

pub use change_stream::{ChangeStream, DocumentChange, Subscriber};
pub use config::DatabaseConfig;
pub use database::{Database, DatabaseBuilder};
pub use document::{Document, FieldChange, FieldOp};
pub use error::{DbError, DbResult, ErrorKind};
pub use metadata::Metadata;
