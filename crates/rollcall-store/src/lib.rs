//! rollcall-store — SQLite persistence for Rollcall.
//!
//! Implements the core store traits on a single SQLite file. Uniqueness
//! constraints enforce the at-most-one-record-per-(event, identity, day)
//! and one-enrollment-per-(scope, identity) invariants at the storage
//! layer; embeddings are encrypted at rest.

mod crypto;
mod schema;
mod store;


pub use crypto::{CryptoError, EmbeddingCipher};
pub use store::{Error, SqliteStore};
