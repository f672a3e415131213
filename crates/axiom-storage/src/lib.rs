//! AXIOM Storage Layer
//!
//! SQLite-backed persistence for the sync preferences that must survive a
//! restart (the machine tag of the local session, the last client name).
//! Replicated session data itself is owned by the sync transport.

mod database;
mod error;
mod migrations;

pub use database::Database;
pub use error::StorageError;

pub type Result<T> = std::result::Result<T, StorageError>;
