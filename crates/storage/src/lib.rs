//! phi_storage
//!
//! The database layer: a single encrypted SQLite file holding `vault_meta`,
//! `tokens`, and `entity_variants`, per spec.md §6's persisted-state layout.
//! Writes go through a single mutex-guarded connection (the "single writer
//! lock" of spec.md §5); SQLite's own MVCC handles concurrent readers once a
//! write transaction commits.

pub mod db;
pub mod token_store;
pub mod vault;

pub use db::{Database, StorageError};
pub use token_store::{TokenEntry, TokenStore};
pub use vault::VaultMetaRepo;
