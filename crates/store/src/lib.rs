//! Transactional persistence for the bookstore order core.
//!
//! Two implementations of [`OrderStore`] are provided:
//! - [`InMemoryStore`]: serializes transactions behind a single lock, for tests and local runs
//! - [`PostgresStore`]: row-level locking with `SELECT ... FOR UPDATE`

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use error::{Result, StoreError};
pub use memory::{InMemoryStore, InMemoryTransaction};
pub use postgres::{PostgresStore, PostgresTransaction};
pub use store::{OrderStore, StoreTransaction};
