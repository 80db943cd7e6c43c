//! Civic Storage Layer
//!
//! Durable [`governance::GovernanceStore`] backed by sled. Every table is a
//! tree of bincode records; cross-table rules commit in one transaction.

pub mod error;
pub mod sled_store;

pub use error::StorageError;
pub use sled_store::SledStore;
