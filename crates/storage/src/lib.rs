//! Transactional storage for the tzmirror indexer.
//!
//! This crate owns the persistence boundary:
//!
//! - [`StorageEngine`]: redb database lifecycle and transactions
//! - [`Tables`]: table definitions, one table per entity kind
//! - Key encoding for composite-key tables
//! - Typed row stores over open tables
//! - [`UnitOfWork`]: the per-block changeset with a single atomic flush
//!
//! Everything a block mutates is staged in a [`UnitOfWork`] and written
//! inside one write transaction; a failed flush aborts the transaction
//! and leaves no partial block behind.

#![deny(unsafe_code)]

mod engine;
pub mod keys;
mod stores;
mod tables;
mod uow;

pub use engine::{EngineError, StorageEngine};
pub use stores::{
    AccountStore, BlockStore, ChainStore, CycleStore, OperationStore, ProtocolStore, RightsStore,
    SlashStore, StatisticsStore, StoreError,
};
pub use tables::Tables;
pub use uow::{FlushError, UnitOfWork};
