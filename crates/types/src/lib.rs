//! Core type definitions for tzmirror.
//!
//! This crate holds everything the replay engine and the storage layer
//! agree on:
//!
//! - Identifier newtypes (`AccountId`, `OperationId`, ...)
//! - The chain-state singleton with the counter allocator
//! - Entity rows (accounts, blocks, operations, protocols, cycles, rights)
//! - The raw node-RPC block model
//! - Configuration and the postcard codec

#![deny(unsafe_code)]

mod account;
mod block;
mod chain;
pub mod codec;
pub mod config;
mod cycle;
mod ids;
mod operation;
mod protocol;
pub mod raw;
mod rights;
mod statistics;
mod ticket;

pub use account::{Account, AccountKind, DelegateData};
pub use block::{Block, OperationFlags};
pub use chain::{ChainState, Counters, SUB_ID_BITS};
pub use cycle::{BakerCycle, Cycle};
pub use ids::{AccountId, BigMapId, OperationId, ProtocolCode, ScriptId};
pub use operation::{
    DoubleBakingOp, Operation, OperationKind, OperationPayload, PendingSlash, TransactionOp,
    TransactionStatus,
};
pub use protocol::{Protocol, ProtocolConstants};
pub use rights::{BakingRight, RightStatus};
pub use statistics::Statistics;
pub use ticket::{Ticket, TicketBalance};

/// Block level. Levels start at 0 (genesis) and increase by one per block.
pub type Level = i32;

/// Cycle index. Cycle 0 starts at level 1.
pub type CycleIndex = i32;
