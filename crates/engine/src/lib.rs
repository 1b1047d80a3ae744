//! Block replay engine.
//!
//! The engine turns raw node-RPC blocks into mirror state, one block per
//! write transaction, and can unwind any committed block exactly. The
//! pieces, bottom up:
//!
//! - [`cache`]: the entity cache tier (identity maps, not transactional)
//! - [`context`]: the long-lived engine state and the per-block [`Ctx`]
//! - [`commits`]: one apply/revert pair per operation kind
//! - [`rights`]: deterministic baking-right sampling
//! - [`rewards`], [`cycles`], [`migration`]: block-level and boundary
//!   processing, each line with an exact mirror
//! - [`handler`]: the per-block state machine
//! - [`dispatcher`]: protocol version routing
//!
//! The engine is synchronous; the sync loop above it owns async and
//! retry policy, keyed on [`IndexError::is_retryable`].

#![deny(unsafe_code)]

pub mod cache;
pub mod commits;
pub mod context;
pub mod cycles;
pub mod dispatcher;
mod error;
pub mod handler;
pub mod migration;
pub mod rewards;
pub mod rights;

pub use cache::EntityCache;
pub use context::{Ctx, EngineContext, NoopStage, PostCommitStage};
pub use dispatcher::Dispatcher;
pub use error::{IndexError, Result};
pub use handler::ProtocolHandler;
pub use migration::{BootstrapAccount, BootstrapParams};
pub use rights::{NoFallback, RightsFallback};
