//! Chain-state singleton and the counter allocator.
//!
//! Exactly one [`ChainState`] row exists per database. It carries the
//! current head, the active and pending protocol hashes, and every
//! monotonic counter. The row is loaded once per run and mutated in
//! place; it is never recreated mid-run.
//!
//! # Allocator invariant
//!
//! For any sequence of `next_*` calls made while applying a block,
//! calling the matching `release_*` calls in exact reverse order during
//! revert returns every counter to its pre-block value. This is the
//! load-bearing invariant for reorg correctness: ids are dense, and no
//! gap survives a reverted block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, BigMapId, Level, OperationId, ScriptId};

/// Number of low bits of an operation id reserved for sub-operation ids.
///
/// An operation that spawns internal results (batched transfers, rollup
/// ticket transfers) derives sub-ids from its own id instead of going
/// through a second allocator.
pub const SUB_ID_BITS: u32 = 16;

/// The chain-state singleton.
///
/// Mirrors the indexer's notion of "where the head is and what ids have
/// been handed out". Persisted on every committed block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainState {
    /// Level of the last applied block.
    pub level: Level,
    /// Hash of the last applied block.
    pub hash: String,
    /// Timestamp of the last applied block.
    pub timestamp: DateTime<Utc>,
    /// Hash of the protocol the head block was produced under.
    pub protocol: String,
    /// Hash of the protocol the *next* block will be produced under.
    /// Differs from `protocol` exactly when an upgrade is pending.
    pub next_protocol: String,
    /// Set when the last head movement was a reorg rather than an advance.
    /// Downstream notification consumers key off this flag.
    pub reorganized: bool,
    /// Total number of known cycles (highest materialized cycle + 1).
    pub cycles_count: i32,
    /// All monotonic counters.
    pub counters: Counters,
}

impl ChainState {
    /// Chain state before any block, including genesis, has been applied.
    pub fn empty() -> Self {
        Self {
            level: -1,
            hash: String::new(),
            timestamp: DateTime::<Utc>::MIN_UTC,
            protocol: String::new(),
            next_protocol: String::new(),
            reorganized: false,
            cycles_count: 0,
            counters: Counters::default(),
        }
    }
}

/// Every monotonically increasing identifier owned by the indexer.
///
/// Counters hold the *last allocated* value; `next_*` increments first,
/// so a fresh database starts all counters at zero and the first
/// allocation of each kind returns 1 (shifted, for operations).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    account: i64,
    operation: i64,
    big_map: i64,
    big_map_key: i64,
    big_map_update: i64,
    script: i64,
    storage: i64,
    /// Global manager counter, bumped once per consumed manager operation.
    manager: i64,
}

impl Counters {
    /// Allocates the next account id.
    pub fn next_account_id(&mut self) -> AccountId {
        self.account += 1;
        AccountId::new(self.account)
    }

    /// Releases the last `count` account ids.
    pub fn release_account_ids(&mut self, count: i64) {
        self.account -= count;
    }

    /// Allocates the next operation id, with the sub-id bits cleared.
    pub fn next_operation_id(&mut self) -> OperationId {
        self.operation += 1;
        OperationId::new(self.operation << SUB_ID_BITS)
    }

    /// Releases the last `count` operation ids.
    pub fn release_operation_ids(&mut self, count: i64) {
        self.operation -= count;
    }

    /// Allocates the next big-map id.
    pub fn next_big_map_id(&mut self) -> BigMapId {
        self.big_map += 1;
        BigMapId::new(self.big_map)
    }

    /// Releases the last `count` big-map ids.
    pub fn release_big_map_ids(&mut self, count: i64) {
        self.big_map -= count;
    }

    /// Allocates the next big-map key id.
    pub fn next_big_map_key_id(&mut self) -> i64 {
        self.big_map_key += 1;
        self.big_map_key
    }

    /// Releases the last `count` big-map key ids.
    pub fn release_big_map_key_ids(&mut self, count: i64) {
        self.big_map_key -= count;
    }

    /// Allocates the next big-map update id.
    pub fn next_big_map_update_id(&mut self) -> i64 {
        self.big_map_update += 1;
        self.big_map_update
    }

    /// Releases the last `count` big-map update ids.
    pub fn release_big_map_update_ids(&mut self, count: i64) {
        self.big_map_update -= count;
    }

    /// Allocates the next script id.
    pub fn next_script_id(&mut self) -> ScriptId {
        self.script += 1;
        ScriptId::new(self.script)
    }

    /// Releases the last `count` script ids.
    pub fn release_script_ids(&mut self, count: i64) {
        self.script -= count;
    }

    /// Allocates the next storage id.
    pub fn next_storage_id(&mut self) -> i64 {
        self.storage += 1;
        self.storage
    }

    /// Releases the last `count` storage ids.
    pub fn release_storage_ids(&mut self, count: i64) {
        self.storage -= count;
    }

    /// Bumps the global manager counter.
    pub fn next_manager_counter(&mut self) -> i64 {
        self.manager += 1;
        self.manager
    }

    /// Releases the last `count` manager-counter bumps.
    pub fn release_manager_counters(&mut self, count: i64) {
        self.manager -= count;
    }

    /// Last allocated account id value.
    #[must_use]
    pub fn accounts_total(&self) -> i64 {
        self.account
    }
}
