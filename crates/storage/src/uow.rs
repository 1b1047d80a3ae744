//! Per-block unit of work.
//!
//! Everything a block mutates is staged here while commits run against
//! the in-memory cache, then written in one pass inside the block's
//! write transaction. The unit of work also accumulates the signed sum
//! of all balance mutations, which the conservation diagnostic compares
//! against the block's net issuance minus net burn.

use std::collections::BTreeMap;

use redb::WriteTransaction;
use snafu::{ResultExt, Snafu};

use tzmirror_types::{
    Account, AccountId, BakerCycle, BakingRight, Block, ChainState, Cycle, CycleIndex, Level,
    Operation, OperationId, PendingSlash, Protocol, Statistics,
};

use crate::stores::{
    AccountStore, BlockStore, ChainStore, CycleStore, OperationStore, ProtocolStore, RightsStore,
    SlashStore, StatisticsStore, StoreError,
};
use crate::tables::Tables;

/// Unit-of-work error types.
#[derive(Debug, Snafu)]
pub enum FlushError {
    #[snafu(display("failed to open table: {source}"))]
    OpenTable { source: redb::TableError },

    #[snafu(display("row store error: {source}"))]
    Rows { source: StoreError },
}

/// The per-block changeset.
///
/// Apply stages inserts and upserts; revert stages removals. One flush
/// writes the whole set; nothing touches the database before that.
#[derive(Default)]
pub struct UnitOfWork {
    chain: Option<ChainState>,
    accounts: BTreeMap<i64, Account>,
    deleted_accounts: Vec<Account>,
    block: Option<Block>,
    deleted_block: Option<Level>,
    operations: Vec<Operation>,
    deleted_operations: Vec<(Level, OperationId)>,
    protocols: Vec<Protocol>,
    deleted_protocols: Vec<Protocol>,
    cycles: Vec<Cycle>,
    deleted_cycles: Vec<CycleIndex>,
    baker_cycles: Vec<BakerCycle>,
    deleted_baker_cycles: Vec<(CycleIndex, AccountId)>,
    rights: Vec<BakingRight>,
    deleted_rights: Vec<(Level, i32)>,
    pending_slashes: Vec<PendingSlash>,
    deleted_pending_slashes: Vec<(Level, OperationId)>,
    statistics: Option<Statistics>,
    deleted_statistics: Option<Level>,
    balance_delta: i64,
    issued: i64,
    burned: i64,
}

impl UnitOfWork {
    /// Empty changeset.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the chain-state singleton. Always called exactly once per
    /// block, after all counters have settled.
    pub fn set_chain(&mut self, chain: ChainState) {
        self.chain = Some(chain);
    }

    /// Stages an account upsert. Later stages of the same id overwrite
    /// earlier ones, so the flushed row is the final in-block state.
    pub fn stage_account(&mut self, account: Account) {
        self.accounts.insert(account.id.value(), account);
    }

    /// Stages an account deletion (reorg unwinding the creating block).
    pub fn delete_account(&mut self, account: Account) {
        self.accounts.remove(&account.id.value());
        self.deleted_accounts.push(account);
    }

    /// Stages the block row.
    pub fn set_block(&mut self, block: Block) {
        self.block = Some(block);
    }

    /// Stages removal of the block row at `level`.
    pub fn remove_block(&mut self, level: Level) {
        self.deleted_block = Some(level);
    }

    /// Stages an operation insert.
    pub fn add_operation(&mut self, op: Operation) {
        self.operations.push(op);
    }

    /// Stages an operation removal.
    pub fn remove_operation(&mut self, level: Level, id: OperationId) {
        self.deleted_operations.push((level, id));
    }

    /// Stages a protocol upsert.
    pub fn upsert_protocol(&mut self, protocol: Protocol) {
        self.protocols.push(protocol);
    }

    /// Stages a protocol removal (reorg unwinding the activation block).
    pub fn remove_protocol(&mut self, protocol: Protocol) {
        self.deleted_protocols.push(protocol);
    }

    /// Stages a cycle upsert.
    pub fn upsert_cycle(&mut self, cycle: Cycle) {
        self.cycles.push(cycle);
    }

    /// Stages a cycle removal.
    pub fn remove_cycle(&mut self, cycle: CycleIndex) {
        self.deleted_cycles.push(cycle);
    }

    /// Stages a baker-cycle upsert.
    pub fn upsert_baker_cycle(&mut self, row: BakerCycle) {
        self.baker_cycles.push(row);
    }

    /// Stages a baker-cycle removal.
    pub fn remove_baker_cycle(&mut self, cycle: CycleIndex, baker: AccountId) {
        self.deleted_baker_cycles.push((cycle, baker));
    }

    /// Stages a baking-right upsert.
    pub fn upsert_right(&mut self, right: BakingRight) {
        self.rights.push(right);
    }

    /// Stages a baking-right removal.
    pub fn remove_right(&mut self, level: Level, round: i32) {
        self.deleted_rights.push((level, round));
    }

    /// Stages a pending-slash insert.
    pub fn add_pending_slash(&mut self, slash: PendingSlash) {
        self.pending_slashes.push(slash);
    }

    /// Stages a pending-slash removal.
    pub fn remove_pending_slash(&mut self, slashed_level: Level, op_id: OperationId) {
        self.deleted_pending_slashes.push((slashed_level, op_id));
    }

    /// Stages the statistics row for the block.
    pub fn set_statistics(&mut self, stats: Statistics) {
        self.statistics = Some(stats);
    }

    /// Stages removal of the statistics row at `level`.
    pub fn remove_statistics(&mut self, level: Level) {
        self.deleted_statistics = Some(level);
    }

    /// Accumulates one signed balance mutation for the conservation
    /// diagnostic.
    pub fn note_balance_delta(&mut self, delta: i64) {
        self.balance_delta += delta;
    }

    /// Signed sum of all balance mutations staged so far.
    #[must_use]
    pub fn balance_delta(&self) -> i64 {
        self.balance_delta
    }

    /// Records minted supply. Negative amounts undo a mint on revert.
    pub fn note_issued(&mut self, amount: i64) {
        self.issued += amount;
    }

    /// Records burned supply. Negative amounts undo a burn on revert.
    pub fn note_burned(&mut self, amount: i64) {
        self.burned += amount;
    }

    /// Net mutez minted by this block.
    #[must_use]
    pub fn issued(&self) -> i64 {
        self.issued
    }

    /// Net mutez burned by this block.
    #[must_use]
    pub fn burned(&self) -> i64 {
        self.burned
    }

    /// Ids of accounts staged for upsert, for the touch pass.
    pub fn staged_account_ids(&self) -> impl Iterator<Item = AccountId> + '_ {
        self.accounts.keys().map(|&id| AccountId::new(id))
    }

    /// Writes the whole changeset into the open transaction.
    ///
    /// Removals run before upserts within each table so a revert staging
    /// both (rights status resets) lands on the upserted row.
    ///
    /// # Errors
    ///
    /// Any storage error leaves the transaction poisoned; the caller
    /// must abort it and reset the entity caches.
    pub fn flush(&self, txn: &WriteTransaction) -> Result<(), FlushError> {
        {
            let mut accounts = txn.open_table(Tables::ACCOUNTS).context(OpenTableSnafu)?;
            let mut index = txn
                .open_table(Tables::ACCOUNT_INDEX)
                .context(OpenTableSnafu)?;
            for account in &self.deleted_accounts {
                AccountStore::delete(&mut accounts, &mut index, account).context(RowsSnafu)?;
            }
            for account in self.accounts.values() {
                AccountStore::put(&mut accounts, &mut index, account).context(RowsSnafu)?;
            }
        }

        {
            let mut blocks = txn.open_table(Tables::BLOCKS).context(OpenTableSnafu)?;
            if let Some(level) = self.deleted_block {
                BlockStore::delete(&mut blocks, level).context(RowsSnafu)?;
            }
            if let Some(block) = &self.block {
                BlockStore::put(&mut blocks, block).context(RowsSnafu)?;
            }
        }

        {
            let mut operations = txn.open_table(Tables::OPERATIONS).context(OpenTableSnafu)?;
            let mut level_index = txn
                .open_table(Tables::LEVEL_OPERATIONS)
                .context(OpenTableSnafu)?;
            for (level, id) in &self.deleted_operations {
                OperationStore::delete(&mut operations, &mut level_index, *level, *id)
                    .context(RowsSnafu)?;
            }
            for op in &self.operations {
                OperationStore::put(&mut operations, &mut level_index, op).context(RowsSnafu)?;
            }
        }

        if !self.protocols.is_empty() || !self.deleted_protocols.is_empty() {
            let mut protocols = txn.open_table(Tables::PROTOCOLS).context(OpenTableSnafu)?;
            let mut index = txn
                .open_table(Tables::PROTOCOL_INDEX)
                .context(OpenTableSnafu)?;
            for protocol in &self.deleted_protocols {
                ProtocolStore::delete(&mut protocols, &mut index, protocol).context(RowsSnafu)?;
            }
            for protocol in &self.protocols {
                ProtocolStore::put(&mut protocols, &mut index, protocol).context(RowsSnafu)?;
            }
        }

        {
            let mut cycles = txn.open_table(Tables::CYCLES).context(OpenTableSnafu)?;
            for cycle in &self.deleted_cycles {
                CycleStore::delete(&mut cycles, *cycle).context(RowsSnafu)?;
            }
            for cycle in &self.cycles {
                CycleStore::put(&mut cycles, cycle).context(RowsSnafu)?;
            }
        }

        {
            let mut baker_cycles = txn
                .open_table(Tables::BAKER_CYCLES)
                .context(OpenTableSnafu)?;
            for (cycle, baker) in &self.deleted_baker_cycles {
                CycleStore::delete_baker_cycle(&mut baker_cycles, *cycle, *baker)
                    .context(RowsSnafu)?;
            }
            for row in &self.baker_cycles {
                CycleStore::put_baker_cycle(&mut baker_cycles, row).context(RowsSnafu)?;
            }
        }

        {
            let mut rights = txn
                .open_table(Tables::BAKING_RIGHTS)
                .context(OpenTableSnafu)?;
            for (level, round) in &self.deleted_rights {
                RightsStore::delete(&mut rights, *level, *round).context(RowsSnafu)?;
            }
            for right in &self.rights {
                RightsStore::put(&mut rights, right).context(RowsSnafu)?;
            }
        }

        {
            let mut slashes = txn
                .open_table(Tables::PENDING_SLASHES)
                .context(OpenTableSnafu)?;
            for (level, op_id) in &self.deleted_pending_slashes {
                SlashStore::delete(&mut slashes, *level, *op_id).context(RowsSnafu)?;
            }
            for slash in &self.pending_slashes {
                SlashStore::put(&mut slashes, slash).context(RowsSnafu)?;
            }
        }

        {
            let mut statistics = txn.open_table(Tables::STATISTICS).context(OpenTableSnafu)?;
            if let Some(level) = self.deleted_statistics {
                StatisticsStore::delete(&mut statistics, level).context(RowsSnafu)?;
            }
            if let Some(stats) = &self.statistics {
                StatisticsStore::put(&mut statistics, stats).context(RowsSnafu)?;
            }
        }

        if let Some(chain) = &self.chain {
            let mut table = txn.open_table(Tables::CHAIN).context(OpenTableSnafu)?;
            ChainStore::put(&mut table, chain).context(RowsSnafu)?;
        }

        Ok(())
    }
}
