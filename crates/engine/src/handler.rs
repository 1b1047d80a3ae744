//! Protocol handler: the per-block state machine.
//!
//! [`commit_block`] applies one raw block inside one write transaction;
//! [`revert_last_block`] is its exact mirror. Either path ends in one of
//! two states: the transaction committed and the caches trimmed, or the
//! transaction aborted, the caches dropped and the chain-state restored,
//! as if the call never happened.
//!
//! [`commit_block`]: ProtocolHandler::commit_block
//! [`revert_last_block`]: ProtocolHandler::revert_last_block

use std::collections::BTreeSet;

use redb::WriteTransaction;
use snafu::{ensure, OptionExt, ResultExt};
use tracing::{info, warn};

use tzmirror_storage::{BlockStore, OperationStore, Tables, UnitOfWork};
use tzmirror_types::raw::{RawBlock, OPERATION_GROUPS};
use tzmirror_types::{
    AccountId, Block, ChainState, Level, Operation, OperationFlags, OperationPayload,
    ProtocolCode, ProtocolConstants, Statistics,
};

use crate::commits::{flag_of, raw_kind, CommitRegistry};
use crate::context::{Ctx, EngineContext};
use crate::cycles::{self, BakerCycleScratch};
use crate::error::{
    CommitTxnSnafu, EngineSnafu, FlushSnafu, InvariantSnafu, Result, RowsSnafu, TableSnafu,
    ValidationSnafu,
};
use crate::migration::{self, BootstrapParams};
use crate::rewards;

/// One protocol version's block semantics: its parameter table and its
/// commit registry.
#[derive(Debug)]
pub struct ProtocolHandler {
    hash: String,
    constants: ProtocolConstants,
    commits: CommitRegistry,
}

impl ProtocolHandler {
    /// Builds a handler for one protocol version.
    #[must_use]
    pub fn new(hash: impl Into<String>, constants: ProtocolConstants, commits: CommitRegistry) -> Self {
        Self { hash: hash.into(), constants, commits }
    }

    /// Hash of the protocol this handler implements.
    #[must_use]
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Parameter table in force under this handler.
    #[must_use]
    pub fn constants(&self) -> &ProtocolConstants {
        &self.constants
    }

    /// Structural validation of a raw block against the current head.
    fn validate(&self, chain: &ChainState, raw: &RawBlock) -> Result<()> {
        ensure!(
            !raw.hash.is_empty(),
            ValidationSnafu { message: "block without a hash".to_string() }
        );
        ensure!(
            raw.header.level == chain.level + 1,
            ValidationSnafu {
                message: format!(
                    "block level {} does not follow head {}",
                    raw.header.level, chain.level
                ),
            }
        );
        if chain.level >= 0 {
            ensure!(
                raw.header.predecessor == chain.hash,
                ValidationSnafu {
                    message: format!(
                        "predecessor {} does not match head {}",
                        raw.header.predecessor, chain.hash
                    ),
                }
            );
            ensure!(
                raw.header.timestamp >= chain.timestamp,
                ValidationSnafu { message: "block timestamp regresses".to_string() }
            );
        }
        if raw.header.level > 0 {
            ensure!(
                raw.operations.len() == OPERATION_GROUPS,
                ValidationSnafu {
                    message: format!("expected {OPERATION_GROUPS} operation groups"),
                }
            );
        }
        ensure!(
            raw.metadata.protocol == raw.protocol,
            ValidationSnafu { message: "metadata protocol disagrees with block".to_string() }
        );
        Ok(())
    }

    /// Applies one raw block and commits it atomically.
    ///
    /// On any error the transaction is aborted, the caches dropped and
    /// the chain-state restored; the database is untouched.
    pub fn commit_block(&self, engine: &mut EngineContext, raw: &RawBlock) -> Result<()> {
        let chain_backup = engine.chain.clone();
        let txn = engine.store.begin_write().context(EngineSnafu)?;
        match self.apply_block(engine, &txn, raw) {
            Ok(block) => match txn.commit().context(CommitTxnSnafu) {
                Ok(()) => {
                    let level = block.level;
                    engine.cache.blocks.insert(level, block, level);
                    engine.cache.trim();
                    info!(level, hash = %raw.hash, "committed block");
                    Ok(())
                }
                Err(err) => {
                    engine.chain = chain_backup;
                    engine.cache.reset();
                    Err(err)
                }
            },
            Err(err) => {
                engine.chain = chain_backup;
                engine.cache.reset();
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "failed to abort block transaction");
                }
                Err(err)
            }
        }
    }

    fn apply_block(
        &self,
        engine: &mut EngineContext,
        txn: &WriteTransaction,
        raw: &RawBlock,
    ) -> Result<Block> {
        let level = raw.header.level;
        if engine.options.validation {
            self.validate(&engine.chain, raw)?;
        }
        engine.cache.accounts.preload(&engine.store, raw.participants())?;
        let stats_before = engine.statistics()?;

        let mut uow = UnitOfWork::new();
        let mut scratch = BakerCycleScratch::default();
        let mut block = empty_block_row(level, raw);

        {
            let mut ctx = Ctx {
                store: &engine.store,
                chain: &mut engine.chain,
                cache: &mut engine.cache,
                block: &mut block,
                uow: &mut uow,
                constants: &self.constants,
                rights_fallback: engine.rights_fallback.as_ref(),
            };

            ctx.block.proto = if level == 0 {
                let params = engine.bootstrap.clone().unwrap_or_else(BootstrapParams::default);
                migration::bootstrap(&mut ctx, &params, &self.hash, &self.constants)?
            } else if ctx.chain.protocol != raw.protocol {
                migration::activate(&mut ctx, &self.hash, &self.constants)?
            } else {
                migration::protocol_by_hash(&mut ctx, &raw.protocol)?.code
            };

            if level > 0 {
                rewards::apply_rewards(&mut ctx, raw)?;
                cycles::realize_right(&mut ctx, &mut scratch)?;

                for group in raw.operations.iter().flatten() {
                    for content in &group.contents {
                        let kind = raw_kind(content);
                        let commit = self.commits.get(kind)?;
                        let rows = commit.apply(&mut ctx, &group.hash, content)?;
                        if !rows.is_empty() {
                            ctx.block.operations.set(flag_of(kind));
                        }
                        for row in rows {
                            ctx.uow.add_operation(row);
                        }
                    }
                }

                cycles::sweep_slashes(&mut ctx, &mut scratch)?;
                cycles::process_cycle_end(&mut ctx)?;
            }
            scratch.stage(&mut ctx);

            // Touch pass: bump last_level on everything the block
            // mutated, journaling the previous value for exact revert.
            for id in ctx.cache.accounts.dirty_ids() {
                let account = ctx.cache.accounts.account_mut(id)?;
                if account.first_level != level {
                    ctx.block.touched.push((id, account.last_level));
                    account.last_level = level;
                }
                let staged = account.clone();
                ctx.uow.stage_account(staged);
            }

            let stats = Statistics {
                level,
                total_issued: stats_before.total_issued + ctx.uow.issued(),
                total_burned: stats_before.total_burned + ctx.uow.burned(),
                total_accounts: ctx.chain.counters.accounts_total(),
            };
            ctx.uow.set_statistics(stats);
            ctx.cache.statistics = Some(stats);

            ctx.chain.level = level;
            ctx.chain.hash = raw.hash.clone();
            ctx.chain.timestamp = raw.header.timestamp;
            ctx.chain.protocol = raw.protocol.clone();
            ctx.chain.next_protocol = raw.metadata.next_protocol.clone();
            ctx.chain.reorganized = false;
            ctx.uow.set_chain(ctx.chain.clone());
        }

        uow.set_block(block.clone());
        self.check_conservation(engine, &uow, level)?;
        uow.flush(txn).context(FlushSnafu)?;
        engine.post_commit.stage(txn, &block)?;
        Ok(block)
    }

    /// Reverts the head block, restoring every row and counter to its
    /// pre-block state.
    pub fn revert_last_block(&self, engine: &mut EngineContext) -> Result<()> {
        let level = engine.chain.level;
        ensure!(
            level >= 0,
            InvariantSnafu { message: "no head block to revert".to_string() }
        );
        let (block, predecessor) = {
            let txn = engine.store.begin_read().context(EngineSnafu)?;
            let blocks = txn.open_table(Tables::BLOCKS).context(TableSnafu)?;
            let block = BlockStore::get(&blocks, level)
                .context(RowsSnafu)?
                .context(InvariantSnafu {
                    message: format!("head block {level} has no stored row"),
                })?;
            let predecessor = if level > 0 {
                Some(
                    BlockStore::get(&blocks, level - 1)
                        .context(RowsSnafu)?
                        .context(InvariantSnafu {
                            message: format!("predecessor block {} has no stored row", level - 1),
                        })?,
                )
            } else {
                None
            };
            (block, predecessor)
        };

        let chain_backup = engine.chain.clone();
        let txn = engine.store.begin_write().context(EngineSnafu)?;
        match self.unapply_block(engine, &txn, block, predecessor) {
            Ok(()) => match txn.commit().context(CommitTxnSnafu) {
                Ok(()) => {
                    engine.cache.blocks.remove(&level);
                    engine.cache.statistics = None;
                    engine.cache.trim();
                    info!(level, "reverted block");
                    Ok(())
                }
                Err(err) => {
                    engine.chain = chain_backup;
                    engine.cache.reset();
                    Err(err)
                }
            },
            Err(err) => {
                engine.chain = chain_backup;
                engine.cache.reset();
                if let Err(abort_err) = txn.abort() {
                    warn!(error = %abort_err, "failed to abort revert transaction");
                }
                Err(err)
            }
        }
    }

    fn unapply_block(
        &self,
        engine: &mut EngineContext,
        txn: &WriteTransaction,
        mut block: Block,
        predecessor: Option<Block>,
    ) -> Result<()> {
        let level = block.level;
        let ops = stored_operations_desc(engine, level)?;

        // Revert touches accounts no raw document names, so the warm-up
        // set comes from the stored rows instead.
        let mut participants: BTreeSet<AccountId> = BTreeSet::new();
        participants.extend(block.proposer_id);
        participants.extend(block.producer_id);
        participants.extend(block.touched.iter().map(|(id, _)| *id));
        for op in &ops {
            match &op.payload {
                OperationPayload::Transaction(tx) => {
                    participants.insert(tx.sender_id);
                    participants.insert(tx.target_id);
                }
                OperationPayload::DoubleBaking(evidence) => {
                    participants.insert(evidence.accuser_id);
                    participants.insert(evidence.offender_id);
                }
            }
        }
        for id in participants {
            engine.cache.accounts.get_or_load(&engine.store, id)?;
        }

        let mut uow = UnitOfWork::new();
        let mut scratch = BakerCycleScratch::default();

        {
            let mut ctx = Ctx {
                store: &engine.store,
                chain: &mut engine.chain,
                cache: &mut engine.cache,
                block: &mut block,
                uow: &mut uow,
                constants: &self.constants,
                rights_fallback: engine.rights_fallback.as_ref(),
            };

            if level == 0 {
                migration::revert_bootstrap(&mut ctx)?;
            } else {
                let pred = predecessor.as_ref().context(InvariantSnafu {
                    message: format!("reverting block {level} without a predecessor row"),
                })?;
                let crossed_boundary = pred.proto != ctx.block.proto;

                cycles::revert_cycle_end(&mut ctx)?;
                cycles::revert_sweep(&mut ctx, &mut scratch)?;

                for op in &ops {
                    let commit = self.commits.get(op.kind())?;
                    commit.revert(&mut ctx, op)?;
                }

                cycles::revert_realization(&mut ctx, &mut scratch)?;
                rewards::revert_rewards(&mut ctx)?;
                if crossed_boundary {
                    migration::deactivate(&mut ctx, &self.hash)?;
                }
            }
            scratch.stage(&mut ctx);

            // Mirror of the touch pass: previous touch levels come back
            // from the journal, creations of this block are deleted and
            // their ids released.
            let journal = ctx.block.touched.clone();
            for (id, previous) in journal {
                ctx.cache.accounts.get_or_load(ctx.store, id)?;
                ctx.cache.accounts.account_mut(id)?.last_level = previous;
            }
            let mut created = 0i64;
            for id in ctx.cache.accounts.dirty_ids() {
                let account = ctx
                    .cache
                    .accounts
                    .get(id)
                    .cloned()
                    .context(InvariantSnafu {
                        message: format!("dirty account {id} missing from cache"),
                    })?;
                if account.first_level == level {
                    ctx.cache.accounts.remove(id);
                    ctx.uow.delete_account(account);
                    created += 1;
                } else {
                    ctx.uow.stage_account(account);
                }
            }
            ctx.chain.counters.release_account_ids(created);

            ctx.uow.remove_statistics(level);
            match predecessor {
                Some(pred) => {
                    let protocol = migration::protocol_by_code(&mut ctx, pred.proto)?;
                    ctx.chain.level = pred.level;
                    ctx.chain.hash = pred.hash.clone();
                    ctx.chain.timestamp = pred.timestamp;
                    ctx.chain.protocol = protocol.hash;
                    ctx.chain.next_protocol = self.hash.clone();
                    ctx.chain.reorganized = true;
                }
                None => {
                    *ctx.chain = ChainState::empty();
                    ctx.chain.reorganized = true;
                }
            }
            ctx.uow.remove_block(level);
            ctx.uow.set_chain(ctx.chain.clone());
        }

        self.check_conservation(engine, &uow, level)?;
        uow.flush(txn).context(FlushSnafu)?;
        engine.post_commit.unstage(txn, level)?;
        Ok(())
    }

    /// Conservation diagnostic: the signed sum of all balance mutations
    /// must equal net issuance minus net burn.
    fn check_conservation(
        &self,
        engine: &EngineContext,
        uow: &UnitOfWork,
        level: Level,
    ) -> Result<()> {
        if !engine.options.diagnostics {
            return Ok(());
        }
        let expected = uow.issued() - uow.burned();
        ensure!(
            uow.balance_delta() == expected,
            InvariantSnafu {
                message: format!(
                    "conservation violated at level {level}: balance delta {} vs issued-burned {expected}",
                    uow.balance_delta()
                ),
            }
        );
        Ok(())
    }
}

/// Loads every stored operation of one level, in descending id order:
/// the exact reverse of application order.
fn stored_operations_desc(engine: &EngineContext, level: Level) -> Result<Vec<Operation>> {
    let txn = engine.store.begin_read().context(EngineSnafu)?;
    let index = txn
        .open_table(Tables::LEVEL_OPERATIONS)
        .context(TableSnafu)?;
    let ids = OperationStore::ids_at_level_desc(&index, level).context(RowsSnafu)?;
    let table = txn.open_table(Tables::OPERATIONS).context(TableSnafu)?;
    let mut ops = Vec::with_capacity(ids.len());
    for id in ids {
        let op = OperationStore::get(&table, id)
            .context(RowsSnafu)?
            .context(InvariantSnafu {
                message: format!("level index points at missing operation {id}"),
            })?;
        ops.push(op);
    }
    Ok(ops)
}

fn empty_block_row(level: Level, raw: &RawBlock) -> Block {
    Block {
        level,
        hash: raw.hash.clone(),
        timestamp: raw.header.timestamp,
        // Placeholder until the protocol resolution step runs.
        proto: ProtocolCode::new(0),
        round: raw.header.payload_round,
        proposer_id: None,
        producer_id: None,
        operations: OperationFlags::NONE,
        created_accounts: false,
        touched: Vec::new(),
        fees: 0,
        reward_liquid: 0,
        reward_staked_own: 0,
        reward_staked_edge: 0,
        reward_staked_shared: 0,
        bonus_liquid: 0,
        bonus_staked_own: 0,
        bonus_staked_edge: 0,
        bonus_staked_shared: 0,
    }
}
