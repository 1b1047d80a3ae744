//! End-to-end replay tests.
//!
//! Each test drives a [`ProtocolHandler`] over an in-memory database,
//! applying raw blocks and reverting them. The conservation diagnostic
//! is enabled throughout, so every commit and revert also self-checks
//! that balance mutations equal issuance minus burn. Round-trip tests
//! compare full storage snapshots: a reverted block must leave every
//! row and counter exactly as it found them.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};
use redb::WriteTransaction;

use tzmirror_engine::commits::{flag_of, CommitRegistry};
use tzmirror_engine::{
    BootstrapAccount, BootstrapParams, EngineContext, NoFallback, PostCommitStage,
    ProtocolHandler, RightsFallback,
};
use tzmirror_storage::{
    AccountStore, BlockStore, ChainStore, CycleStore, OperationStore, ProtocolStore, RightsStore,
    SlashStore, StatisticsStore, StorageEngine, Tables,
};
use tzmirror_types::config::{CacheConfig, EngineConfig};
use tzmirror_types::raw::{
    BalanceUpdateKind, RawBalanceUpdate, RawBlock, RawBlockMetadata, RawDoubleBaking,
    RawEvidenceHeader, RawHeader, RawInternalResult, RawOperationContent, RawOperationGroup,
    RawOperationResult, RawStaker, RawTransaction, RawTransactionMetadata, GROUP_ANONYMOUS,
    GROUP_MANAGER, OPERATION_GROUPS,
};
use tzmirror_types::{
    Account, BakerCycle, BakingRight, Block, ChainState, Cycle, Level, Operation, OperationKind,
    OperationPayload, PendingSlash, Protocol, ProtocolCode, ProtocolConstants, Statistics,
};

const PROTO: &str = "PtReplayTestProtoV1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const PROTO2: &str = "PtReplayTestProtoV2aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const ALICE: &str = "tz1alice";
const BOB: &str = "tz1bob";
const CAROL: &str = "tz1carol";

/// Levels and cycles covered by storage snapshots.
const SCAN_LEVELS: Level = 32;
const SCAN_CYCLES: i32 = 8;

fn constants() -> ProtocolConstants {
    ProtocolConstants {
        blocks_per_cycle: 4,
        consensus_rights_delay: 1,
        baking_reward: 1_000,
        baking_bonus: 500,
        double_baking_slash_percent: 10,
        slashing_delay_cycles: 1,
        accuser_reward_percent: 50,
    }
}

fn handler() -> ProtocolHandler {
    ProtocolHandler::new(PROTO, constants(), CommitRegistry::standard())
}

fn upgraded_constants() -> ProtocolConstants {
    ProtocolConstants {
        baking_reward: 2_000,
        baking_bonus: 1_000,
        ..constants()
    }
}

fn upgraded_handler() -> ProtocolHandler {
    ProtocolHandler::new(PROTO2, upgraded_constants(), CommitRegistry::standard())
}

fn bootstrap_params() -> BootstrapParams {
    BootstrapParams {
        accounts: vec![
            BootstrapAccount { address: ALICE.to_string(), balance: 1_000_000, delegate: true },
            BootstrapAccount { address: BOB.to_string(), balance: 500_000, delegate: true },
            BootstrapAccount { address: CAROL.to_string(), balance: 500, delegate: false },
        ],
    }
}

fn engine_with(fallback: Box<dyn RightsFallback + Send>) -> EngineContext {
    let store = StorageEngine::open_in_memory().expect("open storage");
    let mut engine = EngineContext::open(
        store,
        &CacheConfig::default(),
        EngineConfig { fallback_protocol: None, validation: true, diagnostics: true },
        fallback,
    )
    .expect("open engine");
    engine.bootstrap = Some(bootstrap_params());
    engine
}

fn engine() -> EngineContext {
    engine_with(Box::new(NoFallback))
}

/// Fallback answering every right lookup with one fixed delegate.
struct FixedRight(&'static str);

impl RightsFallback for FixedRight {
    fn baking_right(&self, _level: Level, _round: i32) -> tzmirror_engine::Result<Option<String>> {
        Ok(Some(self.0.to_string()))
    }
}

fn timestamp(level: Level) -> DateTime<Utc> {
    Utc.timestamp_opt(1_000_000 + i64::from(level) * 8, 0)
        .single()
        .expect("valid timestamp")
}

/// A raw block with empty operation groups, baked by `baker`.
fn raw_block(level: Level, baker: &str) -> RawBlock {
    let operations = if level == 0 {
        Vec::new()
    } else {
        vec![Vec::new(); OPERATION_GROUPS]
    };
    RawBlock {
        protocol: PROTO.to_string(),
        hash: format!("B{level}"),
        header: RawHeader {
            level,
            predecessor: if level == 0 { String::new() } else { format!("B{}", level - 1) },
            timestamp: timestamp(level),
            payload_round: 0,
        },
        metadata: RawBlockMetadata {
            protocol: PROTO.to_string(),
            next_protocol: PROTO.to_string(),
            proposer: baker.to_string(),
            baker: baker.to_string(),
            balance_updates: Vec::new(),
        },
        operations,
    }
}

/// Adds a liquid baking reward: a mint entry paired with a contract
/// credit to the proposer.
fn add_liquid_reward(raw: &mut RawBlock, amount: i64) {
    raw.metadata.balance_updates.push(RawBalanceUpdate {
        kind: BalanceUpdateKind::Minted,
        category: Some("baking rewards".to_string()),
        contract: None,
        delegate: None,
        staker: None,
        change: -amount,
    });
    raw.metadata.balance_updates.push(RawBalanceUpdate {
        kind: BalanceUpdateKind::Contract,
        category: None,
        contract: Some(raw.metadata.proposer.clone()),
        delegate: None,
        staker: None,
        change: amount,
    });
}

/// Adds a staked baking reward: a mint entry paired with a freezer
/// credit to the proposer's own stake.
fn add_staked_reward(raw: &mut RawBlock, amount: i64) {
    raw.metadata.balance_updates.push(RawBalanceUpdate {
        kind: BalanceUpdateKind::Minted,
        category: Some("baking rewards".to_string()),
        contract: None,
        delegate: None,
        staker: None,
        change: -amount,
    });
    raw.metadata.balance_updates.push(RawBalanceUpdate {
        kind: BalanceUpdateKind::Freezer,
        category: None,
        contract: None,
        delegate: Some(raw.metadata.proposer.clone()),
        staker: Some(RawStaker::Baker { baker: raw.metadata.proposer.clone() }),
        change: amount,
    });
}

fn transaction(
    source: &str,
    destination: &str,
    amount: i64,
    fee: i64,
    counter: i64,
    applied: bool,
) -> RawTransaction {
    RawTransaction {
        source: source.to_string(),
        destination: destination.to_string(),
        amount,
        fee,
        counter,
        metadata: RawTransactionMetadata {
            operation_result: RawOperationResult {
                status: if applied { "applied" } else { "failed" }.to_string(),
            },
            internal_operation_results: Vec::new(),
        },
    }
}

fn internal_transfer(source: &str, destination: &str, amount: i64) -> RawInternalResult {
    RawInternalResult {
        kind: "transaction".to_string(),
        source: source.to_string(),
        destination: Some(destination.to_string()),
        amount: Some(amount),
        result: RawOperationResult { status: "applied".to_string() },
    }
}

fn push_manager(raw: &mut RawBlock, hash: &str, tx: RawTransaction) {
    raw.operations[GROUP_MANAGER].push(RawOperationGroup {
        hash: hash.to_string(),
        contents: vec![RawOperationContent::Transaction(tx)],
    });
}

fn push_evidence(raw: &mut RawBlock, hash: &str, accused_level: Level, accused_round: i32) {
    let header = RawEvidenceHeader { level: accused_level, payload_round: accused_round };
    raw.operations[GROUP_ANONYMOUS].push(RawOperationGroup {
        hash: hash.to_string(),
        contents: vec![RawOperationContent::DoubleBakingEvidence(RawDoubleBaking {
            bh1: header.clone(),
            bh2: header,
        })],
    });
}

fn commit(handler: &ProtocolHandler, engine: &mut EngineContext, raw: &RawBlock) {
    handler
        .commit_block(engine, raw)
        .unwrap_or_else(|err| panic!("commit of level {} failed: {err}", raw.header.level));
}

/// Everything observable in storage, for round-trip comparison.
#[derive(Debug, PartialEq)]
struct Snapshot {
    chain: ChainState,
    accounts: Vec<Account>,
    blocks: Vec<Block>,
    operations: Vec<Operation>,
    protocols: Vec<Protocol>,
    statistics: Vec<Statistics>,
    rights: Vec<BakingRight>,
    cycles: Vec<Cycle>,
    baker_cycles: Vec<BakerCycle>,
    slashes: Vec<PendingSlash>,
}

fn snapshot(engine: &EngineContext) -> Snapshot {
    let txn = engine.store.begin_read().expect("read txn");
    let mut chain = ChainStore::get(&txn.open_table(Tables::CHAIN).expect("chain table"))
        .expect("chain row")
        .unwrap_or_else(ChainState::empty);
    // The reorg flag is head metadata, not replayed state.
    chain.reorganized = false;

    let accounts = AccountStore::all(&txn.open_table(Tables::ACCOUNTS).expect("accounts table"))
        .expect("account rows");

    let blocks_table = txn.open_table(Tables::BLOCKS).expect("blocks table");
    let stats_table = txn.open_table(Tables::STATISTICS).expect("stats table");
    let level_index = txn.open_table(Tables::LEVEL_OPERATIONS).expect("level index");
    let ops_table = txn.open_table(Tables::OPERATIONS).expect("ops table");
    let slash_table = txn.open_table(Tables::PENDING_SLASHES).expect("slash table");

    let mut blocks = Vec::new();
    let mut statistics = Vec::new();
    let mut operations = Vec::new();
    let mut slashes = Vec::new();
    for level in 0..=SCAN_LEVELS {
        if let Some(block) = BlockStore::get(&blocks_table, level).expect("block row") {
            blocks.push(block);
        }
        if let Some(stats) = StatisticsStore::get(&stats_table, level).expect("stats row") {
            statistics.push(stats);
        }
        for id in OperationStore::ids_at_level_desc(&level_index, level).expect("level ids") {
            operations.push(
                OperationStore::get(&ops_table, id)
                    .expect("op row")
                    .expect("indexed op present"),
            );
        }
        slashes.extend(SlashStore::due_at(&slash_table, level).expect("slash rows"));
    }

    let protocols_table = txn.open_table(Tables::PROTOCOLS).expect("protocols table");
    let mut protocols = Vec::new();
    for code in 0..4 {
        if let Some(protocol) =
            ProtocolStore::get(&protocols_table, ProtocolCode::new(code)).expect("protocol row")
        {
            protocols.push(protocol);
        }
    }

    let rights = RightsStore::in_levels(
        &txn.open_table(Tables::BAKING_RIGHTS).expect("rights table"),
        0,
        SCAN_LEVELS,
    )
    .expect("right rows");

    let cycles_table = txn.open_table(Tables::CYCLES).expect("cycles table");
    let baker_table = txn.open_table(Tables::BAKER_CYCLES).expect("baker cycles table");
    let mut cycles = Vec::new();
    let mut baker_cycles = Vec::new();
    for index in 0..SCAN_CYCLES {
        if let Some(cycle) = CycleStore::get(&cycles_table, index).expect("cycle row") {
            cycles.push(cycle);
        }
        baker_cycles
            .extend(CycleStore::baker_cycles_of(&baker_table, index).expect("baker cycle rows"));
    }

    Snapshot {
        chain,
        accounts,
        blocks,
        operations,
        protocols,
        statistics,
        rights,
        cycles,
        baker_cycles,
        slashes,
    }
}

fn account<'a>(snap: &'a Snapshot, address: &str) -> &'a Account {
    snap.accounts
        .iter()
        .find(|a| a.address == address)
        .unwrap_or_else(|| panic!("account {address} not in snapshot"))
}

#[test]
fn test_genesis_bootstrap_seeds_chain() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));

    assert_eq!(engine.chain.level, 0);
    assert_eq!(engine.chain.hash, "B0");
    assert_eq!(engine.chain.protocol, PROTO);
    // Cycles 0..=consensus_rights_delay get rights up front.
    assert_eq!(engine.chain.cycles_count, 2);

    let snap = snapshot(&engine);
    assert_eq!(snap.accounts.len(), 3);
    assert_eq!(account(&snap, ALICE).balance, 1_000_000);
    assert!(account(&snap, ALICE).delegate().is_some());
    assert!(account(&snap, CAROL).delegate().is_none());

    let stats = snap.statistics.last().expect("genesis statistics");
    assert_eq!(stats.total_issued, 1_500_500);
    assert_eq!(stats.total_burned, 0);
    assert_eq!(stats.total_accounts, 3);

    // One round-0 right per level of the two materialized cycles.
    assert_eq!(snap.rights.len(), 8);
    assert_eq!(snap.cycles.len(), 2);
}

#[test]
fn test_transaction_moves_funds_and_pays_fee_to_proposer() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));

    let mut raw = raw_block(1, ALICE);
    add_liquid_reward(&mut raw, 1_000);
    push_manager(&mut raw, "opCarolPays", transaction(CAROL, "tz1dave", 300, 100, 1, true));
    commit(&handler, &mut engine, &raw);

    let snap = snapshot(&engine);
    let carol = account(&snap, CAROL);
    assert_eq!(carol.balance, 100);
    assert_eq!(carol.counter, 1);
    assert_eq!(carol.transactions_count, 1);
    let dave = account(&snap, "tz1dave");
    assert_eq!(dave.balance, 300);
    assert_eq!(dave.first_level, 1);
    assert_eq!(dave.id.value(), 4);
    assert_eq!(account(&snap, ALICE).balance, 1_000_000 + 1_000 + 100);

    let block = snap.blocks.last().expect("block row");
    assert_eq!(block.fees, 100);
    assert!(block.operations.contains(flag_of(OperationKind::Transaction)));
    assert!(block.created_accounts);

    let stats = snap.statistics.last().expect("statistics");
    assert_eq!(stats.total_issued, 1_500_500 + 1_000);
    assert_eq!(stats.total_accounts, 4);
}

#[test]
fn test_failed_transaction_still_pays_fee() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));

    let mut raw = raw_block(1, ALICE);
    push_manager(&mut raw, "opFails", transaction(CAROL, "tz1dave", 300, 100, 1, false));
    commit(&handler, &mut engine, &raw);

    let snap = snapshot(&engine);
    assert_eq!(account(&snap, CAROL).balance, 400);
    assert_eq!(account(&snap, CAROL).transactions_count, 1);
    // The target is created and tallied even though no funds moved.
    assert_eq!(account(&snap, "tz1dave").balance, 0);
    assert_eq!(account(&snap, "tz1dave").transactions_count, 1);
    assert_eq!(account(&snap, ALICE).balance, 1_000_100);
}

#[test]
fn test_reverted_block_restores_every_row() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));

    let before = snapshot(&engine);

    let mut raw = raw_block(1, ALICE);
    add_liquid_reward(&mut raw, 1_000);
    push_manager(&mut raw, "opCarolPays", transaction(CAROL, "tz1dave", 300, 100, 1, true));
    commit(&handler, &mut engine, &raw);
    handler.revert_last_block(&mut engine).expect("revert");

    assert_eq!(snapshot(&engine), before);
    assert!(engine.chain.reorganized);
    assert_eq!(engine.chain.level, 0);

    // Released account ids are handed out again: the next creation
    // reuses the id the reverted block allocated.
    let mut retry = raw_block(1, ALICE);
    push_manager(&mut retry, "opEve", transaction(CAROL, "tz1eve", 10, 5, 1, true));
    commit(&handler, &mut engine, &retry);
    let snap = snapshot(&engine);
    assert_eq!(account(&snap, "tz1eve").id.value(), 4);
}

#[test]
fn test_internal_transfers_revert_in_descending_id_order() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));

    let before = snapshot(&engine);

    let mut raw = raw_block(1, ALICE);
    let mut tx = transaction(CAROL, "tz1dave", 300, 100, 1, true);
    tx.metadata.internal_operation_results = vec![
        internal_transfer("tz1dave", "tz1eve", 50),
        internal_transfer("tz1eve", CAROL, 20),
    ];
    push_manager(&mut raw, "opNested", tx);
    commit(&handler, &mut engine, &raw);

    let snap = snapshot(&engine);
    assert_eq!(account(&snap, CAROL).balance, 500 - 300 - 100 + 20);
    assert_eq!(account(&snap, "tz1dave").balance, 250);
    assert_eq!(account(&snap, "tz1eve").balance, 30);

    // Parent first, subs after, ids strictly increasing; the level
    // index yields them in reverse for revert.
    assert_eq!(snap.operations.len(), 3);
    let mut ids: Vec<_> = snap.operations.iter().map(|op| op.id).collect();
    assert!(ids.windows(2).all(|w| w[0] > w[1]));
    ids.reverse();
    assert_eq!(ids[0].parent(), ids[0]);
    assert_eq!(ids[1].parent(), ids[0]);
    assert_eq!(ids[2].parent(), ids[0]);

    handler.revert_last_block(&mut engine).expect("revert");
    assert_eq!(snapshot(&engine), before);
}

#[test]
fn test_cycle_end_round_trips() {
    let handler = handler();
    let mut engine = engine();
    for level in 0..=3 {
        commit(&handler, &mut engine, &raw_block(level, ALICE));
    }
    let before = snapshot(&engine);

    // Level 4 closes cycle 0 and materializes cycle 2.
    commit(&handler, &mut engine, &raw_block(4, ALICE));
    let after = snapshot(&engine);
    assert_eq!(after.cycles.len(), 3);
    assert_eq!(engine.chain.cycles_count, 3);

    handler.revert_last_block(&mut engine).expect("revert");
    assert_eq!(snapshot(&engine), before);
    assert_eq!(engine.chain.cycles_count, 2);
}

/// A raw block carried by the upgraded protocol.
fn upgrade_block(level: Level, baker: &str) -> RawBlock {
    let mut raw = raw_block(level, baker);
    raw.protocol = PROTO2.to_string();
    raw.metadata.protocol = PROTO2.to_string();
    raw.metadata.next_protocol = PROTO2.to_string();
    raw
}

#[test]
fn test_protocol_activation_round_trips() {
    let v1 = handler();
    let v2 = upgraded_handler();
    let mut engine = engine();
    commit(&v1, &mut engine, &raw_block(0, ALICE));
    let mut announce = raw_block(1, ALICE);
    announce.metadata.next_protocol = PROTO2.to_string();
    commit(&v1, &mut engine, &announce);
    let before = snapshot(&engine);

    // Mid-cycle activation at level 2.
    commit(&v2, &mut engine, &upgrade_block(2, ALICE));

    let after = snapshot(&engine);
    assert_eq!(engine.chain.protocol, PROTO2);
    assert_eq!(after.protocols.len(), 2);
    let old = after.protocols.iter().find(|p| p.hash == PROTO).expect("old protocol");
    assert_eq!(old.last_level, Some(1));
    let new = after.protocols.iter().find(|p| p.hash == PROTO2).expect("new protocol");
    assert_eq!(new.first_level, 2);
    // Cycle 1 has not started, so its expected rewards follow the new
    // parameter table.
    let rescaled: Vec<_> = after.baker_cycles.iter().filter(|r| r.cycle == 1).collect();
    assert!(!rescaled.is_empty());
    for row in rescaled {
        assert_eq!(row.future_block_rewards, i64::from(row.future_blocks) * 2_000);
    }

    v2.revert_last_block(&mut engine).expect("revert activation");
    assert_eq!(snapshot(&engine), before);
    assert_eq!(engine.chain.protocol, PROTO);
}

#[test]
fn test_activation_on_cycle_boundary_round_trips() {
    let v1 = handler();
    let v2 = upgraded_handler();
    let mut engine = engine();
    for level in 0..=2 {
        commit(&v1, &mut engine, &raw_block(level, ALICE));
    }
    let mut announce = raw_block(3, ALICE);
    announce.metadata.next_protocol = PROTO2.to_string();
    commit(&v1, &mut engine, &announce);
    let before = snapshot(&engine);

    // Level 4 activates the upgrade and closes cycle 0, so the block
    // both rescales cycle 1 and materializes cycle 2.
    commit(&v2, &mut engine, &upgrade_block(4, ALICE));

    let after = snapshot(&engine);
    assert_eq!(after.cycles.len(), 3);
    assert_eq!(engine.chain.cycles_count, 3);
    assert!(after.baker_cycles.iter().any(|r| r.cycle == 2));

    v2.revert_last_block(&mut engine).expect("revert activation");
    assert_eq!(snapshot(&engine), before);
    assert_eq!(engine.chain.cycles_count, 2);
    // The dematerialized cycle leaves no aggregate rows behind.
    assert!(!snapshot(&engine).baker_cycles.iter().any(|r| r.cycle == 2));
}

#[test]
fn test_deferred_slash_fires_at_due_level_and_round_trips() {
    let handler = handler();
    let mut engine = engine_with(Box::new(FixedRight(BOB)));

    commit(&handler, &mut engine, &raw_block(0, ALICE));

    // Bob earns staked rewards, so there is stake to slash later.
    let mut staked = raw_block(1, BOB);
    add_staked_reward(&mut staked, 10_000);
    commit(&handler, &mut engine, &staked);

    // Evidence accusing (level 1, round 1): no materialized right for
    // round 1, so the offender comes from the fallback.
    let mut evidence = raw_block(2, ALICE);
    push_evidence(&mut evidence, "opEvidence", 1, 1);
    commit(&handler, &mut engine, &evidence);

    let snap = snapshot(&engine);
    let bob = account(&snap, BOB);
    assert_eq!(bob.delegate().expect("delegate").double_baking_count, 1);
    assert_eq!(bob.delegate().expect("delegate").own_staked, 10_000);
    assert_eq!(account(&snap, ALICE).delegate().expect("delegate").accusations_count, 1);
    let pending = snap.slashes.first().expect("pending slash");
    assert!(!pending.applied);
    // Accused cycle 0 plus one slashing-delay cycle ends at level 8.
    assert_eq!(pending.slashed_level, 8);

    for level in 3..=7 {
        commit(&handler, &mut engine, &raw_block(level, ALICE));
    }
    let before_sweep = snapshot(&engine);

    commit(&handler, &mut engine, &raw_block(8, ALICE));
    let swept = snapshot(&engine);
    // 10 percent of bob's own stake, half of it rewarded to alice.
    assert_eq!(account(&swept, BOB).delegate().expect("delegate").own_staked, 9_000);
    assert_eq!(account(&swept, ALICE).balance, 1_000_500);
    assert!(swept.slashes.first().expect("slash").applied);
    let evidence_row = swept
        .operations
        .iter()
        .find_map(|op| match &op.payload {
            OperationPayload::DoubleBaking(row) => Some(row),
            _ => None,
        })
        .expect("evidence row");
    assert_eq!(evidence_row.lost_own_staked, Some(1_000));
    assert_eq!(evidence_row.lost_external_staked, Some(0));
    assert_eq!(evidence_row.accuser_reward, Some(500));
    let stats = swept.statistics.last().expect("statistics");
    assert_eq!(stats.total_burned, 500);

    handler.revert_last_block(&mut engine).expect("revert sweep");
    assert_eq!(snapshot(&engine), before_sweep);
    let restored = snapshot(&engine);
    assert_eq!(account(&restored, BOB).delegate().expect("delegate").own_staked, 10_000);
    assert!(!restored.slashes.first().expect("slash").applied);
}

#[test]
fn test_reverting_genesis_empties_the_mirror() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));
    let seeded = snapshot(&engine);

    handler.revert_last_block(&mut engine).expect("revert genesis");
    assert_eq!(engine.chain.level, -1);
    assert!(engine.chain.reorganized);
    let emptied = snapshot(&engine);
    assert!(emptied.accounts.is_empty());
    assert!(emptied.rights.is_empty());
    assert!(emptied.cycles.is_empty());
    assert!(emptied.statistics.is_empty());

    // Bootstrapping again reproduces the seeded state exactly.
    commit(&handler, &mut engine, &raw_block(0, ALICE));
    assert_eq!(snapshot(&engine), seeded);
}

/// Stage recording which levels it was asked to stage and unstage.
struct RecordingStage {
    staged: Arc<Mutex<Vec<Level>>>,
    unstaged: Arc<Mutex<Vec<Level>>>,
}

impl PostCommitStage for RecordingStage {
    fn stage(&mut self, _txn: &WriteTransaction, block: &Block) -> tzmirror_engine::Result<()> {
        self.staged.lock().expect("lock").push(block.level);
        Ok(())
    }

    fn unstage(&mut self, _txn: &WriteTransaction, level: Level) -> tzmirror_engine::Result<()> {
        self.unstaged.lock().expect("lock").push(level);
        Ok(())
    }
}

#[test]
fn test_post_commit_stage_runs_on_commit_and_revert() {
    let handler = handler();
    let mut engine = engine();
    let staged = Arc::new(Mutex::new(Vec::new()));
    let unstaged = Arc::new(Mutex::new(Vec::new()));
    engine.post_commit = Box::new(RecordingStage {
        staged: staged.clone(),
        unstaged: unstaged.clone(),
    });

    commit(&handler, &mut engine, &raw_block(0, ALICE));
    commit(&handler, &mut engine, &raw_block(1, ALICE));
    handler.revert_last_block(&mut engine).expect("revert");

    assert_eq!(*staged.lock().expect("lock"), vec![0, 1]);
    assert_eq!(*unstaged.lock().expect("lock"), vec![1]);
}

#[test]
fn test_failed_commit_leaves_state_untouched() {
    let handler = handler();
    let mut engine = engine();
    commit(&handler, &mut engine, &raw_block(0, ALICE));
    commit(&handler, &mut engine, &raw_block(1, ALICE));
    let before = snapshot(&engine);

    let mut forked = raw_block(2, ALICE);
    forked.header.predecessor = "B1-forked".to_string();
    let err = handler
        .commit_block(&mut engine, &forked)
        .expect_err("predecessor mismatch");
    assert!(!err.is_retryable());

    assert_eq!(engine.chain.level, 1);
    assert_eq!(snapshot(&engine), before);

    // The engine accepts the correct successor afterwards.
    commit(&handler, &mut engine, &raw_block(2, ALICE));
    assert_eq!(engine.chain.level, 2);
}
