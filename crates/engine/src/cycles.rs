//! Cycle boundary processing.
//!
//! Three concerns live here, each with an exact mirror for revert:
//!
//! - the per-block right realization (marking the produced slot and the
//!   missed rounds, and rolling the producer's cycle aggregates),
//! - the slash sweep that fires pending slashes at their due level,
//! - the cycle-end materialization of a future cycle's rights from the
//!   stake snapshot.

use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use snafu::{OptionExt, ResultExt};
use tracing::debug;

use tzmirror_storage::{
    AccountStore, CycleStore, OperationStore, RightsStore, SlashStore, Tables,
};
use tzmirror_types::{
    AccountId, BakerCycle, BakingRight, Cycle, CycleIndex, Operation, OperationId,
    OperationPayload, PendingSlash, RightStatus,
};

use crate::context::Ctx;
use crate::error::{EngineSnafu, InvariantSnafu, Result, RowsSnafu, TableSnafu};
use crate::rights::{derive_seed, sample_baker, StakeWeight};

/// In-block overlay of baker-cycle rows.
///
/// A block can touch the same row more than once (realization, then a
/// slash against the producer), so rows are edited here and staged into
/// the unit of work in one pass at the end of the block.
#[derive(Default)]
pub struct BakerCycleScratch {
    rows: HashMap<(CycleIndex, i64), BakerCycle>,
}

impl BakerCycleScratch {
    /// Mutable access to a row, faulting in from storage and creating a
    /// fresh aggregate for bakers absent from the cycle's snapshot.
    pub fn get_or_create<'s>(
        &'s mut self,
        ctx: &Ctx<'_>,
        cycle: CycleIndex,
        baker_id: AccountId,
    ) -> Result<&'s mut BakerCycle> {
        match self.rows.entry((cycle, baker_id.value())) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let stored = {
                    let txn = ctx.store.begin_read().context(EngineSnafu)?;
                    let table = txn.open_table(Tables::BAKER_CYCLES).context(TableSnafu)?;
                    CycleStore::get_baker_cycle(&table, cycle, baker_id).context(RowsSnafu)?
                };
                let row = stored.unwrap_or_else(|| BakerCycle::new(cycle, baker_id, 0));
                Ok(entry.insert(row))
            }
        }
    }

    /// Seeds the scratch with a freshly materialized row.
    pub fn put(&mut self, row: BakerCycle) {
        self.rows.insert((row.cycle, row.baker_id.value()), row);
    }

    /// Stages every edited row into the unit of work.
    pub fn stage(self, ctx: &mut Ctx<'_>) {
        for row in self.rows.into_values() {
            ctx.uow.upsert_baker_cycle(row);
        }
    }
}

/// Whether `cycle` has a materialized row, meaning its round-0 rights
/// exist for every level.
fn cycle_materialized(ctx: &Ctx<'_>, cycle: CycleIndex) -> Result<bool> {
    let txn = ctx.store.begin_read().context(EngineSnafu)?;
    let table = txn.open_table(Tables::CYCLES).context(TableSnafu)?;
    Ok(CycleStore::get(&table, cycle).context(RowsSnafu)?.is_some())
}

/// Marks the block's right realized, lower rounds missed, and rolls the
/// producer's cycle aggregates forward.
pub fn realize_right(ctx: &mut Ctx<'_>, scratch: &mut BakerCycleScratch) -> Result<()> {
    let level = ctx.block.level;
    if level == 0 {
        return Ok(());
    }
    let producer_id = ctx.block.producer_id.context(InvariantSnafu {
        message: format!("block {level} has no producer for right realization"),
    })?;
    let round = ctx.block.round;
    let cycle = ctx.constants.cycle_of(level);
    let materialized = cycle_materialized(ctx, cycle)?;
    let store = ctx.store;

    let existing = move |r: i32| -> Result<Option<BakingRight>> {
        let txn = store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::BAKING_RIGHTS).context(TableSnafu)?;
        RightsStore::get(&table, level, r).context(RowsSnafu)
    };

    for r in 0..round {
        if let Some(mut right) = existing(r)? {
            right.status = RightStatus::Missed;
            ctx.uow.upsert_right(right);
        }
    }
    match existing(round)? {
        Some(mut right) => {
            right.status = RightStatus::Realized;
            ctx.uow.upsert_right(right);
        }
        None => ctx.uow.upsert_right(BakingRight {
            cycle,
            level,
            round,
            baker_id: producer_id,
            status: RightStatus::Realized,
        }),
    }

    let reward = ctx.block.total_reward();
    let baking_reward = ctx.constants.baking_reward;
    let row = scratch.get_or_create(ctx, cycle, producer_id)?;
    row.blocks += 1;
    row.block_rewards += reward;
    if round == 0 && materialized {
        row.future_blocks -= 1;
        row.future_block_rewards -= baking_reward;
    }
    Ok(())
}

/// Mirror of [`realize_right`].
pub fn revert_realization(ctx: &mut Ctx<'_>, scratch: &mut BakerCycleScratch) -> Result<()> {
    let level = ctx.block.level;
    if level == 0 {
        return Ok(());
    }
    let producer_id = ctx.block.producer_id.context(InvariantSnafu {
        message: format!("block {level} has no producer to revert realization"),
    })?;
    let round = ctx.block.round;
    let cycle = ctx.constants.cycle_of(level);
    let materialized = cycle_materialized(ctx, cycle)?;

    let reward = ctx.block.total_reward();
    let baking_reward = ctx.constants.baking_reward;
    {
        let row = scratch.get_or_create(ctx, cycle, producer_id)?;
        row.blocks -= 1;
        row.block_rewards -= reward;
        if round == 0 && materialized {
            row.future_blocks += 1;
            row.future_block_rewards += baking_reward;
        }
    }

    let store = ctx.store;
    let existing = move |r: i32| -> Result<Option<BakingRight>> {
        let txn = store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::BAKING_RIGHTS).context(TableSnafu)?;
        RightsStore::get(&table, level, r).context(RowsSnafu)
    };

    if round == 0 && materialized {
        if let Some(mut right) = existing(0)? {
            right.status = RightStatus::Future;
            ctx.uow.upsert_right(right);
        }
    } else {
        // The realized right was created at apply time.
        ctx.uow.remove_right(level, round);
    }
    for r in 0..round {
        if let Some(mut right) = existing(r)? {
            right.status = RightStatus::Future;
            ctx.uow.upsert_right(right);
        }
    }
    Ok(())
}

fn stored_operation(ctx: &Ctx<'_>, id: OperationId) -> Result<Operation> {
    let txn = ctx.store.begin_read().context(EngineSnafu)?;
    let table = txn.open_table(Tables::OPERATIONS).context(TableSnafu)?;
    OperationStore::get(&table, id)
        .context(RowsSnafu)?
        .context(InvariantSnafu {
            message: format!("pending slash points at missing operation {id}"),
        })
}

fn slashes_due(ctx: &Ctx<'_>) -> Result<Vec<PendingSlash>> {
    let txn = ctx.store.begin_read().context(EngineSnafu)?;
    let table = txn.open_table(Tables::PENDING_SLASHES).context(TableSnafu)?;
    SlashStore::due_at(&table, ctx.block.level).context(RowsSnafu)
}

/// Fires every pending slash due at the block being applied.
///
/// The slashed amounts are computed from the offender's stake at firing
/// time and persisted into the evidence row, so revert restores from the
/// stored values rather than recomputing.
pub fn sweep_slashes(ctx: &mut Ctx<'_>, scratch: &mut BakerCycleScratch) -> Result<()> {
    let percent = i64::from(ctx.constants.double_baking_slash_percent);
    let reward_percent = i64::from(ctx.constants.accuser_reward_percent);
    let cycle = ctx.constants.cycle_of(ctx.block.level);

    for mut slash in slashes_due(ctx)? {
        if slash.applied {
            return InvariantSnafu {
                message: format!("slash for {} already applied at its due level", slash.op_id),
            }
            .fail();
        }
        // The evidence block is long past; its parties may be cold.
        ctx.account(slash.offender_id)?;
        ctx.account(slash.accuser_id)?;

        let offender = ctx.account_mut(slash.offender_id)?;
        let data = offender.delegate_mut().context(InvariantSnafu {
            message: format!("slash offender {} is not a delegate", slash.offender_id),
        })?;
        let lost_own = data.own_staked * percent / 100;
        let lost_external = data.external_staked * percent / 100;
        data.own_staked -= lost_own;
        data.external_staked -= lost_external;
        let total = lost_own + lost_external;
        ctx.uow.note_balance_delta(-total);

        let accuser_reward = total * reward_percent / 100;
        ctx.credit(slash.accuser_id, accuser_reward)?;
        // The remainder of the slashed stake leaves circulation.
        ctx.uow.note_burned(total - accuser_reward);

        let mut op = stored_operation(ctx, slash.op_id)?;
        match &mut op.payload {
            OperationPayload::DoubleBaking(evidence) => {
                evidence.lost_own_staked = Some(lost_own);
                evidence.lost_external_staked = Some(lost_external);
                evidence.accuser_reward = Some(accuser_reward);
            }
            _ => {
                return InvariantSnafu {
                    message: format!("pending slash {} is not double-baking evidence", slash.op_id),
                }
                .fail()
            }
        }
        ctx.uow.add_operation(op);

        scratch
            .get_or_create(ctx, cycle, slash.offender_id)?
            .lost_staked += total;

        debug!(
            op = %slash.op_id,
            offender = %slash.offender_id,
            lost_own,
            lost_external,
            accuser_reward,
            "applied deferred slash"
        );

        slash.applied = true;
        ctx.uow.add_pending_slash(slash);
    }
    Ok(())
}

/// Mirror of [`sweep_slashes`], restoring from the persisted amounts.
pub fn revert_sweep(ctx: &mut Ctx<'_>, scratch: &mut BakerCycleScratch) -> Result<()> {
    let cycle = ctx.constants.cycle_of(ctx.block.level);

    for mut slash in slashes_due(ctx)? {
        if !slash.applied {
            return InvariantSnafu {
                message: format!("reverting sweep found unapplied slash for {}", slash.op_id),
            }
            .fail();
        }
        ctx.account(slash.offender_id)?;
        ctx.account(slash.accuser_id)?;

        let mut op = stored_operation(ctx, slash.op_id)?;
        let (lost_own, lost_external, accuser_reward) = match &mut op.payload {
            OperationPayload::DoubleBaking(evidence) => {
                let values = (
                    evidence.lost_own_staked.take(),
                    evidence.lost_external_staked.take(),
                    evidence.accuser_reward.take(),
                );
                match values {
                    (Some(own), Some(external), Some(reward)) => (own, external, reward),
                    _ => {
                        return InvariantSnafu {
                            message: format!("applied slash {} has no stored amounts", slash.op_id),
                        }
                        .fail()
                    }
                }
            }
            _ => {
                return InvariantSnafu {
                    message: format!("pending slash {} is not double-baking evidence", slash.op_id),
                }
                .fail()
            }
        };
        let total = lost_own + lost_external;

        scratch
            .get_or_create(ctx, cycle, slash.offender_id)?
            .lost_staked -= total;

        ctx.uow.note_burned(-(total - accuser_reward));
        ctx.debit(slash.accuser_id, accuser_reward)?;

        let offender = ctx.account_mut(slash.offender_id)?;
        let data = offender.delegate_mut().context(InvariantSnafu {
            message: format!("slash offender {} is not a delegate", slash.offender_id),
        })?;
        data.external_staked += lost_external;
        data.own_staked += lost_own;
        ctx.uow.note_balance_delta(total);

        ctx.uow.add_operation(op);
        slash.applied = false;
        ctx.uow.add_pending_slash(slash);
    }
    Ok(())
}

/// Stake snapshot at the current point of the block: storage rows
/// overlaid with the block's not-yet-flushed account mutations.
fn stake_snapshot(ctx: &Ctx<'_>) -> Result<Vec<StakeWeight>> {
    let mut by_id: BTreeMap<i64, i64> = BTreeMap::new();
    {
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::ACCOUNTS).context(TableSnafu)?;
        for account in AccountStore::delegates(&table).context(RowsSnafu)? {
            by_id.insert(account.id.value(), account.baking_power());
        }
    }
    for id in ctx.cache.accounts.dirty_ids() {
        if let Some(account) = ctx.cache.accounts.get(id) {
            let power = account.baking_power();
            if power > 0 {
                by_id.insert(id.value(), power);
            } else {
                by_id.remove(&id.value());
            }
        }
    }
    Ok(by_id
        .into_iter()
        .map(|(id, power)| StakeWeight { baker_id: AccountId::new(id), power })
        .collect())
}

/// Materializes the rights of one future cycle from a snapshot and seed.
/// Shared by the boundary path, bootstrap and context migrations.
pub fn materialize_cycle(
    ctx: &mut Ctx<'_>,
    index: CycleIndex,
    seed: [u8; 32],
    snapshot: &[StakeWeight],
) -> Result<()> {
    let first_level = ctx.constants.cycle_start(index);
    let last_level = ctx.constants.cycle_end(index);
    let total_baking_power: i64 = snapshot.iter().map(|w| w.power).sum();

    let mut future_blocks: HashMap<i64, i32> = HashMap::new();
    for level in first_level..=last_level {
        let baker_id = sample_baker(&seed, level, 0, snapshot).context(InvariantSnafu {
            message: format!("empty stake snapshot materializing cycle {index}"),
        })?;
        *future_blocks.entry(baker_id.value()).or_default() += 1;
        ctx.uow.upsert_right(BakingRight {
            cycle: index,
            level,
            round: 0,
            baker_id,
            status: RightStatus::Future,
        });
    }

    for weight in snapshot {
        let blocks = future_blocks
            .get(&weight.baker_id.value())
            .copied()
            .unwrap_or(0);
        let mut row = BakerCycle::new(index, weight.baker_id, weight.power);
        row.future_blocks = blocks;
        row.future_block_rewards = i64::from(blocks) * ctx.constants.baking_reward;
        ctx.uow.upsert_baker_cycle(row);
    }

    ctx.uow.upsert_cycle(Cycle {
        index,
        first_level,
        last_level,
        seed,
        total_baking_power,
        total_bakers: i32::try_from(snapshot.len()).unwrap_or(i32::MAX),
    });
    Ok(())
}

/// Removes every row [`materialize_cycle`] produced for `index`.
pub fn dematerialize_cycle(ctx: &mut Ctx<'_>, index: CycleIndex) -> Result<()> {
    let first_level = ctx.constants.cycle_start(index);
    let last_level = ctx.constants.cycle_end(index);

    let bakers = {
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::BAKER_CYCLES).context(TableSnafu)?;
        CycleStore::baker_cycles_of(&table, index).context(RowsSnafu)?
    };
    for row in bakers {
        ctx.uow.remove_baker_cycle(index, row.baker_id);
    }
    for level in first_level..=last_level {
        ctx.uow.remove_right(level, 0);
    }
    ctx.uow.remove_cycle(index);
    Ok(())
}

/// Runs the cycle-end materialization when the block closes a cycle.
///
/// The future cycle is the one whose rights become needed next: current
/// cycle + 1 + the consensus rights delay.
pub fn process_cycle_end(ctx: &mut Ctx<'_>) -> Result<()> {
    let level = ctx.block.level;
    if !ctx.constants.is_cycle_end(level) {
        return Ok(());
    }
    let current = ctx.constants.cycle_of(level);
    let future = current + 1 + ctx.constants.consensus_rights_delay;

    let previous_seed = {
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::CYCLES).context(TableSnafu)?;
        CycleStore::get(&table, future - 1)
            .context(RowsSnafu)?
            .context(InvariantSnafu {
                message: format!("cycle {} missing while materializing {future}", future - 1),
            })?
            .seed
    };
    let seed = derive_seed(&previous_seed, future);
    let snapshot = stake_snapshot(ctx)?;
    materialize_cycle(ctx, future, seed, &snapshot)?;
    ctx.chain.cycles_count = future + 1;

    debug!(cycle = future, bakers = snapshot.len(), "materialized future cycle");
    Ok(())
}

/// Mirror of [`process_cycle_end`].
pub fn revert_cycle_end(ctx: &mut Ctx<'_>) -> Result<()> {
    let level = ctx.block.level;
    if !ctx.constants.is_cycle_end(level) {
        return Ok(());
    }
    let current = ctx.constants.cycle_of(level);
    let future = current + 1 + ctx.constants.consensus_rights_delay;
    dematerialize_cycle(ctx, future)?;
    ctx.chain.cycles_count = future;
    Ok(())
}
