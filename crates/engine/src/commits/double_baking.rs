//! Double-baking evidence commit.
//!
//! The worked example of a two-phase operation. Phase one (here)
//! resolves accuser and offender, bumps the accusation tallies and
//! persists a [`PendingSlash`] for the deferred effect. Phase two is the
//! boundary sweep in the block handler, which fires the slash when the
//! chain reaches `slashed_level`.
//!
//! [`PendingSlash`]: tzmirror_types::PendingSlash

use snafu::{OptionExt, ResultExt};

use tzmirror_storage::{RightsStore, Tables};
use tzmirror_types::raw::RawOperationContent;
use tzmirror_types::{
    AccountId, DoubleBakingOp, Level, Operation, OperationKind, OperationPayload, PendingSlash,
};

use crate::context::Ctx;
use crate::error::{EngineSnafu, InvariantSnafu, Result, RowsSnafu, TableSnafu};

/// Commit for double-baking evidence.
#[derive(Debug)]
pub struct DoubleBakingCommit;

impl DoubleBakingCommit {
    /// Resolves the delegate that held the accused right.
    ///
    /// Materialized rights are authoritative; the fallback covers
    /// evidence accusing levels older than the earliest materialized
    /// cycle. No answer from either source is fatal.
    fn resolve_offender(ctx: &mut Ctx<'_>, level: Level, round: i32) -> Result<AccountId> {
        let materialized = {
            let txn = ctx.store.begin_read().context(EngineSnafu)?;
            let table = txn.open_table(Tables::BAKING_RIGHTS).context(TableSnafu)?;
            RightsStore::get(&table, level, round).context(RowsSnafu)?
        };
        if let Some(right) = materialized {
            return Ok(right.baker_id);
        }
        let address = ctx
            .rights_fallback
            .baking_right(level, round)?
            .context(InvariantSnafu {
                message: format!("no right holder known for level {level} round {round}"),
            })?;
        let (id, _) = ctx.resolve_or_create(&address)?;
        let block_level = ctx.block.level;
        ctx.account_mut(id)?.promote_to_delegate(block_level);
        Ok(id)
    }
}

impl super::OperationCommit for DoubleBakingCommit {
    fn kind(&self) -> OperationKind {
        OperationKind::DoubleBaking
    }

    fn apply(
        &self,
        ctx: &mut Ctx<'_>,
        group_hash: &str,
        content: &RawOperationContent,
    ) -> Result<Vec<Operation>> {
        let RawOperationContent::DoubleBakingEvidence(evidence) = content else {
            return InvariantSnafu {
                message: "double-baking commit dispatched on wrong content".to_string(),
            }
            .fail();
        };

        let accused_level = evidence.bh1.level;
        let accused_round = evidence.bh1.payload_round;
        let accuser_id = ctx.block.proposer_id.context(InvariantSnafu {
            message: "block proposer unresolved before operation dispatch".to_string(),
        })?;
        let offender_id = Self::resolve_offender(ctx, accused_level, accused_round)?;

        let accused_cycle = ctx.constants.cycle_of(accused_level);
        let slashed_level = ctx
            .constants
            .cycle_end(accused_cycle + ctx.constants.slashing_delay_cycles);

        let id = ctx.chain.counters.next_operation_id();

        let offender = ctx.account_mut(offender_id)?;
        offender
            .delegate_mut()
            .context(InvariantSnafu {
                message: format!("double-baking offender {offender_id} is not a delegate"),
            })?
            .double_baking_count += 1;
        let accuser = ctx.account_mut(accuser_id)?;
        accuser
            .delegate_mut()
            .context(InvariantSnafu {
                message: format!("accuser {accuser_id} is not a delegate"),
            })?
            .accusations_count += 1;

        ctx.uow.add_pending_slash(PendingSlash {
            op_id: id,
            offender_id,
            accuser_id,
            slashed_level,
            applied: false,
        });

        Ok(vec![Operation {
            id,
            level: ctx.block.level,
            timestamp: ctx.block.timestamp,
            hash: group_hash.to_string(),
            payload: OperationPayload::DoubleBaking(DoubleBakingOp {
                accuser_id,
                offender_id,
                accused_level,
                accused_round,
                slashed_level,
                lost_own_staked: None,
                lost_external_staked: None,
                accuser_reward: None,
            }),
        }])
    }

    fn revert(&self, ctx: &mut Ctx<'_>, op: &Operation) -> Result<()> {
        let OperationPayload::DoubleBaking(evidence) = &op.payload else {
            return InvariantSnafu {
                message: format!("double-baking revert dispatched on wrong payload for {}", op.id),
            }
            .fail();
        };
        // The slash fires at a later cycle end; that block reverts first.
        if evidence.lost_own_staked.is_some() {
            return InvariantSnafu {
                message: format!("reverting evidence {} with its slash still applied", op.id),
            }
            .fail();
        }

        let accuser = ctx.account_mut(evidence.accuser_id)?;
        accuser
            .delegate_mut()
            .context(InvariantSnafu {
                message: format!("accuser {} is not a delegate", evidence.accuser_id),
            })?
            .accusations_count -= 1;
        let offender = ctx.account_mut(evidence.offender_id)?;
        offender
            .delegate_mut()
            .context(InvariantSnafu {
                message: format!("offender {} is not a delegate", evidence.offender_id),
            })?
            .double_baking_count -= 1;

        ctx.uow.remove_pending_slash(evidence.slashed_level, op.id);
        ctx.chain.counters.release_operation_ids(1);
        ctx.uow.remove_operation(op.level, op.id);
        Ok(())
    }
}
