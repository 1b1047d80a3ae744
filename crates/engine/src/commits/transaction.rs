//! Transaction commit.
//!
//! The worked example of a manager operation: fee payment, the global
//! and per-sender manager counters, the amount move, participation
//! tallies, and internal results stored as sub-operation rows. Revert
//! walks the same lines with the signs flipped.

use snafu::OptionExt;

use tzmirror_types::raw::RawOperationContent;
use tzmirror_types::{
    Operation, OperationKind, OperationPayload, TransactionOp, TransactionStatus,
};

use crate::context::Ctx;
use crate::error::{IndexError, InvariantSnafu, Result};

/// Commit for top-level and internal transfers.
#[derive(Debug)]
pub struct TransactionCommit;

impl TransactionCommit {
    fn apply_transfer(
        ctx: &mut Ctx<'_>,
        row: &TransactionOp,
    ) -> Result<()> {
        if row.status == TransactionStatus::Applied {
            ctx.debit(row.sender_id, row.amount)?;
            ctx.credit(row.target_id, row.amount)?;
        }
        ctx.account_mut(row.sender_id)?.transactions_count += 1;
        if row.target_id != row.sender_id {
            ctx.account_mut(row.target_id)?.transactions_count += 1;
        }
        Ok(())
    }

    fn revert_transfer(ctx: &mut Ctx<'_>, row: &TransactionOp) -> Result<()> {
        if row.target_id != row.sender_id {
            ctx.account_mut(row.target_id)?.transactions_count -= 1;
        }
        ctx.account_mut(row.sender_id)?.transactions_count -= 1;
        if row.status == TransactionStatus::Applied {
            ctx.debit(row.target_id, row.amount)?;
            ctx.credit(row.sender_id, row.amount)?;
        }
        Ok(())
    }
}

impl super::OperationCommit for TransactionCommit {
    fn kind(&self) -> OperationKind {
        OperationKind::Transaction
    }

    fn apply(
        &self,
        ctx: &mut Ctx<'_>,
        group_hash: &str,
        content: &RawOperationContent,
    ) -> Result<Vec<Operation>> {
        let RawOperationContent::Transaction(tx) = content else {
            return InvariantSnafu {
                message: "transaction commit dispatched on wrong content".to_string(),
            }
            .fail();
        };

        let proposer_id = ctx.block.proposer_id.context(InvariantSnafu {
            message: "block proposer unresolved before operation dispatch".to_string(),
        })?;
        let (sender_id, _) = ctx.resolve_or_create(&tx.source)?;
        let (target_id, target_created) = ctx.resolve_or_create(&tx.destination)?;

        // Fees are paid even by failed operations.
        ctx.debit(sender_id, tx.fee)?;
        ctx.credit(proposer_id, tx.fee)?;
        ctx.block.fees += tx.fee;

        let id = ctx.chain.counters.next_operation_id();
        ctx.chain.counters.next_manager_counter();
        ctx.account_mut(sender_id)?.counter = tx.counter;

        let parent = TransactionOp {
            sender_id,
            target_id,
            amount: tx.amount,
            fee: tx.fee,
            counter: tx.counter,
            status: if tx.metadata.operation_result.is_applied() {
                TransactionStatus::Applied
            } else {
                TransactionStatus::Failed
            },
            target_created,
        };
        Self::apply_transfer(ctx, &parent)?;

        let mut rows = vec![Operation {
            id,
            level: ctx.block.level,
            timestamp: ctx.block.timestamp,
            hash: group_hash.to_string(),
            payload: OperationPayload::Transaction(parent),
        }];

        for (n, internal) in tx.metadata.internal_operation_results.iter().enumerate() {
            if internal.kind != "transaction" {
                continue;
            }
            let destination = internal.destination.as_deref().context(InvariantSnafu {
                message: "internal transaction without destination".to_string(),
            })?;
            let sub_id = id.with_sub(sub_index(n)?).context(InvariantSnafu {
                message: format!("sub-id overflow in operation group {group_hash}"),
            })?;
            let source_id = ctx.resolve_existing(&internal.source)?;
            let (dest_id, dest_created) = ctx.resolve_or_create(destination)?;
            let sub = TransactionOp {
                sender_id: source_id,
                target_id: dest_id,
                amount: internal.amount.unwrap_or(0),
                fee: 0,
                counter: 0,
                status: if internal.result.is_applied() {
                    TransactionStatus::Applied
                } else {
                    TransactionStatus::Failed
                },
                target_created: dest_created,
            };
            Self::apply_transfer(ctx, &sub)?;
            rows.push(Operation {
                id: sub_id,
                level: ctx.block.level,
                timestamp: ctx.block.timestamp,
                hash: group_hash.to_string(),
                payload: OperationPayload::Transaction(sub),
            });
        }

        Ok(rows)
    }

    fn revert(&self, ctx: &mut Ctx<'_>, op: &Operation) -> Result<()> {
        let OperationPayload::Transaction(tx) = &op.payload else {
            return InvariantSnafu {
                message: format!("transaction revert dispatched on wrong payload for {}", op.id),
            }
            .fail();
        };

        Self::revert_transfer(ctx, tx)?;

        // Sub rows carry no fee, no counters and no allocations.
        if op.id.parent() != op.id {
            ctx.uow.remove_operation(op.level, op.id);
            return Ok(());
        }

        let proposer_id = ctx.block.proposer_id.context(InvariantSnafu {
            message: format!("block proposer missing while reverting {}", op.id),
        })?;
        // The counter the sender had before this operation consumed one.
        ctx.account_mut(tx.sender_id)?.counter = tx.counter - 1;
        ctx.chain.counters.release_manager_counters(1);
        ctx.chain.counters.release_operation_ids(1);

        ctx.debit(proposer_id, tx.fee)?;
        ctx.credit(tx.sender_id, tx.fee)?;
        ctx.block.fees -= tx.fee;

        ctx.uow.remove_operation(op.level, op.id);
        Ok(())
    }
}

/// Sub-operation index for the `n`-th internal result (1-based; 0 is the
/// parent itself).
fn sub_index(n: usize) -> Result<u32> {
    u32::try_from(n + 1).map_err(|_| IndexError::Invariant {
        message: "internal result index exceeds u32".to_string(),
    })
}
