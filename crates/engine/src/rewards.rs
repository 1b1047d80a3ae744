//! Block production rewards.
//!
//! The node reports rewards as paired balance updates: one `minted`
//! entry naming the category, immediately followed by the credit entry
//! saying which bucket receives the amount. Any other shape is a
//! validation failure; guessing at reward routing would silently corrupt
//! the mirror.

use snafu::OptionExt;

use tzmirror_types::raw::{BalanceUpdateKind, RawBlock, RawStaker};
use tzmirror_types::AccountId;

use crate::context::Ctx;
use crate::error::{InvariantSnafu, Result, ValidationSnafu};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RewardCategory {
    /// Fixed baking reward, credited to the round-0 proposer.
    Reward,
    /// Inclusion bonus, credited to the actual producer.
    Bonus,
}

/// Resolves proposer and producer, opens their block tallies, and
/// applies every reward balance update.
pub fn apply_rewards(ctx: &mut Ctx<'_>, raw: &RawBlock) -> Result<()> {
    let level = ctx.block.level;
    let (proposer_id, _) = ctx.resolve_or_create(&raw.metadata.proposer)?;
    let (producer_id, _) = ctx.resolve_or_create(&raw.metadata.baker)?;
    ctx.account_mut(proposer_id)?.promote_to_delegate(level);
    ctx.account_mut(producer_id)?.promote_to_delegate(level);
    ctx.block.proposer_id = Some(proposer_id);
    ctx.block.producer_id = Some(producer_id);
    ctx.account_mut(producer_id)?
        .delegate_mut()
        .context(InvariantSnafu {
            message: format!("producer {producer_id} is not a delegate"),
        })?
        .blocks_count += 1;

    let mut pending: Option<(RewardCategory, i64)> = None;
    for update in &raw.metadata.balance_updates {
        match update.kind {
            BalanceUpdateKind::Minted => {
                if pending.is_some() {
                    return ValidationSnafu {
                        message: "mint entry without a matching credit".to_string(),
                    }
                    .fail();
                }
                let category = match update.category.as_deref() {
                    Some("baking rewards") => RewardCategory::Reward,
                    Some("baking bonuses") => RewardCategory::Bonus,
                    other => {
                        return ValidationSnafu {
                            message: format!("unexpected mint category {other:?}"),
                        }
                        .fail()
                    }
                };
                // The mint sink goes negative by the minted amount.
                pending = Some((category, -update.change));
            }
            BalanceUpdateKind::Contract => {
                let (category, amount) = pending.take().context(ValidationSnafu {
                    message: "credit entry without a preceding mint".to_string(),
                })?;
                if update.change != amount {
                    return ValidationSnafu {
                        message: format!(
                            "mint of {amount} followed by credit of {}",
                            update.change
                        ),
                    }
                    .fail();
                }
                let target = match category {
                    RewardCategory::Reward => proposer_id,
                    RewardCategory::Bonus => producer_id,
                };
                expect_address(update.contract.as_deref(), ctx, target)?;
                ctx.credit(target, amount)?;
                match category {
                    RewardCategory::Reward => ctx.block.reward_liquid += amount,
                    RewardCategory::Bonus => ctx.block.bonus_liquid += amount,
                }
                ctx.uow.note_issued(amount);
            }
            BalanceUpdateKind::Freezer => {
                let (category, amount) = pending.take().context(ValidationSnafu {
                    message: "freezer entry without a preceding mint".to_string(),
                })?;
                if update.change != amount {
                    return ValidationSnafu {
                        message: format!(
                            "mint of {amount} followed by freezer credit of {}",
                            update.change
                        ),
                    }
                    .fail();
                }
                let target = match category {
                    RewardCategory::Reward => proposer_id,
                    RewardCategory::Bonus => producer_id,
                };
                let staker = update.staker.as_ref().context(ValidationSnafu {
                    message: "freezer entry without a staker bucket".to_string(),
                })?;
                match (category, staker) {
                    (RewardCategory::Reward, RawStaker::Baker { .. }) => {
                        ctx.credit_own_stake(target, amount)?;
                        ctx.block.reward_staked_own += amount;
                    }
                    (RewardCategory::Reward, RawStaker::BakerEdge { .. }) => {
                        ctx.credit_own_stake(target, amount)?;
                        ctx.block.reward_staked_edge += amount;
                    }
                    (RewardCategory::Reward, RawStaker::Shared { .. }) => {
                        ctx.credit_external_stake(target, amount)?;
                        ctx.block.reward_staked_shared += amount;
                    }
                    (RewardCategory::Bonus, RawStaker::Baker { .. }) => {
                        ctx.credit_own_stake(target, amount)?;
                        ctx.block.bonus_staked_own += amount;
                    }
                    (RewardCategory::Bonus, RawStaker::BakerEdge { .. }) => {
                        ctx.credit_own_stake(target, amount)?;
                        ctx.block.bonus_staked_edge += amount;
                    }
                    (RewardCategory::Bonus, RawStaker::Shared { .. }) => {
                        ctx.credit_external_stake(target, amount)?;
                        ctx.block.bonus_staked_shared += amount;
                    }
                }
                ctx.uow.note_issued(amount);
            }
            BalanceUpdateKind::Burned | BalanceUpdateKind::Accumulator => {
                return ValidationSnafu {
                    message: "unexpected balance update kind in block rewards".to_string(),
                }
                .fail();
            }
        }
    }
    if pending.is_some() {
        return ValidationSnafu {
            message: "trailing mint entry without a credit".to_string(),
        }
        .fail();
    }
    Ok(())
}

/// Undoes the reward stage from the stored block row.
pub fn revert_rewards(ctx: &mut Ctx<'_>) -> Result<()> {
    let proposer_id = ctx.block.proposer_id.context(InvariantSnafu {
        message: format!("block {} has no proposer to revert", ctx.block.level),
    })?;
    let producer_id = ctx.block.producer_id.context(InvariantSnafu {
        message: format!("block {} has no producer to revert", ctx.block.level),
    })?;

    let reward_liquid = ctx.block.reward_liquid;
    let reward_own = ctx.block.reward_staked_own + ctx.block.reward_staked_edge;
    let reward_shared = ctx.block.reward_staked_shared;
    let bonus_liquid = ctx.block.bonus_liquid;
    let bonus_own = ctx.block.bonus_staked_own + ctx.block.bonus_staked_edge;
    let bonus_shared = ctx.block.bonus_staked_shared;

    ctx.debit(proposer_id, reward_liquid)?;
    ctx.credit_own_stake(proposer_id, -reward_own)?;
    ctx.credit_external_stake(proposer_id, -reward_shared)?;
    ctx.debit(producer_id, bonus_liquid)?;
    ctx.credit_own_stake(producer_id, -bonus_own)?;
    ctx.credit_external_stake(producer_id, -bonus_shared)?;
    ctx.uow.note_issued(-ctx.block.total_reward());

    ctx.account_mut(producer_id)?
        .delegate_mut()
        .context(InvariantSnafu {
            message: format!("producer {producer_id} is not a delegate"),
        })?
        .blocks_count -= 1;
    Ok(())
}

/// Confirms a credit entry names the delegate the category routes to.
/// Revert reconstructs the routing from the category alone, so a
/// mismatch here would make revert inexact.
fn expect_address(named: Option<&str>, ctx: &mut Ctx<'_>, target: AccountId) -> Result<()> {
    let Some(named) = named else {
        return ValidationSnafu {
            message: "contract credit entry without an address".to_string(),
        }
        .fail();
    };
    let expected = ctx.account(target)?.address.clone();
    if named != expected {
        return ValidationSnafu {
            message: format!("reward credit names {named}, expected {expected}"),
        }
        .fail();
    }
    Ok(())
}
