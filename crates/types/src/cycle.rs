//! Cycle and per-baker cycle aggregate rows.

use serde::{Deserialize, Serialize};

use crate::{AccountId, CycleIndex, Level};

/// One cycle row, created when the cycle's rights are materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cycle {
    /// Cycle index (primary key).
    pub index: CycleIndex,
    /// First level of the cycle.
    pub first_level: Level,
    /// Last level of the cycle.
    pub last_level: Level,
    /// Seed the rights sampler was run with.
    pub seed: [u8; 32],
    /// Total baking power across all bakers in the snapshot.
    pub total_baking_power: i64,
    /// Number of bakers with nonzero power in the snapshot.
    pub total_bakers: i32,
}

/// Per-cycle aggregates for one baker.
///
/// Created at cycle materialization with the `future_*` side populated;
/// the realized side is updated incrementally as the cycle's blocks are
/// applied, and decremented symmetrically on revert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakerCycle {
    /// Cycle index.
    pub cycle: CycleIndex,
    /// Baker account id.
    pub baker_id: AccountId,
    /// Baking power at the cycle's snapshot.
    pub baking_power: i64,
    /// Blocks this baker holds round-0 rights for.
    pub future_blocks: i32,
    /// Blocks this baker has actually produced so far.
    pub blocks: i32,
    /// Expected block rewards for the cycle, in mutez.
    pub future_block_rewards: i64,
    /// Block rewards actually earned so far, in mutez.
    pub block_rewards: i64,
    /// Own stake lost to slashing during the cycle, in mutez.
    pub lost_staked: i64,
}

impl BakerCycle {
    /// Fresh aggregate for a baker entering a materialized cycle.
    pub fn new(cycle: CycleIndex, baker_id: AccountId, baking_power: i64) -> Self {
        Self {
            cycle,
            baker_id,
            baking_power,
            future_blocks: 0,
            blocks: 0,
            future_block_rewards: 0,
            block_rewards: 0,
            lost_staked: 0,
        }
    }
}
