//! Baking-right rows.

use serde::{Deserialize, Serialize};

use crate::{AccountId, CycleIndex, Level};

/// Lifecycle of a materialized right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RightStatus {
    /// Not yet reached by the chain.
    Future,
    /// The baker produced the block for this right.
    Realized,
    /// The level passed and a different baker produced the block.
    Missed,
}

/// One materialized baking right: which baker may produce the block at
/// `(level, round)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BakingRight {
    /// Cycle the right belongs to.
    pub cycle: CycleIndex,
    /// Block level.
    pub level: Level,
    /// Consensus round.
    pub round: i32,
    /// Baker holding the right.
    pub baker_id: AccountId,
    /// Current status.
    pub status: RightStatus,
}
