//! Block rows and per-block operation flags.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Level, ProtocolCode};

/// Bit-flags recording which operation kinds a block contains.
///
/// Kept as a plain `u32` newtype so the row stays postcard-compact and
/// queries can test membership without decoding operation rows.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperationFlags(u32);

impl OperationFlags {
    pub const NONE: OperationFlags = OperationFlags(0);
    pub const ENDORSEMENTS: OperationFlags = OperationFlags(1);
    pub const BALLOTS: OperationFlags = OperationFlags(1 << 1);
    pub const PROPOSALS: OperationFlags = OperationFlags(1 << 2);
    pub const ACTIVATIONS: OperationFlags = OperationFlags(1 << 3);
    pub const DOUBLE_BAKINGS: OperationFlags = OperationFlags(1 << 4);
    pub const DOUBLE_ENDORSINGS: OperationFlags = OperationFlags(1 << 5);
    pub const NONCE_REVELATIONS: OperationFlags = OperationFlags(1 << 6);
    pub const DELEGATIONS: OperationFlags = OperationFlags(1 << 7);
    pub const ORIGINATIONS: OperationFlags = OperationFlags(1 << 8);
    pub const TRANSACTIONS: OperationFlags = OperationFlags(1 << 9);
    pub const REVEALS: OperationFlags = OperationFlags(1 << 10);
    pub const STAKING: OperationFlags = OperationFlags(1 << 11);

    /// Sets `flag` on `self`.
    pub fn set(&mut self, flag: OperationFlags) {
        self.0 |= flag.0;
    }

    /// Clears `flag` on `self`.
    pub fn clear(&mut self, flag: OperationFlags) {
        self.0 &= !flag.0;
    }

    /// Whether `flag` is set.
    #[must_use]
    pub fn contains(self, flag: OperationFlags) -> bool {
        self.0 & flag.0 == flag.0
    }
}

/// One block row, one per level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block level (primary key).
    pub level: Level,
    /// Block hash.
    pub hash: String,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
    /// Numeric code of the protocol the block was produced under.
    pub proto: ProtocolCode,
    /// Consensus round the block was produced at.
    pub round: i32,
    /// Delegate that held the round-0 right.
    pub proposer_id: Option<AccountId>,
    /// Delegate that actually produced the block (differs from the
    /// proposer when the block was baked at a later round).
    pub producer_id: Option<AccountId>,
    /// Which operation kinds the block contains.
    pub operations: OperationFlags,
    /// Whether applying this block created new accounts.
    pub created_accounts: bool,
    /// Touch journal: accounts this block touched (but did not create)
    /// and the `last_level` each had before. Revert restores from here;
    /// without it the previous touch level would be unrecoverable.
    pub touched: Vec<(AccountId, Level)>,
    /// Total fees paid inside the block, credited to the proposer.
    pub fees: i64,
    /// Fixed baking reward, liquid part (delegated stake share).
    pub reward_liquid: i64,
    /// Fixed baking reward credited to the baker's own stake.
    pub reward_staked_own: i64,
    /// Fixed baking reward credited to the baker's edge over external stake.
    pub reward_staked_edge: i64,
    /// Fixed baking reward credited to external stakers.
    pub reward_staked_shared: i64,
    /// Baking bonus, liquid part.
    pub bonus_liquid: i64,
    /// Baking bonus credited to the baker's own stake.
    pub bonus_staked_own: i64,
    /// Baking bonus credited to the baker's edge over external stake.
    pub bonus_staked_edge: i64,
    /// Baking bonus credited to external stakers.
    pub bonus_staked_shared: i64,
}

impl Block {
    /// Total amount minted for this block's production.
    #[must_use]
    pub fn total_reward(&self) -> i64 {
        self.reward_liquid
            + self.reward_staked_own
            + self.reward_staked_edge
            + self.reward_staked_shared
            + self.bonus_liquid
            + self.bonus_staked_own
            + self.bonus_staked_edge
            + self.bonus_staked_shared
    }
}
