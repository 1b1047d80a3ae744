//! Stored operation rows.
//!
//! One closed tagged union with a case per operation kind. The engine
//! dispatches on [`OperationKind`] through a lookup table; adding a kind
//! means adding a payload case and registering its commit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{AccountId, Level, OperationId};

/// Operation kind discriminator, in the protocol-mandated dispatch order
/// (consensus first, then voting, anonymous, manager).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum OperationKind {
    Endorsement,
    Ballot,
    Proposal,
    Activation,
    DoubleBaking,
    DoubleEndorsing,
    NonceRevelation,
    Reveal,
    Delegation,
    Origination,
    Transaction,
    Staking,
}

/// One stored operation row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// Operation id: `(monotonic counter) << SUB_ID_BITS`.
    pub id: OperationId,
    /// Level of the containing block.
    pub level: Level,
    /// Timestamp of the containing block.
    pub timestamp: DateTime<Utc>,
    /// Hash of the containing operation group.
    pub hash: String,
    /// Kind-specific payload.
    pub payload: OperationPayload,
}

impl Operation {
    /// Kind discriminator for dispatch-table lookup.
    #[must_use]
    pub fn kind(&self) -> OperationKind {
        match &self.payload {
            OperationPayload::Transaction(_) => OperationKind::Transaction,
            OperationPayload::DoubleBaking(_) => OperationKind::DoubleBaking,
        }
    }
}

/// Per-kind payloads. Only the kinds the engine implements commits for
/// are represented; the enum is the single place a new kind plugs in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationPayload {
    Transaction(TransactionOp),
    DoubleBaking(DoubleBakingOp),
}

/// Result status of a manager operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    Applied,
    Failed,
}

/// A transfer of funds, possibly with internal results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionOp {
    /// Sender account.
    pub sender_id: AccountId,
    /// Destination account.
    pub target_id: AccountId,
    /// Transferred amount, in mutez.
    pub amount: i64,
    /// Fee paid to the block proposer, in mutez.
    pub fee: i64,
    /// Manager counter consumed by this operation.
    pub counter: i64,
    /// Result status.
    pub status: TransactionStatus,
    /// Whether applying this operation created the destination account.
    pub target_created: bool,
}

/// Double-baking evidence with its two-phase slash bookkeeping.
///
/// Phase one records accuser and offender at the evidence block. Phase
/// two applies the slash when the chain reaches `slashed_level`; only
/// then are the `lost_*` fields populated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoubleBakingOp {
    /// Delegate that included the evidence (the block proposer).
    pub accuser_id: AccountId,
    /// Delegate accused of baking twice.
    pub offender_id: AccountId,
    /// Level the offender baked twice at.
    pub accused_level: Level,
    /// Round the offender baked twice at.
    pub accused_round: i32,
    /// Cycle-end level at which the slash is applied.
    pub slashed_level: Level,
    /// Own stake slashed; `None` until the slash phase runs.
    pub lost_own_staked: Option<i64>,
    /// External stake slashed; `None` until the slash phase runs.
    pub lost_external_staked: Option<i64>,
    /// Portion of the slash paid to the accuser as a denunciation reward;
    /// `None` until the slash phase runs.
    pub accuser_reward: Option<i64>,
}

/// One scheduled slash, persisted so deferred effects survive restarts.
///
/// The boundary sweep applies every pending slash whose `slashed_level`
/// equals the block being committed and marks it `applied`; reverting
/// that block clears the mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSlash {
    /// Evidence operation that scheduled this slash.
    pub op_id: OperationId,
    /// Delegate to be slashed.
    pub offender_id: AccountId,
    /// Delegate to be rewarded for the denunciation.
    pub accuser_id: AccountId,
    /// Cycle-end level the slash fires at.
    pub slashed_level: Level,
    /// Whether the sweep has fired this slash. Kept (not deleted) after
    /// firing so reverting the boundary block can un-fire it exactly.
    pub applied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SUB_ID_BITS;

    fn transaction_row() -> Operation {
        Operation {
            id: OperationId::new(1 << SUB_ID_BITS),
            level: 5,
            timestamp: DateTime::<Utc>::MIN_UTC,
            hash: "oo1".into(),
            payload: OperationPayload::Transaction(TransactionOp {
                sender_id: AccountId::new(1),
                target_id: AccountId::new(2),
                amount: 300,
                fee: 100,
                counter: 1,
                status: TransactionStatus::Applied,
                target_created: false,
            }),
        }
    }

    #[test]
    fn test_kind_matches_payload() {
        assert_eq!(transaction_row().kind(), OperationKind::Transaction);
    }
}
