//! Raw node-RPC block model.
//!
//! The RPC client (out of engine scope) hands the engine a parsed
//! [`RawBlock`]. Operations arrive in four ordered groups by kind class:
//! consensus, voting, anonymous/evidence, manager. Amount-like fields
//! come over the wire as decimal strings and are decoded to `i64` here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Level;

/// Number of operation groups in a raw block.
pub const OPERATION_GROUPS: usize = 4;

/// Index of the anonymous/evidence operation group.
pub const GROUP_ANONYMOUS: usize = 2;

/// Index of the manager operation group.
pub const GROUP_MANAGER: usize = 3;

/// One raw block document as returned by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlock {
    /// Hash of the protocol the block was produced under.
    pub protocol: String,
    /// Block hash.
    pub hash: String,
    /// Block header.
    pub header: RawHeader,
    /// Block metadata.
    pub metadata: RawBlockMetadata,
    /// The four ordered operation groups.
    pub operations: Vec<Vec<RawOperationGroup>>,
}

/// Raw block header fields the engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawHeader {
    /// Block level.
    pub level: Level,
    /// Hash of the predecessor block.
    pub predecessor: String,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
    /// Consensus round the block was produced at.
    #[serde(default)]
    pub payload_round: i32,
}

/// Raw block metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBlockMetadata {
    /// Protocol the block was produced under.
    pub protocol: String,
    /// Protocol the next block will be produced under.
    pub next_protocol: String,
    /// Address of the round-0 rights holder.
    pub proposer: String,
    /// Address of the delegate that produced the block.
    pub baker: String,
    /// Block-level balance updates (rewards, bonuses, deposits).
    #[serde(default)]
    pub balance_updates: Vec<RawBalanceUpdate>,
}

/// One operation group: a signed bundle of contents sharing a hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOperationGroup {
    /// Operation group hash.
    pub hash: String,
    /// The contents, applied in order.
    pub contents: Vec<RawOperationContent>,
}

/// One raw operation content, discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawOperationContent {
    Transaction(RawTransaction),
    DoubleBakingEvidence(RawDoubleBaking),
}

/// A raw transaction content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Sender address.
    pub source: String,
    /// Destination address.
    pub destination: String,
    /// Transferred amount, in mutez.
    #[serde(with = "string_i64")]
    pub amount: i64,
    /// Fee, in mutez.
    #[serde(with = "string_i64")]
    pub fee: i64,
    /// Sender's manager counter for this operation.
    #[serde(with = "string_i64")]
    pub counter: i64,
    /// Execution metadata.
    pub metadata: RawTransactionMetadata,
}

/// Execution metadata of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransactionMetadata {
    /// Result of the top-level transfer.
    pub operation_result: RawOperationResult,
    /// Internal results spawned by contract execution, in order.
    #[serde(default)]
    pub internal_operation_results: Vec<RawInternalResult>,
}

/// Result envelope of an operation content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawOperationResult {
    /// `"applied"`, `"failed"`, `"backtracked"` or `"skipped"`.
    pub status: String,
}

impl RawOperationResult {
    /// Whether the content took effect.
    #[must_use]
    pub fn is_applied(&self) -> bool {
        self.status == "applied"
    }
}

/// One internal result spawned inside a manager operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawInternalResult {
    /// Internal operation kind (only `"transaction"` is consumed).
    pub kind: String,
    /// Spawning contract.
    pub source: String,
    /// Destination, for internal transfers.
    #[serde(default)]
    pub destination: Option<String>,
    /// Amount, for internal transfers.
    #[serde(default, with = "opt_string_i64")]
    pub amount: Option<i64>,
    /// Result of the internal content.
    pub result: RawOperationResult,
}

/// Double-baking evidence: two signed headers for the same level/round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawDoubleBaking {
    /// First offending header.
    pub bh1: RawEvidenceHeader,
    /// Second offending header.
    pub bh2: RawEvidenceHeader,
}

/// The header fields evidence resolution needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvidenceHeader {
    /// Accused level.
    pub level: Level,
    /// Accused round.
    #[serde(default)]
    pub payload_round: i32,
}

/// Kind of a balance update entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceUpdateKind {
    /// Supply-side mint (negative change on the minting sink).
    Minted,
    /// Supply-side burn.
    Burned,
    /// Spendable balance of a contract.
    Contract,
    /// Frozen (staked) funds of a delegate.
    Freezer,
    /// Protocol-internal accumulator.
    Accumulator,
}

/// One balance update entry reported by the node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawBalanceUpdate {
    /// Entry kind.
    pub kind: BalanceUpdateKind,
    /// Category, e.g. `"baking rewards"` or `"baking bonuses"`.
    #[serde(default)]
    pub category: Option<String>,
    /// Contract address, for `contract` entries.
    #[serde(default)]
    pub contract: Option<String>,
    /// Delegate address, for `freezer` entries.
    #[serde(default)]
    pub delegate: Option<String>,
    /// Which stake bucket a `freezer` entry targets.
    #[serde(default)]
    pub staker: Option<RawStaker>,
    /// Signed change, in mutez.
    #[serde(with = "string_i64")]
    pub change: i64,
}

/// Stake bucket addressed by a freezer balance update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RawStaker {
    /// The baker's own stake.
    Baker {
        /// Baker address.
        baker: String,
    },
    /// The baker's edge over external stake.
    BakerEdge {
        /// Baker address.
        baker_edge: String,
    },
    /// The shared pool of external stakers.
    Shared {
        /// Delegate whose stakers share the pool.
        delegate: String,
    },
}

impl RawBlock {
    /// Collects every address this block mentions, for cache warm-up.
    ///
    /// Covers the proposer and producer, balance-update participants,
    /// operation sources and destinations, and internal-result
    /// participants. Duplicates are fine; the preload deduplicates.
    #[must_use]
    pub fn participants(&self) -> Vec<&str> {
        let mut out: Vec<&str> = vec![&self.metadata.proposer, &self.metadata.baker];
        for update in &self.metadata.balance_updates {
            if let Some(contract) = &update.contract {
                out.push(contract);
            }
            if let Some(delegate) = &update.delegate {
                out.push(delegate);
            }
            if let Some(staker) = &update.staker {
                out.push(match staker {
                    RawStaker::Baker { baker } => baker,
                    RawStaker::BakerEdge { baker_edge } => baker_edge,
                    RawStaker::Shared { delegate } => delegate,
                });
            }
        }
        for group in self.operations.iter().flatten() {
            for content in &group.contents {
                match content {
                    RawOperationContent::Transaction(tx) => {
                        out.push(&tx.source);
                        out.push(&tx.destination);
                        for internal in &tx.metadata.internal_operation_results {
                            out.push(&internal.source);
                            if let Some(dest) = &internal.destination {
                                out.push(dest);
                            }
                        }
                    }
                    RawOperationContent::DoubleBakingEvidence(_) => {}
                }
            }
        }
        out
    }
}

/// Serde adapter for amounts transmitted as decimal strings.
mod string_i64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<i64>()
            .map_err(|_| D::Error::custom(format!("invalid amount: {raw}")))
    }
}

/// Serde adapter for optional string-encoded amounts.
mod opt_string_i64 {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(v: &Option<i64>, s: S) -> Result<S::Ok, S::Error> {
        match v {
            Some(v) => s.serialize_some(&v.to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        match raw {
            None => Ok(None),
            Some(raw) => raw
                .parse::<i64>()
                .map(Some)
                .map_err(|_| D::Error::custom(format!("invalid amount: {raw}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_content_from_json() {
        let json = serde_json::json!({
            "kind": "transaction",
            "source": "tz1sender",
            "destination": "tz1target",
            "amount": "300",
            "fee": "100",
            "counter": "7",
            "metadata": {
                "operation_result": { "status": "applied" },
                "internal_operation_results": []
            }
        });
        let content: RawOperationContent =
            serde_json::from_value(json).expect("parse transaction");
        match content {
            RawOperationContent::Transaction(tx) => {
                assert_eq!(tx.amount, 300);
                assert_eq!(tx.fee, 100);
                assert!(tx.metadata.operation_result.is_applied());
            }
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let json = serde_json::json!({ "kind": "drain_delegate" });
        let result: Result<RawOperationContent, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn test_staker_variants() {
        let own: RawStaker =
            serde_json::from_value(serde_json::json!({"baker": "tz1b"})).expect("own");
        assert!(matches!(own, RawStaker::Baker { .. }));
        let edge: RawStaker =
            serde_json::from_value(serde_json::json!({"baker_edge": "tz1b"})).expect("edge");
        assert!(matches!(edge, RawStaker::BakerEdge { .. }));
        let shared: RawStaker =
            serde_json::from_value(serde_json::json!({"delegate": "tz1b"})).expect("shared");
        assert!(matches!(shared, RawStaker::Shared { .. }));
    }
}
