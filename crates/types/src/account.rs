//! Account rows.
//!
//! An account is a closed tagged union: the common fields every account
//! carries, plus a kind discriminator with a per-kind payload. The
//! delegate payload carries the staking and delegation aggregates the
//! reward and slashing paths mutate.

use serde::{Deserialize, Serialize};

use crate::{AccountId, Level, ScriptId};

/// One account row in the relational mirror.
///
/// Identity is the internal [`AccountId`], assigned once at first
/// activity and never reused. The public `address` is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Internal id, allocated by the counter allocator.
    pub id: AccountId,
    /// Public address (immutable).
    pub address: String,
    /// Spendable balance, in mutez.
    pub balance: i64,
    /// Manager counter of the last consumed manager operation.
    pub counter: i64,
    /// Delegate this account delegates to, if any.
    pub delegate_id: Option<AccountId>,
    /// Funds this account has staked towards its delegate, in mutez.
    pub staked_balance: i64,
    /// Level of the block that created this account.
    pub first_level: Level,
    /// Level of the last block that touched this account.
    pub last_level: Level,
    /// Number of transactions this account participated in.
    pub transactions_count: i32,
    /// Number of delegation operations sent by this account.
    pub delegations_count: i32,
    /// Number of originations this account participated in.
    pub originations_count: i32,
    /// Kind discriminator with per-kind payload.
    pub kind: AccountKind,
}

/// Account kind with its per-kind payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountKind {
    /// Plain implicit account.
    User,
    /// Delegate (baker) with staking and delegation aggregates.
    Delegate(DelegateData),
    /// Originated smart contract.
    Contract {
        /// Current script, if the contract carries one.
        script_id: Option<ScriptId>,
    },
    /// Transaction rollup.
    Rollup,
    /// Smart optimistic rollup.
    SmartRollup,
}

/// Staking and delegation aggregates carried by a delegate account.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegateData {
    /// Level at which the account registered as a delegate.
    pub activation_level: Level,
    /// Total staking balance: own funds plus delegated plus staked.
    pub staking_balance: i64,
    /// Funds delegated (not staked) by other accounts.
    pub delegated_balance: i64,
    /// Number of accounts delegating to this delegate.
    pub delegators_count: i32,
    /// Own funds frozen as stake, subject to slashing.
    pub own_staked: i64,
    /// Funds staked by external stakers, subject to slashing.
    pub external_staked: i64,
    /// Edge (cut) the baker takes from staking rewards, in parts per
    /// million of the shared portion.
    pub edge_ppm: i64,
    /// Number of blocks this delegate has baked.
    pub blocks_count: i32,
    /// Number of double-baking accusations recorded against this delegate.
    pub double_baking_count: i32,
    /// Number of times this delegate was the accuser in evidence ops.
    pub accusations_count: i32,
}

impl Account {
    /// Creates a plain account with zero balance, first seen at `level`.
    pub fn new(id: AccountId, address: impl Into<String>, level: Level) -> Self {
        Self {
            id,
            address: address.into(),
            balance: 0,
            counter: 0,
            delegate_id: None,
            staked_balance: 0,
            first_level: level,
            last_level: level,
            transactions_count: 0,
            delegations_count: 0,
            originations_count: 0,
            kind: AccountKind::User,
        }
    }

    /// Returns the delegate payload, or `None` for non-delegates.
    #[must_use]
    pub fn delegate(&self) -> Option<&DelegateData> {
        match &self.kind {
            AccountKind::Delegate(data) => Some(data),
            _ => None,
        }
    }

    /// Mutable access to the delegate payload.
    pub fn delegate_mut(&mut self) -> Option<&mut DelegateData> {
        match &mut self.kind {
            AccountKind::Delegate(data) => Some(data),
            _ => None,
        }
    }

    /// Promotes a plain account to a delegate, keeping common fields.
    pub fn promote_to_delegate(&mut self, level: Level) {
        if matches!(self.kind, AccountKind::User) {
            self.kind = AccountKind::Delegate(DelegateData {
                activation_level: level,
                ..DelegateData::default()
            });
        }
    }

    /// Full staking power for rights sampling: own stake, external stake
    /// and delegated funds.
    #[must_use]
    pub fn baking_power(&self) -> i64 {
        match &self.kind {
            AccountKind::Delegate(d) => {
                self.balance + d.own_staked + d.external_staked + d.delegated_balance
            }
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_account_bounds() {
        let acc = Account::new(AccountId::new(1), "tz1abc", 42);
        assert_eq!(acc.first_level, 42);
        assert_eq!(acc.last_level, 42);
        assert_eq!(acc.balance, 0);
        assert!(acc.delegate().is_none());
    }

    #[test]
    fn test_promote_to_delegate() {
        let mut acc = Account::new(AccountId::new(1), "tz1abc", 10);
        acc.promote_to_delegate(11);
        let data = acc.delegate().expect("delegate payload");
        assert_eq!(data.activation_level, 11);
        // Promotion is idempotent and keeps the payload.
        acc.delegate_mut().expect("payload").blocks_count = 3;
        acc.promote_to_delegate(99);
        assert_eq!(acc.delegate().expect("payload").blocks_count, 3);
    }

    #[test]
    fn test_baking_power_counts_all_sources() {
        let mut acc = Account::new(AccountId::new(1), "tz1baker", 0);
        acc.balance = 100;
        acc.promote_to_delegate(0);
        let data = acc.delegate_mut().expect("payload");
        data.own_staked = 50;
        data.external_staked = 25;
        data.delegated_balance = 10;
        assert_eq!(acc.baking_power(), 185);
    }
}
