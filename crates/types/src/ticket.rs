//! Ticket and ticket-balance rows.
//!
//! Tickets are the highest-churn entities the engine touches, so their
//! caches are the bounded ones. Rows here carry only what the cache tier
//! and the rollup transfer paths need.

use serde::{Deserialize, Serialize};

use crate::{AccountId, Level};

/// One ticket row: a ticketer contract plus content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Internal ticket id.
    pub id: i64,
    /// Contract that issued the ticket.
    pub ticketer_id: AccountId,
    /// Hash of the ticket's content and type.
    pub content_hash: [u8; 32],
    /// Level of first appearance.
    pub first_level: Level,
    /// Level of last activity.
    pub last_level: Level,
}

/// One account's balance of one ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketBalance {
    /// Internal balance-row id.
    pub id: i64,
    /// Ticket this balance is of.
    pub ticket_id: i64,
    /// Holder account.
    pub account_id: AccountId,
    /// Held amount.
    pub balance: i64,
    /// Level of first appearance.
    pub first_level: Level,
    /// Level of last activity.
    pub last_level: Level,
}
