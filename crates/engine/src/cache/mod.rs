//! Entity cache tier.
//!
//! One [`EntityCache`] lives for the whole life of the engine and is the
//! sole in-memory view of hot rows. Cache mutations are NOT covered by
//! the storage transaction: a failed commit must be followed by
//! [`EntityCache::reset`], after which every entry is faulted back in
//! from the (rolled-back) database.

mod accounts;
mod bounded;

pub use accounts::AccountCache;
pub use bounded::BoundedCache;

use std::collections::HashMap;

use tzmirror_types::config::CacheConfig;
use tzmirror_types::{Block, Level, Protocol, ProtocolCode, Statistics, Ticket, TicketBalance};

/// All entity caches, plus the statistics singleton.
pub struct EntityCache {
    /// Hot accounts. Identity map; see [`AccountCache`].
    pub accounts: AccountCache,
    /// Activated protocols by code. Small and append-mostly, so unbounded.
    protocols: HashMap<ProtocolCode, Protocol>,
    /// Protocol hash to code lookup, kept in step with `protocols`.
    protocol_codes: HashMap<String, ProtocolCode>,
    /// Recent blocks, for revert and reward undo.
    pub blocks: BoundedCache<Level, Block>,
    /// Tickets, keyed by internal id.
    pub tickets: BoundedCache<i64, Ticket>,
    /// Ticket balances, keyed by (ticket id, holder raw id).
    pub ticket_balances: BoundedCache<(i64, i64), TicketBalance>,
    /// Running supply totals; loaded once and rolled forward per block.
    pub statistics: Option<Statistics>,
}

impl EntityCache {
    /// Builds an empty cache tier with the configured ceilings.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            accounts: AccountCache::new(config.accounts_capacity),
            protocols: HashMap::new(),
            protocol_codes: HashMap::new(),
            blocks: BoundedCache::new(config.blocks_capacity),
            tickets: BoundedCache::new(config.tickets_capacity),
            ticket_balances: BoundedCache::new(config.ticket_balances_capacity),
            statistics: None,
        }
    }

    /// Caches an activated protocol.
    pub fn insert_protocol(&mut self, protocol: Protocol) {
        self.protocol_codes.insert(protocol.hash.clone(), protocol.code);
        self.protocols.insert(protocol.code, protocol);
    }

    /// Cached protocol by code.
    pub fn protocol(&self, code: ProtocolCode) -> Option<&Protocol> {
        self.protocols.get(&code)
    }

    /// Cached protocol code by hash.
    pub fn protocol_code(&self, hash: &str) -> Option<ProtocolCode> {
        self.protocol_codes.get(hash).copied()
    }

    /// Drops a protocol row; used when reverting an activation block.
    pub fn remove_protocol(&mut self, code: ProtocolCode) {
        if let Some(protocol) = self.protocols.remove(&code) {
            self.protocol_codes.remove(&protocol.hash);
        }
    }

    /// Post-commit maintenance: batched trims of the bounded caches and
    /// a dirty-mark wipe. Never touches the protocol map.
    pub fn trim(&mut self) {
        self.accounts.clear_dirty();
        self.accounts.trim();
        self.blocks.trim();
        self.tickets.trim();
        self.ticket_balances.trim();
    }

    /// Drops every cached entry. Mandatory after a rolled-back commit,
    /// since cached rows may hold half-applied mutations.
    pub fn reset(&mut self) {
        self.accounts.reset();
        self.protocols.clear();
        self.protocol_codes.clear();
        self.blocks.reset();
        self.tickets.reset();
        self.ticket_balances.reset();
        self.statistics = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tzmirror_types::ProtocolConstants;

    fn config() -> CacheConfig {
        CacheConfig::builder().build()
    }

    fn protocol(code: i32, hash: &str) -> Protocol {
        Protocol {
            code: ProtocolCode::new(code),
            hash: hash.to_string(),
            first_level: 1,
            last_level: None,
            constants: ProtocolConstants {
                blocks_per_cycle: 8,
                consensus_rights_delay: 2,
                baking_reward: 10_000_000,
                baking_bonus: 5_000_000,
                double_baking_slash_percent: 10,
                slashing_delay_cycles: 1,
                accuser_reward_percent: 50,
            },
        }
    }

    #[test]
    fn test_protocol_hash_lookup_tracks_inserts_and_removals() {
        let mut cache = EntityCache::new(&config());
        cache.insert_protocol(protocol(1, "PtAlpha"));
        assert_eq!(cache.protocol_code("PtAlpha"), Some(ProtocolCode::new(1)));

        cache.remove_protocol(ProtocolCode::new(1));
        assert_eq!(cache.protocol_code("PtAlpha"), None);
        assert!(cache.protocol(ProtocolCode::new(1)).is_none());
    }

    #[test]
    fn test_reset_drops_statistics() {
        let mut cache = EntityCache::new(&config());
        cache.statistics = Some(Statistics {
            level: 5,
            total_issued: 100,
            total_burned: 10,
            total_accounts: 3,
        });
        cache.reset();
        assert!(cache.statistics.is_none());
    }
}
