//! Protocol version dispatcher.
//!
//! One [`ProtocolHandler`] per compiled protocol version, looked up by
//! hash. Parameter tables compose by delegation: each version starts
//! from its predecessor's constants and overrides what the upgrade
//! changed, so a version record stays a diff even though every handler
//! carries a fully populated table.
//!
//! An unknown hash is fatal unless a fallback protocol is configured
//! (test and dev networks run forks under unregistered hashes).

use std::collections::HashMap;

use tracing::warn;

use tzmirror_types::config::EngineConfig;
use tzmirror_types::{Level, ProtocolConstants};

use crate::commits::CommitRegistry;
use crate::error::{IndexError, Result};
use crate::handler::ProtocolHandler;

/// Genesis protocol hash.
pub const GENESIS: &str = "PrihK96nBAFSxVL1GLJTVhu9YnzkMFiBeuJRPA8NwuZVZCE1L6i";

/// Paris protocol hash.
pub const PARIS: &str = "PtParisBxoLz5gzMmn3d9WBQNoPSZakgnkMC2VNuQ3KXfUtUQeZ";

/// Quebec protocol hash.
pub const QUEBEC: &str = "PsQuebecnLByd3JwTiGadoG4nGWi3HYiLXUjkibeFV8dCFeVMUg";

/// Rio protocol hash.
pub const RIO: &str = "PsRiotumaAMotcRoDWW1bysEhQy2n1M5fy8JgRp8jjRfHGmfeA7";

fn paris_constants() -> ProtocolConstants {
    ProtocolConstants {
        blocks_per_cycle: 10_800,
        consensus_rights_delay: 2,
        baking_reward: 5_200_000,
        baking_bonus: 2_600_000,
        double_baking_slash_percent: 5,
        slashing_delay_cycles: 1,
        accuser_reward_percent: 50,
    }
}

fn quebec_constants() -> ProtocolConstants {
    // Quebec lowered block issuance; everything else carries over.
    ProtocolConstants {
        baking_reward: 2_600_000,
        baking_bonus: 1_300_000,
        ..paris_constants()
    }
}

fn rio_constants() -> ProtocolConstants {
    ProtocolConstants {
        double_baking_slash_percent: 7,
        ..quebec_constants()
    }
}

/// Routes each raw block to the handler of its protocol version.
pub struct Dispatcher {
    handlers: Vec<ProtocolHandler>,
    by_hash: HashMap<String, usize>,
    fallback: Option<String>,
}

impl Dispatcher {
    /// Empty dispatcher with an optional fallback hash.
    #[must_use]
    pub fn new(fallback: Option<String>) -> Self {
        Self {
            handlers: Vec::new(),
            by_hash: HashMap::new(),
            fallback,
        }
    }

    /// The dispatcher with every compiled protocol version, in
    /// activation order (genesis first).
    #[must_use]
    pub fn standard(options: &EngineConfig) -> Self {
        let mut dispatcher = Self::new(options.fallback_protocol.clone());
        // Genesis carries the initiator's table; bootstrap reads its
        // rights-delay and reward values from here.
        dispatcher.register(ProtocolHandler::new(
            GENESIS,
            paris_constants(),
            CommitRegistry::standard(),
        ));
        dispatcher.register(ProtocolHandler::new(
            PARIS,
            paris_constants(),
            CommitRegistry::standard(),
        ));
        dispatcher.register(ProtocolHandler::new(
            QUEBEC,
            quebec_constants(),
            CommitRegistry::standard(),
        ));
        dispatcher.register(ProtocolHandler::new(
            RIO,
            rio_constants(),
            CommitRegistry::standard(),
        ));
        dispatcher
    }

    /// Registers a handler under its hash. A later registration of the
    /// same hash replaces the earlier one.
    pub fn register(&mut self, handler: ProtocolHandler) {
        match self.by_hash.get(handler.hash()) {
            Some(&index) => self.handlers[index] = handler,
            None => {
                self.by_hash
                    .insert(handler.hash().to_string(), self.handlers.len());
                self.handlers.push(handler);
            }
        }
    }

    /// Resolves the handler for a block.
    ///
    /// Level 0 always routes to the genesis handler and an unregistered
    /// hash at level 1 routes to the initiator (second registered):
    /// custom networks put their own hashes in the first two documents,
    /// and the bootstrap and activation paths are hash-independent.
    pub fn resolve(&self, level: Level, hash: &str) -> Result<&ProtocolHandler> {
        if level == 0 {
            return self
                .handlers
                .first()
                .ok_or_else(|| IndexError::UnsupportedProtocol { hash: hash.to_string() });
        }
        if let Some(&index) = self.by_hash.get(hash) {
            return Ok(&self.handlers[index]);
        }
        if level == 1 {
            if let Some(handler) = self.handlers.get(1) {
                return Ok(handler);
            }
        }
        if let Some(fallback) = &self.fallback {
            if let Some(&index) = self.by_hash.get(fallback.as_str()) {
                warn!(protocol = hash, fallback, "routing unknown protocol to fallback");
                return Ok(&self.handlers[index]);
            }
        }
        Err(IndexError::UnsupportedProtocol { hash: hash.to_string() })
    }
}
