//! Running chain statistics.

use serde::{Deserialize, Serialize};

use crate::Level;

/// Cumulative chain statistics, one row per level.
///
/// The conservation diagnostic compares the per-block change of
/// `total_issued - total_burned` against the sum of balance deltas the
/// unit-of-work accumulated while applying the block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    /// Level this row was recorded at.
    pub level: Level,
    /// Cumulative mutez minted since genesis.
    pub total_issued: i64,
    /// Cumulative mutez burned since genesis.
    pub total_burned: i64,
    /// Cumulative accounts created since genesis.
    pub total_accounts: i64,
}

impl Statistics {
    /// Net supply currently in circulation.
    #[must_use]
    pub fn total_supply(&self) -> i64 {
        self.total_issued - self.total_burned
    }
}
