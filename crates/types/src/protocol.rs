//! Protocol rows and parameter tables.

use serde::{Deserialize, Serialize};

use crate::{Level, ProtocolCode};

/// One activated protocol version.
///
/// Immutable once activated, except for `last_level` (closed on upgrade)
/// and fields explicitly rewritten by a context migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    /// Numeric code, assigned in activation order (genesis = 0).
    pub code: ProtocolCode,
    /// Protocol hash.
    pub hash: String,
    /// First level produced under this protocol.
    pub first_level: Level,
    /// Last level produced under this protocol, once superseded.
    pub last_level: Option<Level>,
    /// Parameter table in force for this protocol.
    pub constants: ProtocolConstants,
}

/// Protocol parameter table.
///
/// A new version record holds only the values that actually changed; the
/// dispatcher composes versions by deriving from the predecessor's
/// constants, so this struct is always fully populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolConstants {
    /// Number of levels per cycle.
    pub blocks_per_cycle: i32,
    /// How many cycles ahead rights are sampled and materialized.
    pub consensus_rights_delay: i32,
    /// Fixed reward for baking a block, in mutez.
    pub baking_reward: i64,
    /// Bonus for including endorsements beyond the threshold, in mutez.
    pub baking_bonus: i64,
    /// Percentage of a delegate's stake slashed for double baking.
    pub double_baking_slash_percent: i32,
    /// Cycles between a denunciation and its slash application.
    pub slashing_delay_cycles: i32,
    /// Numerator over 100 of the slashed amount paid to the accuser.
    pub accuser_reward_percent: i32,
}

impl ProtocolConstants {
    /// Cycle containing `level`. Level 0 (genesis) belongs to cycle 0.
    #[must_use]
    pub fn cycle_of(&self, level: Level) -> i32 {
        if level <= 0 {
            return 0;
        }
        (level - 1) / self.blocks_per_cycle
    }

    /// First level of `cycle`.
    #[must_use]
    pub fn cycle_start(&self, cycle: i32) -> Level {
        cycle * self.blocks_per_cycle + 1
    }

    /// Last level of `cycle`.
    #[must_use]
    pub fn cycle_end(&self, cycle: i32) -> Level {
        (cycle + 1) * self.blocks_per_cycle
    }

    /// Whether `level` is the last level of its cycle.
    #[must_use]
    pub fn is_cycle_end(&self, level: Level) -> bool {
        level > 0 && level == self.cycle_end(self.cycle_of(level))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constants(blocks_per_cycle: i32) -> ProtocolConstants {
        ProtocolConstants {
            blocks_per_cycle,
            consensus_rights_delay: 2,
            baking_reward: 10_000_000,
            baking_bonus: 5_000_000,
            double_baking_slash_percent: 10,
            slashing_delay_cycles: 1,
            accuser_reward_percent: 50,
        }
    }

    #[test]
    fn test_cycle_arithmetic() {
        let c = constants(8);
        assert_eq!(c.cycle_of(0), 0);
        assert_eq!(c.cycle_of(1), 0);
        assert_eq!(c.cycle_of(8), 0);
        assert_eq!(c.cycle_of(9), 1);
        assert_eq!(c.cycle_start(1), 9);
        assert_eq!(c.cycle_end(0), 8);
        assert!(c.is_cycle_end(8));
        assert!(!c.is_cycle_end(7));
        assert!(!c.is_cycle_end(0));
    }
}
