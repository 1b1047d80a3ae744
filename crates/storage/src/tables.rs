//! Table definitions for redb storage.
//!
//! One table per entity kind, a relational mirror of the chain. Rows are
//! postcard-encoded; composite keys are byte-encoded by the keys module.

use redb::TableDefinition;

/// Table definitions for the chain mirror.
pub struct Tables;

impl Tables {
    // =========================================================================
    // Singleton
    // =========================================================================

    /// Chain-state singleton: "state" → serialized ChainState.
    /// Exactly one row; rewritten on every committed block.
    pub const CHAIN: TableDefinition<'static, &'static str, &'static [u8]> =
        TableDefinition::new("chain");

    // =========================================================================
    // Entities
    // =========================================================================

    /// Accounts: account_id → serialized Account.
    pub const ACCOUNTS: TableDefinition<'static, i64, &'static [u8]> =
        TableDefinition::new("accounts");

    /// Address index: address → account_id.
    pub const ACCOUNT_INDEX: TableDefinition<'static, &'static str, i64> =
        TableDefinition::new("account_index");

    /// Blocks: level → serialized Block.
    pub const BLOCKS: TableDefinition<'static, i64, &'static [u8]> =
        TableDefinition::new("blocks");

    /// Operations: operation_id → serialized Operation.
    pub const OPERATIONS: TableDefinition<'static, i64, &'static [u8]> =
        TableDefinition::new("operations");

    /// Per-level operation index: {level:4BE}{op_id:8BE} → kind byte.
    /// Revert scans this in reverse to undo operations in descending id
    /// order.
    pub const LEVEL_OPERATIONS: TableDefinition<'static, &'static [u8], u8> =
        TableDefinition::new("level_operations");

    /// Protocols: code → serialized Protocol.
    pub const PROTOCOLS: TableDefinition<'static, i32, &'static [u8]> =
        TableDefinition::new("protocols");

    /// Protocol hash index: hash → code.
    pub const PROTOCOL_INDEX: TableDefinition<'static, &'static str, i32> =
        TableDefinition::new("protocol_index");

    // =========================================================================
    // Cycles and rights
    // =========================================================================

    /// Cycles: cycle index → serialized Cycle.
    pub const CYCLES: TableDefinition<'static, i32, &'static [u8]> =
        TableDefinition::new("cycles");

    /// Per-baker cycle aggregates: {cycle:4BE}{baker:8BE} → serialized
    /// BakerCycle.
    pub const BAKER_CYCLES: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("baker_cycles");

    /// Materialized baking rights: {level:4BE}{round:4BE} → serialized
    /// BakingRight.
    pub const BAKING_RIGHTS: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("baking_rights");

    /// Scheduled slashes: {slashed_level:4BE}{op_id:8BE} → serialized
    /// PendingSlash. The boundary sweep drains due rows each block.
    pub const PENDING_SLASHES: TableDefinition<'static, &'static [u8], &'static [u8]> =
        TableDefinition::new("pending_slashes");

    // =========================================================================
    // Statistics
    // =========================================================================

    /// Running statistics: level → serialized Statistics.
    pub const STATISTICS: TableDefinition<'static, i64, &'static [u8]> =
        TableDefinition::new("statistics");
}
