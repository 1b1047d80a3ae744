//! Typed row stores over open redb tables.
//!
//! Follows one pattern throughout: static structs with functions taking
//! the already-open table, so callers control transaction scope. Rows
//! are postcard-encoded via the types codec.

use redb::{ReadOnlyTable, ReadableTable, Table};
use snafu::{ResultExt, Snafu};

use tzmirror_types::{
    codec, Account, AccountId, BakerCycle, BakingRight, Block, ChainState, Cycle, CycleIndex,
    Level, Operation, OperationId, PendingSlash, Protocol, ProtocolCode, Statistics,
};

use crate::keys;

/// Row-store error types.
#[derive(Debug, Snafu)]
pub enum StoreError {
    #[snafu(display("storage error: {source}"))]
    Storage { source: redb::StorageError },

    #[snafu(display("codec error: {source}"))]
    Codec { source: codec::CodecError },
}

/// Result type for row-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

type BytesRoTable = ReadOnlyTable<&'static [u8], &'static [u8]>;
type BytesTable<'t> = Table<'t, &'static [u8], &'static [u8]>;
type RowRoTable = ReadOnlyTable<i64, &'static [u8]>;
type RowTable<'t> = Table<'t, i64, &'static [u8]>;

fn decode_row<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    codec::decode(bytes).context(CodecSnafu)
}

fn encode_row<T: serde::Serialize>(row: &T) -> Result<Vec<u8>> {
    codec::encode(row).context(CodecSnafu)
}

/// Chain-state singleton row.
pub struct ChainStore;

impl ChainStore {
    const KEY: &'static str = "state";

    /// Reads the singleton, if the database has ever committed a block.
    pub fn get(table: &ReadOnlyTable<&'static str, &'static [u8]>) -> Result<Option<ChainState>> {
        match table.get(Self::KEY).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Writes the singleton.
    pub fn put(
        table: &mut Table<'_, &'static str, &'static [u8]>,
        state: &ChainState,
    ) -> Result<()> {
        let encoded = encode_row(state)?;
        table.insert(Self::KEY, &encoded[..]).context(StorageSnafu)?;
        Ok(())
    }
}

/// Account rows plus the address index.
pub struct AccountStore;

impl AccountStore {
    /// Gets an account by id.
    pub fn get(table: &RowRoTable, id: AccountId) -> Result<Option<Account>> {
        match table.get(id.value()).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Resolves an address to an account id.
    pub fn id_by_address(
        index: &ReadOnlyTable<&'static str, i64>,
        address: &str,
    ) -> Result<Option<AccountId>> {
        Ok(index
            .get(address)
            .context(StorageSnafu)?
            .map(|v| AccountId::new(v.value())))
    }

    /// Upserts an account row and its address index entry.
    pub fn put(
        table: &mut RowTable<'_>,
        index: &mut Table<'_, &'static str, i64>,
        account: &Account,
    ) -> Result<()> {
        let encoded = encode_row(account)?;
        table
            .insert(account.id.value(), &encoded[..])
            .context(StorageSnafu)?;
        index
            .insert(account.address.as_str(), account.id.value())
            .context(StorageSnafu)?;
        Ok(())
    }

    /// All account rows, in id order. Full-table scan; only used when a
    /// reorg unwinds genesis itself.
    pub fn all(table: &RowRoTable) -> Result<Vec<Account>> {
        let mut out = Vec::new();
        for entry in table.iter().context(StorageSnafu)? {
            let (_, value) = entry.context(StorageSnafu)?;
            out.push(decode_row(value.value())?);
        }
        Ok(out)
    }

    /// All delegate accounts with nonzero baking power.
    ///
    /// Full-table scan; only run at cycle boundaries for the stake
    /// snapshot, never on the per-block path.
    pub fn delegates(table: &RowRoTable) -> Result<Vec<Account>> {
        let mut out = Vec::new();
        for entry in table.iter().context(StorageSnafu)? {
            let (_, value) = entry.context(StorageSnafu)?;
            let account: Account = decode_row(value.value())?;
            if account.baking_power() > 0 {
                out.push(account);
            }
        }
        Ok(out)
    }

    /// Deletes an account row and its address index entry. Used only
    /// when a reorg unwinds the block that created the account.
    pub fn delete(
        table: &mut RowTable<'_>,
        index: &mut Table<'_, &'static str, i64>,
        account: &Account,
    ) -> Result<()> {
        table.remove(account.id.value()).context(StorageSnafu)?;
        index
            .remove(account.address.as_str())
            .context(StorageSnafu)?;
        Ok(())
    }
}

/// Block rows, keyed by level.
pub struct BlockStore;

impl BlockStore {
    /// Gets a block by level.
    pub fn get(table: &RowRoTable, level: Level) -> Result<Option<Block>> {
        match table.get(i64::from(level)).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Upserts a block row.
    pub fn put(table: &mut RowTable<'_>, block: &Block) -> Result<()> {
        let encoded = encode_row(block)?;
        table
            .insert(i64::from(block.level), &encoded[..])
            .context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes a block row.
    pub fn delete(table: &mut RowTable<'_>, level: Level) -> Result<()> {
        table.remove(i64::from(level)).context(StorageSnafu)?;
        Ok(())
    }
}

/// Operation rows plus the per-level index.
pub struct OperationStore;

impl OperationStore {
    /// Gets an operation by id.
    pub fn get(table: &RowRoTable, id: OperationId) -> Result<Option<Operation>> {
        match table.get(id.value()).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Inserts an operation row and its level index entry.
    pub fn put(
        table: &mut RowTable<'_>,
        level_index: &mut Table<'_, &'static [u8], u8>,
        op: &Operation,
    ) -> Result<()> {
        let encoded = encode_row(op)?;
        table.insert(op.id.value(), &encoded[..]).context(StorageSnafu)?;
        let key = keys::level_op_key(op.level, op.id);
        level_index.insert(&key[..], 0u8).context(StorageSnafu)?;
        Ok(())
    }

    /// Removes an operation row and its level index entry.
    pub fn delete(
        table: &mut RowTable<'_>,
        level_index: &mut Table<'_, &'static [u8], u8>,
        level: Level,
        id: OperationId,
    ) -> Result<()> {
        table.remove(id.value()).context(StorageSnafu)?;
        let key = keys::level_op_key(level, id);
        level_index.remove(&key[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// Operation ids of one level in descending id order: the exact
    /// reverse of application order, which revert requires.
    pub fn ids_at_level_desc(
        level_index: &ReadOnlyTable<&'static [u8], u8>,
        level: Level,
    ) -> Result<Vec<OperationId>> {
        let prefix = keys::level_prefix(level);
        let mut ids = Vec::new();
        for entry in level_index.range(&prefix[..]..).context(StorageSnafu)? {
            let (key, _) = entry.context(StorageSnafu)?;
            let key_bytes = key.value();
            if key_bytes.len() < 4 || key_bytes[..4] != prefix[..] {
                break;
            }
            if let Some(id) = keys::op_id_of_level_key(key_bytes) {
                ids.push(id);
            }
        }
        ids.reverse();
        Ok(ids)
    }
}

/// Protocol rows plus the hash index.
pub struct ProtocolStore;

impl ProtocolStore {
    /// Gets a protocol by numeric code.
    pub fn get(
        table: &ReadOnlyTable<i32, &'static [u8]>,
        code: ProtocolCode,
    ) -> Result<Option<Protocol>> {
        match table.get(code.value()).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Resolves a protocol hash to its numeric code.
    pub fn code_by_hash(
        index: &ReadOnlyTable<&'static str, i32>,
        hash: &str,
    ) -> Result<Option<ProtocolCode>> {
        Ok(index
            .get(hash)
            .context(StorageSnafu)?
            .map(|v| ProtocolCode::new(v.value())))
    }

    /// Upserts a protocol row and its hash index entry.
    pub fn put(
        table: &mut Table<'_, i32, &'static [u8]>,
        index: &mut Table<'_, &'static str, i32>,
        protocol: &Protocol,
    ) -> Result<()> {
        let encoded = encode_row(protocol)?;
        table
            .insert(protocol.code.value(), &encoded[..])
            .context(StorageSnafu)?;
        index
            .insert(protocol.hash.as_str(), protocol.code.value())
            .context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes a protocol row and its hash index entry. Used only when a
    /// reorg unwinds the activation block.
    pub fn delete(
        table: &mut Table<'_, i32, &'static [u8]>,
        index: &mut Table<'_, &'static str, i32>,
        protocol: &Protocol,
    ) -> Result<()> {
        table.remove(protocol.code.value()).context(StorageSnafu)?;
        index
            .remove(protocol.hash.as_str())
            .context(StorageSnafu)?;
        Ok(())
    }
}

/// Cycle rows and per-baker cycle aggregates.
pub struct CycleStore;

impl CycleStore {
    /// Gets a cycle by index.
    pub fn get(
        table: &ReadOnlyTable<i32, &'static [u8]>,
        cycle: CycleIndex,
    ) -> Result<Option<Cycle>> {
        match table.get(cycle).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Upserts a cycle row.
    pub fn put(table: &mut Table<'_, i32, &'static [u8]>, cycle: &Cycle) -> Result<()> {
        let encoded = encode_row(cycle)?;
        table.insert(cycle.index, &encoded[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes a cycle row.
    pub fn delete(table: &mut Table<'_, i32, &'static [u8]>, cycle: CycleIndex) -> Result<()> {
        table.remove(cycle).context(StorageSnafu)?;
        Ok(())
    }

    /// Gets one baker's aggregates for one cycle.
    pub fn get_baker_cycle(
        table: &BytesRoTable,
        cycle: CycleIndex,
        baker: AccountId,
    ) -> Result<Option<BakerCycle>> {
        let key = keys::baker_cycle_key(cycle, baker);
        match table.get(&key[..]).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Upserts one baker's aggregates.
    pub fn put_baker_cycle(table: &mut BytesTable<'_>, row: &BakerCycle) -> Result<()> {
        let key = keys::baker_cycle_key(row.cycle, row.baker_id);
        let encoded = encode_row(row)?;
        table.insert(&key[..], &encoded[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes one baker's aggregates.
    pub fn delete_baker_cycle(
        table: &mut BytesTable<'_>,
        cycle: CycleIndex,
        baker: AccountId,
    ) -> Result<()> {
        let key = keys::baker_cycle_key(cycle, baker);
        table.remove(&key[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// All baker aggregates of one cycle.
    pub fn baker_cycles_of(table: &BytesRoTable, cycle: CycleIndex) -> Result<Vec<BakerCycle>> {
        let prefix = keys::cycle_prefix(cycle);
        let mut rows = Vec::new();
        for entry in table.range(&prefix[..]..).context(StorageSnafu)? {
            let (key, value) = entry.context(StorageSnafu)?;
            if key.value().len() < 4 || key.value()[..4] != prefix[..] {
                break;
            }
            rows.push(decode_row(value.value())?);
        }
        Ok(rows)
    }
}

/// Materialized baking rights.
pub struct RightsStore;

impl RightsStore {
    /// Gets the right for a (level, round).
    pub fn get(table: &BytesRoTable, level: Level, round: i32) -> Result<Option<BakingRight>> {
        let key = keys::right_key(level, round);
        match table.get(&key[..]).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Upserts a right row.
    pub fn put(table: &mut BytesTable<'_>, right: &BakingRight) -> Result<()> {
        let key = keys::right_key(right.level, right.round);
        let encoded = encode_row(right)?;
        table.insert(&key[..], &encoded[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes a right row.
    pub fn delete(table: &mut BytesTable<'_>, level: Level, round: i32) -> Result<()> {
        let key = keys::right_key(level, round);
        table.remove(&key[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// All rights in the inclusive level range.
    pub fn in_levels(
        table: &BytesRoTable,
        first: Level,
        last: Level,
    ) -> Result<Vec<BakingRight>> {
        let start = keys::right_key(first, 0);
        let mut rows = Vec::new();
        for entry in table.range(&start[..]..).context(StorageSnafu)? {
            let (_, value) = entry.context(StorageSnafu)?;
            let right: BakingRight = decode_row(value.value())?;
            if right.level > last {
                break;
            }
            rows.push(right);
        }
        Ok(rows)
    }
}

/// Scheduled slashes.
pub struct SlashStore;

impl SlashStore {
    /// Upserts a pending slash.
    pub fn put(table: &mut BytesTable<'_>, slash: &PendingSlash) -> Result<()> {
        let key = keys::pending_slash_key(slash.slashed_level, slash.op_id);
        let encoded = encode_row(slash)?;
        table.insert(&key[..], &encoded[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes a pending slash.
    pub fn delete(
        table: &mut BytesTable<'_>,
        slashed_level: Level,
        op_id: OperationId,
    ) -> Result<()> {
        let key = keys::pending_slash_key(slashed_level, op_id);
        table.remove(&key[..]).context(StorageSnafu)?;
        Ok(())
    }

    /// All slashes due exactly at `level`, in ascending op id order.
    pub fn due_at(table: &BytesRoTable, level: Level) -> Result<Vec<PendingSlash>> {
        let prefix = keys::level_prefix(level);
        let start = keys::pending_slash_key(level, OperationId::new(0));
        let mut rows = Vec::new();
        for entry in table.range(&start[..]..).context(StorageSnafu)? {
            let (key, value) = entry.context(StorageSnafu)?;
            if key.value().len() < 4 || key.value()[..4] != prefix[..] {
                break;
            }
            rows.push(decode_row(value.value())?);
        }
        Ok(rows)
    }
}

/// Running statistics rows.
pub struct StatisticsStore;

impl StatisticsStore {
    /// Gets the statistics row recorded at `level`.
    pub fn get(table: &RowRoTable, level: Level) -> Result<Option<Statistics>> {
        match table.get(i64::from(level)).context(StorageSnafu)? {
            Some(bytes) => Ok(Some(decode_row(bytes.value())?)),
            None => Ok(None),
        }
    }

    /// Upserts a statistics row.
    pub fn put(table: &mut RowTable<'_>, stats: &Statistics) -> Result<()> {
        let encoded = encode_row(stats)?;
        table
            .insert(i64::from(stats.level), &encoded[..])
            .context(StorageSnafu)?;
        Ok(())
    }

    /// Deletes a statistics row.
    pub fn delete(table: &mut RowTable<'_>, level: Level) -> Result<()> {
        table.remove(i64::from(level)).context(StorageSnafu)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::StorageEngine;
    use crate::tables::Tables;
    use tzmirror_types::SUB_ID_BITS;

    #[test]
    fn test_account_crud_with_index() {
        let engine = StorageEngine::open_in_memory().expect("open engine");
        let account = Account::new(AccountId::new(1), "tz1alice", 5);

        {
            let txn = engine.begin_write().expect("begin write");
            {
                let mut accounts = txn.open_table(Tables::ACCOUNTS).expect("open table");
                let mut index = txn.open_table(Tables::ACCOUNT_INDEX).expect("open index");
                AccountStore::put(&mut accounts, &mut index, &account).expect("put account");
            }
            txn.commit().expect("commit");
        }

        let txn = engine.begin_read().expect("begin read");
        let accounts = txn.open_table(Tables::ACCOUNTS).expect("open table");
        let index = txn.open_table(Tables::ACCOUNT_INDEX).expect("open index");

        let loaded = AccountStore::get(&accounts, AccountId::new(1))
            .expect("get account")
            .expect("account exists");
        assert_eq!(loaded, account);

        let id = AccountStore::id_by_address(&index, "tz1alice")
            .expect("lookup")
            .expect("indexed");
        assert_eq!(id, AccountId::new(1));
    }

    #[test]
    fn test_level_operation_index_descends() {
        let engine = StorageEngine::open_in_memory().expect("open engine");
        let ids = [
            OperationId::new(1 << SUB_ID_BITS),
            OperationId::new(2 << SUB_ID_BITS),
            OperationId::new(3 << SUB_ID_BITS),
        ];

        {
            let txn = engine.begin_write().expect("begin write");
            {
                let mut index = txn
                    .open_table(Tables::LEVEL_OPERATIONS)
                    .expect("open index");
                for id in ids {
                    let key = keys::level_op_key(7, id);
                    index.insert(&key[..], 0u8).expect("insert");
                }
                // An operation at another level must not leak into level 7.
                let key = keys::level_op_key(8, OperationId::new(4 << SUB_ID_BITS));
                index.insert(&key[..], 0u8).expect("insert");
            }
            txn.commit().expect("commit");
        }

        let txn = engine.begin_read().expect("begin read");
        let index = txn
            .open_table(Tables::LEVEL_OPERATIONS)
            .expect("open index");
        let listed = OperationStore::ids_at_level_desc(&index, 7).expect("list");
        assert_eq!(listed, vec![ids[2], ids[1], ids[0]]);
    }

    #[test]
    fn test_pending_slash_due_at() {
        let engine = StorageEngine::open_in_memory().expect("open engine");
        let due = PendingSlash {
            op_id: OperationId::new(1 << SUB_ID_BITS),
            offender_id: AccountId::new(2),
            accuser_id: AccountId::new(3),
            slashed_level: 16,
            applied: false,
        };
        let later = PendingSlash {
            op_id: OperationId::new(2 << SUB_ID_BITS),
            offender_id: AccountId::new(2),
            accuser_id: AccountId::new(3),
            slashed_level: 24,
            applied: false,
        };

        {
            let txn = engine.begin_write().expect("begin write");
            {
                let mut table = txn.open_table(Tables::PENDING_SLASHES).expect("open table");
                SlashStore::put(&mut table, &due).expect("put due");
                SlashStore::put(&mut table, &later).expect("put later");
            }
            txn.commit().expect("commit");
        }

        let txn = engine.begin_read().expect("begin read");
        let table = txn.open_table(Tables::PENDING_SLASHES).expect("open table");
        let found = SlashStore::due_at(&table, 16).expect("due_at");
        assert_eq!(found, vec![due]);
    }
}
