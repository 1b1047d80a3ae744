//! Composite key encoding for byte-keyed tables.
//!
//! All composite keys use big-endian fixed-width fields so lexicographic
//! byte order matches numeric order and range scans work.

use tzmirror_types::{AccountId, CycleIndex, Level, OperationId};

/// Key for the per-level operation index: {level:4BE}{op_id:8BE}.
#[must_use]
pub fn level_op_key(level: Level, op_id: OperationId) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&level.to_be_bytes());
    key[4..].copy_from_slice(&op_id.value().to_be_bytes());
    key
}

/// Prefix covering every operation of one level.
#[must_use]
pub fn level_prefix(level: Level) -> [u8; 4] {
    level.to_be_bytes()
}

/// Extracts the operation id from a level-operation key.
#[must_use]
pub fn op_id_of_level_key(key: &[u8]) -> Option<OperationId> {
    let bytes: [u8; 8] = key.get(4..12)?.try_into().ok()?;
    Some(OperationId::new(i64::from_be_bytes(bytes)))
}

/// Key for baker-cycle rows: {cycle:4BE}{baker:8BE}.
#[must_use]
pub fn baker_cycle_key(cycle: CycleIndex, baker: AccountId) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&cycle.to_be_bytes());
    key[4..].copy_from_slice(&baker.value().to_be_bytes());
    key
}

/// Prefix covering every baker-cycle row of one cycle.
#[must_use]
pub fn cycle_prefix(cycle: CycleIndex) -> [u8; 4] {
    cycle.to_be_bytes()
}

/// Key for baking-right rows: {level:4BE}{round:4BE}.
#[must_use]
pub fn right_key(level: Level, round: i32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&level.to_be_bytes());
    key[4..].copy_from_slice(&round.to_be_bytes());
    key
}

/// Key for pending-slash rows: {slashed_level:4BE}{op_id:8BE}.
#[must_use]
pub fn pending_slash_key(slashed_level: Level, op_id: OperationId) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..4].copy_from_slice(&slashed_level.to_be_bytes());
    key[4..].copy_from_slice(&op_id.value().to_be_bytes());
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_op_key_orders_by_id_within_level() {
        let a = level_op_key(5, OperationId::new(1 << 16));
        let b = level_op_key(5, OperationId::new(2 << 16));
        let c = level_op_key(6, OperationId::new(1 << 16));
        assert!(a < b);
        assert!(b < c);
        assert!(a[..4] == level_prefix(5));
    }

    #[test]
    fn test_op_id_roundtrip() {
        let id = OperationId::new(42 << 16);
        let key = level_op_key(9, id);
        assert_eq!(op_id_of_level_key(&key), Some(id));
        assert_eq!(op_id_of_level_key(&key[..6]), None);
    }

    #[test]
    fn test_baker_cycle_prefix() {
        let key = baker_cycle_key(3, AccountId::new(17));
        assert_eq!(key[..4], cycle_prefix(3));
    }
}
