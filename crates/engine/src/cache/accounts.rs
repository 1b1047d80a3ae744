//! Account identity map.
//!
//! Guarantees at most one in-memory instance per account, so every
//! commit within a block mutates the same object and "balance went up
//! by fee then down by burn" sequences compose without re-reading from
//! storage mid-block. Mutable access goes through [`account_mut`],
//! which records the account as dirty for the touch pass and the flush.
//!
//! [`account_mut`]: AccountCache::account_mut

use std::collections::{BTreeSet, HashMap};

use snafu::ResultExt;

use tzmirror_storage::{AccountStore, StorageEngine, Tables};
use tzmirror_types::{Account, AccountId, Level};

use crate::error::{EngineSnafu, IndexError, Result, RowsSnafu, TableSnafu};

/// Occupancy fraction (percent) above which a trim is due.
const TRIM_THRESHOLD_PERCENT: usize = 90;

/// Bounded identity map of hot accounts, indexed by id and address.
pub struct AccountCache {
    capacity: usize,
    map: HashMap<AccountId, Account>,
    by_address: HashMap<String, AccountId>,
    touched: HashMap<AccountId, Level>,
    dirty: BTreeSet<AccountId>,
}

impl AccountCache {
    /// Creates a cache with the given entry ceiling.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            map: HashMap::new(),
            by_address: HashMap::new(),
            touched: HashMap::new(),
            dirty: BTreeSet::new(),
        }
    }

    /// Inserts a freshly created account and marks it dirty.
    pub fn insert(&mut self, account: Account) {
        self.by_address.insert(account.address.clone(), account.id);
        self.touched.insert(account.id, account.last_level);
        self.dirty.insert(account.id);
        self.map.insert(account.id, account);
    }

    /// Read-only access to a cached account.
    pub fn get(&self, id: AccountId) -> Option<&Account> {
        self.map.get(&id)
    }

    /// Resolves a cached address to its id without faulting in.
    pub fn id_of(&self, address: &str) -> Option<AccountId> {
        self.by_address.get(address).copied()
    }

    /// Mutable access to a cached account; marks it dirty.
    ///
    /// The account must already be cached (preloaded or created); a miss
    /// here means the warm-up pass failed to collect a participant,
    /// which is a decoder bug, not bad input.
    pub fn account_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        let account = self.map.get_mut(&id).ok_or_else(|| IndexError::Invariant {
            message: format!("account {id} mutated without being cached"),
        })?;
        self.touched.insert(id, account.last_level);
        self.dirty.insert(id);
        Ok(account)
    }

    /// Faults in an account by id.
    pub fn get_or_load(&mut self, store: &StorageEngine, id: AccountId) -> Result<&Account> {
        if !self.map.contains_key(&id) {
            let txn = store.begin_read().context(EngineSnafu)?;
            let table = txn.open_table(Tables::ACCOUNTS).context(TableSnafu)?;
            let account = AccountStore::get(&table, id)
                .context(RowsSnafu)?
                .ok_or_else(|| IndexError::Invariant {
                    message: format!("account {id} not found in storage"),
                })?;
            self.by_address.insert(account.address.clone(), id);
            self.touched.insert(id, account.last_level);
            self.map.insert(id, account);
        }
        Ok(&self.map[&id])
    }

    /// Faults in an account by address; `None` if the chain has never
    /// seen the address.
    pub fn get_or_load_by_address(
        &mut self,
        store: &StorageEngine,
        address: &str,
    ) -> Result<Option<AccountId>> {
        if let Some(id) = self.by_address.get(address) {
            return Ok(Some(*id));
        }
        let txn = store.begin_read().context(EngineSnafu)?;
        let index = txn.open_table(Tables::ACCOUNT_INDEX).context(TableSnafu)?;
        let Some(id) = AccountStore::id_by_address(&index, address).context(RowsSnafu)? else {
            return Ok(None);
        };
        let table = txn.open_table(Tables::ACCOUNTS).context(TableSnafu)?;
        let account = AccountStore::get(&table, id)
            .context(RowsSnafu)?
            .ok_or_else(|| IndexError::Invariant {
                message: format!("address index points at missing account {id}"),
            })?;
        self.by_address.insert(account.address.clone(), id);
        self.touched.insert(id, account.last_level);
        self.map.insert(id, account);
        Ok(Some(id))
    }

    /// Batch-preloads every address a block mentions, in one read
    /// transaction, to avoid N+1 faults during dispatch. Unknown
    /// addresses are skipped; they are created lazily on first use.
    pub fn preload<'a>(
        &mut self,
        store: &StorageEngine,
        addresses: impl IntoIterator<Item = &'a str>,
    ) -> Result<()> {
        let missing: BTreeSet<&str> = addresses
            .into_iter()
            .filter(|a| !self.by_address.contains_key(*a))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let txn = store.begin_read().context(EngineSnafu)?;
        let index = txn.open_table(Tables::ACCOUNT_INDEX).context(TableSnafu)?;
        let table = txn.open_table(Tables::ACCOUNTS).context(TableSnafu)?;
        for address in missing {
            let Some(id) = AccountStore::id_by_address(&index, address).context(RowsSnafu)?
            else {
                continue;
            };
            let account = AccountStore::get(&table, id)
                .context(RowsSnafu)?
                .ok_or_else(|| IndexError::Invariant {
                    message: format!("address index points at missing account {id}"),
                })?;
            self.by_address.insert(account.address.clone(), id);
            self.touched.insert(id, account.last_level);
            self.map.insert(id, account);
        }
        Ok(())
    }

    /// Removes an account whose creating block is being reverted.
    pub fn remove(&mut self, id: AccountId) {
        if let Some(account) = self.map.remove(&id) {
            self.by_address.remove(&account.address);
        }
        self.touched.remove(&id);
        self.dirty.remove(&id);
    }

    /// Accounts mutated since the last [`clear_dirty`], in id order.
    ///
    /// [`clear_dirty`]: AccountCache::clear_dirty
    pub fn dirty_ids(&self) -> Vec<AccountId> {
        self.dirty.iter().copied().collect()
    }

    /// Clears dirty marks after a successful commit. This is the
    /// mirror-state equivalent of nulling navigation references: nothing
    /// from the committed block's working set leaks into the next one.
    pub fn clear_dirty(&mut self) {
        self.dirty.clear();
    }

    /// Number of cached accounts.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Batched eviction of the least-recently-touched half of capacity,
    /// once past the threshold. Dirty accounts are never evicted.
    pub fn trim(&mut self) {
        if self.map.len() * 100 < self.capacity * TRIM_THRESHOLD_PERCENT {
            return;
        }
        let mut by_recency: Vec<(AccountId, Level)> = self
            .touched
            .iter()
            .filter(|(id, _)| !self.dirty.contains(id))
            .map(|(&id, &level)| (id, level))
            .collect();
        by_recency.sort_by_key(|&(_, level)| level);
        let evict = self.capacity / 2;
        for (id, _) in by_recency.into_iter().take(evict) {
            if let Some(account) = self.map.remove(&id) {
                self.by_address.remove(&account.address);
            }
            self.touched.remove(&id);
        }
    }

    /// Drops everything. Called when a transaction rolls back, since
    /// cache mutations are not covered by the storage transaction.
    pub fn reset(&mut self) {
        self.map.clear();
        self.by_address.clear();
        self.touched.clear();
        self.dirty.clear();
    }
}
