//! Engine context and the per-block commit context.
//!
//! [`EngineContext`] is the long-lived state: the storage engine, the
//! entity cache tier and the chain-state singleton. [`Ctx`] is the view
//! handed to operation commits while one block is being applied or
//! reverted; it borrows the long-lived state plus the block row under
//! construction and the block's unit of work.

use redb::WriteTransaction;
use snafu::ResultExt;

use tzmirror_storage::{ChainStore, StatisticsStore, StorageEngine, Tables, UnitOfWork};
use tzmirror_types::config::{CacheConfig, EngineConfig};
use tzmirror_types::{
    Account, AccountId, Block, ChainState, Level, ProtocolConstants, Statistics,
};

use crate::cache::EntityCache;
use crate::error::{EngineSnafu, IndexError, Result, RowsSnafu, TableSnafu};
use crate::migration::BootstrapParams;
use crate::rights::RightsFallback;

/// Second flush stage, run inside the block transaction after the main
/// changeset flush. Side tables derived from committed blocks (price
/// quotes and similar) hook in here.
pub trait PostCommitStage {
    /// Stages derived rows for a newly applied block.
    fn stage(&mut self, txn: &WriteTransaction, block: &Block) -> Result<()>;

    /// Removes the derived rows of a reverted level.
    fn unstage(&mut self, txn: &WriteTransaction, level: Level) -> Result<()>;
}

/// Stage that writes nothing.
pub struct NoopStage;

impl PostCommitStage for NoopStage {
    fn stage(&mut self, _txn: &WriteTransaction, _block: &Block) -> Result<()> {
        Ok(())
    }

    fn unstage(&mut self, _txn: &WriteTransaction, _level: Level) -> Result<()> {
        Ok(())
    }
}

/// Long-lived engine state, owned by the sync loop.
pub struct EngineContext {
    /// Storage engine.
    pub store: StorageEngine,
    /// Entity cache tier.
    pub cache: EntityCache,
    /// Chain-state singleton, loaded at startup.
    pub chain: ChainState,
    /// Engine behavior switches.
    pub options: EngineConfig,
    /// One-off right lookups for evidence predating materialized rights.
    pub rights_fallback: Box<dyn RightsFallback + Send>,
    /// Genesis seed data; only consulted when committing level 0.
    pub bootstrap: Option<BootstrapParams>,
    /// Second flush stage for derived side tables.
    pub post_commit: Box<dyn PostCommitStage + Send>,
}

impl EngineContext {
    /// Opens the context over an existing storage engine, loading the
    /// chain-state singleton (or starting empty on a fresh database).
    pub fn open(
        store: StorageEngine,
        cache_config: &CacheConfig,
        options: EngineConfig,
        rights_fallback: Box<dyn RightsFallback + Send>,
    ) -> Result<Self> {
        let chain = {
            let txn = store.begin_read().context(EngineSnafu)?;
            let table = txn.open_table(Tables::CHAIN).context(TableSnafu)?;
            ChainStore::get(&table)
                .context(RowsSnafu)?
                .unwrap_or_else(ChainState::empty)
        };
        Ok(Self {
            store,
            cache: EntityCache::new(cache_config),
            chain,
            options,
            rights_fallback,
            bootstrap: None,
            post_commit: Box::new(NoopStage),
        })
    }

    /// Loads the running statistics into the cache singleton, faulting
    /// from the head's statistics row.
    pub fn statistics(&mut self) -> Result<Statistics> {
        if let Some(stats) = &self.cache.statistics {
            return Ok(stats.clone());
        }
        let stats = {
            let txn = self.store.begin_read().context(EngineSnafu)?;
            let table = txn.open_table(Tables::STATISTICS).context(TableSnafu)?;
            StatisticsStore::get(&table, self.chain.level)
                .context(RowsSnafu)?
                .unwrap_or(Statistics {
                    level: self.chain.level,
                    total_issued: 0,
                    total_burned: 0,
                    total_accounts: 0,
                })
        };
        self.cache.statistics = Some(stats.clone());
        Ok(stats)
    }
}

/// Per-block commit context.
///
/// Borrows disjoint pieces of the engine context so commits can mutate
/// cached accounts, the block row and the unit of work through one
/// handle. All balance mutations go through [`credit`] and [`debit`] so
/// the conservation sum stays complete.
///
/// [`credit`]: Ctx::credit
/// [`debit`]: Ctx::debit
pub struct Ctx<'a> {
    /// Storage engine, for cache fault-ins.
    pub store: &'a StorageEngine,
    /// Chain-state singleton, including the counter allocator.
    pub chain: &'a mut ChainState,
    /// Entity caches.
    pub cache: &'a mut EntityCache,
    /// The block row being built (apply) or unwound (revert).
    pub block: &'a mut Block,
    /// The block's staged changeset.
    pub uow: &'a mut UnitOfWork,
    /// Parameter table of the protocol handling this block.
    pub constants: &'a ProtocolConstants,
    /// Right lookups for evidence older than materialized rights.
    pub rights_fallback: &'a dyn RightsFallback,
}

impl Ctx<'_> {
    /// Resolves an address to an existing account id, faulting into the
    /// cache. `None` if the chain has never seen the address.
    pub fn resolve(&mut self, address: &str) -> Result<Option<AccountId>> {
        self.cache.accounts.get_or_load_by_address(self.store, address)
    }

    /// Resolves an address, creating the account at the current block's
    /// level if it does not exist. Returns the id and whether this call
    /// created the account.
    pub fn resolve_or_create(&mut self, address: &str) -> Result<(AccountId, bool)> {
        if let Some(id) = self.resolve(address)? {
            return Ok((id, false));
        }
        let id = self.chain.counters.next_account_id();
        self.cache
            .accounts
            .insert(Account::new(id, address, self.block.level));
        self.block.created_accounts = true;
        Ok((id, true))
    }

    /// Resolves an address that must already exist; anything else is a
    /// decoder or model bug.
    pub fn resolve_existing(&mut self, address: &str) -> Result<AccountId> {
        self.resolve(address)?.ok_or_else(|| IndexError::Invariant {
            message: format!("account {address} expected to exist"),
        })
    }

    /// Shared access to a cached account, faulting in from storage.
    pub fn account(&mut self, id: AccountId) -> Result<&Account> {
        self.cache.accounts.get_or_load(self.store, id)
    }

    /// Mutable access to a cached account (must be cached already).
    pub fn account_mut(&mut self, id: AccountId) -> Result<&mut Account> {
        self.cache.accounts.account_mut(id)
    }

    /// Adds to an account's spendable balance and records the delta.
    pub fn credit(&mut self, id: AccountId, amount: i64) -> Result<()> {
        self.account_mut(id)?.balance += amount;
        self.uow.note_balance_delta(amount);
        Ok(())
    }

    /// Subtracts from an account's spendable balance and records the
    /// delta.
    pub fn debit(&mut self, id: AccountId, amount: i64) -> Result<()> {
        self.account_mut(id)?.balance -= amount;
        self.uow.note_balance_delta(-amount);
        Ok(())
    }

    /// Adds to a delegate's own frozen stake and records the delta.
    /// The edge over external stake also accrues here.
    pub fn credit_own_stake(&mut self, id: AccountId, amount: i64) -> Result<()> {
        let account = self.account_mut(id)?;
        let data = account.delegate_mut().ok_or_else(|| IndexError::Invariant {
            message: format!("stake credited to non-delegate account {id}"),
        })?;
        data.own_staked += amount;
        self.uow.note_balance_delta(amount);
        Ok(())
    }

    /// Adds to the shared pool of a delegate's external stakers and
    /// records the delta.
    pub fn credit_external_stake(&mut self, id: AccountId, amount: i64) -> Result<()> {
        let account = self.account_mut(id)?;
        let data = account.delegate_mut().ok_or_else(|| IndexError::Invariant {
            message: format!("stake credited to non-delegate account {id}"),
        })?;
        data.external_staked += amount;
        self.uow.note_balance_delta(amount);
        Ok(())
    }
}
