//! Protocol bootstrap, activation and context migration.
//!
//! Genesis bootstrap seeds the mirror: initial accounts and balances,
//! protocol zero, and the rights of the first cycles. Activation closes
//! the predecessor protocol, opens the new one, and runs the context
//! migration; deactivation is the exact mirror and exists so a reorg
//! across an upgrade boundary round-trips.

use sha2::{Digest, Sha256};
use snafu::{OptionExt, ResultExt};
use tracing::info;

use tzmirror_storage::{AccountStore, CycleStore, ProtocolStore, Tables};
use tzmirror_types::{Cycle, Protocol, ProtocolCode, ProtocolConstants};

use crate::context::Ctx;
use crate::cycles::{dematerialize_cycle, materialize_cycle};
use crate::error::{EngineSnafu, InvariantSnafu, Result, RowsSnafu, TableSnafu};
use crate::rights::{derive_seed, StakeWeight};

/// One account seeded at genesis.
#[derive(Debug, Clone)]
pub struct BootstrapAccount {
    /// Public address.
    pub address: String,
    /// Initial balance, in mutez.
    pub balance: i64,
    /// Whether the account starts as a registered delegate.
    pub delegate: bool,
}

/// Everything the genesis block needs beyond its raw document.
#[derive(Debug, Clone, Default)]
pub struct BootstrapParams {
    /// Initial accounts in creation order.
    pub accounts: Vec<BootstrapAccount>,
}

/// Loads a protocol row by hash, caching it.
pub fn protocol_by_hash(ctx: &mut Ctx<'_>, hash: &str) -> Result<Protocol> {
    if let Some(code) = ctx.cache.protocol_code(hash) {
        if let Some(protocol) = ctx.cache.protocol(code) {
            return Ok(protocol.clone());
        }
    }
    let protocol = {
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let index = txn.open_table(Tables::PROTOCOL_INDEX).context(TableSnafu)?;
        let code = ProtocolStore::code_by_hash(&index, hash)
            .context(RowsSnafu)?
            .context(InvariantSnafu {
                message: format!("protocol {hash} not found"),
            })?;
        let table = txn.open_table(Tables::PROTOCOLS).context(TableSnafu)?;
        ProtocolStore::get(&table, code)
            .context(RowsSnafu)?
            .context(InvariantSnafu {
                message: format!("protocol index points at missing code {code}"),
            })?
    };
    ctx.cache.insert_protocol(protocol.clone());
    Ok(protocol)
}

/// Loads a protocol row by numeric code, caching it.
pub fn protocol_by_code(ctx: &mut Ctx<'_>, code: ProtocolCode) -> Result<Protocol> {
    if let Some(protocol) = ctx.cache.protocol(code) {
        return Ok(protocol.clone());
    }
    let protocol = {
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::PROTOCOLS).context(TableSnafu)?;
        ProtocolStore::get(&table, code)
            .context(RowsSnafu)?
            .context(InvariantSnafu {
                message: format!("protocol with code {code} not found"),
            })?
    };
    ctx.cache.insert_protocol(protocol.clone());
    Ok(protocol)
}

fn stored_cycle(ctx: &Ctx<'_>, index: i32) -> Result<Option<Cycle>> {
    let txn = ctx.store.begin_read().context(EngineSnafu)?;
    let table = txn.open_table(Tables::CYCLES).context(TableSnafu)?;
    CycleStore::get(&table, index).context(RowsSnafu)
}

/// Seeds the mirror from the genesis block.
///
/// Creates protocol zero, the initial accounts, and materializes cycles
/// `0..=consensus_rights_delay` so every level of the young chain has a
/// round-0 right.
pub fn bootstrap(
    ctx: &mut Ctx<'_>,
    params: &BootstrapParams,
    hash: &str,
    constants: &ProtocolConstants,
) -> Result<ProtocolCode> {
    let code = ProtocolCode::new(0);
    let protocol = Protocol {
        code,
        hash: hash.to_string(),
        first_level: 0,
        last_level: None,
        constants: *constants,
    };
    ctx.cache.insert_protocol(protocol.clone());
    ctx.uow.upsert_protocol(protocol);

    let mut issued = 0i64;
    let mut snapshot = Vec::new();
    for seed_account in &params.accounts {
        let (id, created) = ctx.resolve_or_create(&seed_account.address)?;
        if !created {
            return InvariantSnafu {
                message: format!("bootstrap account {} listed twice", seed_account.address),
            }
            .fail();
        }
        ctx.credit(id, seed_account.balance)?;
        issued += seed_account.balance;
        if seed_account.delegate {
            ctx.account_mut(id)?.promote_to_delegate(0);
            snapshot.push(StakeWeight { baker_id: id, power: seed_account.balance });
        }
    }
    ctx.uow.note_issued(issued);

    let mut seed: [u8; 32] = Sha256::digest(ctx.block.hash.as_bytes()).into();
    for cycle in 0..=ctx.constants.consensus_rights_delay {
        if cycle > 0 {
            seed = derive_seed(&seed, cycle);
        }
        materialize_cycle(ctx, cycle, seed, &snapshot)?;
    }
    ctx.chain.cycles_count = ctx.constants.consensus_rights_delay + 1;

    info!(
        accounts = params.accounts.len(),
        bakers = snapshot.len(),
        issued,
        "bootstrapped chain from genesis"
    );
    Ok(code)
}

/// Mirror of [`bootstrap`], for a reorg that unwinds genesis itself.
///
/// Reconstructs the seeded state from storage rather than from the
/// (possibly absent) bootstrap parameters.
pub fn revert_bootstrap(ctx: &mut Ctx<'_>) -> Result<()> {
    for cycle in (0..ctx.chain.cycles_count).rev() {
        dematerialize_cycle(ctx, cycle)?;
    }
    ctx.chain.cycles_count = 0;

    let accounts = {
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::ACCOUNTS).context(TableSnafu)?;
        AccountStore::all(&table).context(RowsSnafu)?
    };
    let mut issued = 0i64;
    let count = i64::try_from(accounts.len()).unwrap_or(0);
    for account in accounts {
        issued += account.balance;
        ctx.uow.note_balance_delta(-account.balance);
        ctx.cache.accounts.remove(account.id);
        ctx.uow.delete_account(account);
    }
    ctx.uow.note_issued(-issued);
    ctx.chain.counters.release_account_ids(count);

    let genesis = match ctx.cache.protocol(ProtocolCode::new(0)).cloned() {
        Some(protocol) => protocol,
        None => {
            let txn = ctx.store.begin_read().context(EngineSnafu)?;
            let table = txn.open_table(Tables::PROTOCOLS).context(TableSnafu)?;
            ProtocolStore::get(&table, ProtocolCode::new(0))
                .context(RowsSnafu)?
                .context(InvariantSnafu {
                    message: "genesis protocol missing while reverting genesis".to_string(),
                })?
        }
    };
    ctx.cache.remove_protocol(genesis.code);
    ctx.uow.remove_protocol(genesis);
    Ok(())
}

/// Activates a new protocol at the current block's level.
///
/// Closes the predecessor, opens the new version with this handler's
/// constants, and runs the context migration between the two parameter
/// tables.
pub fn activate(ctx: &mut Ctx<'_>, hash: &str, constants: &ProtocolConstants) -> Result<ProtocolCode> {
    let predecessor_hash = ctx.chain.protocol.clone();
    let mut predecessor = protocol_by_hash(ctx, &predecessor_hash)?;
    predecessor.last_level = Some(ctx.block.level - 1);
    ctx.cache.insert_protocol(predecessor.clone());
    ctx.uow.upsert_protocol(predecessor.clone());

    let code = ProtocolCode::new(predecessor.code.value() + 1);
    let protocol = Protocol {
        code,
        hash: hash.to_string(),
        first_level: ctx.block.level,
        last_level: None,
        constants: *constants,
    };
    ctx.cache.insert_protocol(protocol.clone());
    ctx.uow.upsert_protocol(protocol);

    migrate_context(ctx, &predecessor.constants, constants)?;

    info!(
        code = code.value(),
        protocol = hash,
        level = ctx.block.level,
        "activated protocol"
    );
    Ok(code)
}

/// Mirror of [`activate`], for a reorg unwinding the activation block.
pub fn deactivate(ctx: &mut Ctx<'_>, hash: &str) -> Result<()> {
    let activated = protocol_by_hash(ctx, hash)?;
    if activated.first_level != ctx.block.level {
        return InvariantSnafu {
            message: format!(
                "deactivating {hash} at level {} but it activated at {}",
                ctx.block.level, activated.first_level
            ),
        }
        .fail();
    }
    let mut predecessor = {
        let code = ProtocolCode::new(activated.code.value() - 1);
        let txn = ctx.store.begin_read().context(EngineSnafu)?;
        let table = txn.open_table(Tables::PROTOCOLS).context(TableSnafu)?;
        ProtocolStore::get(&table, code)
            .context(RowsSnafu)?
            .context(InvariantSnafu {
                message: format!("predecessor of {hash} missing"),
            })?
    };

    revert_context(ctx, &predecessor.constants, &activated.constants)?;

    ctx.cache.remove_protocol(activated.code);
    ctx.uow.remove_protocol(activated);

    predecessor.last_level = None;
    ctx.cache.insert_protocol(predecessor.clone());
    ctx.uow.upsert_protocol(predecessor);
    Ok(())
}

/// Rewrites context the new protocol interprets differently.
///
/// The only migrated context so far is the expected-reward side of
/// cycles materialized under the old parameter table but not yet
/// started: their `future_block_rewards` are rescaled to the new
/// per-block reward. Rights themselves are seed-derived and unaffected.
pub fn migrate_context(
    ctx: &mut Ctx<'_>,
    old: &ProtocolConstants,
    new: &ProtocolConstants,
) -> Result<()> {
    if old.baking_reward == new.baking_reward {
        return Ok(());
    }
    rescale_future_rewards(ctx, new.baking_reward)
}

/// Mirror of [`migrate_context`]: the same rescale with the tables
/// swapped, which restores the old expected rewards exactly.
pub fn revert_context(
    ctx: &mut Ctx<'_>,
    old: &ProtocolConstants,
    new: &ProtocolConstants,
) -> Result<()> {
    if old.baking_reward == new.baking_reward {
        return Ok(());
    }
    rescale_future_rewards(ctx, old.baking_reward)
}

fn rescale_future_rewards(ctx: &mut Ctx<'_>, baking_reward: i64) -> Result<()> {
    let level = ctx.block.level;
    // Bounded by the chain's cycle count, not by what storage still
    // holds: when revert crosses a cycle boundary, the dematerialized
    // cycle is already staged for deletion and must not be re-read here.
    for index in ctx.constants.cycle_of(level)..ctx.chain.cycles_count {
        let cycle = stored_cycle(ctx, index)?.context(InvariantSnafu {
            message: format!("cycle {index} missing below the chain's cycle count"),
        })?;
        if cycle.first_level <= level {
            continue;
        }
        let rows = {
            let txn = ctx.store.begin_read().context(EngineSnafu)?;
            let table = txn.open_table(Tables::BAKER_CYCLES).context(TableSnafu)?;
            CycleStore::baker_cycles_of(&table, index).context(RowsSnafu)?
        };
        for mut row in rows {
            row.future_block_rewards = i64::from(row.future_blocks) * baking_reward;
            ctx.uow.upsert_baker_cycle(row);
        }
    }
    Ok(())
}
