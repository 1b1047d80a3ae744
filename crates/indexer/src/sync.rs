//! Head-follow sync loop.
//!
//! One step at a time: poll the node's head, and either commit the next
//! level, revert the mirror's head when the node disagrees about its
//! hash, or sleep until a new head appears. Reorgs unwind one block per
//! step; the predecessor check fails again at the next step until the
//! mirror is back on the node's chain, so deep forks rewind naturally.
//!
//! The loop owns retry policy. Infrastructure failures back off
//! exponentially and retry the same step; deterministic failures
//! (validation, unsupported protocol, invariant violations) stop the
//! process, because retrying the same input reproduces them.

use std::sync::Arc;
use std::time::Duration;

use snafu::{ResultExt, Snafu};
use tracing::{debug, info, warn};

use tzmirror_engine::{Dispatcher, EngineContext, IndexError};
use tzmirror_types::Level;

use crate::rpc::{NodeRpc, RpcError};

/// Sync loop failure.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    /// A node query failed.
    #[snafu(display("node rpc failed: {source}"))]
    Node { source: RpcError },

    /// A commit or revert failed.
    #[snafu(display("engine failed: {source}"))]
    Engine { source: IndexError },
}

impl SyncError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Node { .. } => true,
            Self::Engine { source } => source.is_retryable(),
        }
    }
}

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// What one sync step did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    /// Committed the block at this level.
    Advanced(Level),
    /// Reverted the block at this level; the node's chain forked below.
    Reverted(Level),
    /// Caught up with the node's head.
    Idle,
}

/// Drives the engine from the node's chain.
pub struct SyncLoop {
    engine: EngineContext,
    dispatcher: Dispatcher,
    rpc: Arc<dyn NodeRpc>,
    poll_interval: Duration,
}

impl SyncLoop {
    /// Builds the loop over an opened engine context.
    #[must_use]
    pub fn new(
        engine: EngineContext,
        dispatcher: Dispatcher,
        rpc: Arc<dyn NodeRpc>,
        poll_interval: Duration,
    ) -> Self {
        Self { engine, dispatcher, rpc, poll_interval }
    }

    /// Runs until a fatal error or a shutdown signal.
    pub async fn run(mut self) -> Result<(), SyncError> {
        info!(level = self.engine.chain.level, "sync loop starting");
        let mut backoff = INITIAL_BACKOFF;
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!(level = self.engine.chain.level, "shutdown signal received");
                    return Ok(());
                }
                result = self.step() => match result {
                    Ok(Progress::Advanced(level)) => {
                        backoff = INITIAL_BACKOFF;
                        debug!(level, "block committed");
                    }
                    Ok(Progress::Reverted(level)) => {
                        backoff = INITIAL_BACKOFF;
                        info!(level, "reverted orphaned block");
                    }
                    Ok(Progress::Idle) => {
                        backoff = INITIAL_BACKOFF;
                        tokio::time::sleep(self.poll_interval).await;
                    }
                    Err(err) if err.is_retryable() => {
                        warn!(
                            error = %err,
                            backoff_secs = backoff.as_secs(),
                            "sync step failed, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = (backoff * 2).min(MAX_BACKOFF);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
    }

    /// One sync step: advance, revert, or report idle.
    async fn step(&mut self) -> Result<Progress, SyncError> {
        let head = self.rpc.head_level().await.context(NodeSnafu)?;
        let level = self.engine.chain.level;
        if level >= head {
            return Ok(Progress::Idle);
        }

        let next = level + 1;
        let raw = self.rpc.block_at(next).await.context(NodeSnafu)?;

        if level >= 0 && raw.header.predecessor != self.engine.chain.hash {
            // The node's block does not build on our head: our head is
            // orphaned. Unwind it and re-check from the new head.
            let handler = self
                .dispatcher
                .resolve(level, &self.engine.chain.protocol)
                .context(EngineSnafu)?;
            let engine = &mut self.engine;
            tokio::task::block_in_place(|| handler.revert_last_block(engine))
                .context(EngineSnafu)?;
            return Ok(Progress::Reverted(level));
        }

        let handler = self
            .dispatcher
            .resolve(next, &raw.protocol)
            .context(EngineSnafu)?;
        // Commits fsync; keep the blocking work off the async executor.
        let engine = &mut self.engine;
        tokio::task::block_in_place(|| handler.commit_block(engine, &raw))
            .context(EngineSnafu)?;
        Ok(Progress::Advanced(next))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use parking_lot::Mutex;

    use tzmirror_engine::dispatcher::{GENESIS, PARIS};
    use tzmirror_engine::{BootstrapAccount, BootstrapParams, NoFallback};
    use tzmirror_storage::StorageEngine;
    use tzmirror_types::config::{CacheConfig, EngineConfig};
    use tzmirror_types::raw::{RawBlock, RawBlockMetadata, RawHeader, OPERATION_GROUPS};

    use super::*;

    struct MockNode {
        blocks: Mutex<HashMap<Level, RawBlock>>,
        head: Mutex<Level>,
    }

    impl MockNode {
        fn new() -> Self {
            Self { blocks: Mutex::new(HashMap::new()), head: Mutex::new(-1) }
        }

        fn publish(&self, block: RawBlock) {
            let level = block.header.level;
            self.blocks.lock().insert(level, block);
            let mut head = self.head.lock();
            *head = (*head).max(level);
        }
    }

    #[async_trait]
    impl NodeRpc for MockNode {
        async fn head_level(&self) -> crate::rpc::Result<Level> {
            Ok(*self.head.lock())
        }

        async fn block_at(&self, level: Level) -> crate::rpc::Result<RawBlock> {
            self.blocks
                .lock()
                .get(&level)
                .cloned()
                .ok_or(RpcError::Status { url: format!("blocks/{level}"), status: 404 })
        }

        async fn baking_right(
            &self,
            _level: Level,
            _round: i32,
        ) -> crate::rpc::Result<Option<String>> {
            Ok(None)
        }
    }

    fn timestamp(level: Level) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + i64::from(level) * 8, 0).single().expect("timestamp")
    }

    fn raw_block(level: Level, hash: &str, predecessor: &str, protocol: &str) -> RawBlock {
        let operations = if level == 0 {
            Vec::new()
        } else {
            vec![Vec::new(); OPERATION_GROUPS]
        };
        RawBlock {
            protocol: protocol.to_string(),
            hash: hash.to_string(),
            header: RawHeader {
                level,
                predecessor: predecessor.to_string(),
                timestamp: timestamp(level),
                payload_round: 0,
            },
            metadata: RawBlockMetadata {
                protocol: protocol.to_string(),
                next_protocol: PARIS.to_string(),
                proposer: "tz1baker".to_string(),
                baker: "tz1baker".to_string(),
                balance_updates: Vec::new(),
            },
            operations,
        }
    }

    fn engine() -> EngineContext {
        let store = StorageEngine::open_in_memory().expect("open");
        let mut engine = EngineContext::open(
            store,
            &CacheConfig::default(),
            EngineConfig { fallback_protocol: None, validation: true, diagnostics: true },
            Box::new(NoFallback),
        )
        .expect("open context");
        engine.bootstrap = Some(BootstrapParams {
            accounts: vec![BootstrapAccount {
                address: "tz1baker".to_string(),
                balance: 1_000_000_000,
                delegate: true,
            }],
        });
        engine
    }

    fn sync_loop(node: Arc<MockNode>) -> SyncLoop {
        SyncLoop::new(
            engine(),
            Dispatcher::standard(&EngineConfig::default()),
            node,
            Duration::from_millis(1),
        )
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_steps_commit_published_blocks() {
        let node = Arc::new(MockNode::new());
        node.publish(raw_block(0, "B0", "", GENESIS));
        node.publish(raw_block(1, "B1", "B0", PARIS));
        node.publish(raw_block(2, "B2", "B1", PARIS));
        let mut sync = sync_loop(Arc::clone(&node));

        for expected in 0..=2 {
            let progress = sync.step().await.expect("step");
            assert_eq!(progress, Progress::Advanced(expected));
        }
        assert_eq!(sync.engine.chain.level, 2);
        assert_eq!(sync.engine.chain.hash, "B2");
        assert_eq!(sync.step().await.expect("idle"), Progress::Idle);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_fork_reverts_then_follows_new_branch() {
        let node = Arc::new(MockNode::new());
        node.publish(raw_block(0, "B0", "", GENESIS));
        node.publish(raw_block(1, "B1", "B0", PARIS));
        node.publish(raw_block(2, "B2", "B1", PARIS));
        let mut sync = sync_loop(Arc::clone(&node));
        for _ in 0..=2 {
            sync.step().await.expect("step");
        }

        // The node replaces level 2 and extends the new branch.
        node.publish(raw_block(2, "B2'", "B1", PARIS));
        node.publish(raw_block(3, "B3'", "B2'", PARIS));

        assert_eq!(sync.step().await.expect("revert"), Progress::Reverted(2));
        assert_eq!(sync.engine.chain.level, 1);
        assert!(sync.engine.chain.reorganized);

        assert_eq!(sync.step().await.expect("advance"), Progress::Advanced(2));
        assert_eq!(sync.step().await.expect("advance"), Progress::Advanced(3));
        assert_eq!(sync.engine.chain.hash, "B3'");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_missing_block_is_retryable() {
        let node = Arc::new(MockNode::new());
        node.publish(raw_block(0, "B0", "", GENESIS));
        let mut sync = sync_loop(Arc::clone(&node));
        sync.step().await.expect("genesis");

        // Head claims level 1 but the block is not served yet.
        *node.head.lock() = 1;
        let err = sync.step().await.expect_err("missing block");
        assert!(err.is_retryable());
    }
}
