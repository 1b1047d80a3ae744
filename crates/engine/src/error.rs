//! Replay-engine error taxonomy.
//!
//! The engine recovers nothing locally: every failure propagates to the
//! sync loop, which owns retry policy. The taxonomy exists so the loop
//! can tell a transient storage hiccup from a fatal decoder bug:
//!
//! - Validation: a decoded block failed a structural or balance-update
//!   shape check. Fatal to this commit attempt; sometimes recoverable
//!   by reconfiguring the fallback protocol.
//! - Unsupported protocol: the dispatcher has no handler. The process
//!   must stop rather than guess.
//! - Invariant violation: the decoder or state model is wrong (missing
//!   right holder, sub-id overflow). Never recoverable.
//! - Storage / RPC: infrastructure failures; the only retryable class.

use snafu::Snafu;

use tzmirror_storage::{EngineError, FlushError, StoreError};

/// Unified result type for engine operations.
pub type Result<T, E = IndexError> = std::result::Result<T, E>;

/// Replay-engine error.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum IndexError {
    /// A raw block failed a structural or shape check.
    #[snafu(display("block validation failed: {message}"))]
    Validation { message: String },

    /// No handler is compiled for the protocol and no fallback matched.
    #[snafu(display("unsupported protocol {hash}; refusing to guess"))]
    UnsupportedProtocol { hash: String },

    /// A raw operation kind has no registered commit.
    #[snafu(display("no commit registered for operation kind {kind}"))]
    UnsupportedOperation { kind: String },

    /// The decoder or state model is wrong. Non-recoverable.
    #[snafu(display("invariant violation: {message}"))]
    Invariant { message: String },

    /// Database open/begin failure.
    #[snafu(display("storage engine error: {source}"))]
    Engine { source: EngineError },

    /// Row read failure.
    #[snafu(display("row store error: {source}"))]
    Rows { source: StoreError },

    /// Changeset flush failure.
    #[snafu(display("flush error: {source}"))]
    Flush { source: FlushError },

    /// Table open failure inside the block transaction.
    #[snafu(display("table error: {source}"))]
    Table { source: redb::TableError },

    /// Transaction commit failure.
    #[snafu(display("commit error: {source}"))]
    CommitTxn { source: redb::CommitError },

    /// A one-off node RPC lookup (rights fallback, issuance) failed.
    #[snafu(display("node rpc error: {message}"))]
    Rpc { message: String },
}

impl IndexError {
    /// Whether the sync loop may retry the same block after backoff.
    ///
    /// Validation, unsupported-protocol and invariant errors are
    /// deterministic: retrying the same input reproduces them.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Engine { .. }
                | Self::Rows { .. }
                | Self::Flush { .. }
                | Self::Table { .. }
                | Self::CommitTxn { .. }
                | Self::Rpc { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deterministic_errors_are_not_retryable() {
        let err = IndexError::Validation { message: "bad shape".into() };
        assert!(!err.is_retryable());
        let err = IndexError::UnsupportedProtocol { hash: "Pt1".into() };
        assert!(!err.is_retryable());
        let err = IndexError::Invariant { message: "sub-id overflow".into() };
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_rpc_errors_are_retryable() {
        let err = IndexError::Rpc { message: "timeout".into() };
        assert!(err.is_retryable());
    }
}
