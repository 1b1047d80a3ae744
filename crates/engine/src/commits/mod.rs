//! Operation commit framework.
//!
//! One commit per operation kind, registered in a lookup table. A
//! commit's `apply` and `revert` are textual mirrors: every `+=` in
//! apply has a `-=` in revert, every allocation a release, so a
//! committed block followed by its revert is bit-identical to never
//! having applied it.

mod double_baking;
mod transaction;

pub use double_baking::DoubleBakingCommit;
pub use transaction::TransactionCommit;

use std::collections::HashMap;

use tzmirror_types::raw::RawOperationContent;
use tzmirror_types::{Operation, OperationFlags, OperationKind};

use crate::context::Ctx;
use crate::error::{IndexError, Result};

/// One operation kind's apply/revert pair.
pub trait OperationCommit: Send + Sync + std::fmt::Debug {
    /// The kind this commit handles.
    fn kind(&self) -> OperationKind;

    /// Applies one raw content against the commit context.
    ///
    /// Returns the operation rows produced: the parent row first, then
    /// any sub-operation rows in application order. The handler stages
    /// them and sets the block's operation flags.
    fn apply(
        &self,
        ctx: &mut Ctx<'_>,
        group_hash: &str,
        content: &RawOperationContent,
    ) -> Result<Vec<Operation>>;

    /// Undoes one stored operation row.
    ///
    /// Rows of a block are reverted in descending id order, so sub
    /// rows come back before their parent and the parent releases the
    /// allocations last.
    fn revert(&self, ctx: &mut Ctx<'_>, op: &Operation) -> Result<()>;
}

/// Kind discriminator of a raw content, for dispatch.
#[must_use]
pub fn raw_kind(content: &RawOperationContent) -> OperationKind {
    match content {
        RawOperationContent::Transaction(_) => OperationKind::Transaction,
        RawOperationContent::DoubleBakingEvidence(_) => OperationKind::DoubleBaking,
    }
}

/// Block flag set by an operation kind.
#[must_use]
pub fn flag_of(kind: OperationKind) -> OperationFlags {
    match kind {
        OperationKind::Endorsement => OperationFlags::ENDORSEMENTS,
        OperationKind::Ballot => OperationFlags::BALLOTS,
        OperationKind::Proposal => OperationFlags::PROPOSALS,
        OperationKind::Activation => OperationFlags::ACTIVATIONS,
        OperationKind::DoubleBaking => OperationFlags::DOUBLE_BAKINGS,
        OperationKind::DoubleEndorsing => OperationFlags::DOUBLE_ENDORSINGS,
        OperationKind::NonceRevelation => OperationFlags::NONCE_REVELATIONS,
        OperationKind::Reveal => OperationFlags::REVEALS,
        OperationKind::Delegation => OperationFlags::DELEGATIONS,
        OperationKind::Origination => OperationFlags::ORIGINATIONS,
        OperationKind::Transaction => OperationFlags::TRANSACTIONS,
        OperationKind::Staking => OperationFlags::STAKING,
    }
}

/// Commit lookup table, keyed by operation kind.
#[derive(Debug)]
pub struct CommitRegistry {
    commits: HashMap<OperationKind, Box<dyn OperationCommit>>,
}

impl CommitRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self { commits: HashMap::new() }
    }

    /// The standard registry with every implemented commit.
    #[must_use]
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(TransactionCommit));
        registry.register(Box::new(DoubleBakingCommit));
        registry
    }

    /// Registers a commit under its kind. Later registrations of the
    /// same kind replace earlier ones, which is how a protocol version
    /// swaps in changed semantics.
    pub fn register(&mut self, commit: Box<dyn OperationCommit>) {
        self.commits.insert(commit.kind(), commit);
    }

    /// Looks up the commit for a kind.
    pub fn get(&self, kind: OperationKind) -> Result<&dyn OperationCommit> {
        self.commits
            .get(&kind)
            .map(AsRef::as_ref)
            .ok_or_else(|| IndexError::UnsupportedOperation { kind: format!("{kind:?}") })
    }
}

impl Default for CommitRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_covers_implemented_kinds() {
        let registry = CommitRegistry::standard();
        assert!(registry.get(OperationKind::Transaction).is_ok());
        assert!(registry.get(OperationKind::DoubleBaking).is_ok());
        let err = registry.get(OperationKind::Ballot).expect_err("unregistered");
        assert!(matches!(err, IndexError::UnsupportedOperation { .. }));
    }

    #[test]
    fn test_flags_line_up_with_kinds() {
        assert_eq!(flag_of(OperationKind::Transaction), OperationFlags::TRANSACTIONS);
        assert_eq!(flag_of(OperationKind::DoubleBaking), OperationFlags::DOUBLE_BAKINGS);
    }
}
