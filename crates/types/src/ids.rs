//! Type-safe identifier newtypes.
//!
//! Every internal identifier is a newtype over its numeric representation
//! so that an account id can never be passed where an operation id is
//! expected. Ids are allocated by the counter allocator in
//! [`crate::ChainState`] and are never reused.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Generates a newtype wrapper around a numeric type for type-safe identifiers.
///
/// Each generated type provides:
/// - Standard derives: Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord
/// - Serde with `#[serde(transparent)]` for wire format compatibility
/// - `From<inner>` and `Into<inner>` conversions
/// - `Display` with a semantic prefix (e.g., `acct:123`)
/// - `new()` constructor and `value()` accessor
macro_rules! define_id {
    (
        $(#[$meta:meta])*
        $name:ident, $inner:ty, $prefix:expr
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord,
            Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            /// Creates a new identifier from a raw value.
            #[inline]
            pub const fn new(value: $inner) -> Self {
                Self(value)
            }

            /// Returns the raw numeric value.
            #[inline]
            pub const fn value(self) -> $inner {
                self.0
            }
        }

        impl From<$inner> for $name {
            #[inline]
            fn from(value: $inner) -> Self {
                Self(value)
            }
        }

        impl From<$name> for $inner {
            #[inline]
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}:{}", $prefix, self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = <$inner as std::str::FromStr>::Err;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                s.parse::<$inner>().map(Self)
            }
        }
    };
}

define_id!(
    /// Internal account identifier, assigned at first activity and never
    /// reused. The public address is the external identity; this id is the
    /// relational one.
    ///
    /// # Display
    ///
    /// Formats with `acct:` prefix: `acct:42`.
    AccountId, i64, "acct"
);

define_id!(
    /// Operation identifier with reserved low bits for sub-operation ids.
    ///
    /// The allocator hands out `counter << SUB_ID_BITS`, so internal
    /// results of a batched operation derive their own unique ids from the
    /// parent without a second allocator. See [`OperationId::with_sub`].
    ///
    /// # Display
    ///
    /// Formats with `op:` prefix: `op:65536`.
    OperationId, i64, "op"
);

define_id!(
    /// Big-map identifier.
    BigMapId, i64, "bigmap"
);

define_id!(
    /// Smart-contract script identifier.
    ScriptId, i64, "script"
);

define_id!(
    /// Numeric protocol code, assigned in activation order (genesis = 0).
    ProtocolCode, i32, "proto"
);

impl OperationId {
    /// Derives the sub-operation id for the `sub`-th internal result.
    ///
    /// Returns `None` when `sub` does not fit in the reserved low bits;
    /// the caller must treat that as a fatal invariant violation, since it
    /// means the id layout itself can no longer represent the chain.
    #[must_use]
    pub fn with_sub(self, sub: u32) -> Option<OperationId> {
        if u64::from(sub) >= (1u64 << crate::SUB_ID_BITS) {
            return None;
        }
        Some(OperationId(self.0 | i64::from(sub)))
    }

    /// Returns the parent id with the sub-id bits cleared.
    #[must_use]
    pub fn parent(self) -> OperationId {
        OperationId(self.0 & !((1i64 << crate::SUB_ID_BITS) - 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(AccountId::new(42).to_string(), "acct:42");
        assert_eq!(ProtocolCode::new(3).to_string(), "proto:3");
    }

    #[test]
    fn test_sub_id_derivation() {
        let parent = OperationId::new(7 << crate::SUB_ID_BITS);
        let sub = parent.with_sub(3).expect("sub id fits");
        assert_eq!(sub.value(), (7 << crate::SUB_ID_BITS) | 3);
        assert_eq!(sub.parent(), parent);
    }

    #[test]
    fn test_sub_id_overflow_is_rejected() {
        let parent = OperationId::new(1 << crate::SUB_ID_BITS);
        assert!(parent.with_sub(1 << crate::SUB_ID_BITS).is_none());
    }

    #[test]
    fn test_serde_transparent() {
        let id = AccountId::new(9);
        let json = serde_json::to_string(&id).expect("serialize id");
        assert_eq!(json, "9");
    }
}
