//! Row serialization.
//!
//! Every persisted row goes through this module so the wire format
//! (postcard) and its error handling stay in one place.

use serde::{de::DeserializeOwned, Serialize};
use snafu::Snafu;

/// Codec failure.
#[derive(Debug, Snafu)]
pub enum CodecError {
    /// A row could not be serialized.
    #[snafu(display("row encoding failed: {source}"))]
    Encode {
        /// Underlying postcard error.
        source: postcard::Error,
    },

    /// Stored bytes could not be deserialized into the expected row type.
    #[snafu(display("row decoding failed: {source}"))]
    Decode {
        /// Underlying postcard error.
        source: postcard::Error,
    },
}

/// Serializes a row to bytes.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode<T: Serialize>(row: &T) -> Result<Vec<u8>, CodecError> {
    postcard::to_allocvec(row).map_err(|source| CodecError::Encode { source })
}

/// Deserializes a row from stored bytes.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] if the bytes do not form a valid row.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    postcard::from_bytes(bytes).map_err(|source| CodecError::Decode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Account, AccountId};

    #[test]
    fn test_account_row_roundtrip() {
        let mut acc = Account::new(AccountId::new(3), "tz1abc", 7);
        acc.balance = 12345;
        let bytes = encode(&acc).expect("encode account");
        let decoded: Account = decode(&bytes).expect("decode account");
        assert_eq!(acc, decoded);
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result: Result<Account, _> = decode(&[0xFF, 0xFF, 0xFF]);
        assert!(result.is_err());
    }
}
