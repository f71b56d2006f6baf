//! Field elements and the hash/address newtypes built on them.
//!
//! Everything the network speaks is a field element ("felt") of the
//! Stark prime field. Values are kept as 32 big-endian bytes and printed in
//! the canonical JSON-RPC form: lowercase hex with no leading zeros.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The field modulus `2^251 + 17 * 2^192 + 1`, big-endian.
const FIELD_PRIME: [u8; 32] = [
    0x08, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01,
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FeltError {
    #[error("felt must be 0x-prefixed hex, got {0:?}")]
    MissingPrefix(String),

    #[error("felt {0:?} is not valid hex")]
    InvalidHex(String),

    #[error("felt {0:?} exceeds 32 bytes")]
    TooLong(String),

    #[error("felt {0:?} is not below the field prime")]
    OutOfRange(String),
}

/// A Stark field element.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Felt([u8; 32]);

impl Felt {
    pub const ZERO: Felt = Felt([0u8; 32]);

    /// Build from big-endian bytes, rejecting values outside the field.
    pub fn from_bytes_be(bytes: [u8; 32]) -> Result<Self, FeltError> {
        if bytes >= FIELD_PRIME {
            return Err(FeltError::OutOfRange(hex::encode(bytes)));
        }
        Ok(Self(bytes))
    }

    pub fn from_u128(value: u128) -> Self {
        let mut bytes = [0u8; 32];
        bytes[16..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn to_bytes_be(&self) -> [u8; 32] {
        self.0
    }

    /// Returns the value as a `u128` if it fits.
    pub fn to_u128(&self) -> Option<u128> {
        if self.0[..16].iter().any(|b| *b != 0) {
            return None;
        }
        let mut low = [0u8; 16];
        low.copy_from_slice(&self.0[16..]);
        Some(u128::from_be_bytes(low))
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl FromStr for Felt {
    type Err = FeltError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or_else(|| FeltError::MissingPrefix(s.to_string()))?;
        if digits.is_empty() || digits.len() > 64 {
            return Err(FeltError::TooLong(s.to_string()));
        }
        let padded = format!("{digits:0>64}");
        let decoded = hex::decode(&padded).map_err(|_| FeltError::InvalidHex(s.to_string()))?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Self::from_bytes_be(bytes).map_err(|_| FeltError::OutOfRange(s.to_string()))
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        let trimmed = encoded.trim_start_matches('0');
        if trimmed.is_empty() {
            write!(f, "0x0")
        } else {
            write!(f, "0x{trimmed}")
        }
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Felt({self})")
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

macro_rules! felt_newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Felt);

        impl $name {
            pub fn felt(&self) -> Felt {
                self.0
            }
        }

        impl From<Felt> for $name {
            fn from(felt: Felt) -> Self {
                Self(felt)
            }
        }

        impl FromStr for $name {
            type Err = FeltError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

felt_newtype!(
    /// Sierra class hash as the network computes it; the idempotency key for declaration.
    ClassHash
);
felt_newtype!(
    /// Address of a deployed contract or account.
    ContractAddress
);
felt_newtype!(
    /// Hash identifying a submitted transaction.
    TxHash
);

impl From<Felt> for starknet::core::types::Felt {
    fn from(felt: Felt) -> Self {
        starknet::core::types::Felt::from_bytes_be(&felt.0)
    }
}

impl From<starknet::core::types::Felt> for Felt {
    fn from(felt: starknet::core::types::Felt) -> Self {
        // starknet felts are already reduced below the prime
        Self(felt.to_bytes_be())
    }
}
