// # Identity
//
// Identities of the messaging network the referral bot serves.
//
// An identity is a fixed 33-byte value: 32 bytes of id data followed by a
// single type byte. Two encodings of it cross the ledger's boundaries:
//
// - The canonical string form (standard base64) keys redemptions in the
//   main store and appears in logs.
// - The identity directory keys its records by a bytea hex literal derived
//   from the `0x`-prefixed hex form, see [`directory_key`].

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Length of the id data portion
pub const ID_DATA_LEN: usize = 32;

/// Full identity length, including the trailing type byte
pub const IDENTITY_LEN: usize = ID_DATA_LEN + 1;

/// Type of entity an identity belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdentityKind {
    Generic,
    Gateway,
    Node,
    User,
    /// Type byte this crate does not know about
    Other(u8),
}

impl IdentityKind {
    fn from_byte(byte: u8) -> Self {
        match byte {
            0 => Self::Generic,
            1 => Self::Gateway,
            2 => Self::Node,
            3 => Self::User,
            other => Self::Other(other),
        }
    }

    fn as_byte(self) -> u8 {
        match self {
            Self::Generic => 0,
            Self::Gateway => 1,
            Self::Node => 2,
            Self::User => 3,
            Self::Other(byte) => byte,
        }
    }
}

/// A messaging network identity
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Identity([u8; IDENTITY_LEN]);

impl Identity {
    /// Build an identity from id data and a type
    pub fn new(data: [u8; ID_DATA_LEN], kind: IdentityKind) -> Self {
        let mut bytes = [0u8; IDENTITY_LEN];
        bytes[..ID_DATA_LEN].copy_from_slice(&data);
        bytes[ID_DATA_LEN] = kind.as_byte();
        Self(bytes)
    }

    /// Build an identity from its full marshalled form
    ///
    /// Fails with [`Error::InvalidInput`] unless exactly [`IDENTITY_LEN`]
    /// bytes are supplied.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; IDENTITY_LEN] = bytes.try_into().map_err(|_| {
            Error::invalid_input(format!(
                "identity must be {} bytes, got {}",
                IDENTITY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    /// Marshalled form of the identity
    pub fn as_bytes(&self) -> &[u8; IDENTITY_LEN] {
        &self.0
    }

    /// The identity's type
    pub fn kind(&self) -> IdentityKind {
        IdentityKind::from_byte(self.0[ID_DATA_LEN])
    }

    /// `0x`-prefixed lowercase hex of all [`IDENTITY_LEN`] bytes
    pub fn hex_encode(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

/// Transcode an identity into the identity directory's key encoding.
///
/// The directory stores ids as bytea and is queried with the bytea hex
/// literal: the leading `0` of [`Identity::hex_encode`] is dropped and a
/// single `\` escape takes its place, giving `\x` followed by 66 hex digits.
///
/// Precondition: identities are always [`IDENTITY_LEN`] bytes, so the hex
/// form always starts with `0x` and has a fixed length of 68 characters.
pub fn directory_key(identity: &Identity) -> String {
    let encoded = identity.hex_encode();
    debug_assert_eq!(encoded.len(), 2 + IDENTITY_LEN * 2);
    format!("\\{}", &encoded[1..])
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&STANDARD.encode(self.0))
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self)
    }
}

impl FromStr for Identity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| Error::invalid_input(format!("identity is not valid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
