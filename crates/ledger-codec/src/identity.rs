//! Account identities, blockhashes and Ed25519 keypairs.
//!
//! An identity is an opaque 32-byte value. Its text form is the Base58
//! encoding of those bytes; hex is accepted on input as well. Shorter inputs
//! are treated as big-endian numbers and left-padded with zeros, so `"0x01"`
//! and `"2"` (Base58 for the byte `0x01`) denote the same identity.

use std::fmt;
use std::str::FromStr;

use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand_core::OsRng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroizing;

use crate::error::CodecError;

/// Length of an identity in bytes.
pub const IDENTITY_LENGTH: usize = 32;

/// Length of an Ed25519 signature in bytes.
pub const SIGNATURE_LENGTH: usize = 64;

/// Length of a serialized keypair secret (32-byte seed + 32-byte public key).
pub const SECRET_KEY_LENGTH: usize = 64;

/// A detached Ed25519 signature.
pub type Signature = [u8; SIGNATURE_LENGTH];

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A 32-byte public identifier for an account or program.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Identity([u8; IDENTITY_LENGTH]);

impl Identity {
    pub const fn new(bytes: [u8; IDENTITY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Build an identity from a big-endian buffer of at most 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        if bytes.len() > IDENTITY_LENGTH {
            return Err(CodecError::InvalidIdentity(format!(
                "expected at most {IDENTITY_LENGTH} bytes, got {}",
                bytes.len()
            )));
        }
        let mut buf = [0u8; IDENTITY_LENGTH];
        buf[IDENTITY_LENGTH - bytes.len()..].copy_from_slice(bytes);
        Ok(Self(buf))
    }

    pub fn from_base58(text: &str) -> Result<Self, CodecError> {
        let bytes = bs58::decode(text)
            .into_vec()
            .map_err(|e| CodecError::InvalidIdentity(format!("base58 decode failed: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Parse a hex string, with or without a `0x` prefix.
    pub fn from_hex(text: &str) -> Result<Self, CodecError> {
        let digits = text.strip_prefix("0x").unwrap_or(text);
        let bytes = if digits.len() % 2 == 1 {
            hex::decode(format!("0{digits}"))
        } else {
            hex::decode(digits)
        }
        .map_err(|e| CodecError::InvalidIdentity(format!("hex decode failed: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// The fixed-width big-endian buffer form.
    pub fn to_bytes(&self) -> [u8; IDENTITY_LENGTH] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; IDENTITY_LENGTH] {
        &self.0
    }

    pub fn to_base58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Check a detached Ed25519 signature made by this identity.
    ///
    /// Identities that are not valid curve points (program ids, for
    /// example) never verify.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        let Ok(key) = VerifyingKey::from_bytes(&self.0) else {
            return false;
        };
        let signature = ed25519_dalek::Signature::from_bytes(signature);
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Identity({})", self.to_base58())
    }
}

impl FromStr for Identity {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_base58(s)
    }
}

impl From<[u8; IDENTITY_LENGTH]> for Identity {
    fn from(bytes: [u8; IDENTITY_LENGTH]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Identity {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Identity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base58())
    }
}

impl<'de> Deserialize<'de> for Identity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::from_base58(&text).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Blockhash
// ---------------------------------------------------------------------------

/// A recent blockhash: the freshness token that bounds a transaction's
/// validity window.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Blockhash([u8; 32]);

impl Blockhash {
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Blockhash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Blockhash({self})")
    }
}

impl FromStr for Blockhash {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = bs58::decode(s)
            .into_vec()
            .map_err(|e| CodecError::Deserialization(format!("invalid blockhash: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|v: Vec<u8>| {
            CodecError::Deserialization(format!("blockhash must be 32 bytes, got {}", v.len()))
        })?;
        Ok(Self(arr))
    }
}

impl From<[u8; 32]> for Blockhash {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// An Ed25519 signing keypair.
///
/// The secret half is zeroized on drop by `ed25519-dalek`. A keypair is
/// never part of a serialized transaction; it only produces signatures.
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh random keypair from the OS RNG.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Restore a keypair from its 64-byte secret (seed followed by public key).
    ///
    /// Fails if the length is wrong or the public half does not match the seed.
    pub fn from_secret_bytes(secret: &[u8]) -> Result<Self, CodecError> {
        let bytes: &[u8; SECRET_KEY_LENGTH] = secret.try_into().map_err(|_| {
            CodecError::InvalidKeypair(format!(
                "expected {SECRET_KEY_LENGTH} bytes, got {}",
                secret.len()
            ))
        })?;
        let signing_key = SigningKey::from_keypair_bytes(bytes)
            .map_err(|e| CodecError::InvalidKeypair(e.to_string()))?;
        Ok(Self { signing_key })
    }

    /// Derive a keypair from a 32-byte Ed25519 seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn identity(&self) -> Identity {
        Identity(self.signing_key.verifying_key().to_bytes())
    }

    /// The 64-byte secret, wiped when the returned buffer is dropped.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LENGTH]> {
        Zeroizing::new(self.signing_key.to_keypair_bytes())
    }

    /// Produce a detached signature over `message`.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message).to_bytes()
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("identity", &self.identity())
            .finish_non_exhaustive()
    }
}
