//! Transaction wire-format codec for the ledger client.
//!
//! This crate builds, signs, serializes and parses transactions in the
//! node's compact binary format by hand, using `ed25519-dalek` for Ed25519
//! signing and `bs58` for Base58 text. It performs no I/O; submission and
//! confirmation live in `ledger-client`.

pub mod compact;
pub mod error;
pub mod identity;
pub mod instruction;
pub mod transaction;

// Re-export key public types for ergonomic imports.
pub use compact::{decode_compact_u16, encode_compact_u16};
pub use error::CodecError;
pub use identity::{
    Blockhash, Identity, KeyPair, Signature, IDENTITY_LENGTH, SECRET_KEY_LENGTH,
    SIGNATURE_LENGTH,
};
pub use instruction::{AccountRef, Instruction};
pub use transaction::{
    CompiledInstruction, Message, SignaturePair, SignerParty, Transaction, MAX_ACCOUNT_KEYS,
    PACKET_DATA_SIZE,
};
