//! Transaction wire format, message compilation and multi-party signing.
//!
//! The layout must match the node's parser byte for byte:
//!
//! ```text
//! Transaction:
//!   num_signatures             compact-u16
//!   signatures                 64 bytes * num_signatures
//!   message:
//!     num_required_sigs        u8
//!     num_credit_only_signed   u8
//!     num_credit_only_unsigned u8
//!     num_accounts             compact-u16
//!     account_keys             32 bytes * num_accounts
//!     recent_blockhash         32 bytes
//!     num_instructions         compact-u16
//!     instructions[]           (see below)
//!
//! Instruction:
//!   program_id_index           u8
//!   num_accounts               compact-u16
//!   account_indices            u8 * num_accounts
//!   data_len                   compact-u16
//!   data                       u8 * data_len
//! ```
//!
//! Account keys are ordered: signers first (in signature order, debitable
//! before credit-only), then debitable non-signers, then credit-only
//! non-signers (program ids land here unless referenced otherwise). The
//! header counts let the parser recover each key's permissions from its
//! position alone. Signers sign the serialized message itself, not a hash.

use std::collections::HashSet;

use crate::compact::{decode_compact_u16, encode_length};
use crate::error::CodecError;
use crate::identity::{Blockhash, Identity, KeyPair, Signature, IDENTITY_LENGTH, SIGNATURE_LENGTH};
use crate::instruction::{AccountRef, Instruction};

/// Maximum size of a serialized transaction: the 1280-byte IPv6 minimum MTU
/// minus 40 bytes of IPv6 header and 8 bytes of fragment header.
pub const PACKET_DATA_SIZE: usize = 1280 - 40 - 8;

/// Maximum number of account keys addressable by a u8 index.
pub const MAX_ACCOUNT_KEYS: usize = 256;

// ---------------------------------------------------------------------------
// Data structures
// ---------------------------------------------------------------------------

/// One signer slot: the identity and, once it has signed, its signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignaturePair {
    pub identity: Identity,
    pub signature: Option<Signature>,
}

/// A party to `sign_partial`: either a keypair that signs now, or a bare
/// identity that will sign later out of band.
#[derive(Debug, Clone, Copy)]
pub enum SignerParty<'a> {
    Keypair(&'a KeyPair),
    Identity(Identity),
}

impl SignerParty<'_> {
    pub fn identity(&self) -> Identity {
        match self {
            SignerParty::Keypair(keypair) => keypair.identity(),
            SignerParty::Identity(identity) => *identity,
        }
    }
}

impl<'a> From<&'a KeyPair> for SignerParty<'a> {
    fn from(keypair: &'a KeyPair) -> Self {
        SignerParty::Keypair(keypair)
    }
}

impl From<Identity> for SignerParty<'_> {
    fn from(identity: Identity) -> Self {
        SignerParty::Identity(identity)
    }
}

/// A compiled instruction where account references are replaced by u8
/// indices into the message's `account_keys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledInstruction {
    pub program_id_index: u8,
    pub account_indices: Vec<u8>,
    pub data: Vec<u8>,
}

/// The signable message: header counts, ordered key list, blockhash and
/// compiled instructions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// The first `num_required_signatures` keys are signers.
    pub num_required_signatures: u8,
    /// How many of the signers (taken from the end of the signer block) are
    /// credit-only.
    pub num_credit_only_signed: u8,
    /// How many of the non-signers (taken from the end of the key list) are
    /// credit-only.
    pub num_credit_only_unsigned: u8,
    pub account_keys: Vec<Identity>,
    pub recent_blockhash: Blockhash,
    pub instructions: Vec<CompiledInstruction>,
}

/// A transaction: recent blockhash, signer slots and instructions.
///
/// Built with `add`, then signed with `sign`/`sign_partial`/`add_signer`.
/// Changing the instructions or the blockhash after signing drops every
/// collected signature (the signer identities are kept), since those
/// signatures no longer cover the new message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Transaction {
    recent_blockhash: Option<Blockhash>,
    signatures: Vec<SignaturePair>,
    instructions: Vec<Instruction>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

impl Message {
    pub fn is_signer(&self, index: usize) -> bool {
        index < self.num_required_signatures as usize
    }

    pub fn is_debitable(&self, index: usize) -> bool {
        let required = self.num_required_signatures as usize;
        let total = self.account_keys.len();
        if index < required {
            index < required.saturating_sub(self.num_credit_only_signed as usize)
        } else {
            index < total.saturating_sub(self.num_credit_only_unsigned as usize)
        }
    }

    /// Serialize the message (the bytes that get signed).
    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        let mut buf = Vec::with_capacity(256);

        buf.push(self.num_required_signatures);
        buf.push(self.num_credit_only_signed);
        buf.push(self.num_credit_only_unsigned);

        buf.extend_from_slice(&encode_length(self.account_keys.len())?);
        for key in &self.account_keys {
            buf.extend_from_slice(key.as_bytes());
        }

        buf.extend_from_slice(self.recent_blockhash.as_bytes());

        buf.extend_from_slice(&encode_length(self.instructions.len())?);
        for ix in &self.instructions {
            buf.push(ix.program_id_index);

            buf.extend_from_slice(&encode_length(ix.account_indices.len())?);
            buf.extend_from_slice(&ix.account_indices);

            buf.extend_from_slice(&encode_length(ix.data.len())?);
            buf.extend_from_slice(&ix.data);
        }

        Ok(buf)
    }

    /// Parse a message from the front of `data`, returning it with the
    /// number of bytes consumed.
    pub fn deserialize(data: &[u8]) -> Result<(Self, usize), CodecError> {
        let mut reader = Reader::new(data);

        let num_required_signatures = reader.read_u8("message header")?;
        let num_credit_only_signed = reader.read_u8("message header")?;
        let num_credit_only_unsigned = reader.read_u8("message header")?;

        let num_keys = reader.read_compact()? as usize;
        let mut account_keys = Vec::with_capacity(num_keys);
        for _ in 0..num_keys {
            account_keys.push(Identity::new(reader.read_array::<IDENTITY_LENGTH>("account key")?));
        }

        let recent_blockhash = Blockhash::new(reader.read_array::<32>("recent blockhash")?);

        let num_instructions = reader.read_compact()? as usize;
        let mut instructions = Vec::with_capacity(num_instructions.min(64));
        for _ in 0..num_instructions {
            let program_id_index = reader.read_u8("program id index")?;
            let num_indices = reader.read_compact()? as usize;
            let account_indices = reader.read_bytes(num_indices, "account indices")?.to_vec();
            let data_len = reader.read_compact()? as usize;
            let data = reader.read_bytes(data_len, "instruction data")?.to_vec();
            instructions.push(CompiledInstruction {
                program_id_index,
                account_indices,
                data,
            });
        }

        let message = Self {
            num_required_signatures,
            num_credit_only_signed,
            num_credit_only_unsigned,
            account_keys,
            recent_blockhash,
            instructions,
        };
        message.check_header()?;
        message.check_keys()?;
        message.check_indices()?;

        Ok((message, reader.offset))
    }

    fn check_header(&self) -> Result<(), CodecError> {
        let required = self.num_required_signatures as usize;
        let total = self.account_keys.len();
        if required > total
            || self.num_credit_only_signed as usize > required
            || self.num_credit_only_unsigned as usize > total - required
        {
            return Err(CodecError::Deserialization(format!(
                "inconsistent message header ({}, {}, {}) for {total} keys",
                self.num_required_signatures,
                self.num_credit_only_signed,
                self.num_credit_only_unsigned
            )));
        }
        Ok(())
    }

    fn check_keys(&self) -> Result<(), CodecError> {
        let mut seen = HashSet::with_capacity(self.account_keys.len());
        if self.account_keys.iter().all(|key| seen.insert(*key)) {
            Ok(())
        } else {
            Err(CodecError::Deserialization("duplicate account key".into()))
        }
    }

    fn check_indices(&self) -> Result<(), CodecError> {
        let total = self.account_keys.len();
        for ix in &self.instructions {
            let out_of_range = std::iter::once(&ix.program_id_index)
                .chain(&ix.account_indices)
                .any(|&idx| idx as usize >= total);
            if out_of_range {
                return Err(CodecError::Deserialization(
                    "account index out of range".into(),
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Transaction building and signing
// ---------------------------------------------------------------------------

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recent_blockhash(recent_blockhash: Blockhash) -> Self {
        Self {
            recent_blockhash: Some(recent_blockhash),
            ..Self::default()
        }
    }

    pub fn recent_blockhash(&self) -> Option<Blockhash> {
        self.recent_blockhash
    }

    pub fn signatures(&self) -> &[SignaturePair] {
        &self.signatures
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// The first signature, which the node uses as the transaction id.
    pub fn signature(&self) -> Option<&Signature> {
        self.signatures.first().and_then(|pair| pair.signature.as_ref())
    }

    /// Append an instruction.
    pub fn add(&mut self, instruction: Instruction) -> &mut Self {
        self.instructions.push(instruction);
        self.clear_signatures();
        self
    }

    /// Append several instructions.
    pub fn extend<I: IntoIterator<Item = Instruction>>(&mut self, instructions: I) -> &mut Self {
        self.instructions.extend(instructions);
        self.clear_signatures();
        self
    }

    pub fn set_recent_blockhash(&mut self, recent_blockhash: Blockhash) {
        if self.recent_blockhash != Some(recent_blockhash) {
            self.recent_blockhash = Some(recent_blockhash);
            self.clear_signatures();
        }
    }

    fn clear_signatures(&mut self) {
        for pair in &mut self.signatures {
            pair.signature = None;
        }
    }

    /// Compile the current instructions and signer slots into a message.
    ///
    /// The key list is seeded with the identities in `signatures`, in order,
    /// followed by the remaining accounts and then the program ids.
    pub fn compile_message(&self) -> Result<Message, CodecError> {
        if self.instructions.is_empty() {
            return Err(CodecError::NoInstructions);
        }
        let recent_blockhash = self.recent_blockhash.ok_or(CodecError::MissingBlockhash)?;

        let mut keys = KeyTable::default();
        for pair in &self.signatures {
            keys.seed_signer(pair.identity);
        }
        for ix in &self.instructions {
            for meta in &ix.accounts {
                keys.upsert(meta.identity, meta.is_signer, Some(meta.is_debitable));
            }
        }
        for ix in &self.instructions {
            keys.upsert(ix.program_id, false, None);
        }

        let provided = self.signatures.len();
        let seeded_in_order = keys.entries.len() >= provided
            && keys.entries[..provided]
                .iter()
                .zip(&self.signatures)
                .all(|(e, pair)| e.identity == pair.identity);
        if !seeded_in_order {
            return Err(CodecError::InvalidAccountOrder(
                "duplicate identity in signer slots".into(),
            ));
        }
        let required = keys.entries.iter().filter(|e| e.is_signer).count();
        if required > provided {
            return Err(CodecError::InsufficientSignatures { required, provided });
        }

        // Signers keep signature order; the credit-only ones must trail.
        let signers = &keys.entries[..provided];
        if let Some(first_credit_only) = signers.iter().position(|e| !e.debitable()) {
            if signers[first_credit_only..].iter().any(|e| e.debitable()) {
                return Err(CodecError::InvalidAccountOrder(
                    "credit-only signers must follow debitable signers".into(),
                ));
            }
        }
        let num_credit_only_signed = signers.iter().filter(|e| !e.debitable()).count();

        let (debitable, credit_only): (Vec<&KeyEntry>, Vec<&KeyEntry>) =
            keys.entries[provided..].iter().partition(|e| e.debitable());
        let num_credit_only_unsigned = credit_only.len();

        let account_keys: Vec<Identity> = signers
            .iter()
            .chain(debitable)
            .chain(credit_only)
            .map(|e| e.identity)
            .collect();
        if account_keys.len() > MAX_ACCOUNT_KEYS {
            return Err(CodecError::TooManyAccounts(account_keys.len()));
        }

        let index_of = |identity: &Identity| -> Result<u8, CodecError> {
            account_keys
                .iter()
                .position(|k| k == identity)
                .map(|idx| idx as u8)
                .ok_or_else(|| {
                    CodecError::InvalidAccountOrder(format!("{identity} missing from key list"))
                })
        };

        let mut instructions = Vec::with_capacity(self.instructions.len());
        for ix in &self.instructions {
            let account_indices = ix
                .accounts
                .iter()
                .map(|meta| index_of(&meta.identity))
                .collect::<Result<Vec<u8>, CodecError>>()?;
            instructions.push(CompiledInstruction {
                program_id_index: index_of(&ix.program_id)?,
                account_indices,
                data: ix.data.clone(),
            });
        }

        Ok(Message {
            num_required_signatures: header_count(provided)?,
            num_credit_only_signed: header_count(num_credit_only_signed)?,
            num_credit_only_unsigned: header_count(num_credit_only_unsigned)?,
            account_keys,
            recent_blockhash,
            instructions,
        })
    }

    /// The exact bytes each signer signs.
    pub fn serialize_message(&self) -> Result<Vec<u8>, CodecError> {
        self.compile_message()?.serialize()
    }

    /// Sign with every required signer at once.
    pub fn sign(&mut self, signers: &[&KeyPair]) -> Result<(), CodecError> {
        let parties: Vec<SignerParty<'_>> =
            signers.iter().map(|kp| SignerParty::Keypair(*kp)).collect();
        self.sign_partial(&parties)
    }

    /// Replace the signer slots with `parties` and sign with every keypair
    /// among them. Bare identities keep an empty slot to be filled later by
    /// `add_signer` or `add_signature`.
    ///
    /// Duplicate parties are collapsed; credit-only signers are moved after
    /// debitable ones (otherwise keeping the given order), as the wire
    /// format requires.
    pub fn sign_partial(&mut self, parties: &[SignerParty<'_>]) -> Result<(), CodecError> {
        if parties.is_empty() {
            return Err(CodecError::InsufficientSignatures {
                required: 1,
                provided: 0,
            });
        }

        let mut ordered: Vec<(Identity, Option<&KeyPair>)> = Vec::with_capacity(parties.len());
        for party in parties {
            let identity = party.identity();
            if ordered.iter().any(|(seen, _)| *seen == identity) {
                continue;
            }
            let keypair = match party {
                SignerParty::Keypair(kp) => Some(*kp),
                SignerParty::Identity(_) => None,
            };
            ordered.push((identity, keypair));
        }
        ordered.sort_by_key(|(identity, _)| !self.is_debitable_signer(identity));

        self.signatures = ordered
            .iter()
            .map(|(identity, _)| SignaturePair {
                identity: *identity,
                signature: None,
            })
            .collect();

        let message = self.serialize_message()?;
        for (pair, (_, keypair)) in self.signatures.iter_mut().zip(&ordered) {
            if let Some(keypair) = keypair {
                pair.signature = Some(keypair.sign(&message));
            }
        }
        Ok(())
    }

    /// Fill in the slot belonging to `keypair`, leaving the others untouched.
    pub fn add_signer(&mut self, keypair: &KeyPair) -> Result<(), CodecError> {
        let index = self.slot_of(&keypair.identity())?;
        let message = self.serialize_message()?;
        self.signatures[index].signature = Some(keypair.sign(&message));
        Ok(())
    }

    /// Attach a signature produced out of band for `identity`.
    pub fn add_signature(
        &mut self,
        identity: &Identity,
        signature: Signature,
    ) -> Result<(), CodecError> {
        let index = self.slot_of(identity)?;
        self.signatures[index].signature = Some(signature);
        Ok(())
    }

    /// Verify every signer slot is filled with a valid signature over the
    /// current message.
    pub fn verify_signatures(&self) -> Result<bool, CodecError> {
        let message = self.serialize_message()?;
        Ok(!self.signatures.is_empty()
            && self.signatures.iter().all(|pair| match &pair.signature {
                Some(signature) => pair.identity.verify(&message, signature),
                None => false,
            }))
    }

    fn slot_of(&self, identity: &Identity) -> Result<usize, CodecError> {
        self.signatures
            .iter()
            .position(|pair| pair.identity == *identity)
            .ok_or(CodecError::UnknownSigner(*identity))
    }

    /// A signer is credit-only when every instruction reference to it is
    /// credit-only. Unreferenced signers (a bare fee payer) are debitable.
    fn is_debitable_signer(&self, identity: &Identity) -> bool {
        let mut refs = self
            .instructions
            .iter()
            .flat_map(|ix| ix.accounts.iter())
            .filter(|meta| meta.identity == *identity)
            .peekable();
        refs.peek().is_none() || refs.any(|meta| meta.is_debitable)
    }

    // -----------------------------------------------------------------------
    // Wire format
    // -----------------------------------------------------------------------

    /// Serialize a fully signed transaction into its wire format.
    pub fn serialize(&self) -> Result<Vec<u8>, CodecError> {
        if self.signatures.is_empty() {
            return Err(CodecError::UnsignedTransaction);
        }
        let signatures = self
            .signatures
            .iter()
            .map(|pair| pair.signature.ok_or(CodecError::UnsignedTransaction))
            .collect::<Result<Vec<Signature>, CodecError>>()?;

        let message = self.serialize_message()?;

        let mut wire = encode_length(signatures.len())?;
        wire.reserve(signatures.len() * SIGNATURE_LENGTH + message.len());
        for signature in &signatures {
            wire.extend_from_slice(signature);
        }
        wire.extend_from_slice(&message);

        if wire.len() > PACKET_DATA_SIZE {
            return Err(CodecError::MessageTooLarge {
                size: wire.len(),
                max: PACKET_DATA_SIZE,
            });
        }
        Ok(wire)
    }

    /// Parse a wire-format transaction.
    ///
    /// Account permissions are recovered from key positions and the header
    /// counts. All-zero signature slots come back as unsigned.
    ///
    /// Parsing then serializing reproduces the same bytes. Equality with the
    /// transaction that produced the bytes only holds when every reference to
    /// an identity carried the same signer and debitable flags: the message
    /// stores one merged permission per key, so a payer marked as a signer in
    /// one instruction and as a plain account in another comes back as a
    /// signer in both.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        let mut reader = Reader::new(data);

        let num_signatures = reader.read_compact()? as usize;
        let mut raw_signatures = Vec::with_capacity(num_signatures.min(32));
        for _ in 0..num_signatures {
            raw_signatures.push(reader.read_array::<SIGNATURE_LENGTH>("signature")?);
        }

        let (message, consumed) = Message::deserialize(reader.remaining())?;
        if consumed != reader.remaining().len() {
            return Err(CodecError::Deserialization(format!(
                "{} trailing bytes after message",
                reader.remaining().len() - consumed
            )));
        }
        if num_signatures != message.num_required_signatures as usize {
            return Err(CodecError::Deserialization(format!(
                "{num_signatures} signatures for {} required signers",
                message.num_required_signatures
            )));
        }

        let signatures = raw_signatures
            .into_iter()
            .zip(&message.account_keys)
            .map(|(signature, identity)| SignaturePair {
                identity: *identity,
                signature: (signature != [0u8; SIGNATURE_LENGTH]).then_some(signature),
            })
            .collect();

        let instructions = message
            .instructions
            .iter()
            .map(|cix| Instruction {
                program_id: message.account_keys[cix.program_id_index as usize],
                accounts: cix
                    .account_indices
                    .iter()
                    .map(|&idx| {
                        let idx = idx as usize;
                        AccountRef {
                            identity: message.account_keys[idx],
                            is_signer: message.is_signer(idx),
                            is_debitable: message.is_debitable(idx),
                        }
                    })
                    .collect(),
                data: cix.data.clone(),
            })
            .collect();

        Ok(Self {
            recent_blockhash: Some(message.recent_blockhash),
            signatures,
            instructions,
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

struct KeyEntry {
    identity: Identity,
    is_signer: bool,
    /// `None` until an account reference mentions the key.
    is_debitable: Option<bool>,
}

impl KeyEntry {
    fn debitable(&self) -> bool {
        // Signers nobody references pay the fee, so they are debitable.
        self.is_debitable.unwrap_or(self.is_signer)
    }
}

/// Ordered, deduplicated key list with merged permission bits.
#[derive(Default)]
struct KeyTable {
    entries: Vec<KeyEntry>,
}

impl KeyTable {
    fn seed_signer(&mut self, identity: Identity) {
        if !self.entries.iter().any(|e| e.identity == identity) {
            self.entries.push(KeyEntry {
                identity,
                is_signer: true,
                is_debitable: None,
            });
        }
    }

    fn upsert(&mut self, identity: Identity, signer: bool, debitable: Option<bool>) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.identity == identity) {
            entry.is_signer |= signer;
            entry.is_debitable = match (entry.is_debitable, debitable) {
                (Some(a), Some(b)) => Some(a || b),
                (a, b) => a.or(b),
            };
        } else {
            self.entries.push(KeyEntry {
                identity,
                is_signer: signer,
                is_debitable: Some(debitable.unwrap_or(false)),
            });
        }
    }
}

fn header_count(count: usize) -> Result<u8, CodecError> {
    u8::try_from(count).map_err(|_| CodecError::TooManyAccounts(count))
}

/// Bounds-checked cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn remaining(&self) -> &'a [u8] {
        &self.data[self.offset..]
    }

    fn read_bytes(&mut self, len: usize, what: &str) -> Result<&'a [u8], CodecError> {
        let end = self
            .offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| CodecError::Deserialization(format!("truncated {what}")))?;
        let bytes = &self.data[self.offset..end];
        self.offset = end;
        Ok(bytes)
    }

    fn read_u8(&mut self, what: &str) -> Result<u8, CodecError> {
        Ok(self.read_bytes(1, what)?[0])
    }

    fn read_array<const N: usize>(&mut self, what: &str) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, what)?);
        Ok(out)
    }

    fn read_compact(&mut self) -> Result<u16, CodecError> {
        let (value, consumed) = decode_compact_u16(self.remaining())?;
        self.offset += consumed;
        Ok(value)
    }
}
