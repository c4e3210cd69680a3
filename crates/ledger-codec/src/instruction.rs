//! Instructions: one atomic operation targeting a program.
//!
//! Instruction builders for particular programs live outside this crate;
//! they only need to produce values of these types.

use serde::{Deserialize, Serialize};

use crate::identity::Identity;

/// A reference to an account within one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountRef {
    pub identity: Identity,
    pub is_signer: bool,
    /// `false` marks the account credit-only: the program may read it or
    /// credit it, but not debit it.
    pub is_debitable: bool,
}

impl AccountRef {
    /// A debitable account reference.
    pub fn new(identity: Identity, is_signer: bool) -> Self {
        Self {
            identity,
            is_signer,
            is_debitable: true,
        }
    }

    /// A credit-only account reference.
    pub fn credit_only(identity: Identity, is_signer: bool) -> Self {
        Self {
            identity,
            is_signer,
            is_debitable: false,
        }
    }
}

/// A program invocation: target program, ordered account references and an
/// opaque data payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    pub program_id: Identity,
    pub accounts: Vec<AccountRef>,
    pub data: Vec<u8>,
}

impl Instruction {
    pub fn new(program_id: Identity, accounts: Vec<AccountRef>, data: Vec<u8>) -> Self {
        Self {
            program_id,
            accounts,
            data,
        }
    }

    /// Identities this instruction marks as signers, in account order.
    pub fn signers(&self) -> impl Iterator<Item = &Identity> {
        self.accounts
            .iter()
            .filter(|meta| meta.is_signer)
            .map(|meta| &meta.identity)
    }
}
