//! End-to-end codec tests through the public API: build -> sign ->
//! serialize -> parse, plus the signer-coverage and packet-size limits.

use ledger_codec::*;
use rand::RngCore;

/// Stand-in for the value-transfer program: 32 zero bytes.
const TRANSFER_PROGRAM: Identity = Identity::new([0u8; 32]);

fn transfer(from: Identity, to: Identity, amount: u64) -> Instruction {
    let mut data = Vec::with_capacity(12);
    data.extend_from_slice(&2u32.to_le_bytes());
    data.extend_from_slice(&amount.to_le_bytes());
    Instruction::new(
        TRANSFER_PROGRAM,
        vec![AccountRef::new(from, true), AccountRef::new(to, false)],
        data,
    )
}

fn random_blockhash() -> Blockhash {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    Blockhash::new(bytes)
}

// ─── Scenario: simple transfer ─────────────────────────────────────

#[test]
fn simple_transfer_roundtrip() {
    let alice = KeyPair::generate();
    let bob = KeyPair::generate().identity();

    let mut tx = Transaction::with_recent_blockhash(random_blockhash());
    tx.add(transfer(alice.identity(), bob, 123));
    tx.sign(&[&alice]).unwrap();

    let wire = tx.serialize().unwrap();
    let parsed = Transaction::parse(&wire).unwrap();

    assert_eq!(parsed, tx);
    let ix = &parsed.instructions()[0];
    assert_eq!(ix.program_id, TRANSFER_PROGRAM);
    assert_eq!(
        ix.accounts,
        vec![AccountRef::new(alice.identity(), true), AccountRef::new(bob, false)]
    );
    assert!(parsed.verify_signatures().unwrap());
    assert_eq!(parsed.serialize().unwrap(), wire);
}

// ─── Round-trip over richer shapes ─────────────────────────────────

#[test]
fn multi_instruction_multi_signer_roundtrip() {
    let payer = KeyPair::generate();
    let cosigner = KeyPair::generate();
    let approver = KeyPair::generate();
    let program = KeyPair::generate().identity();
    let vault = KeyPair::generate().identity();
    let oracle = KeyPair::generate().identity();

    let mut tx = Transaction::with_recent_blockhash(random_blockhash());
    tx.add(transfer(payer.identity(), vault, 10));
    tx.add(Instruction::new(
        program,
        vec![
            AccountRef::new(cosigner.identity(), true),
            AccountRef::credit_only(approver.identity(), true),
            AccountRef::new(vault, false),
            AccountRef::credit_only(oracle, false),
        ],
        vec![0xde, 0xad, 0xbe, 0xef],
    ));
    tx.add(Instruction::new(program, vec![], vec![]));
    tx.sign(&[&payer, &approver, &cosigner]).unwrap();

    let signer_order: Vec<Identity> = tx.signatures().iter().map(|p| p.identity).collect();
    assert_eq!(
        signer_order,
        vec![payer.identity(), cosigner.identity(), approver.identity()]
    );

    let parsed = Transaction::parse(&tx.serialize().unwrap()).unwrap();
    assert_eq!(parsed, tx);
    assert!(parsed.verify_signatures().unwrap());
}

// ─── Signature coverage ────────────────────────────────────────────

#[test]
fn fewer_signers_than_required_fails() {
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let c = KeyPair::generate();
    let program = KeyPair::generate().identity();

    let mut tx = Transaction::with_recent_blockhash(random_blockhash());
    tx.add(Instruction::new(
        program,
        vec![
            AccountRef::new(a.identity(), true),
            AccountRef::new(b.identity(), true),
            AccountRef::new(c.identity(), true),
        ],
        vec![],
    ));

    let err = tx.sign(&[&a, &b]).unwrap_err();
    assert_eq!(
        err,
        CodecError::InsufficientSignatures {
            required: 3,
            provided: 2
        }
    );

    tx.sign(&[&a, &b, &c]).unwrap();
    assert!(tx.verify_signatures().unwrap());
}

// ─── Size bound ────────────────────────────────────────────────────

fn transaction_with_payload(payload: usize) -> Result<Vec<u8>, CodecError> {
    let payer = KeyPair::from_seed(&[7u8; 32]);
    let program = Identity::new([9u8; 32]);
    let mut tx = Transaction::with_recent_blockhash(Blockhash::new([1u8; 32]));
    tx.add(Instruction::new(
        program,
        vec![
            AccountRef::new(payer.identity(), true),
            AccountRef::new(Identity::new([3u8; 32]), false),
        ],
        vec![0xAB; payload],
    ));
    tx.sign(&[&payer])?;
    tx.serialize()
}

#[test]
fn packet_size_limit_is_inclusive() {
    // 1 + 64 signature section, 3 header, 1 + 3 * 32 keys, 32 blockhash,
    // 1 instruction count, 1 program index, 1 + 2 account indices,
    // 2 data length: 204 bytes of framing.
    let at_limit = transaction_with_payload(PACKET_DATA_SIZE - 204).unwrap();
    assert_eq!(at_limit.len(), PACKET_DATA_SIZE);

    let err = transaction_with_payload(PACKET_DATA_SIZE - 203).unwrap_err();
    assert_eq!(
        err,
        CodecError::MessageTooLarge {
            size: PACKET_DATA_SIZE + 1,
            max: PACKET_DATA_SIZE
        }
    );
}

// ─── Scenario: partial signing ─────────────────────────────────────

#[test]
fn partial_signing_matches_direct_signing() {
    let a = KeyPair::generate();
    let b = KeyPair::generate();
    let program = KeyPair::generate().identity();
    let blockhash = random_blockhash();

    let build = || {
        let mut tx = Transaction::with_recent_blockhash(blockhash);
        tx.add(Instruction::new(
            program,
            vec![
                AccountRef::new(a.identity(), true),
                AccountRef::new(b.identity(), true),
            ],
            vec![42],
        ));
        tx
    };

    let mut partial = build();
    partial
        .sign_partial(&[SignerParty::from(&a), SignerParty::from(b.identity())])
        .unwrap();
    assert!(partial.signatures()[0].signature.is_some());
    assert_eq!(partial.signatures()[1].identity, b.identity());
    assert!(partial.signatures()[1].signature.is_none());
    assert_eq!(partial.serialize(), Err(CodecError::UnsignedTransaction));

    partial.add_signer(&b).unwrap();

    let mut direct = build();
    direct.sign(&[&a, &b]).unwrap();

    assert_eq!(partial, direct);
    assert_eq!(partial.serialize().unwrap(), direct.serialize().unwrap());
}

// ─── Identity encodings ────────────────────────────────────────────

#[test]
fn identity_buffer_and_text_forms_agree() {
    for _ in 0..16 {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);

        let id = Identity::from_bytes(&bytes).unwrap();
        assert_eq!(id.to_bytes(), bytes);
        assert_eq!(Identity::from_base58(&id.to_base58()).unwrap(), id);
        assert_eq!(Identity::from_hex(&id.to_hex()).unwrap(), id);
    }
}
