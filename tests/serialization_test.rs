//! Wire round-trip laws: serializing and deserializing a `Proposal`, `Vote`, `LocalOrder`,
//! `Finality`, or `Block` yields a structurally equal value. Block hashes are derived, not
//! transmitted, and `Finality` carries its block hash only for commit decisions.

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::SigningKey;

use fairstuff_rs::messages::{Finality, LocalOrder, Proposal, Vote, DECISION_COMMIT};
use fairstuff_rs::types::basic::{BlockHeight, CryptoHash, ReplicaID};
use fairstuff_rs::types::block::{Block, MergedOrders};
use fairstuff_rs::types::certificates::{PartialCertificate, QuorumCertificate};

fn cmd(byte: u8) -> CryptoHash {
    CryptoHash::new([byte; 32])
}

#[test]
fn proposal_round_trips() {
    let mut orders = MergedOrders::new();
    orders.insert(ReplicaID::new(0), vec![cmd(1), cmd(2)]);
    orders.insert(ReplicaID::new(2), vec![cmd(2), cmd(1)]);
    let justify = QuorumCertificate::incomplete(cmd(9), 4);
    let block = Block::new(vec![cmd(8)], Some(justify), orders, vec![0xAB]);
    let proposal = Proposal::new(ReplicaID::new(1), block);

    let bytes = proposal.try_to_vec().unwrap();
    let recovered = Proposal::try_from_slice(&bytes).unwrap();

    assert_eq!(recovered.proposer, proposal.proposer);
    assert_eq!(recovered.block, proposal.block);
    assert!(recovered.block.is_correct());
}

#[test]
fn vote_round_trips_and_verifies() {
    let signing_key = SigningKey::from_bytes(&[7u8; 32]);
    let cert = PartialCertificate::new(&signing_key, ReplicaID::new(3), cmd(5));
    let vote = Vote::new(ReplicaID::new(3), cmd(5), cert);

    let bytes = vote.try_to_vec().unwrap();
    let recovered = Vote::try_from_slice(&bytes).unwrap();

    assert_eq!(recovered.voter, vote.voter);
    assert_eq!(recovered.blk_hash, vote.blk_hash);
    assert!(recovered.cert.verify(&signing_key.verifying_key()));
}

#[test]
fn local_order_round_trips() {
    let local_order = LocalOrder::new(ReplicaID::new(2), vec![cmd(1), cmd(3), cmd(2)]);
    let bytes = local_order.try_to_vec().unwrap();
    assert_eq!(LocalOrder::try_from_slice(&bytes).unwrap(), local_order);
}

#[test]
fn finality_round_trips_with_conditional_block_hash() {
    let finality = Finality::new(
        ReplicaID::new(0),
        DECISION_COMMIT,
        4,
        BlockHeight::new(17),
        cmd(6),
        cmd(7),
    );
    let bytes = finality.try_to_vec().unwrap();
    assert_eq!(Finality::try_from_slice(&bytes).unwrap(), finality);

    // A non-commit decision drops the block hash from the wire form.
    let non_commit = Finality::new(
        ReplicaID::new(0),
        0,
        4,
        BlockHeight::new(17),
        cmd(6),
        cmd(7),
    );
    let bytes = non_commit.try_to_vec().unwrap();
    let recovered = Finality::try_from_slice(&bytes).unwrap();
    assert_eq!(recovered.blk_hash, CryptoHash::default());
}
