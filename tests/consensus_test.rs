//! End-to-end scenarios driven over a transportless 4-replica cluster (f = 1, nmajority = 3,
//! γ = 0.5): the happy path with fair ordering, empty-orders blocks, vote deduplication and QC
//! thresholds, the safety and liveness voting clauses, delivery idempotence, pruning, and the async
//! wait-points.

use log::LevelFilter;
use tokio::sync::oneshot::error::TryRecvError;

mod common;

use fairstuff_rs::messages::{LocalOrder, Proposal, DECISION_COMMIT};
use fairstuff_rs::types::basic::{BlockHeight, CryptoHash, ReplicaID};
use fairstuff_rs::types::block::{Block, MergedOrders};
use fairstuff_rs::types::certificates::QuorumCertificate;
use fairstuff_rs::ProtocolError;

use crate::common::cluster::{cmd, new_cluster, run_round, TestReplica};
use crate::common::logging::setup_logger;

fn empty_orders() -> MergedOrders {
    MergedOrders::new()
}

/// State variable heights of a replica, for monotonicity checks.
fn heights(replica: &TestReplica) -> (u32, u32, u32, u32) {
    (
        replica.core.voted_height().int(),
        replica.core.executed_block().height().int(),
        replica.core.locked_block().height().int(),
        replica.core.highest_qc_block().height().int(),
    )
}

#[test]
fn four_replica_happy_path() {
    setup_logger(LevelFilter::Debug);

    // 1. Initialize a 4-replica cluster at genesis.
    let mut replicas = new_cluster(4, 1, 0.5);
    let (h_a, h_b) = (cmd(1), cmd(2));

    // 2. Replicas 0, 1 and 2 submit their local orders to the leader of the first round. The third
    //    submission completes the quorum.
    for i in 0..3u8 {
        let local_order = LocalOrder::new(ReplicaID::new(i), vec![h_a, h_b]);
        let ready = replicas[0].core.on_receive_local_order(&local_order);
        assert_eq!(ready, i == 2);
    }
    let orders = replicas[0].core.fair_propose();
    assert_eq!(orders.len(), 3);

    // 3. Drive four rounds: B1 carries the merged orders, B2..B4 extend the chain. State variable
    //    heights only ever grow.
    let b1 = run_round(&mut replicas, 0, 1, orders);
    let mut watermarks: Vec<_> = replicas.iter().map(heights).collect();
    for leader in [1usize, 2, 3] {
        run_round(&mut replicas, leader, (leader + 1) % 4, empty_orders());
        for (i, replica) in replicas.iter().enumerate() {
            let new = heights(replica);
            let old = watermarks[i];
            assert!(new.0 >= old.0 && new.1 >= old.1 && new.2 >= old.2 && new.3 >= old.3);
            watermarks[i] = new;
        }
    }

    // 4. After B4, every replica has committed exactly B1, with the fair order [h_a, h_b]:
    //    weight(h_a) = 3·(1 − 0.5) = 1.5 < weight(h_b) = 3·(1 − 0.25) = 2.25.
    for replica in &replicas {
        assert_eq!(replica.committed(), vec![b1]);
        let finalities = replica.finalities();
        assert_eq!(finalities.len(), 2);
        assert_eq!(
            (finalities[0].cmd_idx, finalities[0].cmd_hash),
            (0, h_a)
        );
        assert_eq!(
            (finalities[1].cmd_idx, finalities[1].cmd_hash),
            (1, h_b)
        );
        for finality in &finalities {
            assert_eq!(finality.decision, DECISION_COMMIT);
            assert_eq!(finality.cmd_height, BlockHeight::new(1));
            assert_eq!(finality.blk_hash, b1);
        }
        assert_eq!(replica.core.executed_block().height(), BlockHeight::new(1));
        assert_eq!(
            replica.core.highest_qc_block().height(),
            BlockHeight::new(3)
        );
    }
}

#[test]
fn divergent_local_orders_commit_fairly() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);
    let (a, b, c) = (cmd(1), cmd(2), cmd(3));

    replicas[0]
        .core
        .on_receive_local_order(&LocalOrder::new(ReplicaID::new(0), vec![a, b, c]));
    replicas[0]
        .core
        .on_receive_local_order(&LocalOrder::new(ReplicaID::new(1), vec![b, a, c]));
    assert!(replicas[0]
        .core
        .on_receive_local_order(&LocalOrder::new(ReplicaID::new(2), vec![a, b, c])));

    let orders = replicas[0].core.fair_propose();
    run_round(&mut replicas, 0, 1, orders);
    for leader in [1usize, 2, 3] {
        run_round(&mut replicas, leader, (leader + 1) % 4, empty_orders());
    }

    // Weights with γ = 0.5: a = 1.75, b = 2.0, c = 2.625; dominance agrees. Every replica decides
    // [a, b, c].
    for replica in &replicas {
        let decided: Vec<CryptoHash> = replica
            .finalities()
            .iter()
            .map(|finality| finality.cmd_hash)
            .collect();
        assert_eq!(decided, vec![a, b, c]);
    }
}

#[test]
fn empty_orders_block_commits_without_decides() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);
    let b1 = run_round(&mut replicas, 0, 1, empty_orders());
    for leader in [1usize, 2, 3] {
        run_round(&mut replicas, leader, (leader + 1) % 4, empty_orders());
    }

    for replica in &replicas {
        assert_eq!(replica.committed(), vec![b1]);
        assert!(replica.finalities().is_empty());
    }
}

#[test]
fn duplicate_votes_are_absorbed_and_qc_forms_at_quorum() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);

    // Leader 0 proposes B1; followers deliver and vote.
    let parent = replicas[0].chain_head();
    let b1 = replicas[0]
        .core
        .on_propose(empty_orders(), &[parent], Vec::new())
        .unwrap();
    let proposal = replicas[0].take_proposals().pop().unwrap();
    for i in 1..4 {
        replicas[i].receive_block(proposal.block.clone());
        replicas[i].core.on_receive_proposal(&proposal).unwrap();
    }

    let votes: Vec<_> = replicas
        .iter()
        .flat_map(|replica| replica.take_votes())
        .map(|(_, vote)| vote)
        .collect();
    assert_eq!(votes.len(), 4);
    let vote_from_2 = votes
        .iter()
        .find(|vote| vote.voter == ReplicaID::new(2))
        .unwrap()
        .clone();

    // A duplicate vote advances the voter set by one, once.
    replicas[0].core.on_receive_vote(&vote_from_2).unwrap();
    replicas[0].core.on_receive_vote(&vote_from_2).unwrap();
    assert_eq!(b1.voted_count(), 1);

    // The third distinct vote seals the self-QC and advances hqc; a fourth changes nothing.
    for vote in votes.iter().filter(|vote| vote.voter != ReplicaID::new(2)) {
        replicas[0].core.on_receive_vote(vote).unwrap();
    }
    assert_eq!(b1.voted_count(), 3);
    let self_qc = b1.self_qc().unwrap();
    assert_eq!(self_qc.count(), 3);
    assert_eq!(replicas[0].core.highest_qc_block().hash(), b1.hash());
}

/// Build a straight chain B1..=B7 on `replica`, where each block parents the previous one and
/// justifies it with a QC. Returns the block hashes, index 0 being B1.
fn build_chain(replica: &mut TestReplica, proposer: ReplicaID) -> Vec<CryptoHash> {
    let mut hashes = Vec::new();
    let mut parent = replica.core.genesis().hash();
    for _ in 1..=7 {
        let justify = QuorumCertificate::incomplete(parent, 4);
        let block = Block::new(vec![parent], Some(justify), MergedOrders::new(), Vec::new());
        let hash = block.hash;
        replica.receive_block(block.clone());
        replica
            .core
            .on_receive_proposal(&Proposal::new(proposer, block))
            .unwrap();
        hashes.push(hash);
        parent = hash;
    }
    hashes
}

#[test]
fn safety_clause_votes_for_extension_of_locked_branch() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);
    let proposer = ReplicaID::new(1);
    let chain = build_chain(&mut replicas[0], proposer);

    assert_eq!(replicas[0].core.locked_block().height(), BlockHeight::new(5));
    assert_eq!(replicas[0].core.voted_height(), BlockHeight::new(7));
    replicas[0].take_votes();

    // A height-8 proposal justifying B4 (height 4 ≤ locked height 5) fails the liveness clause,
    // but its parent walk reaches the locked block: the replica votes.
    let justify = QuorumCertificate::incomplete(chain[3], 4);
    let block = Block::new(
        vec![chain[6]],
        Some(justify),
        MergedOrders::new(),
        Vec::new(),
    );
    let hash = block.hash;
    replicas[0].receive_block(block.clone());
    replicas[0]
        .core
        .on_receive_proposal(&Proposal::new(proposer, block))
        .unwrap();

    let votes = replicas[0].take_votes();
    assert_eq!(votes.len(), 1);
    assert_eq!(votes[0].1.blk_hash, hash);
    assert_eq!(replicas[0].core.voted_height(), BlockHeight::new(8));
}

#[test]
fn safety_clause_abstains_off_the_locked_branch() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);
    let proposer = ReplicaID::new(1);
    let chain = build_chain(&mut replicas[0], proposer);
    replicas[0].take_votes();

    // A conflicting branch forking below the lock: B5'..B7' parent B4 but never reach the locked
    // B5. The `extra` payload distinguishes the fork blocks from the main chain.
    let mut parent = chain[3];
    for justify_target in [chain[2], chain[3], chain[3]] {
        let justify = QuorumCertificate::incomplete(justify_target, 4);
        let block = Block::new(vec![parent], Some(justify), MergedOrders::new(), vec![1]);
        parent = block.hash;
        replicas[0].receive_block(block);
    }

    // A height-8 proposal extending the fork: the liveness clause fails and the parent walk reaches
    // B5' ≠ locked block at the lock's height. The replica abstains.
    let justify = QuorumCertificate::incomplete(chain[3], 4);
    let block = Block::new(vec![parent], Some(justify), MergedOrders::new(), vec![1]);
    replicas[0].receive_block(block.clone());
    replicas[0]
        .core
        .on_receive_proposal(&Proposal::new(proposer, block))
        .unwrap();

    assert!(replicas[0].take_votes().is_empty());
    assert_eq!(replicas[0].core.voted_height(), BlockHeight::new(7));
}

#[test]
fn redelivery_is_idempotent() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);
    let parent = replicas[0].chain_head();
    replicas[0]
        .core
        .on_propose(empty_orders(), &[parent], Vec::new())
        .unwrap();
    let proposal = replicas[0].take_proposals().pop().unwrap();

    let first = replicas[1].receive_block(proposal.block.clone());
    // The store deduplicates by hash, and a second delivery is refused with a warning.
    let second = replicas[1].core.add_block(proposal.block.clone());
    assert!(first == second);
    assert!(!replicas[1].core.on_deliver_block(&second).unwrap());
}

#[test]
fn prune_releases_stale_ancestors() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);
    let mut hashes = Vec::new();
    for round in 0..6usize {
        let leader = round % 4;
        hashes.push(run_round(
            &mut replicas,
            leader,
            (leader + 1) % 4,
            empty_orders(),
        ));
    }

    // After B6, everyone has executed up to B3.
    assert_eq!(replicas[3].core.executed_block().height(), BlockHeight::new(3));

    // Pruning with staleness 1 anchors at B2 and releases B1; the anchor itself survives (its
    // child still links to it), as does the genesis block.
    replicas[3].core.prune(1);
    assert!(replicas[3].core.find_block(&hashes[0]).is_none());
    assert!(replicas[3].core.find_block(&hashes[1]).is_some());
    assert!(replicas[3].core.find_block(&hashes[2]).is_some());
    let genesis = replicas[3].core.genesis().hash();
    assert!(replicas[3].core.find_block(&genesis).is_some());
}

#[test]
fn wait_points_resolve_on_their_events() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);

    // async_wait_proposal resolves with the emitted proposal.
    let mut propose_rx = replicas[0].core.async_wait_proposal();
    let parent = replicas[0].chain_head();
    let b1 = replicas[0]
        .core
        .on_propose(empty_orders(), &[parent], Vec::new())
        .unwrap();
    assert_eq!(propose_rx.try_recv().unwrap().block.hash, b1.hash());

    // async_qc_finish stays pending until the quorum's votes arrive; async_hqc_update resolves with
    // the new highest-QC block.
    let mut qc_rx = replicas[0].core.async_qc_finish(&b1);
    let mut hqc_rx = replicas[0].core.async_hqc_update();
    assert!(matches!(qc_rx.try_recv(), Err(TryRecvError::Empty)));

    let proposal = replicas[0].take_proposals().pop().unwrap();
    for i in 1..4 {
        replicas[i].receive_block(proposal.block.clone());
        replicas[i].core.on_receive_proposal(&proposal).unwrap();
    }
    let votes: Vec<_> = replicas
        .iter()
        .flat_map(|replica| replica.take_votes())
        .map(|(_, vote)| vote)
        .collect();
    for vote in &votes {
        replicas[0].core.on_receive_vote(vote).unwrap();
    }

    assert!(qc_rx.try_recv().is_ok());
    assert_eq!(hqc_rx.try_recv().unwrap(), b1.hash());

    // A waiter registered after the QC formed resolves immediately.
    let mut settled_rx = replicas[0].core.async_qc_finish(&b1);
    assert!(settled_rx.try_recv().is_ok());

    // async_wait_receive_proposal resolves when the next proposal is processed.
    let mut receive_rx = replicas[1].core.async_wait_receive_proposal();
    run_round(&mut replicas, 0, 1, empty_orders());
    let received = receive_rx.try_recv().unwrap();
    assert_eq!(received.block.parent_hashes, vec![b1.hash()]);
}

#[test]
fn events_are_published_in_occurrence_order() {
    setup_logger(LevelFilter::Debug);

    // A single core wired to an event publisher channel, with three peers known only by key.
    let mut csprg = rand_core::OsRng {};
    let keypairs: Vec<ed25519_dalek::SigningKey> = (0..4)
        .map(|_| ed25519_dalek::SigningKey::generate(&mut csprg))
        .collect();
    let (event_tx, event_rx) = std::sync::mpsc::channel();
    let mut core = fairstuff_rs::FairStuff::new(
        ReplicaID::new(0),
        keypairs[0].clone(),
        common::cluster::RecordingApp::default(),
        common::cluster::RecordingNetwork::default(),
        Some(event_tx),
    );
    for (i, keypair) in keypairs.iter().enumerate() {
        core.add_replica(
            ReplicaID::new(i as u8),
            keypair.verifying_key(),
            fairstuff_rs::types::basic::PeerAddress::new(format!("replica-{}", i)),
        )
        .unwrap();
    }
    core.on_init(1, 0.5);

    let parent = core.genesis().clone();
    let b1 = core.on_propose(empty_orders(), &[parent], Vec::new()).unwrap();
    for (i, signing_key) in keypairs.iter().take(3).enumerate() {
        let voter = ReplicaID::new(i as u8);
        let cert = fairstuff_rs::types::certificates::PartialCertificate::new(
            signing_key,
            voter,
            b1.hash(),
        );
        core.on_receive_vote(&fairstuff_rs::messages::Vote::new(voter, b1.hash(), cert))
            .unwrap();
    }

    use fairstuff_rs::events::Event;
    let events: Vec<Event> = event_rx.try_iter().collect();
    let kinds: Vec<&str> = events
        .iter()
        .map(|event| match event {
            Event::InsertBlock(_) => "insert",
            Event::DeliverBlock(_) => "deliver",
            Event::ReceiveProposal(_) => "receive_proposal",
            Event::Vote(_) => "vote",
            Event::Propose(_) => "propose",
            Event::ReceiveVote(_) => "receive_vote",
            Event::CollectQC(_) => "collect_qc",
            Event::UpdateHighestQC(_) => "update_hqc",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "insert",
            "deliver",
            "receive_proposal",
            "vote",
            "propose",
            "receive_vote",
            "receive_vote",
            "receive_vote",
            "collect_qc",
            "update_hqc",
        ]
    );
}

#[test]
fn invariant_breaks_surface_as_fatal_errors() {
    setup_logger(LevelFilter::Debug);

    let mut replicas = new_cluster(4, 1, 0.5);

    // Votes for unknown blocks violate the delivery precondition.
    let parent = replicas[1].chain_head();
    replicas[1]
        .core
        .on_propose(empty_orders(), &[parent], Vec::new())
        .unwrap();
    let (_, vote_for_unknown) = replicas[1].take_votes().pop().unwrap();
    assert!(matches!(
        replicas[0].core.on_receive_vote(&vote_for_unknown),
        Err(ProtocolError::BlockNotDelivered { .. })
    ));

    // Proposing with no parents is a caller bug.
    assert!(matches!(
        replicas[0].core.on_propose(empty_orders(), &[], Vec::new()),
        Err(ProtocolError::EmptyParents)
    ));

    // The replica set is frozen after on_init.
    let key = ed25519_dalek::SigningKey::from_bytes(&[42u8; 32]);
    assert!(matches!(
        replicas[0].core.add_replica(
            ReplicaID::new(9),
            key.verifying_key(),
            fairstuff_rs::types::basic::PeerAddress::new("replica-9".to_string()),
        ),
        Err(ProtocolError::ConfigurationFrozen)
    ));

    // A block whose justify names an unfetched block cannot be delivered.
    let ghost = QuorumCertificate::incomplete(cmd(99), 4);
    let genesis = replicas[0].core.genesis().hash();
    let orphan = Block::new(vec![genesis], Some(ghost), MergedOrders::new(), Vec::new());
    let orphan = replicas[0].core.add_block(orphan);
    assert!(matches!(
        replicas[0].core.on_deliver_block(&orphan),
        Err(ProtocolError::QcTargetNotFetched { .. })
    ));
}
