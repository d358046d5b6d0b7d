//! A deterministic, transportless cluster harness.
//!
//! Each test replica is a real consensus core wired to recording implementations of the `App` and
//! `Network` plug-points. Tests shuttle the recorded messages between cores by hand, which keeps
//! every scenario fully deterministic: no threads, no timers, no sockets.

use std::sync::{Arc, Mutex};

use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use fairstuff_rs::messages::{Finality, LocalOrder, Proposal, Vote};
use fairstuff_rs::state::block_store::BlockPtr;
use fairstuff_rs::types::basic::{CryptoHash, PeerAddress, ReplicaID};
use fairstuff_rs::types::block::{Block, MergedOrders};
use fairstuff_rs::{App, FairStuff, Network};

/// An `App` that records every commit and decision it is handed.
#[derive(Clone, Default)]
pub(crate) struct RecordingApp {
    pub(crate) committed: Arc<Mutex<Vec<CryptoHash>>>,
    pub(crate) finalities: Arc<Mutex<Vec<Finality>>>,
}

impl App for RecordingApp {
    fn commit_block(&mut self, block: &BlockPtr) {
        self.committed.lock().unwrap().push(block.hash());
    }

    fn decide(&mut self, finality: Finality) {
        self.finalities.lock().unwrap().push(finality);
    }
}

/// A `Network` that records every outgoing message instead of sending it. Tests drain the outboxes
/// and deliver messages to other cores by hand.
#[derive(Clone, Default)]
pub(crate) struct RecordingNetwork {
    pub(crate) proposals: Arc<Mutex<Vec<Proposal>>>,
    pub(crate) votes: Arc<Mutex<Vec<(ReplicaID, Vote)>>>,
    pub(crate) local_orders: Arc<Mutex<Vec<(ReplicaID, LocalOrder)>>>,
}

impl Network for RecordingNetwork {
    fn broadcast_proposal(&mut self, proposal: Proposal) {
        self.proposals.lock().unwrap().push(proposal);
    }

    fn send_vote(&mut self, recipient: ReplicaID, vote: Vote) {
        self.votes.lock().unwrap().push((recipient, vote));
    }

    fn send_local_order(&mut self, leader: ReplicaID, local_order: LocalOrder) {
        self.local_orders.lock().unwrap().push((leader, local_order));
    }
}

pub(crate) struct TestReplica {
    pub(crate) core: FairStuff<RecordingApp, RecordingNetwork>,
    app: RecordingApp,
    network: RecordingNetwork,
}

impl TestReplica {
    /// Insert and deliver a block received from the network.
    pub(crate) fn receive_block(&mut self, block: Block) -> BlockPtr {
        let block = self.core.add_block(block);
        self.core.on_deliver_block(&block).unwrap();
        block
    }

    pub(crate) fn committed(&self) -> Vec<CryptoHash> {
        self.app.committed.lock().unwrap().clone()
    }

    pub(crate) fn finalities(&self) -> Vec<Finality> {
        self.app.finalities.lock().unwrap().clone()
    }

    pub(crate) fn take_proposals(&self) -> Vec<Proposal> {
        self.network.proposals.lock().unwrap().drain(..).collect()
    }

    pub(crate) fn take_votes(&self) -> Vec<(ReplicaID, Vote)> {
        self.network.votes.lock().unwrap().drain(..).collect()
    }

    pub(crate) fn take_local_orders(&self) -> Vec<(ReplicaID, LocalOrder)> {
        self.network.local_orders.lock().unwrap().drain(..).collect()
    }

    /// The tail of the (single) chain this replica has delivered, i.e., where the next proposal
    /// parents.
    pub(crate) fn chain_head(&self) -> BlockPtr {
        self.core
            .tails()
            .iter()
            .max_by_key(|block| (block.height(), block.hash().bytes()))
            .expect("at least the genesis block is always a tail")
            .clone()
    }
}

/// A cluster of `n` freshly initialized replicas with ids `0..n`, tolerating `faulty` faults, with
/// fairness parameter `gamma`.
pub(crate) fn new_cluster(n: u8, faulty: usize, gamma: f64) -> Vec<TestReplica> {
    let mut csprg = OsRng {};
    let keypairs: Vec<SigningKey> = (0..n).map(|_| SigningKey::generate(&mut csprg)).collect();

    (0..n)
        .map(|i| {
            let app = RecordingApp::default();
            let network = RecordingNetwork::default();
            let mut core = FairStuff::new(
                ReplicaID::new(i),
                keypairs[i as usize].clone(),
                app.clone(),
                network.clone(),
                None,
            );
            for (j, keypair) in keypairs.iter().enumerate() {
                core.add_replica(
                    ReplicaID::new(j as u8),
                    keypair.verifying_key(),
                    PeerAddress::new(format!("replica-{}", j)),
                )
                .unwrap();
            }
            core.on_init(faulty, gamma);
            TestReplica { core, app, network }
        })
        .collect()
}

pub(crate) fn cmd(byte: u8) -> CryptoHash {
    CryptoHash::new([byte; 32])
}

/// Drive one full proposal round: `leader` proposes a block carrying `orders` on top of its chain
/// head, every other replica delivers and processes the proposal, and all emitted votes are handed
/// to `next_leader`. Returns the hash of the proposed block.
pub(crate) fn run_round(
    replicas: &mut [TestReplica],
    leader: usize,
    next_leader: usize,
    orders: MergedOrders,
) -> CryptoHash {
    let parent = replicas[leader].chain_head();
    let block = replicas[leader]
        .core
        .on_propose(orders, &[parent], Vec::new())
        .unwrap();
    let hash = block.hash();

    let proposal = replicas[leader]
        .take_proposals()
        .pop()
        .expect("on_propose broadcasts exactly one proposal");

    for (i, replica) in replicas.iter_mut().enumerate() {
        if i == leader {
            continue;
        }
        replica.receive_block(proposal.block.clone());
        replica.core.on_receive_proposal(&proposal).unwrap();
    }

    let votes: Vec<Vote> = replicas
        .iter()
        .flat_map(|replica| replica.take_votes())
        .map(|(_, vote)| vote)
        .collect();
    for vote in votes {
        replicas[next_leader].core.on_receive_vote(&vote).unwrap();
    }

    hash
}
