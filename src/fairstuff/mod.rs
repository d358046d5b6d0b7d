/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus state machine: a three-chain HotStuff core extended with an order-fairness layer in
//! which every replica submits its own observed transaction order and the leader merges those orders
//! into a fair global sequence before proposing.
//!
//! ## Protocol
//!
//! The [protocol] submodule implements block delivery, proposal voting, quorum certificate
//! formation, locking, and the three-chain commit rule over the state variables
//! `(hqc, b_lock, b_exec, vheight)`. The [fairness] submodule implements the local-order protocol
//! around it: replicas submit [local orders](crate::messages::LocalOrder) to the current leader, the
//! leader [merges](protocol::FairStuff::fair_propose) them into the proposal payload, and commit
//! resolves each block's payload into a deterministic command sequence with
//! [fair finalization](protocol::FairStuff::fair_finalize).
//!
//! ## Division of labour
//!
//! The core is driven, never driving. A pacemaker decides who leads and when to propose or retry; a
//! networking provider fetches and delivers blocks and verifies signatures; an
//! [`App`](crate::app::App) executes what commits. The core exposes synchronous entry points for
//! each external happening and [one-shot wait-points](protocol::FairStuff::async_qc_finish) the
//! pacemaker can suspend on. All entry points run serially on one thread; the core holds no locks
//! and never suspends mid-operation.
//!
//! ## Errors
//!
//! A [`ProtocolError`] returned from an entry point is a broken protocol invariant — a bug in the
//! caller or in the cluster setup, not a recoverable network condition. Recoverable conditions
//! (duplicate votes, duplicate deliveries, an unresolvable merged order during commit) are logged
//! and absorbed.

pub mod protocol;

pub mod fairness;

use std::fmt::{self, Display, Formatter};

use crate::types::basic::{BlockHeight, CryptoHash};

/// Protocol invariant breaks surfaced by the [consensus core](protocol::FairStuff). The operator
/// must treat these as bugs: the caller violated a documented precondition, or the state machine
/// detected a safety violation.
#[derive(Debug)]
pub enum ProtocolError {
    /// A block was referenced where a delivered block is required, but it is unknown to the store or
    /// not yet delivered. The caller must fetch and deliver referenced blocks first.
    BlockNotDelivered { block: CryptoHash },

    /// A delivered block's justify names a block that was never fetched into the store.
    QcTargetNotFetched { block: CryptoHash },

    /// `on_propose` was called with an empty parents list.
    EmptyParents,

    /// A newly created proposal does not sit above the height this replica last voted on.
    ProposalNotHigherThanVotedHeight {
        height: BlockHeight,
        vheight: BlockHeight,
    },

    /// The commit walk did not terminate at the last executed block. Two conflicting branches have
    /// been committed; safety is breached.
    SafetyBreached {
        block: CryptoHash,
        b_exec: CryptoHash,
    },

    /// `add_replica` was called after `on_init` froze the configuration.
    ConfigurationFrozen,
}

impl Display for ProtocolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BlockNotDelivered { block } => {
                write!(f, "block not delivered: {:?}", block)
            }
            ProtocolError::QcTargetNotFetched { block } => {
                write!(f, "block referred by qc not fetched: {:?}", block)
            }
            ProtocolError::EmptyParents => write!(f, "empty parents"),
            ProtocolError::ProposalNotHigherThanVotedHeight { height, vheight } => write!(
                f,
                "new block height {} should be higher than vheight {}",
                height, vheight
            ),
            ProtocolError::SafetyBreached { block, b_exec } => write!(
                f,
                "safety breached: commit walk from {:?} missed b_exec {:?}",
                block, b_exec
            ),
            ProtocolError::ConfigurationFrozen => {
                write!(f, "replica set is frozen after on_init")
            }
        }
    }
}
