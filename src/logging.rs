/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! This library logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. Block and command hashes are
//! printed as the first seven characters of their Base64 encoding.

use std::time::SystemTime;

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use log;

use crate::events::*;
use crate::types::basic::CryptoHash;

// Names of each event in PascalCase for printing:
pub const INSERT_BLOCK: &str = "InsertBlock";
pub const DELIVER_BLOCK: &str = "DeliverBlock";
pub const COMMIT_BLOCK: &str = "CommitBlock";
pub const DECIDE: &str = "Decide";
pub const PRUNE_BLOCK: &str = "PruneBlock";
pub const UPDATE_HIGHEST_QC: &str = "UpdateHighestQC";
pub const COLLECT_QC: &str = "CollectQC";

pub const PROPOSE: &str = "Propose";
pub const VOTE: &str = "Vote";
pub const SEND_LOCAL_ORDER: &str = "SendLocalOrder";

pub const RECEIVE_PROPOSAL: &str = "ReceiveProposal";
pub const RECEIVE_VOTE: &str = "ReceiveVote";
pub const RECEIVE_LOCAL_ORDER: &str = "ReceiveLocalOrder";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for InsertBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &InsertBlockEvent| {
            log::info!(
                "{}, {}, {}",
                INSERT_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.block),
            )
        })
    }
}

impl Logger for DeliverBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &DeliverBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                DELIVER_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.block),
                event.height,
            )
        })
    }
}

impl Logger for CommitBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CommitBlockEvent| {
            log::info!(
                "{}, {}, {}, {}",
                COMMIT_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.block),
                event.height,
            )
        })
    }
}

impl Logger for DecideEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &DecideEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                DECIDE,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.finality.cmd_hash),
                event.finality.cmd_height,
                event.finality.cmd_idx,
                short_hash(&event.finality.blk_hash),
            )
        })
    }
}

impl Logger for PruneBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &PruneBlockEvent| {
            log::info!(
                "{}, {}, {}",
                PRUNE_BLOCK,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.block),
            )
        })
    }
}

impl Logger for UpdateHighestQCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &UpdateHighestQCEvent| {
            log::info!(
                "{}, {}, {}, {}",
                UPDATE_HIGHEST_QC,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.block),
                event.height,
            )
        })
    }
}

impl Logger for CollectQCEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &CollectQCEvent| {
            log::info!(
                "{}, {}, {}",
                COLLECT_QC,
                secs_since_unix_epoch(event.timestamp),
                short_hash(&event.block),
            )
        })
    }
}

impl Logger for ProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ProposeEvent| {
            log::info!(
                "{}, {}, {}, {}",
                PROPOSE,
                secs_since_unix_epoch(event.timestamp),
                event.proposal.proposer,
                short_hash(&event.proposal.block.hash),
            )
        })
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &VoteEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(event.timestamp),
                event.vote.voter,
                event.recipient,
                short_hash(&event.vote.blk_hash),
            )
        })
    }
}

impl Logger for SendLocalOrderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &SendLocalOrderEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                SEND_LOCAL_ORDER,
                secs_since_unix_epoch(event.timestamp),
                event.local_order.initiator,
                event.leader,
                event.local_order.ordered_hashes.len(),
            )
        })
    }
}

impl Logger for ReceiveProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                RECEIVE_PROPOSAL,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                short_hash(&event.block),
                event.height,
            )
        })
    }
}

impl Logger for ReceiveVoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveVoteEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_VOTE,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                short_hash(&event.block),
            )
        })
    }
}

impl Logger for ReceiveLocalOrderEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        Box::new(|event: &ReceiveLocalOrderEvent| {
            log::info!(
                "{}, {}, {}, {}",
                RECEIVE_LOCAL_ORDER,
                secs_since_unix_epoch(event.timestamp),
                event.origin,
                event.count,
            )
        })
    }
}

/// Get a more readable representation of a hash by base64-encoding it and taking the first 7
/// characters.
pub(crate) fn short_hash(hash: &CryptoHash) -> String {
    let encoded = STANDARD_NO_PAD.encode(hash.bytes());
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .expect("Event occured before the Unix Epoch.")
        .as_secs()
}
