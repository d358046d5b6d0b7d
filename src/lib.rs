/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Rust implementation of leader-based, order-fair Byzantine Fault Tolerant state machine
//! replication in the HotStuff family.
//!
//! The library replicates a totally-ordered log of opaque commands across `n = 3f + 1` replicas,
//! tolerating up to `f` Byzantine participants under partial synchrony. On top of the three-chain
//! HotStuff safety and liveness rules, every replica submits its own observed transaction order to
//! the current leader, the leader merges those orders into the proposal payload, and commit resolves
//! each block's merged orders into a fair, deterministic command sequence.
//!
//! The crate ships the [consensus state machine](fairstuff::protocol::FairStuff) and everything it
//! owns: the [block store](state::block_store), the leader-side [order cache](state::order_cache),
//! the [wire types](messages), and [event notifications](events). Networking, the pacemaker, command
//! execution, and persistence are the user's: they plug in through the [`App`] and [`Network`]
//! traits, the `on_*` entry points, and the async wait-points.

pub mod app;

pub mod config;

pub mod events;

pub mod event_bus;

pub mod fairstuff;

pub mod logging;

pub mod messages;

pub mod state;

pub mod types;

// Re-exports
pub use app::{App, Network};
pub use fairstuff::protocol::FairStuff;
pub use fairstuff::ProtocolError;
