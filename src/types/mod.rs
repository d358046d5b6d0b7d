/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The types defined in [`crate::types`] are common across the subprotocols of this library.
//!
//! The submodules define:
//! 1. [basic]: "inert" newtype wrappers that are sent around and inspected but have no active
//!    behavior.
//! 2. [block]: the block type, its canonical hashing, and the merged-orders payload.
//! 3. [certificates]: partial and quorum certificates and the [Certificate](certificates::Certificate)
//!    capability trait.

pub mod basic;

pub mod block;

pub mod certificates;
