/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The mutable state owned by a consensus core instance: the [block store](block_store::BlockStore)
//! that arena-owns every live block, and the [order cache](order_cache::OrderCache) holding the
//! local-order queues and the proposed/seen command sets.
//!
//! Nothing here is process-global; a single process may host multiple cores, each with its own
//! state (this is what the integration tests do). All access happens on the core's single event-loop
//! thread.

pub mod block_store;

pub mod order_cache;
