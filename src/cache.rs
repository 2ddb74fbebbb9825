//! The block cache (spec §4.5): the hand-off point between read workers
//! and the writer thread.
//!
//! Workers publish decoded blocks as they finish reading them; the writer
//! consumes whole output blocks strictly in row-major order, once every
//! contributing input for that block has arrived. A bounded look-ahead
//! window (`W_LA`) caps how far ahead of the writer's current position
//! workers are allowed to publish, so memory residency stays bounded
//! regardless of how far workers race ahead. This is built on
//! `Mutex`/`Condvar` rather than a channel on purpose — the window is an
//! admission control rule, not a queue capacity, and needs a predicate
//! ("is this block's index within the window of the writer's frontier?")
//! that a bounded channel can't express.

use std::sync::{Condvar, Mutex};

use ahash::AHashMap;

use crate::types::DecodedBlock;

struct CacheState {
    /// Index of the next output block the writer is waiting to consume.
    frontier: usize,
    /// Decoded contributions that have arrived but not yet been handed to
    /// the writer, keyed by output block linear index.
    pending: AHashMap<usize, Vec<DecodedBlock>>,
    /// Arrival counts per block, so we know when a block is complete
    /// without rescanning `pending`.
    arrived: AHashMap<usize, usize>,
    aborted: bool,
}

/// Shared between every worker thread and the writer thread via `Arc`.
pub struct BlockCache {
    state: Mutex<CacheState>,
    /// Signaled when the writer's frontier advances, waking any worker
    /// blocked on the look-ahead window.
    frontier_advanced: Condvar,
    /// Signaled when a block becomes fully arrived, waking the writer if
    /// it's waiting on exactly that block.
    block_ready: Condvar,
    expected: Vec<usize>,
    window: usize,
    total_blocks: usize,
}

/// Returned to the writer for one completed output block.
pub struct ReadyBlock {
    pub block_index: usize,
    pub contributions: Vec<DecodedBlock>,
}

impl BlockCache {
    /// `expected[i]` is how many `ReadTask`s contribute to block `i`
    /// (0 is valid: a block nobody writes to still gets taken, empty, so
    /// the writer can fill it with nodata). `window` is `W_LA`.
    pub fn new(expected: Vec<usize>, window: usize) -> Self {
        let total_blocks = expected.len();
        BlockCache {
            state: Mutex::new(CacheState {
                frontier: 0,
                pending: AHashMap::new(),
                arrived: AHashMap::new(),
                aborted: false,
            }),
            frontier_advanced: Condvar::new(),
            block_ready: Condvar::new(),
            expected,
            window,
            total_blocks,
        }
    }

    /// Publish one worker's decoded contribution to `block_index`. Blocks
    /// (on `frontier_advanced`) while `block_index` is further ahead of the
    /// writer's current frontier than the look-ahead window allows.
    ///
    /// Panics if this would be the `(expected[block_index] + 1)`-th
    /// contribution to a block — every `ReadTask` in the plan is supposed
    /// to publish exactly once, so an extra arrival means the plan and the
    /// schedule disagree, which is a programming error, not a runtime
    /// condition callers can recover from.
    pub fn publish(&self, block_index: usize, block: DecodedBlock) {
        let mut guard = self.state.lock().unwrap();
        loop {
            if guard.aborted {
                return;
            }
            if block_index < guard.frontier + self.window {
                break;
            }
            guard = self.frontier_advanced.wait(guard).unwrap();
        }

        if guard.aborted {
            return;
        }

        let expected = self.expected[block_index];
        let arrived = guard.arrived.entry(block_index).or_insert(0);
        if *arrived >= expected {
            drop(guard);
            panic!(
                "block {block_index} received more contributions ({}) than planned ({expected})",
                *arrived + 1
            );
        }
        *arrived += 1;
        let now_complete = *arrived == expected;

        guard.pending.entry(block_index).or_default().push(block);

        if now_complete {
            drop(guard);
            self.block_ready.notify_all();
        }
    }

    /// Block until output block `frontier` (the writer's current position)
    /// has received every contribution the plan promised, then return it
    /// and advance the frontier. Returns `None` once every block has been
    /// taken. Waking a worker blocked in `publish` is this call's
    /// responsibility, via `frontier_advanced`.
    pub fn take_next(&self) -> Option<ReadyBlock> {
        let mut guard = self.state.lock().unwrap();
        if guard.frontier >= self.total_blocks {
            return None;
        }

        loop {
            if guard.aborted {
                return None;
            }
            let idx = guard.frontier;
            let arrived = guard.arrived.get(&idx).copied().unwrap_or(0);
            if arrived >= self.expected[idx] {
                break;
            }
            guard = self.block_ready.wait(guard).unwrap();
        }

        let idx = guard.frontier;
        let contributions = guard.pending.remove(&idx).unwrap_or_default();
        guard.arrived.remove(&idx);
        guard.frontier += 1;
        drop(guard);

        self.frontier_advanced.notify_all();

        Some(ReadyBlock {
            block_index: idx,
            contributions,
        })
    }

    /// Wake every blocked worker and the writer immediately, for the error
    /// path: once one worker hits a fatal read error the rest of the
    /// pipeline should unwind instead of deadlocking on a window or a
    /// block that will never complete.
    pub fn abort(&self) {
        let mut guard = self.state.lock().unwrap();
        guard.aborted = true;
        drop(guard);
        self.frontier_advanced.notify_all();
        self.block_ready.notify_all();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.lock().unwrap().aborted
    }
}
