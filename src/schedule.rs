//! Flattening the block plan into a single globally-ordered task list and
//! partitioning it across worker threads (spec §4.4).
//!
//! The global order is row-major by output block, then by input priority
//! within a block — the same order [`crate::plan::build_block_plan`]
//! already produces. Partitioning is a plain round-robin (`task_index % N`)
//! over that order: deterministic, independent of runtime queue behavior,
//! and the reason every worker sees a bounded spread of output blocks
//! rather than clustering on whichever blocks happen to be cheap.

use crate::plan::BlockPlan;
use crate::types::ReadTask;

/// `partitions[w]` is the ordered list of tasks worker `w` must execute, in
/// increasing global-order — workers execute their own partition strictly
/// in order, which is what keeps per-block arrival order within a thread
/// deterministic even though threads interleave with each other.
pub fn flatten_and_partition(plan: &BlockPlan, num_threads: usize) -> Vec<Vec<ReadTask>> {
    assert!(num_threads > 0, "num_threads must be positive");

    let mut partitions: Vec<Vec<ReadTask>> = (0..num_threads).map(|_| Vec::new()).collect();
    let mut global_index = 0usize;

    for entry in &plan.entries {
        for task in &entry.tasks {
            partitions[global_index % num_threads].push(task.clone());
            global_index += 1;
        }
    }

    partitions
}

/// Number of contributing inputs for each output block, in the same
/// row-major order as `plan.entries`. The cache uses this to know when a
/// block has received every read it's owed, including the zero case.
pub fn expected_counts(plan: &BlockPlan) -> Vec<usize> {
    plan.entries.iter().map(|e| e.tasks.len()).collect()
}
