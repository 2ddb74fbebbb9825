//! Read worker threads (spec §4.6).
//!
//! Each worker owns one partition of the flattened task list (already
//! round-robin assigned by [`crate::schedule`]) and executes it strictly
//! in order: open a reader for the task's input (via its own
//! [`HandleCache`], never shared with another thread), read the block,
//! publish it to the shared [`BlockCache`]. The first worker to hit a
//! fatal read error flips the shared abort flag, aborts the cache so
//! nobody deadlocks waiting on a block that will never complete, and
//! reports itself on `error_tx`; every other worker notices the abort flag
//! at its next task boundary and stops early without reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use crate::cache::BlockCache;
use crate::config::ResamplingMethod;
use crate::handle_cache::HandleCache;
use crate::monitor::WorkerCounters;
use crate::provider::RasterProvider;
use crate::types::{DecodedBlock, GridSpec, ImageInfo, ReadTask};

/// Everything one worker needs that doesn't change across tasks.
pub struct WorkerContext<'a> {
    pub worker_id: usize,
    pub inputs: &'a [ImageInfo],
    pub needs_reproject: &'a [bool],
    pub output_grid: &'a GridSpec,
    pub resampling: ResamplingMethod,
    pub handle_cache_size: usize,
    pub blocks_per_row: u32,
    /// 1-indexed band this worker is reading. Multi-band outputs run the
    /// whole plan/schedule/cache/worker pipeline once per band (spec
    /// §4.6), sequentially, rather than interleaving bands within one pass.
    pub band: usize,
}

/// Run one worker's partition to completion (or until aborted).
pub fn run_worker(
    ctx: WorkerContext<'_>,
    tasks: Vec<ReadTask>,
    provider: Arc<dyn RasterProvider>,
    cache: Arc<BlockCache>,
    counters: Arc<WorkerCounters>,
    abort: Arc<AtomicBool>,
    error_tx: Sender<anyhow::Error>,
) {
    let mut handle_cache = HandleCache::new(provider.as_ref(), ctx.handle_cache_size);

    for task in tasks {
        if abort.load(Ordering::Relaxed) {
            return;
        }

        if let Err(e) = execute_one(&ctx, &task, &mut handle_cache, &cache, &counters) {
            abort.store(true, Ordering::Relaxed);
            cache.abort();
            let _ = error_tx.try_send(e);
            return;
        }
    }
}

fn execute_one(
    ctx: &WorkerContext<'_>,
    task: &ReadTask,
    handle_cache: &mut HandleCache<'_>,
    cache: &BlockCache,
    counters: &WorkerCounters,
) -> Result<()> {
    let info = ctx
        .inputs
        .get(task.iid)
        .with_context(|| format!("read task references unknown input id {}", task.iid))?;

    let target = if ctx.needs_reproject[task.iid] {
        Some(ctx.output_grid)
    } else {
        None
    };

    let was_cached = handle_cache.contains(task.iid);
    let open_start = Instant::now();
    let reader = handle_cache.get_or_open(info, target, ctx.resampling)?;
    if !was_cached {
        counters.add_wait_on_queue(open_start.elapsed());
    }

    let read_start = Instant::now();
    let data = reader.read_block(ctx.band, task.src_rect, ctx.output_grid.datatype)?;
    counters.add_block_read(data.byte_len() as u64, read_start.elapsed());

    let decoded = DecodedBlock {
        obid: task.obid,
        iid: task.iid,
        dst_rect: task.dst_rect,
        data,
    };

    let block_index = task.obid.linear_index(ctx.blocks_per_row);
    let publish_start = Instant::now();
    cache.publish(block_index, decoded);
    counters.add_wait_on_cache(publish_start.elapsed());

    Ok(())
}
