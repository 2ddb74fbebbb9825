//! The top-level orchestrator (spec §4.9): `Init -> Probing -> Planning ->
//! Running -> Finalizing -> {Done | Failed}`.
//!
//! This is the only place that wires every other module together; nothing
//! here does real I/O work itself beyond the state-machine glue. On any
//! failure the driver deletes whatever partial output exists and returns
//! before entering a timed "Finalizing" phase — the monitor JSON from an
//! aborted run therefore has `Probing`/`Planning` (if they completed) but
//! never `Finalizing`, which is how a caller distinguishes a clean abort
//! from a crash mid-write.

use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use rayon::prelude::*;

use crate::cache::BlockCache;
use crate::config::Options;
use crate::error::MosaicError;
use crate::geometry::resolve_output_grid;
use crate::monitor::Monitor;
use crate::plan::build_block_plan;
use crate::provider::RasterProvider;
use crate::schedule::{expected_counts, flatten_and_partition};
use crate::types::ImageInfo;
use crate::writer::run_writer;

/// Run one full mosaic job. Returns the populated [`Monitor`] on success so
/// the caller (CLI or a programmatic embedder) can write `--monitor-json`
/// or inspect counters directly.
pub fn do_mosaic(
    options: &Options,
    input_paths: &[String],
    output_path: &Path,
    provider: Arc<dyn RasterProvider>,
) -> Result<Monitor> {
    if input_paths.is_empty() {
        return Err(MosaicError::Usage("at least one input is required".to_string()).into());
    }

    let monitor = Monitor::new(options.num_threads);
    monitor.set_config(options);

    // From here on, any failure still gets a best-effort partial monitor
    // record written out (spec §7, "if a monitor file was requested, a
    // partial monitor record"): whichever phases completed before the
    // failure are present, `Finalizing` never appears on an aborted run.
    let write_partial_monitor = |monitor: &Monitor| {
        if let Some(path) = &options.monitor_json {
            let _ = monitor.write_json(path);
        }
    };

    let inputs = match monitor.time_phase("Probing", || probe_all(provider.as_ref(), input_paths)) {
        Ok(inputs) => inputs,
        Err(e) => {
            write_partial_monitor(&monitor);
            return Err(e);
        }
    };

    let plan_result = monitor.time_phase("Planning", || -> Result<_> {
        let geometry = resolve_output_grid(provider.as_ref(), &inputs, options)
            .map_err(|e| MosaicError::Metadata(e.to_string()))?;
        let plan = build_block_plan(&geometry, &inputs, options.block_size);
        Ok((geometry, plan))
    });

    let (geometry, plan) = match plan_result {
        Ok(v) => v,
        Err(e) => {
            write_partial_monitor(&monitor);
            return Err(e);
        }
    };

    let read_tasks: usize = plan.entries.iter().map(|e| e.tasks.len()).sum();
    monitor.set_plan(crate::monitor::PlanSummary {
        output_blocks: plan.block_count(),
        read_tasks,
        inputs: inputs.len(),
    });

    let output_grid = &geometry.output_grid;
    let band_count = output_grid.band_count;

    let mut writer = match provider
        .create_output(output_path, output_grid, &options.driver, &options.creation_options)
        .map_err(|e| MosaicError::Write(e.to_string()))
    {
        Ok(w) => w,
        Err(e) => {
            write_partial_monitor(&monitor);
            return Err(e.into());
        }
    };

    let run_result = monitor.time_phase("Running", || -> Result<()> {
        for band in 1..=band_count {
            run_band(
                options,
                &inputs,
                &geometry,
                &plan,
                band,
                Arc::clone(&provider),
                writer.as_mut(),
                &monitor,
            )?;
        }
        Ok(())
    });

    if let Err(e) = run_result {
        let _ = provider.delete_output(output_path);
        write_partial_monitor(&monitor);
        return Err(e);
    }

    let finalize_result = monitor.time_phase("Finalizing", || -> Result<()> {
        writer.close().map_err(|e| MosaicError::Write(e.to_string()).into())
    });

    if let Err(e) = finalize_result {
        let _ = provider.delete_output(output_path);
        write_partial_monitor(&monitor);
        return Err(e);
    }

    if let Some(path) = &options.monitor_json {
        monitor.write_json(path).context("failed to write monitor JSON")?;
    }

    Ok(monitor)
}

fn probe_all(provider: &dyn RasterProvider, input_paths: &[String]) -> Result<Vec<ImageInfo>> {
    input_paths
        .par_iter()
        .enumerate()
        .map(|(id, path)| {
            provider
                .probe(id, path)
                .map_err(|e| MosaicError::Metadata(format!("failed to probe {path}: {e}")).into())
        })
        .collect::<Result<Vec<ImageInfo>>>()
}

#[allow(clippy::too_many_arguments)]
fn run_band(
    options: &Options,
    inputs: &[ImageInfo],
    geometry: &crate::geometry::ResolvedGeometry,
    plan: &crate::plan::BlockPlan,
    band: usize,
    provider: Arc<dyn RasterProvider>,
    writer: &mut dyn crate::provider::RasterWriter,
    monitor: &Monitor,
) -> Result<()> {
    let partitions = flatten_and_partition(plan, options.num_threads);
    let cache = Arc::new(BlockCache::new(expected_counts(plan), options.effective_look_ahead_window()));
    let abort = Arc::new(AtomicBool::new(false));
    let (error_tx, error_rx) = crossbeam_channel::bounded(options.num_threads);
    let output_grid = &geometry.output_grid;

    // Plain OS threads, scoped so workers can borrow `inputs`/`geometry`
    // directly instead of everything needing to be `Arc`'d just to satisfy
    // `'static` (spec §5, "no cooperative scheduler... parallel OS threads
    // with shared memory"). The writer runs on this (the driver's) thread,
    // the sole mutator of `writer` the whole time.
    let write_result = std::thread::scope(|scope| {
        for (worker_id, tasks) in partitions.into_iter().enumerate() {
            let ctx = crate::workers::WorkerContext {
                worker_id,
                inputs,
                needs_reproject: &geometry.needs_reproject,
                output_grid,
                resampling: options.resampling,
                handle_cache_size: options.handle_cache_size,
                blocks_per_row: plan.blocks_per_row,
                band,
            };
            let provider = Arc::clone(&provider);
            let cache = Arc::clone(&cache);
            let counters = monitor.worker(worker_id);
            let abort = Arc::clone(&abort);
            let error_tx = error_tx.clone();
            scope.spawn(move || {
                crate::workers::run_worker(ctx, tasks, provider, cache, counters, abort, error_tx);
            });
        }

        let writer_counters = Arc::new(crate::monitor::WorkerCounters::new(usize::MAX));
        run_writer(
            Arc::clone(&cache),
            plan,
            output_grid.width,
            output_grid.height,
            writer,
            band,
            output_grid.datatype,
            output_grid.nodata,
            &writer_counters,
        )
    });

    if let Ok(e) = error_rx.try_recv() {
        return Err(MosaicError::Read(e.to_string()).into());
    }

    write_result.map_err(|e| MosaicError::Write(e.to_string()).into())
}
