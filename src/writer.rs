//! The writer thread (spec §4.7): the sole mutator of the output raster.
//!
//! Consumes ready blocks from the [`BlockCache`] strictly in row-major
//! order and composites each one's contributions by priority, first-hit
//! wins: for every pixel, the lowest-`InputId` contributor whose sample at
//! that position isn't nodata is the one that ends up in the output,
//! regardless of which order the contributions actually arrived in. That's
//! what makes the result independent of scheduling, even though arrival
//! order across threads is not.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};

use crate::cache::BlockCache;
use crate::monitor::WorkerCounters;
use crate::plan::BlockPlan;
use crate::provider::RasterWriter;
use crate::types::{BlockRect, DataType, DecodedBlock, OutputBlockId, PixelBuffer};

/// Composite one output block's arrived contributions into a single
/// buffer, honoring priority order. `contributions` need not be sorted or
/// complete-in-arrival-order; this re-sorts by `iid` before compositing so
/// the result never depends on publish order. Each contribution's `data` is
/// sized to its own `dst_rect` (the overlap with the block), not the full
/// block, so it's placed row-by-row at `dst_rect`'s offset rather than
/// assumed to already cover the block from pixel zero.
pub fn compose(
    mut contributions: Vec<DecodedBlock>,
    width: u32,
    height: u32,
    datatype: DataType,
    nodata: Option<f64>,
) -> PixelBuffer {
    contributions.sort_by_key(|c| c.iid);
    let count = width as usize * height as usize;
    let mut out = PixelBuffer::filled(datatype, count, nodata);

    for contribution in &contributions {
        composite_one(&mut out, width, contribution.dst_rect, &contribution.data, nodata);
    }

    out
}

fn composite_one(out: &mut PixelBuffer, out_width: u32, dst_rect: BlockRect, src: &PixelBuffer, nodata: Option<f64>) {
    macro_rules! merge {
        ($out:expr, $src:expr, $cast:ty) => {{
            let sentinel = nodata.map(|n| n as $cast);
            for row in 0..dst_rect.height {
                let dst_y = dst_rect.y_off + row;
                let row_start = dst_y as usize * out_width as usize + dst_rect.x_off as usize;
                let src_row_start = row as usize * dst_rect.width as usize;
                let dst_row = &mut $out[row_start..row_start + dst_rect.width as usize];
                let src_row = &$src[src_row_start..src_row_start + dst_rect.width as usize];
                for (o, s) in dst_row.iter_mut().zip(src_row.iter()) {
                    let is_current_nodata = sentinel.map_or(false, |n| *o == n);
                    if is_current_nodata {
                        *o = *s;
                    }
                }
            }
        }};
    }

    match (out, src) {
        (PixelBuffer::U8(o), PixelBuffer::U8(s)) => merge!(o, s, u8),
        (PixelBuffer::U16(o), PixelBuffer::U16(s)) => merge!(o, s, u16),
        (PixelBuffer::I16(o), PixelBuffer::I16(s)) => merge!(o, s, i16),
        (PixelBuffer::U32(o), PixelBuffer::U32(s)) => merge!(o, s, u32),
        (PixelBuffer::I32(o), PixelBuffer::I32(s)) => merge!(o, s, i32),
        (PixelBuffer::F32(o), PixelBuffer::F32(s)) => merge!(o, s, f32),
        (PixelBuffer::F64(o), PixelBuffer::F64(s)) => merge!(o, s, f64),
        _ => panic!("datatype mismatch while compositing a block"),
    }
}

/// Drain the cache to completion, writing every block to `band` of
/// `output`. Stops early (returning `Ok(())`) if the cache was aborted by a
/// worker's error — the driver is responsible for surfacing that error,
/// since the writer itself never sees it directly.
pub fn run_writer(
    cache: Arc<BlockCache>,
    plan: &BlockPlan,
    grid_width: u32,
    grid_height: u32,
    output: &mut dyn RasterWriter,
    band: usize,
    datatype: DataType,
    nodata: Option<f64>,
    counters: &WorkerCounters,
) -> Result<()> {
    while let Some(ready) = cache.take_next() {
        let entry = &plan.entries[ready.block_index];
        let obid = entry.obid;
        let rect = block_rect_for(obid, plan, grid_width, grid_height);

        let write_start = Instant::now();
        let composed = compose(ready.contributions, rect.width, rect.height, datatype, nodata);
        let byte_len = composed.byte_len() as u64;

        output
            .write_block(band, rect, &composed)
            .with_context(|| format!("failed to write output block {obid:?}"))?;

        counters.add_block_read(byte_len, write_start.elapsed());
    }

    Ok(())
}

/// A block's rect, clipped to the output grid so the last row/column of
/// blocks (which may be smaller than `block_size`) gets its true size.
fn block_rect_for(
    obid: OutputBlockId,
    plan: &BlockPlan,
    grid_width: u32,
    grid_height: u32,
) -> crate::types::BlockRect {
    let block_x = obid.col * plan.block_size;
    let block_y = obid.row * plan.block_size;
    let width = plan.block_size.min(grid_width - block_x);
    let height = plan.block_size.min(grid_height - block_y);
    crate::types::BlockRect::new(block_x, block_y, width, height)
}
