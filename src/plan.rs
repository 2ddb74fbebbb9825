//! Building the block plan (spec §4.3): for every block of the output
//! grid, the ordered list of inputs that contribute to it and the
//! source/destination rectangles for each.
//!
//! The plan covers every output block, including ones with zero
//! contributing inputs — the writer still has to emit an all-nodata block
//! there so the output raster has no holes.

use crate::geometry::ResolvedGeometry;
use crate::types::{BlockRect, ImageInfo, OutputBlockId, ReadTask};

/// One output block's contributing inputs, in priority order (lowest
/// `InputId` first — see [`crate::types::InputId`]).
#[derive(Debug, Clone)]
pub struct BlockPlanEntry {
    pub obid: OutputBlockId,
    pub tasks: Vec<ReadTask>,
}

/// The complete, static plan for one run. Built once after geometry
/// resolution; read-only from then on.
pub struct BlockPlan {
    pub block_size: u32,
    pub blocks_per_row: u32,
    pub blocks_per_col: u32,
    /// Row-major order: `entries[r * blocks_per_row + c]` is block `(r, c)`.
    pub entries: Vec<BlockPlanEntry>,
}

impl BlockPlan {
    pub fn block_count(&self) -> usize {
        self.entries.len()
    }
}

/// Build the block plan for an output grid already partitioned into
/// `block_size`-by-`block_size` tiles (the last row/column may be smaller).
pub fn build_block_plan(geometry: &ResolvedGeometry, inputs: &[ImageInfo], block_size: u32) -> BlockPlan {
    let grid = &geometry.output_grid;
    let blocks_per_row = grid.width.div_ceil(block_size);
    let blocks_per_col = grid.height.div_ceil(block_size);

    let mut entries = Vec::with_capacity(blocks_per_row as usize * blocks_per_col as usize);

    for row in 0..blocks_per_col {
        for col in 0..blocks_per_row {
            let obid = OutputBlockId::new(row, col);
            let block_x = col * block_size;
            let block_y = row * block_size;
            let block_w = block_size.min(grid.width - block_x);
            let block_h = block_size.min(grid.height - block_y);

            let mut tasks = Vec::new();
            for (idx, info) in inputs.iter().enumerate() {
                let (fx0, fy0, fx1, fy1) = geometry.footprints_px[idx];

                let ox0 = block_x as i64;
                let oy0 = block_y as i64;
                let ox1 = ox0 + block_w as i64;
                let oy1 = oy0 + block_h as i64;

                let ix0 = ox0.max(fx0);
                let iy0 = oy0.max(fy0);
                let ix1 = ox1.min(fx1);
                let iy1 = oy1.min(fy1);

                if ix1 <= ix0 || iy1 <= iy0 {
                    continue;
                }

                let overlap_w = (ix1 - ix0) as u32;
                let overlap_h = (iy1 - iy0) as u32;

                let dst_rect = BlockRect::new((ix0 - ox0) as u32, (iy0 - oy0) as u32, overlap_w, overlap_h);

                let src_rect = if geometry.needs_reproject[idx] {
                    // The reprojected reader's pixel space coincides with
                    // the output grid, so the source rect is simply the
                    // overlap's absolute output-grid coordinates.
                    BlockRect::new(ix0 as u32, iy0 as u32, overlap_w, overlap_h)
                } else {
                    // Same-projection inputs are assumed pixel-aligned to
                    // the output resolution; translate by the footprint's
                    // own offset to land in the input's native pixel space.
                    BlockRect::new((ix0 - fx0) as u32, (iy0 - fy0) as u32, overlap_w, overlap_h)
                };

                tasks.push(ReadTask {
                    obid,
                    iid: info.id,
                    src_rect,
                    dst_rect,
                });
            }

            entries.push(BlockPlanEntry { obid, tasks });
        }
    }

    BlockPlan {
        block_size,
        blocks_per_row,
        blocks_per_col,
        entries,
    }
}
