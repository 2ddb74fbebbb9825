//! An in-process `RasterProvider` backed by plain `Vec`s instead of GDAL.
//! Every scenario and unit test in this crate runs against this provider so
//! the suite doesn't depend on GDAL being installed or on fixture files on
//! disk.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{anyhow, Result};

use crate::config::ResamplingMethod;
use crate::provider::{RasterProvider, RasterReader, RasterWriter};
use crate::types::{BlockRect, DataType, GridSpec, ImageInfo, PixelBuffer};

/// One registered input: its grid plus a full-grid pixel buffer, one per
/// band, in row-major order.
#[derive(Clone)]
pub struct FakeRaster {
    pub grid: GridSpec,
    pub bands: Vec<PixelBuffer>,
}

impl FakeRaster {
    pub fn new(grid: GridSpec, bands: Vec<PixelBuffer>) -> Self {
        assert_eq!(bands.len(), grid.band_count, "band count mismatch");
        FakeRaster { grid, bands }
    }
}

/// A provider whose "files" are just string keys into an in-memory table.
/// `create_output`/`delete_output` likewise write into a table the test can
/// inspect afterwards instead of touching the filesystem.
pub struct InMemoryProvider {
    inputs: HashMap<String, FakeRaster>,
    outputs: Mutex<HashMap<PathBuf, FakeRaster>>,
    /// Inputs registered here fail every `read_block` call, to exercise the
    /// abort path (spec §8 S6) without needing a real broken file.
    failing_reads: HashSet<String>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        InMemoryProvider {
            inputs: HashMap::new(),
            outputs: Mutex::new(HashMap::new()),
            failing_reads: HashSet::new(),
        }
    }

    pub fn with_input(mut self, path: &str, raster: FakeRaster) -> Self {
        self.inputs.insert(path.to_string(), raster);
        self
    }

    /// Mark a registered input so every block read against it fails. The
    /// input still probes successfully (its metadata is fine); only reads
    /// during the Running phase fail, mirroring a transient storage-backend
    /// read error rather than a missing/corrupt file.
    pub fn with_failing_reads(mut self, path: &str) -> Self {
        self.failing_reads.insert(path.to_string());
        self
    }

    /// Snapshot an output written during a test run, for assertions.
    pub fn output(&self, path: &Path) -> Option<FakeRaster> {
        self.outputs.lock().unwrap().get(path).cloned()
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn sample_at(buffer: &PixelBuffer, grid_width: u32, rect: BlockRect, datatype: DataType) -> PixelBuffer {
    debug_assert_eq!(buffer.datatype(), datatype);

    macro_rules! extract {
        ($variant:ident, $data:expr) => {{
            let mut out = Vec::with_capacity(rect.pixel_count());
            for row in 0..rect.height {
                let src_y = rect.y_off + row;
                let row_start = src_y as usize * grid_width as usize + rect.x_off as usize;
                out.extend_from_slice(&$data[row_start..row_start + rect.width as usize]);
            }
            PixelBuffer::$variant(out)
        }};
    }

    match buffer {
        PixelBuffer::U8(v) => extract!(U8, v),
        PixelBuffer::U16(v) => extract!(U16, v),
        PixelBuffer::I16(v) => extract!(I16, v),
        PixelBuffer::U32(v) => extract!(U32, v),
        PixelBuffer::I32(v) => extract!(I32, v),
        PixelBuffer::F32(v) => extract!(F32, v),
        PixelBuffer::F64(v) => extract!(F64, v),
    }
}

fn write_at(buffer: &mut PixelBuffer, grid_width: u32, rect: BlockRect, src: &PixelBuffer) {
    macro_rules! place {
        ($variant:ident, $dst:expr, $src:expr) => {{
            for row in 0..rect.height {
                let dst_y = rect.y_off + row;
                let row_start = dst_y as usize * grid_width as usize + rect.x_off as usize;
                let src_row_start = row as usize * rect.width as usize;
                $dst[row_start..row_start + rect.width as usize]
                    .copy_from_slice(&$src[src_row_start..src_row_start + rect.width as usize]);
            }
        }};
    }

    match (buffer, src) {
        (PixelBuffer::U8(d), PixelBuffer::U8(s)) => place!(U8, d, s),
        (PixelBuffer::U16(d), PixelBuffer::U16(s)) => place!(U16, d, s),
        (PixelBuffer::I16(d), PixelBuffer::I16(s)) => place!(I16, d, s),
        (PixelBuffer::U32(d), PixelBuffer::U32(s)) => place!(U32, d, s),
        (PixelBuffer::I32(d), PixelBuffer::I32(s)) => place!(I32, d, s),
        (PixelBuffer::F32(d), PixelBuffer::F32(s)) => place!(F32, d, s),
        (PixelBuffer::F64(d), PixelBuffer::F64(s)) => place!(F64, d, s),
        _ => panic!("datatype mismatch between output band and written block"),
    }
}

struct InMemoryReader {
    raster: FakeRaster,
    path: String,
    fails: bool,
}

impl RasterReader for InMemoryReader {
    fn read_block(&mut self, band: usize, rect: BlockRect, datatype: DataType) -> Result<PixelBuffer> {
        if self.fails {
            return Err(anyhow!("simulated read failure for {}", self.path));
        }
        let buffer = self
            .raster
            .bands
            .get(band - 1)
            .ok_or_else(|| anyhow!("band {band} out of range"))?;
        Ok(sample_at(buffer, self.raster.grid.width, rect, datatype))
    }
}

struct InMemoryWriter<'a> {
    path: PathBuf,
    raster: FakeRaster,
    outputs: &'a Mutex<HashMap<PathBuf, FakeRaster>>,
}

impl<'a> RasterWriter for InMemoryWriter<'a> {
    fn write_block(&mut self, band: usize, rect: BlockRect, buffer: &PixelBuffer) -> Result<()> {
        let dst = self
            .raster
            .bands
            .get_mut(band - 1)
            .ok_or_else(|| anyhow!("band {band} out of range"))?;
        write_at(dst, self.raster.grid.width, rect, buffer);
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.outputs.lock().unwrap().insert(self.path, self.raster);
        Ok(())
    }
}

impl RasterProvider for InMemoryProvider {
    fn probe(&self, id: usize, path: &str) -> Result<ImageInfo> {
        let raster = self
            .inputs
            .get(path)
            .ok_or_else(|| anyhow!("no such fake input registered: {path}"))?;
        Ok(ImageInfo {
            id,
            path: path.to_string(),
            grid: raster.grid.clone(),
            block_size: (256, 256),
        })
    }

    fn open_read(
        &self,
        info: &ImageInfo,
        target_grid: Option<&GridSpec>,
        _resampling: ResamplingMethod,
    ) -> Result<Box<dyn RasterReader>> {
        let raster = self
            .inputs
            .get(&info.path)
            .ok_or_else(|| anyhow!("no such fake input registered: {}", info.path))?
            .clone();

        if let Some(target) = target_grid {
            if target.projection != raster.grid.projection {
                return Err(anyhow!(
                    "InMemoryProvider does not resample across projections; tests should pre-align grids"
                ));
            }
        }

        let fails = self.failing_reads.contains(&info.path);
        Ok(Box::new(InMemoryReader { raster, path: info.path.clone(), fails }))
    }

    fn transform_bounds(&self, grid: &GridSpec, target_projection: &str) -> Result<(f64, f64, f64, f64)> {
        if grid.projection != target_projection {
            return Err(anyhow!(
                "InMemoryProvider only supports identity transforms between matching projection strings"
            ));
        }
        let min_x = grid.origin_x();
        let max_y = grid.origin_y();
        let max_x = min_x + grid.width as f64 * grid.pixel_width();
        let min_y = max_y + grid.height as f64 * grid.pixel_height();
        Ok((min_x, min_y.min(max_y), max_x, min_y.max(max_y)))
    }

    fn create_output(
        &self,
        path: &Path,
        grid: &GridSpec,
        _driver: &str,
        _creation_options: &[(String, String)],
    ) -> Result<Box<dyn RasterWriter>> {
        let count = grid.width as usize * grid.height as usize;
        let bands = (0..grid.band_count)
            .map(|_| PixelBuffer::filled(grid.datatype, count, grid.nodata))
            .collect();
        let raster = FakeRaster::new(grid.clone(), bands);
        Ok(Box::new(InMemoryWriter {
            path: path.to_path_buf(),
            raster,
            outputs: &self.outputs,
        }))
    }

    fn delete_output(&self, path: &Path) -> Result<()> {
        self.outputs.lock().unwrap().remove(path);
        Ok(())
    }
}
