//! The raster I/O provider interface (spec §6.4).
//!
//! Everything above this module — geometry, planning, scheduling, the
//! cache, the worker/writer threads — is written against these traits, not
//! against GDAL directly. [`gdal_provider::GdalRasterProvider`] is the real,
//! on-disk implementation; [`crate::testing::InMemoryProvider`] is an
//! in-process stand-in used by every test in this crate.

pub mod gdal_provider;

use std::path::Path;

use anyhow::Result;

use crate::config::ResamplingMethod;
use crate::types::{BlockRect, DataType, GridSpec, ImageInfo, PixelBuffer};

/// A reader bound to one input (and, if reprojected, one target grid).
/// Not required to be `Send`: each worker thread opens and owns its own
/// readers (spec §4.6 / §5, "I/O library handles are strictly per-thread").
pub trait RasterReader {
    /// Read one rectangle of one band. `rect` is in whatever space this
    /// reader was opened against (native grid, or the reprojected view,
    /// which coincides with the output grid).
    fn read_block(&mut self, band: usize, rect: BlockRect, datatype: DataType) -> Result<PixelBuffer>;
}

/// A writer bound to the single output file. Only ever touched by the
/// writer thread (spec §4.7, "the writer is the sole mutator").
pub trait RasterWriter {
    fn write_block(&mut self, band: usize, rect: BlockRect, buffer: &PixelBuffer) -> Result<()>;

    /// Flush and close. Consumes the writer so it can't be written to again.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Operations the scheduler needs from the underlying raster I/O library.
/// The provider itself must be `Send + Sync` (it is shared behind an `Arc`
/// across every worker thread), but the `Reader`/`Writer` values it hands
/// out are thread-confined.
pub trait RasterProvider: Send + Sync {
    /// Open `path` and report its georeferencing, dimensions, datatype,
    /// nodata and native block size. `id` is the `InputId` to stamp onto
    /// the returned `ImageInfo`.
    fn probe(&self, id: usize, path: &str) -> Result<ImageInfo>;

    /// Open a reader for `info`. If `target_grid` is `Some`, the returned
    /// reader is a reprojecting view: subsequent `read_block` rects are in
    /// the target grid's pixel space, and samples are already resampled
    /// into it using `resampling`. If `target_grid` is `None`, rects are in
    /// `info`'s own native pixel space.
    fn open_read(
        &self,
        info: &ImageInfo,
        target_grid: Option<&GridSpec>,
        resampling: ResamplingMethod,
    ) -> Result<Box<dyn RasterReader>>;

    /// Transform `grid`'s extent (corners + edge midpoints, per spec
    /// §4.2) into `target_projection`, returning `(min_x, min_y, max_x,
    /// max_y)` in that projection.
    fn transform_bounds(&self, grid: &GridSpec, target_projection: &str) -> Result<(f64, f64, f64, f64)>;

    /// Create a new output raster at `path` with the given grid, GDAL
    /// driver short name, and ordered creation options.
    fn create_output(
        &self,
        path: &Path,
        grid: &GridSpec,
        driver: &str,
        creation_options: &[(String, String)],
    ) -> Result<Box<dyn RasterWriter>>;

    /// Remove a partially-written output after an aborted run.
    fn delete_output(&self, path: &Path) -> Result<()>;
}
