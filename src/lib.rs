//! mosaic - concurrent block-level mosaicking of overlapping georeferenced
//! rasters.
//!
//! Given an ordered list of inputs (earlier entries take priority), this
//! crate resolves a common output grid, builds a static plan of which
//! inputs contribute to which output blocks, and executes that plan with a
//! fixed pool of OS threads feeding a single writer thread through a
//! bounded block cache. The result is identical regardless of how the
//! threads happen to interleave: contributions are always composited by
//! priority order, first non-nodata sample wins.
//!
//! # Example
//!
//! ```ignore
//! use mosaic::config::Options;
//! use mosaic::driver::do_mosaic;
//! use mosaic::provider::gdal_provider::GdalRasterProvider;
//! use std::sync::Arc;
//! use std::path::Path;
//!
//! let options = Options::default();
//! let inputs = vec!["a.tif".to_string(), "b.tif".to_string()];
//! let provider = Arc::new(GdalRasterProvider::new());
//! let monitor = do_mosaic(&options, &inputs, Path::new("out.tif"), provider)?;
//! ```

pub mod cache;
pub mod config;
pub mod driver;
pub mod error;
pub mod geometry;
pub mod handle_cache;
pub mod monitor;
pub mod plan;
pub mod provider;
pub mod schedule;
pub mod types;
pub mod workers;
pub mod writer;

pub mod testing;

pub use config::Options;
pub use driver::do_mosaic;
pub use error::MosaicError;
pub use types::{DataType, GridSpec, ImageInfo, InputId};
