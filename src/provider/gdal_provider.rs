//! The real `RasterProvider`, backed by the `gdal` crate (GDAL's official
//! Rust bindings). This is the only place in the crate that touches GDAL
//! directly — everything else in the scheduler is written against the
//! trait in `provider::mod`.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use gdal::raster::{GdalDataType, RasterBand, ResampleAlg};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, DriverManager};

use crate::config::ResamplingMethod;
use crate::provider::{RasterProvider, RasterReader, RasterWriter};
use crate::types::{BlockRect, DataType, GridSpec, ImageInfo, PixelBuffer};

/// Stateless; every method opens or is handed a fresh GDAL handle, so this
/// type is trivially `Send + Sync` even though `gdal::Dataset` itself is
/// not shared across threads (each worker's `Box<dyn RasterReader>` is
/// thread-confined, per spec §4.6 / §5).
pub struct GdalRasterProvider;

impl GdalRasterProvider {
    pub fn new() -> Self {
        GdalRasterProvider
    }
}

impl Default for GdalRasterProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn gdal_datatype_to_datatype(dt: GdalDataType) -> Result<DataType> {
    match dt {
        GdalDataType::UInt8 => Ok(DataType::U8),
        GdalDataType::UInt16 => Ok(DataType::U16),
        GdalDataType::Int16 => Ok(DataType::I16),
        GdalDataType::UInt32 => Ok(DataType::U32),
        GdalDataType::Int32 => Ok(DataType::I32),
        GdalDataType::Float32 => Ok(DataType::F32),
        GdalDataType::Float64 => Ok(DataType::F64),
        other => Err(anyhow!("unsupported GDAL datatype: {other:?}")),
    }
}

fn resample_alg(method: ResamplingMethod) -> ResampleAlg {
    match method {
        ResamplingMethod::NearestNeighbor => ResampleAlg::NearestNeighbour,
        ResamplingMethod::Bilinear => ResampleAlg::Bilinear,
        ResamplingMethod::Cubic => ResampleAlg::Cubic,
        ResamplingMethod::CubicSpline => ResampleAlg::CubicSpline,
        ResamplingMethod::Lanczos => ResampleAlg::Lanczos,
        ResamplingMethod::Average => ResampleAlg::Average,
        ResamplingMethod::Mode => ResampleAlg::Mode,
    }
}

fn grid_spec_from_dataset(dataset: &Dataset) -> Result<GridSpec> {
    let (width, height) = dataset.raster_size();
    let geo_transform = dataset.geo_transform().context("dataset has no geotransform")?;
    let projection = dataset.projection();
    let band_count = dataset.raster_count();
    if band_count == 0 {
        return Err(anyhow!("dataset has no raster bands"));
    }

    let band = dataset.rasterband(1).context("failed to open band 1")?;
    let datatype = gdal_datatype_to_datatype(band.band_type())?;
    let nodata = band.no_data_value();

    Ok(GridSpec {
        projection,
        geo_transform,
        width: width as u32,
        height: height as u32,
        datatype,
        nodata,
        band_count,
    })
}

struct GdalReader {
    dataset: Dataset,
}

impl RasterReader for GdalReader {
    fn read_block(&mut self, band: usize, rect: BlockRect, datatype: DataType) -> Result<PixelBuffer> {
        let band_handle: RasterBand = self
            .dataset
            .rasterband(band)
            .with_context(|| format!("failed to open band {band} for read"))?;

        let window = (rect.x_off as isize, rect.y_off as isize);
        let window_size = (rect.width as usize, rect.height as usize);

        macro_rules! read_into {
            ($variant:ident, $t:ty) => {{
                let buf = band_handle
                    .read_as::<$t>(window, window_size, window_size, None)
                    .context("block read failed")?;
                PixelBuffer::$variant(buf.data().to_vec())
            }};
        }

        let buffer = match datatype {
            DataType::U8 => read_into!(U8, u8),
            DataType::U16 => read_into!(U16, u16),
            DataType::I16 => read_into!(I16, i16),
            DataType::U32 => read_into!(U32, u32),
            DataType::I32 => read_into!(I32, i32),
            DataType::F32 => read_into!(F32, f32),
            DataType::F64 => read_into!(F64, f64),
        };

        Ok(buffer)
    }
}

struct ReprojectedReader {
    dataset: Dataset,
}

impl RasterReader for ReprojectedReader {
    fn read_block(&mut self, band: usize, rect: BlockRect, datatype: DataType) -> Result<PixelBuffer> {
        // The warped dataset already lives in the target grid's pixel
        // space, so this is identical to a plain read against it.
        let mut reader = GdalReader {
            dataset: self.dataset.clone(),
        };
        reader.read_block(band, rect, datatype)
    }
}

struct GdalWriter {
    dataset: Dataset,
}

impl RasterWriter for GdalWriter {
    fn write_block(&mut self, band: usize, rect: BlockRect, buffer: &PixelBuffer) -> Result<()> {
        let mut band_handle = self
            .dataset
            .rasterband(band)
            .with_context(|| format!("failed to open band {band} for write"))?;

        let window = (rect.x_off as isize, rect.y_off as isize);
        let size = (rect.width as usize, rect.height as usize);

        macro_rules! write_from {
            ($data:expr) => {{
                let gdal_buf = gdal::raster::Buffer::new(size, $data.clone());
                band_handle.write(window, size, &gdal_buf).context("block write failed")
            }};
        }

        match buffer {
            PixelBuffer::U8(v) => write_from!(v),
            PixelBuffer::U16(v) => write_from!(v),
            PixelBuffer::I16(v) => write_from!(v),
            PixelBuffer::U32(v) => write_from!(v),
            PixelBuffer::I32(v) => write_from!(v),
            PixelBuffer::F32(v) => write_from!(v),
            PixelBuffer::F64(v) => write_from!(v),
        }
    }

    fn close(self: Box<Self>) -> Result<()> {
        self.dataset.flush_cache().context("failed to flush output dataset")?;
        Ok(())
    }
}

impl RasterProvider for GdalRasterProvider {
    fn probe(&self, id: usize, path: &str) -> Result<ImageInfo> {
        let dataset = Dataset::open(path).with_context(|| format!("failed to open input: {path}"))?;
        let grid = grid_spec_from_dataset(&dataset)?;
        let band = dataset.rasterband(1)?;
        let (bw, bh) = band.block_size();

        Ok(ImageInfo {
            id,
            path: path.to_string(),
            grid,
            block_size: (bw as u32, bh as u32),
        })
    }

    fn open_read(
        &self,
        info: &ImageInfo,
        target_grid: Option<&GridSpec>,
        resampling: ResamplingMethod,
    ) -> Result<Box<dyn RasterReader>> {
        let dataset =
            Dataset::open(&info.path).with_context(|| format!("failed to open input: {}", info.path))?;

        match target_grid {
            None => Ok(Box::new(GdalReader { dataset })),
            Some(target) => {
                let warped = gdal::raster::reproject::reproject(
                    &dataset,
                    target.width as usize,
                    target.height as usize,
                    &target.projection,
                    &target.geo_transform,
                    resample_alg(resampling),
                )
                .context("failed to build reprojected view")?;
                Ok(Box::new(ReprojectedReader { dataset: warped }))
            }
        }
    }

    fn transform_bounds(&self, grid: &GridSpec, target_projection: &str) -> Result<(f64, f64, f64, f64)> {
        let src_srs = SpatialRef::from_wkt(&grid.projection).context("invalid source projection")?;
        let dst_srs = SpatialRef::from_wkt(target_projection).context("invalid target projection")?;
        let transform = CoordTransform::new(&src_srs, &dst_srs).context("no transform between projections")?;

        let gt = grid.geo_transform;
        let w = grid.width as f64;
        let h = grid.height as f64;

        // Corners + edge midpoints, per spec §4.2, to guard against
        // non-affine reprojection of a straight-edged bounding box.
        let sample_points: [(f64, f64); 8] = [
            (0.0, 0.0),
            (w, 0.0),
            (0.0, h),
            (w, h),
            (w / 2.0, 0.0),
            (w / 2.0, h),
            (0.0, h / 2.0),
            (w, h / 2.0),
        ];

        let mut xs = Vec::with_capacity(sample_points.len());
        let mut ys = Vec::with_capacity(sample_points.len());
        for (px, py) in sample_points {
            let gx = gt[0] + px * gt[1] + py * gt[2];
            let gy = gt[3] + px * gt[4] + py * gt[5];
            let (tx, ty, _) = transform
                .transform_coords(&[gx], &[gy], &[0.0])
                .context("coordinate transform failed")?;
            xs.push(tx[0]);
            ys.push(ty[0]);
        }

        let min_x = xs.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max);

        Ok((min_x, min_y, max_x, max_y))
    }

    fn create_output(
        &self,
        path: &Path,
        grid: &GridSpec,
        driver: &str,
        creation_options: &[(String, String)],
    ) -> Result<Box<dyn RasterWriter>> {
        let driver_handle = DriverManager::get_driver_by_name(driver)
            .with_context(|| format!("unknown GDAL driver: {driver}"))?;

        let options: Vec<String> = creation_options
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let option_refs: Vec<&str> = options.iter().map(String::as_str).collect();

        macro_rules! create_typed {
            ($t:ty) => {
                driver_handle.create_with_band_type_with_options::<$t, _>(
                    path,
                    grid.width as usize,
                    grid.height as usize,
                    grid.band_count,
                    &option_refs,
                )
            };
        }

        let mut dataset = match grid.datatype {
            DataType::U8 => create_typed!(u8),
            DataType::U16 => create_typed!(u16),
            DataType::I16 => create_typed!(i16),
            DataType::U32 => create_typed!(u32),
            DataType::I32 => create_typed!(i32),
            DataType::F32 => create_typed!(f32),
            DataType::F64 => create_typed!(f64),
        }
        .with_context(|| format!("failed to create output: {}", path.display()))?;

        dataset
            .set_geo_transform(&grid.geo_transform)
            .context("failed to set output geotransform")?;
        dataset
            .set_projection(&grid.projection)
            .context("failed to set output projection")?;

        if let Some(nodata) = grid.nodata {
            for b in 1..=grid.band_count {
                dataset.rasterband(b)?.set_no_data_value(Some(nodata))?;
            }
        }

        Ok(Box::new(GdalWriter { dataset }))
    }

    fn delete_output(&self, path: &Path) -> Result<()> {
        if path.exists() {
            std::fs::remove_file(path).with_context(|| format!("failed to delete {}", path.display()))?;
        }
        Ok(())
    }
}
