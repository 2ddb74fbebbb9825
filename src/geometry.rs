//! Resolving the output grid from a set of probed inputs (spec §4.2).
//!
//! This runs once, after probing and before planning. It decides the
//! output projection, pixel size, origin/extent and datatype, and reports
//! which inputs need reprojection to reach that grid.

use anyhow::{anyhow, Result};

use crate::config::{Options, TargetProjection};
use crate::provider::RasterProvider;
use crate::types::{DataType, GridSpec, ImageInfo};

/// The resolved output grid, plus which inputs (by index into the original
/// probed list) need a reprojecting reader to reach it.
pub struct ResolvedGeometry {
    pub output_grid: GridSpec,
    pub needs_reproject: Vec<bool>,
    /// Each input's footprint in output pixel space, `(px0, py0, px1, py1)`,
    /// exclusive of `px1`/`py1`. Used by planning (spec §4.3) to find which
    /// inputs intersect which output block without re-deriving bounds.
    pub footprints_px: Vec<(i64, i64, i64, i64)>,
}

/// Resolve the output grid from probed inputs and the run's options.
///
/// - Projection: `options.target_projection` if set, otherwise the first
///   input's projection (spec §4.2, "absent an explicit override, the
///   output projection is the first input's").
/// - Resolution: `options.xres`/`options.yres` if both set, otherwise the
///   finest (smallest absolute) pixel size seen across inputs already in
///   the output projection; if every input needs reprojection, the first
///   input's native resolution is used as a starting estimate.
/// - Extent: the union of every (possibly reprojected) input's bounds,
///   snapped outward to whole pixels.
/// - Datatype: all inputs must agree, or `options.nodata`/explicit CLI
///   choice aside, this is a metadata error (spec §4.2 edge case).
pub fn resolve_output_grid(
    provider: &dyn RasterProvider,
    inputs: &[ImageInfo],
    options: &Options,
) -> Result<ResolvedGeometry> {
    if inputs.is_empty() {
        return Err(anyhow!("cannot resolve an output grid with zero inputs"));
    }

    let target_projection_wkt = match &options.target_projection {
        Some(TargetProjection::Wkt(wkt)) => wkt.clone(),
        Some(TargetProjection::Epsg(_)) => {
            // EPSG codes are resolved to WKT by the CLI layer before this
            // point reaches geometry; by the time options carry a target
            // projection here it is already WKT. Kept as a variant on
            // `TargetProjection` for symmetry with the CLI's `--outprojepsg`
            // flag.
            return Err(anyhow!(
                "internal: EPSG target projection must be resolved to WKT before geometry resolution"
            ));
        }
        None => inputs[0].grid.projection.clone(),
    };

    let datatype = resolve_datatype(inputs)?;

    let mut needs_reproject = Vec::with_capacity(inputs.len());
    let mut geo_bounds = Vec::with_capacity(inputs.len());
    let mut min_x = f64::INFINITY;
    let mut min_y = f64::INFINITY;
    let mut max_x = f64::NEG_INFINITY;
    let mut max_y = f64::NEG_INFINITY;
    let mut finest_xres: Option<f64> = None;
    let mut finest_yres: Option<f64> = None;

    for info in inputs {
        let needs = info.grid.projection != target_projection_wkt;
        needs_reproject.push(needs);

        let (ix0, iy0, ix1, iy1) = provider
            .transform_bounds(&info.grid, &target_projection_wkt)
            .map_err(|e| anyhow!("failed to resolve bounds for input {}: {e}", info.id))?;
        geo_bounds.push((ix0, iy0, ix1, iy1));
        min_x = min_x.min(ix0);
        min_y = min_y.min(iy0);
        max_x = max_x.max(ix1);
        max_y = max_y.max(iy1);

        if !needs {
            let xres = info.grid.pixel_width().abs();
            let yres = info.grid.pixel_height().abs();
            finest_xres = Some(finest_xres.map_or(xres, |f: f64| f.min(xres)));
            finest_yres = Some(finest_yres.map_or(yres, |f: f64| f.min(yres)));
        }
    }

    let xres = options
        .xres
        .or(finest_xres)
        .unwrap_or_else(|| inputs[0].grid.pixel_width().abs());
    let yres = options
        .yres
        .or(finest_yres)
        .unwrap_or_else(|| inputs[0].grid.pixel_height().abs());

    if xres <= 0.0 || yres <= 0.0 {
        return Err(anyhow!("resolved output resolution must be positive, got ({xres}, {yres})"));
    }

    let width = ((max_x - min_x) / xres).ceil().max(1.0) as u32;
    let height = ((max_y - min_y) / yres).ceil().max(1.0) as u32;

    let nodata = options.nodata.or_else(|| inputs[0].grid.nodata);
    let band_count = inputs[0].grid.band_count;

    let output_grid = GridSpec {
        projection: target_projection_wkt,
        geo_transform: [min_x, xres, 0.0, max_y, 0.0, -yres],
        width,
        height,
        datatype,
        nodata,
        band_count,
    };

    let footprints_px = geo_bounds
        .iter()
        .map(|&(ix0, iy0, ix1, iy1)| {
            let px0 = ((ix0 - output_grid.origin_x()) / xres).floor() as i64;
            let px1 = ((ix1 - output_grid.origin_x()) / xres).ceil() as i64;
            // geo_transform row pitch is negative, so y grows downward in
            // pixel space as geo-y decreases.
            let py0 = ((output_grid.origin_y() - iy1) / yres).floor() as i64;
            let py1 = ((output_grid.origin_y() - iy0) / yres).ceil() as i64;
            (px0, py0, px1, py1)
        })
        .collect();

    Ok(ResolvedGeometry {
        output_grid,
        needs_reproject,
        footprints_px,
    })
}

/// All inputs must share one datatype; this isn't negotiable since the
/// cache and writer are written generically over a single `DataType` per
/// run (spec §3, "uniform pixel type across all inputs").
fn resolve_datatype(inputs: &[ImageInfo]) -> Result<DataType> {
    let first = inputs[0].grid.datatype;
    for info in inputs.iter().skip(1) {
        if info.grid.datatype != first {
            return Err(anyhow!(
                "input {} has datatype {} but input {} has {}; mixed datatypes are not supported",
                inputs[0].id,
                first,
                info.id,
                info.grid.datatype
            ));
        }
    }
    Ok(first)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRaster, InMemoryProvider};
    use crate::types::PixelBuffer;

    fn grid(projection: &str, ox: f64, oy: f64, w: u32, h: u32, xres: f64, yres: f64) -> GridSpec {
        GridSpec {
            projection: projection.to_string(),
            geo_transform: [ox, xres, 0.0, oy, 0.0, -yres],
            width: w,
            height: h,
            datatype: DataType::U8,
            nodata: Some(0.0),
            band_count: 1,
        }
    }

    #[test]
    fn test_resolve_grid_uses_first_projection_and_union_extent() {
        let g1 = grid("EPSG:4326", 0.0, 10.0, 10, 10, 1.0, 1.0);
        let g2 = grid("EPSG:4326", 5.0, 8.0, 10, 10, 1.0, 1.0);

        let r1 = FakeRaster::new(g1.clone(), vec![PixelBuffer::U8(vec![0; 100])]);
        let r2 = FakeRaster::new(g2.clone(), vec![PixelBuffer::U8(vec![0; 100])]);
        let provider = InMemoryProvider::new().with_input("a.tif", r1).with_input("b.tif", r2);

        let inputs = vec![
            ImageInfo { id: 0, path: "a.tif".into(), grid: g1, block_size: (256, 256) },
            ImageInfo { id: 1, path: "b.tif".into(), grid: g2, block_size: (256, 256) },
        ];

        let resolved = resolve_output_grid(&provider, &inputs, &Options::default()).unwrap();
        assert_eq!(resolved.output_grid.projection, "EPSG:4326");
        assert_eq!(resolved.needs_reproject, vec![false, false]);
        // union of x in [0,15), y in [-2,10) at 1.0 res
        assert_eq!(resolved.output_grid.width, 15);
        assert_eq!(resolved.output_grid.height, 12);
    }

    #[test]
    fn test_resolve_grid_rejects_mixed_datatypes() {
        let g1 = grid("EPSG:4326", 0.0, 10.0, 10, 10, 1.0, 1.0);
        let mut g2 = grid("EPSG:4326", 0.0, 10.0, 10, 10, 1.0, 1.0);
        g2.datatype = DataType::F32;

        let r1 = FakeRaster::new(g1.clone(), vec![PixelBuffer::U8(vec![0; 100])]);
        let r2 = FakeRaster::new(g2.clone(), vec![PixelBuffer::F32(vec![0.0; 100])]);
        let provider = InMemoryProvider::new().with_input("a.tif", r1).with_input("b.tif", r2);

        let inputs = vec![
            ImageInfo { id: 0, path: "a.tif".into(), grid: g1, block_size: (256, 256) },
            ImageInfo { id: 1, path: "b.tif".into(), grid: g2, block_size: (256, 256) },
        ];

        assert!(resolve_output_grid(&provider, &inputs, &Options::default()).is_err());
    }

    #[test]
    fn test_resolve_grid_explicit_resolution_override() {
        let g1 = grid("EPSG:4326", 0.0, 10.0, 10, 10, 1.0, 1.0);
        let r1 = FakeRaster::new(g1.clone(), vec![PixelBuffer::U8(vec![0; 100])]);
        let provider = InMemoryProvider::new().with_input("a.tif", r1);
        let inputs = vec![ImageInfo { id: 0, path: "a.tif".into(), grid: g1, block_size: (256, 256) }];

        let mut options = Options::default();
        options.xres = Some(2.0);
        options.yres = Some(2.0);

        let resolved = resolve_output_grid(&provider, &inputs, &options).unwrap();
        assert_eq!(resolved.output_grid.width, 5);
        assert_eq!(resolved.output_grid.height, 5);
    }
}
