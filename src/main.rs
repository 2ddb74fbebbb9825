//! CLI entry point for `mosaic`.
//!
//! Parses flags into an [`Options`], resolves an input-list file into the
//! ordered input paths (order is mosaic priority), runs the job, and maps
//! the resulting error category to the process exit code documented in
//! `MosaicError::exit_code`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;

use mosaic::config::{parse_creation_options, parse_input_list, Options, ResamplingMethod, TargetProjection};
use mosaic::driver::do_mosaic;
use mosaic::error::MosaicError;
use mosaic::provider::gdal_provider::GdalRasterProvider;

#[derive(Parser, Debug)]
#[command(name = "mosaic", about = "Concurrent block-level mosaicking of overlapping georeferenced rasters")]
struct Args {
    /// File listing input rasters, one path per line, in mosaic priority
    /// order (earliest wins ties). Blank lines and `#` comments are ignored.
    #[arg(short = 'i', long = "input-list")]
    input_list: PathBuf,

    /// Output raster path.
    #[arg(short = 'o', long = "output")]
    output: PathBuf,

    /// Output working block size.
    #[arg(long = "block-size", default_value = "1024")]
    block_size: u32,

    /// GDAL output driver short name.
    #[arg(long = "driver", default_value = "GTiff")]
    driver: String,

    /// Driver creation option, `KEY=VALUE`. May be repeated.
    #[arg(long = "co")]
    creation_options: Vec<String>,

    /// Override the output nodata value (defaults to the first input's).
    #[arg(long = "nodata")]
    nodata: Option<f64>,

    /// Write a JSON record of phase timings and per-worker counters here.
    #[arg(long = "monitor-json")]
    monitor_json: Option<PathBuf>,

    /// Reproject the output into this EPSG code instead of the first
    /// input's projection.
    #[arg(long = "outprojepsg")]
    out_proj_epsg: Option<u32>,

    /// Reproject the output into the WKT projection read from this file.
    #[arg(long = "outprojwktfile")]
    out_proj_wkt_file: Option<PathBuf>,

    /// Output pixel width. Must be given together with `--yres`.
    #[arg(long = "xres")]
    xres: Option<f64>,

    /// Output pixel height (as a positive magnitude). Must be given
    /// together with `--xres`.
    #[arg(long = "yres")]
    yres: Option<f64>,

    /// Resampling method used when reprojecting an input into the output
    /// grid: near, bilinear, cubic, cubicspline, lanczos, average, mode.
    #[arg(short = 'r', long = "resampling", default_value = "near")]
    resampling: String,

    /// Number of read worker threads. Defaults to the host's available
    /// parallelism.
    #[arg(short = 'j', long = "num-threads")]
    num_threads: Option<usize>,

    /// Block cache look-ahead window. Defaults to `max(2, num-threads)`.
    #[arg(long = "look-ahead-window")]
    look_ahead_window: Option<usize>,

    /// Per-thread open-handle LRU size.
    #[arg(long = "handle-cache-size", default_value = "8")]
    handle_cache_size: usize,
}

fn build_options(args: &Args) -> Result<(Options, Vec<String>)> {
    if args.xres.is_some() != args.yres.is_some() {
        bail!(MosaicError::Usage("--xres and --yres must be given together".to_string()));
    }
    if args.out_proj_epsg.is_some() && args.out_proj_wkt_file.is_some() {
        bail!(MosaicError::Usage(
            "--outprojepsg and --outprojwktfile are mutually exclusive".to_string()
        ));
    }

    let resampling = ResamplingMethod::from_str_opt(&args.resampling)
        .ok_or_else(|| MosaicError::Usage(format!("unknown resampling method: {}", args.resampling)))?;

    let target_projection = if let Some(epsg) = args.out_proj_epsg {
        Some(TargetProjection::Epsg(epsg))
    } else if let Some(path) = &args.out_proj_wkt_file {
        let wkt = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read WKT projection file: {}", path.display()))?;
        Some(TargetProjection::Wkt(wkt.trim().to_string()))
    } else {
        None
    };

    let creation_options = parse_creation_options(&args.creation_options)
        .map_err(|e| MosaicError::Usage(e.to_string()))?;

    let input_paths = parse_input_list(&args.input_list)
        .map_err(|e| MosaicError::Usage(e.to_string()))?
        .into_iter()
        .map(|p| p.to_string_lossy().into_owned())
        .collect();

    let num_threads = args.num_threads.unwrap_or_else(num_cpus::get).max(1);

    let options = Options {
        num_threads,
        block_size: args.block_size,
        driver: args.driver.clone(),
        creation_options,
        nodata: args.nodata,
        monitor_json: args.monitor_json.clone(),
        target_projection,
        xres: args.xres,
        yres: args.yres,
        resampling,
        look_ahead_window: args.look_ahead_window,
        handle_cache_size: args.handle_cache_size,
    };

    Ok((options, input_paths))
}

/// Resolve a `--outprojepsg` code to WKT. The rest of the crate only ever
/// sees `TargetProjection::Wkt` (spec §4.2); the CLI is where an EPSG code
/// is translated, since that's a GDAL SRS lookup and the geometry module is
/// deliberately provider-agnostic about anything beyond WKT strings.
fn resolve_epsg_to_wkt(options: &mut Options) -> Result<()> {
    if let Some(TargetProjection::Epsg(code)) = &options.target_projection {
        let srs = gdal::spatial_ref::SpatialRef::from_epsg(*code)
            .with_context(|| format!("unknown EPSG code: {code}"))?;
        let wkt = srs.to_wkt().context("failed to convert EPSG code to WKT")?;
        options.target_projection = Some(TargetProjection::Wkt(wkt));
    }
    Ok(())
}

fn run() -> Result<()> {
    let args = Args::parse();
    let (mut options, input_paths) = build_options(&args)?;
    resolve_epsg_to_wkt(&mut options)?;

    let provider = Arc::new(GdalRasterProvider::new());
    do_mosaic(&options, &input_paths, &args.output, provider)?;
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mosaic: {e:#}");
            let code = e
                .downcast_ref::<MosaicError>()
                .map(MosaicError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code as u8)
        }
    }
}
