//! Configuration and defaults for the mosaic job.
//!
//! Mirrors the CLI's option set one-to-one (spec §6): an `Options` value is
//! built once from parsed CLI args (or directly, for the programmatic
//! entry point) and passed down, immutable, to every phase.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;

/// Resampling algorithm used when reprojecting an input into the output
/// grid. Names match GDAL's `-r` resampling method vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResamplingMethod {
    NearestNeighbor,
    Bilinear,
    Cubic,
    CubicSpline,
    Lanczos,
    Average,
    Mode,
}

impl ResamplingMethod {
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "near" | "nearest" | "nearestneighbor" => Some(ResamplingMethod::NearestNeighbor),
            "bilinear" => Some(ResamplingMethod::Bilinear),
            "cubic" => Some(ResamplingMethod::Cubic),
            "cubicspline" => Some(ResamplingMethod::CubicSpline),
            "lanczos" => Some(ResamplingMethod::Lanczos),
            "average" => Some(ResamplingMethod::Average),
            "mode" => Some(ResamplingMethod::Mode),
            _ => None,
        }
    }
}

impl Default for ResamplingMethod {
    fn default() -> Self {
        ResamplingMethod::NearestNeighbor
    }
}

/// Where the output projection comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetProjection {
    /// `--outprojepsg`
    Epsg(u32),
    /// `--outprojwktfile`, contents read eagerly.
    Wkt(String),
}

/// Fully validated, immutable run configuration. Built once in `main` (or
/// directly by a programmatic caller) and shared read-only from then on.
/// `Serialize` so the monitor JSON record (spec §6) can echo it verbatim.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Options {
    /// Number of read worker threads (N in the spec).
    pub num_threads: usize,
    /// Output working block size B (default 1024).
    pub block_size: u32,
    /// Output GDAL driver short name (e.g. "GTiff").
    pub driver: String,
    /// Driver-specific creation options, opaque ordered K=V pairs.
    pub creation_options: Vec<(String, String)>,
    /// Override for the output nodata sentinel.
    pub nodata: Option<f64>,
    /// Where to write the monitor JSON record, if requested.
    pub monitor_json: Option<PathBuf>,
    /// Output projection override; unset means "first input's projection".
    pub target_projection: Option<TargetProjection>,
    pub xres: Option<f64>,
    pub yres: Option<f64>,
    pub resampling: ResamplingMethod,
    /// Look-ahead window for the block cache; `None` means "derive from
    /// num_threads", per spec §4.5 (`max(2, N)`).
    pub look_ahead_window: Option<usize>,
    /// Per-thread open-handle LRU size (K in the spec, default 8).
    pub handle_cache_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            num_threads: 4,
            block_size: 1024,
            driver: "GTiff".to_string(),
            creation_options: Vec::new(),
            nodata: None,
            monitor_json: None,
            target_projection: None,
            xres: None,
            yres: None,
            resampling: ResamplingMethod::default(),
            look_ahead_window: None,
            handle_cache_size: 8,
        }
    }
}

impl Options {
    /// `W_LA` per spec §4.5: `max(2, N)` unless explicitly overridden.
    pub fn effective_look_ahead_window(&self) -> usize {
        self.look_ahead_window.unwrap_or(self.num_threads).max(2)
    }
}

/// Read an input-list file: one path per line, blank lines and
/// `#`-prefixed lines ignored, order preserved (order defines mosaic
/// priority).
pub fn parse_input_list(path: &Path) -> Result<Vec<PathBuf>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read input list: {}", path.display()))?;

    let mut inputs = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        inputs.push(PathBuf::from(trimmed));
    }

    if inputs.is_empty() {
        bail!("input list {} contains no usable paths", path.display());
    }

    Ok(inputs)
}

/// Parse `--co K=V` repeated flags into an ordered list of pairs.
pub fn parse_creation_options(raw: &[String]) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::with_capacity(raw.len());
    for entry in raw {
        let (k, v) = entry
            .split_once('=')
            .with_context(|| format!("creation option '{entry}' is not in K=V form"))?;
        if k.is_empty() {
            bail!("creation option '{entry}' has an empty key");
        }
        pairs.push((k.to_string(), v.to_string()));
    }
    Ok(pairs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.num_threads, 4);
        assert_eq!(opts.block_size, 1024);
        assert_eq!(opts.driver, "GTiff");
        assert_eq!(opts.resampling, ResamplingMethod::NearestNeighbor);
        assert_eq!(opts.handle_cache_size, 8);
    }

    #[test]
    fn test_resampling_parsing() {
        assert_eq!(
            ResamplingMethod::from_str_opt("near"),
            Some(ResamplingMethod::NearestNeighbor)
        );
        assert_eq!(
            ResamplingMethod::from_str_opt("CUBIC"),
            Some(ResamplingMethod::Cubic)
        );
        assert_eq!(ResamplingMethod::from_str_opt("bogus"), None);
    }

    #[test]
    fn test_look_ahead_window_default_floors_at_two() {
        let mut opts = Options::default();
        opts.num_threads = 1;
        assert_eq!(opts.effective_look_ahead_window(), 2);

        opts.num_threads = 6;
        assert_eq!(opts.effective_look_ahead_window(), 6);
    }

    #[test]
    fn test_look_ahead_window_explicit_override() {
        let mut opts = Options::default();
        opts.num_threads = 4;
        opts.look_ahead_window = Some(10);
        assert_eq!(opts.effective_look_ahead_window(), 10);
    }

    #[test]
    fn test_parse_input_list_skips_blanks_and_comments() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# a comment").unwrap();
        writeln!(file, "a.tif").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "  b.tif  ").unwrap();
        writeln!(file, "# trailing comment").unwrap();
        file.flush().unwrap();

        let inputs = parse_input_list(file.path()).unwrap();
        assert_eq!(inputs, vec![PathBuf::from("a.tif"), PathBuf::from("b.tif")]);
    }

    #[test]
    fn test_parse_input_list_empty_is_error() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(parse_input_list(file.path()).is_err());
    }

    #[test]
    fn test_parse_creation_options() {
        let raw = vec!["COMPRESS=LZW".to_string(), "TILED=YES".to_string()];
        let pairs = parse_creation_options(&raw).unwrap();
        assert_eq!(
            pairs,
            vec![
                ("COMPRESS".to_string(), "LZW".to_string()),
                ("TILED".to_string(), "YES".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_creation_options_rejects_malformed() {
        let raw = vec!["NOVALUE".to_string()];
        assert!(parse_creation_options(&raw).is_err());
    }
}
