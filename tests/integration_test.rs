use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// CLI-level checks that don't need a real GDAL raster on disk: usage
/// validation happens before any I/O provider is touched, so these are
/// exercised purely through exit codes and stderr.

#[test]
fn test_missing_input_list_is_usage_error() {
    let mut cmd = Command::cargo_bin("mosaic").unwrap();
    cmd.arg("-i")
        .arg("/nonexistent/input-list.txt")
        .arg("-o")
        .arg("/tmp/mosaic-test-out.tif")
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_empty_input_list_is_usage_error() {
    let list = tempfile::NamedTempFile::new().unwrap();
    let mut cmd = Command::cargo_bin("mosaic").unwrap();
    cmd.arg("-i")
        .arg(list.path())
        .arg("-o")
        .arg("/tmp/mosaic-test-out.tif")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("usage error"));
}

#[test]
fn test_unknown_resampling_method_is_usage_error() {
    let mut list = tempfile::NamedTempFile::new().unwrap();
    writeln!(list, "a.tif").unwrap();
    list.flush().unwrap();

    let mut cmd = Command::cargo_bin("mosaic").unwrap();
    cmd.arg("-i")
        .arg(list.path())
        .arg("-o")
        .arg("/tmp/mosaic-test-out.tif")
        .arg("-r")
        .arg("not-a-real-method")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown resampling method"));
}

#[test]
fn test_mutually_exclusive_projection_flags_is_usage_error() {
    let mut list = tempfile::NamedTempFile::new().unwrap();
    writeln!(list, "a.tif").unwrap();
    list.flush().unwrap();

    let wkt_file = tempfile::NamedTempFile::new().unwrap();

    let mut cmd = Command::cargo_bin("mosaic").unwrap();
    cmd.arg("-i")
        .arg(list.path())
        .arg("-o")
        .arg("/tmp/mosaic-test-out.tif")
        .arg("--outprojepsg")
        .arg("4326")
        .arg("--outprojwktfile")
        .arg(wkt_file.path())
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("mutually exclusive"));
}

#[test]
fn test_xres_without_yres_is_usage_error() {
    let mut list = tempfile::NamedTempFile::new().unwrap();
    writeln!(list, "a.tif").unwrap();
    list.flush().unwrap();

    let mut cmd = Command::cargo_bin("mosaic").unwrap();
    cmd.arg("-i")
        .arg(list.path())
        .arg("-o")
        .arg("/tmp/mosaic-test-out.tif")
        .arg("--xres")
        .arg("10.0")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("--xres and --yres"));
}
