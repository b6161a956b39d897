//! Source canonicalization: DPI resampling driven by the pHYs chunk and
//! rotation to the portrait orientation.

use gangsheet_core::export::write_png_with_dpi;
use gangsheet_core::normalize::normalize_file;
use gangsheet_core::prelude::*;
use image::{Rgba, RgbaImage};
use std::path::Path;

fn job(dpi: u32, rotate: bool) -> JobConfig {
    JobConfig::builder("DTF")
        .printer(100.0, 100.0, dpi)
        .spacing(2.0, 2.0)
        .rotate_to_portrait(rotate)
        .build()
}

fn solid(w: u32, h: u32) -> RgbaImage {
    RgbaImage::from_pixel(w, h, Rgba([255, 0, 0, 255]))
}

#[test]
fn half_working_dpi_doubles_the_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("low.png");
    write_png_with_dpi(&path, &solid(100, 50), 150).unwrap();

    let img = normalize_file(&path, &job(300, false)).unwrap();
    assert_eq!(img.dimensions(), (200, 100));
    assert!((img.source_dpi - 150.0).abs() < 0.5, "got {}", img.source_dpi);
}

#[test]
fn double_working_dpi_halves_the_dimensions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("high.png");
    write_png_with_dpi(&path, &solid(100, 50), 600).unwrap();

    let img = normalize_file(&path, &job(300, false)).unwrap();
    assert_eq!(img.dimensions(), (50, 25));
}

#[test]
fn matching_dpi_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("exact.png");
    write_png_with_dpi(&path, &solid(100, 50), 300).unwrap();

    let img = normalize_file(&path, &job(300, false)).unwrap();
    assert_eq!(img.dimensions(), (100, 50));
}

#[test]
fn deviation_within_one_percent_is_left_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("near.png");
    write_png_with_dpi(&path, &solid(100, 50), 299).unwrap();

    let img = normalize_file(&path, &job(300, false)).unwrap();
    assert_eq!(img.dimensions(), (100, 50));
}

#[test]
fn source_without_phys_assumes_the_working_dpi() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bare.png");
    solid(100, 50).save(&path).unwrap();

    let img = normalize_file(&path, &job(300, false)).unwrap();
    assert_eq!(img.dimensions(), (100, 50));
    assert!((img.source_dpi - 300.0).abs() < f64::EPSILON);
}

#[test]
fn landscape_source_rotates_to_portrait() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.png");
    // Left column red, the rest blue: after a clockwise quarter turn the
    // red column becomes the top row.
    let mut img = RgbaImage::from_pixel(60, 20, Rgba([0, 0, 255, 255]));
    for y in 0..20 {
        img.put_pixel(0, y, Rgba([255, 0, 0, 255]));
    }
    img.save(&path).unwrap();

    let out = normalize_file(&path, &job(300, true)).unwrap();
    assert_eq!(out.dimensions(), (20, 60));
    assert_eq!(out.rgba.get_pixel(5, 0).0, [255, 0, 0, 255]);
    assert_eq!(out.rgba.get_pixel(5, 1).0, [0, 0, 255, 255]);
}

#[test]
fn portrait_source_is_not_rotated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tall.png");
    solid(20, 60).save(&path).unwrap();

    let out = normalize_file(&path, &job(300, true)).unwrap();
    assert_eq!(out.dimensions(), (20, 60));
}

#[test]
fn rotation_can_be_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wide.png");
    solid(60, 20).save(&path).unwrap();

    let out = normalize_file(&path, &job(300, false)).unwrap();
    assert_eq!(out.dimensions(), (60, 20));
}

#[test]
fn missing_file_is_an_unreadable_image_error() {
    let err = normalize_file(Path::new("/nonexistent/x.png"), &job(300, true)).unwrap_err();
    assert!(matches!(err, SheetError::UnreadableImage { .. }));
}
