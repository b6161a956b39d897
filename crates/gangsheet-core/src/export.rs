use crate::canvas::SheetCanvas;
use crate::config::{EngineConfig, JobConfig};
use crate::error::{Result, SheetError};
use crate::model::{Placement, Rect, SheetPartRecord};
use crate::normalize::dpi_to_ppm;
use image::RgbaImage;
use image::imageops::{self, FilterType};
use serde_json::json;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Bounding box of pixels with non-zero alpha, or None for an entirely
/// transparent buffer.
pub fn bounding_box(bytes: &[u8], width: u32, height: u32) -> Option<Rect> {
    let stride = (width as usize) * 4;
    let mut x1 = u32::MAX;
    let mut y1 = u32::MAX;
    let mut x2 = 0u32;
    let mut y2 = 0u32;
    let mut any = false;
    for y in 0..height {
        let row = &bytes[(y as usize) * stride..(y as usize + 1) * stride];
        for x in 0..width {
            if row[(x as usize) * 4 + 3] > 0 {
                any = true;
                x1 = x1.min(x);
                y1 = y1.min(y);
                x2 = x2.max(x);
                y2 = y2.max(y);
            }
        }
    }
    if !any {
        return None;
    }
    Some(Rect::new(x1, y1, x2 - x1 + 1, y2 - y1 + 1))
}

/// Grows `r` by `margin` on every side, clipped to `width`×`height`.
pub fn with_margin(r: Rect, margin: u32, width: u32, height: u32) -> Rect {
    let x = r.x.saturating_sub(margin);
    let y = r.y.saturating_sub(margin);
    let right = (r.x + r.w).saturating_add(margin).min(width);
    let bottom = (r.y + r.h).saturating_add(margin).min(height);
    Rect::new(x, y, right - x, bottom - y)
}

/// Crops a finished sheet part to its content, rescales to the target DPI
/// and writes the raster plus (optionally) a layer manifest.
///
/// Returns `Ok(None)` for an entirely transparent part, which is discarded
/// with a warning and does not count toward the job's part total. The caller
/// releases the canvas; this function only reads it.
pub fn export_part(
    canvas: &SheetCanvas,
    placements: &[Placement],
    part_no: u32,
    job: &JobConfig,
    engine: &EngineConfig,
    out_dir: &Path,
) -> Result<Option<SheetPartRecord>> {
    let (cw, ch) = canvas.dimensions();
    let bytes = canvas
        .bytes()
        .map_err(|e| SheetError::Export(e.to_string()))?;
    let Some(content) = bounding_box(bytes, cw, ch) else {
        warn!(part_no, "sheet part is entirely transparent, discarding");
        return Ok(None);
    };
    let crop = with_margin(content, engine.crop_margin_px, cw, ch);

    let mut cropped = RgbaImage::new(crop.w, crop.h);
    let stride = (cw as usize) * 4;
    let row_bytes = (crop.w as usize) * 4;
    for row in 0..crop.h as usize {
        let s = (crop.y as usize + row) * stride + (crop.x as usize) * 4;
        let d = row * row_bytes;
        cropped.as_mut()[d..d + row_bytes].copy_from_slice(&bytes[s..s + row_bytes]);
    }

    let working = job.working_dpi() as f64;
    let target = job.target_dpi() as f64;
    let scale = target / working;
    let out_img = if (scale - 1.0).abs() > f64::EPSILON {
        let nw = ((crop.w as f64) * scale).round().max(1.0) as u32;
        let nh = ((crop.h as f64) * scale).round().max(1.0) as u32;
        imageops::resize(&cropped, nw, nh, FilterType::CatmullRom)
    } else {
        cropped
    };

    let stem = format!(
        "{} {} {} part {}",
        job.job_prefix, job.template_key, job.label, part_no
    );
    let raster_path = out_dir.join(format!("{}.png", stem));
    write_png_with_dpi(&raster_path, &out_img, job.target_dpi())?;
    info!(
        part_no,
        file = %raster_path.display(),
        size = format!("{}x{}", out_img.width(), out_img.height()),
        placements = placements.len(),
        "exported sheet part"
    );

    if job.write_manifest {
        let manifest_path = out_dir.join(format!("{}.json", stem));
        write_manifest(&manifest_path, placements, crop, scale, &out_img, job)?;
    }

    Ok(Some(SheetPartRecord {
        index: part_no,
        width_px: cw,
        height_px: ch,
        placements: placements.to_vec(),
        file: Some(raster_path),
    }))
}

/// Encodes RGBA8 as PNG with the DPI embedded in a pHYs chunk.
pub fn write_png_with_dpi(path: &Path, img: &RgbaImage, dpi: u32) -> Result<()> {
    let export = |e: String| SheetError::Export(format!("{}: {}", path.display(), e));
    let file = File::create(path).map_err(|e| export(e.to_string()))?;
    let mut enc = png::Encoder::new(BufWriter::new(file), img.width(), img.height());
    enc.set_color(png::ColorType::Rgba);
    enc.set_depth(png::BitDepth::Eight);
    let ppm = dpi_to_ppm(dpi);
    enc.set_pixel_dims(Some(png::PixelDimensions {
        xppu: ppm,
        yppu: ppm,
        unit: png::Unit::Meter,
    }));
    let mut writer = enc.write_header().map_err(|e| export(e.to_string()))?;
    writer
        .write_image_data(img.as_raw())
        .map_err(|e| export(e.to_string()))?;
    Ok(())
}

/// Per-placement layer manifest, with rects mapped through the crop/scale
/// transform so they index into the exported raster.
fn write_manifest(
    path: &PathBuf,
    placements: &[Placement],
    crop: Rect,
    scale: f64,
    out_img: &RgbaImage,
    job: &JobConfig,
) -> Result<()> {
    let layers: Vec<serde_json::Value> = placements
        .iter()
        .map(|p| {
            let x = (((p.rect.x as i64 - crop.x as i64) as f64) * scale).round().max(0.0) as u32;
            let y = (((p.rect.y as i64 - crop.y as i64) as f64) * scale).round().max(0.0) as u32;
            let w = ((p.rect.w as f64) * scale).round() as u32;
            let h = ((p.rect.h as f64) * scale).round() as u32;
            let name = Path::new(&p.key.source)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.key.source.clone());
            json!({
                "name": format!("{} {}", name, p.key.template),
                "source": p.key.source,
                "template": p.key.template,
                "frame": {"x": x, "y": y, "w": w, "h": h},
            })
        })
        .collect();
    let value = json!({
        "part": placements.first().map(|p| p.part_index).unwrap_or(0),
        "width": out_img.width(),
        "height": out_img.height(),
        "dpi": job.target_dpi(),
        "template": job.template_key,
        "layers": layers,
    });
    let text = serde_json::to_string_pretty(&value)
        .map_err(|e| SheetError::Export(e.to_string()))?;
    std::fs::write(path, text).map_err(|e| SheetError::Export(e.to_string()))?;
    Ok(())
}
