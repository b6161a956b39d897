use crate::config::JobConfig;
use crate::error::{Result, SheetError};
use crate::model::{WorkItem, WorkKey};
use image::imageops::FilterType;
use image::{ImageReader, RgbaImage, imageops};
use rayon::prelude::*;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, trace, warn};

/// How far an embedded DPI may deviate from the working DPI before the
/// image is resampled (1%).
const DPI_TOLERANCE: f64 = 0.01;

/// A source raster canonicalized for placement: RGBA8, rotated to the
/// canonical orientation, resampled to the working DPI.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub rgba: RgbaImage,
    /// DPI the source declared before normalization.
    pub source_dpi: f64,
}

impl NormalizedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.rgba.dimensions()
    }
}

/// Loads and canonicalizes one source raster.
///
/// A corrupt or missing file yields `SheetError::UnreadableImage`; callers
/// skip that work item rather than abort the job. The only side effect is
/// reading the source file.
pub fn normalize_file(path: &Path, job: &JobConfig) -> Result<NormalizedImage> {
    let unreadable = |reason: String| SheetError::UnreadableImage {
        path: path.to_path_buf(),
        reason,
    };
    let decoded = ImageReader::open(path)
        .map_err(|e| unreadable(e.to_string()))?
        .decode()
        .map_err(|e| unreadable(e.to_string()))?;
    let mut rgba = decoded.to_rgba8();

    let working = job.working_dpi() as f64;
    let source_dpi = read_png_dpi(path).unwrap_or(working);
    let ratio = working / source_dpi;
    if (ratio - 1.0).abs() > DPI_TOLERANCE {
        let (w, h) = rgba.dimensions();
        let nw = ((w as f64) * ratio).round().max(1.0) as u32;
        let nh = ((h as f64) * ratio).round().max(1.0) as u32;
        // Cubic when upscaling, area-averaging when downscaling.
        let filter = if ratio > 1.0 {
            FilterType::CatmullRom
        } else {
            FilterType::Triangle
        };
        debug!(
            path = %path.display(),
            source_dpi,
            working,
            from = format!("{}x{}", w, h),
            to = format!("{}x{}", nw, nh),
            "resampling to working DPI"
        );
        rgba = imageops::resize(&rgba, nw, nh, filter);
    }

    if job.rotate_to_portrait {
        let (w, h) = rgba.dimensions();
        if w > h {
            trace!(path = %path.display(), "rotating to portrait");
            rgba = imageops::rotate90(&rgba);
        }
    }

    Ok(NormalizedImage { rgba, source_dpi })
}

/// Reads the DPI a PNG declares in its pHYs chunk. Returns None for non-PNG
/// sources, missing chunks, or aspect-only (unitless) dimensions.
pub fn read_png_dpi(path: &Path) -> Option<f64> {
    if !path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("png"))
        .unwrap_or(false)
    {
        return None;
    }
    let file = File::open(path).ok()?;
    let decoder = png::Decoder::new(BufReader::new(file));
    let reader = decoder.read_info().ok()?;
    let dims = reader.info().pixel_dims?;
    match dims.unit {
        png::Unit::Meter => Some(dims.xppu as f64 * 0.0254),
        png::Unit::Unspecified => None,
    }
}

/// Pixels-per-meter for a DPI, for writing pHYs chunks.
pub fn dpi_to_ppm(dpi: u32) -> u32 {
    ((dpi as f64) / 0.0254).round() as u32
}

/// Normalizes the initial work list on a bounded worker pool.
///
/// Results come back ordered by input index; per-item failures are carried
/// as `Err` entries so the caller can skip them individually.
pub fn normalize_batch(
    items: &[WorkItem],
    job: &JobConfig,
    workers: usize,
) -> Result<Vec<(WorkKey, Result<NormalizedImage>)>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|e| SheetError::InputValidation(format!("worker pool: {}", e)))?;
    let out = pool.install(|| {
        items
            .par_iter()
            .map(|item| (item.key(), normalize_file(&item.source_ref, job)))
            .collect::<Vec<_>>()
    });
    Ok(out)
}

/// Bounded LRU cache of normalized images keyed by work key.
///
/// Misses re-normalize from disk, so the whole cache may be dropped under
/// memory pressure without losing work. Items whose remaining quantity hits
/// zero are evicted immediately by the packing loop.
pub struct ImageCache {
    capacity: usize,
    map: std::collections::HashMap<WorkKey, NormalizedImage>,
    // Recency order, least recent first.
    order: Vec<WorkKey>,
}

impl ImageCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            map: std::collections::HashMap::new(),
            order: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    fn touch(&mut self, key: &WorkKey) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos);
            self.order.push(k);
        }
    }

    pub fn insert(&mut self, key: WorkKey, img: NormalizedImage) {
        if self.map.insert(key.clone(), img).is_none() {
            self.order.push(key);
        } else {
            self.touch(&key);
        }
        while self.map.len() > self.capacity {
            let oldest = self.order.remove(0);
            self.map.remove(&oldest);
            trace!(key = %oldest, "cache capacity eviction");
        }
    }

    /// Returns the cached image, re-normalizing from disk on a miss.
    pub fn get_or_load(
        &mut self,
        key: &WorkKey,
        item: &WorkItem,
        job: &JobConfig,
    ) -> Result<&NormalizedImage> {
        if !self.map.contains_key(key) {
            let img = normalize_file(&item.source_ref, job)?;
            self.insert(key.clone(), img);
        } else {
            self.touch(key);
        }
        // Present after the insert above.
        self.map
            .get(key)
            .ok_or_else(|| SheetError::Canvas("cache entry vanished".into()))
    }

    pub fn evict(&mut self, key: &WorkKey) {
        if self.map.remove(key).is_some() {
            self.order.retain(|k| k != key);
        }
    }

    /// Drops every entry. Used as the forced-reclamation hook under memory
    /// pressure; subsequent lookups reload from disk.
    pub fn clear(&mut self) {
        if !self.map.is_empty() {
            warn!(entries = self.map.len(), "clearing normalized-image cache");
        }
        self.map.clear();
        self.order.clear();
    }
}
