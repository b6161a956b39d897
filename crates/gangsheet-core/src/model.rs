use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Axis-aligned rectangle (pixels). `x,y` is top-left; `w,h` are sizes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }
    /// Inclusive right edge coordinate (`x + w - 1`).
    pub fn right(&self) -> u32 {
        self.x + self.w.saturating_sub(1)
    }
    /// Inclusive bottom edge coordinate (`y + h - 1`).
    pub fn bottom(&self) -> u32 {
        self.y + self.h.saturating_sub(1)
    }
    pub fn area(&self) -> u64 {
        (self.w as u64) * (self.h as u64)
    }
}

/// Uniqueness key for a work item: normalized source ref + template variant.
/// Two items sharing a physical image are distinct when their templates differ.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkKey {
    pub source: String,
    pub template: String,
}

impl WorkKey {
    pub fn new(source_ref: &Path, template: &str) -> Self {
        // Canonicalize when the path resolves; fall back to the literal ref
        // so missing files still key consistently (and fail at load time).
        let source = std::fs::canonicalize(source_ref)
            .unwrap_or_else(|_| source_ref.to_path_buf())
            .to_string_lossy()
            .into_owned();
        Self {
            source,
            template: template.to_string(),
        }
    }
}

impl std::fmt::Display for WorkKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.source, self.template)
    }
}

/// One requested design: a source image, its template variant and how many
/// copies the job needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub source_ref: PathBuf,
    pub template_key: String,
    pub repeat_count: u32,
}

impl WorkItem {
    pub fn key(&self) -> WorkKey {
        WorkKey::new(&self.source_ref, &self.template_key)
    }
}

/// Remaining repeat counts by work key, mutated as placements succeed.
/// The packing loop terminates only when every count reaches zero (or the
/// job aborts explicitly).
pub type RemainingWork = HashMap<WorkKey, u32>;

/// A copy of one design placed on a sheet part. Append-only; once the part
/// is exported its placements are immutable history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Placement {
    pub key: WorkKey,
    /// 1-based sheet part index.
    pub part_index: u32,
    pub rect: Rect,
}

/// Logical record of one exported sheet part. The pixel buffer itself is
/// owned by the packing loop and released before this record is produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SheetPartRecord {
    /// 1-based part index.
    pub index: u32,
    pub width_px: u32,
    pub height_px: u32,
    pub placements: Vec<Placement>,
    /// Exported raster file, when the part was written.
    pub file: Option<PathBuf>,
}

/// Point-in-time memory reading. Recomputed on demand, never cached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MemoryStatus {
    /// Resident bytes of this process.
    pub current_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
    /// System-wide usage as a percentage of total.
    pub percent_used: f64,
    /// True while usage sits below the configured safety ceiling.
    pub is_safe: bool,
}

/// The only value a packing job returns to its caller. Partial success
/// (some parts exported, then an abort) is an expected outcome and reports
/// the count already achieved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackingResult {
    pub success: bool,
    pub sheet_parts_created: u32,
    pub error: Option<String>,
    pub recommendation: Option<String>,
    pub parts: Vec<SheetPartRecord>,
}

impl PackingResult {
    pub fn stats(&self) -> JobStats {
        let mut units_placed = 0usize;
        let mut total_area = 0u64;
        let mut used_area = 0u64;
        for part in &self.parts {
            total_area += (part.width_px as u64) * (part.height_px as u64);
            for p in &part.placements {
                units_placed += 1;
                used_area += p.rect.area();
            }
        }
        let occupancy = if total_area > 0 {
            used_area as f64 / total_area as f64
        } else {
            0.0
        };
        JobStats {
            sheet_parts: self.parts.len(),
            units_placed,
            total_area,
            used_area,
            occupancy,
        }
    }
}

/// Packing efficiency summary for logging; advisory only.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct JobStats {
    pub sheet_parts: usize,
    pub units_placed: usize,
    /// Sum of part width × height before cropping.
    pub total_area: u64,
    /// Sum of placement areas.
    pub used_area: u64,
    /// used_area / total_area (0.0 to 1.0). Higher is better.
    pub occupancy: f64,
}

impl JobStats {
    /// Returns a human-readable summary of the statistics.
    pub fn summary(&self) -> String {
        format!(
            "Parts: {}, Units: {}, Occupancy: {:.2}%, Total Area: {} px², Used Area: {} px²",
            self.sheet_parts,
            self.units_placed,
            self.occupancy * 100.0,
            self.total_area,
            self.used_area,
        )
    }
}
