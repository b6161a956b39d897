use crate::model::{RemainingWork, WorkItem, WorkKey};
use std::collections::HashSet;
use tracing::debug;

/// Estimates the minimal canvas able to hold the remaining work, trading
/// layout efficiency for memory savings.
///
/// Samples up to `samples` distinct referenced images for per-item footprint
/// (dimensions + spacing), sums footprint × remaining count with `slack`
/// applied, and derives a square-ish canvas clamped per axis to
/// `[largest single item + 2×spacing, printer max]`. Output is advisory:
/// the shelf packer still spills overflow onto additional parts when the
/// estimate under-sizes the canvas.
///
/// Any estimation failure (no readable sample, empty work list) falls back
/// to the printer max dimensions.
pub fn estimate_canvas<F>(
    items: &[WorkItem],
    remaining: &RemainingWork,
    spacing: (u32, u32),
    printer_max: (u32, u32),
    slack: f64,
    samples: usize,
    mut dims_of: F,
) -> (u32, u32)
where
    F: FnMut(&WorkItem) -> Option<(u32, u32)>,
{
    let (sx, sy) = spacing;
    let (max_w, max_h) = printer_max;

    // Sample a handful of distinct pending items. The list may repeat a
    // key; its remaining count is shared and must be counted once.
    let mut seen: HashSet<WorkKey> = HashSet::new();
    let mut sampled: Vec<((u32, u32), u32)> = Vec::new();
    let mut pending_units = 0u64;
    let mut sampled_units = 0u64;
    for item in items {
        let key = item.key();
        if !seen.insert(key.clone()) {
            continue;
        }
        let rem = remaining.get(&key).copied().unwrap_or(0);
        if rem == 0 {
            continue;
        }
        pending_units += rem as u64;
        if sampled.len() < samples.max(1) {
            if let Some(dims) = dims_of(item) {
                sampled.push((dims, rem));
                sampled_units += rem as u64;
            }
        }
    }
    if sampled.is_empty() || pending_units == 0 {
        debug!("no usable samples, falling back to printer max");
        return (max_w, max_h);
    }

    // Footprint = (w + spacing) × (h + spacing); unsampled items use the
    // average sampled footprint.
    let mut sampled_area = 0u64;
    let mut largest_w = 0u32;
    let mut largest_h = 0u32;
    for ((w, h), rem) in &sampled {
        let fp = ((w + sx) as u64) * ((h + sy) as u64);
        sampled_area += fp * (*rem as u64);
        largest_w = largest_w.max(*w);
        largest_h = largest_h.max(*h);
    }
    let avg_footprint = sampled_area as f64 / sampled_units as f64;
    let total_area = sampled_area as f64 + avg_footprint * (pending_units - sampled_units) as f64;

    let side = (total_area * slack).sqrt().ceil() as u32;
    let floor_w = largest_w.saturating_add(sx.saturating_mul(2));
    let floor_h = largest_h.saturating_add(sy.saturating_mul(2));
    let w = side.max(floor_w).min(max_w);
    let h = side.max(floor_h).min(max_h);
    debug!(
        pending_units,
        sampled = sampled.len(),
        estimate = format!("{}x{}", w, h),
        printer_max = format!("{}x{}", max_w, max_h),
        "estimated canvas size"
    );
    (w, h)
}
