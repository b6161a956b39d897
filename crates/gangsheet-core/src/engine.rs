use crate::canvas::SheetCanvas;
use crate::config::{EngineConfig, JobConfig};
use crate::error::{Result, SheetError};
use crate::estimate::estimate_canvas;
use crate::export::export_part;
use crate::memory::{MemoryGovernor, MemoryProbe};
use crate::model::{PackingResult, Placement, Rect, RemainingWork, WorkItem, WorkKey};
use crate::normalize::{ImageCache, normalize_batch};
use crate::shelf::{ShelfCursor, ShelfFit};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, error, info, instrument, warn};

/// Builds the job's work list from the caller-supplied ordered lists.
///
/// All lists must be equal length; unequal lengths are a hard validation
/// error before any processing begins. `totals` defaults each count to 1.
pub fn build_work_items(
    titles: &[String],
    sizes: &[String],
    totals: Option<&[u32]>,
) -> Result<Vec<WorkItem>> {
    if titles.len() != sizes.len() {
        return Err(SheetError::InputValidation(format!(
            "titles ({}) and sizes ({}) differ in length",
            titles.len(),
            sizes.len()
        )));
    }
    if let Some(t) = totals {
        if t.len() != titles.len() {
            return Err(SheetError::InputValidation(format!(
                "totals ({}) and titles ({}) differ in length",
                t.len(),
                titles.len()
            )));
        }
    }
    if titles.is_empty() {
        return Err(SheetError::InputValidation("empty work list".into()));
    }
    Ok(titles
        .iter()
        .zip(sizes.iter())
        .enumerate()
        .map(|(i, (title, size))| WorkItem {
            source_ref: title.into(),
            template_key: size.clone(),
            repeat_count: totals.map(|t| t[i]).unwrap_or(1),
        })
        .collect())
}

/// One packing job: owns the governor, cancellation flag and configuration;
/// `run` consumes a work list and produces exactly one [`PackingResult`].
pub struct PackEngine {
    job: JobConfig,
    engine: EngineConfig,
    governor: MemoryGovernor,
    cancel: Arc<AtomicBool>,
}

impl PackEngine {
    pub fn new(job: JobConfig, engine: EngineConfig) -> Result<Self> {
        job.validate()?;
        engine.validate()?;
        let governor = MemoryGovernor::new(engine.memory_ceiling_pct);
        Ok(Self {
            job,
            engine,
            governor,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// As [`PackEngine::new`] with an injected memory probe (tests, embedders).
    pub fn with_probe(
        job: JobConfig,
        engine: EngineConfig,
        probe: Box<dyn MemoryProbe>,
    ) -> Result<Self> {
        job.validate()?;
        engine.validate()?;
        let governor = MemoryGovernor::with_probe(probe, engine.memory_ceiling_pct);
        Ok(Self {
            job,
            engine,
            governor,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Job-level cancellation flag, checked at each sheet-part start.
    /// Cancellation is only meaningful between parts, never mid-operation.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Runs the packing loop until the work list is exhausted, the governor
    /// vetoes further work, or the iteration safety valve trips.
    ///
    /// Partial success (some parts exported, then an abort) is an expected
    /// outcome: the result reports the count already achieved. Only input
    /// validation fails with `Err`; memory and logic aborts come back as
    /// `PackingResult { success: false, .. }`.
    #[instrument(skip_all, fields(template = %self.job.template_key))]
    pub fn run(&mut self, items: Vec<WorkItem>, out_dir: &Path) -> Result<PackingResult> {
        if items.is_empty() {
            return Err(SheetError::InputValidation("empty work list".into()));
        }
        std::fs::create_dir_all(out_dir)?;

        let keys: Vec<WorkKey> = items.iter().map(WorkItem::key).collect();
        let mut remaining: RemainingWork = RemainingWork::new();
        for (item, key) in items.iter().zip(&keys) {
            *remaining.entry(key.clone()).or_insert(0) += item.repeat_count;
        }

        let mut cache = ImageCache::new(self.engine.cache_capacity);
        self.warm_cache(&items, &keys, &mut remaining, &mut cache)?;

        let distinct = remaining.values().filter(|&&v| v > 0).count();
        // Safety valve: a correct loop never needs more parts than this.
        let max_parts = 2 * distinct.max(1) + 8;
        let mut parts_opened = 0usize;
        let mut parts = Vec::new();
        let mut resume_idx = 0usize;
        let mut force_max = !self.engine.dynamic_sizing;
        let (max_w, max_h) = self.job.max_canvas_px();
        let (sx, sy) = self.job.spacing_px();

        let mut abort: Option<(String, Option<String>)> = None;

        while remaining.values().map(|&v| v as u64).sum::<u64>() > 0 {
            if self.cancel.load(Ordering::Relaxed) {
                warn!("job cancelled between sheet parts");
                abort = Some(("job cancelled".into(), None));
                break;
            }
            parts_opened += 1;
            if parts_opened > max_parts {
                let e = SheetError::PackingLogic(format!(
                    "opened {} sheet parts for {} distinct items without draining the work list",
                    parts_opened, distinct
                ));
                error!(error = %e, "iteration safety valve tripped; this is a bug, not legitimate work");
                abort = Some((e.to_string(), None));
                break;
            }

            let (cw, ch) = if force_max {
                (max_w, max_h)
            } else {
                let job = &self.job;
                estimate_canvas(
                    &items,
                    &remaining,
                    (sx, sy),
                    (max_w, max_h),
                    self.engine.estimate_slack,
                    self.engine.estimate_samples,
                    |item| {
                        cache
                            .get_or_load(&item.key(), item, job)
                            .ok()
                            .map(|img| img.dimensions())
                    },
                )
            };

            let needed = SheetCanvas::byte_len(cw, ch);
            if let Err(e) = self.governor.admit_or_abort(needed, &mut || cache.clear()) {
                let rec = match &e {
                    SheetError::InsufficientMemory { recommendation, .. } => {
                        Some(recommendation.clone())
                    }
                    _ => None,
                };
                abort = Some((e.to_string(), rec));
                break;
            }

            let mut canvas = SheetCanvas::allocate(cw, ch, &self.engine)?;
            let mut cursor = ShelfCursor::new(cw, ch, sx, sy);
            let part_no = parts.len() as u32 + 1;
            let mut placements: Vec<Placement> = Vec::new();
            let mut part_full = false;
            debug!(part_no, canvas = format!("{}x{}", cw, ch), "packing sheet part");

            'items: for idx in resume_idx..items.len() {
                let item = &items[idx];
                let key = &keys[idx];
                loop {
                    let rem = remaining.get(key).copied().unwrap_or(0);
                    if rem == 0 {
                        break;
                    }
                    let (w, h) = match cache.get_or_load(key, item, &self.job) {
                        Ok(img) => img.dimensions(),
                        Err(SheetError::UnreadableImage { path, reason }) => {
                            warn!(path = %path.display(), reason, "skipping unreadable item");
                            remaining.insert(key.clone(), 0);
                            break;
                        }
                        Err(e) => return Err(e),
                    };
                    match cursor.place(w, h) {
                        ShelfFit::At(x, y) => {
                            let img = cache.get_or_load(key, item, &self.job)?;
                            canvas.write_region(x, y, &img.rgba)?;
                            placements.push(Placement {
                                key: key.clone(),
                                part_index: part_no,
                                rect: Rect::new(x, y, w, h),
                            });
                            remaining.insert(key.clone(), rem - 1);
                            if rem - 1 == 0 {
                                // Zero-remaining items leave the cache now,
                                // not at part completion.
                                cache.evict(key);
                            }
                        }
                        ShelfFit::Full if cursor.placed() == 0 => {
                            if !ShelfCursor::fits_fresh(w, h, max_w, max_h) {
                                error!(
                                    key = %key,
                                    w, h,
                                    "item cannot fit the printer max area, skipping"
                                );
                                remaining.insert(key.clone(), 0);
                                cache.evict(key);
                                continue;
                            }
                            // Under-sized estimate; retry this part at max.
                            force_max = true;
                            resume_idx = idx;
                            part_full = true;
                            break 'items;
                        }
                        ShelfFit::Full => {
                            // Resume point: the next part continues exactly
                            // here with the counts left in `remaining`.
                            resume_idx = idx;
                            part_full = true;
                            break 'items;
                        }
                    }
                }
            }

            if placements.is_empty() {
                canvas.release();
                continue;
            }

            canvas.flush()?;
            match export_part(&canvas, &placements, part_no, &self.job, &self.engine, out_dir) {
                Ok(Some(record)) => parts.push(record),
                Ok(None) => {}
                Err(e) => error!(part_no, error = %e, "export failed, skipping sheet part"),
            }
            canvas.release();

            if part_full && cw == max_w && ch == max_h {
                // A full part at printer max is as good as dynamic sizing
                // gets for the tail of the list; keep estimating next part.
                force_max = !self.engine.dynamic_sizing;
            }
        }

        let (success, err, recommendation) = match abort {
            Some((e, rec)) => (false, Some(e), rec),
            None => (true, None, None),
        };
        let result = PackingResult {
            success,
            sheet_parts_created: parts.len() as u32,
            error: err,
            recommendation,
            parts,
        };
        info!(
            success = result.success,
            parts = result.sheet_parts_created,
            stats = result.stats().summary(),
            "packing job finished"
        );
        Ok(result)
    }

    /// Parallel normalization of the initial work list; unreadable sources
    /// are logged and their remaining counts zeroed so the loop skips them.
    fn warm_cache(
        &self,
        items: &[WorkItem],
        keys: &[WorkKey],
        remaining: &mut RemainingWork,
        cache: &mut ImageCache,
    ) -> Result<()> {
        let mut seen = HashSet::new();
        let distinct: Vec<WorkItem> = items
            .iter()
            .zip(keys)
            .filter(|(_, k)| seen.insert((*k).clone()))
            .map(|(item, _)| item.clone())
            .collect();
        let batch = normalize_batch(&distinct, &self.job, self.engine.workers)?;
        let mut loaded = 0usize;
        for (key, outcome) in batch {
            match outcome {
                Ok(img) => {
                    cache.insert(key, img);
                    loaded += 1;
                }
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable item");
                    remaining.insert(key, 0);
                }
            }
        }
        info!(
            loaded,
            distinct = distinct.len(),
            workers = self.engine.workers,
            "normalized input images"
        );
        Ok(())
    }
}

/// Convenience entry point: builds the work list from the caller's ordered
/// lists and runs one job against a real memory probe.
pub fn pack_job(
    titles: &[String],
    sizes: &[String],
    totals: Option<&[u32]>,
    job: JobConfig,
    engine: EngineConfig,
    out_dir: &Path,
) -> Result<PackingResult> {
    let items = build_work_items(titles, sizes, totals)?;
    let mut eng = PackEngine::new(job, engine)?;
    eng.run(items, out_dir)
}
