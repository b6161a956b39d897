//! Governor behavior under injected memory pressure: vetoes are binding,
//! partial output survives an abort, and the reclamation retry fires once.

use gangsheet_core::memory::{MemoryGovernor, MemorySample};
use gangsheet_core::prelude::*;
use image::{Rgba, RgbaImage};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

const GIB: u64 = 1 << 30;

/// Probe pinned at ~94% system usage.
struct SaturatedProbe;

impl MemoryProbe for SaturatedProbe {
    fn sample(&mut self) -> MemorySample {
        MemorySample {
            current_bytes: 8 * GIB,
            total_bytes: 16 * GIB,
            available_bytes: GIB,
        }
    }
}

/// Safe for the first `safe_samples` readings, saturated afterwards. The
/// shared counter lets the test observe how often the governor sampled.
struct CountdownProbe {
    safe_samples: u32,
    taken: Arc<AtomicU32>,
}

impl MemoryProbe for CountdownProbe {
    fn sample(&mut self) -> MemorySample {
        let n = self.taken.fetch_add(1, Ordering::SeqCst);
        if n < self.safe_samples {
            MemorySample {
                current_bytes: GIB,
                total_bytes: 64 * GIB,
                available_bytes: 57 * GIB,
            }
        } else {
            MemorySample {
                current_bytes: 8 * GIB,
                total_bytes: 16 * GIB,
                available_bytes: GIB,
            }
        }
    }
}

fn write_px(dir: &Path, name: &str, w: u32, h: u32) -> String {
    let mut img = RgbaImage::new(w, h);
    for p in img.pixels_mut() {
        *p = Rgba([255, 0, 0, 255]);
    }
    let path = dir.join(name);
    img.save(&path).unwrap();
    path.to_string_lossy().into_owned()
}

fn job(max_w: f64, max_h: f64) -> JobConfig {
    JobConfig::builder("DTF")
        .printer(max_w, max_h, 1)
        .spacing(2.0, 2.0)
        .write_manifest(false)
        .build()
}

fn engine_cfg() -> EngineConfig {
    EngineConfig {
        dynamic_sizing: false,
        ..EngineConfig::default()
    }
}

#[test]
fn check_reports_unsafe_above_ceiling() {
    let mut gov = MemoryGovernor::with_probe(Box::new(SaturatedProbe), 85.0);
    let status = gov.check();
    assert!(!status.is_safe);
    assert!(status.percent_used > 90.0);
}

#[test]
fn can_allocate_projects_the_request_into_usage() {
    struct HalfFull;
    impl MemoryProbe for HalfFull {
        fn sample(&mut self) -> MemorySample {
            MemorySample {
                current_bytes: 4 * GIB,
                total_bytes: 16 * GIB,
                available_bytes: 8 * GIB,
            }
        }
    }
    let mut gov = MemoryGovernor::with_probe(Box::new(HalfFull), 85.0);
    // 50% used; a 1 GiB request projects to ~56%.
    let (ok, _) = gov.can_allocate(GIB);
    assert!(ok);
    // A 7 GiB request projects to ~94%.
    let (ok, reason) = gov.can_allocate(7 * GIB);
    assert!(!ok);
    assert!(!reason.is_empty());
}

#[test]
fn admit_or_abort_invokes_reclaim_exactly_once_on_final_veto() {
    let mut gov = MemoryGovernor::with_probe(Box::new(SaturatedProbe), 85.0);
    let mut reclaims = 0u32;
    let err = gov.admit_or_abort(GIB, &mut || reclaims += 1).unwrap_err();
    assert_eq!(reclaims, 1);
    match err {
        SheetError::InsufficientMemory {
            needed_bytes,
            percent_used,
            recommendation,
        } => {
            assert_eq!(needed_bytes, GIB);
            assert!(percent_used > 85.0);
            assert!(!recommendation.is_empty());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn admit_or_abort_succeeds_when_reclamation_frees_enough() {
    let taken = Arc::new(AtomicU32::new(0));
    // First reading saturated, second (post-reclaim) safe.
    struct Flip {
        taken: Arc<AtomicU32>,
    }
    impl MemoryProbe for Flip {
        fn sample(&mut self) -> MemorySample {
            if self.taken.fetch_add(1, Ordering::SeqCst) == 0 {
                MemorySample {
                    current_bytes: 8 * GIB,
                    total_bytes: 16 * GIB,
                    available_bytes: GIB,
                }
            } else {
                MemorySample {
                    current_bytes: GIB,
                    total_bytes: 16 * GIB,
                    available_bytes: 12 * GIB,
                }
            }
        }
    }
    let mut gov = MemoryGovernor::with_probe(Box::new(Flip { taken }), 85.0);
    let mut reclaims = 0u32;
    gov.admit_or_abort(GIB, &mut || reclaims += 1).unwrap();
    assert_eq!(reclaims, 1);
}

#[test]
fn saturated_memory_aborts_before_any_part_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_px(dir.path(), "a.png", 10, 10);
    let out = dir.path().join("out");

    let items = build_work_items(&[a], &["DTF".into()], Some(&[3])).unwrap();
    let mut eng =
        PackEngine::with_probe(job(25.0, 20.0), engine_cfg(), Box::new(SaturatedProbe)).unwrap();
    let result = eng.run(items, &out).unwrap();

    assert!(!result.success);
    assert_eq!(result.sheet_parts_created, 0);
    assert!(result.error.is_some());
    assert!(result.recommendation.is_some());
    let pngs: Vec<_> = std::fs::read_dir(&out)
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert!(pngs.is_empty());
}

#[test]
fn parts_finished_before_the_veto_are_kept() {
    let dir = tempfile::tempdir().unwrap();
    let a = write_px(dir.path(), "a.png", 10, 10);
    let out = dir.path().join("out");

    // 25x20 takes two units per part; 5 copies need three parts. Allow the
    // first part's admission (two samples: can_allocate + confirmation is a
    // single sample per call) then saturate.
    let taken = Arc::new(AtomicU32::new(0));
    let probe = CountdownProbe {
        safe_samples: 1,
        taken: taken.clone(),
    };
    let items = build_work_items(&[a], &["DTF".into()], Some(&[5])).unwrap();
    let mut eng = PackEngine::with_probe(job(25.0, 20.0), engine_cfg(), Box::new(probe)).unwrap();
    let result = eng.run(items, &out).unwrap();

    assert!(!result.success, "the job must report the abort");
    assert_eq!(result.sheet_parts_created, 1);
    assert_eq!(result.parts[0].placements.len(), 2);
    assert!(result.error.is_some());
    assert!(taken.load(Ordering::SeqCst) >= 2);
}
