use gangsheet_core::config::{EngineConfig, JobConfig};
use gangsheet_core::engine::{PackEngine, build_work_items};
use gangsheet_core::error::SheetError;

fn base_job() -> JobConfig {
    JobConfig::builder("DTF")
        .printer(100.0, 50.0, 1)
        .spacing(2.0, 2.0)
        .build()
}

#[test]
fn test_mismatched_titles_and_sizes() {
    let titles = vec!["a.png".to_string(), "b.png".to_string()];
    let sizes = vec!["11x17".to_string()];
    let result = build_work_items(&titles, &sizes, None);
    assert!(result.is_err());
    match result {
        Err(SheetError::InputValidation(msg)) => {
            assert!(msg.contains("titles"));
        }
        _ => panic!("Expected InputValidation error"),
    }
}

#[test]
fn test_mismatched_totals() {
    let titles = vec!["a.png".to_string()];
    let sizes = vec!["11x17".to_string()];
    let totals = vec![1u32, 2u32];
    let result = build_work_items(&titles, &sizes, Some(&totals));
    assert!(result.is_err());
    match result {
        Err(SheetError::InputValidation(msg)) => {
            assert!(msg.contains("totals"));
        }
        _ => panic!("Expected InputValidation error"),
    }
}

#[test]
fn test_empty_work_list() {
    let result = build_work_items(&[], &[], None);
    assert!(result.is_err());
    match result {
        Err(SheetError::InputValidation(_)) => {}
        _ => panic!("Expected InputValidation error"),
    }
}

#[test]
fn test_totals_default_to_one() {
    let titles = vec!["a.png".to_string(), "b.png".to_string()];
    let sizes = vec!["s".to_string(), "s".to_string()];
    let items = build_work_items(&titles, &sizes, None).expect("build");
    assert!(items.iter().all(|i| i.repeat_count == 1));
}

#[test]
fn test_zero_dpi_rejected() {
    let job = JobConfig::builder("DTF").printer(22.0, 120.0, 0).build();
    assert!(job.validate().is_err());
}

#[test]
fn test_negative_printer_area_rejected() {
    let job = JobConfig::builder("DTF").printer(-1.0, 120.0, 300).build();
    assert!(job.validate().is_err());
}

#[test]
fn test_empty_template_key_rejected() {
    let job = JobConfig::builder("  ").printer(22.0, 120.0, 300).build();
    assert!(job.validate().is_err());
}

#[test]
fn test_spacing_leaves_no_space_rejected() {
    // 60 inch spacing at 1 DPI on a 100x50 canvas: 2 * 60 >= 100.
    let job = JobConfig::builder("DTF")
        .printer(100.0, 50.0, 1)
        .spacing(60.0, 1.0)
        .build();
    assert!(job.validate().is_err());
}

#[test]
fn test_engine_config_bounds() {
    let mut cfg = EngineConfig::default();
    cfg.memory_ceiling_pct = 0.0;
    assert!(cfg.validate().is_err());
    cfg = EngineConfig::default();
    cfg.memory_ceiling_pct = 120.0;
    assert!(cfg.validate().is_err());
    cfg = EngineConfig::default();
    cfg.workers = 0;
    assert!(cfg.validate().is_err());
    cfg = EngineConfig::default();
    cfg.estimate_slack = 0.5;
    assert!(cfg.validate().is_err());
    assert!(EngineConfig::default().validate().is_ok());
}

#[test]
fn test_run_rejects_empty_items() {
    let out = tempfile::tempdir().expect("tempdir");
    let mut engine = PackEngine::new(base_job(), EngineConfig::default()).expect("engine");
    let result = engine.run(Vec::new(), out.path());
    assert!(matches!(result, Err(SheetError::InputValidation(_))));
}

#[test]
fn test_invalid_job_rejected_at_construction() {
    let job = JobConfig::builder("DTF").printer(22.0, 120.0, 0).build();
    assert!(PackEngine::new(job, EngineConfig::default()).is_err());
}
