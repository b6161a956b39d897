use serde::{Deserialize, Serialize};

/// Physical printer limits: maximum print area in inches at a working DPI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct PrinterSpec {
    pub max_width_inches: f64,
    pub max_height_inches: f64,
    /// Working DPI; canvases are sized to the max print area at this density.
    pub dpi: u32,
}

/// Inter-item spacing in inches, converted to pixels at the working DPI.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Spacing {
    pub width_inches: f64,
    pub height_inches: f64,
}

/// Per-job configuration: what printer, what spacing, how outputs are named.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Template identifier used in output file names.
    pub template_key: String,
    /// Leading free text of output file names (order number, shop name, ...).
    #[serde(default = "default_job_prefix")]
    pub job_prefix: String,
    /// Free-text segment between template key and part number.
    #[serde(default = "default_label")]
    pub label: String,
    pub printer: PrinterSpec,
    pub spacing: Spacing,
    /// Output DPI; exported parts are rescaled from the working DPI to this.
    /// None keeps the working DPI.
    #[serde(default)]
    pub target_dpi: Option<u32>,
    /// Rotate sources 90° so width <= height before placement.
    #[serde(default = "default_true")]
    pub rotate_to_portrait: bool,
    /// Write a JSON layer manifest next to each exported raster.
    #[serde(default = "default_true")]
    pub write_manifest: bool,
}

fn default_job_prefix() -> String {
    "gangsheet".into()
}
fn default_label() -> String {
    "gang sheet".into()
}
fn default_true() -> bool {
    true
}

impl JobConfig {
    pub fn builder(template_key: impl Into<String>) -> JobConfigBuilder {
        JobConfigBuilder::new(template_key)
    }

    pub fn working_dpi(&self) -> u32 {
        self.printer.dpi
    }

    pub fn target_dpi(&self) -> u32 {
        self.target_dpi.unwrap_or(self.printer.dpi)
    }

    /// Printer max area in pixels at the working DPI.
    pub fn max_canvas_px(&self) -> (u32, u32) {
        (
            inches_to_px(self.printer.max_width_inches, self.printer.dpi),
            inches_to_px(self.printer.max_height_inches, self.printer.dpi),
        )
    }

    /// Inter-item spacing in pixels at the working DPI.
    pub fn spacing_px(&self) -> (u32, u32) {
        (
            inches_to_px(self.spacing.width_inches, self.printer.dpi),
            inches_to_px(self.spacing.height_inches, self.printer.dpi),
        )
    }

    /// Validates the job parameters.
    ///
    /// Returns an error if dimensions or DPI are zero/negative, or if the
    /// spacing leaves no usable canvas area.
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::SheetError;

        if self.printer.dpi == 0 {
            return Err(SheetError::InputValidation("printer dpi must be > 0".into()));
        }
        if self.printer.max_width_inches <= 0.0 || self.printer.max_height_inches <= 0.0 {
            return Err(SheetError::InputValidation(format!(
                "printer max area must be positive, got {}x{} inches",
                self.printer.max_width_inches, self.printer.max_height_inches
            )));
        }
        if self.spacing.width_inches < 0.0 || self.spacing.height_inches < 0.0 {
            return Err(SheetError::InputValidation("spacing must be >= 0".into()));
        }
        if let Some(dpi) = self.target_dpi {
            if dpi == 0 {
                return Err(SheetError::InputValidation("target dpi must be > 0".into()));
            }
        }
        let (mw, mh) = self.max_canvas_px();
        let (sx, sy) = self.spacing_px();
        if sx.saturating_mul(2) >= mw || sy.saturating_mul(2) >= mh {
            return Err(SheetError::InputValidation(format!(
                "spacing {}x{} px leaves no usable space on a {}x{} px canvas",
                sx, sy, mw, mh
            )));
        }
        if self.template_key.trim().is_empty() {
            return Err(SheetError::InputValidation("template_key is empty".into()));
        }
        Ok(())
    }
}

pub(crate) fn inches_to_px(inches: f64, dpi: u32) -> u32 {
    (inches * dpi as f64).round().max(0.0) as u32
}

/// Builder for `JobConfig` for ergonomic construction.
#[derive(Debug, Clone)]
pub struct JobConfigBuilder {
    cfg: JobConfig,
}

impl JobConfigBuilder {
    pub fn new(template_key: impl Into<String>) -> Self {
        Self {
            cfg: JobConfig {
                template_key: template_key.into(),
                job_prefix: default_job_prefix(),
                label: default_label(),
                printer: PrinterSpec {
                    max_width_inches: 22.0,
                    max_height_inches: 120.0,
                    dpi: 300,
                },
                spacing: Spacing {
                    width_inches: 0.5,
                    height_inches: 0.5,
                },
                target_dpi: None,
                rotate_to_portrait: true,
                write_manifest: true,
            },
        }
    }
    pub fn printer(mut self, max_width_inches: f64, max_height_inches: f64, dpi: u32) -> Self {
        self.cfg.printer = PrinterSpec {
            max_width_inches,
            max_height_inches,
            dpi,
        };
        self
    }
    pub fn spacing(mut self, width_inches: f64, height_inches: f64) -> Self {
        self.cfg.spacing = Spacing {
            width_inches,
            height_inches,
        };
        self
    }
    pub fn job_prefix(mut self, v: impl Into<String>) -> Self {
        self.cfg.job_prefix = v.into();
        self
    }
    pub fn label(mut self, v: impl Into<String>) -> Self {
        self.cfg.label = v.into();
        self
    }
    pub fn target_dpi(mut self, v: Option<u32>) -> Self {
        self.cfg.target_dpi = v;
        self
    }
    pub fn rotate_to_portrait(mut self, v: bool) -> Self {
        self.cfg.rotate_to_portrait = v;
        self
    }
    pub fn write_manifest(mut self, v: bool) -> Self {
        self.cfg.write_manifest = v;
        self
    }
    pub fn build(self) -> JobConfig {
        self.cfg
    }
}

/// Environment variable overrides for [`EngineConfig`].
pub const ENV_DYNAMIC_SIZING: &str = "GANGSHEET_DYNAMIC_SIZING";
pub const ENV_MMAP_THRESHOLD_GB: &str = "GANGSHEET_MMAP_THRESHOLD_GB";
pub const ENV_MEMORY_CEILING_PCT: &str = "GANGSHEET_MEMORY_CEILING_PCT";
pub const ENV_WORKERS: &str = "GANGSHEET_WORKERS";

/// Host/process tuning knobs, sourced from environment or config rather than
/// per-job input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Estimate a smaller canvas from the work list instead of always
    /// allocating the printer max. Advisory; overflow still spills to parts.
    #[serde(default = "default_dynamic_sizing")]
    pub dynamic_sizing: bool,
    /// Canvases above this size (GB) use a disk-backed memory-mapped buffer.
    #[serde(default = "default_mmap_threshold_gb")]
    pub mmap_threshold_gb: f64,
    /// Memory safety ceiling as a percentage of total system memory.
    #[serde(default = "default_memory_ceiling_pct")]
    pub memory_ceiling_pct: f64,
    /// Worker pool size for initial image normalization.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Flush disk-backed canvases every N region writes.
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u32,
    /// Margin kept around the non-transparent bounding box when cropping.
    #[serde(default = "default_crop_margin_px")]
    pub crop_margin_px: u32,
    /// Bounded capacity of the normalized-image cache (entries).
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Slack factor applied to the estimated canvas area.
    #[serde(default = "default_estimate_slack")]
    pub estimate_slack: f64,
    /// How many distinct images the estimator samples.
    #[serde(default = "default_estimate_samples")]
    pub estimate_samples: usize,
    /// Directory for disk-backed canvas spool files. None uses the system
    /// temp directory.
    #[serde(default)]
    pub spool_dir: Option<std::path::PathBuf>,
}

fn default_dynamic_sizing() -> bool {
    true
}
fn default_mmap_threshold_gb() -> f64 {
    0.5
}
fn default_memory_ceiling_pct() -> f64 {
    85.0
}
fn default_workers() -> usize {
    4
}
fn default_flush_interval() -> u32 {
    32
}
fn default_crop_margin_px() -> u32 {
    10
}
fn default_cache_capacity() -> usize {
    64
}
fn default_estimate_slack() -> f64 {
    1.2
}
fn default_estimate_samples() -> usize {
    4
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dynamic_sizing: default_dynamic_sizing(),
            mmap_threshold_gb: default_mmap_threshold_gb(),
            memory_ceiling_pct: default_memory_ceiling_pct(),
            workers: default_workers(),
            flush_interval: default_flush_interval(),
            crop_margin_px: default_crop_margin_px(),
            cache_capacity: default_cache_capacity(),
            estimate_slack: default_estimate_slack(),
            estimate_samples: default_estimate_samples(),
            spool_dir: None,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `GANGSHEET_*` environment variables where set.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<bool>(ENV_DYNAMIC_SIZING) {
            cfg.dynamic_sizing = v;
        }
        if let Some(v) = env_parse::<f64>(ENV_MMAP_THRESHOLD_GB) {
            cfg.mmap_threshold_gb = v;
        }
        if let Some(v) = env_parse::<f64>(ENV_MEMORY_CEILING_PCT) {
            cfg.memory_ceiling_pct = v;
        }
        if let Some(v) = env_parse::<usize>(ENV_WORKERS) {
            cfg.workers = v;
        }
        cfg
    }

    pub fn mmap_threshold_bytes(&self) -> u64 {
        (self.mmap_threshold_gb * (1u64 << 30) as f64).max(0.0) as u64
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::SheetError;
        if !(0.0 < self.memory_ceiling_pct && self.memory_ceiling_pct <= 100.0) {
            return Err(SheetError::InputValidation(format!(
                "memory_ceiling_pct must be in (0, 100], got {}",
                self.memory_ceiling_pct
            )));
        }
        if self.workers == 0 {
            return Err(SheetError::InputValidation("workers must be > 0".into()));
        }
        if self.cache_capacity == 0 {
            return Err(SheetError::InputValidation(
                "cache_capacity must be > 0".into(),
            ));
        }
        if self.estimate_slack < 1.0 {
            return Err(SheetError::InputValidation(
                "estimate_slack must be >= 1.0".into(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "ignoring unparseable environment override");
            None
        }
    }
}
