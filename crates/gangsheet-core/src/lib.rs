//! Core library for packing print-ready raster designs onto gang sheets.
//!
//! - Layout: shelf (row) packing, left-to-right with row wrap, spilling onto
//!   additional sheet parts when a canvas fills up
//! - Normalization: 4-channel canonical orientation at a single working DPI
//! - Admission control: every canvas allocation is gated by a memory governor
//!   with a configurable safety ceiling
//! - Export: non-transparent crop, target-DPI rescale, PNG + JSON layer manifest
//!
//! Quick example:
//! ```ignore
//! use gangsheet_core::prelude::*;
//! # fn main() -> anyhow::Result<()> {
//! let job = JobConfig::builder("DTF")
//!     .printer(22.0, 120.0, 300)
//!     .spacing(0.5, 0.5)
//!     .build();
//! let items = build_work_items(
//!     &["a.png".into(), "b.png".into()],
//!     &["11x17".into(), "11x17".into()],
//!     Some(&[3, 2]),
//! )?;
//! let mut engine = PackEngine::new(job, EngineConfig::from_env())?;
//! let result = engine.run(items, std::path::Path::new("out"))?;
//! println!("sheet parts: {}", result.sheet_parts_created);
//! # Ok(()) }
//! ```

pub mod canvas;
pub mod config;
pub mod engine;
pub mod error;
pub mod estimate;
pub mod export;
pub mod memory;
pub mod model;
pub mod normalize;
pub mod shelf;

pub use canvas::*;
pub use config::*;
pub use engine::*;
pub use error::*;
pub use memory::*;
pub use model::*;
pub use normalize::*;

/// Convenience prelude for common types and functions.
/// Importing `gangsheet_core::prelude::*` brings the primary APIs into scope.
pub mod prelude {
    pub use crate::canvas::SheetCanvas;
    pub use crate::config::{EngineConfig, JobConfig, JobConfigBuilder, PrinterSpec, Spacing};
    pub use crate::engine::{PackEngine, build_work_items};
    pub use crate::error::{Result, SheetError};
    pub use crate::memory::{MemoryGovernor, MemoryProbe, Recommendation};
    pub use crate::model::{
        MemoryStatus, PackingResult, Placement, Rect, SheetPartRecord, WorkItem, WorkKey,
    };
    pub use crate::normalize::{ImageCache, NormalizedImage};
}
