use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
    /// Bad job input (mismatched list lengths, empty work list, invalid
    /// configuration). Fatal before any work begins; no partial result.
    #[error("Invalid input: {0}")]
    InputValidation(String),
    /// A single source file could not be read or decoded. Callers skip the
    /// work item; this never aborts the job.
    #[error("Unreadable image {path}: {reason}")]
    UnreadableImage { path: PathBuf, reason: String },
    /// The memory governor vetoed an allocation, after one forced
    /// reclamation retry. The job stops with a partial result.
    #[error("Insufficient memory for {needed_bytes} bytes ({percent_used:.1}% in use)")]
    InsufficientMemory {
        needed_bytes: u64,
        percent_used: f64,
        recommendation: String,
    },
    /// The packing loop exceeded its iteration safety valve. This signals a
    /// layout bug, not legitimate work, and must never look like success.
    #[error("Packing logic error: {0}")]
    PackingLogic(String),
    /// Crop/rescale/write of one sheet part failed; the part is skipped.
    #[error("Export error: {0}")]
    Export(String),
    #[error("Canvas error: {0}")]
    Canvas(String),
}

pub type Result<T> = std::result::Result<T, SheetError>;
