use crate::error::{Result, SheetError};
use crate::model::MemoryStatus;
use serde::{Deserialize, Serialize};
use sysinfo::System;
use tracing::{debug, error, info, warn};

/// Raw memory counters, before the governor applies its ceiling.
#[derive(Debug, Clone, Copy)]
pub struct MemorySample {
    /// Resident bytes of this process.
    pub current_bytes: u64,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Source of memory counters. A trait seam so tests can inject fixed
/// readings; production uses [`SysinfoProbe`]. Counters are inherently racy
/// with the rest of the process, so readings are advisory-but-authoritative:
/// a veto is binding despite mild staleness.
pub trait MemoryProbe: Send {
    fn sample(&mut self) -> MemorySample;
}

/// Process/system counters via `sysinfo`.
pub struct SysinfoProbe {
    sys: System,
    pid: Option<sysinfo::Pid>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            sys: System::new(),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SysinfoProbe {
    fn sample(&mut self) -> MemorySample {
        self.sys.refresh_memory();
        let total = self.sys.total_memory();
        let available = self.sys.available_memory();
        let current = match self.pid {
            Some(pid) if self.sys.refresh_process(pid) => self
                .sys
                .process(pid)
                .map(|p| p.memory())
                .unwrap_or_else(|| total.saturating_sub(available)),
            _ => total.saturating_sub(available),
        };
        MemorySample {
            current_bytes: current,
            total_bytes: total,
            available_bytes: available,
        }
    }
}

/// A remediation step tied to the usage band the governor observed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recommendation {
    pub priority: RecommendationPriority,
    pub action: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationPriority {
    High,
    Medium,
    Low,
}

/// Admission control for canvas allocations.
///
/// This is a hard gate, not an optimization: a rejected admission stops the
/// job with a partial result, never proceeds with a vetoed allocation.
pub struct MemoryGovernor {
    probe: Box<dyn MemoryProbe>,
    ceiling_pct: f64,
}

impl MemoryGovernor {
    pub fn new(ceiling_pct: f64) -> Self {
        Self::with_probe(Box::new(SysinfoProbe::new()), ceiling_pct)
    }

    pub fn with_probe(probe: Box<dyn MemoryProbe>, ceiling_pct: f64) -> Self {
        Self { probe, ceiling_pct }
    }

    /// Current memory status, recomputed on demand and never cached.
    pub fn check(&mut self) -> MemoryStatus {
        let s = self.probe.sample();
        let percent_used = if s.total_bytes > 0 {
            (s.total_bytes.saturating_sub(s.available_bytes)) as f64 / s.total_bytes as f64 * 100.0
        } else {
            100.0
        };
        let status = MemoryStatus {
            current_bytes: s.current_bytes,
            total_bytes: s.total_bytes,
            available_bytes: s.available_bytes,
            percent_used,
            is_safe: percent_used < self.ceiling_pct,
        };
        match percent_used {
            p if p >= 90.0 => error!(percent_used = format!("{:.1}", p), "memory critically high"),
            p if p >= 80.0 => warn!(percent_used = format!("{:.1}", p), "memory high"),
            p if p >= 70.0 => info!(percent_used = format!("{:.1}", p), "memory elevated"),
            p => debug!(percent_used = format!("{:.1}", p), "memory ok"),
        }
        status
    }

    /// Whether `size_bytes` more can be allocated without crossing the
    /// safety ceiling. Returns the reason on rejection.
    pub fn can_allocate(&mut self, size_bytes: u64) -> (bool, String) {
        let status = self.check();
        if !status.is_safe {
            return (
                false,
                format!(
                    "memory already unsafe at {:.1}% (ceiling {:.0}%)",
                    status.percent_used, self.ceiling_pct
                ),
            );
        }
        if status.total_bytes == 0 {
            return (false, "total memory reported as zero".into());
        }
        let projected = (status.total_bytes.saturating_sub(status.available_bytes))
            .saturating_add(size_bytes) as f64
            / status.total_bytes as f64
            * 100.0;
        if projected > self.ceiling_pct {
            return (
                false,
                format!(
                    "allocating {} bytes would reach {:.1}% (ceiling {:.0}%)",
                    size_bytes, projected, self.ceiling_pct
                ),
            );
        }
        (true, String::new())
    }

    /// Gate used before every sheet-part allocation. On rejection, `reclaim`
    /// is invoked once (forced reclamation) and the check retried; a second
    /// rejection is final and aborts the job.
    pub fn admit_or_abort(&mut self, size_bytes: u64, reclaim: &mut dyn FnMut()) -> Result<()> {
        let (ok, reason) = self.can_allocate(size_bytes);
        if ok {
            return Ok(());
        }
        warn!(size_bytes, reason, "allocation rejected, forcing reclamation");
        reclaim();
        let (ok, reason) = self.can_allocate(size_bytes);
        if ok {
            info!(size_bytes, "allocation admitted after reclamation");
            return Ok(());
        }
        let status = self.check();
        let recommendation = self
            .recommendations(size_bytes)
            .into_iter()
            .map(|r| r.action)
            .collect::<Vec<_>>()
            .join("; ");
        error!(size_bytes, reason, "allocation vetoed");
        Err(SheetError::InsufficientMemory {
            needed_bytes: size_bytes,
            percent_used: status.percent_used,
            recommendation,
        })
    }

    /// Actionable remediation steps for the current usage band.
    pub fn recommendations(&mut self, needed_bytes: u64) -> Vec<Recommendation> {
        let status = self.check();
        let mut out = Vec::new();
        if needed_bytes > status.available_bytes {
            out.push(Recommendation {
                priority: RecommendationPriority::High,
                action: format!(
                    "reduce batch size: the job needs {} MB per sheet part but only {} MB are available",
                    needed_bytes / (1 << 20),
                    status.available_bytes / (1 << 20)
                ),
            });
        }
        if status.percent_used >= 80.0 {
            out.push(Recommendation {
                priority: RecommendationPriority::High,
                action: "lower GANGSHEET_MMAP_THRESHOLD_GB so large canvases spill to disk-backed buffers".into(),
            });
        } else if status.percent_used >= 70.0 {
            out.push(Recommendation {
                priority: RecommendationPriority::Medium,
                action: "enable disk-backed buffers for large canvases (GANGSHEET_MMAP_THRESHOLD_GB)".into(),
            });
        }
        out.push(Recommendation {
            priority: RecommendationPriority::Low,
            action: format!(
                "increase host memory: {} MB total is {:.1}% utilized",
                status.total_bytes / (1 << 20),
                status.percent_used
            ),
        });
        out
    }
}
