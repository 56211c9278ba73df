//! Suite-level result aggregation
//!
//! The summary is the single synchronization point at which every visual
//! session of the batch has reached a terminal resolution. It reports
//! per-outcome totals and per-session detail; it never fails individual
//! tests.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::BatchInfo;
use crate::error::HarnessResult;
use crate::visual::{CheckpointOutcome, SessionResults};

/// Checkpoint totals per outcome category.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub new: usize,
    pub matched: usize,
    pub mismatched: usize,
    pub unresolved: usize,
}

impl OutcomeCounts {
    pub fn record(&mut self, outcome: CheckpointOutcome) {
        match outcome {
            CheckpointOutcome::New => self.new += 1,
            CheckpointOutcome::Matched => self.matched += 1,
            CheckpointOutcome::Mismatched => self.mismatched += 1,
            CheckpointOutcome::Unresolved => self.unresolved += 1,
        }
    }

    pub fn merge(&mut self, other: OutcomeCounts) {
        self.new += other.new;
        self.matched += other.matched;
        self.mismatched += other.mismatched;
        self.unresolved += other.unresolved;
    }

    pub fn total(&self) -> usize {
        self.new + self.matched + self.mismatched + self.unresolved
    }

    /// No mismatched and no unresolved checkpoints.
    pub fn clean(&self) -> bool {
        self.mismatched == 0 && self.unresolved == 0
    }
}

/// Aggregate view over all visual sessions of one batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub batch_id: String,
    pub batch_label: String,
    pub started_at: DateTime<Utc>,
    pub counts: OutcomeCounts,
    pub sessions: Vec<SessionResults>,
}

impl SuiteSummary {
    pub fn from_sessions(batch: &BatchInfo, sessions: Vec<SessionResults>) -> Self {
        let mut counts = OutcomeCounts::default();
        for session in &sessions {
            counts.merge(session.counts());
        }

        Self {
            batch_id: batch.id.clone(),
            batch_label: batch.label.clone(),
            started_at: batch.started_at,
            counts,
            sessions,
        }
    }

    /// True when every checkpoint in the batch resolved matched or new.
    pub fn all_clean(&self) -> bool {
        self.counts.clean()
    }

    /// Persist the summary as JSON under `dir`.
    pub fn write_json(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("visual-summary.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Visual summary written to: {}", path.display());
        Ok(path)
    }
}

impl fmt::Display for SuiteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batch '{}' ({})", self.batch_label, self.batch_id)?;

        for session in &self.sessions {
            writeln!(
                f,
                "  {} - {} checkpoint(s)",
                session.test_name,
                session.checkpoints.len()
            )?;
            for checkpoint in &session.checkpoints {
                write!(
                    f,
                    "    [{:>10}] {} ({:.2}%)",
                    checkpoint.outcome.to_string(),
                    checkpoint.name,
                    checkpoint.diff_percent
                )?;
                if let Some(path) = &checkpoint.diff_image_path {
                    write!(f, " diff: {}", path.display())?;
                }
                if let Some(detail) = &checkpoint.detail {
                    write!(f, " ({})", detail)?;
                }
                writeln!(f)?;
            }
        }

        write!(
            f,
            "Totals: {} new, {} matched, {} mismatched, {} unresolved",
            self.counts.new, self.counts.matched, self.counts.mismatched, self.counts.unresolved
        )
    }
}
