//! Suite-wide context: credentials, execution mode, batch identity
//!
//! The context is constructed exactly once per run and shared read-only by
//! every session. Nothing here is a global: callers build a `SuiteContext`,
//! wrap it in an `Arc`, and hand it to the factory and runner explicitly.

use std::env;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Environment variable holding the visual-service credential.
pub const API_KEY_VAR: &str = "VISREG_API_KEY";

/// Environment variable selecting headless browser execution.
/// Case-insensitive "true" enables headless; anything else means headed.
pub const HEADLESS_VAR: &str = "VISREG_HEADLESS";

/// Default mismatch threshold in percent of differing pixels (or blocks,
/// for layout-level comparisons).
pub const DEFAULT_MISMATCH_THRESHOLD: f64 = 0.1;

/// Identity of one suite run, displayed in reports.
///
/// All sessions opened during a run share the same batch.
#[derive(Debug, Clone)]
pub struct BatchInfo {
    pub id: String,
    pub label: String,
    pub started_at: DateTime<Utc>,
}

impl BatchInfo {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            started_at: Utc::now(),
        }
    }
}

/// Immutable options applied to every visual session of the suite.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Credential for the visual backend. `None` leaves it to the backend,
    /// which may fail at open or fall back to its own lookup.
    pub api_key: Option<String>,

    /// Batch the sessions report into.
    pub batch: BatchInfo,

    /// Accept checkpoints with no baseline and store the screenshot as the
    /// new baseline, instead of leaving them unresolved.
    pub save_new_baselines: bool,

    /// Mismatch threshold in percent.
    pub mismatch_threshold: f64,
}

/// Process-wide suite state, created once before the first test.
///
/// Read-only after construction; share via `Arc`.
#[derive(Debug, Clone)]
pub struct SuiteContext {
    pub api_key: Option<String>,
    pub headless: bool,
    pub batch: BatchInfo,
    pub config: SessionConfig,
}

impl SuiteContext {
    pub fn new(api_key: Option<String>, headless: bool, batch: BatchInfo) -> Self {
        let config = SessionConfig {
            api_key: api_key.clone(),
            batch: batch.clone(),
            save_new_baselines: true,
            mismatch_threshold: DEFAULT_MISMATCH_THRESHOLD,
        };
        Self {
            api_key,
            headless,
            batch,
            config,
        }
    }

    /// Read the suite inputs from the environment.
    ///
    /// `VISREG_API_KEY` is optional here; presence is not validated. A bad
    /// or missing credential surfaces later, when a backend rejects the
    /// session open.
    pub fn from_env(batch_label: impl Into<String>) -> Self {
        let api_key = env::var(API_KEY_VAR).ok().filter(|k| !k.is_empty());
        let headless = parse_headless(env::var(HEADLESS_VAR).ok().as_deref());
        Self::new(api_key, headless, BatchInfo::new(batch_label))
    }

    pub fn with_save_new_baselines(mut self, save: bool) -> Self {
        self.config.save_new_baselines = save;
        self
    }

    pub fn with_mismatch_threshold(mut self, threshold: f64) -> Self {
        self.config.mismatch_threshold = threshold;
        self
    }
}

/// Headless-mode parsing: only a case-insensitive "true" opts in.
fn parse_headless(raw: Option<&str>) -> bool {
    raw.map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
