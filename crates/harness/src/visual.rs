//! Visual-testing backend: checkpoint submission and resolution
//!
//! `VisualBackend` is the narrow seam to the visual-diffing collaborator.
//! Checkpoint submission enqueues work and returns immediately; resolution
//! happens in the background and is only awaited at the suite-end
//! aggregation barrier (or at teardown, under a blocking close).
//!
//! `LocalVisualBackend` is the built-in implementation: a baseline
//! screenshot store with pixel comparison for strict checkpoints and
//! block-average comparison for layout-level checkpoints.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use image::RgbaImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::aggregate::OutcomeCounts;
use crate::context::SessionConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::Viewport;

/// Comparison scope for a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Compare the visible viewport.
    #[default]
    Window,
    /// Compare the full scrollable page, where the capture side supports it.
    FullPage,
}

/// Comparison strictness for a checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchLevel {
    /// Exact pixel match (with a small anti-aliasing tolerance).
    #[default]
    Strict,
    /// Layout-only match: tolerates text/content churn, flags structural
    /// changes.
    Layout,
}

/// Settings for one checkpoint call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    /// Checkpoint name, unique within the test.
    pub name: String,
    #[serde(default)]
    pub scope: Scope,
    #[serde(default)]
    pub match_level: MatchLevel,
}

impl CheckpointSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: Scope::default(),
            match_level: MatchLevel::default(),
        }
    }

    pub fn full_page(mut self) -> Self {
        self.scope = Scope::FullPage;
        self
    }

    pub fn layout(mut self) -> Self {
        self.match_level = MatchLevel::Layout;
        self
    }
}

/// Terminal state of one visual comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointOutcome {
    /// No baseline existed; this screenshot became the baseline.
    New,
    Matched,
    Mismatched,
    /// The comparison could not be carried out.
    Unresolved,
}

impl fmt::Display for CheckpointOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointOutcome::New => write!(f, "new"),
            CheckpointOutcome::Matched => write!(f, "matched"),
            CheckpointOutcome::Mismatched => write!(f, "mismatched"),
            CheckpointOutcome::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Resolved result of one checkpoint, in call order within its session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointResult {
    pub name: String,
    pub outcome: CheckpointOutcome,
    pub diff_percent: f64,
    pub diff_image_path: Option<PathBuf>,
    /// Extra context, e.g. why a checkpoint is unresolved.
    pub detail: Option<String>,
}

/// Terminal view of one visual session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionResults {
    pub test_name: String,
    pub checkpoints: Vec<CheckpointResult>,
}

impl SessionResults {
    pub fn counts(&self) -> OutcomeCounts {
        let mut counts = OutcomeCounts::default();
        for checkpoint in &self.checkpoints {
            counts.record(checkpoint.outcome);
        }
        counts
    }

    /// True when no checkpoint resolved mismatched or unresolved.
    pub fn passed(&self) -> bool {
        self.counts().clean()
    }
}

/// Opaque identifier of one open visual session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Inputs for opening a visual session, one per test.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Application under test; constant across the suite.
    pub app_name: String,
    /// Test name, unique within the batch.
    pub test_name: String,
    pub viewport: Viewport,
    pub config: SessionConfig,
}

/// The visual-testing collaborator seam.
///
/// Implementations own comparison, diff rendering, and result storage. The
/// harness only sequences the lifecycle: open, submit checkpoints in call
/// order, close, and eventually wait for terminal resolution.
#[async_trait]
pub trait VisualBackend: Send + Sync {
    /// Open a session. Fatal to the owning test on failure.
    async fn open(&self, spec: SessionSpec) -> HarnessResult<SessionId>;

    /// Enqueue a comparison for a captured screenshot (PNG bytes).
    ///
    /// Returns once the work is queued; never waits for resolution.
    async fn submit(
        &self,
        id: &SessionId,
        screenshot: Vec<u8>,
        settings: CheckpointSettings,
    ) -> HarnessResult<()>;

    /// Signal that no further checkpoints will be taken for this session.
    async fn close(&self, id: &SessionId) -> HarnessResult<()>;

    /// Block until every checkpoint of this session reached a terminal
    /// outcome. Idempotent: later calls return the resolved results again.
    async fn wait_for_results(&self, id: &SessionId) -> HarnessResult<SessionResults>;
}

/// On-disk layout for the local backend.
#[derive(Debug, Clone)]
pub struct LocalStoreConfig {
    pub baseline_dir: PathBuf,
    pub diff_dir: PathBuf,
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            baseline_dir: PathBuf::from("test-results/baselines"),
            diff_dir: PathBuf::from("test-results/diffs"),
        }
    }
}

struct SessionState {
    spec: SessionSpec,
    pending: Vec<(String, JoinHandle<CheckpointResult>)>,
    resolved: Vec<CheckpointResult>,
    closed: bool,
}

/// Built-in visual backend comparing screenshots against a local baseline
/// store. Baselines are keyed by app name, test name, and checkpoint name.
pub struct LocalVisualBackend {
    store: LocalStoreConfig,
    sessions: Mutex<HashMap<SessionId, SessionState>>,
}

impl LocalVisualBackend {
    pub fn new(store: LocalStoreConfig) -> Self {
        Self {
            store,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn baseline_path(&self, spec: &SessionSpec, checkpoint: &str) -> PathBuf {
        self.store
            .baseline_dir
            .join(fs_safe(&spec.app_name))
            .join(fs_safe(&spec.test_name))
            .join(format!("{}.png", fs_safe(checkpoint)))
    }

    fn diff_path(&self, spec: &SessionSpec, checkpoint: &str) -> PathBuf {
        self.store
            .diff_dir
            .join(fs_safe(&spec.app_name))
            .join(fs_safe(&spec.test_name))
            .join(format!("{}-diff.png", fs_safe(checkpoint)))
    }
}

impl Default for LocalVisualBackend {
    fn default() -> Self {
        Self::new(LocalStoreConfig::default())
    }
}

#[async_trait]
impl VisualBackend for LocalVisualBackend {
    async fn open(&self, spec: SessionSpec) -> HarnessResult<SessionId> {
        let id = SessionId::generate();
        info!(
            "Opened visual session '{}' for '{}' at {} (batch '{}')",
            spec.test_name, spec.app_name, spec.viewport, spec.config.batch.label
        );

        self.sessions.lock().insert(
            id.clone(),
            SessionState {
                spec,
                pending: Vec::new(),
                resolved: Vec::new(),
                closed: false,
            },
        );
        Ok(id)
    }

    async fn submit(
        &self,
        id: &SessionId,
        screenshot: Vec<u8>,
        settings: CheckpointSettings,
    ) -> HarnessResult<()> {
        let job = {
            let mut sessions = self.sessions.lock();
            let state = sessions
                .get_mut(id)
                .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;

            if state.closed {
                return Err(HarnessError::SessionClosed(state.spec.test_name.clone()));
            }

            CompareJob {
                test_name: state.spec.test_name.clone(),
                baseline_path: self.baseline_path(&state.spec, &settings.name),
                diff_path: self.diff_path(&state.spec, &settings.name),
                save_new: state.spec.config.save_new_baselines,
                threshold: state.spec.config.mismatch_threshold,
                screenshot,
                settings,
            }
        };

        debug!(
            "Queued checkpoint '{}' for '{}'",
            job.settings.name, job.test_name
        );

        let name = job.settings.name.clone();
        // Comparison is CPU + filesystem work; keep it off the async workers.
        let handle = tokio::task::spawn_blocking(move || compare_checkpoint(job));

        let mut sessions = self.sessions.lock();
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
        state.pending.push((name, handle));
        Ok(())
    }

    async fn close(&self, id: &SessionId) -> HarnessResult<()> {
        let mut sessions = self.sessions.lock();
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
        state.closed = true;
        debug!(
            "Closed visual session '{}' ({} checkpoint(s) pending)",
            state.spec.test_name,
            state.pending.len()
        );
        Ok(())
    }

    async fn wait_for_results(&self, id: &SessionId) -> HarnessResult<SessionResults> {
        let (test_name, pending) = {
            let mut sessions = self.sessions.lock();
            let state = sessions
                .get_mut(id)
                .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
            (
                state.spec.test_name.clone(),
                std::mem::take(&mut state.pending),
            )
        };

        let mut newly_resolved = Vec::with_capacity(pending.len());
        for (name, handle) in pending {
            let result = match handle.await {
                Ok(result) => result,
                // A panicked comparison must not drop the checkpoint from
                // the report.
                Err(e) => CheckpointResult {
                    name,
                    outcome: CheckpointOutcome::Unresolved,
                    diff_percent: 0.0,
                    diff_image_path: None,
                    detail: Some(format!("comparison task failed: {}", e)),
                },
            };
            newly_resolved.push(result);
        }

        let mut sessions = self.sessions.lock();
        let state = sessions
            .get_mut(id)
            .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
        state.resolved.extend(newly_resolved);

        Ok(SessionResults {
            test_name,
            checkpoints: state.resolved.clone(),
        })
    }
}

struct CompareJob {
    test_name: String,
    settings: CheckpointSettings,
    screenshot: Vec<u8>,
    baseline_path: PathBuf,
    diff_path: PathBuf,
    save_new: bool,
    threshold: f64,
}

fn compare_checkpoint(job: CompareJob) -> CheckpointResult {
    match run_comparison(&job) {
        Ok(result) => result,
        Err(e) => {
            warn!(
                "Checkpoint '{}' of '{}' unresolved: {}",
                job.settings.name, job.test_name, e
            );
            CheckpointResult {
                name: job.settings.name.clone(),
                outcome: CheckpointOutcome::Unresolved,
                diff_percent: 0.0,
                diff_image_path: None,
                detail: Some(e.to_string()),
            }
        }
    }
}

fn run_comparison(job: &CompareJob) -> HarnessResult<CheckpointResult> {
    let name = job.settings.name.clone();

    if !job.baseline_path.exists() {
        if job.save_new {
            if let Some(parent) = job.baseline_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&job.baseline_path, &job.screenshot)?;
            info!(
                "Stored new baseline for '{}' / '{}'",
                job.test_name, job.settings.name
            );
            return Ok(CheckpointResult {
                name,
                outcome: CheckpointOutcome::New,
                diff_percent: 0.0,
                diff_image_path: None,
                detail: None,
            });
        }
        return Ok(CheckpointResult {
            name,
            outcome: CheckpointOutcome::Unresolved,
            diff_percent: 0.0,
            diff_image_path: None,
            detail: Some("no baseline exists and saving new baselines is disabled".into()),
        });
    }

    let baseline_bytes = std::fs::read(&job.baseline_path)?;

    // Identical bytes short-circuit the pixel walk.
    if sha256_hex(&baseline_bytes) == sha256_hex(&job.screenshot) {
        debug!("Checkpoint '{}' matches baseline exactly", job.settings.name);
        return Ok(CheckpointResult {
            name,
            outcome: CheckpointOutcome::Matched,
            diff_percent: 0.0,
            diff_image_path: None,
            detail: None,
        });
    }

    let actual = image::load_from_memory(&job.screenshot)?.to_rgba8();
    let baseline = image::load_from_memory(&baseline_bytes)?.to_rgba8();

    if actual.dimensions() != baseline.dimensions() {
        warn!(
            "Checkpoint '{}': dimensions differ, actual {:?} vs baseline {:?}",
            job.settings.name,
            actual.dimensions(),
            baseline.dimensions()
        );
    }

    let (diff_percent, diff_image) = match job.settings.match_level {
        MatchLevel::Strict => compare_strict(&actual, &baseline),
        MatchLevel::Layout => compare_layout(&actual, &baseline),
    };

    let matches = diff_percent <= job.threshold;
    let diff_image_path = match diff_image {
        Some(img) if !matches => {
            if let Some(parent) = job.diff_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            img.save(&job.diff_path)?;
            Some(job.diff_path.clone())
        }
        _ => None,
    };

    if matches {
        Ok(CheckpointResult {
            name,
            outcome: CheckpointOutcome::Matched,
            diff_percent,
            diff_image_path: None,
            detail: None,
        })
    } else {
        warn!(
            "Checkpoint '{}' of '{}': {:.2}% differs (threshold {:.2}%)",
            job.settings.name, job.test_name, diff_percent, job.threshold
        );
        Ok(CheckpointResult {
            name,
            outcome: CheckpointOutcome::Mismatched,
            diff_percent,
            diff_image_path,
            detail: None,
        })
    }
}

/// Per-channel tolerance absorbing anti-aliasing and compression noise.
const PIXEL_TOLERANCE: i32 = 5;

/// Block edge length for layout-level comparison.
const LAYOUT_BLOCK: u32 = 16;

/// Mean-luminance delta above which a block counts as structurally changed.
const LAYOUT_TOLERANCE: f64 = 12.0;

/// Pixel-exact comparison over the overlapping region.
///
/// Returns the percentage of differing pixels (relative to the actual
/// image's area) and a diff image with differing pixels marked red.
fn compare_strict(actual: &RgbaImage, baseline: &RgbaImage) -> (f64, Option<RgbaImage>) {
    let (width, height) = actual.dimensions();
    let overlap_w = width.min(baseline.width());
    let overlap_h = height.min(baseline.height());

    let mut diff_img = RgbaImage::new(width, height);
    let mut diff_pixels = 0u64;
    let total_pixels = (width as u64) * (height as u64);

    for y in 0..overlap_h {
        for x in 0..overlap_w {
            let a = actual.get_pixel(x, y);
            let b = baseline.get_pixel(x, y);

            if pixels_differ(a, b) {
                diff_pixels += 1;
                diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
            } else {
                diff_img.put_pixel(x, y, dim(a));
            }
        }
    }

    let diff_percent = if total_pixels == 0 {
        0.0
    } else {
        (diff_pixels as f64 / total_pixels as f64) * 100.0
    };

    let diff_image = if diff_pixels > 0 { Some(diff_img) } else { None };
    (diff_percent, diff_image)
}

/// Layout comparison: mean luminance per block over the overlapping region.
///
/// Small per-pixel churn (text rendering, anti-aliasing) averages out inside
/// a block; moved or resized page structure shifts block means and is
/// flagged. The percentage is over blocks, not pixels.
fn compare_layout(actual: &RgbaImage, baseline: &RgbaImage) -> (f64, Option<RgbaImage>) {
    let overlap_w = actual.width().min(baseline.width());
    let overlap_h = actual.height().min(baseline.height());

    let blocks_x = overlap_w.div_ceil(LAYOUT_BLOCK);
    let blocks_y = overlap_h.div_ceil(LAYOUT_BLOCK);
    let total_blocks = (blocks_x as u64) * (blocks_y as u64);

    if total_blocks == 0 {
        return (0.0, None);
    }

    let mut diff_img = RgbaImage::new(actual.width(), actual.height());
    for (x, y, pixel) in actual.enumerate_pixels() {
        diff_img.put_pixel(x, y, dim(pixel));
    }

    let mut diff_blocks = 0u64;
    for by in 0..blocks_y {
        for bx in 0..blocks_x {
            let x0 = bx * LAYOUT_BLOCK;
            let y0 = by * LAYOUT_BLOCK;
            let x1 = (x0 + LAYOUT_BLOCK).min(overlap_w);
            let y1 = (y0 + LAYOUT_BLOCK).min(overlap_h);

            let mean_a = block_luminance(actual, x0, y0, x1, y1);
            let mean_b = block_luminance(baseline, x0, y0, x1, y1);

            if (mean_a - mean_b).abs() > LAYOUT_TOLERANCE {
                diff_blocks += 1;
                for y in y0..y1 {
                    for x in x0..x1 {
                        diff_img.put_pixel(x, y, image::Rgba([255, 0, 0, 255]));
                    }
                }
            }
        }
    }

    let diff_percent = (diff_blocks as f64 / total_blocks as f64) * 100.0;
    let diff_image = if diff_blocks > 0 { Some(diff_img) } else { None };
    (diff_percent, diff_image)
}

fn block_luminance(img: &RgbaImage, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
    let mut sum = 0.0;
    let mut count = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            let p = img.get_pixel(x, y).0;
            sum += 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn pixels_differ(a: &image::Rgba<u8>, b: &image::Rgba<u8>) -> bool {
    for i in 0..4 {
        let delta = (a.0[i] as i32 - b.0[i] as i32).abs();
        if delta > PIXEL_TOLERANCE {
            return true;
        }
    }
    false
}

fn dim(p: &image::Rgba<u8>) -> image::Rgba<u8> {
    image::Rgba([p.0[0] / 2, p.0[1] / 2, p.0[2] / 2, 128])
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Map a display name onto a filesystem-safe path segment.
fn fs_safe(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
