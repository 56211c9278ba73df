//! Per-test session lifecycle
//!
//! `SessionFactory` pairs a fresh browser session with a visual session for
//! each test; `TestSession` executes steps and takes checkpoints;
//! `TestSession::teardown` closes the visual session per the chosen policy
//! and releases the browser unconditionally. The `SessionLedger` tracks
//! which sessions were opened and which have been torn down, backing the
//! suite-end aggregation barrier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::SuiteContext;
use crate::driver::{BrowserConnector, BrowserDriver, BrowserOptions, DEFAULT_IMPLICIT_WAIT};
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{ScenarioStep, Viewport};
use crate::visual::{CheckpointSettings, SessionId, SessionSpec, VisualBackend};

/// How teardown treats the visual session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Signal close and return without waiting for resolution. Visual
    /// outcomes surface only in the suite summary, decoupled from the
    /// test's own pass/fail.
    #[default]
    Async,
    /// Wait for all of this session's checkpoints to resolve; mismatched or
    /// unresolved checkpoints fail the test at teardown.
    Blocking,
}

/// Result of one executed step, recorded in call order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

/// Open/closed accounting for every session of the batch.
///
/// The aggregator refuses to run while any entry is still open.
#[derive(Default)]
pub struct SessionLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

struct LedgerEntry {
    test_name: String,
    id: SessionId,
    closed: bool,
}

impl SessionLedger {
    fn register(&self, test_name: &str, id: SessionId) {
        self.entries.lock().push(LedgerEntry {
            test_name: test_name.to_string(),
            id,
            closed: false,
        });
    }

    fn mark_closed(&self, id: &SessionId) {
        let mut entries = self.entries.lock();
        if let Some(entry) = entries.iter_mut().find(|e| e.id == *id) {
            entry.closed = true;
        }
    }

    /// Sessions opened but not yet torn down.
    pub fn open_count(&self) -> usize {
        self.entries.lock().iter().filter(|e| !e.closed).count()
    }

    /// All sessions of the batch, in open order.
    pub fn sessions(&self) -> Vec<(String, SessionId)> {
        self.entries
            .lock()
            .iter()
            .map(|e| (e.test_name.clone(), e.id.clone()))
            .collect()
    }
}

/// Per-test construction of paired browser and visual sessions.
pub struct SessionFactory {
    ctx: Arc<SuiteContext>,
    app_name: String,
    viewport: Viewport,
    implicit_wait: Duration,
    connector: Arc<dyn BrowserConnector>,
    backend: Arc<dyn VisualBackend>,
    ledger: Arc<SessionLedger>,
    used_names: HashSet<String>,
}

impl SessionFactory {
    pub fn new(
        ctx: Arc<SuiteContext>,
        app_name: impl Into<String>,
        connector: Arc<dyn BrowserConnector>,
        backend: Arc<dyn VisualBackend>,
    ) -> Self {
        Self {
            ctx,
            app_name: app_name.into(),
            viewport: Viewport::default(),
            implicit_wait: DEFAULT_IMPLICIT_WAIT,
            connector,
            backend,
            ledger: Arc::new(SessionLedger::default()),
            used_names: HashSet::new(),
        }
    }

    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.viewport = viewport;
        self
    }

    pub fn with_implicit_wait(mut self, implicit_wait: Duration) -> Self {
        self.implicit_wait = implicit_wait;
        self
    }

    pub fn ledger(&self) -> Arc<SessionLedger> {
        Arc::clone(&self.ledger)
    }

    /// Open the browser and the visual session for one test.
    ///
    /// Test names must be unique within the batch. The browser launches
    /// first; if the visual open then fails, the browser is released before
    /// the error propagates.
    pub async fn open(
        &mut self,
        test_name: &str,
        viewport_override: Option<Viewport>,
    ) -> HarnessResult<TestSession> {
        if !self.used_names.insert(test_name.to_string()) {
            return Err(HarnessError::DuplicateTestName(test_name.to_string()));
        }

        let viewport = viewport_override.unwrap_or(self.viewport);
        let options = BrowserOptions {
            headless: self.ctx.headless,
            viewport,
            implicit_wait: self.implicit_wait,
        };

        let mut driver = self.connector.connect(&options).await?;

        let spec = SessionSpec {
            app_name: self.app_name.clone(),
            test_name: test_name.to_string(),
            viewport,
            config: self.ctx.config.clone(),
        };

        let id = match self.backend.open(spec).await {
            Ok(id) => id,
            Err(e) => {
                // The browser must not leak when the visual open fails.
                if let Err(quit_err) = driver.quit().await {
                    warn!("Browser release after failed open also failed: {}", quit_err);
                }
                return Err(e);
            }
        };

        self.ledger.register(test_name, id.clone());
        info!("Session '{}' open ({})", test_name, id);

        Ok(TestSession {
            test_name: test_name.to_string(),
            id,
            driver: Some(driver),
            backend: Arc::clone(&self.backend),
            ledger: Arc::clone(&self.ledger),
            checkpoint_names: HashSet::new(),
        })
    }
}

/// One test's paired browser + visual session.
///
/// Obtain from [`SessionFactory::open`]; consume with [`TestSession::teardown`].
pub struct TestSession {
    test_name: String,
    id: SessionId,
    driver: Option<Box<dyn BrowserDriver>>,
    backend: Arc<dyn VisualBackend>,
    ledger: Arc<SessionLedger>,
    checkpoint_names: HashSet<String>,
}

impl TestSession {
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    pub fn session_id(&self) -> &SessionId {
        &self.id
    }

    fn driver_mut(&mut self) -> HarnessResult<&mut Box<dyn BrowserDriver>> {
        self.driver
            .as_mut()
            .ok_or_else(|| HarnessError::SessionClosed(self.test_name.clone()))
    }

    /// Execute one scenario step, folding failures into the result.
    pub async fn execute_step(&mut self, step: &ScenarioStep) -> StepResult {
        let start = Instant::now();
        let label = step.label();
        debug!("Executing step: {}", label);

        let outcome = self.apply(step).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(()) => StepResult {
                step: label,
                success: true,
                duration_ms,
                error: None,
            },
            Err(e) => StepResult {
                step: label,
                success: false,
                duration_ms,
                error: Some(e.to_string()),
            },
        }
    }

    async fn apply(&mut self, step: &ScenarioStep) -> HarnessResult<()> {
        match step {
            ScenarioStep::Navigate { url } => self.driver_mut()?.navigate(url).await,
            ScenarioStep::Type { locator, text } => {
                self.driver_mut()?.send_keys(locator, text).await
            }
            ScenarioStep::Click { locator } => self.driver_mut()?.click(locator).await,
            ScenarioStep::Checkpoint {
                name,
                scope,
                match_level,
            } => {
                self.checkpoint(CheckpointSettings {
                    name: name.clone(),
                    scope: *scope,
                    match_level: *match_level,
                })
                .await
            }
        }
    }

    /// Capture a screenshot and enqueue its comparison.
    ///
    /// Fire-and-forget: returns once the comparison is queued. Checkpoints
    /// are recorded in call order within this session.
    pub async fn checkpoint(&mut self, settings: CheckpointSettings) -> HarnessResult<()> {
        if !self.checkpoint_names.insert(settings.name.clone()) {
            warn!(
                "Checkpoint name '{}' reused within test '{}'; both submissions are kept",
                settings.name, self.test_name
            );
        }

        let screenshot = self.driver_mut()?.screenshot().await?;
        self.backend.submit(&self.id, screenshot, settings).await
    }

    /// Conclude the test's sessions.
    ///
    /// Signals the visual session first, then releases the browser
    /// unconditionally; a close failure (including a blocking-close
    /// mismatch) surfaces only after the browser is gone.
    pub async fn teardown(mut self, policy: ClosePolicy) -> HarnessResult<()> {
        let close_result = self.close_visual(policy).await;

        let quit_result = match self.driver.take() {
            Some(mut driver) => driver.quit().await,
            None => Ok(()),
        };

        self.ledger.mark_closed(&self.id);
        debug!("Session '{}' torn down", self.test_name);

        close_result?;
        quit_result
    }

    async fn close_visual(&mut self, policy: ClosePolicy) -> HarnessResult<()> {
        self.backend.close(&self.id).await?;

        if policy == ClosePolicy::Blocking {
            let results = self.backend.wait_for_results(&self.id).await?;
            let counts = results.counts();
            if !counts.clean() {
                return Err(HarnessError::VisualMismatch {
                    test: self.test_name.clone(),
                    mismatched: counts.mismatched,
                    unresolved: counts.unresolved,
                });
            }
        }

        Ok(())
    }
}
