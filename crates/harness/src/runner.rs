//! Suite orchestration
//!
//! `SuiteRunner` sequences the whole lifecycle: per scenario, the factory
//! opens a paired browser/visual session, the steps run until the first
//! failure, and teardown always follows. Once every scenario has finished,
//! `finish` blocks until all background checkpoint resolutions complete
//! and produces the aggregate summary. `finish` consumes the runner, so
//! aggregation cannot run twice, and it refuses to run while any session
//! is still open.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::aggregate::SuiteSummary;
use crate::context::SuiteContext;
use crate::driver::BrowserConnector;
use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{Scenario, Viewport};
use crate::session::{ClosePolicy, SessionFactory, StepResult};
use crate::visual::VisualBackend;

/// Result of running one scenario.
///
/// Under an async close policy this reflects only setup, interaction, and
/// teardown failures; visual outcomes surface in the [`SuiteSummary`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub error: Option<String>,
}

/// Results of the scenario-execution phase of a suite run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteReport {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteReport {
    /// Persist the scenario results as JSON under `dir`.
    pub fn write_json(&self, dir: &Path) -> HarnessResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("scenario-results.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Scenario results written to: {}", path.display());
        Ok(path)
    }
}

/// Sequential scenario runner bound to one suite context.
pub struct SuiteRunner {
    ctx: Arc<SuiteContext>,
    factory: SessionFactory,
    backend: Arc<dyn VisualBackend>,
    close_policy: ClosePolicy,
}

impl SuiteRunner {
    pub fn new(
        ctx: Arc<SuiteContext>,
        app_name: impl Into<String>,
        connector: Arc<dyn BrowserConnector>,
        backend: Arc<dyn VisualBackend>,
    ) -> Self {
        let factory = SessionFactory::new(
            Arc::clone(&ctx),
            app_name,
            connector,
            Arc::clone(&backend),
        );
        Self {
            ctx,
            factory,
            backend,
            close_policy: ClosePolicy::default(),
        }
    }

    pub fn with_close_policy(mut self, policy: ClosePolicy) -> Self {
        self.close_policy = policy;
        self
    }

    /// Default viewport for sessions without a scenario override.
    pub fn with_viewport(mut self, viewport: Viewport) -> Self {
        self.factory = self.factory.with_viewport(viewport);
        self
    }

    /// Bound on element-lookup retries inside the browser driver.
    pub fn with_implicit_wait(mut self, implicit_wait: Duration) -> Self {
        self.factory = self.factory.with_implicit_wait(implicit_wait);
        self
    }

    /// Access the factory, e.g. to drive sessions manually.
    pub fn factory(&self) -> &SessionFactory {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut SessionFactory {
        &mut self.factory
    }

    /// Run one scenario: open, execute steps until the first failure, tear
    /// down regardless of the outcome.
    pub async fn run_scenario(&mut self, scenario: &Scenario) -> ScenarioResult {
        let start = Instant::now();
        info!("Running scenario: {}", scenario.name);

        let mut session = match self.factory.open(&scenario.name, scenario.viewport).await {
            Ok(session) => session,
            Err(e) => {
                return ScenarioResult {
                    name: scenario.name.clone(),
                    success: false,
                    duration_ms: start.elapsed().as_millis() as u64,
                    steps: Vec::new(),
                    error: Some(e.to_string()),
                };
            }
        };

        let mut steps = Vec::with_capacity(scenario.steps.len());
        let mut scenario_error: Option<String> = None;

        for step in &scenario.steps {
            let result = session.execute_step(step).await;
            let failed = !result.success;
            if failed {
                scenario_error = result.error.clone();
            }
            steps.push(result);
            if failed {
                break;
            }
        }

        // Teardown runs even when a step failed; the browser is always
        // released.
        if let Err(e) = session.teardown(self.close_policy).await {
            if scenario_error.is_none() {
                scenario_error = Some(e.to_string());
            } else {
                error!("Teardown of '{}' also failed: {}", scenario.name, e);
            }
        }

        ScenarioResult {
            name: scenario.name.clone(),
            success: scenario_error.is_none(),
            duration_ms: start.elapsed().as_millis() as u64,
            steps,
            error: scenario_error,
        }
    }

    /// Run scenarios sequentially. A failing scenario does not stop the
    /// rest of the suite.
    pub async fn run_scenarios(&mut self, scenarios: &[Scenario]) -> SuiteReport {
        let start = Instant::now();
        let mut results = Vec::with_capacity(scenarios.len());
        let mut passed = 0;
        let mut failed = 0;

        info!("Running {} scenario(s)...", scenarios.len());

        for scenario in scenarios {
            let result = self.run_scenario(scenario).await;
            if result.success {
                passed += 1;
                info!("✓ {} ({} ms)", result.name, result.duration_ms);
            } else {
                failed += 1;
                error!(
                    "✗ {} - {}",
                    result.name,
                    result.error.as_deref().unwrap_or("unknown error")
                );
            }
            results.push(result);
        }

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "Scenario results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteReport {
            total: scenarios.len(),
            passed,
            failed,
            duration_ms,
            results,
        }
    }

    /// The suite-end aggregation barrier.
    ///
    /// Blocks until every visual session opened during the run reaches a
    /// terminal resolution, then reports the summary. Consuming `self`
    /// makes a second aggregation impossible; sessions still open are a
    /// caller error.
    pub async fn finish(self) -> HarnessResult<SuiteSummary> {
        let ledger = self.factory.ledger();

        let open = ledger.open_count();
        if open > 0 {
            return Err(HarnessError::SessionsStillOpen(open));
        }

        let entries = ledger.sessions();
        info!(
            "Waiting for {} visual session(s) to resolve...",
            entries.len()
        );

        let waits = entries.into_iter().map(|(_, id)| {
            let backend = Arc::clone(&self.backend);
            async move { backend.wait_for_results(&id).await }
        });
        let sessions = futures::future::try_join_all(waits).await?;

        let summary = SuiteSummary::from_sessions(&self.ctx.batch, sessions);
        info!("\n{}", summary);
        Ok(summary)
    }
}
