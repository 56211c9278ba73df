//! VisReg Test Harness
//!
//! Vendor-neutral lifecycle and result aggregation for visual-regression
//! test suites:
//! - Builds a one-time suite context (credential, headless flag, batch)
//! - Pairs a browser session with a visual session per test
//! - Executes declarative scenarios with fire-and-forget checkpoints
//! - Tears sessions down with guaranteed browser release
//! - Blocks once, at suite end, for every asynchronous visual resolution
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SuiteRunner                            │
//! ├──────────────────────────────────────────────────────────────┤
//! │  SuiteContext (once, immutable)                              │
//! │    └── credential, headless flag, batch, session config      │
//! │  per scenario:                                               │
//! │    SessionFactory ──> BrowserDriver + VisualBackend session  │
//! │    steps: navigate / type / click / checkpoint (queued)      │
//! │    teardown: close (async | blocking), quit browser (always) │
//! │  finish (once):                                              │
//! │    await every checkpoint resolution ──> SuiteSummary        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The browser-automation and visual-diffing collaborators sit behind the
//! [`driver::BrowserDriver`] and [`visual::VisualBackend`] traits; the crate
//! ships a WebDriver implementation of the former and a local
//! baseline-store implementation of the latter.

pub mod aggregate;
pub mod context;
pub mod driver;
pub mod error;
pub mod runner;
pub mod scenario;
pub mod session;
pub mod visual;

pub use aggregate::{OutcomeCounts, SuiteSummary};
pub use context::{BatchInfo, SessionConfig, SuiteContext};
pub use driver::{BrowserConnector, BrowserDriver, BrowserOptions, WebDriverConnector};
pub use error::{HarnessError, HarnessResult};
pub use runner::{ScenarioResult, SuiteReport, SuiteRunner};
pub use scenario::{Locator, Scenario, ScenarioStep, Viewport};
pub use session::{ClosePolicy, SessionFactory, SessionLedger, StepResult, TestSession};
pub use visual::{
    CheckpointOutcome, CheckpointResult, CheckpointSettings, LocalStoreConfig, LocalVisualBackend,
    MatchLevel, Scope, SessionId, SessionResults, SessionSpec, VisualBackend,
};
