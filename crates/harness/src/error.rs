//! Error types for the visual-testing harness

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Browser session failed to start: {0}")]
    BrowserConnect(String),

    #[error("Visual session open failed for '{test}': {reason}")]
    SessionOpen { test: String, reason: String },

    #[error("Test name already used in this batch: {0}")]
    DuplicateTestName(String),

    #[error("Element not found within {timeout_ms} ms: {locator}")]
    ElementNotFound { locator: String, timeout_ms: u64 },

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Session '{0}' is closed; no further checkpoints may be taken")]
    SessionClosed(String),

    #[error("Unknown visual session: {0}")]
    UnknownSession(String),

    #[error("Visual mismatch in '{test}': {mismatched} mismatched, {unresolved} unresolved")]
    VisualMismatch {
        test: String,
        mismatched: usize,
        unresolved: usize,
    },

    #[error("Cannot aggregate results: {0} session(s) still open")]
    SessionsStillOpen(usize),

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("WebDriver session error: {0}")]
    WebDriverSession(#[from] fantoccini::error::NewSessionError),

    #[error("WebDriver command error: {0}")]
    WebDriver(#[from] fantoccini::error::CmdError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
