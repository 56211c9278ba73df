//! Declarative test scenarios
//!
//! A scenario is the scripted interaction + checkpoint sequence for one test
//! case: navigation and element interactions against the browser session,
//! interleaved with visual checkpoints. Scenarios can be built in code or
//! parsed from YAML files.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, HarnessResult};
use crate::visual::{MatchLevel, Scope};

/// Browser viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
        }
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Element locator strategies consumed by the browser driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Locator {
    /// Locate by element id attribute.
    Id(String),
    /// Locate by CSS selector.
    Css(String),
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Id(id) => write!(f, "#{}", id),
            Locator::Css(css) => write!(f, "{}", css),
        }
    }
}

/// A single step in a scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Navigate the browser to a URL.
    Navigate { url: String },

    /// Send keystrokes to an element.
    Type { locator: Locator, text: String },

    /// Click an element.
    Click { locator: Locator },

    /// Take a visual checkpoint.
    ///
    /// Checkpoints enqueue a comparison with the visual backend and return
    /// without waiting for resolution. The name must be unique within the
    /// test.
    Checkpoint {
        name: String,
        #[serde(default)]
        scope: Scope,
        #[serde(default)]
        match_level: MatchLevel,
    },
}

impl ScenarioStep {
    /// Short label used in logs and step results.
    pub fn label(&self) -> String {
        match self {
            ScenarioStep::Navigate { url } => format!("navigate:{}", url),
            ScenarioStep::Type { locator, .. } => format!("type:{}", locator),
            ScenarioStep::Click { locator } => format!("click:{}", locator),
            ScenarioStep::Checkpoint { name, .. } => format!("checkpoint:{}", name),
        }
    }
}

/// A complete test scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this test within the batch.
    pub name: String,

    /// Human-readable description.
    #[serde(default)]
    pub description: String,

    /// Tags for filtering.
    #[serde(default)]
    pub tags: Vec<String>,

    /// Viewport override; the factory default applies when absent.
    #[serde(default)]
    pub viewport: Option<Viewport>,

    /// Steps to execute in order.
    pub steps: Vec<ScenarioStep>,
}

impl Scenario {
    pub fn from_yaml(yaml: &str) -> HarnessResult<Self> {
        serde_yaml::from_str(yaml).map_err(HarnessError::from)
    }

    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Load every `.yaml`/`.yml` scenario under a directory.
    pub fn load_all(dir: &Path) -> HarnessResult<Vec<Self>> {
        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            let scenario = Self::from_file(entry.path()).map_err(|e| {
                HarnessError::ScenarioParse(format!("{}: {}", entry.path().display(), e))
            })?;
            scenarios.push(scenario);
        }

        Ok(scenarios)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Number of checkpoint steps in this scenario.
    pub fn checkpoint_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| matches!(s, ScenarioStep::Checkpoint { .. }))
            .count()
    }
}
