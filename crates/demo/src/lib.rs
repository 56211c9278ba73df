//! Demo suite for a dummy banking app.
//!
//! The interactions are ordinary browser steps; the verifications are
//! one-line visual checkpoints. If a page ever changes, the mismatch shows
//! up in the suite summary instead of in hand-written assertions that
//! scrape the page for text.

use visreg_harness::{Locator, MatchLevel, Scenario, ScenarioStep, Scope};

/// Application name shared by every test in this suite.
pub const APP_NAME: &str = "ACME Bank Web App";

/// Login flow with two full-page checkpoints.
///
/// The main-page checkpoint uses the layout match level: the page shows a
/// closing-time banner whose text changes, which layout comparison
/// tolerates while still flagging structural changes.
pub fn login_scenario(base_url: &str) -> Scenario {
    Scenario {
        name: "log-into-bank-account".into(),
        description: "Log into the demo bank and verify both pages".into(),
        tags: vec!["smoke".into()],
        viewport: None,
        steps: vec![
            ScenarioStep::Navigate {
                url: base_url.into(),
            },
            ScenarioStep::Checkpoint {
                name: "Login page".into(),
                scope: Scope::FullPage,
                match_level: MatchLevel::Strict,
            },
            ScenarioStep::Type {
                locator: Locator::Id("username".into()),
                text: "applibot".into(),
            },
            ScenarioStep::Type {
                locator: Locator::Id("password".into()),
                text: "I<3VisualTests".into(),
            },
            ScenarioStep::Click {
                locator: Locator::Id("log-in".into()),
            },
            ScenarioStep::Checkpoint {
                name: "Main page".into(),
                scope: Scope::FullPage,
                match_level: MatchLevel::Layout,
            },
        ],
    }
}
