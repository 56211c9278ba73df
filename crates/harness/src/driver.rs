//! Browser-automation seam
//!
//! `BrowserDriver` covers exactly the operations the harness consumes from
//! a browser: navigation, element interaction under a bounded implicit
//! wait, viewport screenshots, and quit. `BrowserConnector` constructs
//! drivers per test so suites can swap the real WebDriver client for a
//! test double.

use std::time::Duration;

use async_trait::async_trait;
use fantoccini::ClientBuilder;
use serde_json::json;
use tracing::{debug, info};

use crate::error::{HarnessError, HarnessResult};
use crate::scenario::{Locator, Viewport};

/// Default bound on element-lookup retries.
pub const DEFAULT_IMPLICIT_WAIT: Duration = Duration::from_secs(10);

/// Per-test browser construction options, derived from the suite context.
#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub headless: bool,
    pub viewport: Viewport,
    /// How long element lookups retry before failing the step.
    pub implicit_wait: Duration,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: false,
            viewport: Viewport::default(),
            implicit_wait: DEFAULT_IMPLICIT_WAIT,
        }
    }
}

/// One exclusively-owned browser session.
///
/// Created per test, never shared, and released unconditionally at
/// teardown.
#[async_trait]
pub trait BrowserDriver: Send {
    async fn navigate(&mut self, url: &str) -> HarnessResult<()>;

    /// Send keystrokes to the element found by `locator`.
    async fn send_keys(&mut self, locator: &Locator, text: &str) -> HarnessResult<()>;

    async fn click(&mut self, locator: &Locator) -> HarnessResult<()>;

    /// Capture the current viewport as PNG bytes.
    async fn screenshot(&mut self) -> HarnessResult<Vec<u8>>;

    /// Release the browser. The session is unusable afterwards.
    async fn quit(&mut self) -> HarnessResult<()>;
}

/// Constructs browser sessions for the factory.
#[async_trait]
pub trait BrowserConnector: Send + Sync {
    async fn connect(&self, options: &BrowserOptions) -> HarnessResult<Box<dyn BrowserDriver>>;
}

/// WebDriver-protocol connector speaking to a chromedriver/geckodriver
/// style endpoint.
pub struct WebDriverConnector {
    webdriver_url: String,
}

impl WebDriverConnector {
    pub fn new(webdriver_url: impl Into<String>) -> Self {
        Self {
            webdriver_url: webdriver_url.into(),
        }
    }
}

#[async_trait]
impl BrowserConnector for WebDriverConnector {
    async fn connect(&self, options: &BrowserOptions) -> HarnessResult<Box<dyn BrowserDriver>> {
        info!(
            "Starting browser session ({}, {})",
            if options.headless { "headless" } else { "headed" },
            options.viewport
        );

        let client = ClientBuilder::native()
            .capabilities(chrome_capabilities(options.headless))
            .connect(&self.webdriver_url)
            .await?;

        client
            .set_window_size(options.viewport.width, options.viewport.height)
            .await?;

        Ok(Box::new(WebDriverBrowser {
            client: Some(client),
            implicit_wait: options.implicit_wait,
        }))
    }
}

fn chrome_capabilities(headless: bool) -> serde_json::Map<String, serde_json::Value> {
    let mut args = vec!["--disable-gpu", "--disable-dev-shm-usage", "--no-sandbox"];
    if headless {
        args.push("--headless=new");
    }

    let mut caps = serde_json::Map::new();
    caps.insert("goog:chromeOptions".to_string(), json!({ "args": args }));
    caps
}

/// `BrowserDriver` over a fantoccini WebDriver client.
struct WebDriverBrowser {
    client: Option<fantoccini::Client>,
    implicit_wait: Duration,
}

impl WebDriverBrowser {
    fn client(&self) -> HarnessResult<&fantoccini::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| HarnessError::BrowserConnect("browser already quit".into()))
    }

    /// Element lookup bounded by the implicit wait.
    async fn find(&self, locator: &Locator) -> HarnessResult<fantoccini::elements::Element> {
        let client = self.client()?;
        let fantoccini_locator = match locator {
            Locator::Id(id) => fantoccini::Locator::Id(id.as_str()),
            Locator::Css(css) => fantoccini::Locator::Css(css.as_str()),
        };

        client
            .wait()
            .at_most(self.implicit_wait)
            .for_element(fantoccini_locator)
            .await
            .map_err(|e| {
                debug!("Element lookup failed for {}: {}", locator, e);
                HarnessError::ElementNotFound {
                    locator: locator.to_string(),
                    timeout_ms: self.implicit_wait.as_millis() as u64,
                }
            })
    }
}

#[async_trait]
impl BrowserDriver for WebDriverBrowser {
    async fn navigate(&mut self, url: &str) -> HarnessResult<()> {
        self.client()?.goto(url).await?;
        Ok(())
    }

    async fn send_keys(&mut self, locator: &Locator, text: &str) -> HarnessResult<()> {
        let element = self.find(locator).await?;
        element.send_keys(text).await?;
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> HarnessResult<()> {
        let element = self.find(locator).await?;
        element.click().await?;
        Ok(())
    }

    async fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        // WebDriver captures the viewport; full-page scope is recorded in
        // the checkpoint settings for backends that can honor it.
        let png = self.client()?.screenshot().await?;
        Ok(png)
    }

    async fn quit(&mut self) -> HarnessResult<()> {
        if let Some(mut client) = self.client.take() {
            client.close().await?;
        }
        Ok(())
    }
}
