//! Mock browser and visual-backend collaborators for lifecycle tests.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use image::RgbaImage;
use tokio::task::JoinHandle;

use visreg_harness::{
    BrowserConnector, BrowserDriver, BrowserOptions, CheckpointOutcome, CheckpointResult,
    CheckpointSettings, HarnessError, HarnessResult, Locator, SessionId, SessionResults,
    SessionSpec, VisualBackend,
};

/// Shared log of browser operations, in call order.
pub type OpLog = Arc<Mutex<Vec<String>>>;

pub fn op_log() -> OpLog {
    Arc::new(Mutex::new(Vec::new()))
}

pub fn log_contains(log: &OpLog, needle: &str) -> bool {
    log.lock().unwrap().iter().any(|op| op.contains(needle))
}

/// Encode a solid-color image as PNG bytes.
pub fn png_bytes(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = RgbaImage::from_pixel(width, height, image::Rgba(rgba));
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .expect("encode png");
    buf
}

/// Browser connector handing out scripted mock drivers.
pub struct MockConnector {
    log: OpLog,
    fail_connect: bool,
    fail_click_on: Option<String>,
}

impl MockConnector {
    pub fn new(log: OpLog) -> Self {
        Self {
            log,
            fail_connect: false,
            fail_click_on: None,
        }
    }

    pub fn failing_to_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Fail any click on the locator with this display form (e.g. "#log-in").
    pub fn failing_click_on(mut self, locator: &str) -> Self {
        self.fail_click_on = Some(locator.to_string());
        self
    }
}

#[async_trait]
impl BrowserConnector for MockConnector {
    async fn connect(&self, _options: &BrowserOptions) -> HarnessResult<Box<dyn BrowserDriver>> {
        if self.fail_connect {
            return Err(HarnessError::BrowserConnect("mock connect refused".into()));
        }
        self.log.lock().unwrap().push("connect".to_string());
        Ok(Box::new(MockBrowser {
            log: Arc::clone(&self.log),
            fail_click_on: self.fail_click_on.clone(),
        }))
    }
}

struct MockBrowser {
    log: OpLog,
    fail_click_on: Option<String>,
}

impl MockBrowser {
    fn record(&self, op: String) {
        self.log.lock().unwrap().push(op);
    }
}

#[async_trait]
impl BrowserDriver for MockBrowser {
    async fn navigate(&mut self, url: &str) -> HarnessResult<()> {
        self.record(format!("navigate:{}", url));
        Ok(())
    }

    async fn send_keys(&mut self, locator: &Locator, _text: &str) -> HarnessResult<()> {
        self.record(format!("type:{}", locator));
        Ok(())
    }

    async fn click(&mut self, locator: &Locator) -> HarnessResult<()> {
        let display = locator.to_string();
        if self.fail_click_on.as_deref() == Some(display.as_str()) {
            return Err(HarnessError::ElementNotFound {
                locator: display,
                timeout_ms: 10_000,
            });
        }
        self.record(format!("click:{}", display));
        Ok(())
    }

    async fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        self.record("screenshot".to_string());
        Ok(png_bytes(8, 8, [255, 255, 255, 255]))
    }

    async fn quit(&mut self) -> HarnessResult<()> {
        self.record("quit".to_string());
        Ok(())
    }
}

struct MockSession {
    test_name: String,
    batch_id: String,
    closed: bool,
    pending: Vec<JoinHandle<CheckpointResult>>,
    resolved: Vec<CheckpointResult>,
}

/// Visual backend resolving checkpoints to scripted outcomes after an
/// artificial delay, for exercising the fire-and-forget contract.
pub struct MockVisualBackend {
    delay: Duration,
    fail_open: bool,
    outcomes: Mutex<HashMap<String, CheckpointOutcome>>,
    sessions: Mutex<HashMap<SessionId, MockSession>>,
    resolved_count: Arc<AtomicUsize>,
}

impl MockVisualBackend {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            fail_open: false,
            outcomes: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            resolved_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn failing_to_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Script the outcome for a checkpoint name; unscripted names resolve
    /// `Matched`.
    pub fn script(&self, checkpoint: &str, outcome: CheckpointOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(checkpoint.to_string(), outcome);
    }

    /// Comparisons that have finished resolving.
    pub fn resolved_count(&self) -> usize {
        self.resolved_count.load(Ordering::SeqCst)
    }

    /// Batch ids observed at session open, one per session.
    pub fn batch_ids(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .map(|s| s.batch_id.clone())
            .collect()
    }
}

#[async_trait]
impl VisualBackend for MockVisualBackend {
    async fn open(&self, spec: SessionSpec) -> HarnessResult<SessionId> {
        if self.fail_open {
            return Err(HarnessError::SessionOpen {
                test: spec.test_name,
                reason: "mock backend rejected the credential".into(),
            });
        }

        let id = SessionId::generate();
        self.sessions.lock().unwrap().insert(
            id.clone(),
            MockSession {
                test_name: spec.test_name,
                batch_id: spec.config.batch.id.clone(),
                closed: false,
                pending: Vec::new(),
                resolved: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn submit(
        &self,
        id: &SessionId,
        _screenshot: Vec<u8>,
        settings: CheckpointSettings,
    ) -> HarnessResult<()> {
        {
            let sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get(id)
                .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
            if session.closed {
                return Err(HarnessError::SessionClosed(session.test_name.clone()));
            }
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&settings.name)
            .copied()
            .unwrap_or(CheckpointOutcome::Matched);

        let delay = self.delay;
        let counter = Arc::clone(&self.resolved_count);
        let name = settings.name.clone();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            counter.fetch_add(1, Ordering::SeqCst);
            CheckpointResult {
                name,
                outcome,
                diff_percent: match outcome {
                    CheckpointOutcome::Mismatched => 3.4,
                    _ => 0.0,
                },
                diff_image_path: None,
                detail: None,
            }
        });

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
        session.pending.push(handle);
        Ok(())
    }

    async fn close(&self, id: &SessionId) -> HarnessResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
        session.closed = true;
        Ok(())
    }

    async fn wait_for_results(&self, id: &SessionId) -> HarnessResult<SessionResults> {
        let (test_name, pending) = {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions
                .get_mut(id)
                .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
            (session.test_name.clone(), std::mem::take(&mut session.pending))
        };

        let mut newly_resolved = Vec::with_capacity(pending.len());
        for handle in pending {
            newly_resolved.push(handle.await.expect("mock resolution task"));
        }

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| HarnessError::UnknownSession(id.to_string()))?;
        session.resolved.extend(newly_resolved);

        Ok(SessionResults {
            test_name,
            checkpoints: session.resolved.clone(),
        })
    }
}
