use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use pressroom_api_types::RenderPayload;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::codes::ErrorCode;
use crate::domain::types::ArtifactSlot;

use super::engine::{BrowserEngine, EngineError};
use super::session::{CancelOnDrop, CancellationFlag, RenderSession};

const METRIC_RENDER_TOTAL: &str = "pressroom_render_total";
const METRIC_RENDER_MS: &str = "pressroom_render_ms";

/// Global the render target reads its payload from.
pub const PAYLOAD_GLOBAL: &str = "__PRINT_PAYLOAD__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderStage {
    Launch,
    Connect,
    InjectPayload,
    Navigate,
    AwaitReadySignal,
    AwaitFontsReady,
    ApplyPrintMedia,
    CleanupDom,
    Capture,
}

impl RenderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderStage::Launch => "launch",
            RenderStage::Connect => "connect",
            RenderStage::InjectPayload => "inject_payload",
            RenderStage::Navigate => "navigate",
            RenderStage::AwaitReadySignal => "await_ready_signal",
            RenderStage::AwaitFontsReady => "await_fonts_ready",
            RenderStage::ApplyPrintMedia => "apply_print_media",
            RenderStage::CleanupDom => "cleanup_dom",
            RenderStage::Capture => "capture",
        }
    }
}

impl fmt::Display for RenderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render stage `{stage}` failed: {message}")]
    Stage { stage: RenderStage, message: String },
    #[error("render stage `{stage}` timed out")]
    Timeout { stage: RenderStage },
    #[error("render cancelled before stage `{stage}`")]
    Cancelled { stage: RenderStage },
    #[error("render exceeded its deadline of {0:?}")]
    Deadline(Duration),
    #[error("render payload could not be encoded: {0}")]
    Payload(String),
    #[error("render worker panicked: {0}")]
    Panicked(String),
}

impl RenderError {
    fn from_engine(stage: RenderStage, err: EngineError) -> Self {
        match err {
            EngineError::Timeout(_) => RenderError::Timeout { stage },
            EngineError::Failed(message) => RenderError::Stage { stage, message },
        }
    }

    /// Transient failures worth another attempt after backoff.
    pub fn is_retryable(&self) -> bool {
        match self {
            RenderError::Stage { stage, .. } => matches!(
                stage,
                RenderStage::Launch | RenderStage::Connect | RenderStage::Navigate
            ),
            RenderError::Timeout { .. }
            | RenderError::Cancelled { .. }
            | RenderError::Deadline(_) => true,
            RenderError::Payload(_) | RenderError::Panicked(_) => false,
        }
    }

    pub fn error_code(&self) -> ErrorCode {
        match self {
            RenderError::Timeout { .. }
            | RenderError::Cancelled { .. }
            | RenderError::Deadline(_) => ErrorCode::RenderTimeout,
            _ => ErrorCode::RenderFailed,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            RenderError::Stage { .. } => "stage_error",
            RenderError::Timeout { .. } => "timeout",
            RenderError::Cancelled { .. } => "cancelled",
            RenderError::Deadline(_) => "deadline",
            RenderError::Payload(_) => "payload",
            RenderError::Panicked(_) => "panic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureSpec {
    Pdf,
    Screenshot,
}

impl From<ArtifactSlot> for CaptureSpec {
    fn from(slot: ArtifactSlot) -> Self {
        match slot {
            ArtifactSlot::Pdf => CaptureSpec::Pdf,
            ArtifactSlot::Preview => CaptureSpec::Screenshot,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderTimeouts {
    pub navigation: Duration,
    pub ready_signal: Duration,
    pub fonts: Duration,
    pub capture: Duration,
    pub overall: Duration,
}

impl Default for RenderTimeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            ready_signal: Duration::from_secs(20),
            fonts: Duration::from_secs(3),
            capture: Duration::from_secs(30),
            overall: Duration::from_secs(90),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub ready_selector: String,
    pub preview_selector: String,
    pub cleanup_selectors: Vec<String>,
    pub jpeg_quality: u32,
    pub timeouts: RenderTimeouts,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            ready_selector: "#print-ready".to_string(),
            preview_selector: "#print-root".to_string(),
            cleanup_selectors: vec!["[data-dev-overlay]".to_string()],
            jpeg_quality: 85,
            timeouts: RenderTimeouts::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Render target; carries only an opaque job reference.
    pub target_url: String,
    /// Extra request headers, typically the internal shared secret.
    pub headers: Vec<(String, String)>,
    pub payload: RenderPayload,
    pub capture: CaptureSpec,
}

/// Drives one engine session per render through the fixed stage sequence.
#[derive(Clone)]
pub struct RenderOrchestrator {
    engine: Arc<dyn BrowserEngine>,
    settings: RenderSettings,
}

impl RenderOrchestrator {
    pub fn new(engine: Arc<dyn BrowserEngine>, settings: RenderSettings) -> Self {
        Self { engine, settings }
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    pub async fn render(&self, request: RenderRequest) -> Result<Vec<u8>, RenderError> {
        self.render_with_cancel(request, CancellationFlag::new())
            .await
    }

    /// Renders on a blocking thread under the overall deadline.
    ///
    /// Cancelling `cancel`, hitting the deadline or dropping the returned future all stop the
    /// session at its next stage boundary; the session is torn down in every case.
    pub async fn render_with_cancel(
        &self,
        request: RenderRequest,
        cancel: CancellationFlag,
    ) -> Result<Vec<u8>, RenderError> {
        let _cancel_on_drop = CancelOnDrop(cancel.clone());
        let started_at = Instant::now();
        let overall = self.settings.timeouts.overall;
        let capture = request.capture;

        let engine = Arc::clone(&self.engine);
        let settings = self.settings.clone();
        let flag = cancel.clone();
        let handle = tokio::task::spawn_blocking(move || {
            run_session(engine.as_ref(), &settings, request, &flag)
        });

        let outcome = match tokio::time::timeout(overall, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RenderError::Panicked(join_err.to_string())),
            Err(_) => {
                cancel.cancel();
                Err(RenderError::Deadline(overall))
            }
        };

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        let result_label = match &outcome {
            Ok(_) => "ok",
            Err(err) => err.metric_label(),
        };
        counter!(METRIC_RENDER_TOTAL, "result" => result_label).increment(1);
        histogram!(METRIC_RENDER_MS).record(elapsed_ms as f64);

        match &outcome {
            Ok(bytes) => info!(
                target = "pressroom::application::render",
                op = "render",
                result = "ok",
                capture = ?capture,
                elapsed_ms,
                bytes = bytes.len(),
                "Render completed"
            ),
            Err(err) => warn!(
                target = "pressroom::application::render",
                op = "render",
                result = result_label,
                capture = ?capture,
                elapsed_ms,
                retryable = err.is_retryable(),
                error = %err,
                "Render failed"
            ),
        }

        outcome
    }
}

fn injection_script(payload: &RenderPayload) -> Result<String, RenderError> {
    let json =
        serde_json::to_string(payload).map_err(|err| RenderError::Payload(err.to_string()))?;
    Ok(format!(
        "Object.defineProperty(window, '{PAYLOAD_GLOBAL}', {{ value: {json}, writable: false }});"
    ))
}

fn step<T>(
    stage: RenderStage,
    cancel: &CancellationFlag,
    op: impl FnOnce() -> Result<T, EngineError>,
) -> Result<T, RenderError> {
    if cancel.is_cancelled() {
        return Err(RenderError::Cancelled { stage });
    }
    let started_at = Instant::now();
    let result = op();
    debug!(
        target = "pressroom::application::render",
        stage = stage.as_str(),
        result = if result.is_ok() { "ok" } else { "error" },
        elapsed_ms = started_at.elapsed().as_millis() as u64,
        "Render stage finished"
    );
    result.map_err(|err| RenderError::from_engine(stage, err))
}

/// Best-effort stages log and continue unless the render was cancelled.
fn soft_step(
    stage: RenderStage,
    cancel: &CancellationFlag,
    op: impl FnOnce() -> Result<(), EngineError>,
) -> Result<(), RenderError> {
    match step(stage, cancel, op) {
        Err(err @ RenderError::Cancelled { .. }) => Err(err),
        Err(err) => {
            warn!(
                target = "pressroom::application::render",
                stage = stage.as_str(),
                error = %err,
                "Best-effort render stage did not complete; continuing"
            );
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn run_session(
    engine: &dyn BrowserEngine,
    settings: &RenderSettings,
    request: RenderRequest,
    cancel: &CancellationFlag,
) -> Result<Vec<u8>, RenderError> {
    let timeouts = &settings.timeouts;
    let script = injection_script(&request.payload)?;

    debug!(
        target = "pressroom::application::render",
        remote = engine.is_remote(),
        "Starting render session"
    );
    let browser = step(RenderStage::Launch, cancel, || engine.launch())?;
    let mut session = RenderSession::new(browser);

    let page = step(RenderStage::Connect, cancel, || {
        session.browser_mut().open_page()
    })?;
    session.attach_page(page);
    let Some(page) = session.page_mut() else {
        return Err(RenderError::Stage {
            stage: RenderStage::Connect,
            message: "page handle missing after attach".to_string(),
        });
    };

    step(RenderStage::InjectPayload, cancel, || {
        page.add_init_script(&script)
    })?;
    step(RenderStage::Navigate, cancel, || {
        page.set_extra_headers(&request.headers)?;
        page.navigate(&request.target_url, timeouts.navigation)
    })?;
    step(RenderStage::AwaitReadySignal, cancel, || {
        page.wait_for_selector(&settings.ready_selector, timeouts.ready_signal)
    })?;
    soft_step(RenderStage::AwaitFontsReady, cancel, || {
        page.wait_for_fonts(timeouts.fonts)
    })?;
    step(RenderStage::ApplyPrintMedia, cancel, || {
        page.emulate_print_media()
    })?;
    if !settings.cleanup_selectors.is_empty() {
        soft_step(RenderStage::CleanupDom, cancel, || {
            page.remove_elements(&settings.cleanup_selectors)
        })?;
    }

    step(RenderStage::Capture, cancel, || match request.capture {
        CaptureSpec::Pdf => page.print_pdf(timeouts.capture),
        CaptureSpec::Screenshot => page.screenshot(
            &settings.preview_selector,
            settings.jpeg_quality,
            timeouts.capture,
        ),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use pressroom_api_types::PrintWarning;
    use serde_json::json;

    use super::*;
    use crate::application::render::engine::{EngineBrowser, EnginePage};

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Fault {
        None,
        LaunchFails,
        NavigateFails,
        ReadyTimesOut,
        ReadyHangs,
        FontsTimeOut,
        CapturePanics,
    }

    type Log = Arc<Mutex<Vec<String>>>;

    struct FakeEngine {
        log: Log,
        fault: Fault,
    }

    struct FakeBrowser {
        log: Log,
        fault: Fault,
    }

    struct FakePage {
        log: Log,
        fault: Fault,
    }

    fn push(log: &Log, entry: impl Into<String>) {
        log.lock().expect("log lock").push(entry.into());
    }

    impl BrowserEngine for FakeEngine {
        fn launch(&self) -> Result<Box<dyn EngineBrowser>, EngineError> {
            push(&self.log, "launch");
            if self.fault == Fault::LaunchFails {
                return Err(EngineError::failed("no chromium binary"));
            }
            Ok(Box::new(FakeBrowser {
                log: Arc::clone(&self.log),
                fault: self.fault,
            }))
        }
    }

    impl EngineBrowser for FakeBrowser {
        fn open_page(&mut self) -> Result<Box<dyn EnginePage>, EngineError> {
            push(&self.log, "open_page");
            Ok(Box::new(FakePage {
                log: Arc::clone(&self.log),
                fault: self.fault,
            }))
        }

        fn close(&mut self) {
            push(&self.log, "browser.close");
        }
    }

    impl EnginePage for FakePage {
        fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<(), EngineError> {
            push(&self.log, format!("headers:{}", headers.len()));
            Ok(())
        }

        fn add_init_script(&mut self, source: &str) -> Result<(), EngineError> {
            assert!(source.contains(PAYLOAD_GLOBAL));
            push(&self.log, "init_script");
            Ok(())
        }

        fn navigate(&mut self, url: &str, _: Duration) -> Result<(), EngineError> {
            push(&self.log, format!("navigate:{url}"));
            if self.fault == Fault::NavigateFails {
                return Err(EngineError::failed("net::ERR_CONNECTION_REFUSED"));
            }
            Ok(())
        }

        fn wait_for_selector(&mut self, _: &str, _: Duration) -> Result<(), EngineError> {
            push(&self.log, "ready");
            match self.fault {
                Fault::ReadyTimesOut => Err(EngineError::Timeout("ready marker".into())),
                Fault::ReadyHangs => {
                    std::thread::sleep(Duration::from_millis(300));
                    Ok(())
                }
                _ => Ok(()),
            }
        }

        fn wait_for_fonts(&mut self, _: Duration) -> Result<(), EngineError> {
            push(&self.log, "fonts");
            if self.fault == Fault::FontsTimeOut {
                return Err(EngineError::Timeout("document.fonts.ready".into()));
            }
            Ok(())
        }

        fn emulate_print_media(&mut self) -> Result<(), EngineError> {
            push(&self.log, "print_media");
            Ok(())
        }

        fn remove_elements(&mut self, _: &[String]) -> Result<(), EngineError> {
            push(&self.log, "cleanup");
            Ok(())
        }

        fn print_pdf(&mut self, _: Duration) -> Result<Vec<u8>, EngineError> {
            push(&self.log, "pdf");
            if self.fault == Fault::CapturePanics {
                panic!("capture exploded");
            }
            Ok(b"%PDF-1.7".to_vec())
        }

        fn screenshot(&mut self, _: &str, quality: u32, _: Duration) -> Result<Vec<u8>, EngineError> {
            push(&self.log, format!("screenshot:{quality}"));
            Ok(vec![0xFF, 0xD8, 0xFF])
        }

        fn close(&mut self) {
            push(&self.log, "page.close");
        }
    }

    fn orchestrator(fault: Fault, overall: Duration) -> (RenderOrchestrator, Log) {
        let log: Log = Arc::default();
        let engine = FakeEngine {
            log: Arc::clone(&log),
            fault,
        };
        let settings = RenderSettings {
            timeouts: RenderTimeouts {
                overall,
                ..RenderTimeouts::default()
            },
            ..RenderSettings::default()
        };
        (RenderOrchestrator::new(Arc::new(engine), settings), log)
    }

    fn request(capture: CaptureSpec) -> RenderRequest {
        RenderRequest {
            target_url: "http://127.0.0.1:3100/internal/resumes/print/42".to_string(),
            headers: vec![("x-internal-secret".to_string(), "s3cret".to_string())],
            payload: RenderPayload {
                layout_settings: json!({}),
                items: Vec::new(),
                warnings: vec![PrintWarning::resource_missing("user-assets/7/x.png")],
            },
            capture,
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().expect("log lock").clone()
    }

    fn assert_torn_down(log: &Log) {
        let entries = entries(log);
        let page = entries.iter().position(|e| e == "page.close");
        let browser = entries.iter().position(|e| e == "browser.close");
        assert!(page.is_some(), "page not closed: {entries:?}");
        assert!(page < browser, "page must close before browser: {entries:?}");
        assert_eq!(entries.last().map(String::as_str), Some("browser.close"));
    }

    #[tokio::test]
    async fn pdf_render_runs_stages_in_order_and_tears_down() {
        let (orchestrator, log) = orchestrator(Fault::None, Duration::from_secs(5));

        let bytes = orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect("render");

        assert_eq!(bytes, b"%PDF-1.7");
        assert_eq!(
            entries(&log),
            vec![
                "launch",
                "open_page",
                "init_script",
                "headers:1",
                "navigate:http://127.0.0.1:3100/internal/resumes/print/42",
                "ready",
                "fonts",
                "print_media",
                "cleanup",
                "pdf",
                "page.close",
                "browser.close",
            ]
        );
    }

    #[tokio::test]
    async fn screenshot_uses_configured_quality() {
        let (orchestrator, log) = orchestrator(Fault::None, Duration::from_secs(5));
        orchestrator
            .render(request(CaptureSpec::Screenshot))
            .await
            .expect("render");
        assert!(entries(&log).contains(&"screenshot:85".to_string()));
    }

    #[tokio::test]
    async fn launch_failure_is_retryable() {
        let (orchestrator, log) = orchestrator(Fault::LaunchFails, Duration::from_secs(5));
        let err = orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect_err("launch fails");
        assert!(matches!(
            err,
            RenderError::Stage {
                stage: RenderStage::Launch,
                ..
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(entries(&log), vec!["launch"]);
    }

    #[tokio::test]
    async fn navigation_failure_still_tears_down() {
        let (orchestrator, log) = orchestrator(Fault::NavigateFails, Duration::from_secs(5));
        let err = orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect_err("navigate fails");
        assert!(err.is_retryable());
        assert_torn_down(&log);
    }

    #[tokio::test]
    async fn ready_timeout_is_retryable_and_torn_down() {
        let (orchestrator, log) = orchestrator(Fault::ReadyTimesOut, Duration::from_secs(5));
        let err = orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect_err("ready times out");
        assert!(matches!(
            err,
            RenderError::Timeout {
                stage: RenderStage::AwaitReadySignal
            }
        ));
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), ErrorCode::RenderTimeout);
        assert_torn_down(&log);
    }

    #[tokio::test]
    async fn font_timeout_is_not_fatal() {
        let (orchestrator, log) = orchestrator(Fault::FontsTimeOut, Duration::from_secs(5));
        orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect("fonts are best effort");
        assert!(entries(&log).contains(&"pdf".to_string()));
    }

    #[tokio::test]
    async fn panic_during_capture_still_tears_down() {
        let (orchestrator, log) = orchestrator(Fault::CapturePanics, Duration::from_secs(5));
        let err = orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect_err("capture panics");
        assert!(matches!(err, RenderError::Panicked(_)));
        assert!(!err.is_retryable());
        assert_torn_down(&log);
    }

    #[tokio::test]
    async fn deadline_cancels_at_next_stage_and_tears_down() {
        let (orchestrator, log) = orchestrator(Fault::ReadyHangs, Duration::from_millis(50));
        let err = orchestrator
            .render(request(CaptureSpec::Pdf))
            .await
            .expect_err("deadline");
        assert!(matches!(err, RenderError::Deadline(_)));

        let mut waited = Duration::ZERO;
        while !entries(&log).contains(&"browser.close".to_string()) {
            assert!(waited < Duration::from_secs(5), "session never torn down");
            tokio::time::sleep(Duration::from_millis(20)).await;
            waited += Duration::from_millis(20);
        }
        let entries = entries(&log);
        assert!(!entries.contains(&"fonts".to_string()));
        assert!(!entries.contains(&"pdf".to_string()));
        assert_torn_down(&log);
    }

    #[tokio::test]
    async fn pre_cancelled_render_never_launches() {
        let (orchestrator, log) = orchestrator(Fault::None, Duration::from_secs(5));
        let cancel = CancellationFlag::new();
        cancel.cancel();
        let err = orchestrator
            .render_with_cancel(request(CaptureSpec::Pdf), cancel)
            .await
            .expect_err("cancelled");
        assert!(matches!(
            err,
            RenderError::Cancelled {
                stage: RenderStage::Launch
            }
        ));
        assert!(entries(&log).is_empty());
    }
}
