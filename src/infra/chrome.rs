//! Chromium engine driven over the DevTools protocol with `headless_chrome`.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use headless_chrome::protocol::cdp::{Emulation, Page};
use headless_chrome::types::PrintToPdfOptions;
use headless_chrome::{Browser, LaunchOptions, Tab};
use serde_json::json;
use tracing::{debug, warn};

use crate::application::render::engine::{BrowserEngine, EngineBrowser, EngineError, EnginePage};

const A4_WIDTH_IN: f64 = 8.27;
const A4_HEIGHT_IN: f64 = 11.69;
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub struct ChromeSettings {
    /// Attach to this DevTools websocket instead of launching a local process.
    pub remote_endpoint: Option<String>,
    pub executable: Option<PathBuf>,
    pub sandbox: bool,
    pub window_size: (u32, u32),
}

impl Default for ChromeSettings {
    fn default() -> Self {
        Self {
            remote_endpoint: None,
            executable: None,
            sandbox: true,
            window_size: (1240, 1754),
        }
    }
}

pub struct ChromeEngine {
    settings: ChromeSettings,
}

impl ChromeEngine {
    pub fn new(settings: ChromeSettings) -> Self {
        Self { settings }
    }

    fn launch_options(&self) -> Result<LaunchOptions<'static>, EngineError> {
        LaunchOptions::default_builder()
            .headless(true)
            .sandbox(self.settings.sandbox)
            .path(self.settings.executable.clone())
            .window_size(Some(self.settings.window_size))
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .args(vec![
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--hide-scrollbars"),
            ])
            .build()
            .map_err(|err| EngineError::failed(format!("invalid launch options: {err}")))
    }
}

impl BrowserEngine for ChromeEngine {
    fn is_remote(&self) -> bool {
        self.settings.remote_endpoint.is_some()
    }

    fn launch(&self) -> Result<Box<dyn EngineBrowser>, EngineError> {
        let browser = match &self.settings.remote_endpoint {
            Some(endpoint) => Browser::connect_with_timeout(endpoint.clone(), IDLE_BROWSER_TIMEOUT)
                .map_err(|err| EngineError::failed(format!("connect {endpoint}: {err}")))?,
            None => Browser::new(self.launch_options()?)
                .map_err(|err| EngineError::failed(format!("launch chromium: {err}")))?,
        };
        Ok(Box::new(ChromeBrowser {
            browser: Some(browser),
        }))
    }
}

struct ChromeBrowser {
    browser: Option<Browser>,
}

impl EngineBrowser for ChromeBrowser {
    fn open_page(&mut self) -> Result<Box<dyn EnginePage>, EngineError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| EngineError::failed("browser already closed"))?;
        let tab = browser
            .new_tab()
            .map_err(|err| EngineError::failed(format!("open tab: {err}")))?;
        Ok(Box::new(ChromePage { tab: Some(tab) }))
    }

    fn close(&mut self) {
        // Dropping a launched browser terminates its process; a remote one is only detached.
        if self.browser.take().is_some() {
            debug!(target = "pressroom::infra::chrome", "Browser released");
        }
    }
}

struct ChromePage {
    tab: Option<Arc<Tab>>,
}

impl ChromePage {
    fn tab(&self) -> Result<&Arc<Tab>, EngineError> {
        self.tab
            .as_ref()
            .ok_or_else(|| EngineError::failed("page already closed"))
    }

    fn evaluate_bool(&self, expression: &str) -> Result<bool, EngineError> {
        let result = self
            .tab()?
            .evaluate(expression, true)
            .map_err(|err| EngineError::failed(err.to_string()))?;
        Ok(result
            .value
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }
}

/// Protocol command structs gain optional fields between releases; decoding them from JSON
/// leaves every unspecified field at `None`.
fn command<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T, EngineError> {
    serde_json::from_value(value).map_err(|err| EngineError::failed(err.to_string()))
}

impl EnginePage for ChromePage {
    fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<(), EngineError> {
        let headers: HashMap<&str, &str> = headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .collect();
        self.tab()?
            .set_extra_http_headers(headers)
            .map_err(|err| EngineError::failed(format!("set headers: {err}")))
    }

    fn add_init_script(&mut self, source: &str) -> Result<(), EngineError> {
        let method: Page::AddScriptToEvaluateOnNewDocument = command(json!({ "source": source }))?;
        self.tab()?
            .call_method(method)
            .map(|_| ())
            .map_err(|err| EngineError::failed(format!("register init script: {err}")))
    }

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), EngineError> {
        let tab = self.tab()?;
        tab.set_default_timeout(timeout);
        tab.navigate_to(url)
            .and_then(|tab| tab.wait_until_navigated())
            .map(|_| ())
            .map_err(|err| EngineError::failed(format!("navigate: {err}")))
    }

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), EngineError> {
        self.tab()?
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map(|_| ())
            .map_err(|err| EngineError::Timeout(format!("selector {selector}: {err}")))
    }

    fn wait_for_fonts(&mut self, timeout: Duration) -> Result<(), EngineError> {
        let expression = format!(
            "Promise.race([\
                document.fonts.ready.then(() => true),\
                new Promise((resolve) => setTimeout(() => resolve(false), {}))\
            ])",
            timeout.as_millis()
        );
        if self.evaluate_bool(&expression)? {
            Ok(())
        } else {
            Err(EngineError::Timeout("document.fonts.ready".to_string()))
        }
    }

    fn emulate_print_media(&mut self) -> Result<(), EngineError> {
        let method: Emulation::SetEmulatedMedia = command(json!({ "media": "print" }))?;
        self.tab()?
            .call_method(method)
            .map(|_| ())
            .map_err(|err| EngineError::failed(format!("emulate print media: {err}")))
    }

    fn remove_elements(&mut self, selectors: &[String]) -> Result<(), EngineError> {
        let selectors = serde_json::to_string(selectors)
            .map_err(|err| EngineError::failed(err.to_string()))?;
        let expression = format!(
            "(() => {{ for (const s of {selectors}) \
                document.querySelectorAll(s).forEach((e) => e.remove()); \
                return true; }})()"
        );
        self.evaluate_bool(&expression).map(|_| ())
    }

    fn print_pdf(&mut self, timeout: Duration) -> Result<Vec<u8>, EngineError> {
        let tab = self.tab()?;
        tab.set_default_timeout(timeout);
        let options = PrintToPdfOptions {
            print_background: Some(true),
            paper_width: Some(A4_WIDTH_IN),
            paper_height: Some(A4_HEIGHT_IN),
            margin_top: Some(0.0),
            margin_bottom: Some(0.0),
            margin_left: Some(0.0),
            margin_right: Some(0.0),
            prefer_css_page_size: Some(false),
            ..Default::default()
        };
        tab.print_to_pdf(Some(options))
            .map_err(|err| EngineError::failed(format!("print to pdf: {err}")))
    }

    fn screenshot(
        &mut self,
        selector: &str,
        quality: u32,
        timeout: Duration,
    ) -> Result<Vec<u8>, EngineError> {
        let tab = self.tab()?;
        tab.set_default_timeout(timeout);
        let element = tab
            .wait_for_element_with_custom_timeout(selector, timeout)
            .map_err(|err| EngineError::failed(format!("preview element {selector}: {err}")))?;
        let clip = element
            .get_box_model()
            .map_err(|err| EngineError::failed(format!("preview bounds: {err}")))?
            .content_viewport();
        tab.capture_screenshot(
            Page::CaptureScreenshotFormatOption::Jpeg,
            Some(quality),
            Some(clip),
            true,
        )
        .map_err(|err| EngineError::failed(format!("screenshot: {err}")))
    }

    fn close(&mut self) {
        if let Some(tab) = self.tab.take() {
            if let Err(err) = tab.close(false) {
                warn!(
                    target = "pressroom::infra::chrome",
                    error = %err,
                    "Failed to close page"
                );
            }
        }
    }
}
