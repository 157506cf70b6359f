//! Blocking seam over a DevTools-capable browser engine.
//!
//! All calls block the current thread and must honour the timeout they are given. The
//! orchestrator drives them from a blocking worker thread, never from the async runtime.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine operation timed out: {0}")]
    Timeout(String),
    #[error("engine operation failed: {0}")]
    Failed(String),
}

impl EngineError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Starts (or attaches to) engine processes. One browser per job; never shared.
pub trait BrowserEngine: Send + Sync {
    /// `true` when the engine attaches to a remote endpoint instead of spawning a process.
    fn is_remote(&self) -> bool {
        false
    }

    fn launch(&self) -> Result<Box<dyn EngineBrowser>, EngineError>;
}

pub trait EngineBrowser: Send {
    fn open_page(&mut self) -> Result<Box<dyn EnginePage>, EngineError>;

    /// Releases the engine. Must be idempotent and must not panic.
    fn close(&mut self);
}

pub trait EnginePage: Send {
    /// Headers sent with every request the page issues, including its own data fetches.
    fn set_extra_headers(&mut self, headers: &[(String, String)]) -> Result<(), EngineError>;

    /// Registers a script evaluated before any page script on every new document.
    fn add_init_script(&mut self, source: &str) -> Result<(), EngineError>;

    fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), EngineError>;

    fn wait_for_selector(&mut self, selector: &str, timeout: Duration) -> Result<(), EngineError>;

    fn wait_for_fonts(&mut self, timeout: Duration) -> Result<(), EngineError>;

    fn emulate_print_media(&mut self) -> Result<(), EngineError>;

    fn remove_elements(&mut self, selectors: &[String]) -> Result<(), EngineError>;

    /// A4, zero margins, backgrounds included.
    fn print_pdf(&mut self, timeout: Duration) -> Result<Vec<u8>, EngineError>;

    /// JPEG capture clipped to the element matched by `selector`.
    fn screenshot(
        &mut self,
        selector: &str,
        quality: u32,
        timeout: Duration,
    ) -> Result<Vec<u8>, EngineError>;

    /// Must be idempotent and must not panic.
    fn close(&mut self);
}
