use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tracing::debug;

use super::engine::{EngineBrowser, EnginePage};

/// Shared flag flipped when a render must stop at its next stage boundary.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Cancels the flag when dropped, so abandoning the awaiting future stops the blocking render.
pub(crate) struct CancelOnDrop(pub(crate) CancellationFlag);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// One engine plus at most one page, owned by a single job.
///
/// Dropping the session closes the page first and the engine second, on every exit path
/// including unwinding.
pub struct RenderSession {
    browser: Box<dyn EngineBrowser>,
    page: Option<Box<dyn EnginePage>>,
    started_at: Instant,
}

impl RenderSession {
    pub fn new(browser: Box<dyn EngineBrowser>) -> Self {
        Self {
            browser,
            page: None,
            started_at: Instant::now(),
        }
    }

    pub fn attach_page(&mut self, page: Box<dyn EnginePage>) {
        if let Some(mut previous) = self.page.replace(page) {
            previous.close();
        }
    }

    pub fn browser_mut(&mut self) -> &mut dyn EngineBrowser {
        self.browser.as_mut()
    }

    pub fn page_mut(&mut self) -> Option<&mut (dyn EnginePage + 'static)> {
        self.page.as_deref_mut()
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if let Some(mut page) = self.page.take() {
            page.close();
        }
        self.browser.close();
        debug!(
            target = "pressroom::application::render",
            stage = "teardown",
            panicking = std::thread::panicking(),
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Render session torn down"
        );
    }
}
