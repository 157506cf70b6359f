//! Headless-browser rendering of assembled payloads into PDFs and preview images.

pub mod engine;
mod orchestrator;
mod session;

pub use engine::{BrowserEngine, EngineBrowser, EngineError, EnginePage};
pub use orchestrator::{
    CaptureSpec, PAYLOAD_GLOBAL, RenderError, RenderOrchestrator, RenderRequest, RenderSettings,
    RenderStage, RenderTimeouts,
};
pub use session::{CancellationFlag, RenderSession};
