//! # cppdoc Tools
//!
//! Platform back ends for cppdoc: terminal hosts that run programs and
//! capture their windows, and the genpdf report renderer.

pub mod headless;
pub mod macos;
pub mod pdf;

use cppdoc_core::config::CaptureConfig;
use cppdoc_core::terminal::TerminalHost;
use std::sync::Arc;

pub use headless::HeadlessHost;
pub use macos::MacTerminalHost;
pub use pdf::PdfRenderer;

/// The terminal host for this platform: Terminal.app on macOS, otherwise
/// headless child processes without screenshots.
pub fn default_host(capture: &CaptureConfig) -> Arc<dyn TerminalHost> {
    #[cfg(target_os = "macos")]
    {
        Arc::new(MacTerminalHost::new(capture.clone()))
    }
    #[cfg(not(target_os = "macos"))]
    {
        let _ = capture;
        Arc::new(HeadlessHost::new())
    }
}
