use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::{Block, ReportRenderer};
use crate::error::ReportError;
use crate::terminal::locked;

/// A renderer that writes a plain-text dump of the blocks and remembers
/// every call. Failures can be injected to exercise the save policy.
pub struct RecordingRenderer {
    fail_first: usize,
    fail_on_images: bool,
    write_nothing: bool,
    renders: Mutex<Vec<(PathBuf, Vec<Block>)>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self {
            fail_first: 0,
            fail_on_images: false,
            write_nothing: false,
            renders: Mutex::new(Vec::new()),
        }
    }

    /// Fail the first `n` render calls.
    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    /// Fail any render whose blocks contain an image.
    pub fn failing_on_images(mut self) -> Self {
        self.fail_on_images = true;
        self
    }

    /// Report success without writing a file.
    pub fn writing_nothing(mut self) -> Self {
        self.write_nothing = true;
        self
    }

    pub fn render_count(&self) -> usize {
        locked(&self.renders).len()
    }

    /// Targets of every render call, in order.
    pub fn targets(&self) -> Vec<PathBuf> {
        locked(&self.renders)
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }

    /// Blocks of the most recent render call.
    pub fn last_blocks(&self) -> Option<Vec<Block>> {
        locked(&self.renders).last().map(|(_, b)| b.clone())
    }
}

impl Default for RecordingRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportRenderer for RecordingRenderer {
    fn name(&self) -> &str {
        "recording"
    }

    fn render(&self, blocks: &[Block], target: &Path) -> Result<(), ReportError> {
        let call = {
            let mut renders = locked(&self.renders);
            renders.push((target.to_path_buf(), blocks.to_vec()));
            renders.len()
        };
        let has_image = blocks.iter().any(|b| matches!(b, Block::Image { .. }));
        if call <= self.fail_first || (self.fail_on_images && has_image) {
            return Err(ReportError::Render {
                path: target.to_path_buf(),
                message: format!("injected failure on render {call}"),
            });
        }
        if self.write_nothing {
            return Ok(());
        }
        std::fs::write(target, format!("{blocks:#?}"))?;
        Ok(())
    }
}
