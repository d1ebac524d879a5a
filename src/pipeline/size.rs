use console::style;
use tracing::info;

use super::{Asset, Stage, StageContext};
use crate::io::format_size;

/// Logs the size of the assets passing through.
#[derive(Debug, Default, Clone, Copy)]
pub struct Size {
    show_files: bool,
}

impl Size {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every file, not just the total.
    pub fn show_files(mut self) -> Self {
        self.show_files = true;
        self
    }
}

impl Stage for Size {
    fn name(&self) -> &'static str {
        "size"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let mut total = 0;

        for asset in &input {
            total += asset.len();
            if self.show_files {
                info!(
                    task = cx.task,
                    "{} {}",
                    asset.path(),
                    style(format_size(asset.len())).magenta()
                );
            }
        }

        info!(
            task = cx.task,
            "all files {}",
            style(format_size(total)).magenta()
        );

        Ok(input)
    }
}
