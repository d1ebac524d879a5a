use super::{Asset, Stage, StageContext};
use crate::live::ReloadEvent;

/// Announces every asset passing through to the live reload bridge. A no-op
/// while no bridge is running.
#[derive(Debug, Default, Clone, Copy)]
pub struct Stream;

impl Stream {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Stream {
    fn name(&self) -> &'static str {
        "stream"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        for asset in &input {
            cx.reloader
                .notify(ReloadEvent::Asset(cx.resolve(&asset.path())));
        }

        Ok(input)
    }
}
