use std::fs;

use anyhow::Context as _;
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::warn;

use super::{Asset, Stage, StageContext};
use crate::error::PatternError;
use crate::patterns::PatternSet;

/// Reads every file matched by a pattern set. Ignores its input.
#[derive(Debug)]
pub struct Src {
    patterns: PatternSet,
}

impl Src {
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, PatternError> {
        Ok(Self {
            patterns: PatternSet::new(patterns)?,
        })
    }
}

impl Stage for Src {
    fn name(&self) -> &'static str {
        "src"
    }

    fn apply(&self, cx: &StageContext<'_>, _: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let files = self.patterns.files(cx.root)?;

        if files.is_empty() {
            warn!(
                task = cx.task,
                patterns = ?self.patterns.patterns(),
                "no files matched"
            );
        }

        files
            .into_par_iter()
            .map(|(base, relative)| {
                let origin = base.join(&relative);
                let contents = fs::read(cx.resolve(&origin))
                    .with_context(|| format!("couldn't read {origin}"))?;

                Ok(Asset {
                    base,
                    relative,
                    origin: Some(origin),
                    contents,
                })
            })
            .collect()
    }
}
