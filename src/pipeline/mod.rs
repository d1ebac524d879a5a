//! Pipelines are explicit, ordered sequences of [`Stage`]s.
//!
//! The first stage usually reads files from disk ([`Src`]), every following
//! stage receives the complete output of the previous one. A stage never
//! starts before its predecessor has fully materialised its output, and a
//! failing stage stops the pipeline with a [`StageError`] carrying its index.
//!
//! ```rust,ignore
//! let styles = Pipeline::src(["src/styles/main.scss"])?
//!     .pipe(Sass::new())
//!     .pipe(Autoprefix::new(browsers))
//!     .pipe(Dest::new("public/styles"));
//! ```

mod bundle;
mod css;
mod dest;
mod esbuild;
mod lint;
mod modernizr;
mod rename;
mod sass;
mod size;
mod src;
mod stream;
mod tool;

use std::time::Instant;

use anyhow::Context as _;
use camino::{Utf8Path, Utf8PathBuf};
use tracing::debug;

use crate::error::{PatternError, StageError};
use crate::io::as_overhead;
use crate::live::Reloader;

pub use bundle::Bundle;
pub use css::{Autoprefix, MinifyCss};
pub use dest::Dest;
pub use esbuild::{Transpile, Uglify};
pub use lint::{Finding, Lint, Severity, render_stylish};
pub use modernizr::{FeatureBuild, FeatureCrawl};
pub use rename::Rename;
pub use sass::Sass;
pub use size::Size;
pub use src::Src;
pub use stream::Stream;

/// A file travelling through a pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Directory the asset is relative to, itself relative to the project root.
    pub base: Utf8PathBuf,
    /// Path below `base`. Destinations preserve it.
    pub relative: Utf8PathBuf,
    /// The file this asset was read from, relative to the project root.
    pub origin: Option<Utf8PathBuf>,
    pub contents: Vec<u8>,
}

impl Asset {
    pub fn new(
        base: impl Into<Utf8PathBuf>,
        relative: impl Into<Utf8PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            base: base.into(),
            relative: relative.into(),
            origin: None,
            contents: contents.into(),
        }
    }

    /// Path relative to the project root.
    pub fn path(&self) -> Utf8PathBuf {
        self.base.join(&self.relative)
    }

    pub fn text(&self) -> anyhow::Result<&str> {
        std::str::from_utf8(&self.contents)
            .with_context(|| format!("{} is not valid UTF-8", self.path()))
    }

    pub fn len(&self) -> usize {
        self.contents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }
}

/// Environment a stage runs in.
#[derive(Debug, Clone, Copy)]
pub struct StageContext<'a> {
    /// Project root every relative path is resolved against.
    pub root: &'a Utf8Path,
    /// Name of the task running the pipeline, for log lines.
    pub task: &'a str,
    pub reloader: &'a Reloader,
}

impl StageContext<'_> {
    pub fn resolve(&self, path: &Utf8Path) -> Utf8PathBuf {
        self.root.join(path)
    }
}

/// One transformation step. Stages keep no state between invocations.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>>;
}

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.stages.iter().map(|stage| stage.name()))
            .finish()
    }
}

impl Pipeline {
    /// Starts a pipeline reading the files matched by `patterns`.
    pub fn src(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, PatternError> {
        Ok(Self::start(Src::new(patterns)?))
    }

    /// Starts a pipeline with an arbitrary first stage, which receives no
    /// input.
    pub fn start(stage: impl Stage + 'static) -> Self {
        Self {
            stages: vec![Box::new(stage)],
        }
    }

    pub fn pipe(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|stage| stage.name())
    }

    /// Runs every stage in order, returning the output of the last one.
    pub fn run(&self, cx: &StageContext<'_>) -> Result<Vec<Asset>, StageError> {
        let mut assets = Vec::new();

        for (stage_index, stage) in self.stages.iter().enumerate() {
            let s = Instant::now();

            assets = stage.apply(cx, assets).map_err(|cause| StageError {
                stage_index,
                stage: stage.name(),
                cause,
            })?;

            debug!(
                task = cx.task,
                stage = stage.name(),
                assets = assets.len(),
                "stage done {}",
                as_overhead(s)
            );
        }

        Ok(assets)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Scratch project tree for stage tests.
    pub(crate) struct Scratch {
        _dir: tempfile::TempDir,
        pub root: Utf8PathBuf,
        pub reloader: Reloader,
    }

    impl Scratch {
        pub(crate) fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
            Self {
                _dir: dir,
                root,
                reloader: Reloader::default(),
            }
        }

        pub(crate) fn write(&self, rel: &str, text: &str) {
            let path = self.root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, text).unwrap();
        }

        pub(crate) fn read(&self, rel: &str) -> String {
            std::fs::read_to_string(self.root.join(rel)).unwrap()
        }

        pub(crate) fn cx(&self) -> StageContext<'_> {
            StageContext {
                root: &self.root,
                task: "test",
                reloader: &self.reloader,
            }
        }
    }

    struct Upper;

    impl Stage for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn apply(&self, _: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
            Ok(input
                .into_iter()
                .map(|mut asset| {
                    asset.contents.make_ascii_uppercase();
                    asset
                })
                .collect())
        }
    }

    struct Fail;

    impl Stage for Fail {
        fn name(&self) -> &'static str {
            "fail"
        }

        fn apply(&self, _: &StageContext<'_>, _: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
            anyhow::bail!("broken on purpose")
        }
    }

    #[test]
    fn test_stages_chain_in_order() {
        let scratch = Scratch::new();
        scratch.write("src/a.txt", "hello");

        let pipeline = Pipeline::src(["src/*.txt"]).unwrap().pipe(Upper);
        let out = pipeline.run(&scratch.cx()).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path(), "src/a.txt");
        assert_eq!(out[0].origin.as_deref(), Some(Utf8Path::new("src/a.txt")));
        assert_eq!(out[0].contents, b"HELLO");
        assert_eq!(pipeline.stage_names().collect::<Vec<_>>(), ["src", "upper"]);
    }

    #[test]
    fn test_failure_reports_stage_index() {
        let scratch = Scratch::new();
        scratch.write("src/a.txt", "hello");

        let pipeline = Pipeline::src(["src/*.txt"])
            .unwrap()
            .pipe(Upper)
            .pipe(Fail)
            .pipe(Upper);

        let err = pipeline.run(&scratch.cx()).unwrap_err();
        assert_eq!(err.stage_index, 2);
        assert_eq!(err.stage, "fail");
        assert_eq!(err.cause.to_string(), "broken on purpose");
    }

    #[test]
    fn test_asset_paths() {
        let asset = Asset::new("public/styles", "main.css", "a{}");
        assert_eq!(asset.path(), "public/styles/main.css");
        assert_eq!(asset.text().unwrap(), "a{}");
        assert_eq!(asset.len(), 3);
    }
}
