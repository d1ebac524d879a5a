use std::process::Command;

use super::tool;
use super::{Asset, Stage, StageContext};

fn esbuild(cx: &StageContext<'_>, asset: Asset, args: &[&str]) -> anyhow::Result<Asset> {
    let mut command = Command::new(tool::find("esbuild")?);
    command
        .current_dir(cx.root)
        .arg("--loader=js")
        .arg(format!("--sourcefile={}", asset.path()))
        .args(args);

    let output = tool::pipe(command, &asset.contents)?;
    let contents = tool::check("esbuild", output)?;

    Ok(Asset { contents, ..asset })
}

/// Lowers scripts to a fixed language level with `esbuild`.
///
/// Syntax `esbuild` cannot lower to the target fails the stage instead of
/// reaching the output unchanged.
#[derive(Debug, Clone)]
pub struct Transpile {
    target: String,
}

impl Transpile {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }
}

impl Stage for Transpile {
    fn name(&self) -> &'static str {
        "transpile"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let target = format!("--target={}", self.target);

        input
            .into_iter()
            .map(|asset| esbuild(cx, asset, &[&target]))
            .collect()
    }
}

/// Minifies scripts with `esbuild`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Uglify;

impl Uglify {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Uglify {
    fn name(&self) -> &'static str {
        "uglify"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        input
            .into_iter()
            .map(|asset| esbuild(cx, asset, &["--minify"]))
            .collect()
    }
}
