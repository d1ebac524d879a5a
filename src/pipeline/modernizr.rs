//! Custom Modernizr builds.
//!
//! [`FeatureCrawl`] looks for the feature detects a site actually uses and
//! turns them into a build config, [`FeatureBuild`] hands that config to the
//! `modernizr` command line tool.

use std::collections::BTreeSet;
use std::fs;
use std::process::Command;
use std::sync::LazyLock;

use anyhow::{Context as _, bail};
use camino::Utf8PathBuf;
use regex::Regex;
use serde::Serialize;
use tracing::debug;

use super::tool;
use super::{Asset, Stage, StageContext};

/// Property or class name, and the detect that provides it.
const DETECTS: &[(&str, &str)] = &[
    ("audio", "audio"),
    ("backgroundsize", "css/backgroundsize"),
    ("borderradius", "css/borderradius"),
    ("boxshadow", "css/boxshadow"),
    ("canvas", "canvas"),
    ("cssanimations", "css/animations"),
    ("csscolumns", "css/columns"),
    ("cssgradients", "css/gradients"),
    ("cssgrid", "css/cssgrid"),
    ("csstransforms", "css/transforms"),
    ("csstransforms3d", "css/transforms3d"),
    ("csstransitions", "css/transitions"),
    ("fetch", "network/fetch"),
    ("flexbox", "css/flexbox"),
    ("flexboxlegacy", "css/flexboxlegacy"),
    ("flexwrap", "css/flexwrap"),
    ("geolocation", "geolocation"),
    ("history", "history"),
    ("hsla", "css/hsla"),
    ("inlinesvg", "svg/inline"),
    ("json", "json"),
    ("localstorage", "storage/localstorage"),
    ("multiplebgs", "css/multiplebgs"),
    ("objectfit", "css/objectfit"),
    ("opacity", "css/opacity"),
    ("placeholder", "forms/placeholder"),
    ("promises", "es6/promises"),
    ("rgba", "css/rgba"),
    ("sessionstorage", "storage/sessionstorage"),
    ("svg", "svg"),
    ("textshadow", "css/textshadow"),
    ("touchevents", "touchevents"),
    ("video", "video"),
    ("webgl", "webgl"),
    ("websockets", "websockets"),
    ("webworkers", "workers/webworkers"),
];

static PROPERTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bModernizr\.([A-Za-z0-9_]+)").unwrap());

static CLASS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.(-?[_a-zA-Z][_a-zA-Z0-9-]*)").unwrap());

static URL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"url\([^)]*\)").unwrap());

fn detect(name: &str) -> Option<&'static str> {
    DETECTS
        .binary_search_by_key(&name, |(name, _)| name)
        .ok()
        .map(|i| DETECTS[i].1)
}

/// Detects referenced by one file, scripts and stylesheets are told apart by
/// extension.
fn crawl(asset: &Asset, found: &mut BTreeSet<&'static str>) -> anyhow::Result<()> {
    let text = asset.text()?;

    match asset.relative.extension() {
        Some("css") => {
            let text = URL.replace_all(text, "");
            for caps in CLASS.captures_iter(&text) {
                let class = &caps[1];
                let name = class.strip_prefix("no-").unwrap_or(class);
                found.extend(detect(name));
            }
        }
        _ => {
            for caps in PROPERTY.captures_iter(text) {
                found.extend(detect(&caps[1]));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Serialize)]
struct BuildConfig<'a> {
    minify: bool,
    options: &'a [String],
    #[serde(rename = "feature-detects")]
    feature_detects: Vec<&'static str>,
}

/// Scans scripts for `Modernizr.<feature>` and stylesheets for
/// `.feature`/`.no-feature` classes. Produces a single build config asset.
#[derive(Debug, Clone)]
pub struct FeatureCrawl {
    options: Vec<String>,
}

impl FeatureCrawl {
    pub const CONFIG: &str = "modernizr-config.json";

    pub fn new(options: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            options: options.into_iter().map(Into::into).collect(),
        }
    }
}

impl Stage for FeatureCrawl {
    fn name(&self) -> &'static str {
        "feature-crawl"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let mut found = BTreeSet::new();
        for asset in &input {
            crawl(asset, &mut found)?;
        }

        debug!(task = cx.task, detects = ?found, "crawled {} files", input.len());

        let config = BuildConfig {
            minify: false,
            options: &self.options,
            feature_detects: found.into_iter().collect(),
        };

        Ok(vec![Asset::new(
            "",
            Self::CONFIG,
            serde_json::to_vec_pretty(&config)?,
        )])
    }
}

/// Runs `modernizr` on a build config, replacing it with the generated
/// script.
#[derive(Debug, Clone)]
pub struct FeatureBuild {
    output: Utf8PathBuf,
}

impl FeatureBuild {
    pub fn new(output: impl Into<Utf8PathBuf>) -> Self {
        Self {
            output: output.into(),
        }
    }
}

impl Stage for FeatureBuild {
    fn name(&self) -> &'static str {
        "feature-build"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let [config] = <[Asset; 1]>::try_from(input)
            .map_err(|input| anyhow::anyhow!("expected one build config, got {}", input.len()))?;

        let program = tool::find("modernizr")?;
        let dir = tempfile::tempdir().context("couldn't create a temporary directory")?;
        let config_path = dir.path().join(FeatureCrawl::CONFIG);
        let output_path = dir.path().join("modernizr.js");

        fs::write(&config_path, &config.contents)
            .with_context(|| format!("couldn't write {}", config_path.display()))?;

        let mut command = Command::new(program);
        command
            .current_dir(cx.root)
            .arg("-c")
            .arg(&config_path)
            .arg("-d")
            .arg(&output_path);

        tool::check("modernizr", tool::pipe(command, &[])?)?;

        let contents = fs::read(&output_path)
            .with_context(|| format!("modernizr did not produce {}", output_path.display()))?;

        if contents.is_empty() {
            bail!("modernizr produced an empty build");
        }

        Ok(vec![Asset {
            relative: self.output.clone(),
            origin: None,
            contents,
            ..config
        }])
    }
}
