//! Build configuration.
//!
//! Every field has a default mirroring the stock project layout, so a project
//! without a `Tsumugi.toml` builds `src/` into `public/`. A config file only
//! needs the keys it wants to change:
//!
//! ```toml
//! [paths]
//! dest = "dist"
//!
//! [styles]
//! browsers = ["last 2 versions"]
//!
//! [live]
//! open = "none"
//! log_level = "info"
//! ```

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;

use crate::error::ConfigError;

/// Name of the config file looked up in the project root.
pub const CONFIG_FILE: &str = "Tsumugi.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub styles: Styles,
    pub scripts: Scripts,
    pub lint: Lint,
    pub modernizr: Modernizr,
    pub live: LiveOptions,
}

impl Config {
    /// Reads `path` if it exists, falling back to defaults otherwise.
    pub fn load(path: impl AsRef<Utf8Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!(%path, "no config file, using defaults");
            return Ok(Self::default());
        }

        let text = fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_owned(), e))?;
        Self::parse(path, &text)
    }

    pub(crate) fn parse(path: &Utf8Path, text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|e| ConfigError::Parse(path.to_owned(), e))
    }

    /// Scripts handed to the linter. Unless configured, these are the scripts
    /// under `paths.src` and one directory below, minus `vendor/`.
    pub fn lint_sources(&self) -> Vec<String> {
        if let Some(sources) = &self.lint.sources {
            return sources.clone();
        }

        let scripts = self.paths.src_scripts();
        vec![
            format!("{scripts}/*.js"),
            format!("{scripts}/*/*.js"),
            format!("!{scripts}/vendor/*.js"),
            format!("!{scripts}/vendor/*/*.js"),
        ]
    }
}

/// Source and destination roots.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    pub src: Utf8PathBuf,
    pub dest: Utf8PathBuf,
    pub npm: Utf8PathBuf,
    /// Remote deployment target. Transfer happens outside of this tool.
    pub stage: Option<String>,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            src: "src".into(),
            dest: "public".into(),
            npm: "node_modules".into(),
            stage: Some("user@servername:/path/to/site/app/public".into()),
        }
    }
}

impl Paths {
    pub fn src_styles(&self) -> Utf8PathBuf {
        self.src.join("styles")
    }

    pub fn src_scripts(&self) -> Utf8PathBuf {
        self.src.join("scripts")
    }

    pub fn dest_styles(&self) -> Utf8PathBuf {
        self.dest.join("styles")
    }

    pub fn dest_scripts(&self) -> Utf8PathBuf {
        self.dest.join("scripts")
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Styles {
    /// Entry stylesheet, relative to `paths.src/styles`.
    pub entry: Utf8PathBuf,
    /// Browserslist queries used for vendor prefixing.
    pub browsers: Vec<String>,
}

impl Default for Styles {
    fn default() -> Self {
        Self {
            entry: "main.scss".into(),
            browsers: vec!["last 3 versions".into(), "ie 8".into(), "ie 9".into()],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Scripts {
    /// Entry script, relative to `paths.src/scripts`.
    pub entry: Utf8PathBuf,
    /// File name of the produced bundle.
    pub bundle: String,
    /// Language level passed to the transpiler. Syntax newer than this is
    /// lowered, or rejected when the transpiler cannot lower it.
    pub target: String,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            entry: "main.js".into(),
            bundle: "bundle.js".into(),
            target: "es5".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Lint {
    /// Patterns relative to the project root; a leading `!` excludes. When
    /// unset, see [`Config::lint_sources`].
    pub sources: Option<Vec<String>>,
    /// Optional `.jshintrc` path handed to the linter.
    pub config: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Modernizr {
    pub options: Vec<String>,
    /// File name of the generated build under `paths.dest/scripts`.
    pub output: String,
}

impl Default for Modernizr {
    fn default() -> Self {
        Self {
            options: vec!["setClasses".into()],
            output: "modernizr.js".into(),
        }
    }
}

/// What the live reload server opens once it is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenTarget {
    None,
    #[default]
    Local,
    External,
    Ui,
    Tunnel,
}

/// Verbosity of the live reload server's own log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Silent,
    Warn,
    Info,
    #[default]
    Debug,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LiveOptions {
    pub open: OpenTarget,
    pub log_level: Verbosity,
    pub log_prefix: String,
    pub log_connections: bool,
    pub log_file_changes: bool,
    /// HTTP port of the static file server.
    pub port: u16,
    /// WebSocket port used to push reloads. Falls back to a random port when
    /// taken.
    pub ws_port: u16,
    /// Directory served over HTTP. Defaults to `paths.dest`.
    pub root: Option<Utf8PathBuf>,
    /// Changes to files matching these patterns trigger a full page reload.
    pub templates: Vec<String>,
}

impl Default for LiveOptions {
    fn default() -> Self {
        Self {
            open: OpenTarget::Local,
            log_level: Verbosity::Debug,
            log_prefix: "tsumugi".into(),
            log_connections: true,
            log_file_changes: true,
            port: 3000,
            ws_port: 1337,
            root: None,
            templates: vec!["**/*.html".into()],
        }
    }
}
