//! CommonJS bundling.
//!
//! Starting from an entry asset, every `require('...')` call is followed
//! transitively and the reachable modules are packed into one script with a
//! small loader. Modules are numbered in depth-first discovery order starting
//! at 1, so the same sources always produce the same bundle.

use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::fs;
use std::sync::LazyLock;

use anyhow::{Context as _, anyhow};
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Deserialize;

use super::{Asset, Stage, StageContext};

static REQUIRE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\brequire\s*\(\s*['"]([^'"]+)['"]\s*\)"#).unwrap()
});

const PRELUDE: &str = r#"(function (modules, entry) {
  var cache = {};
  function load(id) {
    if (cache[id]) return cache[id].exports;
    var module = (cache[id] = { exports: {} });
    var def = modules[id];
    def[0].call(module.exports, function (name) {
      var dep = def[1][name];
      if (dep === undefined) throw new Error("Cannot find module '" + name + "'");
      return load(dep);
    }, module, module.exports);
    return module.exports;
  }
  load(entry);
})({
"#;

/// Packs an entry script and everything it requires into a single script.
#[derive(Debug, Clone)]
pub struct Bundle {
    /// Package directory bare specifiers are resolved in.
    npm: Utf8PathBuf,
}

impl Bundle {
    pub fn new(npm: impl Into<Utf8PathBuf>) -> Self {
        Self { npm: npm.into() }
    }
}

impl Stage for Bundle {
    fn name(&self) -> &'static str {
        "bundle"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        input
            .into_iter()
            .map(|asset| {
                let entry = asset.origin.clone().unwrap_or_else(|| asset.path());
                let source = asset.text()?.to_string();

                let mut graph = Graph {
                    cx,
                    npm: &self.npm,
                    ids: HashMap::new(),
                    modules: Vec::new(),
                };
                graph.visit(normalize(&entry), source)?;

                Ok(Asset {
                    contents: graph.render()?.into_bytes(),
                    ..asset
                })
            })
            .collect()
    }
}

#[derive(Debug)]
struct Module {
    path: Utf8PathBuf,
    source: String,
    deps: BTreeMap<String, usize>,
}

struct Graph<'a> {
    cx: &'a StageContext<'a>,
    npm: &'a Utf8Path,
    ids: HashMap<Utf8PathBuf, usize>,
    modules: Vec<Module>,
}

impl Graph<'_> {
    fn visit(&mut self, path: Utf8PathBuf, source: String) -> anyhow::Result<usize> {
        if let Some(&id) = self.ids.get(&path) {
            return Ok(id);
        }

        let id = self.modules.len() + 1;
        let specifiers = requires(&source);

        self.ids.insert(path.clone(), id);
        self.modules.push(Module {
            path: path.clone(),
            source,
            deps: BTreeMap::new(),
        });

        for specifier in specifiers {
            let dep = self
                .resolve(&path, &specifier)
                .ok_or_else(|| anyhow!("Cannot find module '{specifier}' from '{path}'"))?;

            let dep_id = match self.ids.get(&dep) {
                Some(&dep_id) => dep_id,
                None => {
                    let text = fs::read_to_string(self.cx.resolve(&dep))
                        .with_context(|| format!("couldn't read {dep}"))?;
                    self.visit(dep, text)?
                }
            };

            self.modules[id - 1].deps.insert(specifier, dep_id);
        }

        Ok(id)
    }

    fn resolve(&self, from: &Utf8Path, specifier: &str) -> Option<Utf8PathBuf> {
        if specifier.starts_with("./") || specifier.starts_with("../") {
            let dir = from.parent().unwrap_or(Utf8Path::new(""));
            return self.resolve_file(&normalize(&dir.join(specifier)));
        }

        let package = self.npm.join(specifier);
        if let Some(found) = self.resolve_file(&package) {
            return Some(found);
        }

        let main = fs::read_to_string(self.cx.resolve(&package.join("package.json")))
            .ok()
            .and_then(|text| serde_json::from_str::<Manifest>(&text).ok())
            .and_then(|manifest| manifest.main)?;

        self.resolve_file(&normalize(&package.join(main)))
    }

    fn resolve_file(&self, path: &Utf8Path) -> Option<Utf8PathBuf> {
        [
            path.to_path_buf(),
            Utf8PathBuf::from(format!("{path}.js")),
            path.join("index.js"),
        ]
        .into_iter()
        .find(|candidate| self.cx.resolve(candidate).is_file())
    }

    fn render(&self) -> anyhow::Result<String> {
        let mut out = String::from(PRELUDE);

        for (i, module) in self.modules.iter().enumerate() {
            let deps = serde_json::to_string(&module.deps)?;
            writeln!(out, "{}: [function (require, module, exports) {{", i + 1)?;
            writeln!(out, "// {}", module.path)?;
            out.push_str(&module.source);
            if !module.source.ends_with('\n') {
                out.push('\n');
            }
            writeln!(out, "}}, {deps}],")?;
        }

        out.push_str("}, 1);\n");
        Ok(out)
    }
}

#[derive(Deserialize)]
struct Manifest {
    main: Option<String>,
}

/// Specifiers of every `require` call, in order of first appearance.
fn requires(source: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();

    for caps in REQUIRE.captures_iter(source) {
        let specifier = &caps[1];
        if !found.iter().any(|s| s == specifier) {
            found.push(specifier.to_string());
        }
    }

    found
}

/// Lexically resolves `.` and `..` components.
fn normalize(path: &Utf8Path) -> Utf8PathBuf {
    let mut out = Utf8PathBuf::new();

    for component in path.components() {
        match component {
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_str()),
        }
    }

    out
}
