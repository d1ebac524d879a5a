//! Ordered glob pattern sets with `!` negation.
//!
//! Patterns are always evaluated against paths relative to the project root,
//! with `/` separators. A single `*` does not cross directory boundaries, `**`
//! does.

use std::collections::HashSet;
use std::fmt;

use camino::{Utf8Path, Utf8PathBuf};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};

use crate::error::PatternError;

#[derive(Clone)]
pub struct PatternSet {
    raw: Vec<String>,
    include: GlobSet,
    exclude: Option<GlobSet>,
    /// Static prefix of each include pattern, in declaration order.
    bases: Vec<Utf8PathBuf>,
}

impl fmt::Debug for PatternSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PatternSet").field(&self.raw).finish()
    }
}

impl PatternSet {
    pub fn new(patterns: impl IntoIterator<Item = impl AsRef<str>>) -> Result<Self, PatternError> {
        let mut raw = Vec::new();
        let mut include = GlobSetBuilder::new();
        let mut exclude = GlobSetBuilder::new();
        let mut bases = Vec::new();
        let mut has_exclude = false;

        for pattern in patterns {
            let pattern = pattern.as_ref();
            raw.push(pattern.to_string());

            match pattern.strip_prefix('!') {
                Some(negated) => {
                    exclude.add(compile(negated)?);
                    has_exclude = true;
                }
                None => {
                    include.add(compile(pattern)?);
                    bases.push(static_base(pattern));
                }
            }
        }

        let build = |builder: GlobSetBuilder| {
            builder
                .build()
                .map_err(|e| PatternError(raw.join(", "), e))
        };

        Ok(Self {
            include: build(include)?,
            exclude: if has_exclude { Some(build(exclude)?) } else { None },
            bases,
            raw,
        })
    }

    pub fn patterns(&self) -> &[String] {
        &self.raw
    }

    /// True when `path` matches at least one include pattern and no exclude
    /// pattern.
    pub fn matches(&self, path: &Utf8Path) -> bool {
        let path = path.as_str().trim_start_matches("./");

        if !self.include.is_match(path) {
            return false;
        }

        match &self.exclude {
            Some(exclude) => !exclude.is_match(path),
            None => true,
        }
    }

    /// Static prefixes of the include patterns, e.g. `src/scripts` for
    /// `src/scripts/**/*.js`.
    pub fn bases(&self) -> &[Utf8PathBuf] {
        &self.bases
    }

    /// Lists the files under `root` matched by this set.
    ///
    /// Each file is returned as `(base, relative)` where `base` is the static
    /// prefix of the first pattern that found it (or the parent directory for
    /// patterns naming a concrete file) and `relative` the rest of its path.
    /// The result is sorted and free of duplicates.
    pub fn files(&self, root: &Utf8Path) -> Result<Vec<(Utf8PathBuf, Utf8PathBuf)>, anyhow::Error> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for base in &self.bases {
            let absolute = root.join(base);

            if absolute.is_file() {
                if self.matches(base) && seen.insert(base.clone()) {
                    let dir = base.parent().unwrap_or(Utf8Path::new("")).to_path_buf();
                    let name = Utf8PathBuf::from(base.file_name().unwrap_or_default());
                    found.push((dir, name));
                }
                continue;
            }

            if !absolute.is_dir() {
                continue;
            }

            let walk = format!("{}/**/*", glob::Pattern::escape(absolute.as_str()));
            for entry in glob::glob(&walk)? {
                let path = Utf8PathBuf::try_from(entry?)?;
                if !path.is_file() {
                    continue;
                }

                let rel = path.strip_prefix(root)?.to_path_buf();
                if self.matches(&rel) && seen.insert(rel.clone()) {
                    let relative = rel.strip_prefix(base)?.to_path_buf();
                    found.push((base.clone(), relative));
                }
            }
        }

        found.sort_by(|a, b| a.0.join(&a.1).cmp(&b.0.join(&b.1)));
        Ok(found)
    }

    /// Directories to observe so that every path this set can match is seen.
    pub fn watch_roots(&self, root: &Utf8Path) -> Vec<Utf8PathBuf> {
        let roots = self
            .bases
            .iter()
            .map(|base| {
                let absolute = root.join(base);
                if absolute.is_file() {
                    absolute.parent().unwrap_or(root).to_path_buf()
                } else {
                    nearest_existing(&absolute, root)
                }
            })
            .collect();

        collapse_watch_paths(roots)
    }
}

fn compile(pattern: &str) -> Result<globset::Glob, PatternError> {
    let normalized = pattern.trim_start_matches("./");
    GlobBuilder::new(normalized)
        .literal_separator(true)
        .build()
        .map_err(|e| PatternError(pattern.to_string(), e))
}

/// Splits off the leading components that contain no glob syntax.
pub(crate) fn static_base(pattern: &str) -> Utf8PathBuf {
    let path = Utf8Path::new(pattern.trim_start_matches("./"));

    path.components()
        .take_while(|c| !c.as_str().contains(['*', '?', '[', '{']))
        .collect()
}

/// Walks up from `path` until an existing directory is found, stopping at
/// `root`.
fn nearest_existing(path: &Utf8Path, root: &Utf8Path) -> Utf8PathBuf {
    let mut current = path;
    while !current.is_dir() && current != root {
        match current.parent() {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current.to_path_buf()
}

/// Reduces a set of paths to the minimal set of watch roots.
///
/// If we watch `/a` and `/a/b`, we only need to watch `/a` because
/// the watcher is recursive.
pub(crate) fn collapse_watch_paths(paths: Vec<Utf8PathBuf>) -> Vec<Utf8PathBuf> {
    let mut paths = paths;
    paths.sort();
    paths.dedup();

    let mut filtered: Vec<Utf8PathBuf> = Vec::new();
    for path in paths {
        if let Some(last) = filtered.last()
            && path.starts_with(last)
        {
            continue;
        }
        filtered.push(path);
    }

    filtered
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn touch(root: &Utf8Path, rel: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, rel).unwrap();
    }

    #[test]
    fn test_negated_patterns() {
        let set = PatternSet::new(["src/scripts/**/*.js", "!src/scripts/vendor/**/*.js"]).unwrap();

        assert!(set.matches(Utf8Path::new("src/scripts/main.js")));
        assert!(set.matches(Utf8Path::new("src/scripts/lib/a.js")));
        assert!(!set.matches(Utf8Path::new("src/scripts/vendor/jquery.js")));
        assert!(!set.matches(Utf8Path::new("src/scripts/main.ts")));
        assert!(!set.matches(Utf8Path::new("src/styles/main.scss")));
    }

    #[test]
    fn test_single_star_stays_in_directory() {
        let set = PatternSet::new(["src/*.js"]).unwrap();

        assert!(set.matches(Utf8Path::new("src/a.js")));
        assert!(!set.matches(Utf8Path::new("src/lib/a.js")));
    }

    #[test]
    fn test_leading_dot_slash_is_ignored() {
        let set = PatternSet::new(["./**/*.html"]).unwrap();

        assert!(set.matches(Utf8Path::new("index.html")));
        assert!(set.matches(Utf8Path::new("templates/a/b.html")));
        assert_eq!(set.bases(), [Utf8PathBuf::new()]);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = PatternSet::new(["src/[.js"]).unwrap_err();
        assert_eq!(err.0, "src/[.js");
    }

    #[test]
    fn test_static_base() {
        assert_eq!(static_base("src/styles/**/*.scss"), "src/styles");
        assert_eq!(static_base("src/styles/main.scss"), "src/styles/main.scss");
        assert_eq!(static_base("**/*.html"), "");
        assert_eq!(static_base("src/{a,b}/*.js"), "src");
    }

    #[test]
    fn test_files_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        touch(root, "src/scripts/main.js");
        touch(root, "src/scripts/lib/util.js");
        touch(root, "src/scripts/vendor/jquery.js");
        touch(root, "src/scripts/readme.md");

        let set = PatternSet::new(["src/scripts/**/*.js", "!src/scripts/vendor/**"]).unwrap();
        let files = set.files(root).unwrap();

        assert_eq!(
            files,
            vec![
                ("src/scripts".into(), "lib/util.js".into()),
                ("src/scripts".into(), "main.js".into()),
            ]
        );
    }

    #[test]
    fn test_files_concrete_file() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        touch(root, "src/styles/main.scss");
        touch(root, "src/styles/_partial.scss");

        let set = PatternSet::new(["src/styles/main.scss", "src/missing.scss"]).unwrap();
        let files = set.files(root).unwrap();

        assert_eq!(files, vec![("src/styles".into(), "main.scss".into())]);
    }

    #[test]
    fn test_watch_roots() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();

        touch(root, "src/styles/main.scss");
        touch(root, "src/scripts/main.js");

        let set = PatternSet::new([
            "src/styles/**/*.scss",
            "src/styles/main.scss",
            "src/scripts/**/*.js",
            "src/not-there-yet/**/*.js",
        ])
        .unwrap();

        assert_eq!(
            set.watch_roots(root),
            vec![root.join("src")]
        );
    }

    #[test]
    fn test_collapse_watch_paths() {
        let paths = vec![
            Utf8PathBuf::from("/a"),
            Utf8PathBuf::from("/a/b"),
            Utf8PathBuf::from("/a/b/c"),
            Utf8PathBuf::from("/b"),
            Utf8PathBuf::from("/c/d"),
        ];

        assert_eq!(
            collapse_watch_paths(paths),
            vec![
                Utf8PathBuf::from("/a"),
                Utf8PathBuf::from("/b"),
                Utf8PathBuf::from("/c/d")
            ]
        );
    }

    #[test]
    fn test_collapse_watch_paths_similar_names() {
        let paths = vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")];

        // /foo-bar is not a subdirectory of /foo
        assert_eq!(
            collapse_watch_paths(paths),
            vec![Utf8PathBuf::from("/foo"), Utf8PathBuf::from("/foo-bar")]
        );
    }
}
