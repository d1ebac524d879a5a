use std::fs;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use tracing::{debug, trace};

use super::{Asset, Stage, StageContext};
use crate::io::Hash32;

/// Writes assets below a directory, preserving their relative paths, and
/// passes them on rebased onto that directory.
///
/// Files whose contents did not change are not touched, so file watchers
/// further down the line don't see spurious modifications.
#[derive(Debug, Clone)]
pub struct Dest {
    dir: Utf8PathBuf,
}

impl Dest {
    pub fn new(dir: impl Into<Utf8PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Stage for Dest {
    fn name(&self) -> &'static str {
        "dest"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let mut output = Vec::with_capacity(input.len());

        for asset in input {
            let path = cx.resolve(&self.dir.join(&asset.relative));

            if Hash32::hash_file(&path) == Some(Hash32::hash(&asset.contents)) {
                trace!(task = cx.task, "unchanged {path}");
            } else {
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("couldn't create directory {parent}"))?;
                }

                fs::write(&path, &asset.contents)
                    .with_context(|| format!("couldn't write {path}"))?;

                debug!(task = cx.task, "wrote {path}");
            }

            output.push(Asset {
                base: self.dir.clone(),
                ..asset
            });
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;
    use crate::pipeline::tests::Scratch;

    #[test]
    fn test_writes_below_dir() {
        let scratch = Scratch::new();
        let input = vec![
            Asset::new("src/scripts", "main.js", "a()"),
            Asset::new("src/scripts", "lib/b.js", "b()"),
        ];

        let out = Dest::new("public/scripts")
            .apply(&scratch.cx(), input)
            .unwrap();

        assert_eq!(scratch.read("public/scripts/main.js"), "a()");
        assert_eq!(scratch.read("public/scripts/lib/b.js"), "b()");
        assert_eq!(out[1].path(), "public/scripts/lib/b.js");
    }

    #[test]
    fn test_unchanged_file_is_not_rewritten() {
        let scratch = Scratch::new();
        scratch.write("public/a.css", "a{}");

        let path = scratch.root.join("public/a.css");
        let past = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(past)
            .unwrap();

        let dest = Dest::new("public");
        dest.apply(&scratch.cx(), vec![Asset::new("src", "a.css", "a{}")])
            .unwrap();
        assert_eq!(fs::metadata(&path).unwrap().modified().unwrap(), past);

        dest.apply(&scratch.cx(), vec![Asset::new("src", "a.css", "b{}")])
            .unwrap();
        assert_eq!(scratch.read("public/a.css"), "b{}");
        assert_ne!(fs::metadata(&path).unwrap().modified().unwrap(), past);
    }
}
