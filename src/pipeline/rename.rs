use camino::Utf8PathBuf;

use super::{Asset, Stage, StageContext};

/// Changes the file name of every asset, keeping its directory.
#[derive(Debug, Clone)]
pub enum Rename {
    /// Inserts a suffix before the extension, `main.css` to `main.min.css`.
    Suffix(String),
    /// Replaces the file name outright.
    To(String),
}

impl Rename {
    pub fn suffix(suffix: impl Into<String>) -> Self {
        Self::Suffix(suffix.into())
    }

    pub fn to(name: impl Into<String>) -> Self {
        Self::To(name.into())
    }

    fn rename(&self, relative: &Utf8PathBuf) -> Utf8PathBuf {
        let name = match self {
            Self::To(name) => name.clone(),
            Self::Suffix(suffix) => {
                let stem = relative.file_stem().unwrap_or_default();
                match relative.extension() {
                    Some(ext) => format!("{stem}{suffix}.{ext}"),
                    None => format!("{stem}{suffix}"),
                }
            }
        };

        relative.with_file_name(name)
    }
}

impl Stage for Rename {
    fn name(&self) -> &'static str {
        "rename"
    }

    fn apply(&self, _: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        Ok(input
            .into_iter()
            .map(|asset| Asset {
                relative: self.rename(&asset.relative),
                ..asset
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rename() {
        let suffix = Rename::suffix(".min");
        assert_eq!(suffix.rename(&"main.css".into()), "main.min.css");
        assert_eq!(suffix.rename(&"lib/a.b.js".into()), "lib/a.b.min.js");
        assert_eq!(suffix.rename(&"LICENSE".into()), "LICENSE.min");

        let to = Rename::to("bundle.js");
        assert_eq!(to.rename(&"main.js".into()), "bundle.js");
        assert_eq!(to.rename(&"nested/main.js".into()), "nested/bundle.js");
    }
}
