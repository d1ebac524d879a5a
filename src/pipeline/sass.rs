use camino::Utf8PathBuf;
use thiserror::Error;

use super::{Asset, Stage, StageContext};

/// Errors that can occur when compiling stylesheets.
#[derive(Debug, Error)]
pub enum StyleError {
    /// A Sass compilation error occurred.
    #[error("Sass compilation error in {0}:\n{1}")]
    Sass(Utf8PathBuf, Box<grass::Error>),

    #[error("{0} is not valid UTF-8")]
    Encoding(Utf8PathBuf),
}

/// Compiles Sass/SCSS to CSS using `grass`.
///
/// Partials (files whose name starts with `_`) are dropped, they only exist to
/// be imported. `@import`/`@use` are resolved next to the source file.
///
/// Output is always expanded, minification is a separate stage.
#[derive(Debug, Default)]
pub struct Sass;

impl Sass {
    pub fn new() -> Self {
        Self
    }
}

impl Stage for Sass {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let mut output = Vec::with_capacity(input.len());

        for asset in input {
            if asset
                .relative
                .file_name()
                .is_some_and(|name| name.starts_with('_'))
            {
                continue;
            }

            let path = asset.path();
            let text = String::from_utf8(asset.contents)
                .map_err(|_| StyleError::Encoding(path.clone()))?;

            let dir = cx.resolve(
                asset
                    .origin
                    .as_deref()
                    .unwrap_or(&path)
                    .parent()
                    .unwrap_or(&asset.base),
            );

            let opts = grass::Options::default()
                .style(grass::OutputStyle::Expanded)
                .load_path(&dir);
            let css = grass::from_string(text, &opts).map_err(|e| StyleError::Sass(path, e))?;

            output.push(Asset {
                relative: asset.relative.with_extension("css"),
                contents: css.into_bytes(),
                ..asset
            });
        }

        Ok(output)
    }
}
