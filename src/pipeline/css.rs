use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, RwLock};

use anyhow::anyhow;
use lightningcss::stylesheet::{MinifyOptions, ParserOptions, PrinterOptions, StyleSheet};
use lightningcss::targets::{Browsers, Targets};
use tracing::warn;

use super::{Asset, Stage, StageContext};

const VENDORS: [&str; 4] = ["-webkit-", "-moz-", "-ms-", "-o-"];

/// Adds vendor prefixes for the given browserslist queries.
///
/// The stylesheet is kept as written: prefixed variants are inserted in front
/// of the declaration they belong to, nothing is merged, shortened or moved.
/// Declarations the CSS parser rejects, such as the `*zoom` hack, pass through
/// untouched.
#[derive(Debug)]
pub struct Autoprefix {
    targets: Targets,
}

impl Autoprefix {
    pub fn new(browsers: impl IntoIterator<Item = impl AsRef<str>>) -> anyhow::Result<Self> {
        Ok(Self {
            targets: targets(browsers)?,
        })
    }
}

impl Stage for Autoprefix {
    fn name(&self) -> &'static str {
        "autoprefix"
    }

    fn apply(&self, _: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        input
            .into_iter()
            .map(|asset| -> anyhow::Result<Asset> {
                let code = prefix(asset.text()?, self.targets, asset.path().as_str());
                Ok(Asset {
                    contents: code.into_bytes(),
                    ..asset
                })
            })
            .collect()
    }
}

/// Minifies stylesheets. Paths are left alone, pair with
/// [`Rename`](super::Rename) for `.min.css` output.
#[derive(Debug, Default)]
pub struct MinifyCss {
    targets: Targets,
}

impl MinifyCss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for MinifyCss {
    fn name(&self) -> &'static str {
        "minify-css"
    }

    fn apply(&self, _: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        input
            .into_iter()
            .map(|asset| minify(asset, self.targets))
            .collect()
    }
}

fn targets(queries: impl IntoIterator<Item = impl AsRef<str>>) -> anyhow::Result<Targets> {
    let queries: Vec<String> = queries.into_iter().map(|q| q.as_ref().to_string()).collect();
    let browsers = Browsers::from_browserslist(&queries)
        .map_err(|e| anyhow!("invalid browser query {queries:?}: {e}"))?;

    Ok(Targets {
        browsers,
        ..Targets::default()
    })
}

fn minify(asset: Asset, targets: Targets) -> anyhow::Result<Asset> {
    let path = asset.path();

    let code = {
        let warnings = Arc::new(RwLock::new(Vec::new()));
        let options = ParserOptions {
            filename: path.to_string(),
            error_recovery: true,
            warnings: Some(Arc::clone(&warnings)),
            ..ParserOptions::default()
        };

        let mut sheet =
            StyleSheet::parse(asset.text()?, options).map_err(|e| anyhow!("{path}: {e}"))?;

        if let Ok(warnings) = warnings.read() {
            for warning in warnings.iter() {
                warn!("{path}: dropped from minified output, {warning}");
            }
        }

        sheet
            .minify(MinifyOptions {
                targets,
                ..MinifyOptions::default()
            })
            .map_err(|e| anyhow!("{path}: {e}"))?;

        sheet
            .to_css(PrinterOptions {
                minify: true,
                targets,
                ..PrinterOptions::default()
            })
            .map_err(|e| anyhow!("{path}: {e}"))?
            .code
    };

    Ok(Asset {
        contents: code.into_bytes(),
        ..asset
    })
}

/// Inserts the prefixed variants of every declaration in front of it.
fn prefix(css: &str, targets: Targets, path: &str) -> String {
    let mut inserts: Vec<(usize, String)> = Vec::new();

    for block in blocks(css) {
        let present: HashSet<String> = block.iter().map(|r| compact(&css[r.clone()])).collect();

        for range in block {
            let before = &css[..range.start];
            let sep = match &before[before.trim_end().len()..] {
                "" => " ",
                ws => ws,
            };

            for variant in variants(&css[range.clone()], targets, path) {
                if !present.contains(&compact(&variant)) {
                    inserts.push((range.start, format!("{variant};{sep}")));
                }
            }
        }
    }

    inserts.sort_by_key(|(at, _)| *at);

    let extra: usize = inserts.iter().map(|(_, s)| s.len()).sum();
    let mut out = String::with_capacity(css.len() + extra);
    let mut last = 0;
    for (at, text) in inserts {
        out.push_str(&css[last..at]);
        out.push_str(&text);
        last = at;
    }
    out.push_str(&css[last..]);
    out
}

/// Prefixed forms of a single declaration needed by `targets`.
fn variants(decl: &str, targets: Targets, path: &str) -> Vec<String> {
    if is_prefixed(decl) {
        return Vec::new();
    }

    let source = format!(".x{{{decl}}}");
    let warnings = Arc::new(RwLock::new(Vec::new()));
    let options = ParserOptions {
        filename: path.to_string(),
        error_recovery: true,
        warnings: Some(Arc::clone(&warnings)),
        ..ParserOptions::default()
    };

    let Ok(mut sheet) = StyleSheet::parse(&source, options) else {
        warn!("{path}: kept `{decl}` as written, it does not parse");
        return Vec::new();
    };

    if let Ok(warnings) = warnings.read() {
        for warning in warnings.iter() {
            warn!("{path}: kept `{decl}` as written, {warning}");
        }
    }

    let printed = sheet
        .minify(MinifyOptions {
            targets,
            ..MinifyOptions::default()
        })
        .ok()
        .and_then(|_| {
            sheet
                .to_css(PrinterOptions {
                    minify: true,
                    targets,
                    ..PrinterOptions::default()
                })
                .ok()
        });

    let Some(printed) = printed else {
        return Vec::new();
    };

    let body = printed
        .code
        .split_once('{')
        .and_then(|(_, rest)| rest.rsplit_once('}'))
        .map(|(body, _)| body)
        .unwrap_or_default();

    declarations(body, 0, body.len())
        .into_iter()
        .map(|r| &body[r])
        .filter(|d| is_prefixed(d))
        .map(expand)
        .collect()
}

fn is_prefixed(decl: &str) -> bool {
    VENDORS.iter().any(|v| decl.contains(v))
}

/// `a:b!important` to `a: b !important`.
fn expand(decl: &str) -> String {
    match decl.split_once(':') {
        Some((prop, value)) => {
            let value = value.trim().replace("!important", " !important");
            format!("{}: {}", prop.trim(), value.trim())
        }
        None => decl.to_string(),
    }
}

fn compact(decl: &str) -> String {
    decl.chars().filter(|c| !c.is_whitespace()).collect()
}

/// Declaration ranges of every innermost `{}` block, one list per block.
fn blocks(css: &str) -> Vec<Vec<Range<usize>>> {
    let bytes = css.as_bytes();
    let mut open: Vec<(usize, bool)> = Vec::new();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i);
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i);
                continue;
            }
            b'{' => {
                if let Some(parent) = open.last_mut() {
                    parent.1 = true;
                }
                open.push((i + 1, false));
            }
            b'}' => {
                if let Some((start, false)) = open.pop() {
                    out.push(declarations(css, start, i));
                }
            }
            _ => {}
        }
        i += 1;
    }

    out
}

/// Splits `css[start..end]` on top-level semicolons.
fn declarations(css: &str, start: usize, end: usize) -> Vec<Range<usize>> {
    let bytes = css.as_bytes();
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut seg = start;
    let mut i = start;

    while i < end {
        match bytes[i] {
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i = skip_comment(bytes, i).min(end);
                continue;
            }
            b'"' | b'\'' => {
                i = skip_string(bytes, i).min(end);
                continue;
            }
            b'(' | b'[' => depth += 1,
            b')' | b']' => depth = depth.saturating_sub(1),
            b';' if depth == 0 => {
                push_trimmed(css, seg..i, &mut out);
                seg = i + 1;
            }
            _ => {}
        }
        i += 1;
    }

    push_trimmed(css, seg..end, &mut out);
    out
}

fn push_trimmed(css: &str, range: Range<usize>, out: &mut Vec<Range<usize>>) {
    let text = &css[range.clone()];
    let trimmed = text.trim();
    if trimmed.contains(':') {
        let start = range.start + (text.len() - text.trim_start().len());
        out.push(start..start + trimmed.len());
    }
}

fn skip_comment(bytes: &[u8], at: usize) -> usize {
    let mut i = at + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

fn skip_string(bytes: &[u8], at: usize) -> usize {
    let quote = bytes[at];
    let mut i = at + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::Scratch;

    fn css(text: &str) -> Vec<Asset> {
        vec![Asset::new("src/styles", "main.css", text)]
    }

    #[test]
    fn test_autoprefix_adds_prefixes() {
        let scratch = Scratch::new();
        let stage = Autoprefix::new(["safari 5", "firefox 10"]).unwrap();

        let out = stage
            .apply(&scratch.cx(), css(".a {\n  user-select: none;\n}\n"))
            .unwrap();

        let text = out[0].text().unwrap();
        assert!(text.contains("  -webkit-user-select: none;\n"));
        assert!(text.contains("  -moz-user-select: none;\n"));
        assert!(text.ends_with("  user-select: none;\n}\n"));
        assert_eq!(out[0].path(), "src/styles/main.css");
    }

    #[test]
    fn test_autoprefix_keeps_ie_hacks() {
        let scratch = Scratch::new();
        let stage = Autoprefix::new(["last 3 versions", "ie 8", "ie 9"]).unwrap();
        let input = ".a { *zoom: 1; color: red; }\n";

        let out = stage.apply(&scratch.cx(), css(input)).unwrap();

        assert_eq!(out[0].text().unwrap(), input);
    }

    #[test]
    fn test_autoprefix_keeps_order_and_values() {
        let scratch = Scratch::new();
        let stage = Autoprefix::new(["ie 9"]).unwrap();
        let input = "/* main */\n.a {\n  margin: 0px 0px 0px 0px;\n  color: #ff0000;\n}\n\n@media (min-width: 30em) {\n  .b {\n    background: url(\"a;b.png\");\n  }\n}\n";

        let out = stage.apply(&scratch.cx(), css(input)).unwrap();

        assert_eq!(out[0].text().unwrap(), input);
    }

    #[test]
    fn test_existing_prefix_is_not_duplicated() {
        let scratch = Scratch::new();
        let stage = Autoprefix::new(["safari 5"]).unwrap();

        let out = stage
            .apply(
                &scratch.cx(),
                css(".a { -webkit-user-select: none; user-select: none; }"),
            )
            .unwrap();

        let text = out[0].text().unwrap();
        assert_eq!(text.matches("-webkit-user-select").count(), 1);
    }

    #[test]
    fn test_declarations_respect_strings_and_parens() {
        let text = ".a { content: \"x;y\"; background: url(a;b.png) }";
        let found: Vec<&str> = blocks(text)
            .into_iter()
            .flatten()
            .map(|r| &text[r])
            .collect();

        assert_eq!(found, ["content: \"x;y\"", "background: url(a;b.png)"]);
    }

    #[test]
    fn test_minify_is_smaller() {
        let scratch = Scratch::new();
        let input = ".a {\n  color: #ff0000;\n}\n\n.b {\n  margin: 0px 0px 0px 0px;\n}\n";

        let out = MinifyCss::new().apply(&scratch.cx(), css(input)).unwrap();

        let text = out[0].text().unwrap();
        assert!(text.len() < input.len());
        assert!(!text.contains('\n'));
    }

    #[test]
    fn test_minify_recovers_from_hacks() {
        let scratch = Scratch::new();

        let out = MinifyCss::new()
            .apply(&scratch.cx(), css(".a { *zoom: 1; color: red; }"))
            .unwrap();

        assert!(out[0].text().unwrap().contains("color:red"));
    }

    #[test]
    fn test_invalid_query() {
        assert!(Autoprefix::new(["not a browser at all 99"]).is_err());
    }
}
