//! Script linting through `jshint`.
//!
//! Findings never fail a run; they are rendered in the "stylish" layout,
//! grouped per file, and the assets pass through untouched.

use std::fmt::Write as _;
use std::process::Command;
use std::sync::LazyLock;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use regex::Regex;
use tracing::info;

use super::tool;
use super::{Asset, Stage, StageContext};

/// `file:line:col: message (W033)`, as printed by the unix reporter with
/// `--verbose`.
static LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(.+?):(\d+):(\d+): (.*) \(([EWI]\d+)\)$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn from_code(code: &str) -> Self {
        match code.chars().next() {
            Some('E') => Self::Error,
            Some('I') => Self::Info,
            _ => Self::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub file: Utf8PathBuf,
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub code: String,
    pub severity: Severity,
}

impl Finding {
    fn parse(line: &str) -> Option<Self> {
        let caps = LINE.captures(line.trim_end())?;
        let code = caps[5].to_string();

        Some(Self {
            file: caps[1].into(),
            line: caps[2].parse().ok()?,
            column: caps[3].parse().ok()?,
            message: caps[4].to_string(),
            severity: Severity::from_code(&code),
            code,
        })
    }
}

/// Lints scripts with `jshint`, optionally with a `.jshintrc`.
#[derive(Debug, Default, Clone)]
pub struct Lint {
    config: Option<Utf8PathBuf>,
}

impl Lint {
    pub fn new(config: Option<Utf8PathBuf>) -> Self {
        Self { config }
    }

    fn run(&self, cx: &StageContext<'_>, files: &[&Utf8Path]) -> anyhow::Result<Vec<Finding>> {
        let mut command = Command::new(tool::find("jshint")?);
        command
            .current_dir(cx.root)
            .arg("--reporter=unix")
            .arg("--verbose");

        if let Some(config) = &self.config {
            command.arg(format!("--config={config}"));
        }

        command.args(files.iter().map(|file| file.as_str()));

        let output = tool::pipe(command, &[])?;

        // exits with 2 when it reported findings
        if output.status.code() != Some(2) {
            tool::check("jshint", output.clone())?;
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter_map(Finding::parse)
            .collect())
    }
}

impl Stage for Lint {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn apply(&self, cx: &StageContext<'_>, input: Vec<Asset>) -> anyhow::Result<Vec<Asset>> {
        let files: Vec<&Utf8Path> = input
            .iter()
            .filter_map(|asset| asset.origin.as_deref())
            .collect();

        if files.is_empty() {
            return Ok(input);
        }

        let findings = self.run(cx, &files)?;

        if findings.is_empty() {
            info!(task = cx.task, "{} files lint free", files.len());
        } else {
            let report = render_stylish(&findings);
            tracing_indicatif::suspend_tracing_indicatif(|| eprint!("{report}"));
        }

        Ok(input)
    }
}

/// Renders findings grouped per file, followed by a summary.
pub fn render_stylish(findings: &[Finding]) -> String {
    let mut out = String::new();
    if findings.is_empty() {
        return out;
    }

    let mut current: Option<&Utf8Path> = None;
    for finding in findings {
        if current != Some(finding.file.as_path()) {
            if current.is_some() {
                out.push('\n');
            }
            let _ = writeln!(out, "{}", style(&finding.file).underlined());
            current = Some(finding.file.as_path());
        }

        let position = style(format!("line {}  col {}", finding.line, finding.column)).dim();
        let message = match finding.severity {
            Severity::Error => style(&finding.message).red(),
            Severity::Warning => style(&finding.message).blue(),
            Severity::Info => style(&finding.message).dim(),
        };
        let _ = writeln!(
            out,
            "  {position}  {message}  {}",
            style(format!("({})", finding.code)).dim()
        );
    }

    let errors = findings
        .iter()
        .filter(|f| f.severity == Severity::Error)
        .count();
    let warnings = findings.len() - errors;

    out.push('\n');
    if errors > 0 {
        let _ = writeln!(out, "{}", style(format!("✖  {}", plural(errors, "error"))).red());
    }
    if warnings > 0 {
        let _ = writeln!(
            out,
            "{}",
            style(format!("⚠  {}", plural(warnings, "warning"))).yellow()
        );
    }

    out
}

fn plural(count: usize, noun: &str) -> String {
    match count {
        1 => format!("1 {noun}"),
        n => format!("{n} {noun}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::Scratch;

    #[test]
    fn test_parse_unix_line() {
        let finding =
            Finding::parse("src/scripts/main.js:3:14: Missing semicolon. (W033)").unwrap();

        assert_eq!(finding.file, "src/scripts/main.js");
        assert_eq!(finding.line, 3);
        assert_eq!(finding.column, 14);
        assert_eq!(finding.message, "Missing semicolon.");
        assert_eq!(finding.code, "W033");
        assert_eq!(finding.severity, Severity::Warning);

        assert!(Finding::parse("").is_none());
        assert!(Finding::parse("2 errors").is_none());
    }

    #[test]
    fn test_render_stylish() {
        let findings = [
            "src/a.js:1:5: Missing semicolon. (W033)",
            "src/a.js:4:1: Unmatched '{'. (E019)",
            "src/b.js:2:2: Expected an assignment. (W030)",
        ]
        .map(|line| Finding::parse(line).unwrap());

        let report = console::strip_ansi_codes(&render_stylish(&findings)).into_owned();

        assert!(report.starts_with("src/a.js\n  line 1  col 5  Missing semicolon.  (W033)\n"));
        assert!(report.contains("\nsrc/b.js\n  line 2  col 2"));
        assert!(report.contains("✖  1 error\n"));
        assert!(report.contains("⚠  2 warnings\n"));
        assert_eq!(render_stylish(&[]), "");
    }

    #[test]
    fn test_lint_passes_assets_through() {
        if which::which("jshint").is_err() {
            return;
        }

        let scratch = Scratch::new();
        scratch.write("src/scripts/main.js", "var a = 1\n");

        let mut asset = Asset::new("src/scripts", "main.js", "var a = 1\n");
        asset.origin = Some("src/scripts/main.js".into());

        let lint = Lint::default();
        let findings = lint
            .run(&scratch.cx(), &[Utf8Path::new("src/scripts/main.js")])
            .unwrap();
        assert!(findings.iter().any(|f| f.code == "W033"));

        let out = lint.apply(&scratch.cx(), vec![asset.clone()]).unwrap();
        assert_eq!(out, vec![asset]);
    }
}
