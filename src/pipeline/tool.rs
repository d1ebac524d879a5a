//! Child processes for stages backed by external tools.

use std::io::Write as _;
use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::thread;

use anyhow::{Context as _, anyhow};

/// Locates `name` on `PATH`.
pub(crate) fn find(name: &str) -> anyhow::Result<PathBuf> {
    which::which(name).map_err(|_| anyhow!("`{name}` was not found on PATH, is it installed?"))
}

/// Runs `command`, feeding `input` to its stdin and collecting its output.
pub(crate) fn pipe(mut command: Command, input: &[u8]) -> anyhow::Result<Output> {
    let program = command.get_program().to_string_lossy().into_owned();

    let mut child = command
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("couldn't start {program}"))?;

    let mut stdin = child.stdin.take().context("stdin was not captured")?;
    let input = input.to_vec();
    let writer = thread::spawn(move || stdin.write_all(&input));

    let output = child
        .wait_with_output()
        .with_context(|| format!("couldn't wait for {program}"))?;

    writer
        .join()
        .map_err(|_| anyhow!("stdin writer for {program} panicked"))?
        .with_context(|| format!("couldn't write to {program}"))?;

    Ok(output)
}

/// Fails with the tool's stderr unless it exited successfully.
pub(crate) fn check(program: &str, output: Output) -> anyhow::Result<Vec<u8>> {
    if output.status.success() {
        return Ok(output.stdout);
    }

    Err(anyhow!(
        "{program} exited with {}:\n{}",
        output.status,
        String::from_utf8_lossy(&output.stderr).trim_end()
    ))
}
