use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use console::style;
use tracing::Level;

use tsumugi::config::{CONFIG_FILE, Config};
use tsumugi::logging::init_logging;
use tsumugi::{Mode, Runner, tasks};

#[derive(ValueEnum, Debug, Clone, Copy)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Front-end asset task runner.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Task to run.
    #[clap(index = 1, default_value = "default")]
    task: String,

    /// Config file, defaults to `Tsumugi.toml` in the project root.
    #[clap(long)]
    config: Option<Utf8PathBuf>,

    /// Project root.
    #[clap(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Overrides the `TSUMUGI_LOG` filter.
    #[clap(long, value_enum)]
    log_level: Option<LogLevel>,

    /// Print the task graph as a Mermaid diagram and exit.
    #[clap(long)]
    graph: bool,
}

fn main() -> ExitCode {
    match run(Args::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> anyhow::Result<ExitCode> {
    init_logging(args.log_level.map(Level::from))?;

    let root = args
        .root
        .canonicalize_utf8()
        .with_context(|| format!("project root {} does not exist", args.root))?;

    let config_path = args.config.unwrap_or_else(|| root.join(CONFIG_FILE));
    let config = Config::load(&config_path)?;
    let registry = tasks::registry()?;

    if args.graph {
        println!("{registry}");
        return Ok(ExitCode::SUCCESS);
    }

    let runner = Arc::new(Runner::new(registry, config, root));
    let report = runner.run(&args.task)?;

    match runner.mode() {
        Mode::Build => {
            runner.shutdown();
            match report.is_success() {
                true => Ok(ExitCode::SUCCESS),
                false => Ok(ExitCode::FAILURE),
            }
        }
        Mode::Watch => {
            runner.watch()?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
