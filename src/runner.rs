//! Executes resolved task plans.
//!
//! The runner resolves a task name to its plan and runs every task of the
//! plan in order, sequentially. A failing task is reported and skipped over;
//! the remaining tasks of the plan still run. Tasks interact with the rest of
//! the session (file watching, live reload) through their [`Context`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use console::style;
use tracing::{Level, debug, error, info, warn};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::Mode;
use crate::config::Config;
use crate::error::{LiveError, PatternError, RegistryError, RunError, StageError, WatchError};
use crate::io::{as_overhead, get_style_task};
use crate::live::{LiveReload, ReloadEvent, Reloader};
use crate::pipeline::{Asset, Pipeline, StageContext};
use crate::registry::{Registry, Task};
use crate::watch::{Handler, WatchBinder};

/// State shared by every task run in one process.
#[derive(Default)]
struct Session {
    reloader: Reloader,
    binder: Mutex<WatchBinder>,
    watching: AtomicBool,
    live: Mutex<Option<LiveReload>>,
}

/// Handed to every task action.
pub struct Context<'a> {
    pub config: &'a Config,
    /// Project root, every configured path is relative to it.
    pub root: &'a Utf8Path,
    /// Name of the running task.
    pub task: &'a str,
    session: &'a Session,
}

impl Context<'_> {
    pub fn reloader(&self) -> &Reloader {
        &self.session.reloader
    }

    pub fn stage_context(&self) -> StageContext<'_> {
        StageContext {
            root: self.root,
            task: self.task,
            reloader: &self.session.reloader,
        }
    }

    /// Runs a pipeline to completion.
    pub fn pipe(&self, pipeline: &Pipeline) -> Result<Vec<Asset>, StageError> {
        pipeline.run(&self.stage_context())
    }

    /// Runs `tasks` whenever a file matching `patterns` changes. Takes effect
    /// once the runner starts watching.
    pub fn watch(
        &self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
        tasks: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), PatternError> {
        self.warn_if_watching();
        self.binder().bind(patterns, tasks)
    }

    /// Reloads connected browsers whenever a file matching `patterns`
    /// changes.
    pub fn watch_reload(
        &self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<(), PatternError> {
        self.warn_if_watching();
        self.binder().bind_reload(patterns)
    }

    /// Starts the live reload bridge for this session, serving `live.root`
    /// or else the destination directory. Does nothing when it already runs.
    pub fn serve(&self) -> Result<(), LiveError> {
        let mut live = self.session.live.lock().unwrap_or_else(|e| e.into_inner());
        if live.is_some() {
            return Ok(());
        }

        let served = self
            .config
            .live
            .root
            .as_ref()
            .unwrap_or(&self.config.paths.dest);

        let bridge = LiveReload::start(&self.config.live, &self.root.join(served))?;
        self.session.reloader.connect(bridge.sender());
        *live = Some(bridge);

        Ok(())
    }

    fn binder(&self) -> std::sync::MutexGuard<'_, WatchBinder> {
        self.session
            .binder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn warn_if_watching(&self) {
        if self.session.watching.load(Ordering::Acquire) {
            warn!(task = self.task, "already watching, new bindings are ignored");
        }
    }
}

/// Outcome of [`Runner::run`].
#[derive(Debug, Default)]
pub struct Report {
    /// Tasks that ran, in order.
    pub ran: Vec<String>,
    pub failed: Vec<RunError>,
}

impl Report {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Runner {
    registry: Registry,
    config: Config,
    root: Utf8PathBuf,
    session: Session,
}

impl Runner {
    pub fn new(registry: Registry, config: Config, root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            registry,
            config,
            root: root.into(),
            session: Session::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn reloader(&self) -> &Reloader {
        &self.session.reloader
    }

    /// Resolves `name` and runs its plan. Only a misconfigured task graph is
    /// an error; task failures are collected in the report.
    pub fn run(&self, name: &str) -> Result<Report, RegistryError> {
        let plan = self.registry.resolve(name)?;
        let mut report = Report::default();

        let s = Instant::now();
        debug!(
            "plan for '{name}': {}",
            plan.iter().map(|task| task.name()).collect::<Vec<_>>().join(", ")
        );

        for task in plan {
            if let Err(e) = self.run_task(task) {
                error!("{e}");
                report.failed.push(e);
            }
            report.ran.push(task.name().to_string());
        }

        if report.is_success() {
            info!("Finished '{}' {}", style(name).cyan(), as_overhead(s));
        } else {
            warn!(
                "Finished '{}' with {} failed task(s) {}",
                style(name).cyan(),
                report.failed.len(),
                as_overhead(s)
            );
        }

        Ok(report)
    }

    fn run_task(&self, task: &Task) -> Result<(), RunError> {
        let name = task.name();
        let s = Instant::now();

        let span = tracing::span!(Level::INFO, "task", task = name);
        if let Ok(pb_style) = get_style_task() {
            span.pb_set_style(&pb_style);
        }
        span.pb_set_message(&format!("Running {name}"));
        let _enter = span.enter();

        info!("Starting '{}'...", style(name).cyan());

        let cx = Context {
            config: &self.config,
            root: &self.root,
            task: name,
            session: &self.session,
        };

        let result = match catch_unwind(AssertUnwindSafe(|| task.call(&cx))) {
            Ok(result) => result,
            Err(panic) => {
                let msg = if let Some(s) = panic.downcast_ref::<&str>() {
                    format!("Task panicked: {s}")
                } else if let Some(s) = panic.downcast_ref::<String>() {
                    format!("Task panicked: {s}")
                } else {
                    "Task panicked".to_string()
                };
                Err(anyhow::anyhow!(msg))
            }
        };

        match result {
            Ok(()) => {
                info!("Finished '{}' {}", style(name).cyan(), as_overhead(s));
                Ok(())
            }
            Err(e) => match e.downcast::<StageError>() {
                Ok(stage) => Err(RunError::Stage(name.to_string(), stage)),
                Err(e) => Err(RunError::Action(name.to_string(), e)),
            },
        }
    }

    /// Watch when any task registered a binding, build otherwise.
    pub fn mode(&self) -> Mode {
        let binder = self
            .session
            .binder
            .lock()
            .unwrap_or_else(|e| e.into_inner());

        match binder.is_empty() {
            true => Mode::Build,
            false => Mode::Watch,
        }
    }

    /// Starts every binding registered so far and blocks while watching.
    pub fn watch(self: Arc<Self>) -> Result<(), WatchError> {
        let binder = std::mem::take(
            &mut *self
                .session
                .binder
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
        );

        self.session.watching.store(true, Ordering::Release);
        info!("Watching for changes, {} binding(s)", binder.len());

        let root = self.root.clone();
        let handle = binder.start(&root, self)?;
        handle.join();

        Ok(())
    }

    /// Stops the live reload bridge, if any.
    pub fn shutdown(&self) {
        self.session.reloader.disconnect();
        let bridge = self
            .session
            .live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        if let Some(bridge) = bridge {
            bridge.stop();
        }
    }
}

impl Handler for Runner {
    fn run_tasks(&self, tasks: &[String]) {
        for name in tasks {
            if let Err(e) = self.run(name) {
                error!("{e}");
            }
        }
    }

    fn reload(&self, path: &Utf8Path) {
        debug!("{path} changed, reloading browsers");
        self.session.reloader.notify(ReloadEvent::Full);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn runner(registry: Registry) -> (tempfile::TempDir, Runner) {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        (dir, Runner::new(registry, Config::default(), root))
    }

    fn recording(registry: &mut Registry, log: &Arc<Mutex<Vec<String>>>, name: &str, deps: &[&str]) {
        let log = log.clone();
        registry
            .register(name, deps.iter().copied(), move |cx: &Context<'_>| {
                log.lock().unwrap().push(cx.task.to_string());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_runs_plan_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        recording(&mut registry, &log, "styles", &[]);
        recording(&mut registry, &log, "scripts", &[]);
        recording(&mut registry, &log, "modernizr", &["scripts"]);
        registry
            .group("default", ["styles", "scripts", "modernizr"])
            .unwrap();

        let (_dir, runner) = runner(registry);
        let report = runner.run("default").unwrap();

        assert!(report.is_success());
        assert_eq!(*log.lock().unwrap(), ["styles", "scripts", "modernizr"]);
        assert_eq!(report.ran, ["styles", "scripts", "modernizr", "default"]);
    }

    #[test]
    fn test_failure_does_not_stop_plan() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = Registry::new();
        registry
            .register("broken", [] as [&str; 0], |_: &Context<'_>| {
                anyhow::bail!("broken on purpose")
            })
            .unwrap();
        registry
            .register("panics", [] as [&str; 0], |_: &Context<'_>| panic!("boom"))
            .unwrap();
        recording(&mut registry, &log, "after", &["broken", "panics"]);

        let (_dir, runner) = runner(registry);
        let report = runner.run("after").unwrap();

        assert_eq!(report.ran, ["broken", "panics", "after"]);
        assert!(matches!(
            &report.failed[..],
            [RunError::Action(a, _), RunError::Action(b, e)]
                if a == "broken" && b == "panics" && e.to_string() == "Task panicked: boom"
        ));
        assert_eq!(*log.lock().unwrap(), ["after"]);
    }

    #[test]
    fn test_stage_failures_are_reported_as_such() {
        let mut registry = Registry::new();
        registry
            .register("styles", [] as [&str; 0], |cx: &Context<'_>| {
                let pipeline = Pipeline::src(["src/main.scss"])?.pipe(crate::pipeline::Sass::new());
                cx.pipe(&pipeline)?;
                Ok(())
            })
            .unwrap();

        let (dir, runner) = runner(registry);
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/main.scss"), "a {").unwrap();

        let report = runner.run("styles").unwrap();

        match &report.failed[..] {
            [RunError::Stage(task, e)] => {
                assert_eq!(task, "styles");
                assert_eq!(e.stage_index, 1);
                assert_eq!(e.stage, "sass");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_task() {
        let (_dir, runner) = runner(Registry::new());
        assert_eq!(
            runner.run("nope").unwrap_err(),
            RegistryError::UnknownTask("nope".into())
        );
    }

    #[test]
    fn test_bindings_switch_mode() {
        let mut registry = Registry::new();
        registry
            .register("watch:tasks", [] as [&str; 0], |cx: &Context<'_>| {
                cx.watch(["src/styles/**/*.scss"], ["styles"])?;
                Ok(())
            })
            .unwrap();
        registry.group("styles", [] as [&str; 0]).unwrap();

        let (_dir, runner) = runner(registry);
        assert_eq!(runner.mode(), Mode::Build);

        runner.run("styles").unwrap();
        assert_eq!(runner.mode(), Mode::Build);

        runner.run("watch:tasks").unwrap();
        assert_eq!(runner.mode(), Mode::Watch);
    }

    #[test]
    fn test_reload_handler_notifies() {
        let (_dir, runner) = runner(Registry::new());
        let (tx, rx) = mpsc::channel();
        runner.reloader().connect(tx);

        runner.reload(Utf8Path::new("index.html"));
        assert_eq!(rx.try_recv().unwrap(), ReloadEvent::Full);
    }
}
