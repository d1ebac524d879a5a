//! File watching.
//!
//! A [`WatchBinder`] collects bindings from glob patterns to a [`Trigger`].
//! Once started, a single debounced watcher observes the static prefixes of
//! every pattern, and a dispatcher thread routes each change to the bindings
//! whose patterns match it. Every binding owns a worker thread draining its
//! own queue, so a binding's tasks run in order while separate bindings run
//! concurrently.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use notify::{EventKind, RecommendedWatcher, RecursiveMode};
use notify_debouncer_full::{DebounceEventResult, Debouncer, RecommendedCache, new_debouncer};
use tracing::{debug, error, info};

use crate::error::{PatternError, WatchError};
use crate::patterns::{PatternSet, collapse_watch_paths};

/// Changes closer together than this are merged into one event.
const DEBOUNCE: Duration = Duration::from_millis(250);

/// What happens when a watched file changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    /// Run these tasks, in order.
    Tasks(Vec<String>),
    /// Ask connected browsers for a full reload.
    Reload,
}

#[derive(Debug, Clone)]
pub struct Binding {
    patterns: PatternSet,
    trigger: Trigger,
}

impl Binding {
    pub fn patterns(&self) -> &PatternSet {
        &self.patterns
    }

    pub fn trigger(&self) -> &Trigger {
        &self.trigger
    }
}

/// Receives the work bindings trigger. Called from the binding's worker
/// thread.
pub trait Handler: Send + Sync + 'static {
    fn run_tasks(&self, tasks: &[String]);

    fn reload(&self, path: &Utf8Path);
}

#[derive(Debug, Default, Clone)]
pub struct WatchBinder {
    bindings: Vec<Binding>,
}

impl WatchBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `tasks` whenever a file matching `patterns` changes.
    pub fn bind(
        &mut self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
        tasks: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<(), PatternError> {
        self.bindings.push(Binding {
            patterns: PatternSet::new(patterns)?,
            trigger: Trigger::Tasks(tasks.into_iter().map(Into::into).collect()),
        });
        Ok(())
    }

    /// Reloads connected browsers whenever a file matching `patterns` changes.
    pub fn bind_reload(
        &mut self,
        patterns: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Result<(), PatternError> {
        self.bindings.push(Binding {
            patterns: PatternSet::new(patterns)?,
            trigger: Trigger::Reload,
        });
        Ok(())
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Indices of the bindings whose patterns match `path`, relative to the
    /// project root.
    pub fn matching<'a>(&'a self, path: &'a Utf8Path) -> impl Iterator<Item = usize> + 'a {
        self.bindings
            .iter()
            .enumerate()
            .filter(move |(_, binding)| binding.patterns.matches(path))
            .map(|(i, _)| i)
    }

    /// Starts observing `root`. Bindings can no longer be added afterwards.
    pub fn start<H: Handler>(
        self,
        root: &Utf8Path,
        handler: Arc<H>,
    ) -> Result<WatchHandle, WatchError> {
        let root = root.canonicalize_utf8()?;

        let (tx, rx) = mpsc::channel();
        let mut debouncer = new_debouncer(DEBOUNCE, None, tx)?;

        let dirs = collapse_watch_paths(
            self.bindings
                .iter()
                .flat_map(|binding| binding.patterns.watch_roots(&root))
                .collect(),
        );

        for dir in &dirs {
            debug!("watching {dir}");
            debouncer.watch(dir.as_std_path(), RecursiveMode::Recursive)?;
        }

        let mut queues = Vec::with_capacity(self.bindings.len());
        let mut workers = Vec::with_capacity(self.bindings.len());

        for binding in &self.bindings {
            let (tx, rx) = mpsc::channel();
            queues.push(tx);
            workers.push(new_thread_worker(
                rx,
                binding.trigger.clone(),
                handler.clone(),
            ));
        }

        let dispatcher = Dispatcher {
            root,
            binder: self,
            queues,
        };

        let thread = std::thread::spawn(move || dispatcher.run(rx));

        Ok(WatchHandle {
            debouncer: Some(debouncer),
            dispatcher: Some(thread),
            workers,
        })
    }
}

fn new_thread_worker<H: Handler>(
    rx: Receiver<Utf8PathBuf>,
    trigger: Trigger,
    handler: Arc<H>,
) -> JoinHandle<()> {
    std::thread::spawn(move || {
        while let Ok(path) = rx.recv() {
            match &trigger {
                Trigger::Tasks(tasks) => {
                    info!("{path} changed, running {}", tasks.join(", "));
                    handler.run_tasks(tasks);
                }
                Trigger::Reload => handler.reload(&path),
            }
        }
    })
}

struct Dispatcher {
    root: Utf8PathBuf,
    binder: WatchBinder,
    queues: Vec<Sender<Utf8PathBuf>>,
}

impl Dispatcher {
    fn run(self, rx: Receiver<DebounceEventResult>) {
        for result in rx {
            let events = match result {
                Ok(events) => events,
                Err(errors) => {
                    for e in errors {
                        error!("watch error: {e}");
                    }
                    continue;
                }
            };

            // one flush of the debouncer is one change
            let raw: Vec<PathBuf> = events
                .into_iter()
                .filter(|event| {
                    matches!(
                        event.event.kind,
                        EventKind::Create(..) | EventKind::Modify(..) | EventKind::Remove(..)
                    )
                })
                .flat_map(|event| event.event.paths)
                .collect();

            if !raw.is_empty() {
                self.dispatch(&self.relative(&raw));
            }
        }
    }

    fn relative(&self, paths: &[PathBuf]) -> Vec<Utf8PathBuf> {
        paths
            .iter()
            .filter_map(|path| {
                let path = Utf8Path::from_path(path)?;
                match path.strip_prefix(&self.root) {
                    Ok(rel) => Some(rel.to_path_buf()),
                    Err(_) => {
                        debug!("ignoring change outside of the project: {path}");
                        None
                    }
                }
            })
            .collect()
    }

    /// Queues one trigger per binding matched by any of `paths`.
    fn dispatch(&self, paths: &[Utf8PathBuf]) {
        for (i, queue) in self.queues.iter().enumerate() {
            let patterns = &self.binder.bindings[i].patterns;

            if let Some(path) = paths.iter().find(|path| patterns.matches(path))
                && queue.send(path.clone()).is_err()
            {
                error!("watch worker #{i} has exited");
            }
        }
    }
}

/// Keeps the watcher alive. Dropping it stops observing and waits for queued
/// work to finish.
pub struct WatchHandle {
    debouncer: Option<Debouncer<RecommendedWatcher, RecommendedCache>>,
    dispatcher: Option<JoinHandle<()>>,
    workers: Vec<JoinHandle<()>>,
}

impl WatchHandle {
    /// Blocks the calling thread for as long as the watcher runs.
    pub fn join(mut self) {
        if let Some(thread) = self.dispatcher.take() {
            thread.join().ok();
        }
    }

    pub fn stop(self) {}
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        if let Some(debouncer) = self.debouncer.take() {
            debouncer.stop();
        }
        if let Some(thread) = self.dispatcher.take() {
            thread.join().ok();
        }
        for thread in self.workers.drain(..) {
            thread.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Mutex;
    use std::time::Instant;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        log: Mutex<Vec<String>>,
        done: Mutex<Option<Sender<()>>>,
    }

    impl Recorder {
        fn push(&self, entry: String) {
            self.log.lock().unwrap().push(entry);
            if let Some(done) = self.done.lock().unwrap().as_ref() {
                done.send(()).ok();
            }
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().unwrap().clone()
        }
    }

    impl Handler for Recorder {
        fn run_tasks(&self, tasks: &[String]) {
            for task in tasks {
                self.push(task.clone());
            }
        }

        fn reload(&self, path: &Utf8Path) {
            self.push(format!("reload {path}"));
        }
    }

    fn binder() -> WatchBinder {
        let mut binder = WatchBinder::new();
        binder
            .bind(["src/scripts/**/*.js"], ["jshint", "scripts"])
            .unwrap();
        binder.bind(["src/styles/**/*.scss"], ["styles"]).unwrap();
        binder.bind_reload(["**/*.html"]).unwrap();
        binder
    }

    #[test]
    fn test_matching() {
        let binder = binder();

        let matching = |path: &str| binder.matching(Utf8Path::new(path)).collect::<Vec<_>>();

        assert_eq!(matching("src/scripts/main.js"), [0]);
        assert_eq!(matching("src/styles/partials/_a.scss"), [1]);
        assert_eq!(matching("templates/index.html"), [2]);
        assert_eq!(matching("README.md"), Vec::<usize>::new());
    }

    #[test]
    fn test_dispatch_once_per_binding() {
        let binder = binder();
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let (tx_c, rx_c) = mpsc::channel();

        let dispatcher = Dispatcher {
            root: "/project".into(),
            binder,
            queues: vec![tx_a, tx_b, tx_c],
        };

        let paths = dispatcher.relative(&[
            PathBuf::from("/project/src/scripts/a.js"),
            PathBuf::from("/project/src/scripts/b.js"),
            PathBuf::from("/elsewhere/src/styles/a.scss"),
        ]);
        assert_eq!(paths, ["src/scripts/a.js", "src/scripts/b.js"]);

        dispatcher.dispatch(&paths);

        assert_eq!(rx_a.try_recv().unwrap(), "src/scripts/a.js");
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_err());
        assert!(rx_c.try_recv().is_err());
    }

    #[test]
    fn test_negated_match_triggers_nothing() {
        let mut binder = WatchBinder::new();
        binder
            .bind(
                ["src/scripts/**/*.js", "!src/scripts/vendor/**/*.js"],
                ["jshint"],
            )
            .unwrap();

        let (tx, rx) = mpsc::channel();
        let dispatcher = Dispatcher {
            root: "/project".into(),
            binder,
            queues: vec![tx],
        };

        dispatcher.dispatch(&["src/scripts/vendor/jquery.js".into()]);
        assert!(rx.try_recv().is_err());

        dispatcher.dispatch(&["src/scripts/main.js".into()]);
        assert_eq!(rx.try_recv().unwrap(), "src/scripts/main.js");
    }

    #[test]
    fn test_worker_runs_tasks_in_order() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel();

        let worker = new_thread_worker(
            rx,
            Trigger::Tasks(vec!["jshint".into(), "scripts".into()]),
            recorder.clone(),
        );

        tx.send("src/scripts/a.js".into()).unwrap();
        tx.send("src/scripts/b.js".into()).unwrap();
        drop(tx);
        worker.join().unwrap();

        assert_eq!(recorder.entries(), ["jshint", "scripts", "jshint", "scripts"]);
    }

    #[test]
    fn test_watches_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8Path::from_path(dir.path()).unwrap();
        fs::create_dir_all(root.join("src/styles")).unwrap();
        fs::write(root.join("src/styles/main.scss"), "a{}").unwrap();

        let (done, signal) = mpsc::channel();
        let recorder = Arc::new(Recorder {
            done: Mutex::new(Some(done)),
            ..Recorder::default()
        });

        let mut binder = WatchBinder::new();
        binder.bind(["src/styles/**/*.scss"], ["styles"]).unwrap();
        binder.bind(["src/scripts/**/*.js"], ["scripts"]).unwrap();
        let handle = binder.start(root, recorder.clone()).unwrap();

        // give the watcher a moment to register
        std::thread::sleep(Duration::from_millis(200));
        fs::write(root.join("src/styles/main.scss"), "b{}").unwrap();

        let deadline = Instant::now() + Duration::from_secs(10);
        while recorder.entries().is_empty() && Instant::now() < deadline {
            signal.recv_timeout(Duration::from_millis(100)).ok();
        }

        // anything still in flight lands well within a few debounce windows
        std::thread::sleep(DEBOUNCE * 4);

        handle.stop();
        assert_eq!(recorder.entries(), ["styles"]);
    }
}
