use std::sync::mpsc::RecvError;

use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TsumugiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Run(#[from] RunError),

    #[error("Error while watching for file changes:\n{0}")]
    Watch(#[from] WatchError),

    #[error("Live reload:\n{0}")]
    Live(#[from] LiveError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Couldn't read config file '{0}'.\n{1}")]
    Read(Utf8PathBuf, std::io::Error),

    #[error("Couldn't parse config file '{0}'.\n{1}")]
    Parse(Utf8PathBuf, toml::de::Error),
}

/// Misconfigured task graphs. These can never succeed, so they abort startup.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Task '{0}' is already registered")]
    DuplicateTask(String),

    #[error("Task '{0}' is not registered")]
    UnknownTask(String),

    #[error("Cyclic dependency: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),
}

/// A stage of a pipeline reported an error. The run of the owning task stops
/// at this stage, but the process keeps going.
#[derive(Debug, Error)]
#[error("Stage #{stage_index} ({stage}) failed:\n{cause:#}")]
pub struct StageError {
    pub stage_index: usize,
    pub stage: &'static str,
    pub cause: anyhow::Error,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Task '{0}':\n{1}")]
    Stage(String, StageError),

    #[error("Task '{0}':\n{1:#}")]
    Action(String, anyhow::Error),
}

#[derive(Debug, Error)]
#[error("Invalid glob pattern '{0}'.\n{1}")]
pub struct PatternError(pub String, pub globset::Error);

#[derive(Debug, Error)]
pub enum WatchError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Pattern(#[from] PatternError),

    #[error("Path is not valid UTF-8: {0}")]
    PathFormat(#[from] camino::FromPathBufError),

    #[error(transparent)]
    Notify(#[from] notify::Error),

    #[error(transparent)]
    Recv(#[from] RecvError),
}

#[derive(Debug, Error)]
pub enum LiveError {
    #[error("A live reload server is already running in this process")]
    AlreadyRunning,

    #[error("Couldn't bind the WebSocket port.\n{0}")]
    Bind(std::io::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
