#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
mod error;
mod io;
pub mod live;
#[cfg(feature = "logging")]
pub mod logging;
pub mod patterns;
pub mod pipeline;
pub mod registry;
pub mod runner;
pub mod tasks;
pub mod watch;

pub use crate::config::Config;
pub use crate::error::*;
pub use crate::io::format_size;
pub use crate::registry::{Registry, Task, TaskResult};
pub use crate::runner::{Context, Report, Runner};

/// Whether a finished run should exit or keep watching. A run switches to
/// `Watch` as soon as one of its tasks registered a watch binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run the requested task once and exit.
    Build,
    /// Keep running registered watches until interrupted.
    Watch,
}
