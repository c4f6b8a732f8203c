//! Crate implementing the CLI commands.

mod cli;
mod config;
mod run;

pub use self::cli::{CliAction, CliAttach, CliLaunch, CliOpts};
pub use self::config::{DebugConfig, SkipFile};
pub use self::run::{evaluate_attach_run, evaluate_launch, evaluate_run};
