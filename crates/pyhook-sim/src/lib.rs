//! This crate implements a small interpreter for a Python subset, reporting
//! its execution to the `pyhook` debugger.
//!
//! The interpreter executes indentation-based source code: functions,
//! classes with single inheritance, exceptions, modules imported from the
//! directory of the main script, and threads. Each thread reports the
//! `call`, `line`, `return` and `exception` events of its frames to the
//! trace hook installed with [pyhook_debugger::hook::settrace], and hands
//! its body to the debugger's thread interceptor when one is installed.
//!
//! ```no_run
//! use std::path::Path;
//!
//! use pyhook_debugger::{ProgramExit, Runtime};
//! use pyhook_sim::SimRuntime;
//!
//! # fn main() -> pyhook_sim::Result<()> {
//! let runtime = SimRuntime::load(Path::new("prog.py"), &[])?;
//!
//! match runtime.run_main() {
//!     ProgramExit::Completed => (),
//!     ProgramExit::Exit(code) => std::process::exit(code),
//!     ProgramExit::Exception(info) => runtime.write_stdout(&info.format()),
//! }
//! # Ok(())
//! # }
//! ```

mod ast;
mod builtins;
mod error;
mod frame;
mod handlers;
mod interp;
mod lexer;
mod parser;
mod runtime;
mod trace;
mod value;

pub use self::error::{Error, Result};
pub use self::handlers::{handler_regions, handler_regions_of_file};
pub use self::runtime::SimRuntime;
