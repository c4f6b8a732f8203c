//! This crate implements an in-process debugger for a Python-like runtime,
//! driven by a remote controller (usually an IDE) over a TCP connection.
//!
//! The debugger lives inside the debuggee. Every traced thread runs a
//! [ThreadTracer] as its trace hook, which reports execution events to the
//! controller and blocks the thread when it must stop (breakpoint hit,
//! finished step, exception raised, break-all request). A dedicated
//! controller thread serves the requests of the controller: stepping,
//! breakpoints, exception filtering, and evaluation of expressions on
//! blocked threads.
//!
//! The debugger is runtime agnostic. A language runtime plugs into it by
//! implementing the traits of the [runtime] module, and by reporting
//! execution events to the hook installed with [hook::settrace].
//!
//! # Launching a program
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pyhook_debugger::{Debugger, DebuggerConfig, LaunchOptions, ProgramExit, Runtime};
//!
//! fn launch(runtime: Arc<dyn Runtime>) -> pyhook_debugger::Result<i32> {
//!     let debugger = Debugger::new(runtime, DebuggerConfig::default());
//!
//!     let options = LaunchOptions {
//!         port: 5678,
//!         debug_id: "session-id".into(),
//!         wait_on_exception: false,
//!         redirect_output: true,
//!         wait_on_exit: false,
//!     };
//!
//!     debugger.launch(&options, || {
//!         //
//!         // run the program, reporting its execution to the hook
//!         //
//!
//!         ProgramExit::Completed
//!     })
//! }
//! ```
//!
//! # Attaching to a running program
//!
//! [Debugger::attach] connects to the controller from any thread. Threads
//! already running are handed to the [ThreadInterceptor] by the runtime on
//! their next trace event, and break on their next line.

/// Module containing the breakpoint table.
pub mod breakpoint;
mod controller;
mod error;
/// Module containing the exception break modes and handler cache.
pub mod exception;
/// Module containing the per-thread trace hook slot.
pub mod hook;
mod intercept;
/// Module containing the conversion of runtime values to their wire form.
pub mod marshal;
/// Module containing the registry of loaded modules.
pub mod module;
mod output;
/// Module containing the traits implemented by a language runtime.
pub mod runtime;
mod session;
mod state;
/// Module containing the per-thread debugging state.
pub mod thread;

pub use self::error::{Error, Result};
pub use self::intercept::ThreadInterceptor;
pub use self::output::{DebuggerOutput, OutputStream};
pub use self::runtime::Runtime;
pub use self::session::{Debugger, LaunchOptions, ProgramExit};
pub use self::state::DebuggerConfig;
pub use self::thread::{Stepping, ThreadTracer};
