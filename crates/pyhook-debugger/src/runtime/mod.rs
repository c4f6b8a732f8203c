mod frame;
mod object;

use std::io::Write;
use std::sync::Arc;

pub use self::frame::{CodeInfo, Expression, Frame, FrameRef};
pub use self::object::{ChildIter, EvalError, ItemIter, Object, ObjectKind, ObjectRef};
use crate::intercept::ThreadInterceptor;

/// Trait implementing the process-level hooks of a language runtime.
///
/// Frame and value introspection go through [Frame] and [Object], this trait
/// only covers what the debugger changes for the whole process.
pub trait Runtime: Send + Sync {
    /// Installs (or removes, with `None`) the thread creation interceptor.
    ///
    /// While installed, the runtime wraps the body of every new thread with
    /// [ThreadInterceptor::run]. A runtime may also hand threads that are
    /// already running to [ThreadInterceptor::adopt_current_thread] on their
    /// next trace event.
    fn set_thread_interceptor(&self, interceptor: Option<Arc<ThreadInterceptor>>);

    /// Replaces the standard output and error streams seen by user code.
    ///
    /// `None` restores the original streams.
    fn redirect_output(&self, streams: Option<(Box<dyn Write + Send>, Box<dyn Write + Send>)>);

    /// Writes some text to the standard output stream seen by user code.
    fn write_stdout(&self, text: &str);

    /// Returns whether the given code belongs to the runtime itself (standard
    /// library, startup plumbing) rather than to the user program.
    fn is_library_code(&self, _code: &CodeInfo) -> bool {
        false
    }
}

/// Entry of a traceback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracebackEntry {
    /// Source filename.
    pub filename: String,
    /// Line being executed.
    pub line: i32,
    /// Code name.
    pub name: String,
}

/// Exception being raised within a frame.
#[derive(Clone)]
pub struct ExceptionInfo {
    /// Class of the exception.
    pub exc_type: ObjectRef,

    /// Exception value.
    pub value: ObjectRef,

    /// Module-qualified name of the exception class (e.g.,
    /// `builtins.ValueError`).
    pub qualified_name: String,

    /// Traceback of the exception, outermost entry first.
    ///
    /// The first entry is the frame the exception event is reported for. More
    /// than one entry means the exception propagated out of a callee.
    pub traceback: Vec<TracebackEntry>,
}

impl ExceptionInfo {
    /// Formats this exception the way an uncaught exception is printed.
    pub fn format(&self) -> String {
        let mut text = String::new();

        if !self.traceback.is_empty() {
            text.push_str("Traceback (most recent call last):\n");

            for entry in self.traceback.iter() {
                text.push_str(&format!(
                    "  File \"{}\", line {}, in {}\n",
                    entry.filename, entry.line, entry.name
                ));
            }
        }

        let type_name = self
            .qualified_name
            .strip_prefix("builtins.")
            .unwrap_or(&self.qualified_name);

        match self.value.str() {
            Ok(message) if message.is_empty() => text.push_str(&format!("{type_name}\n")),
            Ok(message) => text.push_str(&format!("{type_name}: {message}\n")),
            Err(_) => text.push_str(&format!("{type_name}: <exception str() failed>\n")),
        }

        text
    }
}
