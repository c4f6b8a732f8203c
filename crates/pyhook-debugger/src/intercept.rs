use std::sync::Arc;

use pyhook_proto::Event;

use crate::hook::{self, TraceHook};
use crate::runtime::FrameRef;
use crate::session::Debugger;
use crate::thread::ThreadTracer;

/// Thread creation interceptor, handed to the [Runtime](crate::Runtime).
///
/// Every thread started while it is installed runs its body through
/// [ThreadInterceptor::run], which traces the thread for its whole lifetime.
pub struct ThreadInterceptor {
    debugger: Debugger,
    for_attach: bool,
}

impl ThreadInterceptor {
    pub(crate) fn new(debugger: Debugger, for_attach: bool) -> Self {
        Self {
            debugger,
            for_attach,
        }
    }

    /// Returns whether this interceptor outlives detaching.
    pub fn is_for_attach(&self) -> bool {
        self.for_attach
    }

    /// Runs the body of a new thread, traced.
    ///
    /// The thread is reported to the controller before the body starts, and
    /// when it exits.
    pub fn run<R, F>(&self, body: F) -> R
    where
        F: FnOnce() -> R,
    {
        let Some(tracer) = self.debugger.new_thread(false, None) else {
            return body();
        };

        hook::settrace(Some(tracer.clone()));

        let _guard = ExitGuard {
            debugger: &self.debugger,
            tracer,
        };

        body()
    }

    /// Starts tracing a thread that was already running when the interceptor
    /// got installed.
    ///
    /// The thread breaks on its next line. Returns the hook to install on the
    /// thread's frames, if any.
    pub fn adopt_current_thread(&self, frame: &FrameRef) -> Option<Arc<dyn TraceHook>> {
        let tracer = match self.debugger.current_thread() {
            Some(tracer) => tracer,
            None => self.debugger.new_thread(true, Some(frame.clone()))?,
        };

        tracing::debug!(tid = tracer.id(), "thread adopted");

        // modules whose top-level code started before the thread was traced
        let shared = self.debugger.shared();
        let mut cur_frame = Some(frame.clone());

        while let Some(frame) = cur_frame {
            let code = frame.code();

            if code.is_module_code() && shared.modules.find(&code.filename).is_none() {
                shared.load_module(&code.filename);
            }

            cur_frame = frame.back();
        }

        let hook: Arc<dyn TraceHook> = tracer;
        hook::settrace(Some(hook.clone()));

        Some(hook)
    }
}

struct ExitGuard<'a> {
    debugger: &'a Debugger,
    tracer: Arc<ThreadTracer>,
}

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        hook::settrace(None);

        let shared = self.debugger.shared();
        shared.threads.remove(self.tracer.id());

        if !shared.is_detached() {
            shared.send(Event::ThreadExited {
                tid: self.tracer.id(),
            });
        }
    }
}
