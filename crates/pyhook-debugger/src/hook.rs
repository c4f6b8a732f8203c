use std::cell::RefCell;
use std::sync::Arc;

use crate::runtime::{ExceptionInfo, FrameRef};

/// Event reported to a trace hook.
pub enum TraceEvent<'a> {
    /// A frame starts executing.
    Call,
    /// A new line is about to execute.
    Line,
    /// A frame is about to return.
    Return,
    /// An exception is raised within (or propagates through) a frame.
    Exception(&'a ExceptionInfo),
    /// A native function is about to be called.
    CCall,
    /// A native function returned.
    CReturn,
    /// A native function raised.
    CException,
}

impl TraceEvent<'_> {
    /// Returns the name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Call => "call",
            Self::Line => "line",
            Self::Return => "return",
            Self::Exception(_) => "exception",
            Self::CCall => "c_call",
            Self::CReturn => "c_return",
            Self::CException => "c_exception",
        }
    }
}

/// Trait implementing a trace function.
///
/// The runtime calls the thread's global hook (see [settrace]) on every
/// [TraceEvent::Call], and installs the returned hook as the local hook of the
/// new frame. Every other event of that frame is reported to its local hook,
/// which is replaced by the returned value (`None` stops tracing the frame).
pub trait TraceHook: Send + Sync {
    /// Handles a trace event.
    fn trace(self: Arc<Self>, frame: &FrameRef, event: &TraceEvent<'_>) -> Option<Arc<dyn TraceHook>>;
}

thread_local! {
    static TRACE_HOOK: RefCell<Option<Arc<dyn TraceHook>>> = const { RefCell::new(None) };
}

/// Sets the global trace hook of the current thread.
pub fn settrace(hook: Option<Arc<dyn TraceHook>>) {
    TRACE_HOOK.with(|slot| *slot.borrow_mut() = hook);
}

/// Returns the global trace hook of the current thread.
pub fn gettrace() -> Option<Arc<dyn TraceHook>> {
    TRACE_HOOK.with(|slot| slot.borrow().clone())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::{TraceEvent, TraceHook, gettrace, settrace};
    use crate::runtime::FrameRef;

    struct Counter(AtomicUsize);

    impl TraceHook for Counter {
        fn trace(
            self: Arc<Self>,
            _frame: &FrameRef,
            _event: &TraceEvent<'_>,
        ) -> Option<Arc<dyn TraceHook>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(self)
        }
    }

    #[test]
    fn hook_slot_is_per_thread() {
        settrace(Some(Arc::new(Counter(AtomicUsize::new(0)))));
        assert!(gettrace().is_some());

        std::thread::spawn(|| assert!(gettrace().is_none()))
            .join()
            .unwrap();

        settrace(None);
        assert!(gettrace().is_none());
    }
}
