use std::cell::{Cell, RefCell};
use std::sync::Arc;

use pyhook_debugger::hook::{self, TraceEvent};
use pyhook_debugger::runtime::FrameRef;

use crate::ast::Stmt;
use crate::builtins::{self, ExcKind};
use crate::frame::SimFrame;
use crate::interp::{Exec, Raised};

/// Maximum number of nested frames per thread.
pub const MAX_DEPTH: usize = 100;

thread_local! {
    static CURRENT: RefCell<Option<Arc<SimFrame>>> = const { RefCell::new(None) };
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static SUSPENDED: Cell<bool> = const { Cell::new(false) };
    static ADOPTED: Cell<u64> = const { Cell::new(0) };
}

/// Returns the innermost frame executing on the current thread.
pub fn current_frame() -> Option<Arc<SimFrame>> {
    CURRENT.with(|current| current.borrow().clone())
}

/// Marks a frame as executing on the current thread, until dropped.
pub struct FrameGuard {
    prev: Option<Arc<SimFrame>>,
}

impl FrameGuard {
    /// Enters the given frame.
    ///
    /// Fails with `RecursionError` once [MAX_DEPTH] frames are executing.
    pub fn enter(frame: &Arc<SimFrame>) -> Exec<Self> {
        let depth = DEPTH.get();

        if depth >= MAX_DEPTH {
            return Err(builtins::error(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded",
            ));
        }

        DEPTH.set(depth + 1);
        let prev = CURRENT.with(|current| current.replace(Some(frame.clone())));

        Ok(Self { prev })
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        DEPTH.set(DEPTH.get().saturating_sub(1));
        CURRENT.with(|current| *current.borrow_mut() = self.prev.take());
    }
}

/// Runs some code without reporting trace events.
///
/// Hooks run suspended, so that code they evaluate is not traced.
pub fn suspend<R, F>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let prev = SUSPENDED.replace(true);
    let result = f();
    SUSPENDED.set(prev);
    result
}

fn is_suspended() -> bool {
    SUSPENDED.get()
}

/// Reports a frame starting.
pub fn call(frame: &Arc<SimFrame>) {
    if is_suspended() {
        return;
    }

    // the starting frame itself is adopted on its first line
    if let Some(caller) = frame.caller() {
        adopt(caller);
    }

    let Some(hook) = hook::gettrace() else {
        return;
    };

    let frame_ref: FrameRef = frame.clone();
    let local = suspend(|| hook.trace(&frame_ref, &TraceEvent::Call));
    frame.set_local_trace(local);
}

/// Reports a new line about to execute.
///
/// While the hook runs, the frame may jump to the start of any statement of
/// `block`. Returns the line jumped to, if any.
pub fn line(frame: &Arc<SimFrame>, block: Option<&[Stmt]>) -> Option<i32> {
    if is_suspended() {
        return None;
    }

    adopt(frame);

    let hook = frame.local_trace()?;

    if let Some(block) = block {
        frame.open_jumps(block.iter().map(|s| s.line).collect());
    }

    let frame_ref: FrameRef = frame.clone();
    let local = suspend(|| hook.trace(&frame_ref, &TraceEvent::Line));

    let jump = block.and_then(|_| frame.close_jumps());
    frame.set_local_trace(local);

    jump
}

/// Reports a frame returning.
pub fn ret(frame: &Arc<SimFrame>) {
    local_event(frame, &TraceEvent::Return);
}

/// Records an exception raised within (or propagating through) a frame, and
/// reports it once per frame.
pub fn exception(frame: &Arc<SimFrame>, raised: &mut Raised) {
    if !raised.record(frame) {
        return;
    }

    let info = raised.info();
    local_event(frame, &TraceEvent::Exception(&info));
}

fn local_event(frame: &Arc<SimFrame>, event: &TraceEvent<'_>) {
    if is_suspended() {
        return;
    }

    let Some(hook) = frame.local_trace() else {
        return;
    };

    let frame_ref: FrameRef = frame.clone();
    let local = suspend(|| hook.trace(&frame_ref, event));
    frame.set_local_trace(local);
}

/// Hands the current thread to the installed thread interceptor, if it was
/// not traced yet.
fn adopt(frame: &Arc<SimFrame>) {
    if hook::gettrace().is_some() {
        return;
    }

    let Some((generation, interceptor)) = frame.runtime().interceptor() else {
        return;
    };

    if ADOPTED.get() == generation {
        return;
    }

    ADOPTED.set(generation);

    let frame_ref: FrameRef = frame.clone();
    let Some(hook) = suspend(|| interceptor.adopt_current_thread(&frame_ref)) else {
        return;
    };

    tracing::debug!(filename = %frame.module().filename, "thread adopted by the debugger");

    let mut cur = Some(frame.clone());

    while let Some(frame) = cur {
        frame.set_local_trace(Some(hook.clone()));
        cur = frame.caller().cloned();
    }
}

