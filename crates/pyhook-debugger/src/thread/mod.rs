mod block;
mod stepping;

use std::hint::black_box;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use pyhook_proto::{Event, FrameInfo};

pub use self::block::{Blocker, ScheduleError, Work};
pub use self::stepping::{LineStop, Stepping};
use crate::hook::{self, TraceEvent, TraceHook};
use crate::marshal::{enum_children, marshal, split_enumerated_child, undefined};
use crate::module::absolute_path;
use crate::runtime::{CodeInfo, ExceptionInfo, FrameRef, ObjectRef};
use crate::state::Shared;

/// Reason a thread blocks, reported to the controller once blocked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BlockReason {
    StepDone,
    Loaded,
    BreakpointHit(i32),
    Exception { name: String, text: String },
    AsyncBreak,
}

enum Disposition {
    Keep,
    Uninstall,
}

/// Trace functions installed before the debugger, still invoked.
#[derive(Default)]
struct TraceChain {
    prev: Option<Arc<dyn TraceHook>>,
    stack: Vec<Option<Arc<dyn TraceHook>>>,
}

/// Per-thread debugging state, installed as the thread's trace hook.
pub struct ThreadTracer {
    id: i32,
    os_id: ThreadId,
    shared: Arc<Shared>,
    stepping: Mutex<Stepping>,
    cur_frame: Mutex<Option<FrameRef>>,
    stopped_on_line: AtomicI32,
    detach: AtomicBool,
    blocker: Blocker,
    chain: Mutex<TraceChain>,
}

impl ThreadTracer {
    /// Creates the record of the calling thread.
    pub(crate) fn new(shared: Arc<Shared>, stepping: Stepping, frame: Option<FrameRef>) -> Arc<Self> {
        Arc::new(Self {
            id: shared.next_thread_id(),
            os_id: std::thread::current().id(),
            shared,
            stepping: Mutex::new(stepping),
            cur_frame: Mutex::new(frame),
            stopped_on_line: AtomicI32::new(-1),
            detach: AtomicBool::new(false),
            blocker: Blocker::default(),
            chain: Mutex::new(TraceChain::default()),
        })
    }

    /// Returns the identifier reported to the controller.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// Returns the identifier of the traced OS thread.
    pub fn os_id(&self) -> ThreadId {
        self.os_id
    }

    /// Returns the stepping mode.
    pub fn stepping(&self) -> Stepping {
        *lock(&self.stepping)
    }

    /// Replaces the stepping mode.
    pub fn set_stepping(&self, stepping: Stepping) {
        *lock(&self.stepping) = stepping;
    }

    /// Makes the tracer uninstall itself on the next trace event.
    pub(crate) fn request_detach(&self) {
        self.detach.store(true, Ordering::SeqCst);
        self.set_stepping(Stepping::Break);
    }

    /// Returns the innermost frame seen by the tracer.
    pub fn cur_frame(&self) -> Option<FrameRef> {
        lock(&self.cur_frame).clone()
    }

    fn set_cur_frame(&self, frame: Option<FrameRef>) {
        *lock(&self.cur_frame) = frame;
    }

    /// Returns the frame at the given depth, 0 being the innermost frame.
    pub fn frame_at(&self, depth: i32) -> Option<FrameRef> {
        let mut frame = self.cur_frame();

        for _ in 0..depth {
            frame = frame?.back();
        }

        frame
    }

    /// Returns whether the thread is blocked.
    pub fn is_blocked(&self) -> bool {
        self.blocker.is_blocked()
    }

    /// Resumes the thread, if blocked.
    pub fn unblock(&self) -> bool {
        self.blocker.unblock()
    }

    /// Sets the trace function that was installed before the debugger.
    pub fn set_previous_hook(&self, hook: Option<Arc<dyn TraceHook>>) {
        lock(&self.chain).prev = hook;
    }

    /// Evaluates some code on the blocked thread, within the given frame.
    ///
    /// The outcome is reported with `EXCR` or `EXCE`.
    pub(crate) fn run_on_thread(&self, text: String, frame: FrameRef, eval_id: i32) {
        let shared = self.shared.clone();

        let work: Work = Box::new(move || {
            let event = match frame.execute(&text) {
                Ok(value) => Event::ExecutionResult {
                    eval_id,
                    object: marshal(&*value),
                },
                Err(e) => Event::ExecutionError {
                    eval_id,
                    text: e.message,
                },
            };
            shared.send(event);
        });

        if let Err(e) = self.blocker.schedule(work) {
            let text = match e {
                ScheduleError::Working => "<error: previous evaluation has not completed>",
                ScheduleError::NotBlocked => "<error: thread is not blocked>",
            };

            tracing::debug!(tid = self.id, eval_id, reason = ?e, "evaluation refused");

            self.shared.send(Event::ExecutionError {
                eval_id,
                text: text.to_owned(),
            });
        }
    }

    /// Enumerates the children of an expression on the blocked thread, within
    /// the given frame.
    ///
    /// The outcome is reported with `CHLD`, empty on any failure.
    pub(crate) fn enum_child_on_thread(&self, text: String, frame: FrameRef, eval_id: i32, is_enumerate: bool) {
        let shared = self.shared.clone();

        let work: Work = Box::new(move || {
            let event = match evaluate_child(&text, &frame, is_enumerate) {
                Some(value) => {
                    let children = enum_children(&value);
                    Event::Children {
                        eval_id,
                        is_index: children.is_index,
                        is_enumerate: children.is_enumerate,
                        children: children.items,
                    }
                }
                None => empty_children(eval_id),
            };
            shared.send(event);
        });

        if let Err(e) = self.blocker.schedule(work) {
            tracing::debug!(tid = self.id, eval_id, reason = ?e, "enumeration refused");
            self.shared.send(empty_children(eval_id));
        }
    }

    fn dispatch(&self, frame: &FrameRef, event: &TraceEvent<'_>) -> Disposition {
        if self.stepping() == Stepping::Break && self.shared.should_debug_code(frame.code()) {
            if self.cur_frame().is_none() {
                self.set_cur_frame(Some(frame.clone()));
            }

            if self.detach.load(Ordering::SeqCst) {
                hook::settrace(None);
                return Disposition::Uninstall;
            }

            self.async_break();
        }

        match event {
            TraceEvent::Call => self.handle_call(frame),
            TraceEvent::Line => self.handle_line(frame),
            TraceEvent::Return => self.handle_return(frame),
            TraceEvent::Exception(info) => self.handle_exception(frame, info),
            TraceEvent::CCall | TraceEvent::CReturn | TraceEvent::CException => (),
        }

        Disposition::Keep
    }

    fn handle_call(&self, frame: &FrameRef) {
        self.set_cur_frame(Some(frame.clone()));

        let code = frame.code();

        if code.is_module_code() {
            probe_stack(3);
            self.shared.load_module(&code.filename);
        }

        let mut stepping = lock(&self.stepping);
        *stepping = stepping.on_call();
    }

    fn handle_line(&self, frame: &FrameRef) {
        self.set_cur_frame(Some(frame.clone()));

        if self.shared.is_detached() {
            return;
        }

        let line = frame.line();
        let stepping = self.stepping();
        let new_line = line != self.stopped_on_line.load(Ordering::SeqCst);

        if let Some(stop) = stepping.line_stop(new_line) {
            let code = frame.code();

            let skip = (stepping == Stepping::LaunchBreak && self.shared.modules.is_empty())
                || self.shared.is_library_code(code)
                || !self.shared.should_debug_code(code);

            if skip {
                return;
            }

            probe_stack(3);
            self.set_stepping(Stepping::None);

            let reason = match stop {
                LineStop::StepDone => BlockReason::StepDone,
                LineStop::Loaded => BlockReason::Loaded,
            };

            self.block(reason);
            return;
        }

        let hit = {
            let breakpoints = self.shared.breakpoints();

            if breakpoints.is_empty() {
                return;
            }

            breakpoints.find(line, &frame.code().filename)
        };

        if let Some((id, condition)) = hit {
            let should_break = condition.is_none_or(|c| c.should_break(&**frame));

            if should_break {
                probe_stack(3);
                tracing::debug!(tid = self.id, id, line, "breakpoint hit");
                self.block(BlockReason::BreakpointHit(id));
            }
        }
    }

    fn handle_return(&self, frame: &FrameRef) {
        if !self.shared.is_detached() {
            let at_module_end = frame.code().name == CodeInfo::MODULE_NAME
                && self.shared.should_debug_code(frame.code());

            let step_done = {
                let mut stepping = lock(&self.stepping);
                let (next, step_done) = stepping.on_return(at_module_end);
                *stepping = next;
                step_done
            };

            if step_done {
                self.block(BlockReason::StepDone);
            }
        }

        self.set_cur_frame(frame.back());
    }

    fn handle_exception(&self, frame: &FrameRef, info: &ExceptionInfo) {
        if self.shared.is_detached() || !self.shared.should_debug_code(frame.code()) {
            return;
        }

        let shared = &self.shared;

        let should_break = shared.exceptions.should_break(frame, info, |filename| {
            if shared.is_detached() {
                return false;
            }

            tracing::debug!(tid = self.id, filename, "requesting exception handlers");

            shared
                .channel
                .send(&Event::RequestHandlers {
                    filename: filename.to_owned(),
                })
                .is_ok()
        });

        if should_break {
            tracing::debug!(tid = self.id, name = %info.qualified_name, "breaking on exception");

            self.block(BlockReason::Exception {
                name: info.qualified_name.clone(),
                text: info.format(),
            });
        }
    }

    fn async_break(&self) {
        self.set_stepping(Stepping::None);
        self.block(BlockReason::AsyncBreak);
    }

    /// Blocks the calling thread, the traced one, until the controller
    /// resumes it.
    pub(crate) fn block(&self, reason: BlockReason) {
        self.send_frames();

        if let Some(frame) = self.cur_frame() {
            self.stopped_on_line.store(frame.line(), Ordering::SeqCst);
        }

        let tid = self.id;
        let shared = &self.shared;

        self.blocker.block(|| {
            if shared.is_detached() {
                return false;
            }

            match reason {
                BlockReason::StepDone => shared.send(Event::StepDone { tid }),
                BlockReason::Loaded => shared.send(Event::ProcessLoaded { tid }),
                BlockReason::BreakpointHit(id) => shared.send(Event::BreakpointHit { id, tid }),
                BlockReason::Exception { name, text } => {
                    shared.send(Event::ExceptionRaised { name, tid, text })
                }
                BlockReason::AsyncBreak => {
                    let sent = shared.channel.send_with(|| {
                        shared
                            .send_break_complete
                            .swap(false, Ordering::SeqCst)
                            .then_some(Event::AsyncBreakComplete { tid })
                    });

                    if let Err(e) = sent {
                        tracing::trace!(error = %e, "break complete dropped");
                    }
                }
            }

            true
        });
    }

    fn send_frames(&self) {
        if self.shared.is_detached() {
            return;
        }

        let mut frames = Vec::new();
        let mut cur_frame = self.cur_frame();

        while let Some(frame) = cur_frame {
            let code = frame.code();

            let variables = frame
                .variables()
                .into_iter()
                .map(|(name, value)| {
                    let object = value.map_or_else(undefined, |v| marshal(&*v));
                    (name, object)
                })
                .collect();

            frames.push(FrameInfo {
                first_line: code.first_line,
                last_line: code.last_line,
                cur_line: frame.line(),
                name: code.name.clone(),
                filename: absolute_path(&code.filename),
                arg_count: code.arg_count,
                variables,
            });

            cur_frame = frame.back();
        }

        self.shared.send(Event::ThreadFrames {
            tid: self.id,
            frames,
        });
    }

    fn chain_event(&self, frame: &FrameRef, event: &TraceEvent<'_>) {
        let mut chain = lock(&self.chain);

        match event {
            TraceEvent::Call => {
                let Some(prev) = chain.prev.take() else {
                    return;
                };

                chain.stack.push(Some(prev.clone()));
                drop(chain);

                let local = prev.trace(frame, event);
                lock(&self.chain).prev = local;
            }
            TraceEvent::Return => {
                if let Some(prev) = chain.prev.clone() {
                    drop(chain);
                    prev.trace(frame, event);
                    chain = lock(&self.chain);
                }

                if let Some(saved) = chain.stack.pop() {
                    chain.prev = saved;
                }
            }
            _ => {
                let Some(prev) = chain.prev.take() else {
                    return;
                };

                drop(chain);

                let local = prev.trace(frame, event);
                lock(&self.chain).prev = local;
            }
        }
    }
}

impl TraceHook for ThreadTracer {
    fn trace(self: Arc<Self>, frame: &FrameRef, event: &TraceEvent<'_>) -> Option<Arc<dyn TraceHook>> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(frame, event))) {
            Ok(Disposition::Keep) => (),
            Ok(Disposition::Uninstall) => {
                tracing::debug!(tid = self.id, "tracer uninstalled");
                return None;
            }
            Err(_) => {
                tracing::warn!(tid = self.id, event = event.name(), "trace handler aborted");
            }
        }

        self.chain_event(frame, event);

        Some(self)
    }
}

fn evaluate_child(text: &str, frame: &FrameRef, is_enumerate: bool) -> Option<ObjectRef> {
    let (text, index) = if is_enumerate {
        let (text, index) = split_enumerated_child(text)?;
        (text, Some(index))
    } else {
        (text, None)
    };

    let value = frame.compile(text).ok()?.eval(&**frame).ok()?;

    match index {
        Some(index) => value.iter()?.ok()?.nth(index)?.ok(),
        None => Some(value),
    }
}

fn empty_children(eval_id: i32) -> Event {
    Event::Children {
        eval_id,
        is_index: false,
        is_enumerate: false,
        children: Vec::new(),
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recurses a few frames deep, so that a thread close to exhausting its stack
/// fails here rather than within a lock.
#[inline(never)]
pub(crate) fn probe_stack(depth: u32) {
    if depth > 0 {
        probe_stack(black_box(depth - 1));
    }

    black_box(depth);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use pyhook_proto::{Event, MemoryTransport};

    use super::{BlockReason, Stepping, ThreadTracer};
    use crate::breakpoint::BreakpointRequest;
    use crate::hook::{TraceEvent, TraceHook};
    use crate::marshal::tests::Fake;
    use crate::runtime::tests::{FakeFrame, NullRuntime};
    use crate::runtime::FrameRef;
    use crate::state::{DebuggerConfig, Shared};

    fn attached() -> (Arc<Shared>, MemoryTransport) {
        let shared = Arc::new(Shared::new(Arc::new(NullRuntime), DebuggerConfig::default()));
        let transport = MemoryTransport::default();

        shared.channel.attach(transport.clone(), "test").unwrap();
        transport.take();

        (shared, transport)
    }

    fn events(transport: &MemoryTransport) -> Vec<Event> {
        let bytes = transport.take();
        let mut reader = bytes.as_slice();
        let mut events = Vec::new();

        while !reader.is_empty() {
            events.push(Event::read_from(&mut reader).unwrap());
        }

        events
    }

    fn wait_blocked(tracer: &ThreadTracer) {
        while !tracer.is_blocked() {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn module_call_reports_module_and_binds_pending() {
        let (shared, transport) = attached();

        shared.breakpoints_mut().set(
            &[],
            BreakpointRequest {
                id: 7,
                line: 10,
                filename: "/src/main.py".into(),
                condition: String::new(),
                break_when_changed: false,
            },
        );

        let tracer = ThreadTracer::new(shared.clone(), Stepping::None, None);
        let frame: FrameRef = FakeFrame::new("<module>", "/src/main.py", 1, None);

        tracer.clone().trace(&frame, &TraceEvent::Call);

        assert_eq!(
            events(&transport),
            [
                Event::ModuleLoaded {
                    id: 0,
                    filename: "/src/main.py".into()
                },
                Event::BreakpointBound { id: 7 },
            ]
        );

        assert!(shared.breakpoints().is_bound(7));
        assert!(!shared.breakpoints().is_pending(7));
    }

    #[test]
    fn step_over_blocks_on_next_line() {
        let (shared, transport) = attached();

        let tracer = ThreadTracer::new(shared.clone(), Stepping::OVER, None);
        let frame: FrameRef = FakeFrame::new("func", "/src/main.py", 3, None);

        let handle = std::thread::spawn({
            let tracer = tracer.clone();
            move || tracer.trace(&frame, &TraceEvent::Line)
        });

        wait_blocked(&tracer);
        assert_eq!(tracer.stepping(), Stepping::None);

        assert!(tracer.unblock());
        handle.join().unwrap();

        let events = events(&transport);
        assert!(matches!(events[0], Event::ThreadFrames { .. }));
        assert_eq!(events[1], Event::StepDone { tid: tracer.id() });
    }

    #[test]
    fn nested_call_does_not_end_step_over() {
        let (shared, transport) = attached();

        let tracer = ThreadTracer::new(shared, Stepping::OVER, None);
        let caller: FrameRef = FakeFrame::new("func", "/src/main.py", 3, None);
        let callee: FrameRef = FakeFrame::new("inner", "/src/main.py", 8, Some(caller.clone()));

        tracer.clone().trace(&callee, &TraceEvent::Call);
        tracer.clone().trace(&callee, &TraceEvent::Line);
        tracer.clone().trace(&callee, &TraceEvent::Return);

        assert_eq!(tracer.stepping(), Stepping::OVER);
        assert!(events(&transport).is_empty());
        assert!(Arc::ptr_eq(&tracer.cur_frame().unwrap(), &caller));
    }

    #[test]
    fn failing_condition_hits_breakpoint() {
        let (shared, transport) = attached();
        shared.modules.register("/src/main.py");

        shared.breakpoints_mut().set(
            &shared.modules.all(),
            BreakpointRequest {
                id: 3,
                line: 5,
                filename: "/src/main.py".into(),
                condition: "not an identifier".into(),
                break_when_changed: false,
            },
        );

        let tracer = ThreadTracer::new(shared, Stepping::None, None);
        let frame: FrameRef = FakeFrame::new("func", "/src/main.py", 5, None);

        let handle = std::thread::spawn({
            let tracer = tracer.clone();
            move || tracer.trace(&frame, &TraceEvent::Line)
        });

        wait_blocked(&tracer);
        tracer.unblock();
        handle.join().unwrap();

        assert_eq!(
            events(&transport)[1],
            Event::BreakpointHit {
                id: 3,
                tid: tracer.id()
            }
        );
    }

    #[test]
    fn evaluation_runs_on_blocked_thread() {
        let (shared, transport) = attached();

        let tracer = ThreadTracer::new(shared, Stepping::None, None);
        let frame = FakeFrame::new("func", "/src/main.py", 5, None);
        frame.set_var("x", 3);

        let handle = std::thread::spawn({
            let tracer = tracer.clone();
            let frame: FrameRef = frame.clone();
            move || {
                tracer.set_cur_frame(Some(frame));
                tracer.block(BlockReason::AsyncBreak);
            }
        });

        wait_blocked(&tracer);
        transport.take();

        tracer.run_on_thread("x".into(), frame.clone(), 42);
        tracer.run_on_thread("x".into(), frame.clone(), 43);

        while tracer.blocker.is_working() {
            std::thread::sleep(Duration::from_millis(1));
        }

        tracer.unblock();
        handle.join().unwrap();

        let events = events(&transport);
        assert!(events.contains(&Event::ExecutionResult {
            eval_id: 42,
            object: crate::marshal::marshal(&*Fake::int(3)),
        }));
        assert!(events.iter().any(|e| matches!(e, Event::ExecutionError { eval_id: 43, .. })
            || matches!(e, Event::ExecutionResult { eval_id: 43, .. })));
    }

    #[test]
    fn evaluation_refused_when_not_blocked() {
        let (shared, transport) = attached();

        let tracer = ThreadTracer::new(shared, Stepping::None, None);
        let frame: FrameRef = FakeFrame::new("func", "/src/main.py", 5, None);

        tracer.run_on_thread("x".into(), frame.clone(), 1);
        tracer.enum_child_on_thread("x".into(), frame, 2, false);

        assert_eq!(
            events(&transport),
            [
                Event::ExecutionError {
                    eval_id: 1,
                    text: "<error: thread is not blocked>".into()
                },
                Event::Children {
                    eval_id: 2,
                    is_index: false,
                    is_enumerate: false,
                    children: Vec::new()
                },
            ]
        );
    }

    #[test]
    fn detach_uninstalls_tracer() {
        let (shared, _transport) = attached();

        let tracer = ThreadTracer::new(shared, Stepping::None, None);
        let frame: FrameRef = FakeFrame::new("func", "/src/main.py", 5, None);

        tracer.request_detach();
        assert!(tracer.clone().trace(&frame, &TraceEvent::Line).is_none());
    }

    struct Recorder(AtomicUsize);

    impl TraceHook for Recorder {
        fn trace(self: Arc<Self>, _frame: &FrameRef, _event: &TraceEvent<'_>) -> Option<Arc<dyn TraceHook>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Some(self)
        }
    }

    #[test]
    fn previous_hook_is_chained() {
        let (shared, _transport) = attached();

        let recorder = Arc::new(Recorder(AtomicUsize::new(0)));
        let tracer = ThreadTracer::new(shared, Stepping::None, None);
        tracer.set_previous_hook(Some(recorder.clone()));

        let frame: FrameRef = FakeFrame::new("func", "/src/main.py", 5, None);

        tracer.clone().trace(&frame, &TraceEvent::Call);
        tracer.clone().trace(&frame, &TraceEvent::Line);
        tracer.clone().trace(&frame, &TraceEvent::Return);
        tracer.clone().trace(&frame, &TraceEvent::Line);

        assert_eq!(recorder.0.load(Ordering::SeqCst), 4);
    }
}
