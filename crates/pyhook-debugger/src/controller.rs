use std::io::Read;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread::JoinHandle;

use pyhook_proto::{Event, Request};

use crate::breakpoint::BreakpointRequest;
use crate::error::Result;
use crate::exception::BreakMode;
use crate::state::Shared;
use crate::thread::{Stepping, ThreadTracer};

const FRAME_NOT_FOUND: &str = "<error: frame not found>";

/// Starts the controller loop on a dedicated thread.
///
/// The thread is never traced.
pub(crate) fn spawn<R>(shared: Arc<Shared>, reader: R) -> Result<JoinHandle<()>>
where
    R: Read + Send + 'static,
{
    let controller = Controller {
        shared: shared.clone(),
    };

    let handle = std::thread::Builder::new()
        .name("pyhook-controller".into())
        .spawn(move || controller.run(reader))?;

    shared.set_controller_thread(Some(handle.thread().id()));

    Ok(handle)
}

/// Dispatcher of the requests sent by the controller.
pub(crate) struct Controller {
    shared: Arc<Shared>,
}

impl Controller {
    /// Reads and handles requests until the connection ends, or until the
    /// debugger detaches.
    #[tracing::instrument(name = "Controller", skip_all)]
    pub fn run<R: Read>(&self, mut reader: R) {
        tracing::info!("controller loop started");

        loop {
            let request = match Request::read_from(&mut reader) {
                Ok(request) => request,
                Err(pyhook_proto::Error::Disconnected) => {
                    tracing::info!("controller disconnected");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "invalid request");
                    break;
                }
            };

            tracing::trace!(tag = ?request.tag(), "request received");

            if self.handle(request).is_break() {
                break;
            }
        }

        self.shared.exit_latch.release();
        self.shared.exceptions.handlers.cancel();

        if !self.shared.is_detached() {
            self.shared.channel.close();
        }

        self.shared.set_controller_thread(None);

        tracing::info!("controller loop stopped");
    }

    /// Handles a single request.
    pub fn handle(&self, request: Request) -> ControlFlow<()> {
        let shared = &self.shared;

        match request {
            Request::Exit => shared.exit_latch.release(),
            Request::StepInto { tid } => self.resume_stepping(tid, Stepping::Into),
            Request::StepOut { tid } => self.resume_stepping(tid, Stepping::OUT),
            Request::StepOver { tid } => self.resume_stepping(tid, Stepping::OVER),
            Request::SetBreakpoint {
                id,
                line,
                filename,
                condition,
                break_when_changed,
            } => {
                let request = BreakpointRequest {
                    id,
                    line,
                    filename,
                    condition,
                    break_when_changed,
                };

                let bound = shared.set_breakpoint(request);
                tracing::debug!(id, line, bound, "breakpoint set");
            }
            Request::SetBreakpointCondition {
                id,
                condition,
                break_when_changed,
            } => {
                shared
                    .breakpoints_mut()
                    .set_condition(id, &condition, break_when_changed);
            }
            Request::RemoveBreakpoint { line, id } => shared.breakpoints_mut().remove(line, id),
            Request::BreakAll => {
                shared.send_break_complete.store(true, Ordering::SeqCst);
                shared.threads.for_each(|t| t.set_stepping(Stepping::Break));
            }
            Request::ResumeAll => shared.threads.for_each(|t| {
                t.unblock();
            }),
            Request::ResumeThread { tid } => {
                if let Some(thread) = self.thread(tid) {
                    thread.unblock();
                }
            }
            Request::Execute {
                text,
                tid,
                frame_id,
                eval_id,
            } => {
                if let Some(thread) = self.thread(tid) {
                    match thread.frame_at(frame_id) {
                        Some(frame) => thread.run_on_thread(text, frame, eval_id),
                        None => shared.send(Event::ExecutionError {
                            eval_id,
                            text: FRAME_NOT_FOUND.to_owned(),
                        }),
                    }
                }
            }
            Request::EnumChildren {
                text,
                tid,
                frame_id,
                eval_id,
                child_is_enumerate,
            } => {
                if let Some(thread) = self.thread(tid) {
                    match thread.frame_at(frame_id) {
                        Some(frame) => {
                            thread.enum_child_on_thread(text, frame, eval_id, child_is_enumerate)
                        }
                        None => shared.send(Event::Children {
                            eval_id,
                            is_index: false,
                            is_enumerate: false,
                            children: Vec::new(),
                        }),
                    }
                }
            }
            Request::SetLineNumber { tid, line, .. } => self.set_line(tid, line),
            Request::Detach => {
                self.detach();
                return ControlFlow::Break(());
            }
            Request::ClearStepping { tid } => {
                if let Some(thread) = self.thread(tid) {
                    thread.set_stepping(Stepping::None);
                }
            }
            Request::SetExceptionInfo {
                default_mode,
                modes,
            } => {
                tracing::debug!(default_mode, count = modes.len(), "exception modes replaced");

                shared.exceptions.modes.replace(
                    BreakMode::from_bits(default_mode),
                    modes
                        .into_iter()
                        .map(|(name, mode)| (name, BreakMode::from_bits(mode))),
                );
            }
            Request::SetExceptionHandlerInfo { filename, regions } => {
                tracing::debug!(%filename, count = regions.len(), "exception handlers received");
                shared.exceptions.handlers.store(filename, regions);
            }
        }

        ControlFlow::Continue(())
    }

    fn thread(&self, tid: i32) -> Option<Arc<ThreadTracer>> {
        let thread = self.shared.threads.get(tid);

        if thread.is_none() {
            tracing::debug!(tid, "unknown thread");
        }

        thread
    }

    fn resume_stepping(&self, tid: i32, stepping: Stepping) {
        if let Some(thread) = self.thread(tid) {
            thread.set_stepping(stepping);
            thread.unblock();
        }
    }

    fn set_line(&self, tid: i32, line: i32) {
        let frame = self.thread(tid).and_then(|t| t.cur_frame());

        let event = match frame {
            Some(frame) => match frame.set_line(line) {
                Ok(()) => Event::SetLineResult {
                    success: true,
                    tid,
                    line: frame.line(),
                },
                Err(e) => {
                    tracing::debug!(tid, line, error = %e.message, "failed to set line");

                    Event::SetLineResult {
                        success: false,
                        tid,
                        line: frame.line(),
                    }
                }
            },
            None => Event::SetLineResult {
                success: false,
                tid,
                line: 0,
            },
        };

        self.shared.send(event);
    }

    #[tracing::instrument(name = "Detach", skip_all)]
    fn detach(&self) {
        let shared = &self.shared;
        let for_attach = shared.intercepting_for_attach.load(Ordering::SeqCst);

        tracing::info!(for_attach, "detaching");

        let threads = shared.threads.all();

        if !for_attach {
            for thread in threads.iter() {
                thread.request_detach();
            }

            shared.threads.clear();
        }

        shared.breakpoints_mut().clear();
        shared.exceptions.handlers.clear();
        shared.exceptions.handlers.cancel();

        shared.channel.detach();

        for thread in threads.iter() {
            thread.unblock();
        }

        if !for_attach {
            shared.runtime.redirect_output(None);
            shared.runtime.set_thread_interceptor(None);
        }

        let callbacks = std::mem::take(
            &mut *shared
                .detach_callbacks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );

        for callback in callbacks {
            callback();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pyhook_proto::{Event, HandlerRegion, MemoryTransport, Request};

    use super::Controller;
    use crate::runtime::tests::NullRuntime;
    use crate::state::{DebuggerConfig, Shared};
    use crate::thread::{Stepping, ThreadTracer};

    fn controller() -> (Controller, MemoryTransport) {
        let shared = Arc::new(Shared::new(Arc::new(NullRuntime), DebuggerConfig::default()));
        let transport = MemoryTransport::default();

        shared.channel.attach(transport.clone(), "test").unwrap();
        transport.take();

        (Controller { shared }, transport)
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

    fn encode(requests: &[Request]) -> Vec<u8> {
        requests.iter().flat_map(Request::encode).collect()
    }

    #[test]
    fn breakpoint_binds_to_loaded_module() {
        let (controller, transport) = controller();
        controller.shared.modules.register("/src/lib.py");

        let requests = encode(&[
            Request::SetBreakpoint {
                id: 1,
                line: 4,
                filename: "/src/lib.py".into(),
                condition: String::new(),
                break_when_changed: false,
            },
            Request::SetBreakpoint {
                id: 2,
                line: 4,
                filename: "/src/main.py".into(),
                condition: String::new(),
                break_when_changed: false,
            },
        ]);

        controller.run(requests.as_slice());

        assert_eq!(
            events(&transport),
            [Event::BreakpointBound { id: 1 }, Event::BreakpointFailed { id: 2 }]
        );

        let breakpoints = controller.shared.breakpoints();
        assert!(breakpoints.is_bound(1));
        assert!(breakpoints.is_pending(2));
    }

    #[test]
    fn removed_breakpoint_leaves_table() {
        let (controller, _transport) = controller();
        controller.shared.modules.register("/src/main.py");

        let requests = encode(&[
            Request::SetBreakpoint {
                id: 1,
                line: 4,
                filename: "/src/main.py".into(),
                condition: "x".into(),
                break_when_changed: false,
            },
            Request::SetBreakpointCondition {
                id: 1,
                condition: "y".into(),
                break_when_changed: true,
            },
            Request::RemoveBreakpoint { line: 4, id: 1 },
        ]);

        controller.run(requests.as_slice());

        assert!(controller.shared.breakpoints().is_empty());
    }

    #[test]
    fn break_all_marks_every_thread() {
        let (controller, _transport) = controller();
        let shared = controller.shared.clone();

        let tracers: Vec<_> = (0..2)
            .map(|_| ThreadTracer::new(shared.clone(), Stepping::None, None))
            .collect();

        for tracer in tracers.iter() {
            shared.threads.insert_with(tracer.clone(), |_| ());
        }

        let _ = controller.handle(Request::BreakAll);

        assert!(tracers.iter().all(|t| t.stepping() == Stepping::Break));
        assert!(shared.send_break_complete.load(std::sync::atomic::Ordering::SeqCst));

        let _ = controller.handle(Request::ClearStepping {
            tid: tracers[0].id(),
        });
        assert_eq!(tracers[0].stepping(), Stepping::None);
    }

    #[test]
    fn execute_on_unknown_frame() {
        let (controller, transport) = controller();
        let shared = controller.shared.clone();

        let tracer = ThreadTracer::new(shared.clone(), Stepping::None, None);
        shared.threads.insert_with(tracer.clone(), |_| ());

        let _ = controller.handle(Request::Execute {
            text: "x".into(),
            tid: tracer.id(),
            frame_id: 0,
            eval_id: 9,
        });

        let _ = controller.handle(Request::SetLineNumber {
            tid: tracer.id(),
            frame_id: 0,
            line: 3,
        });

        assert_eq!(
            events(&transport),
            [
                Event::ExecutionError {
                    eval_id: 9,
                    text: "<error: frame not found>".into()
                },
                Event::SetLineResult {
                    success: false,
                    tid: tracer.id(),
                    line: 0
                },
            ]
        );
    }

    #[test]
    fn handler_info_fills_cache() {
        let (controller, _transport) = controller();

        let _ = controller.handle(Request::SetExceptionHandlerInfo {
            filename: "/src/main.py".into(),
            regions: vec![HandlerRegion {
                line_start: 2,
                line_end: 5,
                expressions: ["ValueError".to_owned()].into(),
            }],
        });

        let regions = controller.shared.exceptions.handlers.get("/src/main.py").unwrap();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].contains(3));
    }

    #[test]
    fn detach_notifies_and_clears() {
        let (controller, transport) = controller();
        let shared = controller.shared.clone();
        shared.modules.register("/src/main.py");

        let tracer = ThreadTracer::new(shared.clone(), Stepping::None, None);
        shared.threads.insert_with(tracer.clone(), |_| ());

        let detached = Arc::new(std::sync::atomic::AtomicBool::new(false));
        shared.detach_callbacks.lock().unwrap().push(Box::new({
            let detached = detached.clone();
            move || detached.store(true, std::sync::atomic::Ordering::SeqCst)
        }));

        let requests = encode(&[
            Request::SetBreakpoint {
                id: 1,
                line: 4,
                filename: "/src/main.py".into(),
                condition: String::new(),
                break_when_changed: false,
            },
            Request::Detach,
            Request::BreakAll,
        ]);

        controller.run(requests.as_slice());

        assert_eq!(
            events(&transport),
            [Event::BreakpointBound { id: 1 }, Event::Detached]
        );

        assert!(shared.is_detached());
        assert!(shared.breakpoints().is_empty());
        assert!(shared.threads.all().is_empty());
        assert_eq!(tracer.stepping(), Stepping::Break);
        assert!(detached.load(std::sync::atomic::Ordering::SeqCst));
        assert!(!shared.send_break_complete.load(std::sync::atomic::Ordering::SeqCst));
    }
}
