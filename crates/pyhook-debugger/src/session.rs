use std::io::{Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::sync::Arc;
use std::sync::atomic::Ordering;

use pyhook_proto::Event;

use crate::controller;
use crate::error::{Error, Result};
use crate::hook;
use crate::intercept::ThreadInterceptor;
use crate::output::{DebuggerOutput, OutputStream};
use crate::runtime::{ExceptionInfo, FrameRef, Runtime};
use crate::state::{DebuggerConfig, Shared};
use crate::thread::{BlockReason, Stepping, ThreadTracer};

const WAIT_PROMPT: &str = "Press any key to continue . . . ";

/// Options of a launched program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchOptions {
    /// Port of the controller, listening on the loopback interface.
    pub port: u16,
    /// Session identifier sent to the controller.
    pub debug_id: String,
    /// Wait for a key press when the program fails.
    pub wait_on_exception: bool,
    /// Forward the program output to the controller.
    pub redirect_output: bool,
    /// Wait for a key press when the program completes.
    pub wait_on_exit: bool,
}

/// How a launched program ended.
pub enum ProgramExit {
    /// The program ran to completion.
    Completed,
    /// The program requested to exit with the given code.
    Exit(i32),
    /// The program raised an uncaught exception.
    Exception(ExceptionInfo),
}

/// In-process debugger, reporting to a single controller at a time.
#[derive(Clone)]
pub struct Debugger {
    shared: Arc<Shared>,
}

impl Debugger {
    /// Creates a debugger for the given runtime, not attached yet.
    pub fn new(runtime: Arc<dyn Runtime>, config: DebuggerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(runtime, config)),
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    /// Returns whether a controller is attached.
    pub fn is_attached(&self) -> bool {
        !self.shared.is_detached()
    }

    /// Connects to the controller listening on the given port and starts
    /// serving its requests.
    ///
    /// Every known thread and module is reported. If `report_and_block` is
    /// set, the calling thread (which must be traced) then blocks until the
    /// controller resumes it. Thread creation gets intercepted afterwards,
    /// unless it already is for attach.
    #[tracing::instrument(name = "Attach", skip(self))]
    pub fn attach(&self, port: u16, debug_id: &str, report_and_block: bool) -> Result<()> {
        let shared = &self.shared;

        if !shared.is_detached() {
            return Err(Error::AlreadyAttached);
        }

        let current = if report_and_block {
            Some(self.current_thread().ok_or(Error::ThreadNotTraced)?)
        } else {
            None
        };

        let stream = self.connect(port)?;
        let reader = stream.try_clone()?;

        shared.reset_session();
        shared.channel.attach(stream, debug_id)?;

        tracing::info!(port, debug_id, "attached to controller");

        controller::spawn(shared.clone(), reader)?;

        shared.threads.for_each(|t| shared.send(Event::NewThread { tid: t.id() }));

        for module in shared.modules.all() {
            shared.send(Event::ModuleLoaded {
                id: module.id,
                filename: module.filename,
            });
        }

        if let Some(current) = current {
            current.block(BlockReason::Loaded);
        }

        if !shared.intercepting_for_attach.load(Ordering::SeqCst) {
            self.intercept_threads(false);
        }

        Ok(())
    }

    fn connect(&self, port: u16) -> Result<TcpStream> {
        let config = &self.shared.config;

        for attempt in 1..=config.connect_attempts {
            match TcpStream::connect((Ipv4Addr::LOCALHOST, port)) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!(port, attempt, error = %e, "controller not reachable");
                    std::thread::sleep(config.connect_interval);
                }
            }
        }

        Err(Error::AttachFailed {
            port,
            attempts: config.connect_attempts,
        })
    }

    /// Runs a program on the calling thread, under the debugger.
    ///
    /// The program starts blocked on its first line. Returns the exit code of
    /// the program.
    #[tracing::instrument(name = "Launch", skip_all, fields(port = options.port))]
    pub fn launch<F>(&self, options: &LaunchOptions, program: F) -> Result<i32>
    where
        F: FnOnce() -> ProgramExit,
    {
        self.attach(options.port, &options.debug_id, false)?;

        if options.redirect_output {
            self.shared.runtime.redirect_output(Some((
                Box::new(self.output(OutputStream::Stdout)),
                Box::new(self.output(OutputStream::Stderr)),
            )));
        }

        let Some(tracer) = self.new_thread(false, None) else {
            return Err(Error::ThreadNotTraced);
        };

        tracer.set_stepping(Stepping::LaunchBreak);
        hook::settrace(Some(tracer.clone()));

        let exit = program();

        self.exit_current_thread();

        let code = match exit {
            ProgramExit::Completed => {
                if options.wait_on_exit {
                    wait_for_key();
                }
                0
            }
            ProgramExit::Exit(code) => {
                self.report_process_exit(code);

                if options.wait_on_exception && code != 0 {
                    wait_for_key();
                }

                return Ok(code);
            }
            ProgramExit::Exception(info) => {
                self.shared.runtime.write_stdout(&info.format());

                if options.wait_on_exception {
                    wait_for_key();
                }

                1
            }
        };

        self.report_process_exit(code);

        Ok(code)
    }

    /// Reports the exit of the process and waits for the controller to
    /// acknowledge it.
    pub fn report_process_exit(&self, code: i32) {
        if self.shared.is_detached() {
            return;
        }

        tracing::info!(code, "process exiting");

        self.shared.send(Event::ProcessExited { code });
        self.shared.exit_latch.wait();
    }

    /// Makes every thread created from now on traced.
    ///
    /// An interceptor installed `for_attach` survives detaching, so that a
    /// later attach finds every thread traced.
    pub fn intercept_threads(&self, for_attach: bool) {
        self.shared
            .intercepting_for_attach
            .store(for_attach, Ordering::SeqCst);

        let interceptor = ThreadInterceptor::new(self.clone(), for_attach);
        self.shared
            .runtime
            .set_thread_interceptor(Some(Arc::new(interceptor)));
    }

    /// Creates the record of the calling thread and reports it.
    ///
    /// With `set_break`, the thread breaks on its next line. Returns `None`
    /// on the controller thread, which is never traced.
    pub fn new_thread(&self, set_break: bool, frame: Option<FrameRef>) -> Option<Arc<ThreadTracer>> {
        let shared = &self.shared;

        if shared.is_controller_thread() {
            return None;
        }

        let stepping = if set_break {
            Stepping::AttachBreak
        } else {
            Stepping::None
        };

        let tracer = ThreadTracer::new(shared.clone(), stepping, frame);

        shared.threads.insert_with(tracer.clone(), |tracer| {
            tracing::debug!(tid = tracer.id(), "new thread");

            if !shared.is_detached() {
                shared.send(Event::NewThread { tid: tracer.id() });
            }
        });

        Some(tracer)
    }

    /// Stops tracing the calling thread, removing its record and reporting
    /// its exit.
    pub fn exit_current_thread(&self) {
        hook::settrace(None);

        let Some(tracer) = self.current_thread() else {
            return;
        };

        let shared = &self.shared;
        shared.threads.remove(tracer.id());

        tracing::debug!(tid = tracer.id(), "thread exited");

        if !shared.is_detached() {
            shared.send(Event::ThreadExited { tid: tracer.id() });
        }
    }

    /// Returns the record of the calling thread, if traced.
    pub fn current_thread(&self) -> Option<Arc<ThreadTracer>> {
        self.shared.threads.current()
    }

    /// Returns the record of the thread with the given identifier.
    pub fn thread(&self, tid: i32) -> Option<Arc<ThreadTracer>> {
        self.shared.threads.get(tid)
    }

    /// Registers a callback invoked once the debugger detached.
    pub fn on_detach<F>(&self, callback: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared
            .detach_callbacks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(Box::new(callback));
    }

    /// Returns a writer forwarding output to the controller.
    pub fn output(&self, stream: OutputStream) -> DebuggerOutput {
        DebuggerOutput::new(self.shared.clone(), stream)
    }
}

fn wait_for_key() {
    let mut stdout = std::io::stdout();

    if stdout
        .write_all(WAIT_PROMPT.as_bytes())
        .and_then(|_| stdout.flush())
        .is_err()
    {
        return;
    }

    let mut key = [0u8; 1];
    let _ = std::io::stdin().read(&mut key);
}
