use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::thread::ThreadId;
use std::time::Duration;

use indexmap::IndexMap;
use pyhook_proto::{Channel, Event};

use crate::breakpoint::{BreakpointRequest, BreakpointTable};
use crate::exception::ExceptionFilter;
use crate::module::{Module, ModuleRegistry, absolute_path, same_file};
use crate::runtime::{CodeInfo, Runtime};
use crate::thread::ThreadTracer;

/// Configuration of a [Debugger](crate::Debugger).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebuggerConfig {
    /// Number of connection attempts made when attaching.
    pub connect_attempts: u32,

    /// Delay between two connection attempts.
    pub connect_interval: Duration,

    /// Code under this directory is library code, never stepped into.
    pub library_prefix: Option<PathBuf>,

    /// Source files never debugged.
    pub skip_files: Vec<PathBuf>,
}

impl Default for DebuggerConfig {
    fn default() -> Self {
        Self {
            connect_attempts: 50,
            connect_interval: Duration::from_millis(50),
            library_prefix: None,
            skip_files: Vec::new(),
        }
    }
}

/// One-shot event a thread can wait for.
#[derive(Default)]
pub(crate) struct Latch {
    released: Mutex<bool>,
    cond: Condvar,
}

impl Latch {
    pub fn release(&self) {
        *self.lock() = true;
        self.cond.notify_all();
    }

    pub fn reset(&self) {
        *self.lock() = false;
    }

    pub fn wait(&self) {
        let _released = self
            .cond
            .wait_while(self.lock(), |released| !*released)
            .unwrap_or_else(PoisonError::into_inner);
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.released.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Traced threads, keyed by thread identifier.
#[derive(Default)]
pub(crate) struct ThreadTable {
    threads: Mutex<IndexMap<i32, Arc<ThreadTracer>>>,
}

impl ThreadTable {
    /// Inserts a thread record, calling `notify` before any other thread can
    /// see it listed.
    pub fn insert_with<F>(&self, tracer: Arc<ThreadTracer>, notify: F)
    where
        F: FnOnce(&ThreadTracer),
    {
        let mut threads = self.lock();
        notify(&tracer);
        threads.insert(tracer.id(), tracer);
    }

    /// Calls `f` on every thread record, in creation order.
    pub fn for_each<F>(&self, f: F)
    where
        F: FnMut(&Arc<ThreadTracer>),
    {
        self.lock().values().for_each(f);
    }

    pub fn remove(&self, tid: i32) -> Option<Arc<ThreadTracer>> {
        self.lock().shift_remove(&tid)
    }

    pub fn get(&self, tid: i32) -> Option<Arc<ThreadTracer>> {
        self.lock().get(&tid).cloned()
    }

    pub fn current(&self) -> Option<Arc<ThreadTracer>> {
        let os_id = std::thread::current().id();
        self.lock()
            .values()
            .find(|t| t.os_id() == os_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Arc<ThreadTracer>> {
        self.lock().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, IndexMap<i32, Arc<ThreadTracer>>> {
        self.threads.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// State shared by the controller loop and every tracer.
pub(crate) struct Shared {
    pub runtime: Arc<dyn Runtime>,
    pub config: DebuggerConfig,
    pub channel: Channel,
    pub threads: ThreadTable,
    pub modules: ModuleRegistry,
    pub breakpoints: RwLock<BreakpointTable>,
    pub exceptions: ExceptionFilter,
    pub send_break_complete: AtomicBool,
    pub intercepting_for_attach: AtomicBool,
    pub exit_latch: Latch,
    pub detach_callbacks: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    controller_thread: Mutex<Option<ThreadId>>,
    next_thread_id: AtomicI32,
    skip_files: Vec<String>,
    library_prefix: Option<String>,
}

impl Shared {
    pub fn new(runtime: Arc<dyn Runtime>, config: DebuggerConfig) -> Self {
        let skip_files = config
            .skip_files
            .iter()
            .map(|f| absolute_path(&f.to_string_lossy()))
            .collect();

        let library_prefix = config
            .library_prefix
            .as_ref()
            .map(|p| absolute_path(&p.to_string_lossy()));

        Self {
            runtime,
            config,
            channel: Channel::disconnected(),
            threads: ThreadTable::default(),
            modules: ModuleRegistry::default(),
            breakpoints: RwLock::new(BreakpointTable::default()),
            exceptions: ExceptionFilter::default(),
            send_break_complete: AtomicBool::new(false),
            intercepting_for_attach: AtomicBool::new(false),
            exit_latch: Latch::default(),
            detach_callbacks: Mutex::new(Vec::new()),
            controller_thread: Mutex::new(None),
            next_thread_id: AtomicI32::new(1),
            skip_files,
            library_prefix,
        }
    }

    /// Sends an event, unless detached.
    pub fn send(&self, event: Event) {
        if let Err(e) = self.channel.send(&event) {
            tracing::trace!(tag = ?event.tag(), error = %e, "event dropped");
        }
    }

    pub fn is_detached(&self) -> bool {
        self.channel.is_detached()
    }

    pub fn next_thread_id(&self) -> i32 {
        self.next_thread_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn set_controller_thread(&self, id: Option<ThreadId>) {
        *self
            .controller_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = id;
    }

    pub fn is_controller_thread(&self) -> bool {
        let current = std::thread::current().id();

        self.controller_thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some_and(|id| id == current)
    }

    pub fn breakpoints(&self) -> std::sync::RwLockReadGuard<'_, BreakpointTable> {
        self.breakpoints.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn breakpoints_mut(&self) -> std::sync::RwLockWriteGuard<'_, BreakpointTable> {
        self.breakpoints.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns whether the given code may be debugged at all.
    pub fn should_debug_code(&self, code: &CodeInfo) -> bool {
        if self.skip_files.is_empty() {
            return true;
        }

        let filename = absolute_path(&code.filename);
        !self.skip_files.iter().any(|f| same_file(f, &filename))
    }

    /// Returns whether the given code is library code, never stepped into.
    pub fn is_library_code(&self, code: &CodeInfo) -> bool {
        self.runtime.is_library_code(code)
            || self
                .library_prefix
                .as_ref()
                .is_some_and(|prefix| absolute_path(&code.filename).starts_with(prefix.as_str()))
    }

    /// Registers a module whose top-level code started.
    ///
    /// When attached, the module is reported and its pending breakpoints get
    /// bound. Registration happens under the breakpoint table lock, so a
    /// breakpoint set concurrently either sees the module or stays pending
    /// until this binds it.
    pub fn load_module(&self, code_filename: &str) -> Module {
        let mut breakpoints = self.breakpoints_mut();
        let module = self.modules.register(code_filename);

        if !self.is_detached() {
            tracing::debug!(id = module.id, filename = %module.filename, "module loaded");

            self.send(Event::ModuleLoaded {
                id: module.id,
                filename: module.filename.clone(),
            });

            for id in breakpoints.bind_pending(&module) {
                self.send(Event::BreakpointBound { id });
            }
        }

        module
    }

    /// Sets a breakpoint, bound to the loaded modules or left pending, and
    /// reports the outcome.
    ///
    /// Returns whether the breakpoint was bound.
    pub fn set_breakpoint(&self, request: BreakpointRequest) -> bool {
        let id = request.id;

        let mut breakpoints = self.breakpoints_mut();
        let bound = breakpoints.set(&self.modules.all(), request);

        if bound {
            self.send(Event::BreakpointBound { id });
        } else {
            self.send(Event::BreakpointFailed { id });
        }

        bound
    }

    /// Resets the state scoped to a debugging session.
    pub fn reset_session(&self) {
        self.breakpoints_mut().clear();
        self.exceptions.modes.reset();
        self.exceptions.handlers.clear();
        self.send_break_complete.store(false, Ordering::SeqCst);
        self.exit_latch.reset();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use pyhook_proto::{Event, MemoryTransport};

    use super::{DebuggerConfig, Shared};
    use crate::breakpoint::BreakpointRequest;
    use crate::runtime::tests::NullRuntime;

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

    fn request(id: i32, filename: &str) -> BreakpointRequest {
        BreakpointRequest {
            id,
            line: 1,
            filename: filename.to_owned(),
            condition: String::new(),
            break_when_changed: false,
        }
    }

    #[test]
    fn pending_breakpoint_binds_on_load() {
        let (shared, transport) = attached();

        assert!(!shared.set_breakpoint(request(3, "/src/main.py")));
        shared.load_module("/src/main.py");

        assert_eq!(
            events(&transport),
            [
                Event::BreakpointFailed { id: 3 },
                Event::ModuleLoaded {
                    id: 0,
                    filename: "/src/main.py".into(),
                },
                Event::BreakpointBound { id: 3 },
            ]
        );
        assert!(shared.breakpoints().is_bound(3));
    }

    #[test]
    fn breakpoint_set_while_module_loads_is_never_stranded() {
        const FILES: i32 = 64;

        let (shared, transport) = attached();
        let barrier = Arc::new(Barrier::new(2));

        let loader = {
            let shared = shared.clone();
            let barrier = barrier.clone();

            std::thread::spawn(move || {
                barrier.wait();

                for i in 0..FILES {
                    shared.load_module(&format!("/src/mod{i}.py"));
                }
            })
        };

        barrier.wait();

        for i in 0..FILES {
            shared.set_breakpoint(request(i, &format!("/src/mod{i}.py")));
        }

        loader.join().unwrap();

        {
            let breakpoints = shared.breakpoints();

            for id in 0..FILES {
                assert!(breakpoints.is_bound(id), "breakpoint {id} left pending");
                assert!(!breakpoints.is_pending(id));
            }
        }

        // modules are registered in order, so module `i` has identifier `i`
        let events = events(&transport);

        for id in 0..FILES {
            let loaded = events
                .iter()
                .position(|e| matches!(e, Event::ModuleLoaded { id: m, .. } if *m == id))
                .expect("module not reported");
            let bound = events
                .iter()
                .position(|e| *e == Event::BreakpointBound { id })
                .expect("breakpoint not bound");

            assert!(loaded < bound);

            if let Some(failed) = events
                .iter()
                .position(|e| *e == Event::BreakpointFailed { id })
            {
                assert!(failed < bound);
            }
        }
    }
}
