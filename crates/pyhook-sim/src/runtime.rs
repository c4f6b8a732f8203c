use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use indexmap::IndexMap;
use pyhook_debugger::runtime::{ExceptionInfo, Runtime};
use pyhook_debugger::{OutputStream, ProgramExit, ThreadInterceptor};

use crate::ast::CodeBody;
use crate::builtins::{self, ExcKind};
use crate::error::Result;
use crate::frame::SimFrame;
use crate::interp::{self, Exec, Raised};
use crate::parser::parse_module;
use crate::trace;
use crate::value::{Module, ThreadHandle, Value, as_int, lock};

/// Stack size of the threads started by programs.
const THREAD_STACK_SIZE: usize = 16 * 1024 * 1024;

/// Name of the main module.
const MAIN_MODULE: &str = "__main__";

type OutputStreams = (Box<dyn Write + Send>, Box<dyn Write + Send>);

/// Runtime executing a single program.
///
/// Modules imported by the program are searched beside its main script.
pub struct SimRuntime {
    filename: String,
    base_dir: PathBuf,
    argv: Vec<String>,
    main: Arc<CodeBody>,
    modules: Mutex<IndexMap<String, Arc<Module>>>,
    interceptor: RwLock<Option<(u64, Arc<ThreadInterceptor>)>>,
    interceptor_gen: AtomicU64,
    output: Mutex<Option<OutputStreams>>,
    thread_count: AtomicU64,
}

impl SimRuntime {
    /// Loads the program of the given main script.
    ///
    /// `args` are the program arguments, following the script path in
    /// `sys.argv`.
    #[tracing::instrument(name = "Load", skip(args))]
    pub fn load(script: &Path, args: &[String]) -> Result<Arc<Self>> {
        let path = std::path::absolute(script)?;
        let source = std::fs::read_to_string(&path)?;

        Self::from_source(&path, &source, args)
    }

    /// Loads a program from its source, as if read from the given path.
    pub fn from_source(path: &Path, source: &str, args: &[String]) -> Result<Arc<Self>> {
        let filename = path.display().to_string();
        let main = parse_module(source, &filename)?;

        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();

        let mut argv = vec![filename.clone()];
        argv.extend(args.iter().cloned());

        tracing::debug!(filename = %filename, "program loaded");

        Ok(Arc::new(Self {
            filename,
            base_dir,
            argv,
            main,
            modules: Mutex::new(IndexMap::new()),
            interceptor: RwLock::new(None),
            interceptor_gen: AtomicU64::new(1),
            output: Mutex::new(None),
            thread_count: AtomicU64::new(0),
        }))
    }

    /// Returns the absolute path of the main script.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Runs the main module on the calling thread, until completion.
    #[tracing::instrument(name = "Run", skip_all, fields(filename = %self.filename))]
    pub fn run_main(self: &Arc<Self>) -> ProgramExit {
        let module = self.new_module(MAIN_MODULE, &self.filename);
        lock(&module.globals).insert("__file__".to_owned(), Value::text(self.filename.as_str()));

        lock(&self.modules).insert(MAIN_MODULE.to_owned(), module.clone());

        let frame = SimFrame::new(&self.main, module, None, None);

        let Err(raised) = interp::run_frame(&frame, &self.main) else {
            tracing::debug!("program completed");
            return ProgramExit::Completed;
        };

        if !raised.is(ExcKind::SystemExit) {
            tracing::debug!("program raised an uncaught exception");
            return ProgramExit::Exception(raised.info());
        }

        let code = self.exit_code(&raised);
        tracing::debug!(code, "program exited");

        ProgramExit::Exit(code)
    }

    fn exit_code(&self, raised: &Raised) -> i32 {
        let Value::Instance(instance) = raised.value() else {
            return 1;
        };

        let code = match lock(&instance.attrs).get("args") {
            Some(Value::Tuple(args)) => args.first().cloned(),
            _ => None,
        };

        match code {
            None | Some(Value::None) => 0,
            Some(code) if as_int(&code).is_some() => {
                let code = as_int(&code).unwrap_or_default();
                i32::try_from(code).unwrap_or(if code < 0 { i32::MIN } else { i32::MAX })
            }
            Some(message) => {
                let text = interp::str(&message).unwrap_or_default();
                self.write_output(OutputStream::Stderr, &format!("{text}\n"));
                1
            }
        }
    }

    fn new_module(self: &Arc<Self>, name: &str, filename: &str) -> Arc<Module> {
        let mut globals = IndexMap::new();
        globals.insert("__name__".to_owned(), Value::text(name));

        Arc::new(Module {
            name: name.to_owned(),
            filename: filename.to_owned(),
            globals: Mutex::new(globals),
            runtime: self.clone(),
        })
    }

    /// Imports a module, running its top-level code on first import.
    pub(crate) fn import(self: &Arc<Self>, name: &str) -> Exec<Arc<Module>> {
        if let Some(module) = lock(&self.modules).get(name) {
            return Ok(module.clone());
        }

        if name == "sys" {
            let module = builtins::sys_module(self, &self.argv);
            lock(&self.modules).insert(name.to_owned(), module.clone());
            return Ok(module);
        }

        let path = self.base_dir.join(format!("{name}.py"));

        let Ok(source) = std::fs::read_to_string(&path) else {
            return Err(builtins::error(
                ExcKind::ImportError,
                format!("No module named '{name}'"),
            ));
        };

        let filename = path.display().to_string();

        let body = parse_module(&source, &filename)
            .map_err(|e| builtins::error(ExcKind::SyntaxError, e.to_string()))?;

        tracing::debug!(name, filename = %filename, "importing module");

        let module = self.new_module(name, &filename);
        lock(&self.modules).insert(name.to_owned(), module.clone());

        let frame = SimFrame::new(&body, module.clone(), None, trace::current_frame());

        if let Err(raised) = interp::run_frame(&frame, &body) {
            lock(&self.modules).shift_remove(name);
            return Err(raised);
        }

        Ok(module)
    }

    /// Returns the installed thread interceptor, with its generation.
    ///
    /// The generation changes whenever an interceptor gets installed.
    pub(crate) fn interceptor(&self) -> Option<(u64, Arc<ThreadInterceptor>)> {
        self.interceptor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Writes some program output, to the redirected streams if any.
    pub(crate) fn write_output(&self, stream: OutputStream, text: &str) {
        let mut output = lock(&self.output);

        let result = match (output.as_mut(), stream) {
            (Some((stdout, _)), OutputStream::Stdout) => {
                stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush())
            }
            (Some((_, stderr)), OutputStream::Stderr) => {
                stderr.write_all(text.as_bytes()).and_then(|_| stderr.flush())
            }
            (None, OutputStream::Stdout) => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(text.as_bytes()).and_then(|_| stdout.flush())
            }
            (None, OutputStream::Stderr) => std::io::stderr().lock().write_all(text.as_bytes()),
        };

        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to write program output");
        }
    }

    /// Starts a thread calling the given function.
    ///
    /// The body runs through the installed thread interceptor, if any.
    pub(crate) fn spawn(self: &Arc<Self>, func: Value, args: Vec<Value>) -> Exec<Value> {
        let id = self.thread_count.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("Thread-{id}");

        let runtime = self.clone();
        let interceptor = self.interceptor().map(|(_, interceptor)| interceptor);
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .stack_size(THREAD_STACK_SIZE)
            .spawn(move || {
                let body = || runtime.run_thread(&thread_name, &func, args);

                match interceptor {
                    Some(interceptor) => interceptor.run(body),
                    None => body(),
                }
            })
            .map_err(|e| {
                builtins::error(
                    ExcKind::RuntimeError,
                    format!("can't start new thread: {e}"),
                )
            })?;

        tracing::debug!(name = %name, "thread started");

        Ok(Value::Thread(Arc::new(ThreadHandle {
            name,
            handle: Mutex::new(Some(handle)),
        })))
    }

    fn run_thread(self: &Arc<Self>, name: &str, func: &Value, args: Vec<Value>) {
        let Err(raised) = interp::call(self, func, args) else {
            return;
        };

        if raised.is(ExcKind::SystemExit) {
            return;
        }

        let info: ExceptionInfo = raised.info();
        self.write_output(
            OutputStream::Stderr,
            &format!("Exception in thread {name}:\n{}", info.format()),
        );
    }
}

impl Runtime for SimRuntime {
    fn set_thread_interceptor(&self, interceptor: Option<Arc<ThreadInterceptor>>) {
        let generation = self.interceptor_gen.fetch_add(1, Ordering::SeqCst);

        *self
            .interceptor
            .write()
            .unwrap_or_else(PoisonError::into_inner) =
            interceptor.map(|interceptor| (generation, interceptor));
    }

    fn redirect_output(&self, streams: Option<(Box<dyn Write + Send>, Box<dyn Write + Send>)>) {
        *lock(&self.output) = streams;
    }

    fn write_stdout(&self, text: &str) {
        self.write_output(OutputStream::Stdout, text);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};

    use indoc::indoc;
    use pyhook_debugger::{ProgramExit, Runtime};

    use super::SimRuntime;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn run(source: &str) -> (ProgramExit, String, String) {
        let runtime = SimRuntime::from_source(Path::new("/tmp/prog.py"), source, &[]).unwrap();

        let stdout = Capture::default();
        let stderr = Capture::default();
        runtime.redirect_output(Some((Box::new(stdout.clone()), Box::new(stderr.clone()))));

        let exit = runtime.run_main();
        (exit, stdout.text(), stderr.text())
    }

    #[test]
    fn prints_output() {
        let (exit, stdout, _) = run(indoc! {"
            def add(a, b):
                return a + b

            x = add(1, 2)
            print('x =', x)
        "});

        assert!(matches!(exit, ProgramExit::Completed));
        assert_eq!(stdout, "x = 3\n");
    }

    #[test]
    fn system_exit_codes() {
        let (exit, _, _) = run("import sys\nsys.exit(3)\n");
        assert!(matches!(exit, ProgramExit::Exit(3)));

        let (exit, _, _) = run("import sys\nsys.exit()\n");
        assert!(matches!(exit, ProgramExit::Exit(0)));

        let (exit, _, stderr) = run("import sys\nsys.exit('bye')\n");
        assert!(matches!(exit, ProgramExit::Exit(1)));
        assert_eq!(stderr, "bye\n");
    }

    #[test]
    fn uncaught_exception() {
        let (exit, _, _) = run(indoc! {"
            def f():
                raise ValueError('boom')

            f()
        "});

        let ProgramExit::Exception(info) = exit else {
            panic!("expected an exception");
        };

        assert_eq!(info.qualified_name, "builtins.ValueError");
        assert_eq!(
            info.format(),
            indoc! {r#"
                Traceback (most recent call last):
                  File "/tmp/prog.py", line 4, in <module>
                  File "/tmp/prog.py", line 2, in f
                ValueError: boom
            "#}
        );
    }

    #[test]
    fn missing_module() {
        let (exit, _, _) = run("import nowhere_to_be_found\n");

        let ProgramExit::Exception(info) = exit else {
            panic!("expected an exception");
        };

        assert_eq!(info.qualified_name, "builtins.ImportError");
    }

    #[test]
    fn threads_run_to_completion() {
        let (exit, stdout, _) = run(indoc! {"
            def work(n):
                print('work', n)

            t = spawn(work, 7)
            join(t)
            print('done')
        "});

        assert!(matches!(exit, ProgramExit::Completed));
        assert_eq!(stdout, "work 7\ndone\n");
    }
}
