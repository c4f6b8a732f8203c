// Once clippy takes `clippy.toml` into account (for `tests` targets),
// we can remove these.
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(clippy::print_stdout)]
#![allow(clippy::unwrap_used)]
#![allow(missing_docs)]

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use indoc::indoc;
use pyhook_debugger::hook::{self, TraceEvent, TraceHook};
use pyhook_debugger::runtime::FrameRef;
use pyhook_debugger::{ProgramExit, Runtime};
use pyhook_sim::SimRuntime;

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

fn run_program(runtime: &Arc<SimRuntime>) -> (ProgramExit, String) {
    let stdout = Capture::default();
    runtime.redirect_output(Some((Box::new(stdout.clone()), Box::new(Capture::default()))));

    let exit = runtime.run_main();
    (exit, stdout.text())
}

fn run_source(source: &str) -> (ProgramExit, String) {
    let runtime = SimRuntime::from_source(Path::new("/tmp/prog.py"), source, &[]).unwrap();
    run_program(&runtime)
}

fn assert_completed(exit: &ProgramExit) {
    match exit {
        ProgramExit::Completed => (),
        ProgramExit::Exit(code) => panic!("program exited with {code}"),
        ProgramExit::Exception(info) => panic!("program failed:\n{}", info.format()),
    }
}

#[test_log::test]
fn classes_and_methods() {
    let (exit, stdout) = run_source(indoc! {"
        class Shape:
            sides = 0

            def __init__(self, name):
                self.name = name

            def describe(self):
                return self.name + ' has ' + str(self.sides) + ' sides'

        class Square(Shape):
            sides = 4

            def __repr__(self):
                return 'Square(' + repr(self.name) + ')'

        s = Square('sq')
        print(s.describe())
        print(repr(s))
        print(isinstance(s, Shape), isinstance(s, (int, Square)), isinstance(1, str))
        print(Square.__name__, s.__class__.__name__)
    "});

    assert_completed(&exit);
    assert_eq!(
        stdout,
        indoc! {"
            sq has 4 sides
            Square('sq')
            True True False
            Square Square
        "}
    );
}

#[test_log::test]
fn control_flow() {
    let (exit, stdout) = run_source(indoc! {"
        total = 0
        for i in range(10):
            if i % 2 == 0:
                continue
            elif i > 7:
                break
            total += i

        n = 3
        while n:
            n -= 1

        pairs = {'a': 1, 'b': 2}
        keys = []
        for k, v in pairs.items():
            keys.append(k + str(v))

        print(total, n, ', '.join(keys), len(pairs), 2 ** 10, -7 // 2, 1 < 2 < 3)
    "});

    assert_completed(&exit);
    assert_eq!(stdout, "16 0 a1, b2 2 1024 -4 True\n");
}

#[test_log::test]
fn exceptions_are_caught() {
    let (exit, stdout) = run_source(indoc! {"
        class AppError(ValueError):
            pass

        def fail(kind):
            if kind == 1:
                raise AppError('custom')
            d = {}
            return d['missing']

        for kind in [1, 2]:
            try:
                try:
                    fail(kind)
                except AppError as e:
                    print('inner', e)
                    raise
                finally:
                    print('finally', kind)
            except (KeyError, ValueError) as e:
                print('outer', repr(e))
    "});

    assert_completed(&exit);
    assert_eq!(
        stdout,
        indoc! {"
            inner custom
            finally 1
            outer AppError('custom')
            finally 2
            outer KeyError('missing')
        "}
    );
}

#[test_log::test]
fn globals_are_shared() {
    let (exit, stdout) = run_source(indoc! {"
        counter = 0

        def bump():
            global counter
            counter = counter + 1
            local = 5

        bump()
        bump()
        print(counter)
    "});

    assert_completed(&exit);
    assert_eq!(stdout, "2\n");
}

#[test_log::test]
fn imports_run_once() {
    let dir = tempfile::tempdir().unwrap();

    std::fs::write(
        dir.path().join("helper.py"),
        indoc! {"
            print('loading', __name__)

            def twice(x):
                return x * 2
        "},
    )
    .unwrap();

    let script = dir.path().join("main.py");

    std::fs::write(
        &script,
        indoc! {"
            import helper
            import helper
            import sys
            print(helper.twice(21), len(sys.argv), sys.argv[1])
        "},
    )
    .unwrap();

    let runtime = SimRuntime::load(&script, &["arg".to_owned()]).unwrap();
    let (exit, stdout) = run_program(&runtime);

    assert_completed(&exit);
    assert_eq!(stdout, "loading helper\n42 2 arg\n");
}

#[test_log::test]
fn syntax_errors_are_reported() {
    let err = SimRuntime::from_source(Path::new("/tmp/prog.py"), "x = (1,\n", &[])
        .err()
        .unwrap();

    assert!(matches!(err, pyhook_sim::Error::Syntax { .. }));
    assert!(err.to_string().starts_with("/tmp/prog.py:"));
}

/// Trace hook recording every event it receives.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<String>>,
    evaluations: Mutex<Vec<String>>,
    jump: Option<(i32, i32)>,
}

impl TraceHook for Recorder {
    fn trace(self: Arc<Self>, frame: &FrameRef, event: &TraceEvent<'_>) -> Option<Arc<dyn TraceHook>> {
        let code = frame.code();

        let mut record = format!("{} {} {}", event.name(), code.name, frame.line());

        if let TraceEvent::Exception(info) = event {
            record.push_str(&format!(" {} {}", info.qualified_name, info.traceback.len()));
        }

        self.events.lock().unwrap().push(record);

        if let TraceEvent::Line = event {
            if code.name == "f" && frame.line() == 3 {
                let value = frame.execute("y * 10").unwrap().repr().unwrap();
                self.evaluations.lock().unwrap().push(value);
            }

            if let Some((from, to)) = self.jump {
                if frame.line() == from {
                    frame.set_line(to).unwrap();
                }
            }
        }

        Some(self)
    }
}

fn trace_source(recorder: Recorder, source: &str) -> (Arc<Recorder>, ProgramExit, String) {
    let recorder = Arc::new(recorder);
    hook::settrace(Some(recorder.clone()));

    let (exit, stdout) = run_source(source);

    hook::settrace(None);
    (recorder, exit, stdout)
}

#[test_log::test]
fn trace_calls_and_lines() {
    let (recorder, exit, _) = trace_source(
        Recorder::default(),
        indoc! {"
            def f(x):
                y = x + 1
                return y

            a = f(1)
        "},
    );

    assert_completed(&exit);
    assert_eq!(
        *recorder.events.lock().unwrap(),
        [
            "call <module> 1",
            "line <module> 1",
            "line <module> 5",
            "call f 1",
            "line f 2",
            "line f 3",
            "return f 3",
            "return <module> 5",
        ]
    );
    assert_eq!(*recorder.evaluations.lock().unwrap(), ["20"]);
}

#[test_log::test]
fn trace_exceptions() {
    let (recorder, exit, _) = trace_source(
        Recorder::default(),
        indoc! {"
            def f():
                raise KeyError('k')

            try:
                f()
            except KeyError:
                pass
        "},
    );

    assert_completed(&exit);
    assert_eq!(
        *recorder.events.lock().unwrap(),
        [
            "call <module> 1",
            "line <module> 1",
            "line <module> 4",
            "line <module> 5",
            "call f 1",
            "line f 2",
            "exception f 2 builtins.KeyError 1",
            "return f 2",
            "exception <module> 5 builtins.KeyError 2",
            "line <module> 6",
            "line <module> 7",
            "return <module> 7",
        ]
    );
}

#[test_log::test]
fn line_events_allow_jumps() {
    let recorder = Recorder {
        jump: Some((2, 4)),
        ..Recorder::default()
    };

    let (_, exit, stdout) = trace_source(
        recorder,
        indoc! {"
            x = 1
            x = 2
            x = 3
            print(x)
        "},
    );

    assert_completed(&exit);
    assert_eq!(stdout, "1\n");
}
