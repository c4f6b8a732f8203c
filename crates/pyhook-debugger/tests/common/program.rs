use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use pyhook_debugger::{Debugger, DebuggerConfig, LaunchOptions};
use pyhook_proto::{Event, Request};
use pyhook_sim::SimRuntime;

use super::controller::{self, Controller, DEBUG_ID};

const STACK_SIZE: usize = 16 * 1024 * 1024;

/// Program launched under the debugger, on its own thread.
pub struct Launched {
    pub controller: Controller,
    dir: tempfile::TempDir,
    handle: JoinHandle<i32>,
}

/// Launches `main.py` of the given files, and waits for it to block on
/// its first line.
pub fn launch(files: &[(&str, &str)]) -> Launched {
    let dir = tempfile::tempdir().expect("tempdir");

    for (name, source) in files {
        std::fs::write(dir.path().join(name), source).expect("write");
    }

    let (listener, port) = controller::listen();
    let runtime = SimRuntime::load(&dir.path().join("main.py"), &[]).expect("load");

    let handle = std::thread::Builder::new()
        .name("debuggee".into())
        .stack_size(STACK_SIZE)
        .spawn(move || {
            let debugger = Debugger::new(runtime.clone(), DebuggerConfig::default());

            let options = LaunchOptions {
                port,
                debug_id: DEBUG_ID.into(),
                wait_on_exception: false,
                redirect_output: true,
                wait_on_exit: false,
            };

            debugger
                .launch(&options, || runtime.run_main())
                .expect("launch")
        })
        .expect("spawn");

    let mut controller = Controller::accept(&listener);
    controller.wait_for(|e| matches!(e, Event::ProcessLoaded { .. }));

    Launched {
        controller,
        dir,
        handle,
    }
}

impl Launched {
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn filename(&self, name: &str) -> String {
        display(&self.path(name))
    }

    /// Waits for the program to exit and lets it terminate.
    pub fn finish(mut self) -> (i32, Controller) {
        let Event::ProcessExited { code } = self
            .controller
            .wait_for(|e| matches!(e, Event::ProcessExited { .. }))
        else {
            unreachable!()
        };

        self.controller.send(Request::Exit);

        let returned = self.handle.join().expect("debuggee panicked");
        assert_eq!(returned, code);

        (code, self.controller)
    }
}

fn display(path: &Path) -> String {
    path.to_str().expect("utf-8 path").to_owned()
}
