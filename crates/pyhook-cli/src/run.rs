use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use miette::IntoDiagnostic;
use pyhook_debugger::{Debugger, DebuggerConfig, LaunchOptions, ProgramExit, Runtime};
use pyhook_sim::SimRuntime;

use crate::{CliAttach, CliLaunch, DebugConfig};

/// Runs the subcommand for launching a script under the debugger.
pub fn evaluate_launch(
    config: String,
    launch: CliLaunch,
    script: PathBuf,
    args: Vec<String>,
) -> miette::Result<i32> {
    let config = parse_debug_config(config)?;
    let runtime = SimRuntime::load(&script, &args).into_diagnostic()?;

    let debugger = Debugger::new(runtime.clone(), config);

    let options = LaunchOptions {
        port: launch.port,
        debug_id: launch.debug_id,
        wait_on_exception: launch.wait_on_exception,
        redirect_output: launch.redirect_output,
        wait_on_exit: launch.wait_on_exit,
    };

    debugger
        .launch(&options, || runtime.run_main())
        .into_diagnostic()
}

/// Runs the subcommand for running a script and attaching the debugger to it.
pub fn evaluate_attach_run(
    config: String,
    attach: CliAttach,
    script: PathBuf,
    args: Vec<String>,
) -> miette::Result<i32> {
    let config = parse_debug_config(config)?;
    let runtime = SimRuntime::load(&script, &args).into_diagnostic()?;

    let debugger = Debugger::new(runtime.clone(), config);
    debugger.intercept_threads(true);

    let attacher = debugger.clone();

    std::thread::Builder::new()
        .name("pyhook-attach".to_owned())
        .spawn(move || {
            std::thread::sleep(Duration::from_millis(attach.delay_ms));

            if let Err(e) = attacher.attach(attach.port, &attach.debug_id, false) {
                tracing::error!(error = %e, "failed to attach");
            }
        })
        .into_diagnostic()?;

    let exit = runtime.run_main();
    debugger.exit_current_thread();

    let code = exit_code(&runtime, exit);
    debugger.report_process_exit(code);

    Ok(code)
}

/// Runs the subcommand for running a script without debugger.
pub fn evaluate_run(script: PathBuf, args: Vec<String>) -> miette::Result<i32> {
    let runtime = SimRuntime::load(&script, &args).into_diagnostic()?;
    let exit = runtime.run_main();

    Ok(exit_code(&runtime, exit))
}

fn exit_code(runtime: &Arc<SimRuntime>, exit: ProgramExit) -> i32 {
    match exit {
        ProgramExit::Completed => 0,
        ProgramExit::Exit(code) => code,
        ProgramExit::Exception(info) => {
            runtime.write_stdout(&info.format());
            1
        }
    }
}

fn parse_debug_config(config: String) -> miette::Result<DebuggerConfig> {
    let path = Path::new(&config);

    let config: DebugConfig = if let Some((filename, "kdl")) = path
        .file_name()
        .and_then(OsStr::to_str)
        .zip(path.extension().and_then(OsStr::to_str))
    {
        let content = std::fs::read_to_string(path).into_diagnostic()?;
        knus::parse(filename, &content)?
    } else {
        knus::parse("<content>", &config)?
    };

    Ok(config.into())
}
