#![allow(missing_docs)]
#![allow(clippy::print_stderr)]

use pyhook_cli::{CliAction, CliOpts};

use tracing_subscriber::EnvFilter;

fn main() {
    let cli = CliOpts::parse_from_cmdline();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("PYHOOK_LOG")
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let res = match cli.action {
        CliAction::Launch {
            config,
            launch,
            script,
            args,
        } => pyhook_cli::evaluate_launch(config, launch, script, args),
        CliAction::AttachRun {
            config,
            attach,
            script,
            args,
        } => pyhook_cli::evaluate_attach_run(config, attach, script, args),
        CliAction::Run { script, args } => pyhook_cli::evaluate_run(script, args),
    };

    match res {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            eprintln!("{e:?}");
            std::process::exit(1);
        }
    }
}
