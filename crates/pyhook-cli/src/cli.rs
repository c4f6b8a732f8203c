use std::path::PathBuf;

/// The pyhook debugger.
#[derive(clap::Parser)]
pub struct CliOpts {
    /// The command to run.
    #[clap(subcommand)]
    pub action: CliAction,
}

/// The command to run.
#[derive(clap::Subcommand)]
pub enum CliAction {
    /// Command to run a script under the debugger, connected to a controller
    /// from the start.
    Launch {
        /// Debugger configuration (KDL format).
        ///
        /// If it ends with `.kdl`, it is treated as a path to a configuration
        /// file. Otherwise it is directly parsed as inline KDL-formatted
        /// configuration.
        #[clap(short, long, value_name = "CONTENT/PATH", default_value = "")]
        config: String,

        /// Launch options.
        #[clap(flatten)]
        launch: CliLaunch,

        /// Path of the script to run.
        script: PathBuf,

        /// Script's arguments.
        args: Vec<String>,
    },

    /// Command to run a script, and attach the debugger to it once started.
    AttachRun {
        /// Debugger configuration (KDL format).
        ///
        /// Same as for the `launch` command.
        #[clap(short, long, value_name = "CONTENT/PATH", default_value = "")]
        config: String,

        /// Attach options.
        #[clap(flatten)]
        attach: CliAttach,

        /// Path of the script to run.
        script: PathBuf,

        /// Script's arguments.
        args: Vec<String>,
    },

    /// Command to run a script without debugger.
    Run {
        /// Path of the script to run.
        script: PathBuf,

        /// Script's arguments.
        args: Vec<String>,
    },
}

/// Options of the `launch` command.
#[derive(clap::Parser)]
pub struct CliLaunch {
    /// Port of the controller, listening on the loopback interface.
    #[clap(short, long)]
    pub port: u16,

    /// Debug session identifier sent to the controller.
    #[clap(long, value_name = "ID")]
    pub debug_id: String,

    /// Wait for a key press when the script fails.
    #[clap(long)]
    pub wait_on_exception: bool,

    /// Wait for a key press when the script completes.
    #[clap(long)]
    pub wait_on_exit: bool,

    /// Forward the script output to the controller.
    #[clap(long)]
    pub redirect_output: bool,
}

/// Options of the `attach-run` command.
#[derive(clap::Parser)]
pub struct CliAttach {
    /// Port of the controller, listening on the loopback interface.
    #[clap(short, long)]
    pub port: u16,

    /// Debug session identifier sent to the controller.
    #[clap(long, value_name = "ID")]
    pub debug_id: String,

    /// Delay before attaching, in milliseconds.
    #[clap(long, value_name = "MS", default_value_t = 0)]
    pub delay_ms: u64,
}

impl CliOpts {
    /// Parses the CLI from the command-line.
    ///
    /// # Warning
    ///
    /// Exits on error.
    pub fn parse_from_cmdline() -> Self {
        <Self as clap::Parser>::parse()
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::{CliAction, CliOpts};

    #[test]
    fn parse_launch() {
        let cli = CliOpts::try_parse_from([
            "pyhook",
            "launch",
            "--port",
            "5678",
            "--debug-id",
            "abc",
            "--redirect-output",
            "prog.py",
            "x",
            "y",
        ])
        .expect("parse");

        let CliAction::Launch {
            config,
            launch,
            script,
            args,
        } = cli.action
        else {
            panic!("not a launch command");
        };

        assert_eq!(config, "");
        assert_eq!(launch.port, 5678);
        assert_eq!(launch.debug_id, "abc");
        assert!(launch.redirect_output);
        assert!(!launch.wait_on_exit);
        assert_eq!(script.to_str(), Some("prog.py"));
        assert_eq!(args, ["x", "y"]);
    }

    #[test]
    fn parse_attach_run() {
        let cli = CliOpts::try_parse_from([
            "pyhook",
            "attach-run",
            "-p",
            "1",
            "--debug-id",
            "abc",
            "--delay-ms",
            "200",
            "prog.py",
        ])
        .expect("parse");

        let CliAction::AttachRun { attach, .. } = cli.action else {
            panic!("not an attach-run command");
        };

        assert_eq!(attach.port, 1);
        assert_eq!(attach.delay_ms, 200);
    }
}
