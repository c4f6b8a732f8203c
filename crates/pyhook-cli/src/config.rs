use std::path::PathBuf;
use std::time::Duration;

use pyhook_debugger::DebuggerConfig;

/// Configuration of the debugger.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct DebugConfig {
    /// Number of connection attempts made to reach the controller.
    #[knus(child, default = 50, unwrap(argument))]
    pub connect_attempts: u32,

    /// Delay between two connection attempts, in milliseconds.
    #[knus(child, default = 50, unwrap(argument))]
    pub connect_interval_ms: u64,

    /// Directory of the library code, never stepped into.
    #[knus(child, unwrap(argument))]
    pub library_prefix: Option<String>,

    /// Source files never debugged.
    #[knus(children(name = "skip-file"))]
    pub skip_files: Vec<SkipFile>,
}

/// Source file never debugged.
#[derive(Debug, PartialEq, knus::Decode)]
pub struct SkipFile {
    /// Path of the file.
    #[knus(argument)]
    pub path: String,
}

impl From<DebugConfig> for DebuggerConfig {
    fn from(config: DebugConfig) -> Self {
        Self {
            connect_attempts: config.connect_attempts,
            connect_interval: Duration::from_millis(config.connect_interval_ms),
            library_prefix: config.library_prefix.map(PathBuf::from),
            skip_files: config
                .skip_files
                .into_iter()
                .map(|file| PathBuf::from(file.path))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use pyhook_debugger::DebuggerConfig;

    use super::{DebugConfig, SkipFile};

    #[test]
    fn parse_from_kdl_defaults() {
        let config = knus::parse::<DebugConfig>("<content>", "")
            .map_err(miette::Report::new)
            .expect("parse kdl");

        assert_eq!(
            config,
            DebugConfig {
                connect_attempts: 50,
                connect_interval_ms: 50,
                library_prefix: None,
                skip_files: vec![],
            }
        );

        assert_eq!(DebuggerConfig::from(config), DebuggerConfig::default());
    }

    #[test]
    fn parse_from_kdl_full() {
        let config = knus::parse::<DebugConfig>(
            "<content>",
            indoc::indoc! {r#"
                connect-attempts 3
                connect-interval-ms 10
                library-prefix "/usr/lib/pyhook"
                skip-file "/opt/app/vendor.py"
                skip-file "/opt/app/shim.py"
            "#},
        )
        .map_err(miette::Report::new)
        .expect("parse kdl");

        assert_eq!(
            config,
            DebugConfig {
                connect_attempts: 3,
                connect_interval_ms: 10,
                library_prefix: Some("/usr/lib/pyhook".to_owned()),
                skip_files: vec![
                    SkipFile {
                        path: "/opt/app/vendor.py".to_owned(),
                    },
                    SkipFile {
                        path: "/opt/app/shim.py".to_owned(),
                    },
                ],
            }
        );

        let config = DebuggerConfig::from(config);

        assert_eq!(config.connect_interval, Duration::from_millis(10));
        assert_eq!(config.library_prefix, Some(PathBuf::from("/usr/lib/pyhook")));
        assert_eq!(config.skip_files.len(), 2);
    }
}
