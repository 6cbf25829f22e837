//! Command-line interface for the launcher.

use clap::{Arg, ArgAction, Command};
use std::path::PathBuf;

/// Which process this invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Gateway,
    Logic,
}

/// Parsed command-line arguments.
#[derive(Debug, Clone)]
pub struct CliArgs {
    pub role: Role,
    /// Path to the shared TOML configuration file.
    pub config_path: PathBuf,
    /// Optional override for the configured log level.
    pub log_level: Option<String>,
    /// Force JSON log output.
    pub json_logs: bool,
}

impl CliArgs {
    pub fn parse() -> Self {
        Self::from_matches(Self::command().get_matches())
    }

    fn command() -> Command {
        Command::new("meridian")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Persistent connection gateway and restartable logic process")
            .subcommand_required(true)
            .arg(
                Arg::new("config")
                    .short('c')
                    .long("config")
                    .value_name("FILE")
                    .help("Configuration file path")
                    .default_value("meridian.toml")
                    .global(true),
            )
            .arg(
                Arg::new("log-level")
                    .short('l')
                    .long("log-level")
                    .value_name("LEVEL")
                    .help("Log level (trace, debug, info, warn, error)")
                    .global(true),
            )
            .arg(
                Arg::new("json-logs")
                    .long("json-logs")
                    .help("Output logs in JSON format")
                    .action(ArgAction::SetTrue)
                    .global(true),
            )
            .subcommand(Command::new("gateway").about("Run the client-facing gateway process"))
            .subcommand(Command::new("logic").about("Run the restartable logic process"))
    }

    fn from_matches(matches: clap::ArgMatches) -> Self {
        let role = match matches.subcommand_name() {
            Some("gateway") => Role::Gateway,
            Some("logic") => Role::Logic,
            _ => unreachable!("subcommand is required"),
        };
        Self {
            role,
            config_path: PathBuf::from(
                matches
                    .get_one::<String>("config")
                    .expect("config has a default"),
            ),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subcommands_select_role() {
        let matches = CliArgs::command()
            .try_get_matches_from(["meridian", "gateway"])
            .unwrap();
        assert_eq!(CliArgs::from_matches(matches).role, Role::Gateway);

        let matches = CliArgs::command()
            .try_get_matches_from(["meridian", "logic", "-c", "custom.toml", "-l", "debug"])
            .unwrap();
        let args = CliArgs::from_matches(matches);
        assert_eq!(args.role, Role::Logic);
        assert_eq!(args.config_path, PathBuf::from("custom.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
    }

    #[test]
    fn test_subcommand_is_required() {
        assert!(CliArgs::command()
            .try_get_matches_from(["meridian"])
            .is_err());
    }
}
