use std::path::PathBuf;

use crate::commands::Command;
use crate::env::Env;
use crate::error::Error;
use crate::log::LogLevel;

/// Where the configuration is read from unless `-c` says otherwise.
pub const DEFAULT_CONFIG: &str = "/etc/dnskeeper/dnskeeper.json";

/// Keep DNSSEC keys and signed zones of a mail server up to date
#[derive(Clone, Debug, clap::Parser)]
#[command(version, disable_help_subcommand = true)]
pub struct Args {
    /// The configuration file
    #[arg(
        short = 'c',
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG,
        global = true
    )]
    pub config: PathBuf,

    /// The minimum level of log messages, RUST_LOG overrides this
    #[arg(
        long = "log-level",
        value_name = "LEVEL",
        value_enum,
        default_value_t = LogLevel::Info,
        global = true
    )]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

impl Args {
    pub fn execute(self, env: impl Env) -> Result<(), Error> {
        let config = env.in_cwd(&self.config).into_owned();
        self.command.execute(&config, env)
    }
}
