//! The commands of _dnskeeper_.
pub mod create;
pub mod daemon;
pub mod ds;
pub mod keygen;
pub mod renew;
pub mod sign;
pub mod status;

use std::path::Path;

use crate::config::Config;
use crate::env::Env;
use crate::error::{Context, Error};
use crate::publish::FilePublisher;
use crate::scheduler::{CycleReport, RenewalScheduler, ZoneStatus};

use super::env::{GREEN, RED};

#[derive(Clone, Debug, clap::Subcommand)]
pub enum Command {
    /// Write a new configuration file
    ///
    /// An existing configuration is never overwritten.
    #[command(name = "create")]
    Create(self::create::Create),

    /// Make sure every configured algorithm has an active key pair
    ///
    /// Missing key pairs are generated. Existing ones are never replaced.
    /// The identifiers of the keys are printed.
    #[command(name = "keygen")]
    Keygen(self::keygen::Keygen),

    /// Run one renewal pass
    ///
    /// Key pairs are provisioned as needed, then every zone whose
    /// signatures are about to expire, whose content or keys changed, or
    /// that was never signed, is signed and published. This is what cron
    /// should run. The exit code is 1 if anything failed.
    #[command(name = "renew")]
    Renew(self::renew::Renew),

    /// Run renewal passes at an interval until interrupted
    #[command(name = "daemon")]
    Daemon(self::daemon::Daemon),

    /// Sign and publish a single zone now
    #[command(name = "sign")]
    Sign(self::sign::Sign),

    /// Print the DS records to submit to the registrar
    #[command(name = "ds")]
    Ds(self::ds::Ds),

    /// Show whether zones are fresh or due for signing
    #[command(name = "status")]
    Status(self::status::Status),
}

impl Command {
    pub fn execute(self, config: &Path, env: impl Env) -> Result<(), Error> {
        match self {
            Self::Create(create) => create.execute(config, env),
            Self::Keygen(keygen) => keygen.execute(config, env),
            Self::Renew(renew) => renew.execute(config, env),
            Self::Daemon(daemon) => daemon.execute(config, env),
            Self::Sign(sign) => sign.execute(config, env),
            Self::Ds(ds) => ds.execute(config, env),
            Self::Status(status) => status.execute(config, env),
        }
    }
}

//------------ Helpers -------------------------------------------------------

fn load_config(path: &Path) -> Result<Config, Error> {
    Config::load(path).context("loading the configuration")
}

fn file_scheduler(config: &Config) -> Result<RenewalScheduler<FilePublisher>, Error> {
    let publisher = FilePublisher::open(
        &config.output_dir,
        config.ds_digests.clone(),
        config.reload_command.clone(),
    )?;
    RenewalScheduler::new(config, publisher)
}

/// Render a point in time, seconds since the epoch.
fn format_time(secs: u32) -> String {
    match jiff::Timestamp::from_second(i64::from(secs)) {
        Ok(ts) => ts.strftime("%Y-%m-%d %H:%M:%S UTC").to_string(),
        Err(_) => secs.to_string(),
    }
}

/// Print a cycle report and turn failures into an error.
fn print_report(env: &impl Env, report: &CycleReport) -> Result<(), Error> {
    let mut out = env.stdout();
    for alg in &report.algorithms {
        match (&alg.ksk, &alg.zsk, &alg.error) {
            (Some(ksk), Some(zsk), _) => {
                writeln!(out, "{}: KSK {ksk}, ZSK {zsk}", alg.algorithm)
            }
            (_, _, Some(err)) => {
                let failed = out.colourize(RED, "failed");
                writeln!(out, "{}: {failed}: {}", alg.algorithm, err.message)
            }
            _ => {}
        }
    }
    for zone in &report.zones {
        match &zone.status {
            ZoneStatus::Fresh { not_after } => {
                writeln!(out, "{}: fresh until {}", zone.zone, format_time(*not_after))
            }
            ZoneStatus::Signed { reason, not_after } => {
                let signed = out.colourize(GREEN, "signed");
                writeln!(
                    out,
                    "{}: {signed} ({reason}), valid until {}",
                    zone.zone,
                    format_time(*not_after)
                )
            }
            ZoneStatus::Failed(err) => {
                let failed = out.colourize(RED, "failed");
                writeln!(out, "{}: {failed}: {}", zone.zone, err.message)
            }
        }
    }
    if let Some(err) = &report.publication {
        let failed = out.colourize(RED, "failed");
        writeln!(out, "publication {failed}: {}", err.message);
    }
    if report.is_success() {
        Ok(())
    } else {
        Err("the renewal pass had failures".into())
    }
}
