use std::path::Path;
use std::time::Duration;

use tracing::info;

use crate::env::Env;
use crate::error::Error;
use crate::parse::parse_duration;
use crate::scheduler::IntervalTrigger;

use super::{file_scheduler, load_config};

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Daemon {
    /// Time between two renewal passes
    #[arg(
        short = 'i',
        long = "interval",
        value_name = "DURATION",
        default_value = "1h",
        value_parser = parse_duration
    )]
    interval: Duration,
}

impl Daemon {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let config = load_config(path)?;
        let scheduler = file_scheduler(&config)?;
        let mut trigger = IntervalTrigger::new(self.interval)?;
        info!(
            "renewing {} zone(s) every {}",
            config.zones.len(),
            crate::parse::format_duration(self.interval)
        );
        if scheduler.run(&mut trigger, || env.seconds_since_epoch(), false) {
            Ok(())
        } else {
            Err("the last renewal pass had failures".into())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::commands::Command;
    use crate::env::fake::FakeCmd;

    #[test]
    fn parses_intervals() {
        let cmd = FakeCmd::new(["dnskeeper", "daemon"]);
        let Command::Daemon(daemon) = cmd.parse().unwrap().command else {
            panic!("Not a Daemon!");
        };
        assert_eq!(daemon.interval, Duration::from_secs(3600));

        let Command::Daemon(daemon) = cmd.args(["-i", "15m"]).parse().unwrap().command else {
            panic!("Not a Daemon!");
        };
        assert_eq!(daemon.interval, Duration::from_secs(900));
        cmd.args(["--interval", "often"]).parse().unwrap_err();
    }
}
