use std::path::Path;

use crate::env::{Env, GREEN, YELLOW};
use crate::error::Error;
use crate::publish::FilePublisher;
use crate::scheduler::{Freshness, RenewalScheduler};

use super::{format_time, load_config};

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Status {}

impl Status {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let config = load_config(path)?;
        let publisher = FilePublisher::open(
            &config.output_dir,
            config.ds_digests.clone(),
            config.reload_command.clone(),
        )?;
        let scheduler = RenewalScheduler::new(&config, publisher)?;
        let now = env.seconds_since_epoch();

        let mut out = env.stdout();
        let mut failed = false;
        for (zone, res) in scheduler.status(now) {
            let status = match res {
                Ok(status) => status,
                Err(err) => {
                    failed = true;
                    writeln!(out, "{zone}: {err}");
                    continue;
                }
            };
            let state = match status.freshness {
                Freshness::Fresh => out.colourize(GREEN, "fresh").into_owned(),
                Freshness::Due(reason) => {
                    format!("{} ({reason})", out.colourize(YELLOW, "due"))
                }
            };
            match status.state {
                Some(published) => writeln!(
                    out,
                    "{zone}: {state}, valid until {}, {} left",
                    format_time(published.window.not_after),
                    format_remaining(published.window.remaining(now))
                ),
                None => writeln!(out, "{zone}: {state}"),
            }
        }
        if failed {
            return Err("the state of some zones is unknown".into());
        }
        Ok(())
    }
}

/// A remaining validity in days and hours.
fn format_remaining(secs: i64) -> String {
    if secs <= 0 {
        return "nothing".into();
    }
    let days = secs / 86400;
    let hours = secs % 86400 / 3600;
    match (days, hours) {
        (0, 0) => format!("{}m", secs / 60),
        (0, h) => format!("{h}h"),
        (d, 0) => format!("{d}d"),
        (d, h) => format!("{d}d {h}h"),
    }
}
