use std::path::Path;

use crate::env::Env;
use crate::error::Error;
use crate::name::OwnerName;

use super::{file_scheduler, load_config, print_report};

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Sign {
    /// The zone to sign
    #[arg(value_name = "ZONE")]
    zone: OwnerName,
}

impl Sign {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let config = load_config(path)?;
        let scheduler = file_scheduler(&config)?;
        let report = scheduler.sign_zone(&self.zone, env.seconds_since_epoch())?;
        print_report(&env, &report)
    }
}
