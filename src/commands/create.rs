use std::path::{Path, PathBuf};

use tracing::info;

use crate::config::{Config, ZoneConfig};
use crate::env::Env;
use crate::error::Error;
use crate::keys::Algorithm;
use crate::parse::ZoneArg;

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Create {
    /// Directory for the key store
    #[arg(long = "key-dir", value_name = "DIR")]
    key_dir: PathBuf,

    /// Directory for signed zones and DS records
    #[arg(long = "output-dir", value_name = "DIR")]
    output_dir: PathBuf,

    /// Algorithm to sign with, may be repeated [default: RSASHA1-NSEC3-SHA1 and RSASHA256]
    #[arg(short = 'a', long = "algorithm", value_name = "ALGORITHM")]
    algorithms: Vec<Algorithm>,

    /// A zone to sign, may be repeated
    #[arg(long = "zone", value_name = "NAME=PATH")]
    zones: Vec<ZoneArg>,
}

impl Create {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let mut config = Config::new(self.key_dir, self.output_dir);
        if !self.algorithms.is_empty() {
            config.algorithms = self.algorithms;
        }
        config.zones = self
            .zones
            .into_iter()
            .map(|zone| ZoneConfig {
                name: zone.name,
                path: zone.path,
            })
            .collect();
        config.validate()?;
        config.save_new(path)?;
        info!("wrote configuration to {}", path.display());
        writeln!(env.stdout(), "{}", path.display());
        Ok(())
    }
}
