use std::path::Path;
use std::sync::Arc;

use crate::env::{Env, RED};
use crate::error::Error;
use crate::keygen::KeyGenerator;
use crate::keystore::KeyStore;

use super::load_config;

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Keygen {}

impl Keygen {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let config = load_config(path)?;
        let store = Arc::new(KeyStore::open(&config.key_dir)?);
        let keygen = KeyGenerator::new(store, config.key_params());

        let mut out = env.stdout();
        let mut failed = 0;
        for (algorithm, res) in keygen.ensure_all(&config.algorithms) {
            match res {
                Ok(pair) => writeln!(
                    out,
                    "{algorithm}: KSK {} (tag {}), ZSK {} (tag {})",
                    pair.ksk().identifier(),
                    pair.ksk().key_tag(),
                    pair.zsk().identifier(),
                    pair.zsk().key_tag()
                ),
                Err(err) => {
                    failed += 1;
                    let marker = out.colourize(RED, "failed");
                    writeln!(out, "{algorithm}: {marker}: {err} [{}]", err.kind());
                }
            }
        }
        if failed > 0 {
            return Err(format!("no key pair for {failed} algorithm(s)").into());
        }
        Ok(())
    }
}
