use std::path::Path;

use domain::utils::{base16, base64};

use crate::env::Env;
use crate::error::{Error, ErrorKind};
use crate::keystore::KeyStore;
use crate::name::OwnerName;
use crate::publish::ds_text;
use crate::signer::ActiveKeys;

use super::load_config;

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Ds {
    /// Only show these zones [default: all configured zones]
    #[arg(value_name = "ZONE")]
    zones: Vec<OwnerName>,
}

impl Ds {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let config = load_config(path)?;
        let store = KeyStore::open(&config.key_dir)?;

        let mut keys = ActiveKeys::new();
        for &algorithm in &config.algorithms {
            let pair = store.get_active_key_pair(algorithm)?.ok_or_else(|| {
                Error::with_kind(
                    ErrorKind::MissingKeys,
                    &format!("no {algorithm} key pair yet, run the keygen command first"),
                )
            })?;
            keys.insert(algorithm, pair);
        }

        let zones: Vec<&OwnerName> = if self.zones.is_empty() {
            config.zones.iter().map(|zone| &zone.name).collect()
        } else {
            for zone in &self.zones {
                if config.zone(zone).is_none() {
                    return Err(format!("zone {zone} is not configured").into());
                }
            }
            self.zones.iter().collect()
        };

        let mut out = env.stdout();
        for zone in zones {
            writeln!(out, "{zone}");
            for pair in keys.values() {
                let ksk = pair.ksk();
                writeln!(out, "  Algorithm:   {} ({})", ksk.algorithm(), ksk.algorithm().number());
                writeln!(out, "  Key tag:     {}", ksk.key_tag());
                writeln!(out, "  Flags:       {}", ksk.flags());
                writeln!(out, "  Public key:  {}", base64::encode_string(ksk.public_key()));
                for &digest_type in &config.ds_digests {
                    let ds = ksk.ds(zone, digest_type);
                    writeln!(
                        out,
                        "  Digest:      {} ({}) {}",
                        digest_type,
                        digest_type.number(),
                        base16::encode_string(&ds.digest)
                    );
                }
                writeln!(out);
            }
            write!(out, "{}", ds_text(zone, &keys, &config.ds_digests));
            writeln!(out);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::setup;

    #[test]
    fn needs_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = setup(dir.path());
        let res = cmd.args(["ds"]).run();
        assert_eq!(res.exit_code, 1);
        assert!(res.stderr.contains("run the keygen command first"));
    }

    #[test]
    fn prints_registrar_material() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = setup(dir.path());
        assert_eq!(cmd.args(["keygen"]).run().exit_code, 0);

        let res = cmd.args(["ds"]).run();
        assert_eq!(res.exit_code, 0, "{}", res.stderr);
        assert!(res.stdout.starts_with("example.test.\n  Algorithm:   ED25519 (15)\n"));
        assert!(res.stdout.contains("  Flags:       257\n"));
        let re = regex::Regex::new(r"\nexample\.test\.\tIN\tDS\t\d+ 15 2 [0-9A-F]{64}\n").unwrap();
        assert!(re.is_match(&res.stdout), "{}", res.stdout);

        let res = cmd.args(["ds", "other.test"]).run();
        assert_eq!(res.exit_code, 1);
    }
}
