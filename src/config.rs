//! The configuration file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Context, Error};
use crate::keygen::KeyParams;
use crate::keys::{Algorithm, DigestType};
use crate::name::OwnerName;
use crate::parse::parse_salt;
use crate::signer::nsec3::Nsec3Params;
use crate::util::{self, OWNER_ONLY};

const DAY: u64 = 86400;

//------------ Config --------------------------------------------------------

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Config {
    /// Directory holding the key store.
    pub key_dir: PathBuf,

    /// Directory receiving signed zones, DS material and state.
    pub output_dir: PathBuf,

    /// Algorithms every zone is signed with.
    #[serde(default = "default_algorithms")]
    pub algorithms: Vec<Algorithm>,

    #[serde(default = "default_ksk_bits")]
    pub ksk_bits: u32,

    #[serde(default = "default_zsk_bits")]
    pub zsk_bits: u32,

    /// Validity of new signatures.
    #[serde(default = "default_signature_lifetime", with = "duration_text")]
    pub signature_lifetime: Duration,

    /// How far inception is backdated.
    #[serde(default = "default_inception_offset", with = "duration_text")]
    pub inception_offset: Duration,

    /// Zones whose signatures expire within this margin are re-signed.
    #[serde(default = "default_remain_time", with = "duration_text")]
    pub remain_time: Duration,

    #[serde(default)]
    pub nsec3_iterations: u16,

    /// Hex salt, `-` for none.
    #[serde(default = "default_salt")]
    pub nsec3_salt: String,

    /// Digest types of the DS records offered for the registrar.
    #[serde(default = "default_ds_digests")]
    pub ds_digests: Vec<DigestType>,

    /// Command run after a cycle published at least one zone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reload_command: Option<Vec<String>>,

    #[serde(default)]
    pub zones: Vec<ZoneConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct ZoneConfig {
    pub name: OwnerName,
    pub path: PathBuf,
}

fn default_algorithms() -> Vec<Algorithm> {
    Algorithm::DEFAULT.to_vec()
}

fn default_ksk_bits() -> u32 {
    KeyParams::default().ksk_bits
}

fn default_zsk_bits() -> u32 {
    KeyParams::default().zsk_bits
}

fn default_signature_lifetime() -> Duration {
    Duration::from_secs(30 * DAY)
}

fn default_inception_offset() -> Duration {
    Duration::from_secs(3600)
}

fn default_remain_time() -> Duration {
    Duration::from_secs(3 * DAY)
}

fn default_salt() -> String {
    "-".into()
}

fn default_ds_digests() -> Vec<DigestType> {
    vec![DigestType::Sha256]
}

impl Config {
    /// A configuration with default settings.
    pub fn new(key_dir: PathBuf, output_dir: PathBuf) -> Self {
        Config {
            key_dir,
            output_dir,
            algorithms: default_algorithms(),
            ksk_bits: default_ksk_bits(),
            zsk_bits: default_zsk_bits(),
            signature_lifetime: default_signature_lifetime(),
            inception_offset: default_inception_offset(),
            remain_time: default_remain_time(),
            nsec3_iterations: 0,
            nsec3_salt: default_salt(),
            ds_digests: default_ds_digests(),
            reload_command: None,
            zones: Vec::new(),
        }
    }

    /// Load and validate a configuration file.
    ///
    /// Relative paths in the file are taken relative to the file's
    /// directory.
    pub fn load(path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)
            .map_err(|e| format!("unable to read {}: {e}", path.display()))?;
        let mut config: Config = serde_json::from_slice(&data)
            .map_err(Error::from)
            .with_context(|| format!("parsing {}", path.display()))?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config
            .validate()
            .with_context(|| format!("checking {}", path.display()))?;
        Ok(config)
    }

    /// Write the configuration to a file that must not exist yet.
    pub fn save_new(&self, path: &Path) -> Result<(), Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        util::write_new_atomic(path, json.as_bytes(), OWNER_ONLY)
            .with_context(|| format!("writing {}", path.display()))
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        resolve(&mut self.key_dir);
        resolve(&mut self.output_dir);
        for zone in &mut self.zones {
            resolve(&mut zone.path);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.algorithms.is_empty() {
            return Err("at least one algorithm must be configured".into());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.algorithms.iter().find(|alg| !seen.insert(**alg)) {
            return Err(format!("algorithm {dup} is listed twice").into());
        }
        if self.algorithms.iter().any(|alg| alg.is_rsa()) {
            self.key_params().validate()?;
        }
        if self.ds_digests.is_empty() {
            return Err("at least one DS digest type must be configured".into());
        }
        if self.signature_lifetime.is_zero() {
            return Err("signature lifetime must not be zero".into());
        }
        if u32::try_from(self.signature_lifetime.as_secs()).is_err() {
            return Err("signature lifetime is too long".into());
        }
        if self.remain_time >= self.signature_lifetime {
            return Err("remain time must be shorter than the signature lifetime".into());
        }
        self.nsec3_params()?;
        if let Some(cmd) = &self.reload_command {
            if cmd.is_empty() {
                return Err("reload command must not be empty".into());
            }
        }
        let mut names = HashSet::new();
        for zone in &self.zones {
            if zone.name == OwnerName::root() {
                return Err("the root zone cannot be configured".into());
            }
            if !names.insert(&zone.name) {
                return Err(format!("zone {} is listed twice", zone.name).into());
            }
        }
        Ok(())
    }

    pub fn key_params(&self) -> KeyParams {
        KeyParams {
            ksk_bits: self.ksk_bits,
            zsk_bits: self.zsk_bits,
        }
    }

    pub fn nsec3_params(&self) -> Result<Nsec3Params, Error> {
        Nsec3Params::new(self.nsec3_iterations, parse_salt(&self.nsec3_salt)?)
    }

    pub fn zone(&self, name: &OwnerName) -> Option<&ZoneConfig> {
        self.zones.iter().find(|zone| zone.name == *name)
    }
}

/// Durations as friendly strings, `"30d"` and the like.
mod duration_text {
    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    use crate::parse::{format_duration, parse_duration};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::time::Duration;

    use crate::keys::{Algorithm, DigestType};

    use super::{Config, ZoneConfig, DAY};

    fn config() -> Config {
        Config::new("keys".into(), "out".into())
    }

    #[test]
    fn minimal_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnskeeper.json");
        std::fs::write(
            &path,
            r#"{
                "key_dir": "keys",
                "output_dir": "/var/lib/dnskeeper",
                "zones": [{ "name": "Example.TEST", "path": "example.test.zone" }]
            }"#,
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.key_dir, dir.path().join("keys"));
        assert_eq!(config.output_dir, PathBuf::from("/var/lib/dnskeeper"));
        assert_eq!(
            config.algorithms,
            [Algorithm::RsaSha1Nsec3Sha1, Algorithm::RsaSha256]
        );
        assert_eq!(config.signature_lifetime, Duration::from_secs(30 * DAY));
        assert_eq!(config.remain_time, Duration::from_secs(3 * DAY));
        assert_eq!(config.inception_offset, Duration::from_secs(3600));
        assert_eq!(config.ds_digests, [DigestType::Sha256]);
        assert_eq!(config.zones[0].name.to_string(), "example.test.");
        assert_eq!(config.zones[0].path, dir.path().join("example.test.zone"));
        assert!(config.nsec3_params().unwrap().salt.is_empty());
    }

    #[test]
    fn saved_files_read_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dnskeeper.json");
        let mut config = Config::new(dir.path().join("keys"), dir.path().join("out"));
        config.algorithms = vec![Algorithm::Ed25519];
        config.reload_command = Some(vec!["rndc".into(), "reload".into()]);
        config.save_new(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"signature_lifetime\": \"30d\""));
        assert!(text.contains("\"ED25519\""));
        assert_eq!(Config::load(&path).unwrap(), config);
        assert!(config.save_new(&path).is_err());
    }

    #[test]
    fn validation() {
        assert!(config().validate().is_ok());

        let mut c = config();
        c.algorithms.clear();
        assert!(c.validate().is_err());

        let mut c = config();
        c.algorithms.push(Algorithm::RsaSha256);
        assert!(c.validate().is_err());

        let mut c = config();
        c.ksk_bits = 1024;
        assert!(c.validate().is_err());
        // Key lengths only matter for RSA.
        c.algorithms = vec![Algorithm::Ed25519];
        assert!(c.validate().is_ok());

        let mut c = config();
        c.remain_time = c.signature_lifetime;
        assert!(c.validate().is_err());

        let mut c = config();
        c.nsec3_salt = "xyz".into();
        assert!(c.validate().is_err());

        let mut c = config();
        let zone = ZoneConfig {
            name: "example.test".parse().unwrap(),
            path: "a".into(),
        };
        c.zones = vec![zone.clone(), zone];
        assert!(c.validate().is_err());
    }

    #[test]
    fn bad_durations_are_rejected() {
        let err = serde_json::from_str::<Config>(
            r#"{ "key_dir": "k", "output_dir": "o", "remain_time": "shortly" }"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("shortly"));
    }
}
