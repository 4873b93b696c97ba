//! Handing signed zones to the nameserver.
//!
//! The scheduler only talks to a [`Publisher`]. [`FilePublisher`] writes
//! everything to an output directory:
//!
//! - `<zone>.signed`, the signed zone file,
//! - `<zone>.ds`, DS and DNSKEY records for the registrar,
//! - `<zone>.state`, the [`PublishedState`] of the last publication,
//! - `status.json`, the report of the last cycle.
//!
//! The state file is written last. Until it is in place, the zone counts
//! as not published.
//!
//! A failed reload leaves a `.reload-pending` marker behind so that the
//! next cycle reloads even if it publishes nothing new.

use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Context, Error};
use crate::keys::DigestType;
use crate::name::OwnerName;
use crate::scheduler::CycleReport;
use crate::signer::{key_identifiers, ActiveKeys, SignedZone, ValidityWindow};
use crate::util::{self, PUBLIC_READ};

const OUTPUT_DIR: u32 = 0o755;

//------------ PublishedState ------------------------------------------------

/// What was published for a zone the last time.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct PublishedState {
    pub window: ValidityWindow,

    /// Digest of the unsigned input.
    pub input_digest: String,

    /// Identifiers of the keys in the published DNSKEY RRset.
    pub keys: Vec<String>,
}

//------------ Publisher -----------------------------------------------------

pub trait Publisher: Sync {
    /// The state of the last successful publication of `zone`.
    fn last_published(&self, zone: &OwnerName) -> Result<Option<PublishedState>, Error>;

    /// Durably publish a signed zone.
    ///
    /// On error, the previously published version stays in place.
    fn publish(
        &self,
        signed: &SignedZone,
        keys: &ActiveKeys,
        input_digest: &str,
    ) -> Result<PublishedState, Error>;

    /// Make the nameserver pick up what this cycle published.
    fn reload(&self, report: &CycleReport) -> Result<(), Error>;

    /// Called once per cycle, after all zones were processed and the
    /// nameserver was reloaded.
    fn cycle_complete(&self, report: &CycleReport) -> Result<(), Error>;
}

//------------ FilePublisher -------------------------------------------------

#[derive(Clone, Debug)]
pub struct FilePublisher {
    output_dir: PathBuf,
    ds_digests: Vec<DigestType>,
    reload_command: Option<Vec<String>>,
}

impl FilePublisher {
    pub fn open(
        output_dir: impl Into<PathBuf>,
        ds_digests: Vec<DigestType>,
        reload_command: Option<Vec<String>>,
    ) -> Result<Self, Error> {
        let output_dir = output_dir.into();
        util::create_dir(&output_dir, OUTPUT_DIR)?;
        Ok(FilePublisher {
            output_dir,
            ds_digests,
            reload_command,
        })
    }

    fn zone_path(&self, zone: &OwnerName, extension: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}.{extension}", zone.file_stem()))
    }

    pub fn signed_path(&self, zone: &OwnerName) -> PathBuf {
        self.zone_path(zone, "signed")
    }

    pub fn ds_path(&self, zone: &OwnerName) -> PathBuf {
        self.zone_path(zone, "ds")
    }

    pub fn state_path(&self, zone: &OwnerName) -> PathBuf {
        self.zone_path(zone, "state")
    }

    pub fn status_path(&self) -> PathBuf {
        self.output_dir.join("status.json")
    }

    fn pending_path(&self) -> PathBuf {
        self.output_dir.join(".reload-pending")
    }

    fn run_reload_command(&self, program: &str, args: &[String]) -> Result<(), Error> {
        info!("running reload command {program}");
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| format!("unable to run reload command {program}: {e}"))?;
        if !status.success() {
            return Err(format!("reload command {program} failed: {status}").into());
        }
        Ok(())
    }
}

impl Publisher for FilePublisher {
    fn last_published(&self, zone: &OwnerName) -> Result<Option<PublishedState>, Error> {
        let path = self.state_path(zone);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(Error::from(err).context(&format!("reading {}", path.display())))
            }
        };
        let state = serde_json::from_slice(&data)
            .map_err(Error::from)
            .with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(state))
    }

    fn publish(
        &self,
        signed: &SignedZone,
        keys: &ActiveKeys,
        input_digest: &str,
    ) -> Result<PublishedState, Error> {
        let apex = signed.apex();
        let state = PublishedState {
            window: signed.window(),
            input_digest: input_digest.into(),
            keys: key_identifiers(keys),
        };

        util::write_atomic(
            &self.signed_path(apex),
            signed.to_zonefile().as_bytes(),
            PUBLIC_READ,
        )?;
        util::write_atomic(
            &self.ds_path(apex),
            ds_text(apex, keys, &self.ds_digests).as_bytes(),
            PUBLIC_READ,
        )?;
        let json = serde_json::to_string_pretty(&state)?;
        util::write_atomic(&self.state_path(apex), json.as_bytes(), PUBLIC_READ)?;

        info!(
            "published {apex}, signatures valid until {}",
            signed.window().not_after
        );
        Ok(state)
    }

    fn reload(&self, report: &CycleReport) -> Result<(), Error> {
        let Some((program, args)) = self
            .reload_command
            .as_deref()
            .and_then(<[String]>::split_first)
        else {
            return Ok(());
        };
        let pending = self.pending_path();
        if report.published() == 0 && !pending.exists() {
            debug!("nothing published, not reloading");
            return Ok(());
        }
        if let Err(err) = self.run_reload_command(program, args) {
            util::write_atomic(&pending, b"", PUBLIC_READ)
                .context("recording the pending reload")?;
            return Err(err);
        }
        match fs::remove_file(&pending) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => {
                Err(Error::from(err).context(&format!("removing {}", pending.display())))
            }
            _ => Ok(()),
        }
    }

    fn cycle_complete(&self, report: &CycleReport) -> Result<(), Error> {
        let json = serde_json::to_string_pretty(report)?;
        util::write_atomic(&self.status_path(), json.as_bytes(), PUBLIC_READ)
            .context("writing status")
    }
}

//------------ DS material ---------------------------------------------------

/// The DS records and KSK DNSKEY records of a zone in zone file format.
///
/// This is what gets submitted to the registrar.
pub fn ds_text(apex: &OwnerName, keys: &ActiveKeys, digests: &[DigestType]) -> String {
    let mut res = String::new();
    for pair in keys.values() {
        let ksk = pair.ksk();
        let _ = writeln!(
            res,
            "; {} KSK {}, key tag {}",
            pair.algorithm(),
            ksk.identifier(),
            ksk.key_tag()
        );
        for &digest in digests {
            let _ = writeln!(res, "{apex}\tIN\tDS\t{}", ksk.ds(apex, digest));
        }
        let _ = writeln!(res, "{apex}\tIN\tDNSKEY\t{}", ksk.dnskey_text());
    }
    res
}

//------------ Tests ---------------------------------------------------------
