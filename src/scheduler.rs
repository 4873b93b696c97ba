//! Periodic renewal of signed zones.
//!
//! Every pass first makes sure each configured algorithm has an active key
//! pair and then re-signs the zones that are due. Zones are independent of
//! each other: they share the key pairs read-only and each writes only its
//! own output, so they are processed in parallel.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use rayon::prelude::*;
use serde::Serialize;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info, warn, Dispatch};

use crate::config::{Config, ZoneConfig};
use crate::error::{Error, ErrorKind};
use crate::keygen::KeyGenerator;
use crate::keys::{Algorithm, SigningKeyPair};
use crate::keystore::KeyStore;
use crate::name::OwnerName;
use crate::publish::{PublishedState, Publisher};
use crate::signer::{key_identifiers, ActiveKeys, ValidityWindow, ZoneSigner};
use crate::zone::Zone;

//------------ Freshness -----------------------------------------------------

/// Whether a zone needs to be signed again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Due(DueReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DueReason {
    /// There is no record of a publication.
    NeverSigned,

    /// The signatures expire within the margin, or already have.
    Expiring,

    /// The unsigned zone data differs from what was signed.
    ContentChanged,

    /// The set of active keys differs from the published DNSKEY RRset.
    KeysChanged,

    /// Signing was requested explicitly.
    Forced,
}

impl fmt::Display for DueReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DueReason::NeverSigned => "never signed",
            DueReason::Expiring => "signatures expiring",
            DueReason::ContentChanged => "zone content changed",
            DueReason::KeysChanged => "active keys changed",
            DueReason::Forced => "forced",
        })
    }
}

/// Decide whether a zone is due for signing.
///
/// A zone is due once its signatures expire within `margin`, that is,
/// once `not_after - now <= margin`.
pub fn classify(
    state: Option<&PublishedState>,
    now: u32,
    margin: Duration,
    input_digest: &str,
    keys: &[String],
) -> Freshness {
    let Some(state) = state else {
        return Freshness::Due(DueReason::NeverSigned);
    };
    let margin = i64::try_from(margin.as_secs()).unwrap_or(i64::MAX);
    if state.window.remaining(now) <= margin {
        Freshness::Due(DueReason::Expiring)
    } else if state.input_digest != input_digest {
        Freshness::Due(DueReason::ContentChanged)
    } else if state.keys != keys {
        Freshness::Due(DueReason::KeysChanged)
    } else {
        Freshness::Fresh
    }
}

//------------ Reports -------------------------------------------------------

/// The outcome of one pass.
#[derive(Clone, Debug, Serialize)]
pub struct CycleReport {
    /// The time of the pass.
    pub started: u32,
    pub algorithms: Vec<AlgorithmReport>,
    pub zones: Vec<ZoneReport>,

    /// Why handing the result to the nameserver failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publication: Option<ErrorReport>,
}

impl CycleReport {
    pub fn new(started: u32) -> Self {
        CycleReport {
            started,
            algorithms: Vec::new(),
            zones: Vec::new(),
            publication: None,
        }
    }

    /// The number of zones published in this pass.
    pub fn published(&self) -> usize {
        self.zones
            .iter()
            .filter(|zone| matches!(zone.status, ZoneStatus::Signed { .. }))
            .count()
    }

    /// Whether every algorithm has keys, no zone failed and the
    /// nameserver was reloaded.
    pub fn is_success(&self) -> bool {
        self.publication.is_none()
            && self.algorithms.iter().all(|alg| alg.error.is_none())
            && self
                .zones
                .iter()
                .all(|zone| !matches!(zone.status, ZoneStatus::Failed(_)))
    }

    pub fn zone(&self, name: &OwnerName) -> Option<&ZoneReport> {
        self.zones.iter().find(|zone| zone.zone == *name)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct AlgorithmReport {
    pub algorithm: Algorithm,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ksk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zsk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

impl AlgorithmReport {
    fn ready(pair: &SigningKeyPair) -> Self {
        AlgorithmReport {
            algorithm: pair.algorithm(),
            ksk: Some(pair.ksk().identifier()),
            zsk: Some(pair.zsk().identifier()),
            error: None,
        }
    }

    fn failed(algorithm: Algorithm, err: &Error) -> Self {
        AlgorithmReport {
            algorithm,
            ksk: None,
            zsk: None,
            error: Some(err.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ZoneReport {
    pub zone: OwnerName,
    #[serde(flatten)]
    pub status: ZoneStatus,
}

impl ZoneReport {
    pub fn fresh(zone: OwnerName, not_after: u32) -> Self {
        ZoneReport {
            zone,
            status: ZoneStatus::Fresh { not_after },
        }
    }

    pub fn signed(zone: OwnerName, reason: DueReason, not_after: u32) -> Self {
        ZoneReport {
            zone,
            status: ZoneStatus::Signed { reason, not_after },
        }
    }

    pub fn failed(zone: OwnerName, err: &Error) -> Self {
        ZoneReport {
            zone,
            status: ZoneStatus::Failed(err.into()),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ZoneStatus {
    /// Left alone, the published signatures are good.
    Fresh { not_after: u32 },

    /// Signed and published in this pass.
    Signed { reason: DueReason, not_after: u32 },

    /// Not published; the previous version, if any, stays in place.
    Failed(ErrorReport),
}

#[derive(Clone, Debug, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorReport {
    fn from(err: &Error) -> Self {
        ErrorReport {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

//------------ Triggers ------------------------------------------------------

/// Decides when passes run.
pub trait Trigger {
    /// Wait until the next pass is due. Returns `false` to stop.
    fn next_pass(&mut self) -> bool;
}

/// A single pass, for use from cron.
#[derive(Debug, Default)]
pub struct OnceTrigger {
    fired: bool,
}

impl Trigger for OnceTrigger {
    fn next_pass(&mut self) -> bool {
        !std::mem::replace(&mut self.fired, true)
    }
}

/// Passes at a fixed interval until interrupted with Ctrl-C.
///
/// The first pass runs immediately.
pub struct IntervalTrigger {
    runtime: tokio::runtime::Runtime,
    period: Duration,
    interval: Option<Interval>,
}

impl IntervalTrigger {
    pub fn new(period: Duration) -> Result<Self, Error> {
        if period.is_zero() {
            return Err("the interval must not be zero".into());
        }
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| format!("unable to start runtime: {e}"))?;
        Ok(IntervalTrigger {
            runtime,
            period,
            interval: None,
        })
    }
}

impl Trigger for IntervalTrigger {
    fn next_pass(&mut self) -> bool {
        let IntervalTrigger {
            runtime,
            period,
            interval,
        } = self;
        runtime.block_on(async {
            let interval = interval.get_or_insert_with(|| {
                let mut interval = tokio::time::interval(*period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });
            tokio::select! {
                _ = interval.tick() => true,
                _ = tokio::signal::ctrl_c() => {
                    info!("interrupted, stopping");
                    false
                }
            }
        })
    }
}

//------------ RenewalScheduler ----------------------------------------------

pub struct RenewalScheduler<P> {
    algorithms: Vec<Algorithm>,
    zones: Vec<ZoneConfig>,
    lifetime: Duration,
    inception_offset: Duration,
    margin: Duration,
    keygen: KeyGenerator,
    signer: ZoneSigner,
    publisher: P,
}

impl<P: Publisher> RenewalScheduler<P> {
    pub fn new(config: &Config, publisher: P) -> Result<Self, Error> {
        let store = Arc::new(KeyStore::open(&config.key_dir)?);
        Ok(RenewalScheduler {
            algorithms: config.algorithms.clone(),
            zones: config.zones.clone(),
            lifetime: config.signature_lifetime,
            inception_offset: config.inception_offset,
            margin: config.remain_time,
            keygen: KeyGenerator::new(store, config.key_params()),
            signer: ZoneSigner::new(config.nsec3_params()?),
            publisher,
        })
    }

    pub fn keygen(&self) -> &KeyGenerator {
        &self.keygen
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Run passes as the trigger says.
    ///
    /// Returns whether the last pass succeeded.
    pub fn run(&self, trigger: &mut impl Trigger, clock: impl Fn() -> u32, force: bool) -> bool {
        let mut success = true;
        while trigger.next_pass() {
            success = self.tick(clock(), force).is_success();
        }
        success
    }

    /// One pass over all zones.
    pub fn tick(&self, now: u32, force: bool) -> CycleReport {
        self.pass(now, force, &self.zones)
    }

    /// Sign and publish a single zone now, whatever its state.
    pub fn sign_zone(&self, name: &OwnerName, now: u32) -> Result<CycleReport, Error> {
        let zone = self
            .zones
            .iter()
            .find(|zone| zone.name == *name)
            .ok_or_else(|| format!("zone {name} is not configured"))?;
        Ok(self.pass(now, true, std::slice::from_ref(zone)))
    }

    /// The freshness of every zone, without signing anything.
    ///
    /// Keys are only read from the store here, never generated.
    pub fn status(&self, now: u32) -> Vec<(OwnerName, Result<ZoneFreshness, Error>)> {
        let mut keys = ActiveKeys::new();
        for &algorithm in &self.algorithms {
            match self.keygen.store().get_active_key_pair(algorithm) {
                Ok(Some(pair)) => {
                    keys.insert(algorithm, pair);
                }
                Ok(None) => {}
                Err(err) => warn!("cannot read {algorithm} key pair: {err}"),
            }
        }
        let ids = key_identifiers(&keys);
        self.zones
            .iter()
            .map(|zone| {
                let res = Zone::load(&zone.name, &zone.path).and_then(|input| {
                    let state = self.publisher.last_published(&zone.name)?;
                    let freshness =
                        classify(state.as_ref(), now, self.margin, &input.digest(), &ids);
                    Ok(ZoneFreshness { state, freshness })
                });
                (zone.name.clone(), res)
            })
            .collect()
    }

    fn pass(&self, now: u32, force: bool, zones: &[ZoneConfig]) -> CycleReport {
        let mut report = CycleReport::new(now);
        let mut keys = ActiveKeys::new();
        for (algorithm, res) in self.keygen.ensure_all(&self.algorithms) {
            match res {
                Ok(pair) => {
                    report.algorithms.push(AlgorithmReport::ready(&pair));
                    keys.insert(algorithm, pair);
                }
                Err(err) => {
                    if matches!(
                        err.kind(),
                        ErrorKind::AlreadyExists
                            | ErrorKind::PermissionDenied
                            | ErrorKind::StoreCorrupted
                    ) {
                        error!("key store problem for {algorithm}: {err}");
                    }
                    report.algorithms.push(AlgorithmReport::failed(algorithm, &err));
                }
            }
        }

        if keys.len() < self.algorithms.len() {
            warn!("not every algorithm has a key pair, leaving signed zones as they are");
            let err = Error::with_kind(
                ErrorKind::MissingKeys,
                "not every configured algorithm has an active key pair",
            );
            report.zones = zones
                .iter()
                .map(|zone| ZoneReport::failed(zone.name.clone(), &err))
                .collect();
        } else {
            // Log output of the worker threads goes where ours goes.
            let dispatch = tracing::dispatcher::get_default(Dispatch::clone);
            report.zones = zones
                .par_iter()
                .map(|zone| {
                    tracing::dispatcher::with_default(&dispatch, || {
                        self.renew_zone(zone, &keys, now, force)
                            .unwrap_or_else(|err| {
                                error!("failed to renew {}: {err}", zone.name);
                                ZoneReport::failed(zone.name.clone(), &err)
                            })
                    })
                })
                .collect();
        }

        if let Err(err) = self.publisher.reload(&report) {
            error!("{err}");
            report.publication = Some((&err).into());
        }
        if let Err(err) = self.publisher.cycle_complete(&report) {
            error!("{err}");
            report.publication.get_or_insert_with(|| (&err).into());
        }
        report
    }

    fn renew_zone(
        &self,
        zone: &ZoneConfig,
        keys: &ActiveKeys,
        now: u32,
        force: bool,
    ) -> Result<ZoneReport, Error> {
        let input = Zone::load(&zone.name, &zone.path)?;
        let digest = input.digest();
        let state = self
            .publisher
            .last_published(&zone.name)
            .unwrap_or_else(|err| {
                warn!("ignoring state of {}: {err}", zone.name);
                None
            });

        let ids = key_identifiers(keys);
        let reason = match classify(state.as_ref(), now, self.margin, &digest, &ids) {
            _ if force => DueReason::Forced,
            Freshness::Due(reason) => reason,
            Freshness::Fresh => {
                let not_after = state.map_or(0, |state| state.window.not_after);
                return Ok(ZoneReport::fresh(zone.name.clone(), not_after));
            }
        };

        warn!("{} is due: {reason}", zone.name);
        let window = ValidityWindow::starting_at(now, self.lifetime, self.inception_offset);
        let signed = self.signer.sign(&input, keys, window)?;
        let state = self.publisher.publish(&signed, keys, &digest)?;
        Ok(ZoneReport::signed(zone.name.clone(), reason, state.window.not_after))
    }
}

/// What the status command shows for a zone.
#[derive(Clone, Debug)]
pub struct ZoneFreshness {
    pub state: Option<PublishedState>,
    pub freshness: Freshness,
}

//------------ Tests ---------------------------------------------------------
