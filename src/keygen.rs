//! Provisioning of key pairs.

use std::ops::RangeInclusive;
use std::sync::{Arc, Mutex};

use domain::rdata::dnssec::Timestamp;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Context, Error};
use crate::keys::{Algorithm, KeyRole, SigningKey, SigningKeyPair};
use crate::keystore::KeyStore;

/// Maximum tries to generate a ZSK with a key tag that does not conflict
/// with the KSK.
const MAX_KEY_TAG_TRIES: u8 = 10;

/// Allowed RSA modulus lengths of a KSK.
pub const RSA_KSK_BITS: RangeInclusive<u32> = 2048..=4096;

/// Allowed RSA modulus lengths of a ZSK.
pub const RSA_ZSK_BITS: RangeInclusive<u32> = 1024..=4096;

type GenerateFn = fn(Algorithm, KeyRole, u32) -> Result<SigningKey, Error>;

//------------ KeyParams -----------------------------------------------------

/// RSA key lengths. Ed25519 keys have a fixed size.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct KeyParams {
    pub ksk_bits: u32,
    pub zsk_bits: u32,
}

impl Default for KeyParams {
    fn default() -> Self {
        KeyParams {
            ksk_bits: 2048,
            zsk_bits: 1024,
        }
    }
}

impl KeyParams {
    /// Check the key length policy.
    pub fn validate(&self) -> Result<(), Error> {
        if !RSA_KSK_BITS.contains(&self.ksk_bits) {
            return Err(format!(
                "KSK length of {} bits is outside of {}..={}",
                self.ksk_bits,
                RSA_KSK_BITS.start(),
                RSA_KSK_BITS.end()
            )
            .into());
        }
        if !RSA_ZSK_BITS.contains(&self.zsk_bits) {
            return Err(format!(
                "ZSK length of {} bits is outside of {}..={}",
                self.zsk_bits,
                RSA_ZSK_BITS.start(),
                RSA_ZSK_BITS.end()
            )
            .into());
        }
        Ok(())
    }
}

//------------ KeyGenerator --------------------------------------------------

/// Makes sure every algorithm has exactly one active key pair.
pub struct KeyGenerator {
    store: Arc<KeyStore>,
    params: KeyParams,

    /// Serializes provisioning per algorithm within this process.
    ///
    /// The key store lock does the same across processes.
    locks: [Mutex<()>; Algorithm::ALL.len()],

    generate: GenerateFn,
}

impl KeyGenerator {
    pub fn new(store: Arc<KeyStore>, params: KeyParams) -> Self {
        KeyGenerator {
            store,
            params,
            locks: Default::default(),
            generate: SigningKey::generate,
        }
    }

    pub fn store(&self) -> &KeyStore {
        &self.store
    }

    /// Return the active key pair of `algorithm`, creating it if needed.
    ///
    /// An existing pair is returned unchanged. Concurrent callers, in this
    /// or other processes, all end up with the same pair.
    pub fn ensure_key_pair(&self, algorithm: Algorithm) -> Result<SigningKeyPair, Error> {
        let _guard = self.locks[algorithm.index()]
            .lock()
            .unwrap_or_else(|err| err.into_inner());
        let _lock = self.store.lock(algorithm)?;

        if let Some(pair) = self.store.get_active_key_pair(algorithm)? {
            return Ok(pair);
        }

        let pair = self
            .generate_pair(algorithm)
            .with_context(|| format!("provisioning {algorithm}"))?;
        self.store.put_active_key_pair(algorithm, &pair)?;
        Ok(pair)
    }

    /// Ensure key pairs for several algorithms.
    ///
    /// A failure for one algorithm does not keep the others from being
    /// provisioned.
    pub fn ensure_all(
        &self,
        algorithms: &[Algorithm],
    ) -> Vec<(Algorithm, Result<SigningKeyPair, Error>)> {
        algorithms
            .iter()
            .map(|&algorithm| {
                let res = self.ensure_key_pair(algorithm);
                if let Err(err) = &res {
                    warn!("no key pair for {algorithm}: {err}");
                }
                (algorithm, res)
            })
            .collect()
    }

    fn generate_pair(&self, algorithm: Algorithm) -> Result<SigningKeyPair, Error> {
        info!("generating new {algorithm} key pair");
        let ksk = (self.generate)(algorithm, KeyRole::Ksk, self.params.ksk_bits)?;

        let mut retries = MAX_KEY_TAG_TRIES;
        let zsk = loop {
            let zsk = (self.generate)(algorithm, KeyRole::Zsk, self.params.zsk_bits)?;
            if zsk.key_tag() != ksk.key_tag() {
                break zsk;
            }
            if retries <= 1 {
                return Err(Error::key_generation(
                    "unable to generate a ZSK with a key tag different from the KSK",
                ));
            }
            retries -= 1;
        };

        SigningKeyPair::new(ksk, zsk, Timestamp::now().into_int())
    }
}

//------------ Tests ---------------------------------------------------------
