//! DNSSEC key material.
//!
//! This covers the pieces of RFC 4034 that the key lifecycle needs: the
//! DNSKEY record data of a key, its key tag and DS digests, plus the BIND
//! `Private-key-format: v1.3` text used to persist private keys.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use domain::base::iana::SecAlg;
use domain::utils::{base16, base64};
use ed25519_dalek::Signer as _;
use rand::rngs::OsRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, Pkcs1v15Sign, RsaPrivateKey};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384};

use crate::error::Error;
use crate::name::OwnerName;

/// DNSKEY flags of a zone signing key.
pub const ZSK_FLAGS: u16 = 256;

/// DNSKEY flags of a key signing key (zone key plus Secure Entry Point).
pub const KSK_FLAGS: u16 = 257;

/// The protocol field of every DNSKEY record.
const DNSKEY_PROTOCOL: u8 = 3;

//------------ Algorithm -----------------------------------------------------

/// A supported DNSSEC signing algorithm.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize,
)]
pub enum Algorithm {
    #[serde(rename = "RSASHA1-NSEC3-SHA1")]
    RsaSha1Nsec3Sha1,

    #[serde(rename = "RSASHA256")]
    RsaSha256,

    #[serde(rename = "ED25519")]
    Ed25519,
}

impl Algorithm {
    pub const ALL: [Algorithm; 3] = [
        Algorithm::RsaSha1Nsec3Sha1,
        Algorithm::RsaSha256,
        Algorithm::Ed25519,
    ];

    /// The algorithms published when nothing else is configured.
    ///
    /// Not every TLD accepts every algorithm, so two are published side by
    /// side.
    pub const DEFAULT: [Algorithm; 2] = [Algorithm::RsaSha1Nsec3Sha1, Algorithm::RsaSha256];

    pub fn sec_alg(self) -> SecAlg {
        match self {
            Algorithm::RsaSha1Nsec3Sha1 => SecAlg::RSASHA1_NSEC3_SHA1,
            Algorithm::RsaSha256 => SecAlg::RSASHA256,
            Algorithm::Ed25519 => SecAlg::ED25519,
        }
    }

    /// The IANA algorithm number.
    pub fn number(self) -> u8 {
        self.sec_alg().to_int()
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Algorithm::RsaSha1Nsec3Sha1 => "RSASHA1-NSEC3-SHA1",
            Algorithm::RsaSha256 => "RSASHA256",
            Algorithm::Ed25519 => "ED25519",
        }
    }

    pub fn is_rsa(self) -> bool {
        !matches!(self, Algorithm::Ed25519)
    }

    /// A dense index for per-algorithm tables.
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Accepts the mnemonic (in any case) or the algorithm number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Algorithm::ALL
            .into_iter()
            .find(|alg| alg.mnemonic().eq_ignore_ascii_case(s) || alg.number().to_string() == s)
            .ok_or_else(|| {
                format!(
                    "unsupported algorithm '{s}', expected one of {}",
                    Algorithm::ALL.map(Algorithm::mnemonic).join(", ")
                )
                .into()
            })
    }
}

//------------ KeyRole -------------------------------------------------------

/// Whether a key signs the DNSKEY RRset or the rest of the zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Ksk,
    Zsk,
}

impl KeyRole {
    pub fn flags(self) -> u16 {
        match self {
            KeyRole::Ksk => KSK_FLAGS,
            KeyRole::Zsk => ZSK_FLAGS,
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            KeyRole::Ksk => "KSK",
            KeyRole::Zsk => "ZSK",
        })
    }
}

//------------ DigestType ----------------------------------------------------

/// A DS digest algorithm.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
pub enum DigestType {
    #[serde(rename = "SHA-1")]
    Sha1,

    #[serde(rename = "SHA-256")]
    Sha256,

    #[serde(rename = "SHA-384")]
    Sha384,
}

impl DigestType {
    pub fn number(self) -> u8 {
        match self {
            DigestType::Sha1 => 1,
            DigestType::Sha256 => 2,
            DigestType::Sha384 => 4,
        }
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            DigestType::Sha1 => "SHA-1",
            DigestType::Sha256 => "SHA-256",
            DigestType::Sha384 => "SHA-384",
        }
    }

    fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            DigestType::Sha1 => Sha1::digest(data).to_vec(),
            DigestType::Sha256 => Sha256::digest(data).to_vec(),
            DigestType::Sha384 => Sha384::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for DigestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}

//------------ DsRecord ------------------------------------------------------

/// The record data of a DS record for a key signing key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DsRecord {
    pub key_tag: u16,
    pub algorithm: Algorithm,
    pub digest_type: DigestType,
    pub digest: Vec<u8>,
}

impl fmt::Display for DsRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.key_tag,
            self.algorithm.number(),
            self.digest_type.number(),
            base16::encode_string(&self.digest)
        )
    }
}

//------------ Free functions ------------------------------------------------

/// Build DNSKEY record data from its fields.
pub fn dnskey_rdata(flags: u16, algorithm: Algorithm, public_key: &[u8]) -> Vec<u8> {
    let mut res = Vec::with_capacity(4 + public_key.len());
    res.extend_from_slice(&flags.to_be_bytes());
    res.push(DNSKEY_PROTOCOL);
    res.push(algorithm.number());
    res.extend_from_slice(public_key);
    res
}

/// Compute the key tag of DNSKEY record data (RFC 4034, appendix B).
pub fn key_tag(rdata: &[u8]) -> u16 {
    let mut acc: u32 = 0;
    for (i, &octet) in rdata.iter().enumerate() {
        if i & 1 == 0 {
            acc += u32::from(octet) << 8;
        } else {
            acc += u32::from(octet);
        }
    }
    acc += (acc >> 16) & 0xFFFF;
    (acc & 0xFFFF) as u16
}

/// Encode an RSA public key as in RFC 3110, section 2.
fn rsa_public_key(key: &RsaPrivateKey) -> Result<Box<[u8]>, Error> {
    let exponent = key.e().to_bytes_be();
    let modulus = key.n().to_bytes_be();
    let mut res = Vec::with_capacity(3 + exponent.len() + modulus.len());
    if let Ok(len) = u8::try_from(exponent.len()) {
        res.push(len);
    } else {
        let len = u16::try_from(exponent.len())
            .map_err(|_| Error::key_generation("RSA public exponent is too long"))?;
        res.push(0);
        res.extend_from_slice(&len.to_be_bytes());
    }
    res.extend_from_slice(&exponent);
    res.extend_from_slice(&modulus);
    Ok(res.into_boxed_slice())
}

//------------ SigningKey ----------------------------------------------------

#[derive(Clone, PartialEq, Eq)]
enum SecretKey {
    Rsa(Box<RsaPrivateKey>),
    Ed25519(Box<ed25519_dalek::SigningKey>),
}

/// A DNSSEC key with its private half.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey {
    algorithm: Algorithm,
    role: KeyRole,
    public_key: Box<[u8]>,
    key_tag: u16,
    secret: SecretKey,
}

impl SigningKey {
    /// Generate a new key from OS randomness.
    ///
    /// `bits` is the modulus length for RSA and ignored for Ed25519.
    pub fn generate(algorithm: Algorithm, role: KeyRole, bits: u32) -> Result<Self, Error> {
        let secret = match algorithm {
            Algorithm::RsaSha1Nsec3Sha1 | Algorithm::RsaSha256 => {
                let key = RsaPrivateKey::new(&mut OsRng, bits as usize).map_err(|err| {
                    Error::key_generation(format!(
                        "generating a {bits} bit {algorithm} {role} failed: {err}"
                    ))
                })?;
                SecretKey::Rsa(Box::new(key))
            }
            Algorithm::Ed25519 => {
                SecretKey::Ed25519(Box::new(ed25519_dalek::SigningKey::generate(&mut OsRng)))
            }
        };
        Self::from_secret(algorithm, role, secret)
    }

    fn from_secret(algorithm: Algorithm, role: KeyRole, secret: SecretKey) -> Result<Self, Error> {
        let public_key = match &secret {
            SecretKey::Rsa(key) => rsa_public_key(key)?,
            SecretKey::Ed25519(key) => key.verifying_key().to_bytes().into(),
        };
        let key_tag = key_tag(&dnskey_rdata(role.flags(), algorithm, &public_key));
        Ok(SigningKey {
            algorithm,
            role,
            public_key,
            key_tag,
            secret,
        })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn role(&self) -> KeyRole {
        self.role
    }

    pub fn flags(&self) -> u16 {
        self.role.flags()
    }

    pub fn key_tag(&self) -> u16 {
        self.key_tag
    }

    /// The public key field of the DNSKEY record.
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The BIND style file name stem, e.g. `K008+12345`.
    pub fn identifier(&self) -> String {
        format!("K{:03}+{:05}", self.algorithm.number(), self.key_tag)
    }

    pub fn dnskey_rdata(&self) -> Vec<u8> {
        dnskey_rdata(self.flags(), self.algorithm, &self.public_key)
    }

    /// The DNSKEY record data in presentation format.
    pub fn dnskey_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.flags(),
            DNSKEY_PROTOCOL,
            self.algorithm.number(),
            base64::encode_string(&self.public_key)
        )
    }

    /// Compute a DS record for this key published at `owner`.
    pub fn ds(&self, owner: &OwnerName, digest_type: DigestType) -> DsRecord {
        let mut data = owner.to_canonical_vec();
        data.extend_from_slice(&self.dnskey_rdata());
        DsRecord {
            key_tag: self.key_tag,
            algorithm: self.algorithm,
            digest_type,
            digest: digest_type.digest(&data),
        }
    }

    /// Sign `data` and return the RRSIG signature field.
    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, Error> {
        match &self.secret {
            SecretKey::Rsa(key) => {
                let res = match self.algorithm {
                    Algorithm::RsaSha1Nsec3Sha1 => key.sign_with_rng(
                        &mut OsRng,
                        Pkcs1v15Sign::new::<Sha1>(),
                        &Sha1::digest(data),
                    ),
                    _ => key.sign_with_rng(
                        &mut OsRng,
                        Pkcs1v15Sign::new::<Sha256>(),
                        &Sha256::digest(data),
                    ),
                };
                res.map_err(|err| {
                    Error::signing(format!("signing with {} failed: {err}", self.identifier()))
                })
            }
            SecretKey::Ed25519(key) => Ok(key.sign(data).to_bytes().to_vec()),
        }
    }

    /// Render the private key in BIND `Private-key-format: v1.3`.
    pub fn to_bind_private(&self) -> Result<String, Error> {
        let mut res = format!(
            "Private-key-format: v1.3\nAlgorithm: {} ({})\n",
            self.algorithm.number(),
            self.algorithm
        );
        match &self.secret {
            SecretKey::Rsa(key) => {
                let [p, q] = key.primes() else {
                    return Err(Error::key_generation(format!(
                        "{} is not a two-prime RSA key",
                        self.identifier()
                    )));
                };
                let (Some(dp), Some(dq), Some(qinv)) = (key.dp(), key.dq(), key.crt_coefficient())
                else {
                    return Err(Error::key_generation(format!(
                        "{} lacks CRT parameters",
                        self.identifier()
                    )));
                };
                let fields = [
                    ("Modulus", key.n()),
                    ("PublicExponent", key.e()),
                    ("PrivateExponent", key.d()),
                    ("Prime1", p),
                    ("Prime2", q),
                    ("Exponent1", dp),
                    ("Exponent2", dq),
                    ("Coefficient", &qinv),
                ];
                for (field, value) in fields {
                    res.push_str(&format!(
                        "{field}: {}\n",
                        base64::encode_string(&value.to_bytes_be())
                    ));
                }
            }
            SecretKey::Ed25519(key) => {
                res.push_str(&format!(
                    "PrivateKey: {}\n",
                    base64::encode_string(&key.to_bytes())
                ));
            }
        }
        Ok(res)
    }

    /// Load a private key from BIND `Private-key-format: v1.3` text.
    ///
    /// Errors are of kind [`StoreCorrupted`](crate::error::ErrorKind).
    pub fn from_bind_private(role: KeyRole, text: &str) -> Result<Self, Error> {
        let fields: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim(), value.trim()))
            .collect();

        let field = |name: &str| {
            fields
                .get(name)
                .copied()
                .ok_or_else(|| Error::corrupted(format!("missing field '{name}'")))
        };
        let binary = |name: &str| {
            base64::decode::<Vec<u8>>(field(name)?)
                .map_err(|err| Error::corrupted(format!("field '{name}': {err}")))
        };
        let number = |name: &str| binary(name).map(|bytes| BigUint::from_bytes_be(&bytes));

        let algorithm = field("Algorithm")?;
        let algorithm: Algorithm = algorithm
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .parse()
            .map_err(|err: Error| Error::corrupted(err))?;

        let secret = match algorithm {
            Algorithm::RsaSha1Nsec3Sha1 | Algorithm::RsaSha256 => {
                let key = RsaPrivateKey::from_components(
                    number("Modulus")?,
                    number("PublicExponent")?,
                    number("PrivateExponent")?,
                    vec![number("Prime1")?, number("Prime2")?],
                )
                .and_then(|key| key.validate().map(|_| key))
                .map_err(|err| Error::corrupted(format!("invalid RSA key: {err}")))?;
                SecretKey::Rsa(Box::new(key))
            }
            Algorithm::Ed25519 => {
                let seed = binary("PrivateKey")?;
                let seed: [u8; 32] = seed.as_slice().try_into().map_err(|_| {
                    Error::corrupted(format!(
                        "Ed25519 private key has {} octets, expected 32",
                        seed.len()
                    ))
                })?;
                SecretKey::Ed25519(Box::new(ed25519_dalek::SigningKey::from_bytes(&seed)))
            }
        };
        Self::from_secret(algorithm, role, secret)
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("algorithm", &self.algorithm)
            .field("role", &self.role)
            .field("key_tag", &self.key_tag)
            .finish_non_exhaustive()
    }
}

//------------ SigningKeyPair ------------------------------------------------

/// The KSK and ZSK used for one algorithm.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigningKeyPair {
    ksk: SigningKey,
    zsk: SigningKey,
    created: u32,
}

impl SigningKeyPair {
    /// Combine two keys into a pair.
    ///
    /// Both keys must use the same algorithm, have the right roles and
    /// have different key tags.
    pub fn new(ksk: SigningKey, zsk: SigningKey, created: u32) -> Result<Self, Error> {
        if ksk.role != KeyRole::Ksk || zsk.role != KeyRole::Zsk {
            return Err("key pair needs a KSK and a ZSK".into());
        }
        if ksk.algorithm != zsk.algorithm {
            return Err(format!(
                "KSK uses {} but ZSK uses {}",
                ksk.algorithm, zsk.algorithm
            )
            .into());
        }
        if ksk.key_tag == zsk.key_tag {
            return Err(format!("KSK and ZSK share key tag {}", ksk.key_tag).into());
        }
        Ok(SigningKeyPair { ksk, zsk, created })
    }

    pub fn algorithm(&self) -> Algorithm {
        self.ksk.algorithm
    }

    pub fn ksk(&self) -> &SigningKey {
        &self.ksk
    }

    pub fn zsk(&self) -> &SigningKey {
        &self.zsk
    }

    /// Seconds since the epoch at which the pair was generated.
    pub fn created(&self) -> u32 {
        self.created
    }

    pub fn keys(&self) -> [&SigningKey; 2] {
        [&self.ksk, &self.zsk]
    }
}

//------------ Tests ---------------------------------------------------------
