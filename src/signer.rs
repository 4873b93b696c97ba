//! Signing a zone.
//!
//! A zone is always signed as a whole: the input records are combined with
//! the DNSKEY RRset of all active key pairs, an NSEC3PARAM record and a
//! fresh NSEC3 chain, and every authoritative RRset gets one RRSIG per
//! algorithm. The result replaces any previously signed version.

pub mod nsec3;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use domain::base::iana::{Class, Rtype};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, ErrorKind};
use crate::keys::{Algorithm, SigningKey, SigningKeyPair};
use crate::name::OwnerName;
use crate::zone::{rdata, Zone, ZoneRecord};

use self::nsec3::{build_chain, Nsec3Params};

/// TTL of generated records in zones without an SOA record.
const DEFAULT_TTL: u32 = 3600;

const NSEC3PARAM_TTL: u32 = 0;

/// The active key pairs by algorithm.
pub type ActiveKeys = BTreeMap<Algorithm, SigningKeyPair>;

//------------ ValidityWindow ------------------------------------------------

/// Inception and expiration of the signatures of a signed zone.
///
/// Both are seconds since the epoch, as in the RRSIG record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ValidityWindow {
    pub not_before: u32,
    pub not_after: u32,
}

impl ValidityWindow {
    /// The window for signatures made at `now`.
    ///
    /// Inception is backdated by `inception_offset` to allow for clock
    /// skew of validators.
    pub fn starting_at(now: u32, lifetime: Duration, inception_offset: Duration) -> Self {
        let secs = |duration: Duration| u32::try_from(duration.as_secs()).unwrap_or(u32::MAX);
        ValidityWindow {
            not_before: now.saturating_sub(secs(inception_offset)),
            not_after: now.saturating_add(secs(lifetime)),
        }
    }

    /// Seconds until the signatures expire, negative once they have.
    pub fn remaining(&self, now: u32) -> i64 {
        i64::from(self.not_after) - i64::from(now)
    }
}

//------------ ZoneSigner ----------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct ZoneSigner {
    nsec3: Nsec3Params,
}

impl ZoneSigner {
    pub fn new(nsec3: Nsec3Params) -> Self {
        ZoneSigner { nsec3 }
    }

    /// Sign `zone` with every key pair in `keys`.
    pub fn sign(
        &self,
        zone: &Zone,
        keys: &ActiveKeys,
        window: ValidityWindow,
    ) -> Result<SignedZone, Error> {
        let apex = zone.apex();
        if keys.is_empty() {
            return Err(Error::with_kind(
                ErrorKind::MissingKeys,
                &format!("no active key pair to sign {apex} with"),
            ));
        }
        if window.not_before >= window.not_after {
            return Err(Error::signing(format!(
                "empty validity window {} to {}",
                window.not_before, window.not_after
            )));
        }

        let soa_ttl = zone.soa().map(|soa| soa.ttl);
        let dnskey_ttl = soa_ttl.unwrap_or(DEFAULT_TTL);
        let nsec3_ttl = match (soa_ttl, zone.soa_minimum()) {
            (Some(ttl), Some(minimum)) => ttl.min(minimum),
            _ => DEFAULT_TTL,
        };

        let cuts: BTreeSet<&OwnerName> = zone
            .records()
            .iter()
            .filter(|r| r.rtype == Rtype::NS && r.owner != *apex)
            .map(|r| &r.owner)
            .collect();
        let is_occluded = |name: &OwnerName| {
            let mut current = name.parent();
            while let Some(parent) = current {
                if !parent.is_below(apex) {
                    return false;
                }
                if cuts.contains(&parent) {
                    return true;
                }
                current = parent.parent();
            }
            false
        };

        // Collect the records and the types for the NSEC3 bitmaps.
        let mut records = Vec::with_capacity(zone.records().len() * 2);
        let mut nodes: BTreeMap<OwnerName, BTreeSet<Rtype>> = BTreeMap::new();
        nodes.insert(
            apex.clone(),
            BTreeSet::from([Rtype::DNSKEY, Rtype::NSEC3PARAM, Rtype::RRSIG]),
        );
        for record in zone.records() {
            records.push(record.clone());
            if is_occluded(&record.owner) {
                continue;
            }
            let types = nodes.entry(record.owner.clone()).or_default();
            if cuts.contains(&record.owner) {
                match record.rtype {
                    Rtype::NS => {
                        types.insert(Rtype::NS);
                    }
                    Rtype::DS => {
                        types.insert(Rtype::DS);
                        types.insert(Rtype::RRSIG);
                    }
                    _ => {}
                }
            } else {
                types.insert(record.rtype);
                types.insert(Rtype::RRSIG);
            }
        }

        for pair in keys.values() {
            for key in pair.keys() {
                records.push(ZoneRecord {
                    owner: apex.clone(),
                    rtype: Rtype::DNSKEY,
                    ttl: dnskey_ttl,
                    rdata: key.dnskey_rdata().into_boxed_slice(),
                });
            }
        }
        records.push(ZoneRecord {
            owner: apex.clone(),
            rtype: Rtype::NSEC3PARAM,
            ttl: NSEC3PARAM_TTL,
            rdata: self.nsec3.param_rdata().into_boxed_slice(),
        });
        records.extend(build_chain(apex, nodes, &self.nsec3, nsec3_ttl)?);
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut rrsigs = Vec::new();
        for rrset in records.chunk_by(|a, b| a.owner == b.owner && a.rtype == b.rtype) {
            let head = &rrset[0];
            if is_occluded(&head.owner) {
                continue;
            }
            if cuts.contains(&head.owner) && head.rtype != Rtype::DS {
                continue;
            }
            for pair in keys.values() {
                let key = if head.rtype == Rtype::DNSKEY {
                    pair.ksk()
                } else {
                    pair.zsk()
                };
                rrsigs.push(sign_rrset(apex, rrset, key, window)?);
            }
        }
        debug!(
            "signed {apex}: {} records, {} signatures",
            records.len(),
            rrsigs.len()
        );

        records.extend(rrsigs);
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        Ok(SignedZone {
            apex: apex.clone(),
            records,
            window,
            key_identifiers: key_identifiers(keys),
        })
    }
}

/// The sorted identifiers of all keys of the active key pairs.
pub fn key_identifiers(keys: &ActiveKeys) -> Vec<String> {
    let mut res: Vec<String> = keys
        .values()
        .flat_map(|pair| pair.keys().map(SigningKey::identifier))
        .collect();
    res.sort();
    res
}

/// Create the RRSIG record for an RRset in canonical order.
fn sign_rrset(
    apex: &OwnerName,
    rrset: &[ZoneRecord],
    key: &SigningKey,
    window: ValidityWindow,
) -> Result<ZoneRecord, Error> {
    let head = &rrset[0];
    let mut rdata = Vec::new();
    rdata.extend_from_slice(&head.rtype.to_int().to_be_bytes());
    rdata.push(key.algorithm().number());
    rdata.push(head.owner.rrsig_labels());
    rdata.extend_from_slice(&head.ttl.to_be_bytes());
    rdata.extend_from_slice(&window.not_after.to_be_bytes());
    rdata.extend_from_slice(&window.not_before.to_be_bytes());
    rdata.extend_from_slice(&key.key_tag().to_be_bytes());
    apex.compose_canonical(&mut rdata);

    let owner = head.owner.to_canonical_vec();
    let mut data = rdata.clone();
    for record in rrset {
        let len = u16::try_from(record.rdata.len()).map_err(|_| {
            Error::signing(format!("{} {} record data too long", head.owner, head.rtype))
        })?;
        data.extend_from_slice(&owner);
        data.extend_from_slice(&record.rtype.to_int().to_be_bytes());
        data.extend_from_slice(&Class::IN.to_int().to_be_bytes());
        data.extend_from_slice(&head.ttl.to_be_bytes());
        data.extend_from_slice(&len.to_be_bytes());
        data.extend_from_slice(&record.rdata);
    }

    let signature = key
        .sign(&data)
        .map_err(|err| err.context(&format!("signing {} {}", head.owner, head.rtype)))?;
    rdata.extend_from_slice(&signature);
    Ok(ZoneRecord {
        owner: head.owner.clone(),
        rtype: Rtype::RRSIG,
        ttl: head.ttl,
        rdata: rdata.into_boxed_slice(),
    })
}

//------------ SignedZone ----------------------------------------------------

/// A zone with all its DNSSEC records, in canonical order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignedZone {
    apex: OwnerName,
    records: Vec<ZoneRecord>,
    window: ValidityWindow,
    key_identifiers: Vec<String>,
}

impl SignedZone {
    pub fn apex(&self) -> &OwnerName {
        &self.apex
    }

    pub fn records(&self) -> &[ZoneRecord] {
        &self.records
    }

    pub fn window(&self) -> ValidityWindow {
        self.window
    }

    /// Identifiers of the keys in the DNSKEY RRset.
    pub fn key_identifiers(&self) -> &[String] {
        &self.key_identifiers
    }

    pub fn count(&self, rtype: Rtype) -> usize {
        self.records.iter().filter(|r| r.rtype == rtype).count()
    }

    /// Write the zone in zone file format.
    pub fn write_zonefile(&self, target: &mut impl fmt::Write) -> fmt::Result {
        writeln!(target, "; {} signed by dnskeeper", self.apex)?;
        writeln!(
            target,
            "; signatures valid from {} until {}",
            self.window.not_before, self.window.not_after
        )?;
        for record in &self.records {
            writeln!(
                target,
                "{}\t{}\tIN\t{}\t{}",
                record.owner,
                record.ttl,
                record.rtype,
                rdata::to_text(record.rtype, &record.rdata)
            )?;
        }
        Ok(())
    }

    pub fn to_zonefile(&self) -> String {
        let mut res = String::new();
        // Writing to a string cannot fail.
        let _ = self.write_zonefile(&mut res);
        res
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use domain::base::iana::Rtype;
    use ed25519_dalek::{Signature, Verifier, VerifyingKey};

    use crate::error::ErrorKind;
    use crate::keys::{Algorithm, KeyRole, SigningKey, SigningKeyPair};
    use crate::name::OwnerName;
    use crate::zone::{Zone, ZoneRecord};

    use super::*;

    pub const DAY: u32 = 86400;
    pub const NOW: u32 = 1_700_000_000;

    pub const EXAMPLE: &str = "\
$TTL 3600
@       IN SOA ns1.example.test. hostmaster.example.test. 1 7200 3600 1209600 300
@       NS  ns1
@       MX  10 mail
ns1     A   192.0.2.1
mail    A   192.0.2.2
*.dyn   A   192.0.2.3
sub     NS  ns.sub
sub     DS  12345 15 2 0011223344556677889900112233445566778899001122334455667788990011
ns.sub  A   192.0.2.4
";

    /// A key pair with distinct tags.
    pub fn key_pair(algorithm: Algorithm, bits: u32) -> SigningKeyPair {
        loop {
            let ksk = SigningKey::generate(algorithm, KeyRole::Ksk, bits).unwrap();
            let zsk = SigningKey::generate(algorithm, KeyRole::Zsk, bits).unwrap();
            if let Ok(pair) = SigningKeyPair::new(ksk, zsk, NOW) {
                return pair;
            }
        }
    }

    pub fn ed25519_keys() -> ActiveKeys {
        ActiveKeys::from([(Algorithm::Ed25519, key_pair(Algorithm::Ed25519, 0))])
    }

    pub fn example_zone() -> Zone {
        Zone::parse(&"example.test".parse().unwrap(), EXAMPLE.as_bytes()).unwrap()
    }

    fn window() -> ValidityWindow {
        ValidityWindow::starting_at(NOW, Duration::from_secs(30 * 86400), Duration::from_secs(3600))
    }

    fn rrsigs_for<'a>(
        signed: &'a SignedZone,
        owner: &OwnerName,
        rtype: Rtype,
    ) -> Vec<&'a ZoneRecord> {
        signed
            .records()
            .iter()
            .filter(|r| {
                r.rtype == Rtype::RRSIG
                    && r.owner == *owner
                    && r.rdata[..2] == rtype.to_int().to_be_bytes()
            })
            .collect()
    }

    #[test]
    fn window_is_lifetime_from_now() {
        let window = window();
        assert_eq!(window.not_after - NOW, 30 * DAY);
        assert_eq!(NOW - window.not_before, 3600);
        assert_eq!(window.remaining(NOW + 29 * DAY), i64::from(DAY));
        assert_eq!(window.remaining(NOW + 31 * DAY), -i64::from(DAY));
    }

    #[test]
    fn signs_every_authoritative_rrset() {
        let keys = ed25519_keys();
        let pair = &keys[&Algorithm::Ed25519];
        let zone = example_zone();
        let signed = ZoneSigner::default().sign(&zone, &keys, window()).unwrap();
        let apex = zone.apex().clone();
        let name = |s: &str| s.parse::<OwnerName>().unwrap();

        assert_eq!(signed.count(Rtype::DNSKEY), 2);
        assert_eq!(signed.count(Rtype::NSEC3PARAM), 1);
        // apex, ns1, mail, *.dyn, dyn (empty non-terminal) and the
        // delegation sub, but not the glue below it.
        assert_eq!(signed.count(Rtype::NSEC3), 6);

        for record in signed.records() {
            match record.rtype {
                Rtype::DNSKEY => assert_eq!(record.ttl, 3600),
                Rtype::NSEC3PARAM => assert_eq!(record.ttl, 0),
                Rtype::NSEC3 => assert_eq!(record.ttl, 300),
                _ => {}
            }
        }

        // The DNSKEY RRset is signed by the KSK, everything else by the ZSK.
        let dnskey_sigs = rrsigs_for(&signed, &apex, Rtype::DNSKEY);
        assert_eq!(dnskey_sigs.len(), 1);
        assert_eq!(dnskey_sigs[0].rdata[16..18], pair.ksk().key_tag().to_be_bytes());
        let soa_sigs = rrsigs_for(&signed, &apex, Rtype::SOA);
        assert_eq!(soa_sigs[0].rdata[16..18], pair.zsk().key_tag().to_be_bytes());

        // Wildcards do not count their first label.
        assert_eq!(rrsigs_for(&signed, &name("*.dyn.example.test"), Rtype::A)[0].rdata[3], 3);

        // Delegations: DS is signed, NS and glue are not.
        let sub = name("sub.example.test");
        assert_eq!(rrsigs_for(&signed, &sub, Rtype::DS).len(), 1);
        assert!(rrsigs_for(&signed, &sub, Rtype::NS).is_empty());
        assert!(rrsigs_for(&signed, &name("ns.sub.example.test"), Rtype::A).is_empty());

        // Every NSEC3 RRset is signed.
        let nsec3_sigs = signed
            .records()
            .iter()
            .filter(|r| r.rtype == Rtype::RRSIG && r.rdata[..2] == [0, 50])
            .count();
        assert_eq!(nsec3_sigs, 6);
    }

    #[test]
    fn signatures_verify() {
        let keys = ed25519_keys();
        let zsk = keys[&Algorithm::Ed25519].zsk().clone();
        let zone = example_zone();
        let signed = ZoneSigner::default().sign(&zone, &keys, window()).unwrap();

        // Rebuild the signed data of the apex NS RRset by hand.
        let apex = zone.apex();
        let rrsig = rrsigs_for(&signed, apex, Rtype::NS)[0];
        let (fields, signature) = rrsig.rdata.split_at(rrsig.rdata.len() - 64);
        let mut data = fields.to_vec();
        data.extend_from_slice(b"\x07example\x04test\x00");
        data.extend_from_slice(&[0, 2, 0, 1, 0, 0, 0x0e, 0x10, 0, 18]);
        data.extend_from_slice(b"\x03ns1\x07example\x04test\x00");

        let verifying = VerifyingKey::from_bytes(zsk.public_key().try_into().unwrap()).unwrap();
        let signature = Signature::from_slice(signature).unwrap();
        assert!(verifying.verify(&data, &signature).is_ok());
    }

    #[test]
    fn empty_zone_gets_signed_apex() {
        let zone = Zone::empty("example.test".parse().unwrap());
        let signed = ZoneSigner::default()
            .sign(&zone, &ed25519_keys(), window())
            .unwrap();
        assert_eq!(signed.count(Rtype::DNSKEY), 2);
        assert_eq!(signed.count(Rtype::NSEC3PARAM), 1);
        assert_eq!(signed.count(Rtype::NSEC3), 1);
        // DNSKEY, NSEC3PARAM and NSEC3 RRsets.
        assert_eq!(signed.count(Rtype::RRSIG), 3);
        assert!(signed.records().iter().all(|r| r.ttl == 3600 || r.ttl == 0));
    }

    #[test]
    fn no_keys_is_a_precondition_violation() {
        let err = ZoneSigner::default()
            .sign(&example_zone(), &ActiveKeys::new(), window())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MissingKeys);
    }

    #[test]
    fn deterministic_except_for_time() {
        let keys = ed25519_keys();
        let zone = example_zone();
        let signer = ZoneSigner::default();
        let first = signer.sign(&zone, &keys, window()).unwrap();
        let later = ValidityWindow::starting_at(
            NOW + DAY,
            Duration::from_secs(30 * 86400),
            Duration::from_secs(3600),
        );
        let second = signer.sign(&zone, &keys, later).unwrap();
        assert_eq!(first.records().len(), second.records().len());
        for (a, b) in first.records().iter().zip(second.records()) {
            assert_eq!(a.owner, b.owner);
            assert_eq!(a.rtype, b.rtype);
            if a.rtype == Rtype::RRSIG {
                // Everything but expiration, inception and signature.
                assert_eq!(a.rdata[..8], b.rdata[..8]);
                assert_eq!(a.rdata[16..a.rdata.len() - 64], b.rdata[16..b.rdata.len() - 64]);
            } else {
                assert_eq!(a, b);
            }
        }
        assert_eq!(second.window().not_after - first.window().not_after, DAY);
        // Same window, same output.
        assert_eq!(signer.sign(&zone, &keys, window()).unwrap(), first);
    }

    #[test]
    fn one_signature_per_algorithm() {
        let mut keys = ed25519_keys();
        keys.insert(Algorithm::RsaSha256, key_pair(Algorithm::RsaSha256, 1024));
        let zone = Zone::empty("example.test".parse().unwrap());
        let signed = ZoneSigner::default().sign(&zone, &keys, window()).unwrap();
        assert_eq!(signed.count(Rtype::DNSKEY), 4);
        assert_eq!(signed.count(Rtype::RRSIG), 6);
        assert_eq!(signed.key_identifiers().len(), 4);
    }

    #[test]
    fn zonefile_output() {
        let keys = ed25519_keys();
        let signed = ZoneSigner::default()
            .sign(&example_zone(), &keys, window())
            .unwrap();
        let text = signed.to_zonefile();
        assert!(text.contains("example.test.\t0\tIN\tNSEC3PARAM\t1 0 0 -\n"));
        assert!(text.contains("mail.example.test.\t3600\tIN\tA\t192.0.2.2\n"));
        assert!(text.contains("\tIN\tRRSIG\tDNSKEY 15 2 3600 20231214221320 20231114211320 "));
        assert_eq!(
            text.lines().filter(|l| !l.starts_with(';')).count(),
            signed.records().len()
        );
    }
}
