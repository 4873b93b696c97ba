//! The unsigned input zone.
//!
//! The content of every zone is produced elsewhere and handed over as a
//! zone file. Before anything is signed, the file is parsed and checked for
//! data that cannot be signed as-is.

pub mod rdata;

use std::fs;
use std::path::Path;

use bytes::Bytes;
use domain::base::iana::{Class, Rtype};
use domain::base::name::Name;
use domain::base::rdata::ComposeRecordData;
use domain::utils::base16;
use domain::zonefile::inplace::{Entry, Zonefile};
use octseq::builder::infallible;
use sha2::{Digest, Sha256};

use crate::error::{Context, Error};
use crate::name::OwnerName;

/// Record types that are generated by signing and may not be supplied.
const GENERATED_TYPES: [Rtype; 5] = [
    Rtype::DNSKEY,
    Rtype::RRSIG,
    Rtype::NSEC,
    Rtype::NSEC3,
    Rtype::NSEC3PARAM,
];

//------------ ZoneRecord ----------------------------------------------------

/// A single record of class IN in canonical form.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneRecord {
    pub owner: OwnerName,
    pub rtype: Rtype,
    pub ttl: u32,

    /// The record data in canonical wire format.
    pub rdata: Box<[u8]>,
}

impl ZoneRecord {
    pub fn rdata_text(&self) -> String {
        rdata::to_text(self.rtype, &self.rdata)
    }

    /// Canonical RR order: owner, then type, then record data.
    pub(crate) fn sort_key(&self) -> (&OwnerName, Rtype, &[u8]) {
        (&self.owner, self.rtype, &self.rdata[..])
    }
}

//------------ Zone ----------------------------------------------------------

/// The unsigned content of a zone.
///
/// Records are sorted in canonical order and free of duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Zone {
    apex: OwnerName,
    records: Vec<ZoneRecord>,
}

impl Zone {
    /// Read and parse a zone file.
    pub fn load(apex: &OwnerName, path: &Path) -> Result<Self, Error> {
        let data = fs::read(path)
            .map_err(|err| Error::from(err).context(&format!("reading '{}'", path.display())))?;
        Self::parse(apex, &data).with_context(|| format!("loading zone {apex}"))
    }

    /// Parse zone file data with `apex` as the origin.
    pub fn parse(apex: &OwnerName, data: &[u8]) -> Result<Self, Error> {
        let origin = Name::from_octets(Bytes::from(apex.to_canonical_vec()))
            .map_err(|err| format!("invalid zone name {apex}: {err}"))?;
        let mut zonefile = Zonefile::from(data);
        // The scanner needs the last entry terminated.
        if !data.is_empty() && !data.ends_with(b"\n") {
            zonefile.extend_from_slice(b"\n");
        }
        zonefile.set_origin(origin);

        let mut records = Vec::new();
        for entry in zonefile {
            let entry = entry.map_err(|err| Error::invalid_zone(format!("syntax error: {err}")))?;
            let record = match entry {
                Entry::Record(record) => record,
                Entry::Include { path, .. } => {
                    return Err(Error::invalid_zone(format!(
                        "$INCLUDE of {path} is not supported"
                    )))
                }
            };
            let owner = OwnerName::from_domain(record.owner()).map_err(Error::invalid_zone)?;
            if record.class() != Class::IN {
                return Err(Error::invalid_zone(format!(
                    "record at {owner} has class {}, only IN is supported",
                    record.class()
                )));
            }
            let mut rdata = Vec::new();
            infallible(record.data().compose_canonical_rdata(&mut rdata));
            records.push(ZoneRecord {
                owner,
                rtype: record.rtype(),
                ttl: record.ttl().as_secs(),
                rdata: rdata.into_boxed_slice(),
            });
        }
        Self::from_records(apex.clone(), records)
    }

    /// Create a zone from records, checking that they can be signed.
    pub fn from_records(apex: OwnerName, mut records: Vec<ZoneRecord>) -> Result<Self, Error> {
        records.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        records.dedup();

        let mut soa_count = 0;
        for (i, record) in records.iter().enumerate() {
            let owner = &record.owner;
            if !owner.ends_with(&apex) {
                return Err(Error::invalid_zone(format!(
                    "{owner} {} is outside of zone {apex}",
                    record.rtype
                )));
            }
            if GENERATED_TYPES.contains(&record.rtype) {
                return Err(Error::invalid_zone(format!(
                    "{owner} {} records are generated when signing",
                    record.rtype
                )));
            }
            match record.rtype {
                Rtype::SOA if *owner != apex => {
                    return Err(Error::invalid_zone(format!(
                        "SOA record at {owner} is not at the apex"
                    )))
                }
                Rtype::SOA => soa_count += 1,
                Rtype::DS if *owner == apex => {
                    return Err(Error::invalid_zone(format!(
                        "DS record at the apex {apex} belongs in the parent zone"
                    )))
                }
                _ => {}
            }

            let Some(prev) = i.checked_sub(1).map(|i| &records[i]) else {
                continue;
            };
            if prev.owner != *owner {
                continue;
            }
            if prev.rtype == Rtype::CNAME || record.rtype == Rtype::CNAME {
                return Err(Error::invalid_zone(format!(
                    "CNAME at {owner} cannot coexist with other data"
                )));
            }
            if prev.rtype == record.rtype && prev.ttl != record.ttl {
                return Err(Error::invalid_zone(format!(
                    "{owner} {} has records with different TTLs ({} and {})",
                    record.rtype, prev.ttl, record.ttl
                )));
            }
        }
        if soa_count > 1 {
            return Err(Error::invalid_zone(format!(
                "zone {apex} has {soa_count} SOA records"
            )));
        }

        Ok(Zone { apex, records })
    }

    /// A zone without any records.
    pub fn empty(apex: OwnerName) -> Self {
        Zone {
            apex,
            records: Vec::new(),
        }
    }

    pub fn apex(&self) -> &OwnerName {
        &self.apex
    }

    /// The records in canonical order.
    pub fn records(&self) -> &[ZoneRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The SOA record, if the zone has one.
    pub fn soa(&self) -> Option<&ZoneRecord> {
        self.records.iter().find(|r| r.rtype == Rtype::SOA)
    }

    /// The minimum field of the SOA record.
    pub fn soa_minimum(&self) -> Option<u32> {
        let rdata = &self.soa()?.rdata;
        let minimum = rdata.get(rdata.len().checked_sub(4)?..)?;
        Some(u32::from_be_bytes(minimum.try_into().ok()?))
    }

    /// A digest over the canonical content of the zone.
    ///
    /// Two zones with the same records have the same digest regardless of
    /// how their zone files were formatted.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for record in &self.records {
            hasher.update(record.owner.to_canonical_vec());
            hasher.update(record.rtype.to_int().to_be_bytes());
            hasher.update(record.ttl.to_be_bytes());
            hasher.update((record.rdata.len() as u16).to_be_bytes());
            hasher.update(&record.rdata);
        }
        base16::encode_string(&hasher.finalize())
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use domain::base::iana::Rtype;

    use crate::error::ErrorKind;
    use crate::name::OwnerName;

    use super::Zone;

    const EXAMPLE: &str = "\
$TTL 3600
@       IN SOA ns1.example.test. hostmaster.example.test. 1 7200 3600 1209600 300
@       NS  ns1
@       MX  10 mail
@       TXT \"v=spf1 mx -all\"
ns1     A   192.0.2.1
mail    A   192.0.2.2
Mail    A   192.0.2.2
";

    fn apex() -> OwnerName {
        "example.test".parse().unwrap()
    }

    fn parse(data: &str) -> Result<Zone, crate::error::Error> {
        Zone::parse(&apex(), data.as_bytes())
    }

    fn rejected(data: &str) {
        let err = parse(data).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidZoneData, "{err}");
    }

    #[test]
    fn parses_and_sorts() {
        let zone = parse(EXAMPLE).unwrap();
        // The two spellings of mail.example.test are the same record.
        assert_eq!(zone.records().len(), 6);
        let first = &zone.records()[0];
        assert_eq!(first.owner, apex());
        assert_eq!(first.rtype, Rtype::NS);
        assert_eq!(first.rdata_text(), "ns1.example.test.");
        assert_eq!(zone.soa_minimum(), Some(300));
        assert_eq!(zone.soa().unwrap().ttl, 3600);
        let mx = zone.records().iter().find(|r| r.rtype == Rtype::MX).unwrap();
        assert_eq!(mx.rdata_text(), "10 mail.example.test.");
    }

    #[test]
    fn digest_ignores_formatting() {
        let zone = parse(EXAMPLE).unwrap();
        let reordered: String = EXAMPLE.lines().rev().collect::<Vec<_>>().join("\n");
        let reordered = format!("$TTL 3600\n@ IN NS ns1\n{reordered}");
        assert_eq!(parse(&reordered).unwrap().digest(), zone.digest());

        let changed = format!("{EXAMPLE}www A 192.0.2.3\n");
        assert_ne!(parse(&changed).unwrap().digest(), zone.digest());
    }

    #[test]
    fn final_newline_is_optional() {
        let zone = parse("www 3600 IN A 192.0.2.1").unwrap();
        assert_eq!(zone.records().len(), 1);
        let terminated = parse("www 3600 IN A 192.0.2.1\n").unwrap();
        assert_eq!(zone.digest(), terminated.digest());
        assert_eq!(
            parse(EXAMPLE.trim_end()).unwrap().digest(),
            parse(EXAMPLE).unwrap().digest()
        );
    }

    #[test]
    fn rejects_unsignable_data() {
        rejected("@ IN A 192.0.2.1 extra\n");
        rejected("www.example.org. 3600 IN A 192.0.2.1\n");
        rejected("@ 3600 CH TXT \"x\"\n");
        rejected("@ 3600 IN DNSKEY 257 3 15 AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=\n");
        rejected("@ 3600 IN DS 1 15 2 00\n");
        rejected("www 3600 IN SOA a. b. 1 2 3 4 5\n");
        rejected("@ 3600 IN SOA a. b. 1 2 3 4 5\n@ 3600 IN SOA a. b. 2 2 3 4 5\n");
        rejected("www 3600 IN CNAME @\nwww 3600 IN A 192.0.2.1\n");
        rejected("www 3600 IN A 192.0.2.1\nwww 300 IN A 192.0.2.2\n");
        rejected("$INCLUDE other.zone\n");
    }

    #[test]
    fn empty_and_delegation_data_is_fine() {
        assert!(parse("").unwrap().is_empty());
        let zone = parse(
            "sub 3600 IN NS ns.sub\nsub 3600 IN DS 1 15 2 00\nns.sub 3600 IN A 192.0.2.9\n",
        )
        .unwrap();
        assert_eq!(zone.records().len(), 3);
        assert_eq!(zone.soa_minimum(), None);
    }
}
