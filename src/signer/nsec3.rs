//! NSEC3 chains as defined in RFC 5155.

use std::collections::{BTreeMap, BTreeSet};

use domain::base::iana::Rtype;
use domain::utils::{base16, base32};
use sha1::Sha1;
use sha2::Digest;

use crate::error::Error;
use crate::name::OwnerName;
use crate::zone::ZoneRecord;

/// The only NSEC3 hash algorithm, SHA-1.
pub const NSEC3_SHA1: u8 = 1;

/// Maximum length of an NSEC3 salt.
pub const MAX_SALT_LEN: usize = 255;

//------------ Nsec3Params ---------------------------------------------------

/// Hash parameters of a chain, as published in the NSEC3PARAM record.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Nsec3Params {
    pub iterations: u16,
    pub salt: Vec<u8>,
}

impl Nsec3Params {
    pub fn new(iterations: u16, salt: Vec<u8>) -> Result<Self, Error> {
        if salt.len() > MAX_SALT_LEN {
            return Err(format!("NSEC3 salt longer than {MAX_SALT_LEN} octets").into());
        }
        Ok(Nsec3Params { iterations, salt })
    }

    /// Hash a name: iterated SHA-1 over the name and the salt.
    pub fn hash(&self, name: &OwnerName) -> Vec<u8> {
        let mut digest = Sha1::new()
            .chain_update(name.to_canonical_vec())
            .chain_update(&self.salt)
            .finalize();
        for _ in 0..self.iterations {
            digest = Sha1::new()
                .chain_update(digest)
                .chain_update(&self.salt)
                .finalize();
        }
        digest.to_vec()
    }

    /// The salt in presentation format, `-` if empty.
    pub fn salt_text(&self) -> String {
        salt_text(&self.salt)
    }

    fn compose_head(&self, target: &mut Vec<u8>) {
        target.push(NSEC3_SHA1);
        target.push(0); // Flags, we never opt out.
        target.extend_from_slice(&self.iterations.to_be_bytes());
        target.push(self.salt.len() as u8);
        target.extend_from_slice(&self.salt);
    }

    /// Record data of the NSEC3PARAM record.
    pub fn param_rdata(&self) -> Vec<u8> {
        let mut res = Vec::new();
        self.compose_head(&mut res);
        res
    }

    fn nsec3_rdata(&self, next_hash: &[u8], bitmap: &[u8]) -> Vec<u8> {
        let mut res = Vec::new();
        self.compose_head(&mut res);
        res.push(next_hash.len() as u8);
        res.extend_from_slice(next_hash);
        res.extend_from_slice(bitmap);
        res
    }
}

pub(crate) fn salt_text(salt: &[u8]) -> String {
    if salt.is_empty() {
        "-".into()
    } else {
        base16::encode_string(salt).to_ascii_lowercase()
    }
}

/// The owner name label for a hash.
pub fn hash_label(hash: &[u8]) -> String {
    base32::encode_string_hex(hash).to_ascii_lowercase()
}

//------------ Type bitmaps --------------------------------------------------

/// Encode a set of types as windowed type bitmap (RFC 4034, section 4.1.2).
pub fn type_bitmap(types: impl IntoIterator<Item = Rtype>) -> Vec<u8> {
    let types: BTreeSet<u16> = types.into_iter().map(Rtype::to_int).collect();
    let mut res = Vec::new();
    let mut window: Option<(u8, [u8; 32], usize)> = None;
    for rtype in types {
        let [hi, lo] = rtype.to_be_bytes();
        if window.as_ref().map(|(number, _, _)| *number) != Some(hi) {
            if let Some((number, bits, len)) = window.take() {
                push_window(&mut res, number, &bits[..len]);
            }
            window = Some((hi, [0; 32], 0));
        }
        if let Some((_, bits, len)) = &mut window {
            let octet = usize::from(lo / 8);
            bits[octet] |= 0x80 >> (lo % 8);
            *len = (*len).max(octet + 1);
        }
    }
    if let Some((number, bits, len)) = window {
        push_window(&mut res, number, &bits[..len]);
    }
    res
}

fn push_window(target: &mut Vec<u8>, number: u8, bits: &[u8]) {
    target.push(number);
    target.push(bits.len() as u8);
    target.extend_from_slice(bits);
}

/// Decode a type bitmap, `None` if it is malformed.
pub fn bitmap_types(mut bitmap: &[u8]) -> Option<Vec<Rtype>> {
    let mut res = Vec::new();
    while let [number, len, rest @ ..] = bitmap {
        let len = usize::from(*len);
        if len == 0 || len > 32 || rest.len() < len {
            return None;
        }
        for (i, &octet) in rest[..len].iter().enumerate() {
            for bit in 0..8 {
                if octet & (0x80 >> bit) != 0 {
                    let low = (i * 8 + bit) as u16;
                    res.push(Rtype::from_int((u16::from(*number) << 8) | low));
                }
            }
        }
        bitmap = &rest[len..];
    }
    bitmap.is_empty().then_some(res)
}

//------------ Chain ---------------------------------------------------------

/// Build the NSEC3 records for a zone.
///
/// `nodes` maps every name that needs an NSEC3 record to the types listed
/// in its bitmap. Empty non-terminals between these names and the apex
/// are added with an empty bitmap.
pub fn build_chain(
    apex: &OwnerName,
    mut nodes: BTreeMap<OwnerName, BTreeSet<Rtype>>,
    params: &Nsec3Params,
    ttl: u32,
) -> Result<Vec<ZoneRecord>, Error> {
    let names: Vec<OwnerName> = nodes.keys().cloned().collect();
    for name in names {
        let mut current = name.parent();
        while let Some(parent) = current {
            if !parent.is_below(apex) {
                break;
            }
            current = parent.parent();
            nodes.entry(parent).or_default();
        }
    }

    let mut hashed: Vec<(Vec<u8>, OwnerName, BTreeSet<Rtype>)> = nodes
        .into_iter()
        .map(|(name, types)| (params.hash(&name), name, types))
        .collect();
    hashed.sort_by(|a, b| a.0.cmp(&b.0));

    if let Some(pair) = hashed.windows(2).find(|pair| pair[0].0 == pair[1].0) {
        return Err(Error::signing(format!(
            "NSEC3 hash collision between {} and {}",
            pair[0].1, pair[1].1
        )));
    }

    let mut res = Vec::with_capacity(hashed.len());
    for (i, (hash, name, types)) in hashed.iter().enumerate() {
        let next = &hashed[(i + 1) % hashed.len()].0;
        let owner = apex.prepend(hash_label(hash).as_bytes()).map_err(|err| {
            Error::signing(format!("cannot build NSEC3 owner name for {name}: {err}"))
        })?;
        let bitmap = type_bitmap(types.iter().copied());
        res.push(ZoneRecord {
            owner,
            rtype: Rtype::NSEC3,
            ttl,
            rdata: params.nsec3_rdata(next, &bitmap).into_boxed_slice(),
        });
    }
    Ok(res)
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use domain::base::iana::Rtype;
    use domain::utils::base16;

    use super::*;

    fn name(s: &str) -> OwnerName {
        s.parse().unwrap()
    }

    #[test]
    fn rfc5155_hashes() {
        // From appendix A of RFC 5155.
        let params = Nsec3Params::new(12, vec![0xaa, 0xbb, 0xcc, 0xdd]).unwrap();
        assert_eq!(
            hash_label(&params.hash(&name("example"))),
            "0p9mhaveqvm6t7vbl5lop2u3t2rp3tom"
        );
        assert_eq!(
            hash_label(&params.hash(&name("a.example"))),
            "35mthgpgcu1qg68fab165klnsnk3dpvl"
        );
        assert_eq!(params.salt_text(), "aabbccdd");
        assert_eq!(
            hash_label(&Nsec3Params::default().hash(&name("example.test"))),
            "jbas736chung3bb701jkjdhqkqlhvug7"
        );
    }

    #[test]
    fn bitmaps() {
        // From section 4.3 of RFC 4034.
        let types = [1, 15, 46, 47, 1234].map(Rtype::from_int);
        let bitmap = type_bitmap(types);
        assert_eq!(
            base16::encode_string(&bitmap),
            "0006400100000003041B000000000000000000000000000000000000000000000000000020"
        );
        assert_eq!(bitmap_types(&bitmap).unwrap(), types.to_vec());
        assert!(type_bitmap([]).is_empty());
        assert!(bitmap_types(&[0, 0]).is_none());
    }

    #[test]
    fn chain_adds_empty_non_terminals() {
        let apex = name("example.test");
        let mut nodes = BTreeMap::new();
        nodes.insert(apex.clone(), BTreeSet::from([Rtype::SOA, Rtype::NS]));
        nodes.insert(name("a.b.c.example.test"), BTreeSet::from([Rtype::A]));
        let chain = build_chain(&apex, nodes, &Nsec3Params::default(), 300).unwrap();

        // The apex, a.b.c plus the empty non-terminals b.c and c.
        assert_eq!(chain.len(), 4);
        let hashes: Vec<Vec<u8>> = chain
            .iter()
            .map(|r| {
                let len = usize::from(r.rdata[5]);
                r.rdata[6..6 + len].to_vec()
            })
            .collect();
        let names = [
            "example.test",
            "a.b.c.example.test",
            "b.c.example.test",
            "c.example.test",
        ];
        let mut sorted: Vec<_> = names
            .iter()
            .map(|n| Nsec3Params::default().hash(&name(n)))
            .collect();
        sorted.sort();
        // Every record points at the next hash, the last one at the first.
        assert_eq!(hashes[..3], sorted[1..]);
        assert_eq!(hashes[3], sorted[0]);
        assert!(chain.iter().all(|r| r.ttl == 300 && r.owner.is_below(&apex)));
    }

    #[test]
    fn overlong_owner_names_fail() {
        let label = [b'a'; 60];
        let apex = OwnerName::from_labels([&label[..], &label[..], &label[..], &label[..]]).unwrap();
        let mut nodes = BTreeMap::new();
        nodes.insert(apex.clone(), BTreeSet::new());
        let err = build_chain(&apex, nodes, &Nsec3Params::default(), 0).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::SigningFailure);
    }
}
