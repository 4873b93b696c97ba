//! Owned domain names in DNSSEC canonical form.
//!
//! Signing needs names lowercased, compared in the canonical order of
//! RFC 4034 section 6.1 and encoded uncompressed. [`OwnerName`] keeps the
//! labels of a name in that form so that sorting a zone is a plain sort.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use domain::base::name::{Name, ToLabelIter};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::Error;

/// Maximum length of a domain name in wire format.
const MAX_NAME_LEN: usize = 255;

/// Maximum length of a single label.
const MAX_LABEL_LEN: usize = 63;

//------------ OwnerName -----------------------------------------------------

/// An absolute, lowercased domain name.
///
/// Labels are stored most specific first and without the root label.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OwnerName {
    labels: Vec<Box<[u8]>>,
}

impl OwnerName {
    /// The root name.
    pub fn root() -> Self {
        OwnerName { labels: Vec::new() }
    }

    /// Create a name from its labels, most specific first.
    pub fn from_labels<'a>(labels: impl IntoIterator<Item = &'a [u8]>) -> Result<Self, Error> {
        let mut res = Vec::new();
        for label in labels {
            if label.is_empty() {
                return Err("empty label in domain name".into());
            }
            if label.len() > MAX_LABEL_LEN {
                return Err(format!("label longer than {MAX_LABEL_LEN} octets").into());
            }
            res.push(label.to_ascii_lowercase().into_boxed_slice());
        }
        let name = OwnerName { labels: res };
        if name.wire_len() > MAX_NAME_LEN {
            return Err(format!("domain name '{name}' longer than {MAX_NAME_LEN} octets").into());
        }
        Ok(name)
    }

    /// Convert a name of the `domain` crate.
    pub fn from_domain<N: ToLabelIter + ?Sized>(name: &N) -> Result<Self, Error> {
        Self::from_labels(
            name.iter_labels()
                .filter(|label| !label.is_root())
                .map(|label| label.as_slice()),
        )
    }

    /// The number of labels, not counting the root.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// The value of the labels field of an RRSIG covering this owner.
    ///
    /// A leading wildcard label is not counted.
    pub fn rrsig_labels(&self) -> u8 {
        let count = if self.is_wildcard() {
            self.labels.len() - 1
        } else {
            self.labels.len()
        };
        count as u8
    }

    /// Whether the first label is `*`.
    pub fn is_wildcard(&self) -> bool {
        self.labels.first().is_some_and(|label| &label[..] == b"*")
    }

    /// The name one label up, `None` for the root.
    pub fn parent(&self) -> Option<OwnerName> {
        if self.labels.is_empty() {
            None
        } else {
            Some(OwnerName {
                labels: self.labels[1..].to_vec(),
            })
        }
    }

    /// Whether `self` is `other` or below it.
    pub fn ends_with(&self, other: &OwnerName) -> bool {
        self.labels.len() >= other.labels.len()
            && self
                .labels
                .iter()
                .rev()
                .zip(other.labels.iter().rev())
                .all(|(a, b)| a == b)
    }

    /// Whether `self` is strictly below `other`.
    pub fn is_below(&self, other: &OwnerName) -> bool {
        self.labels.len() > other.labels.len() && self.ends_with(other)
    }

    /// Prepend a label to this name.
    pub fn prepend(&self, label: &[u8]) -> Result<OwnerName, Error> {
        Self::from_labels(
            std::iter::once(label).chain(self.labels.iter().map(|label| &label[..])),
        )
    }

    /// The length of the uncompressed wire format.
    pub fn wire_len(&self) -> usize {
        self.labels.iter().map(|label| label.len() + 1).sum::<usize>() + 1
    }

    /// Append the canonical wire format to `target`.
    pub fn compose_canonical(&self, target: &mut Vec<u8>) {
        for label in &self.labels {
            target.push(label.len() as u8);
            target.extend_from_slice(label);
        }
        target.push(0);
    }

    /// The canonical wire format as a new vector.
    pub fn to_canonical_vec(&self) -> Vec<u8> {
        let mut res = Vec::with_capacity(self.wire_len());
        self.compose_canonical(&mut res);
        res
    }

    /// The name without trailing dot, for use in file names.
    ///
    /// A `/` inside a label is written as `\047` so the result is always a
    /// single path component.
    pub fn file_stem(&self) -> String {
        if self.labels.is_empty() {
            return "root".into();
        }
        let name = self.to_string();
        let name = name.strip_suffix('.').unwrap_or(&name);
        name.replace('/', "\\047")
    }
}

//--- Ord

impl Ord for OwnerName {
    /// Canonical DNS name order: compare label sequences from the right,
    /// with absent labels sorting first.
    fn cmp(&self, other: &Self) -> Ordering {
        self.labels.iter().rev().cmp(other.labels.iter().rev())
    }
}

impl PartialOrd for OwnerName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

//--- FromStr and Display

impl FromStr for OwnerName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let name = Name::<Vec<u8>>::from_str(s)
            .map_err(|err| Error::from(format!("invalid domain name '{s}': {err}")))?;
        Self::from_domain(&name)
    }
}

impl fmt::Display for OwnerName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.labels.is_empty() {
            return f.write_str(".");
        }
        for label in &self.labels {
            for &ch in label.iter() {
                match ch {
                    b'.' | b'\\' | b'(' | b')' | b';' | b'"' | b'@' | b'$' => {
                        write!(f, "\\{}", ch as char)?
                    }
                    0x21..=0x7E => write!(f, "{}", ch as char)?,
                    _ => write!(f, "\\{ch:03}")?,
                }
            }
            f.write_str(".")?;
        }
        Ok(())
    }
}

//--- Serialize and Deserialize

impl Serialize for OwnerName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OwnerName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

//------------ Tests ---------------------------------------------------------
