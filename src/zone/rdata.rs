//! Presentation format of record data.
//!
//! Record data is kept in canonical wire format. The types a mail domain
//! typically carries are rendered in their usual text form with absolute
//! names; everything else uses the generic format of RFC 3597.

use std::fmt::Write as _;
use std::net::{Ipv4Addr, Ipv6Addr};

use domain::base::iana::Rtype;
use domain::utils::{base16, base64};

use crate::name::OwnerName;
use crate::signer::nsec3::{bitmap_types, hash_label, salt_text};

/// Render canonical record data of the given type.
pub fn to_text(rtype: Rtype, rdata: &[u8]) -> String {
    known_to_text(rtype, rdata).unwrap_or_else(|| generic(rdata))
}

/// The RFC 3597 generic form, `\# <len> <hex>`.
pub fn generic(rdata: &[u8]) -> String {
    if rdata.is_empty() {
        "\\# 0".into()
    } else {
        format!("\\# {} {}", rdata.len(), base16::encode_string(rdata))
    }
}

fn known_to_text(rtype: Rtype, rdata: &[u8]) -> Option<String> {
    let mut parser = Parser { data: rdata, pos: 0 };
    let res = match rtype {
        Rtype::A => Ipv4Addr::from(parser.array::<4>()?).to_string(),
        Rtype::AAAA => Ipv6Addr::from(parser.array::<16>()?).to_string(),
        Rtype::NS | Rtype::CNAME | Rtype::PTR | Rtype::DNAME => parser.name()?.to_string(),
        Rtype::SOA => format!(
            "{} {} {} {} {} {} {}",
            parser.name()?,
            parser.name()?,
            parser.u32()?,
            parser.u32()?,
            parser.u32()?,
            parser.u32()?,
            parser.u32()?
        ),
        Rtype::MX => format!("{} {}", parser.u16()?, parser.name()?),
        Rtype::SRV => format!(
            "{} {} {} {}",
            parser.u16()?,
            parser.u16()?,
            parser.u16()?,
            parser.name()?
        ),
        Rtype::TXT => {
            let mut res = String::new();
            while !parser.is_done() {
                if !res.is_empty() {
                    res.push(' ');
                }
                let len = usize::from(parser.u8()?);
                quoted(&mut res, parser.take(len)?);
            }
            if res.is_empty() {
                return None;
            }
            res
        }
        Rtype::DS => format!(
            "{} {} {} {}",
            parser.u16()?,
            parser.u8()?,
            parser.u8()?,
            base16::encode_string(parser.rest())
        ),
        Rtype::TLSA => format!(
            "{} {} {} {}",
            parser.u8()?,
            parser.u8()?,
            parser.u8()?,
            base16::encode_string(parser.rest())
        ),
        Rtype::CAA => {
            let flags = parser.u8()?;
            let len = usize::from(parser.u8()?);
            let tag = parser.take(len)?;
            if tag.is_empty() || !tag.iter().all(u8::is_ascii_alphanumeric) {
                return None;
            }
            let mut res = format!("{flags} {} ", String::from_utf8_lossy(tag));
            quoted(&mut res, parser.rest());
            res
        }
        Rtype::DNSKEY => format!(
            "{} {} {} {}",
            parser.u16()?,
            parser.u8()?,
            parser.u8()?,
            base64::encode_string(parser.rest())
        ),
        Rtype::RRSIG => format!(
            "{} {} {} {} {} {} {} {} {}",
            Rtype::from_int(parser.u16()?),
            parser.u8()?,
            parser.u8()?,
            parser.u32()?,
            timestamp(parser.u32()?)?,
            timestamp(parser.u32()?)?,
            parser.u16()?,
            parser.name()?,
            base64::encode_string(parser.rest())
        ),
        Rtype::NSEC3PARAM => format!(
            "{} {} {} {}",
            parser.u8()?,
            parser.u8()?,
            parser.u16()?,
            parser.salt()?
        ),
        Rtype::NSEC3 => {
            let mut res = format!(
                "{} {} {} {} ",
                parser.u8()?,
                parser.u8()?,
                parser.u16()?,
                parser.salt()?
            );
            let len = usize::from(parser.u8()?);
            res.push_str(&hash_label(parser.take(len)?));
            for rtype in bitmap_types(parser.rest())? {
                let _ = write!(res, " {rtype}");
            }
            res
        }
        _ => return None,
    };
    parser.is_done().then_some(res)
}

/// An RRSIG timestamp as `YYYYMMDDHHmmSS`.
fn timestamp(secs: u32) -> Option<String> {
    let ts = jiff::Timestamp::from_second(i64::from(secs)).ok()?;
    Some(ts.strftime("%Y%m%d%H%M%S").to_string())
}

/// Append a quoted character string.
fn quoted(target: &mut String, data: &[u8]) {
    target.push('"');
    for &ch in data {
        match ch {
            b'"' | b'\\' => {
                target.push('\\');
                target.push(ch as char);
            }
            0x20..=0x7E => target.push(ch as char),
            _ => {
                let _ = write!(target, "\\{ch:03}");
            }
        }
    }
    target.push('"');
}

struct Parser<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let res = self.data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(res)
    }

    fn array<const N: usize>(&mut self) -> Option<[u8; N]> {
        self.take(N)?.try_into().ok()
    }

    fn u8(&mut self) -> Option<u8> {
        self.array::<1>().map(|[v]| v)
    }

    fn u16(&mut self) -> Option<u16> {
        self.array().map(u16::from_be_bytes)
    }

    fn u32(&mut self) -> Option<u32> {
        self.array().map(u32::from_be_bytes)
    }

    fn rest(&mut self) -> &'a [u8] {
        let res = &self.data[self.pos..];
        self.pos = self.data.len();
        res
    }

    fn is_done(&self) -> bool {
        self.pos == self.data.len()
    }

    fn salt(&mut self) -> Option<String> {
        let len = usize::from(self.u8()?);
        self.take(len).map(salt_text)
    }

    /// An uncompressed name.
    fn name(&mut self) -> Option<OwnerName> {
        let mut labels = Vec::new();
        loop {
            let len = usize::from(self.u8()?);
            if len == 0 {
                break;
            }
            if len > 63 {
                return None;
            }
            labels.push(self.take(len)?);
        }
        OwnerName::from_labels(labels).ok()
    }
}
