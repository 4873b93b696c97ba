use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use domain::utils::base16;
use jiff::{Span, SpanRelativeTo};

use crate::error::Error;
use crate::name::OwnerName;
use crate::signer::nsec3::MAX_SALT_LEN;

const DAY: u64 = 86400;
const HOUR: u64 = 3600;
const MINUTE: u64 = 60;

pub fn parse_name(arg: &str) -> Result<OwnerName, Error> {
    OwnerName::from_str(arg)
}

/// Parse a duration such as `30d`, `1h 30m` or `P30D`.
///
/// Days are taken to be 24 hours.
pub fn parse_duration(value: &str) -> Result<Duration, Error> {
    let span: Span = value
        .parse()
        .map_err(|e| format!("unable to parse {value} as duration: {e}"))?;
    let signeddur = span
        .to_duration(SpanRelativeTo::days_are_24_hours())
        .map_err(|e| format!("unable to convert duration {value}: {e}"))?;
    Duration::try_from(signeddur).map_err(|e| format!("unable to convert duration {value}: {e}").into())
}

/// Format a duration so that [`parse_duration`] reads it back.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        "0s".into()
    } else if secs % DAY == 0 {
        format!("{}d", secs / DAY)
    } else if secs % HOUR == 0 {
        format!("{}h", secs / HOUR)
    } else if secs % MINUTE == 0 {
        format!("{}m", secs / MINUTE)
    } else {
        format!("{secs}s")
    }
}

/// Parse an NSEC3 salt: hex digits, or `-` for no salt.
pub fn parse_salt(value: &str) -> Result<Vec<u8>, Error> {
    if value == "-" {
        return Ok(Vec::new());
    }
    let salt: Vec<u8> =
        base16::decode(value).map_err(|e| format!("invalid NSEC3 salt '{value}': {e}"))?;
    if salt.len() > MAX_SALT_LEN {
        return Err(format!("NSEC3 salt too long, at most {MAX_SALT_LEN} octets").into());
    }
    Ok(salt)
}

//------------ ZoneArg -------------------------------------------------------

/// A zone given on the command line as `<name>=<path>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneArg {
    pub name: OwnerName,
    pub path: PathBuf,
}

impl FromStr for ZoneArg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, path)) = s.split_once('=') else {
            return Err(format!("expected <name>=<path>, got '{s}'").into());
        };
        if path.is_empty() {
            return Err(format!("missing zone file path for {name}").into());
        }
        Ok(ZoneArg {
            name: parse_name(name)?,
            path: path.into(),
        })
    }
}
