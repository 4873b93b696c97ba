use std::fmt;
use std::{error, io};

use crate::env::{Env, RED};

//------------ Error ---------------------------------------------------------

/// A program error.
///
/// Every error has an [`ErrorKind`] so that callers can tell invariant
/// violations apart from failures that are simply retried next cycle.
pub struct Error {
    info: Box<Information>,
}

/// Information about an error.
struct Information {
    /// The primary error message.
    primary: PrimaryError,

    /// Layers of context to the error.
    ///
    /// Ordered from innermost to outermost.
    context: Vec<Box<str>>,
}

impl Information {
    fn new(kind: ErrorKind, info: &str) -> Self {
        Information {
            primary: PrimaryError::Kind(kind, info.into()),
            context: Vec::new(),
        }
    }

    fn clap(info: clap::Error) -> Self {
        Information {
            primary: PrimaryError::Clap(info),
            context: Vec::new(),
        }
    }
}

#[derive(Debug)]
enum PrimaryError {
    Clap(clap::Error),
    Kind(ErrorKind, Box<str>),
}

impl fmt::Display for PrimaryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimaryError::Clap(e) => e.fmt(f),
            PrimaryError::Kind(_, e) => e.fmt(f),
        }
    }
}

//------------ ErrorKind -----------------------------------------------------

/// The category of an [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ErrorKind {
    /// Generating key material failed (entropy or crypto backend).
    KeyGenerationFailure,

    /// Private key material could not be secured.
    PermissionDenied,

    /// An active key pair is already recorded for the algorithm.
    AlreadyExists,

    /// Signing a particular zone failed.
    SigningFailure,

    /// The unsigned zone data was rejected.
    InvalidZoneData,

    /// Signing was attempted without any active key pair.
    MissingKeys,

    /// The key store references key material that is missing or unreadable.
    StoreCorrupted,

    /// Anything else: I/O, configuration, command line.
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::KeyGenerationFailure => "key generation failure",
            ErrorKind::PermissionDenied => "permission denied",
            ErrorKind::AlreadyExists => "already exists",
            ErrorKind::SigningFailure => "signing failure",
            ErrorKind::InvalidZoneData => "invalid zone data",
            ErrorKind::MissingKeys => "missing keys",
            ErrorKind::StoreCorrupted => "key store corrupted",
            ErrorKind::Other => "error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--- Interaction

impl Error {
    /// Construct a new error from a string.
    pub fn new(error: &str) -> Self {
        Self::with_kind(ErrorKind::Other, error)
    }

    /// Construct a new error of the given kind.
    pub fn with_kind(kind: ErrorKind, error: &str) -> Self {
        Self {
            info: Box::new(Information::new(kind, error)),
        }
    }

    pub fn key_generation(error: impl fmt::Display) -> Self {
        Self::with_kind(ErrorKind::KeyGenerationFailure, &error.to_string())
    }

    pub fn permission_denied(error: impl fmt::Display) -> Self {
        Self::with_kind(ErrorKind::PermissionDenied, &error.to_string())
    }

    pub fn already_exists(error: impl fmt::Display) -> Self {
        Self::with_kind(ErrorKind::AlreadyExists, &error.to_string())
    }

    pub fn signing(error: impl fmt::Display) -> Self {
        Self::with_kind(ErrorKind::SigningFailure, &error.to_string())
    }

    pub fn invalid_zone(error: impl fmt::Display) -> Self {
        Self::with_kind(ErrorKind::InvalidZoneData, &error.to_string())
    }

    pub fn corrupted(error: impl fmt::Display) -> Self {
        Self::with_kind(ErrorKind::StoreCorrupted, &error.to_string())
    }

    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match &self.info.primary {
            PrimaryError::Clap(_) => ErrorKind::Other,
            PrimaryError::Kind(kind, _) => *kind,
        }
    }

    /// Re-categorize this error, keeping message and context.
    pub fn into_kind(mut self, kind: ErrorKind) -> Self {
        if let PrimaryError::Kind(k, _) = &mut self.info.primary {
            *k = kind;
        }
        self
    }

    /// Add context to this error.
    pub fn context(mut self, context: &str) -> Self {
        self.info.context.push(context.into());
        self
    }

    /// Pretty-print this error.
    pub fn pretty_print(&self, env: impl Env) {
        let mut err = env.stderr();

        let info = match &self.info.primary {
            // Clap errors are already styled. We don't want our own pretty
            // styling around that and context does not make sense for command
            // line arguments either. So we just print the styled string that
            // clap produces and return.
            PrimaryError::Clap(e) => {
                writeln!(err, "{}", e.render().ansi());
                return;
            }
            PrimaryError::Kind(_, error) => error,
        };

        let marker = err.colourize(RED, "ERROR:");
        writeln!(err, "[dnskeeper] {marker} {info}");
        for context in &self.info.context {
            writeln!(err, "\n... while {context}");
        }
    }

    pub fn exit_code(&self) -> u8 {
        // Clap uses the exit code 2 for usage errors and 0 for --help and
        // --version, keep those.
        if let PrimaryError::Clap(e) = &self.info.primary {
            e.exit_code() as u8
        } else {
            1
        }
    }
}

//--- Conversions for '?'

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Self::new(error)
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Self::new(&error)
    }
}

impl From<fmt::Error> for Error {
    fn from(error: fmt::Error) -> Self {
        Self::new(&error.to_string())
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        let kind = match error.kind() {
            io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            io::ErrorKind::AlreadyExists => ErrorKind::AlreadyExists,
            _ => ErrorKind::Other,
        };
        Self::with_kind(kind, &error.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        Self::new(&error.to_string())
    }
}

impl From<clap::Error> for Error {
    fn from(value: clap::Error) -> Self {
        Error {
            info: Box::new(Information::clap(value)),
        }
    }
}

//--- Display, Debug

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.info.primary.fmt(f)?;
        for context in &self.info.context {
            write!(f, " (while {context})")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("primary", &self.info.primary)
            .field("context", &self.info.context)
            .finish()
    }
}

//--- Error

impl error::Error for Error {}

//------------ Macros --------------------------------------------------------

// NOTE: Exported macros are placed in the crate root by default.  We hide
// them using 'doc(hidden)' and then manually re-export them here, forcing
// documentation to appear using 'doc(inline)'.

#[doc(inline)]
pub use crate::bail;

#[doc(inline)]
pub use crate::ensure;

/// Return an [`Error`] from the current function.
#[doc(hidden)]
#[macro_export]
macro_rules! bail {
    ($fmt:expr) => {
        return Err($crate::error::Error::new(&format!($fmt)))
    };

    ($fmt:expr, $($args:tt)*) => {
        return Err($crate::error::Error::new(&format!($fmt, $($args)*)))
    };
}

/// Return an [`Error`] if the given condition does not hold.
#[doc(hidden)]
#[macro_export]
macro_rules! ensure {
    ($cond:expr, $fmt:expr) => {
        if !$cond { $crate::error::bail!($fmt); }
    };

    ($cond:expr, $fmt:expr, $($args:tt)*) => {
        if !$cond { $crate::error::bail!($fmt, $($args)*); }
    };
}

//------------ Result --------------------------------------------------------

/// A program result.
pub type Result<T> = core::result::Result<T, Error>;

/// An extension trait for [`Result`]s using [`Error`].
pub trait Context: Sized {
    /// Add context for an error.
    fn context(self, context: &str) -> Self;

    /// Add context for an error, lazily.
    fn with_context(self, context: impl FnOnce() -> String) -> Self;
}

impl<T> Context for Result<T> {
    fn context(self, context: &str) -> Self {
        self.map_err(|err| err.context(context))
    }

    fn with_context(self, context: impl FnOnce() -> String) -> Self {
        self.map_err(|err| err.context(&(context)()))
    }
}

/// Run a closure, adding context to any error it returns.
pub fn in_context<T>(
    context: impl FnOnce() -> String,
    op: impl FnOnce() -> Result<T>,
) -> Result<T> {
    op().with_context(context)
}

#[cfg(test)]
mod tests {
    use std::io;

    use super::{Context, Error, ErrorKind, Result};

    #[test]
    fn io_permission_errors_keep_their_kind() {
        let err = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);

        let err = Error::from(io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn context_is_rendered_outermost_last() {
        let res: Result<()> = Err(Error::signing("bad rdata"));
        let err = res.context("signing a.test").context("renewal pass").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SigningFailure);
        assert_eq!(
            err.to_string(),
            "bad rdata (while signing a.test) (while renewal pass)"
        );
    }
}
