use std::borrow::Cow;
use std::ffi::OsString;
use std::fmt;
use std::io;
use std::ops::DerefMut;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;

#[cfg(test)]
pub mod fake;

mod real;
pub use real::RealEnv;

pub const RED: u8 = 31;
pub const YELLOW: u8 = 33;
pub const GREEN: u8 = 32;

pub trait Env {
    /// Get an iterator over the command line arguments passed to the program
    ///
    /// Equivalent to [`std::env::args_os`]
    fn args_os(&self) -> impl Iterator<Item = OsString>;

    /// Get a reference to stdout
    ///
    /// Equivalent to [`std::io::stdout`]
    fn stdout(&self) -> Stream<impl io::Write>;

    /// Get a reference to stderr
    ///
    /// Equivalent to [`std::io::stderr`]
    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static>;

    /// Make relative paths absolute.
    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path>;

    /// Get the number of seconds since the UNIX epoch.
    ///
    /// This is the only clock the signing and renewal logic consults.
    fn seconds_since_epoch(&self) -> u32;
}

/// A type with an infallible `write_fmt` method for use with [`write!`] macros
///
/// This ensures that we don't have to `use` either [`std::fmt::Write`] or
/// [`std::io::Write`]. Additionally, this `write_fmt` does not return a
/// result. This means that we can use the [`write!`] and [`writeln`] macros
/// without handling errors.
pub struct Stream<T: io::Write> {
    writer: Mutex<T>,
    is_terminal: bool,
}

impl<T: io::Write> Stream<T> {
    pub fn new(writer: T, is_terminal: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            is_terminal,
        }
    }
}

impl<'writer, T: io::Write + 'writer> MakeWriter<'writer> for Stream<T> {
    type Writer = &'writer Self;

    fn make_writer(&'writer self) -> Self::Writer {
        self
    }
}

impl<T: io::Write> io::Write for &Stream<T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .deref_mut()
            .write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .deref_mut()
            .flush()
    }
}

impl<T: io::Write> Stream<T> {
    pub fn write_fmt(&mut self, args: fmt::Arguments<'_>) {
        // Errors are ignored, just like `println!` panics are not something
        // we can recover from anyway. If writing to stdout fails, a graceful
        // exit is out of reach.
        let _ = self
            .writer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .deref_mut()
            .write_fmt(args);
    }

    pub fn is_terminal(&self) -> bool {
        self.is_terminal
    }

    /// Wrap the text in an ANSI colour if this stream is a terminal.
    pub fn colourize<'a>(&self, colour: u8, text: &'a str) -> Cow<'a, str> {
        if self.is_terminal {
            format!("\x1B[{colour}m{text}\x1B[0m").into()
        } else {
            text.into()
        }
    }
}

impl<E: Env> Env for &E {
    fn args_os(&self) -> impl Iterator<Item = OsString> {
        (**self).args_os()
    }

    fn stdout(&self) -> Stream<impl io::Write> {
        (**self).stdout()
    }

    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static> {
        (**self).stderr()
    }

    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path> {
        (**self).in_cwd(path)
    }

    fn seconds_since_epoch(&self) -> u32 {
        (**self).seconds_since_epoch()
    }
}
