use std::borrow::Cow;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::{fmt, io};

use crate::error::Error;
use crate::{parse_args, run, Args};

use super::{Env, Stream};

/// A command to run in a [`FakeEnv`]
///
/// This is used for testing the commands, running the real code in a fake
/// environment.
#[derive(Clone)]
pub struct FakeCmd {
    /// The command to run, including `argv[0]`
    cmd: Vec<OsString>,
    cwd: Option<PathBuf>,
    now: u32,
}

/// The result of running a [`FakeCmd`]
///
/// The fields are public to allow for easy assertions in tests.
#[derive(Debug)]
pub struct FakeResult {
    pub exit_code: u8,
    pub stdout: String,
    pub stderr: String,
}

/// An environment that mocks interaction with the outside world
pub struct FakeEnv {
    /// Description of the command being run
    pub cmd: FakeCmd,

    /// The mocked stdout
    pub stdout: FakeStream,

    /// The mocked stderr
    pub stderr: FakeStream,

    /// The mocked clock
    pub now: AtomicU32,
}

impl Env for FakeEnv {
    fn args_os(&self) -> impl Iterator<Item = OsString> {
        self.cmd.cmd.iter().map(Into::into)
    }

    fn stdout(&self) -> Stream<impl io::Write> {
        Stream::new(self.stdout.clone(), false)
    }

    fn stderr(&self) -> Stream<impl io::Write + Send + Sync + 'static> {
        Stream::new(self.stderr.clone(), false)
    }

    fn in_cwd<'a>(&self, path: &'a impl AsRef<Path>) -> Cow<'a, Path> {
        match &self.cmd.cwd {
            Some(cwd) => cwd.join(path).into(),
            None => path.as_ref().into(),
        }
    }

    fn seconds_since_epoch(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

impl FakeCmd {
    /// Construct a new [`FakeCmd`] with a given command.
    ///
    /// The command can consist of multiple strings to specify a subcommand.
    pub fn new<S: Into<OsString>>(cmd: impl IntoIterator<Item = S>) -> Self {
        Self {
            cmd: cmd.into_iter().map(Into::into).collect(),
            cwd: None,
            now: 1_700_000_000,
        }
    }

    pub fn cwd(&self, path: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(path.as_ref().to_path_buf()),
            ..self.clone()
        }
    }

    /// Run with the clock set to the given number of seconds since the epoch.
    pub fn at(&self, now: u32) -> Self {
        Self { now, ..self.clone() }
    }

    /// Add arguments to a clone of the [`FakeCmd`]
    ///
    /// ```rust,ignore
    /// let cmd = FakeCmd::new(["dnskeeper", "-c", "conf.json"])
    /// let sub1 = cmd.args(["renew"]);  // dnskeeper -c conf.json renew
    /// let sub2 = cmd.args(["status"]); // dnskeeper -c conf.json status
    /// ```
    pub fn args<S: Into<OsString>>(&self, args: impl IntoIterator<Item = S>) -> Self {
        let mut new = self.clone();
        new.cmd.extend(args.into_iter().map(Into::into));
        new
    }

    /// Parse the arguments of this [`FakeCmd`] and return the result
    pub fn parse(&self) -> Result<Args, Error> {
        let env = self.env();
        parse_args(env)
    }

    /// Run the [`FakeCmd`] in a [`FakeEnv`], returning a [`FakeResult`]
    pub fn run(&self) -> FakeResult {
        let env = self.env();

        let exit_code = run(&env);

        FakeResult {
            exit_code,
            stdout: env.get_stdout(),
            stderr: env.get_stderr(),
        }
    }

    fn env(&self) -> FakeEnv {
        FakeEnv {
            cmd: self.clone(),
            stdout: Default::default(),
            stderr: Default::default(),
            now: AtomicU32::new(self.now),
        }
    }
}

impl FakeEnv {
    pub fn get_stdout(&self) -> String {
        self.stdout.to_string()
    }

    pub fn get_stderr(&self) -> String {
        self.stderr.to_string()
    }
}

/// A type to used to mock stdout and stderr
#[derive(Clone, Default)]
pub struct FakeStream(Arc<Mutex<Vec<u8>>>);

impl io::Write for FakeStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        // do nothing
        Ok(())
    }
}

impl fmt::Display for FakeStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0.lock().unwrap()))
    }
}
