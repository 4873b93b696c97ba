pub mod args;
pub mod commands;
pub mod config;
pub mod env;
pub mod error;
pub mod keygen;
pub mod keys;
pub mod keystore;
pub mod log;
pub mod name;
pub mod parse;
pub mod publish;
pub mod scheduler;
pub mod signer;
pub mod util;
pub mod zone;

use clap::Parser;

pub use args::Args;
use env::Env;
use error::Error;

pub fn parse_args(env: impl Env) -> Result<Args, Error> {
    Args::try_parse_from(env.args_os()).map_err(Into::into)
}

/// Run the program in the given environment and return the exit code.
pub fn run(env: impl Env) -> u8 {
    let args = match parse_args(&env) {
        Ok(args) => args,
        Err(err) => {
            err.pretty_print(&env);
            return err.exit_code();
        }
    };

    let _guard = log::init(&env, args.log_level);
    match args.execute(&env) {
        Ok(()) => 0,
        Err(err) => {
            err.pretty_print(&env);
            err.exit_code()
        }
    }
}
