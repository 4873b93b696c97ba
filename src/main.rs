use std::process::ExitCode;

fn main() -> ExitCode {
    let env = dnskeeper::env::RealEnv;
    dnskeeper::run(env).into()
}
