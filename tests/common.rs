use std::path::Path;
use std::process::Output;

/// Run the binary in `dir` with a configuration file in that directory.
#[track_caller]
pub fn dnskeeper(dir: &Path, args: &[&str]) -> Output {
    test_bin::get_test_bin("dnskeeper")
        .current_dir(dir)
        .args(["-c", "dnskeeper.json"])
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .unwrap()
}

pub fn stdout(output: &Output) -> &str {
    std::str::from_utf8(&output.stdout).unwrap()
}

pub fn stderr(output: &Output) -> &str {
    std::str::from_utf8(&output.stderr).unwrap()
}
