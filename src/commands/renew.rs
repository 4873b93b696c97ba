use std::path::Path;

use crate::env::Env;
use crate::error::Error;

use super::{file_scheduler, load_config, print_report};

#[derive(Clone, Debug, PartialEq, Eq, clap::Args)]
pub struct Renew {
    /// Sign every zone, even those that are still fresh
    #[arg(short = 'f', long = "force")]
    force: bool,
}

impl Renew {
    pub fn execute(self, path: &Path, env: impl Env) -> Result<(), Error> {
        let config = load_config(path)?;
        let scheduler = file_scheduler(&config)?;
        let report = scheduler.tick(env.seconds_since_epoch(), self.force);
        print_report(&env, &report)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    use crate::commands::tests::setup;

    const DAY: u32 = 86400;

    #[test]
    fn renews_when_due() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = setup(dir.path()).args(["renew"]);
        let now = 1_700_000_000;

        let res = cmd.at(now).run();
        assert_eq!(res.exit_code, 0, "{}", res.stderr);
        assert!(res.stdout.contains("example.test.: signed (never signed)"));
        let out = dir.path().join("out");
        let signed = fs::read_to_string(out.join("example.test.signed")).unwrap();
        assert!(signed.contains("\tIN\tNSEC3PARAM\t1 0 0 -"));
        assert!(out.join("example.test.ds").exists());
        assert!(out.join("status.json").exists());

        // Key material stays private.
        for entry in fs::read_dir(dir.path().join("keys")).unwrap() {
            let mode = entry.unwrap().metadata().unwrap().permissions().mode();
            assert_eq!(mode & 0o077, 0);
        }

        let res = cmd.at(now + 20 * DAY).run();
        assert_eq!(res.exit_code, 0);
        assert!(res.stdout.contains("example.test.: fresh until 2023-12-14"));
        assert_eq!(
            fs::read_to_string(out.join("example.test.signed")).unwrap(),
            signed
        );

        let res = cmd.at(now + 29 * DAY).run();
        assert_eq!(res.exit_code, 0);
        assert!(res.stdout.contains("signed (signatures expiring)"));

        let res = cmd.args(["--force"]).at(now + 29 * DAY + 60).run();
        assert!(res.stdout.contains("signed (forced)"));
    }

    #[test]
    fn bad_zone_data_fails_the_pass() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = setup(dir.path()).args(["renew"]);
        fs::write(
            dir.path().join("example.test.zone"),
            "example.test. 3600 IN A 192.0.2.1\nother.test. 3600 IN A 192.0.2.2\n",
        )
        .unwrap();

        let res = cmd.run();
        assert_eq!(res.exit_code, 1);
        assert!(res.stdout.contains("example.test.: failed"));
        assert!(!dir.path().join("out/example.test.signed").exists());
    }
}
