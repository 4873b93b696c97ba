//! The durable store of key material.
//!
//! Per algorithm the store holds a marker file `<ALGORITHM>.conf` naming
//! the active KSK and ZSK. The key files themselves use the BIND naming
//! scheme, `K<alg>+<tag>.private` and `K<alg>+<tag>.key`.
//!
//! Key files are written before the marker, and the marker is created with
//! an atomic no-clobber rename. A marker is therefore either absent or
//! complete, and once present it is never replaced.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::error::{Error, ErrorKind};
use crate::keys::{Algorithm, KeyRole, SigningKey, SigningKeyPair};
use crate::util::{self, OWNER_ONLY, PRIVATE_DIR};

//------------ KeyStoreRecord ------------------------------------------------

/// The persisted marker of the active key pair of an algorithm.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct KeyStoreRecord {
    pub algorithm: Algorithm,
    pub ksk: String,
    pub zsk: String,
    pub created: u32,
}

//------------ KeyStore ------------------------------------------------------

#[derive(Debug)]
pub struct KeyStore {
    root: PathBuf,
}

impl KeyStore {
    /// Open the store, creating its directory if necessary.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, Error> {
        let root = root.into();
        util::create_dir(&root, PRIVATE_DIR)?;
        Ok(KeyStore { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn marker_path(&self, algorithm: Algorithm) -> PathBuf {
        self.root.join(format!("{algorithm}.conf"))
    }

    fn key_path(&self, identifier: &str, extension: &str) -> PathBuf {
        self.root.join(format!("{identifier}.{extension}"))
    }

    /// The marker for an algorithm, if there is one.
    pub fn record(&self, algorithm: Algorithm) -> Result<Option<KeyStoreRecord>, Error> {
        let path = self.marker_path(algorithm);
        if !path.exists() {
            return Ok(None);
        }
        let json = util::read_owner_only(&path)?;
        let record: KeyStoreRecord = serde_json::from_str(&json).map_err(|err| {
            Error::corrupted(format!("cannot parse '{}': {err}", path.display()))
        })?;
        if record.algorithm != algorithm {
            return Err(Error::corrupted(format!(
                "'{}' is for algorithm {}",
                path.display(),
                record.algorithm
            )));
        }
        Ok(Some(record))
    }

    /// The active key pair for an algorithm.
    ///
    /// A marker whose key files are missing or unreadable is reported as
    /// [`ErrorKind::StoreCorrupted`] and left alone.
    pub fn get_active_key_pair(
        &self,
        algorithm: Algorithm,
    ) -> Result<Option<SigningKeyPair>, Error> {
        let Some(record) = self.record(algorithm)? else {
            return Ok(None);
        };
        let ksk = self.load_key(&record.ksk, KeyRole::Ksk, algorithm)?;
        let zsk = self.load_key(&record.zsk, KeyRole::Zsk, algorithm)?;
        SigningKeyPair::new(ksk, zsk, record.created)
            .map(Some)
            .map_err(|err| err.into_kind(ErrorKind::StoreCorrupted))
    }

    fn load_key(
        &self,
        identifier: &str,
        role: KeyRole,
        algorithm: Algorithm,
    ) -> Result<SigningKey, Error> {
        let path = self.key_path(identifier, "private");
        if !path.exists() {
            return Err(Error::corrupted(format!(
                "{algorithm} {role} '{}' is missing",
                path.display()
            )));
        }
        let public = self.key_path(identifier, "key");
        if public.exists() {
            util::ensure_owner_only(&public)?;
        }
        let text = util::read_owner_only(&path)?;
        let key = SigningKey::from_bind_private(role, &text)
            .map_err(|err| err.context(&format!("loading '{}'", path.display())))?;
        if key.algorithm() != algorithm || key.identifier() != identifier {
            return Err(Error::corrupted(format!(
                "'{}' contains {} instead",
                path.display(),
                key.identifier()
            )));
        }
        Ok(key)
    }

    /// Install the active key pair for an algorithm.
    ///
    /// Fails with [`ErrorKind::AlreadyExists`] if the algorithm has a
    /// marker already, including one created concurrently.
    pub fn put_active_key_pair(
        &self,
        algorithm: Algorithm,
        pair: &SigningKeyPair,
    ) -> Result<(), Error> {
        if pair.algorithm() != algorithm {
            return Err(format!(
                "cannot install a {} key pair as {algorithm}",
                pair.algorithm()
            )
            .into());
        }
        let marker = self.marker_path(algorithm);
        if marker.exists() {
            return Err(Error::already_exists(format!(
                "{algorithm} already has an active key pair"
            )));
        }

        let mut written = Vec::new();
        let res = self.write_pair(pair, &mut written).and_then(|_| {
            let record = KeyStoreRecord {
                algorithm,
                ksk: pair.ksk().identifier(),
                zsk: pair.zsk().identifier(),
                created: pair.created(),
            };
            let json = serde_json::to_string_pretty(&record)?;
            util::write_new_atomic(&marker, json.as_bytes(), OWNER_ONLY)
        });

        match res {
            Ok(()) => {
                info!(
                    "installed {algorithm} key pair {} (KSK) and {} (ZSK)",
                    pair.ksk().identifier(),
                    pair.zsk().identifier()
                );
                Ok(())
            }
            Err(err) => {
                self.remove_unreferenced(algorithm, &written);
                if err.kind() == ErrorKind::AlreadyExists {
                    Err(Error::already_exists(format!(
                        "{algorithm} got an active key pair concurrently"
                    )))
                } else {
                    Err(err.context(&format!("installing {algorithm} key pair")))
                }
            }
        }
    }

    fn write_pair(&self, pair: &SigningKeyPair, written: &mut Vec<PathBuf>) -> Result<(), Error> {
        for key in pair.keys() {
            let id = key.identifier();
            let private = self.key_path(&id, "private");
            let public = self.key_path(&id, "key");
            if private.exists() || public.exists() {
                return Err(Error::already_exists(format!(
                    "key files for {id} exist already"
                )));
            }

            util::write_new_atomic(&private, key.to_bind_private()?.as_bytes(), OWNER_ONLY)?;
            written.push(private);
            let text = format!(
                "; {} {id}, created {}\n{}\n",
                key.role(),
                pair.created(),
                key.dnskey_text()
            );
            util::write_new_atomic(&public, text.as_bytes(), OWNER_ONLY)?;
            written.push(public);
        }
        Ok(())
    }

    /// Clean up key files of a failed install.
    fn remove_unreferenced(&self, algorithm: Algorithm, paths: &[PathBuf]) {
        let referenced = match self.record(algorithm) {
            Ok(Some(record)) => vec![record.ksk, record.zsk],
            _ => Vec::new(),
        };
        for path in paths {
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if referenced.iter().any(|id| id == stem) {
                continue;
            }
            if let Err(err) = fs::remove_file(path) {
                error!("cannot remove '{}': {err}", path.display());
            }
        }
    }

    /// Take the provisioning lock of an algorithm.
    ///
    /// Blocks until no other process holds it.
    pub fn lock(&self, algorithm: Algorithm) -> Result<AlgorithmLock, Error> {
        let path = self.root.join(format!(".{algorithm}.lock"));
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .mode(OWNER_ONLY)
            .open(&path)
            .map_err(|err| Error::from(err).context(&format!("opening '{}'", path.display())))?;
        file.lock_exclusive()
            .map_err(|err| Error::from(err).context(&format!("locking '{}'", path.display())))?;
        debug!("locked '{}'", path.display());
        Ok(AlgorithmLock { file })
    }
}

//------------ AlgorithmLock -------------------------------------------------

/// An exclusive lock on provisioning an algorithm, released on drop.
#[derive(Debug)]
pub struct AlgorithmLock {
    file: File,
}

impl Drop for AlgorithmLock {
    fn drop(&mut self) {
        let _: io::Result<()> = FileExt::unlock(&self.file);
    }
}

//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::fs::{self, Permissions};
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    use crate::error::ErrorKind;
    use crate::keys::Algorithm;
    use crate::signer::tests::key_pair;

    use super::KeyStore;

    fn mode(path: &Path) -> u32 {
        fs::metadata(path).unwrap().permissions().mode() & 0o777
    }

    fn count(dir: &Path, extension: &str) -> usize {
        fs::read_dir(dir)
            .unwrap()
            .filter(|entry| {
                entry.as_ref().unwrap().path().extension().and_then(|e| e.to_str())
                    == Some(extension)
            })
            .count()
    }

    #[test]
    fn open_creates_private_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("keys");
        let store = KeyStore::open(&root).unwrap();
        assert_eq!(store.root(), root);
        assert_eq!(mode(&root), 0o700);
        assert!(store.get_active_key_pair(Algorithm::Ed25519).unwrap().is_none());
    }

    #[test]
    fn put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let pair = key_pair(Algorithm::Ed25519, 0);
        store.put_active_key_pair(Algorithm::Ed25519, &pair).unwrap();

        let loaded = store.get_active_key_pair(Algorithm::Ed25519).unwrap().unwrap();
        assert_eq!(loaded, pair);
        assert_eq!(count(dir.path(), "private"), 2);
        assert_eq!(count(dir.path(), "key"), 2);
        for entry in fs::read_dir(dir.path()).unwrap() {
            assert_eq!(mode(&entry.unwrap().path()), 0o600);
        }

        let record = store.record(Algorithm::Ed25519).unwrap().unwrap();
        assert_eq!(record.ksk, pair.ksk().identifier());
        assert!(dir.path().join("ED25519.conf").exists());
    }

    #[test]
    fn never_replaces_a_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let first = key_pair(Algorithm::Ed25519, 0);
        store.put_active_key_pair(Algorithm::Ed25519, &first).unwrap();

        let second = key_pair(Algorithm::Ed25519, 0);
        let err = store
            .put_active_key_pair(Algorithm::Ed25519, &second)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(
            store.get_active_key_pair(Algorithm::Ed25519).unwrap().unwrap(),
            first
        );
        assert_eq!(count(dir.path(), "private"), 2);
    }

    #[test]
    fn missing_key_files_are_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let pair = key_pair(Algorithm::Ed25519, 0);
        store.put_active_key_pair(Algorithm::Ed25519, &pair).unwrap();
        fs::remove_file(dir.path().join(format!("{}.private", pair.zsk().identifier()))).unwrap();

        let err = store.get_active_key_pair(Algorithm::Ed25519).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreCorrupted);
        // The marker stays and still blocks a new pair.
        let err = store
            .put_active_key_pair(Algorithm::Ed25519, &key_pair(Algorithm::Ed25519, 0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn loose_permissions_are_tightened() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        let pair = key_pair(Algorithm::Ed25519, 0);
        store.put_active_key_pair(Algorithm::Ed25519, &pair).unwrap();
        let private = dir.path().join(format!("{}.private", pair.ksk().identifier()));
        fs::set_permissions(&private, Permissions::from_mode(0o644)).unwrap();

        store.get_active_key_pair(Algorithm::Ed25519).unwrap().unwrap();
        assert_eq!(mode(&private), 0o600);
    }

    #[test]
    fn locks_are_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyStore::open(dir.path()).unwrap();
        drop(store.lock(Algorithm::RsaSha256).unwrap());
        let _lock = store.lock(Algorithm::RsaSha256).unwrap();
        assert!(dir.path().join(".RSASHA256.lock").exists());
    }
}
