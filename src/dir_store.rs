//! Directory-backed bundle store.
//!
//! Each bundle is visible at `<root>/<name>/` as the three blobs the TLS
//! consumers mount (`ca.crt`, `tls.crt`, `tls.key`) plus a `meta.json` with
//! the labels and the version used for optimistic concurrency.
//!
//! `<root>/<name>` is a symlink to a per-version directory
//! `<root>/.<name>.v<version>`. A write stages every file of the next
//! version in a fresh directory and then renames a new link over the old
//! one, so readers see either the old bundle or the new one and never a
//! mix. Writers of the same bundle serialize on `<root>/.<name>.lock`,
//! which makes the version check and the swap one step. A lock left behind
//! by a killed process has to be removed by hand; the error names the file.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::symlink;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::bundle::Bundle;
use crate::error::{PkiError, Result};
use crate::store::BundleStore;

pub const CA_FILE: &str = "ca.crt";
pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";
const META_FILE: &str = "meta.json";

const LOCK_ATTEMPTS: u32 = 250;
const LOCK_RETRY_DELAY: Duration = Duration::from_millis(20);
/// A reader racing a writer may find its version directory already gone.
const READ_ATTEMPTS: u32 = 5;

#[derive(Debug, Serialize, Deserialize)]
struct BundleMeta {
    version: u64,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| PkiError::store(&root.display().to_string(), e))?;
        Ok(DirStore { root })
    }

    /// Path the consumers mount. It always resolves to the current version.
    pub fn bundle_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Directory of the current version, `None` if the bundle does not exist.
    fn current_dir(&self, name: &str) -> Result<Option<PathBuf>> {
        match fs::read_link(self.bundle_dir(name)) {
            Ok(target) => Ok(Some(self.root.join(target))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PkiError::store(name, format!("not a versioned bundle link: {}", e))),
        }
    }

    /// Read one version directory. `Ok(None)` when it vanished mid-read.
    fn read_version(&self, name: &str, dir: &Path) -> Result<Option<Bundle>> {
        let Some(raw_meta) = read_file(dir, META_FILE, name)? else {
            return Ok(None);
        };
        let meta: BundleMeta = serde_json::from_slice(&raw_meta)
            .map_err(|e| PkiError::store(name, format!("corrupt {}: {}", META_FILE, e)))?;
        let (Some(ca_chain), Some(cert), Some(key)) = (
            read_file(dir, CA_FILE, name)?,
            read_file(dir, CERT_FILE, name)?,
            read_file(dir, KEY_FILE, name)?,
        ) else {
            return Ok(None);
        };
        Ok(Some(Bundle {
            name: name.to_string(),
            ca_chain,
            cert,
            key,
            labels: meta.labels,
            version: Some(meta.version),
        }))
    }

    /// Stage `bundle` as `version` and switch the bundle link to it. The
    /// caller holds the bundle's lock.
    fn publish(&self, bundle: &Bundle, version: u64, previous: Option<PathBuf>) -> Result<Bundle> {
        let name = &bundle.name;
        let staged_name = format!(".{}.v{}", name, version);
        let staged = self.root.join(&staged_name);
        remove_if_present(&staged, name, |p| fs::remove_dir_all(p))?;
        fs::create_dir(&staged).map_err(|e| PkiError::store(name, e))?;

        let meta = BundleMeta {
            version,
            labels: bundle.labels.clone(),
        };
        let raw_meta = serde_json::to_vec_pretty(&meta).map_err(|e| PkiError::store(name, e))?;
        for (file, data) in [
            (CA_FILE, &bundle.ca_chain),
            (CERT_FILE, &bundle.cert),
            (KEY_FILE, &bundle.key),
            (META_FILE, &raw_meta),
        ] {
            fs::write(staged.join(file), data).map_err(|e| PkiError::store(name, e))?;
        }

        let link_tmp = self.root.join(format!(".{}.link", name));
        remove_if_present(&link_tmp, name, |p| fs::remove_file(p))?;
        symlink(&staged_name, &link_tmp).map_err(|e| PkiError::store(name, e))?;
        fs::rename(&link_tmp, self.bundle_dir(name)).map_err(|e| PkiError::store(name, e))?;
        debug!(name = %name, version, "Bundle written");

        if let Some(previous) = previous {
            if let Err(e) = fs::remove_dir_all(&previous) {
                warn!(name = %name, path = %previous.display(), error = %e, "Failed to remove previous bundle version");
            }
        }

        let mut stored = bundle.clone();
        stored.version = Some(version);
        Ok(stored)
    }

    fn lock(&self, name: &str) -> Result<BundleLock> {
        BundleLock::acquire(self.root.join(format!(".{}.lock", name)), name)
    }
}

/// Exclusive writer lock on one bundle, released on drop.
struct BundleLock {
    path: PathBuf,
}

impl BundleLock {
    fn acquire(path: PathBuf, name: &str) -> Result<Self> {
        for _ in 0..LOCK_ATTEMPTS {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => return Ok(BundleLock { path }),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => thread::sleep(LOCK_RETRY_DELAY),
                Err(e) => return Err(PkiError::store(name, e)),
            }
        }
        Err(PkiError::store(
            name,
            format!("lock {} is held by another writer", path.display()),
        ))
    }
}

impl Drop for BundleLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to release bundle lock");
        }
    }
}

fn read_file(dir: &Path, file: &str, name: &str) -> Result<Option<Vec<u8>>> {
    match fs::read(dir.join(file)) {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PkiError::store(name, e)),
    }
}

fn remove_if_present(
    path: &Path,
    name: &str,
    remove: fn(&Path) -> std::io::Result<()>,
) -> Result<()> {
    match remove(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PkiError::store(name, e)),
    }
}

impl BundleStore for DirStore {
    fn get(&self, name: &str) -> Result<Option<Bundle>> {
        for _ in 0..READ_ATTEMPTS {
            let Some(dir) = self.current_dir(name)? else {
                return Ok(None);
            };
            if let Some(bundle) = self.read_version(name, &dir)? {
                return Ok(Some(bundle));
            }
        }
        Err(PkiError::store(name, "bundle kept changing while being read"))
    }

    fn create(&self, bundle: &Bundle) -> Result<Bundle> {
        let _lock = self.lock(&bundle.name)?;
        if self.current_dir(&bundle.name)?.is_some() {
            return Err(PkiError::AlreadyExists {
                name: bundle.name.clone(),
            });
        }
        self.publish(bundle, 1, None)
    }

    fn update(&self, bundle: &Bundle) -> Result<Bundle> {
        let _lock = self.lock(&bundle.name)?;
        let dir = self
            .current_dir(&bundle.name)?
            .ok_or_else(|| PkiError::store(&bundle.name, "bundle does not exist"))?;
        let current = self
            .read_version(&bundle.name, &dir)?
            .ok_or_else(|| PkiError::store(&bundle.name, "current version is incomplete"))?;
        if current.version != bundle.version {
            return Err(PkiError::Conflict {
                name: bundle.name.clone(),
            });
        }
        let next = current.version.unwrap_or_default() + 1;
        self.publish(bundle, next, Some(dir))
    }
}
