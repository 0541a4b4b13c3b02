//! CA Manager
//!
//! Keeps a named CA bundle present and current. Each call first decides
//! which state the bundle is in and then performs the side effect for that
//! state:
//!
//! ```text
//! not in store              -> Absent    -> create self-signed CA
//! in store, no renewal      -> Unchanged -> at most add the backup label
//! in store, renewal forced  -> Renew     -> new CA cert (same key if it
//!                                           parses), prepended to the chain
//! ```
//!
//! Old CA certificates stay in the chain after a renewal so peers that only
//! trust the previous CA keep validating until the chain pruner drops them
//! after they expire.

use openssl::x509::X509;
use tracing::{error, info};

use crate::bundle::Bundle;
use crate::configs::BackupLabel;
use crate::error::{PkiError, Result};
use crate::factory::{parse_first_certificate, parse_rsa_private_key, CertificateFactory, Issuer};
use crate::pem_codec;
use crate::store::BundleStore;

/// Where a CA bundle stands before any side effect.
#[derive(Debug)]
pub enum CaState {
    Absent,
    Unchanged(Bundle),
    Renew(Bundle),
}

pub struct CaManager<S> {
    store: S,
    factory: CertificateFactory,
    backup_label: BackupLabel,
}

impl<S: BundleStore> CaManager<S> {
    pub fn new(store: S, factory: CertificateFactory, backup_label: BackupLabel) -> Self {
        Self {
            store,
            factory,
            backup_label,
        }
    }

    /// Ensure the CA bundle `name` exists, renewing it when `force_renew`.
    ///
    /// Returns the stored bundle and whether new CA material was written.
    /// Adding a missing backup label does not count as a modification.
    pub fn ensure_ca(
        &self,
        name: &str,
        common_name: &str,
        force_renew: bool,
    ) -> Result<(Bundle, bool)> {
        let state = self.assess(name, force_renew)?;
        self.apply(name, common_name, state)
    }

    pub fn assess(&self, name: &str, force_renew: bool) -> Result<CaState> {
        Ok(match self.store.get(name)? {
            None => CaState::Absent,
            Some(bundle) if force_renew => CaState::Renew(bundle),
            Some(bundle) => CaState::Unchanged(bundle),
        })
    }

    pub fn apply(&self, name: &str, common_name: &str, state: CaState) -> Result<(Bundle, bool)> {
        match state {
            CaState::Absent => {
                let (key_der, cert_der) = self.factory.build_self_signed_ca(common_name, None)?;
                let cert_pem = pem_codec::encode_certificate(&cert_der);
                let key_pem = pem_codec::encode_rsa_private_key(&key_der);
                let bundle = Bundle::new(name, cert_pem.clone(), cert_pem, key_pem)
                    .with_label(&self.backup_label.name, &self.backup_label.value);
                let stored = self.store.create(&bundle).map_err(|e| {
                    error!(name = %name, error = %e, "Failed to create secret");
                    e
                })?;
                info!(name = %name, "CA certificates created");
                Ok((stored, true))
            }
            CaState::Unchanged(bundle) => {
                info!(name = %name, "CA secrets already existed");
                let stored = ensure_backup_label(&self.store, bundle, &self.backup_label)?;
                Ok((stored, false))
            }
            CaState::Renew(bundle) => {
                info!(name = %name, "To renew CA certificates");
                let existing_key = parse_rsa_private_key(&bundle.key);
                if existing_key.is_none() {
                    error!(name = %name, "Wrong private key found, create new one");
                }
                let (key_der, cert_der) = self
                    .factory
                    .build_self_signed_ca(common_name, existing_key)?;
                let cert_pem = pem_codec::encode_certificate(&cert_der);
                let key_pem = pem_codec::encode_rsa_private_key(&key_der);

                let mut chain = cert_pem.clone();
                chain.extend_from_slice(&bundle.ca_chain);

                let renewed = bundle.renewed(chain, cert_pem, key_pem);
                let stored = self.store.update(&renewed).map_err(|e| {
                    error!(name = %name, error = %e, "Failed to update secret");
                    e
                })?;
                info!(name = %name, "CA certificates renewed");
                Ok((stored, true))
            }
        }
    }
}

/// Add the backup label to an existing bundle if it is missing.
pub(crate) fn ensure_backup_label<S: BundleStore>(
    store: &S,
    bundle: Bundle,
    label: &BackupLabel,
) -> Result<Bundle> {
    if bundle.has_label(&label.name) {
        return Ok(bundle);
    }
    let labelled = bundle.with_label(&label.name, &label.value);
    store.update(&labelled)
}

/// Load the active CA certificate, its key and its full chain from the CA
/// bundle `name`.
///
/// Leaves take the whole chain, not just the active CA, so peers that read
/// a leaf's `ca.crt` keep trusting certificates signed by the previous CA
/// until it is pruned.
pub fn load_issuer<S: BundleStore>(store: &S, name: &str) -> Result<(Issuer, Vec<u8>)> {
    let bundle = store.get(name)?.ok_or_else(|| PkiError::MissingCa {
        name: name.to_string(),
        reason: "not found".to_string(),
    })?;
    let cert: X509 = parse_first_certificate(&bundle.cert).ok_or_else(|| {
        error!(name = %name, "Failed to parse ca cert");
        PkiError::MissingCa {
            name: name.to_string(),
            reason: "certificate does not parse".to_string(),
        }
    })?;
    let key = parse_rsa_private_key(&bundle.key).ok_or_else(|| {
        error!(name = %name, "Failed to parse ca key");
        PkiError::MissingCa {
            name: name.to_string(),
            reason: "private key does not parse".to_string(),
        }
    })?;
    Ok((Issuer { cert, key }, bundle.ca_chain))
}
