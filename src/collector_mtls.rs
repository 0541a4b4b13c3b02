//! Hub collector mTLS bundle
//!
//! The metrics collector running on the hub authenticates with a client
//! certificate obtained through a CSR rather than minted by the leaf
//! manager. The bundle carries the signed certificate and the CSR's key;
//! it is created with an empty chain and updates only replace the
//! certificate and key.

use tracing::{error, info};

use crate::bundle::Bundle;
use crate::configs::CsrConfig;
use crate::error::{PkiError, Result};
use crate::factory::CertificateFactory;
use crate::signer::{ExternalSigner, Usage};
use crate::store::BundleStore;

const COLLECTOR_USAGES: [Usage; 2] = [Usage::DigitalSignature, Usage::ClientAuth];

pub struct CollectorMtls<S, G> {
    store: S,
    signer: G,
    factory: CertificateFactory,
    csr: CsrConfig,
    name: String,
}

impl<S: BundleStore, G: ExternalSigner> CollectorMtls<S, G> {
    pub fn new(
        store: S,
        signer: G,
        factory: CertificateFactory,
        csr: CsrConfig,
        name: impl Into<String>,
    ) -> Self {
        Self {
            store,
            signer,
            factory,
            csr,
            name: name.into(),
        }
    }

    /// Ensure the collector bundle exists. An existing bundle is replaced
    /// with freshly signed material only when `update` is set.
    pub fn ensure(&self, update: bool) -> Result<Bundle> {
        let existing = self.store.get(&self.name)?;
        if let Some(bundle) = &existing {
            if !update {
                info!(name = %self.name, "Hub collector mTLS secret already existed");
                return Ok(bundle.clone());
            }
        }

        let (cert, key) = self.request_certificate()?;
        match existing {
            None => {
                let stored = self
                    .store
                    .create(&Bundle::new(&self.name, Vec::new(), cert, key))
                    .map_err(|e| {
                        error!(name = %self.name, error = %e, "Failed to create secret");
                        e
                    })?;
                info!(name = %self.name, "Hub collector mTLS secret created");
                Ok(stored)
            }
            Some(bundle) => {
                let stored = self
                    .store
                    .update(&bundle.renewed(bundle.ca_chain.clone(), cert, key))
                    .map_err(|e| {
                        error!(name = %self.name, error = %e, "Failed to update secret");
                        e
                    })?;
                info!(name = %self.name, "Hub collector mTLS secret updated");
                Ok(stored)
            }
        }
    }

    fn request_certificate(&self) -> Result<(Vec<u8>, Vec<u8>)> {
        let (csr, key) = self.factory.build_csr(&self.csr)?;
        let signed = self.signer.sign(&csr, &COLLECTOR_USAGES).map_err(|e| {
            error!(name = %self.name, error = %e, "Failed to sign CSR");
            e
        })?;
        if signed.is_empty() {
            return Err(PkiError::Signer {
                name: self.name.clone(),
                reason: "signer returned no certificate".to_string(),
            });
        }
        Ok((signed, key))
    }
}
