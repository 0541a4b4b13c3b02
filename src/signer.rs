//! CSR signing
//!
//! The hub collector's client certificate is not minted directly: a CSR is
//! handed to a signer together with the usages the certificate must carry.
//! [`ExternalSigner`] is that seam. [`CaSigner`] signs locally with a CA
//! bundle from the store, which is what the observability signer does with
//! the client CA.

use std::time::{Duration, SystemTime};

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::{X509Req, X509};
use tracing::{error, info};

use crate::ca_manager::load_issuer;
use crate::error::{PkiError, Result};
use crate::factory::{
    asn1_time, random_serial, window_end, Issuer, SERIAL_NUMBER_BITS, X509_VERSION_3,
};
use crate::pem_codec::{self, CERTIFICATE_REQUEST_TAG};
use crate::store::BundleStore;

/// Usages a signer is asked to put in the issued certificate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Usage {
    DigitalSignature,
    KeyEncipherment,
    ClientAuth,
    ServerAuth,
}

pub trait ExternalSigner {
    /// Sign a PEM certificate request. Returns the PEM certificate.
    fn sign(&self, csr_pem: &[u8], usages: &[Usage]) -> Result<Vec<u8>>;
}

/// Signs requests with the active certificate of a CA bundle.
pub struct CaSigner<S> {
    store: S,
    ca_name: String,
    validity: Duration,
}

impl<S: BundleStore> CaSigner<S> {
    pub fn new(store: S, ca_name: impl Into<String>, validity: Duration) -> Self {
        Self {
            store,
            ca_name: ca_name.into(),
            validity,
        }
    }

    fn reject(&self, reason: impl ToString) -> PkiError {
        PkiError::Signer {
            name: self.ca_name.clone(),
            reason: reason.to_string(),
        }
    }
}

impl<S: BundleStore> ExternalSigner for CaSigner<S> {
    fn sign(&self, csr_pem: &[u8], usages: &[Usage]) -> Result<Vec<u8>> {
        let (block, _) = pem_codec::decode_first(csr_pem)
            .filter(|(block, _)| block.tag() == CERTIFICATE_REQUEST_TAG)
            .ok_or_else(|| self.reject("no certificate request found"))?;
        let request = X509Req::from_der(block.contents()).map_err(|e| self.reject(e))?;

        let public_key = request.public_key().map_err(|e| self.reject(e))?;
        if !request.verify(&public_key).map_err(|e| self.reject(e))? {
            error!(ca = %self.ca_name, "Certificate request signature does not verify");
            return Err(self.reject("request signature does not verify"));
        }

        let (issuer, _) = load_issuer(&self.store, &self.ca_name)?;
        let not_before = SystemTime::now();
        let not_after = window_end(&self.ca_name, not_before, self.validity)?;
        let cert = issue(&request, &issuer, usages, not_before, not_after)
            .map_err(|e| self.reject(e))?;
        let der = cert.to_der().map_err(|e| self.reject(e))?;
        info!(ca = %self.ca_name, "Certificate request signed");
        Ok(pem_codec::encode_certificate(&der))
    }
}

fn issue(
    request: &X509Req,
    issuer: &Issuer,
    usages: &[Usage],
    not_before: SystemTime,
    not_after: SystemTime,
) -> std::result::Result<X509, ErrorStack> {
    let mut builder = X509::builder()?;
    builder.set_version(X509_VERSION_3)?;
    let serial = random_serial(SERIAL_NUMBER_BITS)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(request.subject_name())?;
    builder.set_issuer_name(issuer.cert.subject_name())?;

    let not_before = asn1_time(not_before)?;
    builder.set_not_before(&not_before)?;
    let not_after = asn1_time(not_after)?;
    builder.set_not_after(&not_after)?;

    let public_key = request.public_key()?;
    builder.set_pubkey(&public_key)?;

    builder.append_extension(BasicConstraints::new().critical().build()?)?;

    let mut ku = KeyUsage::new();
    ku.critical();
    let mut eku = ExtendedKeyUsage::new();
    let (mut has_ku, mut has_eku) = (false, false);
    for usage in usages {
        match usage {
            Usage::DigitalSignature => {
                ku.digital_signature();
                has_ku = true;
            }
            Usage::KeyEncipherment => {
                ku.key_encipherment();
                has_ku = true;
            }
            Usage::ClientAuth => {
                eku.client_auth();
                has_eku = true;
            }
            Usage::ServerAuth => {
                eku.server_auth();
                has_eku = true;
            }
        }
    }
    if has_ku {
        builder.append_extension(ku.build()?)?;
    }
    if has_eku {
        builder.append_extension(eku.build()?)?;
    }

    builder.sign(&issuer.key, MessageDigest::sha256())?;
    Ok(builder.build())
}
