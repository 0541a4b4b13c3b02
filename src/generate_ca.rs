//! CA Certificate Generation Module
//!
//! Builds the self-signed CA certificates that anchor the two mTLS trust
//! domains (server CA and client CA).
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same, signed by its own key
//! - **Key Usage**: digitalSignature, keyEncipherment, keyCertSign
//! - **Basic Constraints**: CA=true, critical
//! - **Subject Key Identifier**: lets verifiers pick the right CA while an
//!   old and a new CA with the same subject are both trusted
//! - **Version**: X.509v3 with extensions
//!
//! The key is supplied by the caller, which is how renewals keep the CA key.
//!
//! # Example
//! ```rust,no_run
//! # use obs_certs::generate_ca::RsaCaBuilder;
//! # use std::time::{Duration, SystemTime};
//! # fn example(key: openssl::pkey::PKey<openssl::pkey::Private>) -> obs_certs::Result<()> {
//! let ca_cert = RsaCaBuilder::new(key)
//!     .subject_common_name("observability-server-ca-certificate".to_string())
//!     .organization("Red Hat, Inc.".to_string())
//!     .country("US".to_string())
//!     .valid_from(SystemTime::now())
//!     .validity(Duration::from_secs(5 * 365 * 24 * 3600))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::time::{Duration, SystemTime};

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::X509;

use crate::error::{PkiError, Result};
use crate::factory::{
    asn1_time, random_serial, subject_name, window_end, SERIAL_NUMBER_BITS, X509_VERSION_3,
};

// ================= RSA CA Certificate Builder =================

/// Builder for self-signed RSA CA certificates.
///
/// Only the subject common name, organization and country are set; the
/// CA subjects carry no organizational unit.
pub struct RsaCaBuilder {
    subject_common_name: String,
    organization: String,
    country: String,
    serial_bits: i32,
    valid_from: SystemTime,
    validity: Duration,
    private_key: PKey<Private>,
}

impl RsaCaBuilder {
    /// Create a builder that will self-sign with `private_key`
    pub fn new(private_key: PKey<Private>) -> Self {
        Self {
            subject_common_name: String::new(),
            organization: String::new(),
            country: String::new(),
            serial_bits: SERIAL_NUMBER_BITS,
            valid_from: SystemTime::now(),
            validity: Duration::from_secs(5 * 365 * 24 * 3600),
            private_key,
        }
    }

    /// Set the common name (CN) for the certificate
    pub fn subject_common_name(mut self, cn: String) -> Self {
        self.subject_common_name = cn;
        self
    }

    /// Set the organization (O) for the certificate
    pub fn organization(mut self, org: String) -> Self {
        self.organization = org;
        self
    }

    /// Set the country (C) for the certificate (2-letter ISO code)
    pub fn country(mut self, country: String) -> Self {
        self.country = country;
        self
    }

    pub fn serial_bits(mut self, bits: i32) -> Self {
        self.serial_bits = bits;
        self
    }

    /// Start of the validity window (notBefore)
    pub fn valid_from(mut self, at: SystemTime) -> Self {
        self.valid_from = at;
        self
    }

    /// Length of the validity window; notAfter = notBefore + validity
    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Build and self-sign the CA certificate
    ///
    /// # Errors
    /// Returns [`PkiError::Validity`] if the window ends past the clock's
    /// range, [`PkiError::CertSign`] if any openssl step fails.
    pub fn build(self) -> Result<X509> {
        let not_after = window_end(&self.subject_common_name, self.valid_from, self.validity)?;
        self.assemble(not_after).map_err(|source| PkiError::CertSign {
            cn: self.subject_common_name.clone(),
            source,
        })
    }

    fn assemble(&self, not_after: SystemTime) -> std::result::Result<X509, ErrorStack> {
        let mut builder = X509::builder()?;
        builder.set_version(X509_VERSION_3)?;

        let serial = random_serial(self.serial_bits)?;
        builder.set_serial_number(&serial)?;

        let name = subject_name(
            &self.country,
            &self.organization,
            &[],
            &self.subject_common_name,
        )?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(&name)?;

        let not_before = asn1_time(self.valid_from)?;
        builder.set_not_before(&not_before)?;
        let not_after = asn1_time(not_after)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(&self.private_key)?;

        let bc = BasicConstraints::new().critical().ca().build()?;
        builder.append_extension(bc)?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .key_cert_sign()
            .build()?;
        builder.append_extension(ku)?;

        let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
        builder.append_extension(ski)?;

        builder.sign(&self.private_key, MessageDigest::sha256())?;
        Ok(builder.build())
    }
}
