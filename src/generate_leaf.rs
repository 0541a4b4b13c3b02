//! Leaf Certificate Generation Module
//!
//! Generates the end-entity certificates used for mutual TLS between
//! services, signed by the server or client CA.
//!
//! # X.509 Extensions
//! - **Basic Constraints**: CA=false
//! - **Key Usage**: `digitalSignature`, `keyEncipherment`
//! - **Extended Key Usage**: `serverAuth` for [`Role::Server`], `clientAuth`
//!   for [`Role::Client`]
//! - **Subject Alternative Name**: the DNS names exactly as given (the
//!   factory puts the common name first) plus any IP addresses
//! - **Authority Key Identifier**: points at the issuing CA's key

use std::net::IpAddr;
use std::time::{Duration, SystemTime};

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::x509::extension::{
    AuthorityKeyIdentifier, BasicConstraints, ExtendedKeyUsage, KeyUsage,
    SubjectAlternativeName,
};
use openssl::x509::X509;

use crate::error::{PkiError, Result};
use crate::factory::{
    asn1_time, random_serial, subject_name, window_end, Issuer, Role, SERIAL_NUMBER_BITS,
    X509_VERSION_3,
};

// ================= RSA Leaf Certificate Builder =================

/// Builder for RSA leaf certificates signed by a CA.
pub struct RsaLeafBuilder<'a> {
    subject_common_name: String,
    organization: String,
    organizational_units: Vec<String>,
    country: String,
    dns_names: Vec<String>,
    ip_addresses: Vec<IpAddr>,
    serial_bits: i32,
    valid_from: SystemTime,
    validity: Duration,
    role: Role,
    private_key: PKey<Private>,
    issuer: &'a Issuer,
}

impl<'a> RsaLeafBuilder<'a> {
    /// Create a new leaf builder
    ///
    /// # Arguments
    /// * `issuer` - CA certificate and key that sign the leaf
    /// * `private_key` - Key pair whose public half goes into the leaf
    /// * `role` - Selects the extended key usage
    pub fn new(issuer: &'a Issuer, private_key: PKey<Private>, role: Role) -> Self {
        Self {
            subject_common_name: String::new(),
            organization: String::new(),
            organizational_units: Vec::new(),
            country: String::new(),
            dns_names: Vec::new(),
            ip_addresses: Vec::new(),
            serial_bits: SERIAL_NUMBER_BITS,
            valid_from: SystemTime::now(),
            validity: Duration::from_secs(365 * 24 * 3600),
            role,
            private_key,
            issuer,
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

    /// Set the organizational units (OU), one RDN entry each
    pub fn organizational_units(mut self, ou: Vec<String>) -> Self {
        self.organizational_units = ou;
        self
    }

    /// Set the country (C) for the certificate (2-letter ISO code)
    pub fn country(mut self, country: String) -> Self {
        self.country = country;
        self
    }

    /// DNS SAN entries, written in the given order
    pub fn dns_names(mut self, dns: Vec<String>) -> Self {
        self.dns_names = dns;
        self
    }

    pub fn ip_addresses(mut self, ips: Vec<IpAddr>) -> Self {
        self.ip_addresses = ips;
        self
    }

    pub fn serial_bits(mut self, bits: i32) -> Self {
        self.serial_bits = bits;
        self
    }

    pub fn valid_from(mut self, at: SystemTime) -> Self {
        self.valid_from = at;
        self
    }

    pub fn validity(mut self, validity: Duration) -> Self {
        self.validity = validity;
        self
    }

    /// Build the leaf certificate and sign it with the issuer's key
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
            &self.organizational_units,
            &self.subject_common_name,
        )?;
        builder.set_subject_name(&name)?;
        builder.set_issuer_name(self.issuer.cert.subject_name())?;

        let not_before = asn1_time(self.valid_from)?;
        builder.set_not_before(&not_before)?;
        let not_after = asn1_time(not_after)?;
        builder.set_not_after(&not_after)?;

        builder.set_pubkey(&self.private_key)?;

        let bc = BasicConstraints::new().critical().build()?;
        builder.append_extension(bc)?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .build()?;
        builder.append_extension(ku)?;

        let mut eku = ExtendedKeyUsage::new();
        match self.role {
            Role::Server => eku.server_auth(),
            Role::Client => eku.client_auth(),
        };
        builder.append_extension(eku.build()?)?;

        let mut san = SubjectAlternativeName::new();
        for dns in &self.dns_names {
            san.dns(dns);
        }
        for ip in &self.ip_addresses {
            san.ip(&ip.to_string());
        }
        let san = san.build(&builder.x509v3_context(Some(&self.issuer.cert), None))?;
        builder.append_extension(san)?;

        let aki = AuthorityKeyIdentifier::new()
            .keyid(false)
            .build(&builder.x509v3_context(Some(&self.issuer.cert), None))?;
        builder.append_extension(aki)?;

        builder.sign(&self.issuer.key, MessageDigest::sha256())?;
        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::tests::{issuer_from, test_factory};
    use openssl::nid::Nid;
    use openssl::rsa::Rsa;

    fn cert_text(cert: &X509) -> String {
        let text = cert.to_text().unwrap();
        String::from_utf8(text).unwrap()
    }

    #[test]
    fn role_selects_extended_key_usage() {
        let factory = test_factory();
        let (ca_key, ca_cert) = factory.build_self_signed_ca("ca", None).unwrap();
        let issuer = issuer_from(&ca_key, &ca_cert);

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let server = RsaLeafBuilder::new(&issuer, key.clone(), Role::Server)
            .subject_common_name("svc".to_string())
            .dns_names(vec!["svc".to_string()])
            .organization("Example".to_string())
            .country("US".to_string())
            .build()
            .unwrap();
        let client = RsaLeafBuilder::new(&issuer, key, Role::Client)
            .subject_common_name("grafana".to_string())
            .dns_names(vec!["grafana".to_string()])
            .organization("Example".to_string())
            .country("US".to_string())
            .build()
            .unwrap();

        assert!(cert_text(&server).contains("TLS Web Server Authentication"));
        assert!(!cert_text(&server).contains("TLS Web Client Authentication"));
        assert!(cert_text(&client).contains("TLS Web Client Authentication"));

        let cn = client
            .subject_name()
            .entries_by_nid(Nid::COMMONNAME)
            .next()
            .unwrap();
        assert_eq!(std::str::from_utf8(cn.data().as_slice()).unwrap(), "grafana");
        assert!(client.verify(&issuer.key).unwrap());
    }

    #[test]
    fn oversized_window_is_an_error() {
        let factory = test_factory();
        let (ca_key, ca_cert) = factory.build_self_signed_ca("ca", None).unwrap();
        let issuer = issuer_from(&ca_key, &ca_cert);

        let key = PKey::from_rsa(Rsa::generate(2048).unwrap()).unwrap();
        let err = RsaLeafBuilder::new(&issuer, key, Role::Server)
            .subject_common_name("svc".to_string())
            .dns_names(vec!["svc".to_string()])
            .validity(Duration::MAX)
            .build()
            .unwrap_err();
        assert!(matches!(err, PkiError::Validity { .. }));
    }
}
