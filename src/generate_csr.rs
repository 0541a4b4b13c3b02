//! Certificate Signing Request Generation Module
//!
//! Builds the PKCS#10 request the hub metrics collector hands to an external
//! signing authority. The subject carries the fixed organization/country,
//! the common name, and two extra attributes appended after it: an
//! organizational unit and a second common name identifying the user the
//! signer maps the certificate to. The request is signed with SHA-512/RSA.

use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{PKey, Private};
use openssl::stack::Stack;
use openssl::x509::extension::SubjectAlternativeName;
use openssl::x509::{X509Name, X509Req, X509ReqBuilder};

use crate::error::{PkiError, Result};

const X509_REQ_VERSION_1: i32 = 0;

pub struct RsaCsrBuilder {
    subject_common_name: String,
    organization: String,
    country: String,
    organizational_unit: String,
    user: String,
    dns_name: String,
    private_key: PKey<Private>,
}

impl RsaCsrBuilder {
    pub fn new(private_key: PKey<Private>) -> Self {
        Self {
            subject_common_name: String::new(),
            organization: String::new(),
            country: String::new(),
            organizational_unit: String::new(),
            user: String::new(),
            dns_name: String::new(),
            private_key,
        }
    }

    pub fn subject_common_name(mut self, cn: String) -> Self {
        self.subject_common_name = cn;
        self
    }

    pub fn organization(mut self, org: String) -> Self {
        self.organization = org;
        self
    }

    pub fn country(mut self, country: String) -> Self {
        self.country = country;
        self
    }

    /// Extra OU attribute appended after the common name
    pub fn organizational_unit(mut self, ou: String) -> Self {
        self.organizational_unit = ou;
        self
    }

    /// Extra CN attribute naming the user the signer should map to
    pub fn user(mut self, user: String) -> Self {
        self.user = user;
        self
    }

    /// The single DNS SAN identifying the requesting client
    pub fn dns_name(mut self, dns: String) -> Self {
        self.dns_name = dns;
        self
    }

    /// Build and sign the request
    ///
    /// # Errors
    /// Returns [`PkiError::CsrSign`] if any openssl step fails.
    pub fn build(self) -> Result<X509Req> {
        self.assemble().map_err(|source| PkiError::CsrSign {
            cn: self.subject_common_name.clone(),
            source,
        })
    }

    fn assemble(&self) -> std::result::Result<X509Req, ErrorStack> {
        let mut builder = X509ReqBuilder::new()?;
        builder.set_version(X509_REQ_VERSION_1)?;

        let mut name_builder = X509Name::builder()?;
        name_builder.append_entry_by_nid(Nid::COUNTRYNAME, &self.country)?;
        name_builder.append_entry_by_nid(Nid::ORGANIZATIONNAME, &self.organization)?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, &self.subject_common_name)?;
        name_builder.append_entry_by_nid(Nid::ORGANIZATIONALUNITNAME, &self.organizational_unit)?;
        name_builder.append_entry_by_nid(Nid::COMMONNAME, &self.user)?;
        let name = name_builder.build();
        builder.set_subject_name(&name)?;

        builder.set_pubkey(&self.private_key)?;

        let mut extensions = Stack::new()?;
        let san = SubjectAlternativeName::new()
            .dns(&self.dns_name)
            .build(&builder.x509v3_context(None))?;
        extensions.push(san)?;
        builder.add_extensions(&extensions)?;

        builder.sign(&self.private_key, MessageDigest::sha512())?;
        Ok(builder.build())
    }
}
