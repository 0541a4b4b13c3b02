use std::collections::BTreeMap;
use std::fmt;

/// The stored triple of trust chain, active certificate and private key for
/// one named role.
///
/// For CA bundles `ca_chain` holds the current and previously valid CA
/// certificates, newest first, and `cert` holds only the active CA
/// certificate. For leaf bundles `ca_chain` is a copy of the issuing CA's
/// chain at issuance time. `key` is always the PKCS#1 PEM key matching
/// `cert`.
///
/// Bundles are values: renewal and pruning build a new bundle that the
/// caller writes back in one store call.
#[derive(Clone, PartialEq, Eq)]
pub struct Bundle {
    pub name: String,
    pub ca_chain: Vec<u8>,
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
    pub labels: BTreeMap<String, String>,
    /// Optimistic concurrency token assigned by the store. `None` until the
    /// bundle has been persisted.
    pub version: Option<u64>,
}

impl Bundle {
    pub fn new(name: impl Into<String>, ca_chain: Vec<u8>, cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            ca_chain,
            cert,
            key,
            labels: BTreeMap::new(),
            version: None,
        }
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(name.into(), value.into());
        self
    }

    pub fn has_label(&self, name: &str) -> bool {
        self.labels.contains_key(name)
    }

    /// Same identity, labels and version with new material.
    pub fn renewed(&self, ca_chain: Vec<u8>, cert: Vec<u8>, key: Vec<u8>) -> Self {
        Self {
            name: self.name.clone(),
            ca_chain,
            cert,
            key,
            labels: self.labels.clone(),
            version: self.version,
        }
    }

    /// Same bundle with a replaced chain; certificate and key untouched.
    pub fn with_chain(&self, ca_chain: Vec<u8>) -> Self {
        Self {
            ca_chain,
            ..self.clone()
        }
    }
}

impl fmt::Debug for Bundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bundle")
            .field("name", &self.name)
            .field("ca_chain_len", &self.ca_chain.len())
            .field("cert_len", &self.cert.len())
            .field("key", &"<redacted>")
            .field("labels", &self.labels)
            .field("version", &self.version)
            .finish()
    }
}
