//! Error types for certificate lifecycle operations.
//!
//! A missing bundle is not an error (stores return `Ok(None)`), and malformed
//! stored keys or certificates are recovered where they are found. What is
//! left here is what a caller has to act on: crypto failures for a single
//! bundle, store conflicts that require a re-read and retry, and host
//! discovery failures that abort a pass before anything is written.

use openssl::error::ErrorStack;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PkiError>;

#[derive(Error, Debug)]
pub enum PkiError {
    #[error("failed to generate RSA key for {cn}: {source}")]
    KeyGen {
        cn: String,
        #[source]
        source: ErrorStack,
    },

    #[error("failed to sign certificate for {cn}: {source}")]
    CertSign {
        cn: String,
        #[source]
        source: ErrorStack,
    },

    #[error("validity window for {cn} is out of range: {reason}")]
    Validity { cn: String, reason: String },

    #[error("failed to build certificate request for {cn}: {source}")]
    CsrSign {
        cn: String,
        #[source]
        source: ErrorStack,
    },

    #[error("failed to encode {what}: {reason}")]
    Encode { what: &'static str, reason: String },

    #[error("bundle {name} was modified concurrently")]
    Conflict { name: String },

    #[error("bundle {name} already exists")]
    AlreadyExists { name: String },

    #[error("store error on bundle {name}: {reason}")]
    Store { name: String, reason: String },

    #[error("issuing CA bundle {name} is unusable: {reason}")]
    MissingCa { name: String, reason: String },

    #[error("failed to discover server hostnames: {0}")]
    HostDiscovery(String),

    #[error("external signer rejected request for {name}: {reason}")]
    Signer { name: String, reason: String },
}

impl PkiError {
    /// True when the store rejected a write because another writer got there
    /// first. The whole `ensure_*` call must be re-run against fresh state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, PkiError::Conflict { .. })
    }

    pub(crate) fn store(name: &str, reason: impl ToString) -> Self {
        PkiError::Store {
            name: name.to_string(),
            reason: reason.to_string(),
        }
    }
}
