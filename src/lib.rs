//! obs-certs - Certificate lifecycle for the observability stack
//!
//! Creates, renews and garbage-collects the internal PKI that secures the
//! observability components: two independent self-signed CAs, the leaf
//! certificates they issue, and a CSR-signed client certificate for the hub
//! collector. All material is kept in named bundles in a pluggable store.
//!
//! # Overview
//!
//! ```text
//! Server CA (self-signed) ── Server leaf  (serverAuth, SANs = CN + hosts)
//! Client CA (self-signed) ── Grafana leaf (clientAuth, SANs = CN)
//!                        └── Hub collector (clientAuth, signed from a CSR)
//! ```
//!
//! Every operation is idempotent: a pass over unchanged state writes
//! nothing. Renewing a CA keeps its key and prepends the new certificate to
//! the stored chain, so peers that still trust the old CA keep validating
//! until the chain pruner drops the expired entry.
//!
//! # Features
//!
//! - **Two-tier PKI**: self-signed server and client CAs, RSA-2048, SHA-256
//! - **Hostname drift**: server leaves are re-issued when a new route appears
//! - **Key reuse**: renewals keep the stored key unless it no longer parses
//! - **Chain pruning**: expired CA certificates are removed byte-exactly
//! - **Optimistic concurrency**: every store write carries a version
//!
//! # Quick Start
//!
//! ```bash
//! cargo build --release
//! OBS_CERTS_CONFIG=config.toml ./target/release/obs-certs
//! ```
//!
//! # Library Usage
//!
//! ```no_run
//! use std::collections::BTreeMap;
//!
//! use obs_certs::configs::PkiConfig;
//! use obs_certs::dir_store::DirStore;
//! use obs_certs::hosts::StaticHosts;
//! use obs_certs::reconciler::Reconciler;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = PkiConfig::load()?;
//!     let store = DirStore::new(config.data_dir.clone())?;
//!     let hosts = StaticHosts(vec!["observatorium-api.example.svc".to_string()]);
//!
//!     let mut reconciler = Reconciler::new(config, store, hosts);
//!     let report = reconciler.create_observability_certs(&BTreeMap::new())?;
//!     println!("server CA modified: {}", report.server_ca_modified);
//!     reconciler.prune_expired_cas();
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! ## [`factory`]
//!
//! Pure constructors for CA certificates, leaf certificates and CSRs. The
//! X.509 details live in [`generate_ca`], [`generate_leaf`] and
//! [`generate_csr`].
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use obs_certs::configs::SubjectConfig;
//! use obs_certs::factory::CertificateFactory;
//!
//! let factory = CertificateFactory::new(&SubjectConfig::default(), Duration::from_secs(86_400));
//! let (key_der, cert_der) = factory.build_self_signed_ca("my-ca", None)?;
//! # Ok::<(), obs_certs::PkiError>(())
//! ```
//!
//! ## [`ca_manager`] and [`leaf_manager`]
//!
//! `ensure_ca` / `ensure_leaf`: decide whether a bundle is absent, current
//! or due for renewal, then perform exactly that side effect.
//!
//! ## [`chain_pruner`]
//!
//! Drops expired and unparsable entries from a CA chain, never the first.
//!
//! ## [`store`] and [`dir_store`]
//!
//! The [`store::BundleStore`] trait with an in-memory and a directory
//! implementation.
//!
//! ## [`reconciler`]
//!
//! Runs the managers in order for a full pass, a CA rotation or a prune.
//!
//! # Error Handling
//!
//! Library operations return [`Result`] with a [`PkiError`]. A
//! [`PkiError::Conflict`] means another writer updated the bundle first; the
//! whole operation should be re-run against fresh state:
//!
//! ```no_run
//! # use obs_certs::ca_manager::CaManager;
//! # use obs_certs::store::MemoryStore;
//! # fn example(ca: &CaManager<MemoryStore>) -> obs_certs::Result<()> {
//! let (bundle, _) = match ca.ensure_ca("server-ca", "server-ca-cn", true) {
//!     Err(e) if e.is_conflict() => ca.ensure_ca("server-ca", "server-ca-cn", true)?,
//!     other => other?,
//! };
//! # let _ = bundle;
//! # Ok(())
//! # }
//! ```

pub mod bundle;
pub mod ca_manager;
pub mod chain_pruner;
pub mod collector_mtls;
pub mod configs;
pub mod dir_store;
pub mod error;
pub mod factory;
pub mod generate_ca;
pub mod generate_csr;
pub mod generate_leaf;
pub mod hosts;
pub mod leaf_manager;
pub mod pem_codec;
pub mod reconciler;
pub mod signer;
pub mod store;

pub use error::{PkiError, Result};
