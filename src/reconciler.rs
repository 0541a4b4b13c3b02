//! Reconciler
//!
//! One pass over all observability PKI material: both CA bundles, the
//! server and grafana leaves, and optionally the hub collector's mTLS
//! bundle. A CA renewed during the pass forces its dependent leaf to be
//! re-issued so the leaf chains to the new CA.

use std::collections::BTreeMap;

use tracing::{error, info};

use crate::bundle::Bundle;
use crate::ca_manager::CaManager;
use crate::chain_pruner::ChainPruner;
use crate::collector_mtls::CollectorMtls;
use crate::configs::PkiConfig;
use crate::error::Result;
use crate::factory::{CertificateFactory, LeafSpec, Role};
use crate::hosts::HostDiscovery;
use crate::leaf_manager::LeafManager;
use crate::signer::CaSigner;
use crate::store::BundleStore;

/// Outcome of [`Reconciler::create_observability_certs`].
#[derive(Debug)]
pub struct PassReport {
    pub server_ca: Bundle,
    pub server_ca_modified: bool,
    pub client_ca: Bundle,
    pub client_ca_modified: bool,
    pub server_cert: Bundle,
    pub grafana_cert: Bundle,
}

pub struct Reconciler<S, H> {
    config: PkiConfig,
    store: S,
    hosts: H,
}

impl<S: BundleStore, H: HostDiscovery> Reconciler<S, H> {
    pub fn new(config: PkiConfig, store: S, hosts: H) -> Self {
        Self {
            config,
            store,
            hosts,
        }
    }

    pub fn config(&self) -> &PkiConfig {
        &self.config
    }

    /// Ensure every CA and leaf bundle exists and is current.
    ///
    /// Host discovery runs after the CAs and before any leaf is touched; if
    /// it fails the pass stops there.
    pub fn create_observability_certs(
        &mut self,
        annotations: &BTreeMap<String, String>,
    ) -> Result<PassReport> {
        self.config.apply_annotations(annotations);
        let names = &self.config.bundles;
        let cns = &self.config.common_names;
        let ca = self.ca_manager();

        let (server_ca, server_ca_modified) = ca.ensure_ca(&names.server_ca, &cns.server_ca, false)?;
        let (client_ca, client_ca_modified) = ca.ensure_ca(&names.client_ca, &cns.client_ca, false)?;

        let hosts = self.hosts.hosts()?;
        let leaf = self.leaf_manager();
        let server_cert = leaf.ensure_leaf(
            &names.server_cert,
            Role::Server,
            &LeafSpec::new(cns.server_cert.clone()).dns_names(hosts),
            server_ca_modified,
        )?;
        let grafana_cert = leaf.ensure_leaf(
            &names.grafana_cert,
            Role::Client,
            &LeafSpec::new(cns.grafana_cert.clone()),
            client_ca_modified,
        )?;

        Ok(PassReport {
            server_ca,
            server_ca_modified,
            client_ca,
            client_ca_modified,
            server_cert,
            grafana_cert,
        })
    }

    /// Renew the CA for `role` and re-issue the leaf that depends on it.
    /// Returns the renewed CA and leaf bundles.
    pub fn rotate_ca(&self, role: Role) -> Result<(Bundle, Bundle)> {
        let names = &self.config.bundles;
        let cns = &self.config.common_names;
        let ca = self.ca_manager();
        let leaf = self.leaf_manager();
        match role {
            Role::Server => {
                let (ca_bundle, _) = ca.ensure_ca(&names.server_ca, &cns.server_ca, true)?;
                let hosts = self.hosts.hosts()?;
                let spec = LeafSpec::new(cns.server_cert.clone()).dns_names(hosts);
                let leaf_bundle = leaf.ensure_leaf(&names.server_cert, Role::Server, &spec, true)?;
                Ok((ca_bundle, leaf_bundle))
            }
            Role::Client => {
                let (ca_bundle, _) = ca.ensure_ca(&names.client_ca, &cns.client_ca, true)?;
                let spec = LeafSpec::new(cns.grafana_cert.clone());
                let leaf_bundle = leaf.ensure_leaf(&names.grafana_cert, Role::Client, &spec, true)?;
                Ok((ca_bundle, leaf_bundle))
            }
        }
    }

    /// Prune expired certificates from both CA chains.
    ///
    /// A failure on one bundle is logged and does not stop the other.
    /// Returns the names of the bundles that were rewritten.
    pub fn prune_expired_cas(&self) -> Vec<String> {
        let pruner = ChainPruner::new(&self.store);
        let names = &self.config.bundles;
        let mut pruned = Vec::new();
        for name in [&names.server_ca, &names.client_ca] {
            match pruner.prune_by_name(name) {
                Ok(Some((_, true))) => pruned.push(name.clone()),
                Ok(Some((_, false))) => {}
                Ok(None) => info!(name = %name, "CA secret not found, nothing to prune"),
                Err(e) => error!(name = %name, error = %e, "Failed to prune expired CA certificates"),
            }
        }
        pruned
    }

    /// Ensure the hub collector's client bundle, signed by the client CA.
    pub fn ensure_hub_collector_mtls(&self, update: bool) -> Result<Bundle> {
        let signer = CaSigner::new(
            &self.store,
            self.config.bundles.client_ca.clone(),
            self.config.leaf_duration(),
        );
        CollectorMtls::new(
            &self.store,
            signer,
            self.factory(),
            self.config.csr.clone(),
            self.config.bundles.hub_collector_mtls.clone(),
        )
        .ensure(update)
    }

    fn factory(&self) -> CertificateFactory {
        CertificateFactory::from_config(&self.config)
    }

    fn ca_manager(&self) -> CaManager<&S> {
        CaManager::new(&self.store, self.factory(), self.config.backup_label.clone())
    }

    fn leaf_manager(&self) -> LeafManager<&S> {
        LeafManager::new(
            &self.store,
            self.factory(),
            self.config.backup_label.clone(),
            self.config.bundles.server_ca.clone(),
            self.config.bundles.client_ca.clone(),
        )
    }
}
