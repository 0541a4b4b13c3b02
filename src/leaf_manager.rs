//! Leaf Certificate Manager
//!
//! Keeps a named server or client leaf bundle present and current against
//! the active CA for its role. Server leaves are re-checked on every call:
//! when the stored certificate no longer parses, or its DNS names do not
//! cover every required name (a new externally reachable route, say), the
//! leaf is renewed without anyone asking for it. Client leaves carry no
//! externally visible hostnames and are only renewed on request.

use openssl::x509::X509;
use tracing::{error, info};

use crate::bundle::Bundle;
use crate::ca_manager::{ensure_backup_label, load_issuer};
use crate::configs::BackupLabel;
use crate::error::Result;
use crate::factory::{
    parse_first_certificate, parse_rsa_private_key, CertificateFactory, LeafSpec, Role,
};
use crate::pem_codec;
use crate::store::BundleStore;

/// Where a leaf bundle stands before any side effect.
#[derive(Debug)]
pub enum LeafState {
    Absent,
    Unchanged(Bundle),
    Renew(Bundle),
}

pub struct LeafManager<S> {
    store: S,
    factory: CertificateFactory,
    backup_label: BackupLabel,
    server_ca: String,
    client_ca: String,
}

impl<S: BundleStore> LeafManager<S> {
    /// `server_ca` and `client_ca` name the CA bundles that issue leaves
    /// for each role.
    pub fn new(
        store: S,
        factory: CertificateFactory,
        backup_label: BackupLabel,
        server_ca: impl Into<String>,
        client_ca: impl Into<String>,
    ) -> Self {
        Self {
            store,
            factory,
            backup_label,
            server_ca: server_ca.into(),
            client_ca: client_ca.into(),
        }
    }

    pub fn ca_name(&self, role: Role) -> &str {
        match role {
            Role::Server => &self.server_ca,
            Role::Client => &self.client_ca,
        }
    }

    /// Ensure the leaf bundle `name` exists and is current.
    ///
    /// `spec.dns_names` is the required SAN set: for server leaves a stored
    /// certificate missing any of them is renewed.
    pub fn ensure_leaf(
        &self,
        name: &str,
        role: Role,
        spec: &LeafSpec,
        force_renew: bool,
    ) -> Result<Bundle> {
        let state = self.assess(name, role, spec, force_renew)?;
        self.apply(name, role, spec, state)
    }

    pub fn assess(
        &self,
        name: &str,
        role: Role,
        spec: &LeafSpec,
        force_renew: bool,
    ) -> Result<LeafState> {
        let Some(bundle) = self.store.get(name)? else {
            return Ok(LeafState::Absent);
        };
        let stale = !force_renew && role == Role::Server && server_leaf_is_stale(name, &bundle, spec);
        Ok(if force_renew || stale {
            LeafState::Renew(bundle)
        } else {
            LeafState::Unchanged(bundle)
        })
    }

    pub fn apply(&self, name: &str, role: Role, spec: &LeafSpec, state: LeafState) -> Result<Bundle> {
        match state {
            LeafState::Absent => {
                let (issuer, chain) = load_issuer(&self.store, self.ca_name(role))?;
                let (key_der, cert_der) = self.factory.build_signed_leaf(role, spec, &issuer, None)?;
                let bundle = Bundle::new(
                    name,
                    chain,
                    pem_codec::encode_certificate(&cert_der),
                    pem_codec::encode_rsa_private_key(&key_der),
                )
                .with_label(&self.backup_label.name, &self.backup_label.value);
                let stored = self.store.create(&bundle).map_err(|e| {
                    error!(name = %name, error = %e, "Failed to create secret");
                    e
                })?;
                info!(name = %name, "Certificates created");
                Ok(stored)
            }
            LeafState::Unchanged(bundle) => {
                info!(name = %name, "Certificate secrets already existed");
                ensure_backup_label(&self.store, bundle, &self.backup_label)
            }
            LeafState::Renew(bundle) => {
                info!(name = %name, "To renew certificates");
                let (issuer, chain) = load_issuer(&self.store, self.ca_name(role))?;
                let existing_key = parse_rsa_private_key(&bundle.key);
                if existing_key.is_none() {
                    error!(name = %name, "Wrong private key found, create new one");
                }
                let (key_der, cert_der) =
                    self.factory
                        .build_signed_leaf(role, spec, &issuer, existing_key)?;
                let renewed = bundle.renewed(
                    chain,
                    pem_codec::encode_certificate(&cert_der),
                    pem_codec::encode_rsa_private_key(&key_der),
                );
                let stored = self.store.update(&renewed).map_err(|e| {
                    error!(name = %name, error = %e, "Failed to update secret");
                    e
                })?;
                info!(name = %name, "Certificates renewed");
                Ok(stored)
            }
        }
    }
}

fn server_leaf_is_stale(name: &str, bundle: &Bundle, spec: &LeafSpec) -> bool {
    let Some(cert) = parse_first_certificate(&bundle.cert) else {
        error!(name = %name, "Failed to parse the server certificate, renew it");
        return true;
    };
    let required = spec.dns_names.as_deref().unwrap_or_default();
    if !covers_dns_names(&cert, required) {
        info!(name = %name, "Server certificate is missing required hostnames, renew it");
        return true;
    }
    false
}

/// True when every name in `required` is one of the certificate's DNS SANs.
pub fn covers_dns_names(cert: &X509, required: &[String]) -> bool {
    let present = dns_names(cert);
    required.iter().all(|name| present.contains(name))
}

pub fn dns_names(cert: &X509) -> Vec<String> {
    cert.subject_alt_names()
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.dnsname().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ca_manager::CaManager;
    use crate::error::PkiError;
    use crate::factory::tests::test_factory;
    use crate::store::MemoryStore;

    const SERVER_CA: &str = "server-ca";
    const CLIENT_CA: &str = "client-ca";

    fn setup(store: &MemoryStore) -> (CaManager<&MemoryStore>, LeafManager<&MemoryStore>) {
        let ca = CaManager::new(store, test_factory(), BackupLabel::default());
        ca.ensure_ca(SERVER_CA, "server-ca-cn", false).unwrap();
        ca.ensure_ca(CLIENT_CA, "client-ca-cn", false).unwrap();
        let leaf = LeafManager::new(store, test_factory(), BackupLabel::default(), SERVER_CA, CLIENT_CA);
        (ca, leaf)
    }

    fn serial(bundle: &Bundle) -> openssl::bn::BigNum {
        parse_first_certificate(&bundle.cert)
            .unwrap()
            .serial_number()
            .to_bn()
            .unwrap()
    }

    fn hosts(names: &[&str]) -> LeafSpec {
        LeafSpec::new("server-cn").dns_names(names.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn subset_of_required_names_does_not_renew() {
        let store = MemoryStore::new();
        let (_, leaf) = setup(&store);

        let first = leaf.ensure_leaf("server", Role::Server, &hosts(&["a", "b"]), false).unwrap();
        let cert = parse_first_certificate(&first.cert).unwrap();
        assert!(covers_dns_names(&cert, &["a".to_string(), "b".to_string()]));

        let writes = store.writes();
        let again = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap();
        assert_eq!(serial(&again), serial(&first));
        assert_eq!(store.writes(), writes);
    }

    #[test]
    fn missing_required_name_renews_server_leaf() {
        let store = MemoryStore::new();
        let (_, leaf) = setup(&store);

        let first = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap();
        let renewed = leaf.ensure_leaf("server", Role::Server, &hosts(&["a", "b"]), false).unwrap();

        assert_ne!(serial(&renewed), serial(&first));
        assert_eq!(renewed.key, first.key);
        let cert = parse_first_certificate(&renewed.cert).unwrap();
        assert_eq!(dns_names(&cert), vec!["server-cn", "a", "b"]);
    }

    #[test]
    fn client_leaf_skips_drift_check() {
        let store = MemoryStore::new();
        let (_, leaf) = setup(&store);

        let first = leaf.ensure_leaf("grafana", Role::Client, &LeafSpec::new("grafana"), false).unwrap();
        let spec = LeafSpec::new("grafana").dns_names(vec!["elsewhere".to_string()]);
        let again = leaf.ensure_leaf("grafana", Role::Client, &spec, false).unwrap();
        assert_eq!(serial(&again), serial(&first));
    }

    #[test]
    fn unparsable_server_cert_is_renewed() {
        let store = MemoryStore::new();
        let (_, leaf) = setup(&store);
        let first = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap();

        let mut broken = first.clone();
        broken.cert = b"not a certificate".to_vec();
        store.put_unchecked(broken);

        let renewed = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap();
        let cert = parse_first_certificate(&renewed.cert).unwrap();
        assert!(cert.public_key().unwrap().public_eq(&parse_rsa_private_key(&renewed.key).unwrap()));
    }

    #[test]
    fn leaf_is_issued_by_role_ca_with_its_chain() {
        let store = MemoryStore::new();
        let (_, leaf) = setup(&store);

        let server = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap();
        let client = leaf.ensure_leaf("grafana", Role::Client, &LeafSpec::new("grafana"), false).unwrap();

        let (server_ca, server_chain) = load_issuer(&store, SERVER_CA).unwrap();
        let (client_ca, client_chain) = load_issuer(&store, CLIENT_CA).unwrap();
        assert_eq!(server.ca_chain, server_chain);
        assert_eq!(client.ca_chain, client_chain);

        let server_cert = parse_first_certificate(&server.cert).unwrap();
        let client_cert = parse_first_certificate(&client.cert).unwrap();
        assert!(server_cert.verify(&server_ca.key).unwrap());
        assert!(client_cert.verify(&client_ca.key).unwrap());
        assert!(!client_cert.verify(&server_ca.key).unwrap());
    }

    #[test]
    fn forced_renewal_follows_rotated_ca() {
        let store = MemoryStore::new();
        let (ca, leaf) = setup(&store);
        let first = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap();

        let (rotated, _) = ca.ensure_ca(SERVER_CA, "server-ca-cn", true).unwrap();
        let renewed = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), true).unwrap();

        assert_ne!(serial(&renewed), serial(&first));
        assert_eq!(renewed.ca_chain, rotated.ca_chain);
        let issuer_cert = parse_first_certificate(&rotated.cert).unwrap();
        let leaf_cert = parse_first_certificate(&renewed.cert).unwrap();
        assert_eq!(issuer_cert.issued(&leaf_cert), openssl::x509::X509VerifyResult::OK);
    }

    #[test]
    fn corrupt_leaf_key_is_replaced() {
        let store = MemoryStore::new();
        let (_, leaf) = setup(&store);
        let first = leaf.ensure_leaf("grafana", Role::Client, &LeafSpec::new("grafana"), false).unwrap();

        let mut corrupt = first.clone();
        corrupt.key = b"garbage".to_vec();
        store.put_unchecked(corrupt);

        let renewed = leaf.ensure_leaf("grafana", Role::Client, &LeafSpec::new("grafana"), true).unwrap();
        let cert = parse_first_certificate(&renewed.cert).unwrap();
        let key = parse_rsa_private_key(&renewed.key).unwrap();
        assert!(cert.public_key().unwrap().public_eq(&key));
        assert_ne!(renewed.key, first.key);
    }

    #[test]
    fn missing_ca_fails_without_writing() {
        let store = MemoryStore::new();
        let leaf = LeafManager::new(&store, test_factory(), BackupLabel::default(), SERVER_CA, CLIENT_CA);
        let err = leaf.ensure_leaf("server", Role::Server, &hosts(&["a"]), false).unwrap_err();
        assert!(matches!(err, PkiError::MissingCa { .. }));
        assert_eq!(store.writes(), 0);
    }
}
