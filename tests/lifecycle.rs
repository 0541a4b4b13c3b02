use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use obs_certs::ca_manager::CaManager;
use obs_certs::chain_pruner::{prune_chain, ChainPruner};
use obs_certs::configs::{BackupLabel, PkiConfig, SubjectConfig};
use obs_certs::dir_store::{DirStore, CA_FILE, CERT_FILE, KEY_FILE};
use obs_certs::factory::{parse_first_certificate, parse_rsa_private_key, CertificateFactory, LeafSpec, Role};
use obs_certs::hosts::StaticHosts;
use obs_certs::leaf_manager::{dns_names, LeafManager};
use obs_certs::pem_codec::blocks;
use obs_certs::reconciler::Reconciler;
use obs_certs::store::{BundleStore, MemoryStore};
use openssl::asn1::Asn1Time;
use openssl::x509::{X509VerifyResult, X509};

const LEAF_DURATION: Duration = Duration::from_secs(24 * 3600);

fn factory() -> CertificateFactory {
    CertificateFactory::new(&SubjectConfig::default(), LEAF_DURATION)
}

fn unix_now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs() as i64
}

#[test]
fn root_ca_then_server_leaf() {
    let store = MemoryStore::new();
    let ca = CaManager::new(&store, factory(), BackupLabel::default());
    let leaf = LeafManager::new(&store, factory(), BackupLabel::default(), "root-ca", "root-ca");

    let (root, modified) = ca.ensure_ca("root-ca", "root-ca-cn", false).unwrap();
    assert!(modified);
    let root_cert = parse_first_certificate(&root.cert).unwrap();
    let text = String::from_utf8(root_cert.to_text().unwrap()).unwrap();
    assert!(text.contains("CA:TRUE"));

    // notAfter within a minute of now + 5 days
    let expected = Asn1Time::from_unix((unix_now() + 5 * 24 * 3600) as _).unwrap();
    let drift = root_cert.not_after().diff(&expected).unwrap();
    assert_eq!(drift.days, 0);
    assert!(drift.secs.abs() < 60);

    let server = leaf
        .ensure_leaf("server", Role::Server, &LeafSpec::new("server-cn").dns_names(vec!["host1".to_string()]), false)
        .unwrap();
    let server_cert = parse_first_certificate(&server.cert).unwrap();
    assert_eq!(root_cert.issued(&server_cert), X509VerifyResult::OK);
    assert!(server_cert.verify(&root_cert.public_key().unwrap()).unwrap());
    assert_eq!(dns_names(&server_cert), vec!["server-cn", "host1"]);

    let text = String::from_utf8(server_cert.to_text().unwrap()).unwrap();
    assert!(text.contains("TLS Web Server Authentication"));
    assert!(text.contains("CA:FALSE"));
    assert_eq!(server.ca_chain, root.ca_chain);
}

#[test]
fn rotation_then_prune_keeps_survivors_byte_exact() {
    let store = MemoryStore::new();
    let ca = CaManager::new(&store, factory(), BackupLabel::default());
    let (first, _) = ca.ensure_ca("ca", "ca-cn", false).unwrap();
    let (second, _) = ca.ensure_ca("ca", "ca-cn", true).unwrap();
    let (third, _) = ca.ensure_ca("ca", "ca-cn", true).unwrap();

    let entries: Vec<X509> = blocks(&third.ca_chain)
        .map(|b| X509::from_der(b.contents().unwrap()).unwrap())
        .collect();
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries[0].to_der().unwrap(),
        parse_first_certificate(&third.cert).unwrap().to_der().unwrap()
    );
    assert!(third.ca_chain.ends_with(&second.ca_chain));
    assert!(second.ca_chain.ends_with(&first.ca_chain));

    // Nothing has expired yet.
    let pruner = ChainPruner::new(&store);
    let (same, written) = pruner.prune_expired_ca(&third).unwrap();
    assert!(!written);
    assert_eq!(same.ca_chain, third.ca_chain);

    // Six days out every five-day CA has lapsed; only the active entry stays.
    let later = SystemTime::now() + 6 * LEAF_DURATION;
    let pruned = prune_chain("ca", &third.ca_chain, later);
    assert_eq!(pruned, third.cert);
}

#[test]
fn full_pass_on_directory_store() {
    let dir = tempfile::tempdir().unwrap();
    let store = DirStore::new(dir.path()).unwrap();
    let hosts = StaticHosts(vec!["observability-observatorium-api.ns.svc.cluster.local".to_string()]);
    let mut reconciler = Reconciler::new(PkiConfig::default(), &store, hosts);

    let report = reconciler.create_observability_certs(&BTreeMap::new()).unwrap();
    let names = PkiConfig::default().bundles;

    let server_dir = store.bundle_dir(&names.server_cert);
    let on_disk_cert = std::fs::read(server_dir.join(CERT_FILE)).unwrap();
    let on_disk_key = std::fs::read(server_dir.join(KEY_FILE)).unwrap();
    let on_disk_ca = std::fs::read(server_dir.join(CA_FILE)).unwrap();
    assert_eq!(on_disk_cert, report.server_cert.cert);
    assert_eq!(on_disk_ca, report.server_ca.ca_chain);

    let cert = parse_first_certificate(&on_disk_cert).unwrap();
    let key = parse_rsa_private_key(&on_disk_key).unwrap();
    assert!(cert.public_key().unwrap().public_eq(&key));

    let grafana = store.get(&names.grafana_cert).unwrap().unwrap();
    assert!(grafana.has_label(&BackupLabel::default().name));

    let again = reconciler.create_observability_certs(&BTreeMap::new()).unwrap();
    assert_eq!(again.server_cert.version, report.server_cert.version);
    assert_eq!(again.grafana_cert.version, report.grafana_cert.version);
    assert!(reconciler.prune_expired_cas().is_empty());
}
