//! obs-certs - one reconciliation pass over the observability PKI
//!
//! Loads the configuration, opens the bundle directory and then:
//! 1. ensures both CAs, the server leaf and the grafana leaf
//! 2. ensures the hub collector's mTLS bundle
//! 3. prunes expired certificates from both CA chains
//!
//! The configuration path is `config.toml` unless `OBS_CERTS_CONFIG` points
//! elsewhere. Log verbosity follows `RUST_LOG` (default `info`).

use std::collections::BTreeMap;
use std::env;
use std::path::Path;

use anyhow::{Context, Result};
use obs_certs::configs::PkiConfig;
use obs_certs::dir_store::DirStore;
use obs_certs::hosts::{observatorium_api_service, ObservatoriumHosts, StaticRoute};
use obs_certs::reconciler::{PassReport, Reconciler};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "OBS_CERTS_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.toml";
const MAX_ATTEMPTS: usize = 3;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("=== Observability Certificates ===\n");
    let config = load_config()?;
    let store = DirStore::new(config.data_dir.clone()).context("Failed to open bundle store")?;
    println!("✓ Bundle store at {}", config.data_dir.display());

    let service = observatorium_api_service(&config.hosts.operand_name, &config.hosts.namespace);
    let route = config.hosts.api_route.clone().map(StaticRoute);
    let hosts = ObservatoriumHosts::new(service, route);

    let mut reconciler = Reconciler::new(config, store, hosts);
    let report = run_pass(&mut reconciler)?;
    print_report(&report);

    let mtls = reconciler
        .ensure_hub_collector_mtls(false)
        .context("Failed to ensure hub collector mTLS bundle")?;
    println!("✓ Hub collector bundle {}", mtls.name);

    let pruned = reconciler.prune_expired_cas();
    if pruned.is_empty() {
        println!("✓ No expired CA certificates");
    } else {
        for name in pruned {
            println!("✓ Pruned expired certificates from {}", name);
        }
    }
    Ok(())
}

fn load_config() -> Result<PkiConfig> {
    match env::var(CONFIG_ENV) {
        Ok(path) => PkiConfig::from_file(&path),
        Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => PkiConfig::load(),
        Err(_) => {
            warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
            Ok(PkiConfig::default())
        }
    }
}

/// Re-run the pass when another writer updated a bundle underneath us.
fn run_pass<H>(reconciler: &mut Reconciler<DirStore, H>) -> Result<PassReport>
where
    H: obs_certs::hosts::HostDiscovery,
{
    let annotations = BTreeMap::new();
    let mut attempt = 1;
    loop {
        match reconciler.create_observability_certs(&annotations) {
            Err(e) if e.is_conflict() && attempt < MAX_ATTEMPTS => {
                info!(attempt, error = %e, "Bundle changed concurrently, retrying pass");
                attempt += 1;
            }
            other => return other.context("Failed to create observability certificates"),
        }
    }
}

fn print_report(report: &PassReport) {
    let state = |modified: bool| if modified { "created/renewed" } else { "unchanged" };
    println!("✓ Server CA {} ({})", report.server_ca.name, state(report.server_ca_modified));
    println!("✓ Client CA {} ({})", report.client_ca.name, state(report.client_ca_modified));
    println!("✓ Server certificate {}", report.server_cert.name);
    println!("✓ Grafana certificate {}", report.grafana_cert.name);
}
