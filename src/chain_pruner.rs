//! Chain Pruner
//!
//! Garbage-collects CA chains after rotations. The first certificate in a
//! chain is the active CA and is kept without inspection; every later entry
//! is dropped when it fails to parse or its notAfter has passed. Surviving
//! entries are copied as the exact bytes they were stored with, in their
//! original order. Text between blocks goes with the block that follows it
//! and text after the last block is kept, so a chain with nothing to drop
//! comes back byte for byte.

use std::cmp::Ordering;
use std::time::SystemTime;

use openssl::asn1::Asn1Time;
use openssl::x509::X509;
use tracing::{error, info};

use crate::bundle::Bundle;
use crate::error::Result;
use crate::factory::asn1_time;
use crate::pem_codec::blocks;
use crate::store::BundleStore;

pub struct ChainPruner<S> {
    store: S,
}

impl<S: BundleStore> ChainPruner<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Drop expired entries from `bundle`'s CA chain.
    ///
    /// The store is written only when the chain actually shrank. Returns the
    /// resulting bundle and whether it was written.
    pub fn prune_expired_ca(&self, bundle: &Bundle) -> Result<(Bundle, bool)> {
        let pruned = prune_chain(&bundle.name, &bundle.ca_chain, SystemTime::now());
        if pruned.len() == bundle.ca_chain.len() {
            return Ok((bundle.clone(), false));
        }
        let stored = self.store.update(&bundle.with_chain(pruned)).map_err(|e| {
            error!(name = %bundle.name, error = %e, "Failed to update ca secret to removed expired ca");
            e
        })?;
        info!(name = %bundle.name, "Expired certificates are removed");
        Ok((stored, true))
    }

    /// Read the CA bundle `name` and prune it. `Ok(None)` if it does not exist.
    pub fn prune_by_name(&self, name: &str) -> Result<Option<(Bundle, bool)>> {
        match self.store.get(name)? {
            Some(bundle) => self.prune_expired_ca(&bundle).map(Some),
            None => Ok(None),
        }
    }
}

/// Chain bytes with expired or unparsable non-leading entries removed.
pub fn prune_chain(name: &str, chain: &[u8], now: SystemTime) -> Vec<u8> {
    let now = match asn1_time(now) {
        Ok(now) => now,
        Err(e) => {
            error!(name = %name, error = %e, "Failed to read current time, keeping chain");
            return chain.to_vec();
        }
    };

    let mut entries = blocks(chain);
    let Some(active) = entries.next() else {
        return chain.to_vec();
    };
    let mut kept = chain[..active.range.end].to_vec();
    let mut scanned = active.range.end;

    for entry in entries {
        let leading = scanned..entry.range.end;
        scanned = entry.range.end;
        match entry.contents().and_then(|der| X509::from_der(der).ok()) {
            None => {
                error!(name = %name, "Find wrong cert bytes, needs to remove it");
            }
            Some(cert) if is_expired(&cert, &now) => {
                info!(name = %name, "CA certificate expired, needs to remove it");
            }
            Some(_) => kept.extend_from_slice(&chain[leading]),
        }
    }
    kept.extend_from_slice(&chain[scanned..]);
    kept
}

fn is_expired(cert: &X509, now: &Asn1Time) -> bool {
    matches!(cert.not_after().compare(now), Ok(Ordering::Less))
}
