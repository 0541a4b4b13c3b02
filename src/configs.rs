use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};

/// Annotation on the owning object that overrides the leaf validity duration.
pub const ANNOTATION_CERT_DURATION: &str = "mco-cert-duration";

const DEFAULT_CERT_DURATION: &str = "8760h";

#[derive(Debug, Deserialize, Clone)]
pub struct PkiConfig {
    #[serde(default)]
    pub subject: SubjectConfig,
    /// Leaf validity as a Go-style duration string. CA validity is five times this.
    #[serde(default = "default_cert_duration")]
    pub cert_duration: String,
    #[serde(default)]
    pub bundles: BundleNames,
    #[serde(default)]
    pub common_names: CommonNames,
    #[serde(default)]
    pub csr: CsrConfig,
    #[serde(default)]
    pub backup_label: BackupLabel,
    #[serde(default)]
    pub hosts: HostsConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(skip)]
    duration_override: Option<Duration>,
}

impl Default for PkiConfig {
    fn default() -> Self {
        Self {
            subject: SubjectConfig::default(),
            cert_duration: default_cert_duration(),
            bundles: BundleNames::default(),
            common_names: CommonNames::default(),
            csr: CsrConfig::default(),
            backup_label: BackupLabel::default(),
            hosts: HostsConfig::default(),
            data_dir: default_data_dir(),
            duration_override: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubjectConfig {
    #[serde(default = "default_organization")]
    pub organization: String,
    #[serde(default = "default_country")]
    pub country: String,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            organization: default_organization(),
            country: default_country(),
        }
    }
}

/// Well-known store names for each CA and leaf bundle.
#[derive(Debug, Deserialize, Clone)]
pub struct BundleNames {
    #[serde(default = "default_server_ca_bundle")]
    pub server_ca: String,
    #[serde(default = "default_client_ca_bundle")]
    pub client_ca: String,
    #[serde(default = "default_server_cert_bundle")]
    pub server_cert: String,
    #[serde(default = "default_grafana_cert_bundle")]
    pub grafana_cert: String,
    #[serde(default = "default_hub_collector_mtls_bundle")]
    pub hub_collector_mtls: String,
}

impl Default for BundleNames {
    fn default() -> Self {
        Self {
            server_ca: default_server_ca_bundle(),
            client_ca: default_client_ca_bundle(),
            server_cert: default_server_cert_bundle(),
            grafana_cert: default_grafana_cert_bundle(),
            hub_collector_mtls: default_hub_collector_mtls_bundle(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CommonNames {
    #[serde(default = "default_server_ca_cn")]
    pub server_ca: String,
    #[serde(default = "default_client_ca_cn")]
    pub client_ca: String,
    #[serde(default = "default_server_cert_cn")]
    pub server_cert: String,
    #[serde(default = "default_grafana_cn")]
    pub grafana_cert: String,
}

impl Default for CommonNames {
    fn default() -> Self {
        Self {
            server_ca: default_server_ca_cn(),
            client_ca: default_client_ca_cn(),
            server_cert: default_server_cert_cn(),
            grafana_cert: default_grafana_cn(),
        }
    }
}

/// Fixed identity carried by the hub collector's certificate request.
#[derive(Debug, Deserialize, Clone)]
pub struct CsrConfig {
    #[serde(default = "default_client_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_csr_ou")]
    pub organizational_unit: String,
    #[serde(default = "default_csr_user")]
    pub user: String,
    #[serde(default = "default_csr_dns_name")]
    pub dns_name: String,
}

impl Default for CsrConfig {
    fn default() -> Self {
        Self {
            common_name: default_client_ca_cn(),
            organizational_unit: default_csr_ou(),
            user: default_csr_user(),
            dns_name: default_csr_dns_name(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackupLabel {
    #[serde(default = "default_backup_label_name")]
    pub name: String,
    #[serde(default)]
    pub value: String,
}

impl Default for BackupLabel {
    fn default() -> Self {
        Self {
            name: default_backup_label_name(),
            value: String::new(),
        }
    }
}

/// Where the observatorium API is reachable. `api_route` is set when the
/// cluster exposes the API through an ingress route.
#[derive(Debug, Deserialize, Clone)]
pub struct HostsConfig {
    #[serde(default = "default_operand_name")]
    pub operand_name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub api_route: Option<String>,
}

impl Default for HostsConfig {
    fn default() -> Self {
        Self {
            operand_name: default_operand_name(),
            namespace: default_namespace(),
            api_route: None,
        }
    }
}

fn default_cert_duration() -> String {
    DEFAULT_CERT_DURATION.to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/bundles")
}

fn default_organization() -> String {
    "Red Hat, Inc.".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

fn default_server_ca_bundle() -> String {
    "observability-server-ca-certs".to_string()
}

fn default_client_ca_bundle() -> String {
    "observability-client-ca-certs".to_string()
}

fn default_server_cert_bundle() -> String {
    "observability-server-certs".to_string()
}

fn default_grafana_cert_bundle() -> String {
    "observability-grafana-certs".to_string()
}

fn default_hub_collector_mtls_bundle() -> String {
    "observability-controller-open-cluster-management.io-observability-signer-client-cert"
        .to_string()
}

fn default_server_ca_cn() -> String {
    "observability-server-ca-certificate".to_string()
}

fn default_client_ca_cn() -> String {
    "observability-client-ca-certificate".to_string()
}

fn default_server_cert_cn() -> String {
    "observability-server-certificate".to_string()
}

fn default_grafana_cn() -> String {
    "grafana".to_string()
}

fn default_csr_ou() -> String {
    "acm".to_string()
}

fn default_csr_user() -> String {
    "managed-cluster-observability".to_string()
}

fn default_csr_dns_name() -> String {
    "observability-controller.addon.open-cluster-management.io".to_string()
}

fn default_operand_name() -> String {
    "observability".to_string()
}

fn default_namespace() -> String {
    "open-cluster-management-observability".to_string()
}

fn default_backup_label_name() -> String {
    "cluster.open-cluster-management.io/backup".to_string()
}

impl PkiConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self> {
        let config_str =
            fs::read_to_string(path).context(format!("Failed to read config file: {}", path))?;

        let config: PkiConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        parse_duration(&config.cert_duration)
            .context(format!("Invalid cert_duration {:?}", config.cert_duration))?;

        Ok(config)
    }

    /// Load configuration with default path (config.toml)
    pub fn load() -> Result<Self> {
        Self::from_file("config.toml")
    }

    /// Leaf certificate validity. Falls back to one year if the configured
    /// string does not parse.
    pub fn leaf_duration(&self) -> Duration {
        if let Some(duration) = self.duration_override {
            return duration;
        }
        parse_duration(&self.cert_duration).unwrap_or_else(|_| default_duration())
    }

    /// Apply the owning object's annotations for this pass.
    ///
    /// A missing or unparsable `mco-cert-duration` resets to the configured
    /// duration, so removing the annotation takes effect on the next pass.
    pub fn apply_annotations(&mut self, annotations: &BTreeMap<String, String>) {
        self.duration_override = None;
        let Some(value) = annotations
            .get(ANNOTATION_CERT_DURATION)
            .filter(|v| !v.is_empty())
        else {
            return;
        };
        match parse_duration(value) {
            Ok(duration) => {
                info!(duration = ?duration, "Cert duration is overridden");
                self.duration_override = Some(duration);
            }
            Err(e) => {
                error!(value = %value, error = %e, "Failed to parse cert duration, using default");
            }
        }
    }
}

fn default_duration() -> Duration {
    Duration::from_secs(365 * 24 * 60 * 60)
}

/// Longest duration the annotation accepts, about 292 years. Same ceiling
/// as a signed 64-bit nanosecond count.
const MAX_DURATION_MILLIS: u128 = 9_223_372_036_854;

/// Parse a Go-style duration such as `8760h`, `1h30m`, `90s` or `1500ms`.
///
/// Sub-second remainders are truncated; certificate validity is whole seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(anyhow!("duration cannot be empty"));
    }

    let mut total_millis: u128 = 0;
    let mut rest = input;
    while !rest.is_empty() {
        let digits_end = rest
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| anyhow!("missing unit in duration {:?}", input))?;
        if digits_end == 0 {
            return Err(anyhow!("expected number in duration {:?}", input));
        }
        let value: u128 = rest[..digits_end]
            .parse()
            .context(format!("invalid number in duration {:?}", input))?;
        rest = &rest[digits_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(rest.len());
        let millis_per_unit: u128 = match &rest[..unit_end] {
            "ms" => 1,
            "s" => 1_000,
            "m" => 60_000,
            "h" => 3_600_000,
            other => return Err(anyhow!("unknown unit {:?} in duration {:?}", other, input)),
        };
        total_millis = value
            .checked_mul(millis_per_unit)
            .and_then(|millis| total_millis.checked_add(millis))
            .filter(|millis| *millis <= MAX_DURATION_MILLIS)
            .ok_or_else(|| anyhow!("duration {:?} is too large", input))?;
        rest = &rest[unit_end..];
    }

    let secs = u64::try_from(total_millis / 1_000)
        .map_err(|_| anyhow!("duration {:?} is too large", input))?;
    if secs == 0 {
        return Err(anyhow!("duration {:?} is shorter than one second", input));
    }
    Ok(Duration::from_secs(secs))
}
