//! Server hostname discovery.
//!
//! The server leaf must cover the in-cluster API service name and, when the
//! cluster has an ingress controller, the externally reachable API route.
//! Routes come and go over the lifetime of the deployment; the leaf manager
//! renews the server certificate whenever the discovered list grows.

use tracing::error;

use crate::error::{PkiError, Result};

/// Source of the DNS names the server certificate must cover, primary
/// internal service name first.
pub trait HostDiscovery {
    fn hosts(&self) -> Result<Vec<String>>;
}

/// Looks up the externally reachable API host.
pub trait RouteLookup {
    fn api_host(&self) -> Result<String>;
}

/// Fixed host list.
#[derive(Debug, Clone, Default)]
pub struct StaticHosts(pub Vec<String>);

impl HostDiscovery for StaticHosts {
    fn hosts(&self) -> Result<Vec<String>> {
        Ok(self.0.clone())
    }
}

/// A route host known up front, e.g. from configuration.
#[derive(Debug, Clone)]
pub struct StaticRoute(pub String);

impl RouteLookup for StaticRoute {
    fn api_host(&self) -> Result<String> {
        if self.0.is_empty() {
            return Err(PkiError::HostDiscovery("api route has no host".to_string()));
        }
        Ok(self.0.clone())
    }
}

/// In-cluster service DNS name of the observatorium API.
pub fn observatorium_api_service(operand_name: &str, namespace: &str) -> String {
    format!(
        "{}-observatorium-api.{}.svc.cluster.local",
        operand_name, namespace
    )
}

/// Service name plus, when an ingress controller exists, the API route.
pub struct ObservatoriumHosts<R> {
    service: String,
    route: Option<R>,
}

impl<R: RouteLookup> ObservatoriumHosts<R> {
    pub fn new(service: impl Into<String>, route: Option<R>) -> Self {
        Self {
            service: service.into(),
            route,
        }
    }
}

impl<R: RouteLookup> HostDiscovery for ObservatoriumHosts<R> {
    fn hosts(&self) -> Result<Vec<String>> {
        let mut hosts = vec![self.service.clone()];
        if let Some(route) = &self.route {
            let host = route.api_host().map_err(|e| {
                error!(error = %e, "Failed to get api route address");
                e
            })?;
            hosts.push(host);
        }
        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingRoute;

    impl RouteLookup for FailingRoute {
        fn api_host(&self) -> Result<String> {
            Err(PkiError::HostDiscovery("route not admitted".to_string()))
        }
    }

    #[test]
    fn service_name_comes_first() {
        let svc = observatorium_api_service("observability", "open-cluster-management-observability");
        assert_eq!(
            svc,
            "observability-observatorium-api.open-cluster-management-observability.svc.cluster.local"
        );

        let without_route = ObservatoriumHosts::<StaticRoute>::new(svc.clone(), None);
        assert_eq!(without_route.hosts().unwrap(), vec![svc.clone()]);

        let with_route = ObservatoriumHosts::new(svc.clone(), Some(StaticRoute("api.example.com".to_string())));
        assert_eq!(with_route.hosts().unwrap(), vec![svc, "api.example.com".to_string()]);
    }

    #[test]
    fn route_failure_is_fatal() {
        let hosts = ObservatoriumHosts::new("svc", Some(FailingRoute));
        assert!(matches!(hosts.hosts().unwrap_err(), PkiError::HostDiscovery(_)));
        assert!(StaticRoute(String::new()).api_host().is_err());
    }
}
