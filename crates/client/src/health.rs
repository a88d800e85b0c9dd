use std::time::{Duration, Instant};

use futures::future::join_all;

use crate::endpoint::{ResolvedEndpoints, ResolvedService, ServiceKind};

/// Result of probing one service's `/status` endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHealth {
    pub service: ServiceKind,
    pub url: String,
    pub status: Option<u16>,
    pub latency_ms: u64,
    pub ok: bool,
    pub error: Option<String>,
}

/// Probes every service concurrently; never fails as a whole.
pub async fn check_services(
    client: &reqwest::Client,
    endpoints: &ResolvedEndpoints,
    timeout: Duration,
) -> Vec<ServiceHealth> {
    join_all(
        endpoints
            .services()
            .iter()
            .map(|service| check_service(client, service, timeout)),
    )
    .await
}

pub async fn check_service(
    client: &reqwest::Client,
    service: &ResolvedService,
    timeout: Duration,
) -> ServiceHealth {
    let url = service.status_url();
    let started_at = Instant::now();
    let outcome = tokio::time::timeout(timeout, client.get(&url).send()).await;
    let latency_ms = started_at.elapsed().as_millis() as u64;

    let (status, error) = match outcome {
        Ok(Ok(response)) => (Some(response.status().as_u16()), None),
        Ok(Err(error)) => (None, Some(error.to_string())),
        Err(_) => (None, Some(format!("timed out after {} ms", timeout.as_millis()))),
    };
    let ok = status.is_some_and(|code| code < 400);

    if ok {
        tracing::info!(service = %service.kind, url = %url, latency_ms, "service healthy");
    } else {
        tracing::warn!(
            service = %service.kind,
            url = %url,
            status = ?status,
            error = error.as_deref().unwrap_or_default(),
            "service unhealthy"
        );
    }

    ServiceHealth {
        service: service.kind,
        url,
        status,
        latency_ms,
        ok,
        error,
    }
}
