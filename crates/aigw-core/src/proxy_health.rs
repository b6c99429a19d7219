use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use aigw_provider_core::{HttpMethod, UpstreamClient, UpstreamHttpRequest};
use aigw_storage::Repository;

use crate::proxy_pool::ProxyPool;

#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    pub interval: Duration,
    pub tcp_timeout: Duration,
    pub http_timeout: Duration,
    /// Known-reachable URL HEADed through each proxy.
    pub probe_url: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            tcp_timeout: Duration::from_secs(5),
            http_timeout: Duration::from_secs(30),
            probe_url: "https://www.gstatic.com/generate_204".to_string(),
        }
    }
}

/// Two-tier prober: a cheap TCP connect to the proxy itself, then a HEAD
/// through it. TCP failure marks the proxy down; a reachable proxy that
/// cannot complete the HEAD is only degraded.
pub fn spawn_proxy_health_loop(
    pool: Arc<ProxyPool>,
    repo: Repository,
    client: Arc<dyn UpstreamClient>,
    config: HealthCheckConfig,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = check_all(&pool, &repo, client.as_ref(), &config).await {
                        tracing::warn!(error = %err, "proxy health sweep failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
    })
}

async fn check_all(
    pool: &ProxyPool,
    repo: &Repository,
    client: &dyn UpstreamClient,
    config: &HealthCheckConfig,
) -> Result<(), aigw_storage::StorageError> {
    for proxy in repo.list_active_proxies().await? {
        check_one(pool, client, config, proxy.id, &proxy.url, &proxy.protocol).await;
    }
    Ok(())
}

async fn check_one(
    pool: &ProxyPool,
    client: &dyn UpstreamClient,
    config: &HealthCheckConfig,
    proxy_id: i64,
    url: &str,
    protocol: &str,
) {
    let Some((host, port)) = proxy_host_port(url, protocol) else {
        tracing::warn!(proxy_id, url, "proxy url not parseable; marking down");
        pool.mark_down(proxy_id).await;
        return;
    };

    // Tier 1: can we even open a socket to the proxy?
    let connect = tokio::time::timeout(
        config.tcp_timeout,
        TcpStream::connect((host.as_str(), port)),
    )
    .await;
    match connect {
        Ok(Ok(_)) => {}
        _ => {
            tracing::info!(proxy_id, host, port, "proxy tcp probe failed");
            pool.mark_down(proxy_id).await;
            return;
        }
    }

    // Tier 2: does traffic actually pass through it?
    let started = Instant::now();
    let probe = client
        .send(
            Some(url),
            UpstreamHttpRequest {
                method: HttpMethod::Head,
                url: config.probe_url.clone(),
                headers: Vec::new(),
                body: None,
                stream: false,
                timeout: Some(config.http_timeout),
            },
        )
        .await;

    match probe {
        Ok(response) if (200..300).contains(&response.status) => {
            pool.mark_healthy(proxy_id, Some(started.elapsed())).await;
        }
        Ok(response) => {
            tracing::info!(proxy_id, status = response.status, "proxy http probe degraded");
            pool.mark_degraded(proxy_id).await;
        }
        Err(err) => {
            tracing::info!(proxy_id, error = %err, "proxy http probe failed");
            pool.mark_degraded(proxy_id).await;
        }
    }
}

/// Extract a connectable host:port pair from a proxy URL. Bare `host:port`
/// rows are stored without a scheme; the proxy protocol supplies one for the
/// parser and the default port.
fn proxy_host_port(raw: &str, protocol: &str) -> Option<(String, u16)> {
    let normalized = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("{protocol}://{raw}")
    };
    let parsed = url::Url::parse(&normalized).ok()?;

    // `host_str` keeps IPv6 brackets, which `connect` would choke on.
    let host = match parsed.host()? {
        url::Host::Domain(domain) => domain.to_string(),
        url::Host::Ipv4(ip) => ip.to_string(),
        url::Host::Ipv6(ip) => ip.to_string(),
    };
    let port = parsed.port().unwrap_or(match protocol {
        "https" => 443,
        "socks5" => 1080,
        _ => 80,
    });
    Some((host, port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_port_parses_common_shapes() {
        assert_eq!(
            proxy_host_port("http://10.0.0.1:8080", "http"),
            Some(("10.0.0.1".to_string(), 8080))
        );
        assert_eq!(
            proxy_host_port("socks5://user:pw@proxy.example:9050/", "socks5"),
            Some(("proxy.example".to_string(), 9050))
        );
        assert_eq!(
            proxy_host_port("https://proxy.example", "https"),
            Some(("proxy.example".to_string(), 443))
        );
        assert_eq!(proxy_host_port("http://:8080", "http"), None);
    }

    #[test]
    fn ipv6_hosts_lose_their_brackets() {
        assert_eq!(
            proxy_host_port("http://[::1]:3128", "http"),
            Some(("::1".to_string(), 3128))
        );
        assert_eq!(
            proxy_host_port("socks5://[2001:db8::1]", "socks5"),
            Some(("2001:db8::1".to_string(), 1080))
        );
    }

    #[test]
    fn schemeless_rows_take_the_protocol_column() {
        assert_eq!(
            proxy_host_port("10.0.0.7:1080", "socks5"),
            Some(("10.0.0.7".to_string(), 1080))
        );
    }
}
