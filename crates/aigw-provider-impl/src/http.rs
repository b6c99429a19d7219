use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::RwLock;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use wreq::{Client, Method, Proxy};

use aigw_provider_core::{
    Headers, HttpMethod, TransportError, TransportErrorKind, UpstreamBody, UpstreamClient,
    UpstreamHttpRequest, UpstreamHttpResponse,
};

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub connect_timeout: Duration,
    /// Applied when the request carries no explicit deadline.
    pub default_timeout: Duration,
    /// Max silence on a streaming body before the pump gives up.
    pub stream_idle_timeout: Duration,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            default_timeout: Duration::from_secs(120),
            stream_idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Outbound HTTP with one cached client per proxy URL (`None` = direct).
/// Clients carry their own connection pools, so the cache is the unit of
/// proxy affinity.
pub struct WreqUpstreamClient {
    config: HttpClientConfig,
    clients: RwLock<HashMap<Option<String>, Client>>,
}

impl WreqUpstreamClient {
    pub fn new(config: HttpClientConfig) -> Self {
        Self {
            config,
            clients: RwLock::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let key = normalize_proxy(proxy);
        if let Ok(guard) = self.clients.read()
            && let Some(client) = guard.get(&key)
        {
            return Ok(client.clone());
        }

        let mut guard = self
            .clients
            .write()
            .map_err(|_| TransportError::other("client cache lock poisoned"))?;
        if let Some(client) = guard.get(&key) {
            return Ok(client.clone());
        }
        let client = self.build_client(key.as_deref())?;
        guard.insert(key, client.clone());
        Ok(client)
    }

    fn build_client(&self, proxy: Option<&str>) -> Result<Client, TransportError> {
        let mut builder = Client::builder()
            .connect_timeout(self.config.connect_timeout)
            .read_timeout(self.config.stream_idle_timeout);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy).map_err(|err| TransportError {
                kind: TransportErrorKind::Other,
                message: format!("invalid proxy url: {err}"),
            })?;
            builder = builder.proxy(proxy);
        }
        builder.build().map_err(transport_error)
    }
}

fn normalize_proxy(proxy: Option<&str>) -> Option<String> {
    proxy
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl UpstreamClient for WreqUpstreamClient {
    fn send<'a>(
        &'a self,
        proxy: Option<&'a str>,
        req: UpstreamHttpRequest,
    ) -> Pin<Box<dyn Future<Output = Result<UpstreamHttpResponse, TransportError>> + Send + 'a>>
    {
        Box::pin(async move {
            let client = self.client_for(proxy)?;
            let method = match req.method {
                HttpMethod::Get => Method::GET,
                HttpMethod::Post => Method::POST,
                HttpMethod::Head => Method::HEAD,
            };

            let mut builder = client.request(method, &req.url);
            for (name, value) in &req.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            if !req.stream {
                builder = builder.timeout(req.timeout.unwrap_or(self.config.default_timeout));
            }
            if let Some(body) = req.body {
                builder = builder.body(body);
            }

            let resp = builder.send().await.map_err(transport_error)?;

            let status = resp.status().as_u16();
            let headers: Headers = resp
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    let value = value.to_str().ok()?;
                    Some((name.as_str().to_string(), value.to_string()))
                })
                .collect();

            // Only successful streaming requests keep the body open; error
            // responses are always collected so the parser can classify them.
            if req.stream && (200..300).contains(&status) {
                let (tx, rx) = mpsc::channel::<Bytes>(16);
                tokio::spawn(pump_body(resp, tx, self.config.stream_idle_timeout));
                return Ok(UpstreamHttpResponse {
                    status,
                    headers,
                    body: UpstreamBody::Stream(rx),
                });
            }

            let body = resp.bytes().await.map_err(transport_error)?;
            Ok(UpstreamHttpResponse {
                status,
                headers,
                body: UpstreamBody::Bytes(body),
            })
        })
    }
}

/// Forward body chunks until the upstream ends, errors, idles out, or the
/// consumer hangs up. All of those close the channel; the SSE state machine
/// downstream turns an abrupt close into proper terminal events.
async fn pump_body(resp: wreq::Response, tx: mpsc::Sender<Bytes>, idle_timeout: Duration) {
    let mut body = resp.bytes_stream();
    while let Ok(Some(Ok(chunk))) = tokio::time::timeout(idle_timeout, body.next()).await {
        if tx.send(chunk).await.is_err() {
            return;
        }
    }
}

/// Lean on the client's own error introspection; the account state machine
/// treats every transport kind as transient anyway.
fn transport_error(err: wreq::Error) -> TransportError {
    let kind = if err.is_timeout() {
        TransportErrorKind::Timeout
    } else if err.is_connect() || err.is_connection_reset() {
        TransportErrorKind::Connect
    } else {
        TransportErrorKind::Other
    };
    TransportError {
        kind,
        message: err.to_string(),
    }
}
