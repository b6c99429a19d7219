use std::time::Duration;

use bytes::Bytes;

use aigw_provider_core::{
    Headers, HttpMethod, TransportError, UpstreamBody, UpstreamClient, UpstreamHttpRequest,
    UpstreamHttpResponse,
};

/// Iterate base URLs in priority order. A 401 is returned immediately (the
/// credential needs a refresh, not another mirror); other non-2xx responses
/// fall through to the next URL; only the final failure propagates.
pub(crate) async fn send_with_fallback(
    client: &dyn UpstreamClient,
    proxy: Option<&str>,
    urls: &[String],
    headers: &Headers,
    body: Bytes,
    stream: bool,
    timeout: Option<Duration>,
) -> Result<UpstreamHttpResponse, TransportError> {
    let mut last_response: Option<UpstreamHttpResponse> = None;
    let mut last_error: Option<TransportError> = None;

    for (attempt, url) in urls.iter().enumerate() {
        let is_last = attempt + 1 == urls.len();
        let request = UpstreamHttpRequest {
            method: HttpMethod::Post,
            url: url.clone(),
            headers: headers.clone(),
            body: Some(body.clone()),
            stream,
            timeout,
        };

        match client.send(proxy, request).await {
            Ok(response) => {
                let status = response.status;
                if (200..300).contains(&status) || status == 401 {
                    return Ok(response);
                }
                tracing::debug!(url, status, "base url attempt failed");
                if is_last {
                    return Ok(response);
                }
                last_response = Some(response);
            }
            Err(err) => {
                tracing::debug!(url, error = %err, "base url attempt unreachable");
                if is_last {
                    // Prefer reporting an HTTP failure over a transport one
                    // when an earlier mirror produced a response.
                    if let Some(response) = last_response {
                        return Ok(response);
                    }
                    return Err(err);
                }
                last_error = Some(err);
            }
        }
    }

    match (last_response, last_error) {
        (Some(response), _) => Ok(response),
        (None, Some(err)) => Err(err),
        (None, None) => Err(TransportError::other("no base urls configured")),
    }
}

pub(crate) async fn collect_bytes(body: UpstreamBody) -> Bytes {
    match body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut out = Vec::new();
            while let Some(chunk) = rx.recv().await {
                out.extend_from_slice(&chunk);
            }
            Bytes::from(out)
        }
    }
}
