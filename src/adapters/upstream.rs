use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use eyre::Result;
use hyper::{Method, Request, Response, StatusCode, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;
use tracing::Instrument;
use url::Url;

use crate::ports::upstream::{UpstreamClient, UpstreamError, UpstreamResult};

/// Upstream fetch adapter using Hyper with Rustls (HTTP/1.1 + HTTP/2).
///
/// Responsibilities:
/// * Adds a small set of sensible default headers
/// * Sets the Host header from the target URL
/// * Follows upstream redirects up to a configured cap, replaying the
///   buffered request body where the status requires it
/// * Maps connect failures and timeouts into the port's error taxonomy
///
/// The adapter never inspects response bodies; buffering and transformation
/// happen in the pipeline stage behind it.
pub struct HyperUpstream {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    request_timeout: Duration,
    max_redirects: usize,
}

impl HyperUpstream {
    /// Create a new upstream adapter.
    pub fn new(request_timeout: Duration, max_redirects: usize) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false); // Allow HTTPS URLs

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::info!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, AxumBody>(https_connector);

        Ok(Self {
            client,
            request_timeout,
            max_redirects,
        })
    }

    /// Inject a consistent set of headers if absent (User-Agent, Accept ...).
    fn add_common_headers(req: &mut Request<AxumBody>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                HeaderValue::from_static("Periscope-Gateway/1.0"),
            );
        }
        if !headers.contains_key(header::ACCEPT) {
            headers.insert(
                header::ACCEPT,
                HeaderValue::from_static(
                    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,*/*;q=0.8",
                ),
            );
        }
        if !headers.contains_key(header::ACCEPT_LANGUAGE) {
            headers.insert(
                header::ACCEPT_LANGUAGE,
                HeaderValue::from_static("en-US,en;q=0.5"),
            );
        }
    }

    /// Set the Host header to match the URL about to be fetched. Redirects
    /// can hop hosts, so this runs on every attempt.
    fn set_host_header(req: &mut Request<AxumBody>) -> UpstreamResult<()> {
        let host_str = req
            .uri()
            .host()
            .ok_or_else(|| UpstreamError::InvalidRequest("Outgoing URI has no host".to_string()))?;

        let host_header_val = if let Some(port) = req.uri().port() {
            HeaderValue::from_str(&format!("{host_str}:{}", port.as_u16()))
        } else {
            HeaderValue::from_str(host_str)
        }
        .map_err(|e| UpstreamError::InvalidRequest(format!("Invalid host header: {e}")))?;

        req.headers_mut().insert(header::HOST, host_header_val);
        Ok(())
    }

    /// Where a redirect response points, resolved against the URL that
    /// produced it (Location may be relative).
    fn redirect_location(current: &Url, response: &Response<hyper::body::Incoming>) -> Option<Url> {
        let location = response.headers().get(header::LOCATION)?.to_str().ok()?;
        match current.join(location) {
            Ok(next) => Some(next),
            Err(e) => {
                tracing::warn!(%location, "Ignoring unparseable redirect location: {e}");
                None
            }
        }
    }
}

#[async_trait]
impl UpstreamClient for HyperUpstream {
    async fn fetch(&self, req: Request<Bytes>) -> UpstreamResult<Response<AxumBody>> {
        let (parts, body) = req.into_parts();

        let mut method = parts.method.clone();
        let mut current_url: Url = parts
            .uri
            .to_string()
            .parse()
            .map_err(|e| UpstreamError::InvalidRequest(format!("Invalid target URI: {e}")))?;
        let mut current_body = Some(body);
        let mut redirects_followed = 0usize;

        loop {
            let span = tracing::info_span!(
                "upstream_request",
                upstream.url = %current_url,
                http.method = %method,
                http.status_code = tracing::field::Empty,
            );

            let mut outgoing = Request::builder()
                .method(method.clone())
                .uri(current_url.as_str())
                .version(Version::HTTP_11)
                .body(AxumBody::from(
                    current_body.clone().unwrap_or_else(Bytes::new),
                ))
                .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
            *outgoing.headers_mut() = parts.headers.clone();

            Self::add_common_headers(&mut outgoing);
            Self::set_host_header(&mut outgoing)?;

            tracing::debug!(parent: &span, "Forwarding request upstream");

            let attempt = timeout(self.request_timeout, self.client.request(outgoing))
                .instrument(span.clone())
                .await;

            let response = match attempt {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    span.record("http.status_code", 599u16);
                    tracing::error!(
                        "Error making request to target {} ({} {}): {}",
                        current_url,
                        method,
                        current_url.path(),
                        e
                    );
                    return Err(UpstreamError::Connection(format!(
                        "Request to {method} {current_url} failed: {e}"
                    )));
                }
                Err(_) => {
                    span.record("http.status_code", 599u16);
                    tracing::error!("Request to {} timed out", current_url);
                    return Err(UpstreamError::Timeout(self.request_timeout.as_secs()));
                }
            };

            let status = response.status();
            span.record("http.status_code", status.as_u16());

            if status.is_redirection() {
                if let Some(next_url) = Self::redirect_location(&current_url, &response) {
                    if redirects_followed >= self.max_redirects {
                        return Err(UpstreamError::TooManyRedirects(self.max_redirects));
                    }
                    redirects_followed += 1;

                    // 303 always re-issues as GET; 301/302 downgrade
                    // non-idempotent methods the way browsers do. 307/308
                    // replay the method and body verbatim.
                    let downgrade = status == StatusCode::SEE_OTHER
                        || ((status == StatusCode::MOVED_PERMANENTLY
                            || status == StatusCode::FOUND)
                            && method != Method::GET
                            && method != Method::HEAD);
                    if downgrade {
                        method = Method::GET;
                        current_body = None;
                    }

                    tracing::debug!(next = %next_url, "Following upstream redirect");
                    current_url = next_url;
                    continue;
                }
            }

            // Convert Hyper response body back to AxumBody. Remove
            // Transfer-Encoding since the body is being decoded/streamed and
            // the downstream server will handle framing.
            let (mut resp_parts, hyper_body) = response.into_parts();
            resp_parts.headers.remove(header::TRANSFER_ENCODING);

            return Ok(Response::from_parts(resp_parts, AxumBody::new(hyper_body)));
        }
    }
}
