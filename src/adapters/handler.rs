//! The per-request proxy pipeline.
//!
//! Order of stages for one request: cache lookup → on miss, target
//! resolution and self-loop guard → WebSocket relay or upstream fetch →
//! full-body buffering → header normalization → content transform →
//! cache store → response. Each request is processed independently
//! end-to-end; nothing is shared between requests beyond the worker's
//! cache.
use std::sync::Arc;

use axum::{
    body::Body as AxumBody,
    http::{HeaderMap, HeaderValue, StatusCode, header},
};
use bytes::Bytes;
use eyre::{Result, WrapErr};
use http_body_util::BodyExt;
use hyper::{Method, Request, Response};
use tracing::Instrument;

use crate::{
    adapters::websocket,
    config::GatewayConfig,
    core::{
        cache::ResponseCache,
        rewrite::RewriteContext,
        target::{TargetError, resolve_target},
        transform::{self, ContentKind},
    },
    ports::upstream::UpstreamClient,
};

/// Response headers that would prevent the transformed content from being
/// embedded or re-served; always removed from upstream responses.
const STRIPPED_RESPONSE_HEADERS: [&str; 5] = [
    "x-frame-options",
    "x-content-type-options",
    "x-xss-protection",
    "content-security-policy",
    "strict-transport-security",
];

/// Hop-by-hop headers, meaningful only for a single transport link.
const HOP_BY_HOP_HEADERS: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const CORS_ALLOW_METHODS: &str = "GET,PUT,POST,DELETE,OPTIONS";
const CORS_ALLOW_HEADERS: &str = "Content-Type, Authorization, Content-Length, X-Requested-With";

/// HTTP handler for the Periscope gateway. One instance per worker, owning
/// that worker's upstream client and response cache.
pub struct ProxyHandler {
    upstream: Arc<dyn UpstreamClient>,
    cache: Arc<ResponseCache>,
    config: Arc<GatewayConfig>,
}

impl ProxyHandler {
    pub fn new(
        upstream: Arc<dyn UpstreamClient>,
        cache: Arc<ResponseCache>,
        config: Arc<GatewayConfig>,
    ) -> Self {
        Self {
            upstream,
            cache,
            config,
        }
    }

    /// The worker's cache (exposed for maintenance tasks).
    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Main request entry point.
    pub async fn handle_request(
        &self,
        req: Request<AxumBody>,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        let request_id = uuid::Uuid::new_v4();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str().to_owned())
            .unwrap_or_else(|| req.uri().path().to_owned());

        let span = crate::tracing_setup::create_request_span(
            req.method().as_str(),
            &path_and_query,
            &request_id.to_string(),
        );

        self.process(req, path_and_query).instrument(span).await
    }

    /// The pipeline proper, running inside the request span.
    async fn process(
        &self,
        req: Request<AxumBody>,
        path_and_query: String,
    ) -> Result<Response<AxumBody>, eyre::Error> {
        let method = req.method().clone();
        let is_upgrade = websocket::is_upgrade_request(req.headers());

        // Only plain GETs are cached; an upgrade handshake must never be
        // answered with a stored body.
        let cacheable = method == Method::GET && !is_upgrade;

        if cacheable {
            if let Some(hit) = self.cache.get(&path_and_query).await {
                tracing::debug!("cache hit, skipping upstream fetch");
                return Self::cached_response(hit.body, hit.content_type.as_deref());
            }
        }

        let target = match resolve_target(&path_and_query, &self.config.public_host) {
            Ok(target) => target,
            Err(TargetError::NotAProxyRequest) => {
                tracing::debug!("not a proxy request, falling through");
                return Self::text_response(StatusCode::NOT_FOUND, "Not Found");
            }
            Err(error @ TargetError::SelfLoop) => {
                tracing::info!("rejecting self-loop target");
                return Self::text_response(StatusCode::BAD_REQUEST, &error.to_string());
            }
            Err(TargetError::InvalidTarget(reason)) => {
                tracing::info!(%reason, "rejecting malformed proxy target");
                return Self::text_response(StatusCode::BAD_REQUEST, "Invalid proxy target");
            }
        };

        tracing::info!(target = %target, "Handling {} request", method);

        // WebSocket upgrades bypass buffering and transformation entirely.
        if is_upgrade {
            return websocket::relay_upgrade(req, &target).await;
        }

        let proxy_origin = self.proxy_origin(req.headers());

        // Buffer the inbound body so redirects can replay it.
        let (parts, inbound_body) = req.into_parts();
        let inbound_bytes = BodyExt::collect(inbound_body)
            .await
            .wrap_err("Failed to read client request body")?
            .to_bytes();

        let mut upstream_req = Request::builder()
            .method(parts.method.clone())
            .uri(target.as_str())
            .body(inbound_bytes)
            .wrap_err("Failed to build upstream request")?;
        *upstream_req.headers_mut() = Self::forwardable_headers(&parts.headers);

        let upstream_response = match self.upstream.fetch(upstream_req).await {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(target = %target, "upstream fetch failed: {error}");
                let status = error.client_status();
                return Self::text_response(
                    status,
                    status.canonical_reason().unwrap_or("Upstream failure"),
                );
            }
        };

        // Full-body buffering: transforms need the complete payload, so
        // this applies even when the content type needs no transform.
        let (mut resp_parts, resp_body) = upstream_response.into_parts();
        let buffered = match BodyExt::collect(resp_body).await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                tracing::error!(target = %target, "upstream body read failed: {e}");
                return Self::text_response(StatusCode::BAD_GATEWAY, "Bad Gateway");
            }
        };

        Self::normalize_response_headers(&mut resp_parts.headers);

        let content_type = resp_parts
            .headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let kind = ContentKind::from_content_type(content_type.as_deref());
        let ctx = RewriteContext::new(proxy_origin, target.clone());

        let outcome = transform::apply(kind, buffered, &ctx, self.config.webp_quality);

        if let Some(ct) = outcome.content_type_override {
            resp_parts
                .headers
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        resp_parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(outcome.body.len()));

        if cacheable && resp_parts.status.is_success() {
            let final_content_type = resp_parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned);
            self.cache
                .put(path_and_query, outcome.body.clone(), final_content_type)
                .await;
        }

        Ok(Response::from_parts(
            resp_parts,
            AxumBody::from(outcome.body),
        ))
    }

    /// Scheme + host the gateway is reached at for this request, used to
    /// build gateway-relative links.
    fn proxy_origin(&self, headers: &HeaderMap) -> String {
        let scheme = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("http");
        let host = headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(&self.config.public_host);
        format!("{scheme}://{host}")
    }

    /// Inbound headers minus hop-by-hop headers and Host (the upstream
    /// adapter sets Host from the target).
    fn forwardable_headers(headers: &HeaderMap) -> HeaderMap {
        let mut forwarded = HeaderMap::new();
        for (name, value) in headers {
            let lowered = name.as_str().to_ascii_lowercase();
            if lowered == "host" || HOP_BY_HOP_HEADERS.contains(&lowered.as_str()) {
                continue;
            }
            forwarded.append(name.clone(), value.clone());
        }
        forwarded
    }

    /// Strip security and hop-by-hop headers from the upstream response and
    /// force permissive CORS headers, so the transformed content can be
    /// embedded and re-served anywhere.
    fn normalize_response_headers(headers: &mut HeaderMap) {
        for name in STRIPPED_RESPONSE_HEADERS {
            headers.remove(name);
        }
        for name in HOP_BY_HOP_HEADERS {
            headers.remove(name);
        }
        Self::apply_cors_headers(headers);
    }

    fn apply_cors_headers(headers: &mut HeaderMap) {
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static(CORS_ALLOW_METHODS),
        );
        headers.insert(
            header::ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static(CORS_ALLOW_HEADERS),
        );
    }

    fn text_response(status: StatusCode, body: &str) -> Result<Response<AxumBody>> {
        Response::builder()
            .status(status)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(AxumBody::from(body.to_owned()))
            .wrap_err("Failed to build text response")
    }

    /// A response served from the cache. The stored content type is
    /// restored; CORS headers are synthesized like on the forwarding path.
    fn cached_response(body: Bytes, content_type: Option<&str>) -> Result<Response<AxumBody>> {
        let mut builder = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, body.len());
        if let Some(ct) = content_type {
            builder = builder.header(header::CONTENT_TYPE, ct);
        }

        let mut response = builder
            .body(AxumBody::from(body))
            .wrap_err("Failed to build cached response")?;
        Self::apply_cors_headers(response.headers_mut());
        Ok(response)
    }
}
