//! Pipeline-level behavior of the gateway: a stubbed upstream exercises the
//! full handle path (resolution, buffering, transformation, caching)
//! without network access.
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode, header};
use periscope::{
    ProxyHandler,
    config::GatewayConfig,
    core::cache::{Clock, ResponseCache},
    ports::upstream::{UpstreamClient, UpstreamResult},
};

/// Manually advanced clock shared between a test and the cache under test.
struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

/// Upstream stub serving a fixed response and counting fetches.
struct FixedUpstream {
    fetches: AtomicUsize,
    content_type: &'static str,
    body: Vec<u8>,
}

impl FixedUpstream {
    fn new(content_type: &'static str, body: impl Into<Vec<u8>>) -> Arc<Self> {
        Arc::new(Self {
            fetches: AtomicUsize::new(0),
            content_type,
            body: body.into(),
        })
    }

    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UpstreamClient for FixedUpstream {
    async fn fetch(&self, _req: Request<Bytes>) -> UpstreamResult<Response<AxumBody>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, self.content_type)
            .header("x-frame-options", "DENY")
            .header("strict-transport-security", "max-age=63072000")
            .body(AxumBody::from(self.body.clone()))
            .unwrap())
    }
}

fn handler(upstream: Arc<FixedUpstream>, cache: Arc<ResponseCache>) -> ProxyHandler {
    let config = Arc::new(GatewayConfig {
        public_host: "gateway.test".to_string(),
        ..Default::default()
    });
    ProxyHandler::new(upstream, cache, config)
}

fn get(path: &str) -> Request<AxumBody> {
    Request::builder()
        .method(Method::GET)
        .uri(path)
        .header(header::HOST, "gateway.test")
        .body(AxumBody::empty())
        .unwrap()
}

async fn read_body(response: Response<AxumBody>) -> Bytes {
    BodyExt::collect(response.into_body())
        .await
        .unwrap()
        .to_bytes()
}

#[tokio::test]
async fn html_example_end_to_end() {
    // GET /https://example.org/index.html against an upstream returning a
    // minimal page with one relative anchor.
    let upstream = FixedUpstream::new(
        "text/html",
        &b"<html><head></head><body><a href=\"/x\">x</a></body></html>"[..],
    );
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let handler = handler(upstream.clone(), cache);

    let response = handler
        .handle_request(get("/https://example.org/index.html"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get("x-frame-options").is_none());
    assert!(response.headers().get("strict-transport-security").is_none());
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .unwrap(),
        "*"
    );
    assert_eq!(
        response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap(),
        "GET,PUT,POST,DELETE,OPTIONS"
    );

    let body = String::from_utf8(read_body(response).await.to_vec()).unwrap();

    // In order: injected <base>, injected favicon <link>, rewritten anchor.
    let base = body.find("<base href=\"http://gateway.test\">").unwrap();
    let favicon = body
        .find("https://www.google.com/s2/favicons?domain=example.org")
        .unwrap();
    let anchor = body
        .find("<a href=\"http://gateway.test/https://example.org/x\">")
        .unwrap();
    assert!(base < favicon);
    assert!(favicon < anchor);

    // The original relative href must not survive.
    assert!(!body.contains("href=\"/x\""));
}

#[tokio::test]
async fn cache_hit_within_ttl_then_refetch_after_expiry() {
    let upstream = FixedUpstream::new(
        "text/html",
        &b"<html><head></head><body>page</body></html>"[..],
    );
    let clock = Arc::new(ManualClock::new());
    let cache = Arc::new(ResponseCache::with_clock(
        Duration::from_secs(60),
        clock.clone(),
    ));
    let handler = handler(upstream.clone(), cache);

    let first = handler
        .handle_request(get("/https://example.org/page"))
        .await
        .unwrap();
    let first_body = read_body(first).await;

    // Within the TTL: byte-identical body, no second upstream fetch.
    clock.advance(Duration::from_secs(30));
    let second = handler
        .handle_request(get("/https://example.org/page"))
        .await
        .unwrap();
    let second_body = read_body(second).await;

    assert_eq!(first_body, second_body);
    assert_eq!(upstream.fetch_count(), 1);

    // Past the TTL: a fresh upstream fetch happens.
    clock.advance(Duration::from_secs(31));
    handler
        .handle_request(get("/https://example.org/page"))
        .await
        .unwrap();
    assert_eq!(upstream.fetch_count(), 2);
}

#[tokio::test]
async fn image_response_is_transcoded_to_webp() {
    let mut png = Vec::new();
    let img = image::RgbaImage::from_pixel(4, 4, image::Rgba([0, 128, 255, 255]));
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let upstream = FixedUpstream::new("image/png", png);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let handler = handler(upstream, cache);

    let response = handler
        .handle_request(get("/https://example.org/logo.png"))
        .await
        .unwrap();

    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/webp"
    );
    let body = read_body(response).await;
    assert_eq!(&body[0..4], b"RIFF");
    assert_eq!(&body[8..12], b"WEBP");
}

#[tokio::test]
async fn corrupt_image_passes_through_with_original_content_type() {
    let upstream = FixedUpstream::new("image/png", &b"not actually a png"[..]);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let handler = handler(upstream, cache);

    let response = handler
        .handle_request(get("/https://example.org/broken.png"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(read_body(response).await, &b"not actually a png"[..]);
}

#[tokio::test]
async fn cached_image_hit_restores_transcoded_content_type() {
    let mut png = Vec::new();
    let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([10, 20, 30, 255]));
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
        .unwrap();

    let upstream = FixedUpstream::new("image/png", png);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let handler = handler(upstream.clone(), cache);

    let first = handler
        .handle_request(get("/https://example.org/pixel.png"))
        .await
        .unwrap();
    let first_body = read_body(first).await;

    let hit = handler
        .handle_request(get("/https://example.org/pixel.png"))
        .await
        .unwrap();
    assert_eq!(
        hit.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/webp"
    );
    assert_eq!(read_body(hit).await, first_body);
    assert_eq!(upstream.fetch_count(), 1);
}

#[tokio::test]
async fn response_without_content_type_passes_through() {
    struct NoContentType;

    #[async_trait]
    impl UpstreamClient for NoContentType {
        async fn fetch(&self, _req: Request<Bytes>) -> UpstreamResult<Response<AxumBody>> {
            Ok(Response::builder()
                .status(StatusCode::OK)
                .body(AxumBody::from(&b"opaque bytes"[..]))
                .unwrap())
        }
    }

    let config = Arc::new(GatewayConfig {
        public_host: "gateway.test".to_string(),
        ..Default::default()
    });
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let handler = ProxyHandler::new(Arc::new(NoContentType), cache, config);

    let response = handler
        .handle_request(get("/https://example.org/blob"))
        .await
        .unwrap();
    assert_eq!(read_body(response).await, &b"opaque bytes"[..]);
}
