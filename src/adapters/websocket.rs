//! Transparent WebSocket relaying.
//!
//! An upgrade request addressed at a proxy target is answered with a 101
//! directly, the client connection is adopted once hyper hands over the raw
//! stream, a second WebSocket connection is dialed to the target, and
//! frames are relayed in both directions until either side closes. Nothing
//! is buffered or transformed on this path.
use axum::body::Body as AxumBody;
use base64::Engine;
use eyre::{Result, WrapErr};
use futures_util::{SinkExt, StreamExt};
use hyper::{
    Request, Response, StatusCode,
    header::{self, HeaderMap},
    upgrade::Upgraded,
};
use hyper_util::rt::TokioIo;
use sha1::{Digest, Sha1};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Role,
};
use url::Url;

/// Fixed GUID from RFC 6455 used to derive the accept key.
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Whether the request asks for a WebSocket upgrade.
pub fn is_upgrade_request(headers: &HeaderMap) -> bool {
    let wants_upgrade = headers
        .get(header::CONNECTION)
        .and_then(|v| v.to_str().ok())
        .map(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        })
        .unwrap_or(false);

    let to_websocket = headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);

    wants_upgrade && to_websocket
}

/// `Sec-WebSocket-Accept` value for a client's `Sec-WebSocket-Key`.
pub fn compute_accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

/// The `ws(s)://` endpoint corresponding to an `http(s)://` proxy target.
pub fn websocket_url(target: &Url) -> String {
    let scheme = match target.scheme() {
        "https" => "wss",
        _ => "ws",
    };
    let mut ws = format!("{scheme}://{}", target.authority());
    ws.push_str(target.path());
    if let Some(query) = target.query() {
        ws.push('?');
        ws.push_str(query);
    }
    ws
}

/// Answer the client's handshake and relay frames between the client and
/// the target for the lifetime of the connection.
///
/// The 101 is returned immediately; the relay itself runs in a detached
/// task once hyper yields the upgraded stream.
pub async fn relay_upgrade(req: Request<AxumBody>, target: &Url) -> Result<Response<AxumBody>> {
    let Some(client_key) = req
        .headers()
        .get("Sec-WebSocket-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return Response::builder()
            .status(StatusCode::BAD_REQUEST)
            .body(AxumBody::from("Missing Sec-WebSocket-Key"))
            .wrap_err("Failed to build handshake rejection");
    };

    let accept = compute_accept_key(&client_key);
    let upstream_url = websocket_url(target);

    // Consume the request to get the upgrade future.
    let upgrade = hyper::upgrade::on(req);

    tokio::spawn(async move {
        let upgraded = match upgrade.await {
            Ok(upgraded) => upgraded,
            Err(e) => {
                tracing::error!("WebSocket client upgrade failed: {e}");
                return;
            }
        };

        let client_ws = WebSocketStream::from_raw_socket(
            TokioIo::new(upgraded),
            Role::Server,
            None,
        )
        .await;

        match connect_async(upstream_url.as_str()).await {
            Ok((upstream_ws, _handshake_response)) => {
                relay_frames(client_ws, upstream_ws).await;
            }
            Err(e) => {
                tracing::error!(upstream = %upstream_url, "WebSocket upstream connection failed: {e}");
            }
        }
    });

    tracing::debug!(upstream = %websocket_url(target), "WebSocket upgrade dispatched");

    Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header(header::UPGRADE, "websocket")
        .header(header::CONNECTION, "Upgrade")
        .header("Sec-WebSocket-Accept", accept)
        .body(AxumBody::empty())
        .wrap_err("Failed to build 101 response")
}

/// Pump frames in both directions until either side closes or errors.
async fn relay_frames(
    client: WebSocketStream<TokioIo<Upgraded>>,
    upstream: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
) {
    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(frame) = client_rx.next().await {
            match frame {
                Ok(message) => {
                    if upstream_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("client WebSocket read ended: {e}");
                    break;
                }
            }
        }
        let _ = upstream_tx.close().await;
    };

    let upstream_to_client = async {
        while let Some(frame) = upstream_rx.next().await {
            match frame {
                Ok(message) => {
                    if client_tx.send(message).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::debug!("upstream WebSocket read ended: {e}");
                    break;
                }
            }
        }
        let _ = client_tx.close().await;
    };

    // Either direction finishing tears the relay down; the close frame sent
    // above propagates to the surviving peer.
    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
}
