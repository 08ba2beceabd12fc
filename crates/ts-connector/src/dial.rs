//! Dialing, handshaking, parsing, and the per-feed state machine (spec
//! §4.4, component C4): `Idle → Dialing → Handshaking → Connected →
//! Backoff → Idle/Terminated`. `websocket` uses `tokio-tungstenite`
//! (the teacher's own dependency, same version line as
//! `services/forwarder`'s `UplinkSession::connect` in `uplink.rs`, which
//! this borrows its request-building style from); `socketio` reuses the
//! websocket transport with the hand-rolled framing in [`crate::socketio`];
//! `http-polling` uses `reqwest` on an interval timer. Transient upstream
//! failures never propagate past this module as anything but backoff
//! state and metrics (spec §7).

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ts_context::ContextRing;
use ts_metrics::MetricsCollector;
use ts_protocol::{ConnectionType, DataFormat, FeedDefinition, FeedEvent, HttpMethod};

use crate::backoff::Backoff;
use crate::ingestion;
use crate::session::{emit, ProtobufRegistry};
use crate::socketio;

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("upstream transport error: {0}")]
    Transport(String),
}

/// Tunable thresholds (spec §6's `T_stale`/`T_linger`/`T_ping`/`D_base`/
/// `D_max`, plus the connect timeout from §5's 30s one-shot default).
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    pub t_stale: Duration,
    pub t_ping: Duration,
    pub t_linger: Duration,
    pub d_base: Duration,
    pub d_max: Duration,
    pub connect_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            t_stale: Duration::from_secs(60),
            t_ping: Duration::from_secs(25),
            t_linger: Duration::from_secs(30),
            d_base: Duration::from_secs(1),
            d_max: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

/// Why one connected session ended.
enum DisconnectReason {
    UpstreamError,
    LingerExpired,
    Shutdown,
}

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

fn build_url(feed: &FeedDefinition, extra_query: &[(&str, &str)]) -> String {
    let mut url = feed.url.clone();
    let mut params: Vec<String> = feed
        .query_params
        .iter()
        .map(|kv| format!("{}={}", kv.key, kv.value))
        .collect();
    params.extend(extra_query.iter().map(|(k, v)| format!("{k}={v}")));
    if !params.is_empty() {
        let sep = if url.contains('?') { '&' } else { '?' };
        url = format!("{url}{sep}{}", params.join("&"));
    }
    url
}

async fn dial_websocket(feed: &FeedDefinition, timeout: Duration, socketio_mode: bool) -> Result<WsStream, ConnectorError> {
    let extra = if socketio_mode {
        vec![("EIO", "4"), ("transport", "websocket")]
    } else {
        Vec::new()
    };
    let url = build_url(feed, &extra);
    let mut request = url
        .clone()
        .into_client_request()
        .map_err(|e| ConnectorError::Dial(format!("invalid URL '{url}': {e}")))?;
    for kv in &feed.headers {
        let name: tokio_tungstenite::tungstenite::http::HeaderName = kv
            .key
            .parse()
            .map_err(|e| ConnectorError::Dial(format!("invalid header name '{}': {e}", kv.key)))?;
        let value = kv
            .value
            .parse()
            .map_err(|e| ConnectorError::Dial(format!("invalid header value for '{}': {e}", kv.key)))?;
        request.headers_mut().insert(name, value);
    }

    let (ws, _response) = tokio::time::timeout(timeout, connect_async(request))
        .await
        .map_err(|_| ConnectorError::Dial("connect timed out".to_owned()))?
        .map_err(|e| ConnectorError::Dial(e.to_string()))?;
    Ok(ws)
}

async fn send_connection_messages(ws: &mut WsStream, feed: &FeedDefinition) -> Result<(), ConnectorError> {
    for bytes in &feed.connection_messages {
        let message = match std::str::from_utf8(bytes) {
            Ok(text) => Message::Text(text.to_owned()),
            Err(_) => Message::Binary(bytes.clone()),
        };
        ws.send(message)
            .await
            .map_err(|e| ConnectorError::Transport(e.to_string()))?;
    }
    Ok(())
}

/// Awaits the Socket.IO v4 handshake: the Engine.IO `open` packet followed
/// by sending Engine.IO/Socket.IO `CONNECT` and waiting for its ack.
async fn socketio_handshake(ws: &mut WsStream, timeout: Duration) -> Result<(), ConnectorError> {
    let open = tokio::time::timeout(timeout, ws.next())
        .await
        .map_err(|_| ConnectorError::Dial("socket.io handshake timed out".to_owned()))?
        .ok_or_else(|| ConnectorError::Dial("connection closed during handshake".to_owned()))?
        .map_err(|e| ConnectorError::Dial(e.to_string()))?;
    let Message::Text(text) = open else {
        return Err(ConnectorError::Dial("expected Engine.IO open packet".to_owned()));
    };
    if !matches!(socketio::parse_frame(&text), socketio::EngineFrame::Open) {
        return Err(ConnectorError::Dial("did not receive Engine.IO open packet".to_owned()));
    }

    ws.send(Message::Text(socketio::CONNECT.to_owned()))
        .await
        .map_err(|e| ConnectorError::Transport(e.to_string()))?;

    let ack = tokio::time::timeout(timeout, ws.next())
        .await
        .map_err(|_| ConnectorError::Dial("socket.io connect ack timed out".to_owned()))?
        .ok_or_else(|| ConnectorError::Dial("connection closed before connect ack".to_owned()))?
        .map_err(|e| ConnectorError::Dial(e.to_string()))?;
    let Message::Text(text) = ack else {
        return Err(ConnectorError::Dial("expected Socket.IO connect ack".to_owned()));
    };
    if !matches!(
        socketio::parse_frame(&text),
        socketio::EngineFrame::Message(socketio::SocketIoFrame::Connect)
    ) {
        return Err(ConnectorError::Dial("did not receive Socket.IO connect ack".to_owned()));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn drive_ws_session(
    mut ws: WsStream,
    feed: &FeedDefinition,
    ctx: &ContextRing,
    metrics: &MetricsCollector,
    ingest: &ingestion::Sender<FeedEvent>,
    subscriber_count: &mut watch::Receiver<usize>,
    shutdown: &CancellationToken,
    config: &ConnectorConfig,
    socketio_mode: bool,
    protobuf: &ProtobufRegistry,
    backoff: &mut Backoff,
) -> Result<DisconnectReason, ConnectorError> {
    metrics.record_upstream_status(&feed.feed_id, true);
    backoff.reset();
    let mut last_data = Instant::now();
    let mut linger_deadline: Option<Instant> = None;
    if *subscriber_count.borrow() == 0 {
        linger_deadline = Some(Instant::now() + config.t_linger);
    }

    loop {
        let stale_in = config.t_stale.saturating_sub(last_data.elapsed());
        let ping_in = config.t_ping;
        let linger_sleep = linger_deadline.map(|d| d.saturating_duration_since(Instant::now()));

        tokio::select! {
            biased;

            () = shutdown.cancelled() => {
                let _ = ws.close(None).await;
                return Ok(DisconnectReason::Shutdown);
            }

            changed = subscriber_count.changed() => {
                if changed.is_err() {
                    return Ok(DisconnectReason::Shutdown);
                }
                let count = *subscriber_count.borrow();
                linger_deadline = if count == 0 {
                    Some(Instant::now() + config.t_linger)
                } else {
                    None
                };
            }

            () = async { tokio::time::sleep(linger_sleep.unwrap()).await }, if linger_deadline.is_some() => {
                let _ = ws.close(None).await;
                return Ok(DisconnectReason::LingerExpired);
            }

            () = tokio::time::sleep(stale_in) => {
                warn!(feed_id = %feed.feed_id, "upstream stale, treating as disconnect");
                return Ok(DisconnectReason::UpstreamError);
            }

            () = tokio::time::sleep(ping_in), if !socketio_mode => {
                if ws.send(Message::Ping(Vec::new())).await.is_err() {
                    return Ok(DisconnectReason::UpstreamError);
                }
            }

            frame = ws.next() => {
                let Some(frame) = frame else {
                    return Ok(DisconnectReason::UpstreamError);
                };
                let frame = match frame {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(feed_id = %feed.feed_id, error = %e, "websocket read error");
                        return Ok(DisconnectReason::UpstreamError);
                    }
                };
                match frame {
                    Message::Close(_) => return Ok(DisconnectReason::UpstreamError),
                    Message::Ping(payload) => {
                        let _ = ws.send(Message::Pong(payload)).await;
                    }
                    Message::Pong(_) => {}
                    Message::Text(text) if socketio_mode => {
                        last_data = Instant::now();
                        match socketio::parse_frame(&text) {
                            socketio::EngineFrame::Ping => {
                                let _ = ws.send(Message::Text(socketio::PONG.to_owned())).await;
                            }
                            socketio::EngineFrame::Message(socketio::SocketIoFrame::Event { name, args }) => {
                                if feed.event_name.is_empty() || feed.event_name == name {
                                    let payload = serde_json::to_vec(&Value::Array(args)).unwrap_or_default();
                                    emit(feed, ctx, metrics, ingest, &name, payload).await;
                                }
                            }
                            _ => {}
                        }
                    }
                    Message::Text(text) => {
                        last_data = Instant::now();
                        emit(feed, ctx, metrics, ingest, &feed.event_name, text.into_bytes()).await;
                    }
                    Message::Binary(bytes) => {
                        last_data = Instant::now();
                        match feed.data_format {
                            DataFormat::Protobuf => {
                                let decoded = protobuf.as_ref().and_then(|decoder| {
                                    feed.protobuf_type
                                        .as_deref()
                                        .and_then(|ty| decoder.decode(ty, &bytes))
                                });
                                match decoded {
                                    Some(json_bytes) => {
                                        emit(feed, ctx, metrics, ingest, &feed.event_name, json_bytes).await;
                                    }
                                    None => {
                                        metrics.record_parse_failure(&feed.feed_id);
                                        debug!(feed_id = %feed.feed_id, "dropping undecodable protobuf frame");
                                    }
                                }
                            }
                            _ => {
                                emit(feed, ctx, metrics, ingest, &feed.event_name, bytes).await;
                            }
                        }
                    }
                    Message::Frame(_) => {}
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_websocket_session(
    feed: &FeedDefinition,
    ctx: &ContextRing,
    metrics: &MetricsCollector,
    ingest: &ingestion::Sender<FeedEvent>,
    subscriber_count: &mut watch::Receiver<usize>,
    shutdown: &CancellationToken,
    config: &ConnectorConfig,
    protobuf: &ProtobufRegistry,
    backoff: &mut Backoff,
) -> Result<DisconnectReason, ConnectorError> {
    let mut ws = dial_websocket(feed, config.connect_timeout, false).await?;
    send_connection_messages(&mut ws, feed).await?;
    drive_ws_session(ws, feed, ctx, metrics, ingest, subscriber_count, shutdown, config, false, protobuf, backoff).await
}

#[allow(clippy::too_many_arguments)]
async fn run_socketio_session(
    feed: &FeedDefinition,
    ctx: &ContextRing,
    metrics: &MetricsCollector,
    ingest: &ingestion::Sender<FeedEvent>,
    subscriber_count: &mut watch::Receiver<usize>,
    shutdown: &CancellationToken,
    config: &ConnectorConfig,
    protobuf: &ProtobufRegistry,
    backoff: &mut Backoff,
) -> Result<DisconnectReason, ConnectorError> {
    let mut ws = dial_websocket(feed, config.connect_timeout, true).await?;
    socketio_handshake(&mut ws, config.connect_timeout).await?;
    send_connection_messages(&mut ws, feed).await?;
    drive_ws_session(ws, feed, ctx, metrics, ingest, subscriber_count, shutdown, config, true, protobuf, backoff).await
}

fn resolve_data_path<'a>(body: &'a Value, pointer: &str) -> Option<&'a Value> {
    body.pointer(pointer)
}

#[allow(clippy::too_many_arguments)]
async fn run_http_polling_session(
    feed: &FeedDefinition,
    ctx: &ContextRing,
    metrics: &MetricsCollector,
    ingest: &ingestion::Sender<FeedEvent>,
    subscriber_count: &mut watch::Receiver<usize>,
    shutdown: &CancellationToken,
    config: &ConnectorConfig,
    backoff: &mut Backoff,
) -> Result<DisconnectReason, ConnectorError> {
    let Some(polling) = &feed.http_polling_config else {
        return Err(ConnectorError::Dial("http-polling feed missing polling config".to_owned()));
    };
    let client = Client::new();
    metrics.record_upstream_status(&feed.feed_id, true);

    let mut linger_deadline: Option<Instant> = None;
    if *subscriber_count.borrow() == 0 {
        linger_deadline = Some(Instant::now() + config.t_linger);
    }
    let mut consecutive_failures = 0u32;

    loop {
        let linger_sleep = linger_deadline.map(|d| d.saturating_duration_since(Instant::now()));
        tokio::select! {
            biased;

            () = shutdown.cancelled() => return Ok(DisconnectReason::Shutdown),

            changed = subscriber_count.changed() => {
                if changed.is_err() {
                    return Ok(DisconnectReason::Shutdown);
                }
                let count = *subscriber_count.borrow();
                linger_deadline = if count == 0 {
                    Some(Instant::now() + config.t_linger)
                } else {
                    None
                };
                continue;
            }

            () = async { tokio::time::sleep(linger_sleep.unwrap()).await }, if linger_deadline.is_some() => {
                return Ok(DisconnectReason::LingerExpired);
            }

            () = tokio::time::sleep(Duration::from_millis(polling.interval_ms)) => {
                let method = match polling.method {
                    HttpMethod::Get => reqwest::Method::GET,
                    HttpMethod::Post => reqwest::Method::POST,
                    HttpMethod::Put => reqwest::Method::PUT,
                };
                let mut request = client
                    .request(method, build_url(feed, &[]))
                    .timeout(Duration::from_millis(polling.timeout_ms));
                for kv in &polling.request_headers {
                    request = request.header(kv.key.as_str(), kv.value.as_str());
                }
                if let Some(body) = &polling.request_body {
                    request = request.body(body.clone());
                }

                match request.send().await {
                    Ok(response) if response.status().is_success() => {
                        consecutive_failures = 0;
                        backoff.reset();
                        let bytes = response.bytes().await.unwrap_or_default();
                        emit_polling_response(feed, ctx, metrics, ingest, polling.response_format, polling.data_path.as_deref(), &bytes).await;
                    }
                    Ok(response) => {
                        warn!(feed_id = %feed.feed_id, status = %response.status(), "polling request failed");
                        consecutive_failures += 1;
                    }
                    Err(e) => {
                        warn!(feed_id = %feed.feed_id, error = %e, "polling request error");
                        consecutive_failures += 1;
                    }
                }
                if consecutive_failures >= 3 {
                    return Ok(DisconnectReason::UpstreamError);
                }
            }
        }
    }
}

async fn emit_polling_response(
    feed: &FeedDefinition,
    ctx: &ContextRing,
    metrics: &MetricsCollector,
    ingest: &ingestion::Sender<FeedEvent>,
    format: DataFormat,
    data_path: Option<&str>,
    body: &[u8],
) {
    let Some(pointer) = data_path else {
        emit(feed, ctx, metrics, ingest, &feed.event_name, body.to_vec()).await;
        return;
    };
    let Ok(parsed) = serde_json::from_slice::<Value>(body) else {
        metrics.record_parse_failure(&feed.feed_id);
        return;
    };
    let Some(resolved) = resolve_data_path(&parsed, pointer) else {
        metrics.record_parse_failure(&feed.feed_id);
        return;
    };
    match resolved {
        Value::Array(items) => {
            for item in items {
                let bytes = serde_json::to_vec(item).unwrap_or_default();
                emit(feed, ctx, metrics, ingest, &feed.event_name, bytes).await;
            }
        }
        other => {
            let bytes = serde_json::to_vec(other).unwrap_or_default();
            emit(feed, ctx, metrics, ingest, &feed.event_name, bytes).await;
        }
    }
    let _ = format;
}

/// Drives one feed's connection lifecycle end to end: dial, handshake,
/// read, backoff, and eventual termination on linger expiry, exhausted
/// reconnection attempts, or process shutdown. Spawned once per `FeedID`
/// that has at least one subscriber (spec §4.4).
pub async fn run_connector(
    feed: FeedDefinition,
    ctx: Arc<ContextRing>,
    metrics: Arc<MetricsCollector>,
    ingest: ingestion::Sender<FeedEvent>,
    mut subscriber_count: watch::Receiver<usize>,
    shutdown: CancellationToken,
    config: ConnectorConfig,
    protobuf: ProtobufRegistry,
) {
    metrics.init_feed(&feed.feed_id, &feed.name);
    let mut backoff = Backoff::new(config.d_base, config.d_max);

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        let session_result = match feed.connection_type {
            ConnectionType::Websocket => {
                run_websocket_session(&feed, &ctx, &metrics, &ingest, &mut subscriber_count, &shutdown, &config, &protobuf, &mut backoff).await
            }
            ConnectionType::Socketio => {
                run_socketio_session(&feed, &ctx, &metrics, &ingest, &mut subscriber_count, &shutdown, &config, &protobuf, &mut backoff).await
            }
            ConnectionType::HttpPolling => {
                run_http_polling_session(&feed, &ctx, &metrics, &ingest, &mut subscriber_count, &shutdown, &config, &mut backoff).await
            }
        };

        match session_result {
            Ok(DisconnectReason::Shutdown) => break,
            Ok(DisconnectReason::LingerExpired) => {
                info!(feed_id = %feed.feed_id, "linger window expired with no subscribers, terminating");
                break;
            }
            Ok(DisconnectReason::UpstreamError) | Err(_) => {
                if let Err(e) = &session_result {
                    warn!(feed_id = %feed.feed_id, error = %e, "connector error");
                }
                metrics.record_upstream_status(&feed.feed_id, false);

                if feed.reconnection_enabled {
                    if feed.reconnection_attempts != 0
                        && backoff.consecutive_failures() >= feed.reconnection_attempts
                    {
                        warn!(feed_id = %feed.feed_id, "reconnection attempts exhausted, terminating");
                        break;
                    }
                    let delay = backoff.next_delay();
                    debug!(feed_id = %feed.feed_id, delay_ms = delay.as_millis(), "backing off before reconnect");
                    tokio::select! {
                        () = shutdown.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                } else {
                    break;
                }
            }
        }
    }

    metrics.record_upstream_status(&feed.feed_id, false);
}
