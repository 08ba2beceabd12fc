//! The downstream session WebSocket handler (spec §6): one task per
//! connected session, directly grounded in the teacher's
//! `handle_forwarder_socket` (`services/server/src/ws_forwarder.rs`) —
//! same shape of `tokio::select!` over a timed-out `recv()`, a heartbeat
//! interval, and an internal command channel that other tasks (here, a
//! streaming LLM query) write into to get frames out over the same
//! socket.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use ts_context::normalize_event_payload;
use ts_protocol::{
    DataFormat, DownstreamFrame, FeedDataPayload, FeedId, LlmQueryPayload, LlmResponsePayload,
    LlmTokenPayload, RegisterUserPayload, SessionId,
};
use ts_query::QueryRequest;

use crate::state::AppState;

const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
const RECV_TIMEOUT: Duration = Duration::from_secs(90);

pub async fn upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut stream) = socket.split();

    let register = match timeout(REGISTER_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<DownstreamFrame>(&text) {
            Ok(DownstreamFrame::RegisterUser(payload)) => payload,
            _ => {
                let _ = sink.send(Message::Close(None)).await;
                return;
            }
        },
        _ => {
            let _ = sink.send(Message::Close(None)).await;
            return;
        }
    };

    let session_id = SessionId::new(format!("{}-{}", register.user_id, uuid::Uuid::new_v4()));
    info!(session_id = %session_id, user_id = %register.user_id, "session registered");

    if send_frame(&mut sink, &DownstreamFrame::RegistrationSuccess).await.is_err() {
        return;
    }

    let session_cancel = CancellationToken::new();
    let mut outbound_events = state.dispatcher().register_session(session_id.clone(), session_cancel.clone());
    let (internal_tx, mut internal_rx) = mpsc::channel::<DownstreamFrame>(64);

    let mut feed_formats: HashMap<FeedId, DataFormat> = HashMap::new();
    restore_subscriptions(&state, &session_id, &register, &mut feed_formats).await;

    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            biased;

            () = state.shutdown().cancelled() => {
                debug!(session_id = %session_id, "server shutting down, closing session");
                break;
            }

            () = session_cancel.cancelled() => {
                warn!(session_id = %session_id, "session killed for unresponsiveness");
                break;
            }

            _ = heartbeat.tick() => {
                if sink.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            Some(frame) = internal_rx.recv() => {
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }

            Some(event) = outbound_events.recv() => {
                let format = feed_formats.get(&event.feed_id).copied().unwrap_or(DataFormat::Json);
                let data = normalize_event_payload(&event.payload, format);
                let frame = DownstreamFrame::FeedData(FeedDataPayload {
                    feed_id: event.feed_id.as_str().to_owned(),
                    feed_name: event.feed_name.clone(),
                    event_name: event.event_name.clone(),
                    data,
                    timestamp: event.received_at.wall.to_rfc3339(),
                });
                if send_frame(&mut sink, &frame).await.is_err() {
                    break;
                }
            }

            incoming = timeout(RECV_TIMEOUT, stream.next()) => {
                match incoming {
                    Ok(Some(Ok(Message::Text(text)))) => {
                        handle_client_frame(&state, &session_id, &text, &mut feed_formats, &internal_tx, &session_cancel).await;
                    }
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        if sink.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Some(Ok(Message::Pong(_) | Message::Binary(_)))) => {}
                    Ok(Some(Ok(Message::Close(_)))) | Ok(None) => break,
                    Ok(Some(Err(e))) => {
                        debug!(session_id = %session_id, error = %e, "websocket error");
                        break;
                    }
                    Err(_elapsed) => {
                        debug!(session_id = %session_id, "session idle past timeout, closing");
                        break;
                    }
                }
            }
        }
    }

    session_cancel.cancel();
    state.dispatcher().deregister_session(&session_id);
    let feeds = state.registry().remove_session(&session_id).await;
    for feed_id in feeds {
        state.feeds().note_unsubscribed(&feed_id);
    }
    let _ = sink.send(Message::Close(None)).await;
    info!(session_id = %session_id, "session closed");
}

async fn restore_subscriptions(
    state: &AppState,
    session_id: &SessionId,
    register: &RegisterUserPayload,
    feed_formats: &mut HashMap<FeedId, DataFormat>,
) {
    let Ok(feed_ids) = state.catalog().get_subscription_catalog(&register.user_id).await else {
        return;
    };
    for feed_id in feed_ids {
        subscribe_to_feed(state, session_id, &feed_id, feed_formats).await;
    }
}

async fn subscribe_to_feed(
    state: &AppState,
    session_id: &SessionId,
    feed_id: &FeedId,
    feed_formats: &mut HashMap<FeedId, DataFormat>,
) {
    let Ok(feed) = state.catalog().get_feed(feed_id).await else {
        warn!(feed_id = %feed_id, "subscribe requested for unknown feed");
        return;
    };
    state.registry().subscribe(session_id, feed_id).await;
    if state.feeds().note_subscribed(feed_id).await.is_err() {
        warn!(feed_id = %feed_id, "failed to start feed connector");
        return;
    }
    feed_formats.insert(feed_id.clone(), feed.data_format);
}

async fn handle_client_frame(
    state: &AppState,
    session_id: &SessionId,
    text: &str,
    feed_formats: &mut HashMap<FeedId, DataFormat>,
    internal_tx: &mpsc::Sender<DownstreamFrame>,
    session_cancel: &CancellationToken,
) {
    let frame = match serde_json::from_str::<DownstreamFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(session_id = %session_id, error = %e, "malformed downstream frame");
            return;
        }
    };

    match frame {
        DownstreamFrame::SubscribeFeed(payload) => {
            let feed_id = FeedId::new(payload.feed_id);
            subscribe_to_feed(state, session_id, &feed_id, feed_formats).await;
        }
        DownstreamFrame::UnsubscribeFeed(payload) => {
            let feed_id = FeedId::new(payload.feed_id);
            state.registry().unsubscribe(session_id, &feed_id).await;
            state.feeds().note_unsubscribed(&feed_id);
            feed_formats.remove(&feed_id);
        }
        DownstreamFrame::LlmQuery(payload) => {
            spawn_llm_query(state, payload, internal_tx.clone(), session_cancel.clone());
        }
        DownstreamFrame::RegisterUser(_) | DownstreamFrame::RegistrationSuccess | DownstreamFrame::FeedData(_) | DownstreamFrame::LlmToken(_) | DownstreamFrame::LlmResponse(_) => {
            debug!(session_id = %session_id, "ignoring server-originated frame type from client");
        }
    }
}

fn spawn_llm_query(
    state: &AppState,
    payload: LlmQueryPayload,
    internal_tx: mpsc::Sender<DownstreamFrame>,
    cancel: CancellationToken,
) {
    let query_service = state.query().clone();
    let request_id = payload.request_id.clone();

    tokio::spawn(async move {
        let (token_tx, mut token_rx) = mpsc::channel::<String>(64);
        let forward_request_id = request_id.clone();
        let forward_internal = internal_tx.clone();
        let forward = tokio::spawn(async move {
            while let Some(token) = token_rx.recv().await {
                let frame = DownstreamFrame::LlmToken(LlmTokenPayload {
                    request_id: forward_request_id.clone(),
                    token,
                });
                if forward_internal.send(frame).await.is_err() {
                    break;
                }
            }
        });

        let request = QueryRequest {
            feed_id: FeedId::new(payload.feed_id),
            question: payload.question,
            provider: payload.provider,
            system_prompt_override: payload.system_prompt,
        };
        let response = query_service.stream_query(request, token_tx, &cancel).await;
        let _ = forward.await;

        let frame = DownstreamFrame::LlmResponse(LlmResponsePayload {
            request_id,
            answer: response.answer,
            provider: response.provider_name,
            duration_ms: response.duration_ms,
        });
        let _ = internal_tx.send(frame).await;
    });
}

async fn send_frame(sink: &mut SplitSink<WebSocket, Message>, frame: &DownstreamFrame) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}
