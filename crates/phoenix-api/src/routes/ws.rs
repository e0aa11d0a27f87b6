//! WebSocket fan-out (C7, spec §4.7): `GET /ws?token=<jwt>`. One task per
//! connection reads client `subscribe`/`unsubscribe`/`ping` frames and writes
//! matching `EventHub` events back, polling the hub's per-subscriber
//! `slow` flag to implement the 256-event backpressure policy.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use phoenix_types::{Channel, Event};
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::{interval, Instant};

use crate::AppState;

const PING_INTERVAL: Duration = Duration::from_secs(30);
const INACTIVITY_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientMessage {
    Subscribe {
        channels: Vec<Channel>,
        #[serde(default)]
        #[allow(dead_code)]
        filters: serde_json::Value,
    },
    Unsubscribe {
        channels: Vec<Channel>,
    },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerMessage<'a> {
    Event(&'a Event),
    Pong,
    Error { error: &'static str },
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: WebSocketUpgrade,
) -> axum::response::Response {
    let token = match params.token {
        Some(t) => t,
        None => {
            return (
                axum::http::StatusCode::UNAUTHORIZED,
                "missing token query parameter",
            )
                .into_response()
        }
    };

    match state.auth().verify(&token).await {
        Ok(_claims) => ws.on_upgrade(move |socket| handle(socket, state)),
        Err(_) => (axum::http::StatusCode::UNAUTHORIZED, "invalid token").into_response(),
    }
}

/// Per-connection loop. Starts with no subscriptions until the client sends
/// `subscribe`; re-subscribing to the hub on every channel-set change rather
/// than filtering client-side keeps the hub's channel index as the single
/// source of truth for what this socket receives.
async fn handle(mut socket: WebSocket, state: AppState) {
    let mut current_id: Option<u64> = None;
    let mut rx: Option<tokio::sync::mpsc::Receiver<Event>> = None;
    let mut slow: Option<std::sync::Arc<std::sync::atomic::AtomicBool>> = None;

    let mut ping_tick = interval(PING_INTERVAL);
    let mut last_activity = Instant::now();

    loop {
        if let Some(flag) = &slow {
            if flag.load(Ordering::SeqCst) {
                let _ = send_json(&mut socket, &ServerMessage::Error { error: "slow_consumer" }).await;
                break;
            }
        }

        if last_activity.elapsed() > INACTIVITY_TIMEOUT {
            break;
        }

        tokio::select! {
            biased;

            _ = ping_tick.tick() => {
                if send_json(&mut socket, &ServerMessage::Pong).await.is_err() {
                    break;
                }
            }

            maybe_event = recv_from(&mut rx) => {
                if let Some(event) = maybe_event {
                    if send_json(&mut socket, &ServerMessage::Event(&event)).await.is_err() {
                        break;
                    }
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        last_activity = Instant::now();
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::Subscribe { channels, .. }) => {
                                if let Some(id) = current_id.take() {
                                    state.events().unsubscribe(id);
                                }
                                let (id, new_rx, new_slow) = state.events().subscribe(channels);
                                current_id = Some(id);
                                rx = Some(new_rx);
                                slow = Some(new_slow);
                            }
                            Ok(ClientMessage::Unsubscribe { channels }) => {
                                if let Some(id) = current_id {
                                    state.events().unsubscribe_channels(id, &channels);
                                }
                            }
                            Ok(ClientMessage::Ping) => {
                                if send_json(&mut socket, &ServerMessage::Pong).await.is_err() {
                                    break;
                                }
                            }
                            Err(_) => {
                                let _ = send_json(&mut socket, &ServerMessage::Error { error: "invalid_message" }).await;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        last_activity = Instant::now();
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_activity = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    if let Some(id) = current_id {
        state.events().unsubscribe(id);
    }
}

async fn recv_from(rx: &mut Option<tokio::sync::mpsc::Receiver<Event>>) -> Option<Event> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_json(socket: &mut WebSocket, msg: &ServerMessage<'_>) -> Result<(), axum::Error> {
    let text = serde_json::to_string(msg).unwrap_or_else(|_| "{}".to_string());
    socket.send(Message::Text(text)).await
}
