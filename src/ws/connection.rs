//! Per-connection session task.
//!
//! A session has two phases. The handshake phase runs only when no token
//! came with the upgrade request: the first text frame must be an `auth`
//! frame, received before the handshake deadline. The admitted phase is a
//! single `select!` loop over inbound frames, the connection's outbound
//! queue and the liveness ticker.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use super::messages::{ClientFrame, EventAck, ServerFrame, close_frame_for};
use crate::app_state::AppState;
use crate::domain::{Connection, ConnectionCommand, EvictionReason, Identity};
use crate::error::AdmissionError;

/// Transport a session runs over: an upgraded
/// [`WebSocket`](axum::extract::ws::WebSocket) in production.
pub trait SessionSocket:
    Stream<Item = Result<Message, axum::Error>>
    + Sink<Message, Error = axum::Error>
    + Send
    + 'static
{
}

impl<T> SessionSocket for T where
    T: Stream<Item = Result<Message, axum::Error>>
        + Sink<Message, Error = axum::Error>
        + Send
        + 'static
{
}

type Outgoing<S> = SplitSink<S, Message>;
type Incoming<S> = SplitStream<S>;

/// Handshake and liveness timing.
#[derive(Debug, Clone, Copy)]
pub struct SessionLimits {
    /// Time allowed for the `auth` frame when no token came with the
    /// upgrade.
    pub handshake_timeout: Duration,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Consecutive unanswered pings tolerated before eviction.
    pub ping_missed_limit: u32,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            ping_interval: Duration::from_secs(25),
            ping_missed_limit: 2,
        }
    }
}

/// How the admitted phase ended.
enum Ended {
    /// The registry already removed the connection.
    Evicted,
    /// The transport needs removing with this reason.
    Closed(EvictionReason),
}

/// Runs one session to completion.
///
/// `identity` is `Some` when the upgrade request already carried a valid
/// token.
pub async fn run_connection<S: SessionSocket>(
    socket: S,
    state: AppState,
    identity: Option<Identity>,
) {
    let (mut sink, mut stream) = socket.split();

    let identity = match identity {
        Some(identity) => identity,
        None => match handshake(&mut stream, &state).await {
            Ok(identity) => identity,
            Err(err) => {
                tracing::info!(error = %err, "websocket handshake rejected");
                let _ = sink
                    .send(Message::Close(Some(CloseFrame {
                        code: AdmissionError::CLOSE_CODE,
                        reason: AdmissionError::CODE.into(),
                    })))
                    .await;
                return;
            }
        },
    };

    let (connection, mut commands) = state.gate.admit(identity).await;
    let ended = session(&mut sink, &mut stream, &state, &connection, &mut commands).await;

    if let Ended::Closed(reason) = ended {
        if matches!(reason, EvictionReason::Timeout) {
            send_close(&mut sink, &reason).await;
        }
        state.gate.evict(connection.id(), reason).await;
    }
    tracing::debug!(connection_id = %connection.id(), "session finished");
}

/// Waits for a valid `auth` frame.
async fn handshake<S: SessionSocket>(
    stream: &mut Incoming<S>,
    state: &AppState,
) -> Result<Identity, AdmissionError> {
    let wait = async {
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    return match serde_json::from_str::<ClientFrame>(text.as_str()) {
                        Ok(ClientFrame::Auth { token }) => state.gate.authenticate(&token).await,
                        _ => Err(AdmissionError::MissingToken),
                    };
                }
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Ok(_) | Err(_) => break,
            }
        }
        Err(AdmissionError::MissingToken)
    };
    tokio::time::timeout(state.limits.handshake_timeout, wait)
        .await
        .unwrap_or(Err(AdmissionError::HandshakeTimeout))
}

async fn session<S: SessionSocket>(
    sink: &mut Outgoing<S>,
    stream: &mut Incoming<S>,
    state: &AppState,
    connection: &Arc<Connection>,
    commands: &mut mpsc::Receiver<ConnectionCommand>,
) -> Ended {
    let mut ping = tokio::time::interval(state.limits.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;
    let mut missed: u32 = 0;

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(message)) = frame else {
                    return Ended::Closed(EvictionReason::ClientDisconnect);
                };
                connection.touch();
                match message {
                    Message::Text(text) => {
                        let ack = handle_text(state, connection, text.as_str()).await;
                        if !send_frame(sink, &ServerFrame::Ack(ack)).await {
                            return Ended::Closed(EvictionReason::ClientDisconnect);
                        }
                    }
                    Message::Pong(_) => missed = 0,
                    Message::Close(_) => return Ended::Closed(EvictionReason::ClientDisconnect),
                    Message::Ping(_) | Message::Binary(_) => {}
                }
            }
            command = commands.recv() => {
                match command {
                    Some(ConnectionCommand::Deliver(event)) => {
                        if !send_frame(sink, &ServerFrame::from(event.as_ref())).await {
                            return Ended::Closed(EvictionReason::ClientDisconnect);
                        }
                    }
                    Some(ConnectionCommand::Close(reason)) => {
                        send_close(sink, &reason).await;
                        return Ended::Evicted;
                    }
                    None => return Ended::Evicted,
                }
            }
            _ = ping.tick() => {
                if missed >= state.limits.ping_missed_limit {
                    tracing::info!(
                        connection_id = %connection.id(),
                        missed,
                        "liveness ping unanswered"
                    );
                    return Ended::Closed(EvictionReason::Timeout);
                }
                missed = missed.saturating_add(1);
                if sink.send(Message::Ping(Default::default())).await.is_err() {
                    return Ended::Closed(EvictionReason::ClientDisconnect);
                }
            }
        }
    }
}

async fn handle_text(state: &AppState, connection: &Arc<Connection>, text: &str) -> EventAck {
    match serde_json::from_str::<ClientFrame>(text) {
        Ok(ClientFrame::Event {
            event,
            payload,
            correlation_id,
        }) => {
            let outcome = state.bus.dispatch(connection, &event, payload).await;
            EventAck::from_outcome(correlation_id, event, outcome)
        }
        Ok(ClientFrame::Auth { .. }) => EventAck::malformed("connection is already authenticated"),
        Err(err) => {
            tracing::debug!(connection_id = %connection.id(), error = %err, "malformed frame");
            EventAck::malformed(&err.to_string())
        }
    }
}

async fn send_frame<S: SessionSocket>(sink: &mut Outgoing<S>, frame: &ServerFrame) -> bool {
    match serde_json::to_string(frame) {
        Ok(json) => sink.send(Message::text(json)).await.is_ok(),
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize frame");
            true
        }
    }
}

async fn send_close<S: SessionSocket>(sink: &mut Outgoing<S>, reason: &EvictionReason) {
    let (code, text) = close_frame_for(reason);
    let _ = sink
        .send(Message::Close(Some(CloseFrame {
            code,
            reason: text.into(),
        })))
        .await;
}
