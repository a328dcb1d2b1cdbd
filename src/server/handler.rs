use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use chrono::Local;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{error_frame, FrameLimits, Inbound};
use crate::constants::MAX_QUEUED_FRAMES;
use crate::models::{BackendClient, Role};
use crate::session::ChatSession;
use crate::utils::TurnError;

/// Why a connection loop ended. None of these are failures.
#[derive(Debug)]
enum Closure {
    Peer,
    Transport(String),
    Shutdown,
}

enum Event {
    Frame(Inbound),
    Ignored,
    Closed(Closure),
}

fn classify(frame: Option<Result<Message, axum::Error>>, limits: &FrameLimits) -> Event {
    match frame {
        Some(Ok(Message::Text(text))) => Event::Frame(Inbound::text(text.as_str(), limits)),
        Some(Ok(Message::Binary(data))) => Event::Frame(Inbound::Binary(data.len())),
        // Ping/pong replies are handled by the transport
        Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => Event::Ignored,
        Some(Ok(Message::Close(_))) | None => Event::Closed(Closure::Peer),
        Some(Err(e)) => Event::Closed(Closure::Transport(e.to_string())),
    }
}

/// Drives one WebSocket connection: one inbound frame, one generation, one reply.
pub struct ConnectionHandler {
    socket: WebSocket,
    peer: SocketAddr,
    session: ChatSession,
    backend: Arc<BackendClient>,
    limits: FrameLimits,
    shutdown: CancellationToken,
}

impl ConnectionHandler {
    pub fn new(
        socket: WebSocket,
        peer: SocketAddr,
        session: ChatSession,
        backend: Arc<BackendClient>,
        limits: FrameLimits,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            socket,
            peer,
            session,
            backend,
            limits,
            shutdown,
        }
    }

    /// Serve the connection until the peer leaves or shutdown is requested.
    ///
    /// Replies go out in request order. While a generation is pending the
    /// transport is still polled so a disconnect abandons the call; frames that
    /// arrive meanwhile wait in a small queue.
    pub async fn run(self) {
        let Self {
            socket,
            peer,
            mut session,
            backend,
            limits,
            shutdown,
        } = self;
        let id = session.id();
        let (mut sink, mut stream) = socket.split();
        let mut queued: VecDeque<Inbound> = VecDeque::new();

        info!(session = %id, %peer, "client connected");

        let closure = loop {
            if shutdown.is_cancelled() {
                break Closure::Shutdown;
            }

            let inbound = match queued.pop_front() {
                Some(inbound) => inbound,
                None => {
                    let frame = tokio::select! {
                        _ = shutdown.cancelled() => break Closure::Shutdown,
                        frame = stream.next() => frame,
                    };
                    match classify(frame, &limits) {
                        Event::Frame(inbound) => inbound,
                        Event::Ignored => continue,
                        Event::Closed(closure) => break closure,
                    }
                }
            };

            let prompt = match inbound.into_prompt(&limits) {
                Ok(prompt) => prompt,
                Err(e) => {
                    debug!(session = %id, error = %e, "frame rejected");
                    if let Err(closure) = send_text(&mut sink, error_frame(&e)).await {
                        break closure;
                    }
                    continue;
                }
            };

            debug!(session = %id, bytes = prompt.len(), "user turn");
            session.append(Role::User, prompt);

            let outcome = {
                let generation = backend.generate(session.build_request());
                tokio::pin!(generation);
                loop {
                    tokio::select! {
                        result = &mut generation => break Ok(result),
                        frame = stream.next(), if queued.len() < MAX_QUEUED_FRAMES => {
                            match classify(frame, &limits) {
                                Event::Frame(inbound) => queued.push_back(inbound),
                                Event::Ignored => {}
                                Event::Closed(closure) => break Err(closure),
                            }
                        }
                    }
                }
            };

            let reply = match outcome {
                Ok(Ok(text)) => {
                    debug!(session = %id, bytes = text.len(), "assistant turn");
                    session.append(Role::Assistant, text.clone());
                    text
                }
                Ok(Err(e)) => {
                    warn!(session = %id, error = %e, "generation failed");
                    error_frame(&TurnError::from(e))
                }
                Err(closure) => {
                    info!(session = %id, "connection closed while generation was pending");
                    break closure;
                }
            };

            if let Err(closure) = send_text(&mut sink, reply).await {
                break closure;
            }
        };

        match closure {
            Closure::Peer => info!(session = %id, %peer, "client disconnected"),
            Closure::Transport(reason) => {
                info!(session = %id, %peer, %reason, "connection dropped")
            }
            Closure::Shutdown => {
                // Frames already read get an answer before the close
                for _ in queued.drain(..) {
                    let reply = error_frame(&TurnError::ShuttingDown);
                    if send_text(&mut sink, reply).await.is_err() {
                        break;
                    }
                }
                let close = Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "server shutting down".into(),
                }));
                // The peer may already be gone
                let _ = sink.send(close).await;
                info!(session = %id, %peer, "connection closed for shutdown");
            }
        }

        debug!(
            session = %id,
            turns = session.turn_count(),
            open_secs = (Local::now() - session.created_at()).num_seconds(),
            "session released"
        );
    }
}

async fn send_text(
    sink: &mut SplitSink<WebSocket, Message>,
    text: String,
) -> Result<(), Closure> {
    sink.send(Message::Text(text.into()))
        .await
        .map_err(|e| Closure::Transport(e.to_string()))
}
