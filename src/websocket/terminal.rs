//! Terminal WebSocket handlers
//!
//! `/ws/:token` attaches a browser to an existing session for as long as the
//! socket stays open. `/ws/local` starts a local shell owned by the socket.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use futures_util::{SinkExt, StreamExt};
use termbridge_core::{ConnectTarget, Error, Session, SessionKey, SessionRegistry, Sink};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::protocol::{ChannelFrames, ClientFrame};

const LIVENESS_CHECK: Duration = Duration::from_millis(500);

/// Shared state for terminal sockets
#[derive(Clone)]
pub struct WebState {
    pub registry: Arc<SessionRegistry>,
    pub allow_local_shell: bool,
    pub shell: String,
    pub shutdown: CancellationToken,
}

/// Attach to the session owning `token`
pub async fn attach_handler(
    ws: WebSocketUpgrade,
    Path(token): Path<String>,
    Extension(state): Extension<WebState>,
) -> Response {
    let (frames, rx) = ChannelFrames::channel();
    let guard = match state
        .registry
        .attach(&token, Sink::Frames(Arc::new(frames)))
        .await
    {
        Ok(guard) => guard,
        Err(_) => {
            debug!("WebSocket attach with unknown token");
            return (StatusCode::NOT_FOUND, "unknown session").into_response();
        }
    };

    ws.on_upgrade(move |socket| async move {
        let session = guard.session().clone();
        info!(session_key = %session.key(), "WebSocket attached");
        run_socket(socket, &state, &session, rx).await;
        // Dropping the guard hands output back to the previous sink
        drop(guard);
        info!(session_key = %session.key(), "WebSocket detached");
    })
}

/// Start a local shell for this socket
pub async fn local_handler(ws: WebSocketUpgrade, Extension(state): Extension<WebState>) -> Response {
    if !state.allow_local_shell {
        return (StatusCode::FORBIDDEN, "local shell is disabled").into_response();
    }
    ws.on_upgrade(move |socket| local_socket(socket, state))
}

async fn local_socket(mut socket: WebSocket, state: WebState) {
    let key = SessionKey::web(&termbridge_crypto::generate_token());
    let (frames, rx) = ChannelFrames::channel();
    let target = ConnectTarget::LocalShell {
        shell: state.shell.clone(),
        cwd: dirs::home_dir(),
    };

    let session = match state
        .registry
        .connect(key.clone(), target, Sink::Frames(Arc::new(frames)))
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(session_key = %key, error = %e, "Local shell failed to start");
            let notice = format!("\r\n[{}]\r\n", e.user_message());
            let _ = socket.send(Message::Text(notice)).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    info!(session_key = %key, "Local shell opened");
    run_socket(socket, &state, &session, rx).await;
    state.registry.disconnect(&key).await;
}

/// Relay frames both ways until the socket, the session or the server ends
async fn run_socket(
    socket: WebSocket,
    state: &WebState,
    session: &Arc<Session>,
    mut frames: mpsc::Receiver<String>,
) {
    let key = session.key().clone();
    let (mut sender, mut receiver) = socket.split();
    let mut liveness = tokio::time::interval(LIVENESS_CHECK);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            frame = frames.recv() => {
                match frame {
                    Some(text) => {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_frame(&state.registry, &key, &text).await {
                            debug!(session_key = %key, error = %e, "Input rejected, closing socket");
                            break;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = sender.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(session_key = %key, error = %e, "WebSocket error");
                        break;
                    }
                    _ => {}
                }
            }
            _ = liveness.tick() => {
                if session.is_torn_down() {
                    // Deliver whatever the pump flushed on its way out
                    while let Ok(text) = frames.try_recv() {
                        let _ = sender.send(Message::Text(text)).await;
                    }
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }
}

async fn handle_client_frame(
    registry: &SessionRegistry,
    key: &SessionKey,
    text: &str,
) -> Result<(), Error> {
    match ClientFrame::parse(text) {
        Ok(ClientFrame::Input { data }) => {
            registry.send_raw(key, &data).await?;
        }
        Ok(ClientFrame::Resize { cols, rows }) => {
            registry.resize(key, cols.max(1), rows.max(1)).await?;
        }
        Ok(ClientFrame::Ping) => {}
        Err(e) => debug!(session_key = %key, error = %e, "Ignoring malformed frame"),
    }
    Ok(())
}
