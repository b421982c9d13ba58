//! Dispatch over WebSocket.
//!
//! The client sends a single `DispatchRequest` text frame. The server replies
//! with the dispatch's event stream (`capped`, `result`..., `complete`) and
//! closes. A refused dispatch yields one `error` frame carrying an HTTP-style
//! status. Closing the socket early cancels the batch before its next
//! recipient.

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::AppState;
use crate::dispatch::{DispatchEvent, DispatchRequest};
use crate::error::{DispatchError, LedgerError};

/// Error frame sent when a dispatch cannot start.
#[derive(Debug, Serialize)]
struct ErrorFrame {
    #[serde(rename = "type")]
    kind: &'static str,
    status: u16,
    error: String,
}

impl ErrorFrame {
    fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            kind: "error",
            status: status.as_u16(),
            error: error.into(),
        }
    }
}

fn dispatch_status(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::QuotaExhausted { .. } => StatusCode::TOO_MANY_REQUESTS,
        DispatchError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::EmptyRecipients => StatusCode::BAD_REQUEST,
        DispatchError::Ledger(LedgerError::DayClosed { .. }) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub(crate) async fn dispatch_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    debug!("Dispatch WebSocket client connecting");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, value: &T) -> bool {
    match serde_json::to_string(value) {
        Ok(json) => socket.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!(error = %e, "Failed to serialize WS frame");
            false
        }
    }
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let request = loop {
        match socket.recv().await {
            Some(Ok(Message::Text(text))) => match serde_json::from_str::<DispatchRequest>(&text) {
                Ok(request) => break request,
                Err(e) => {
                    let frame = ErrorFrame::new(StatusCode::BAD_REQUEST, format!("Invalid dispatch request: {e}"));
                    send_json(&mut socket, &frame).await;
                    let _ = socket.send(Message::Close(None)).await;
                    return;
                }
            },
            Some(Ok(Message::Ping(data))) => {
                if socket.send(Message::Pong(data)).await.is_err() {
                    return;
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "WS receive error before request");
                return;
            }
        }
    };

    let account_id = request.account_id.clone();
    let mut handle = match state.pipeline.dispatch(request).await {
        Ok(handle) => handle,
        Err(e) => {
            info!(account_id = %account_id, error = %e, "Dispatch refused");
            send_json(&mut socket, &ErrorFrame::new(dispatch_status(&e), e.to_string())).await;
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    loop {
        tokio::select! {
            event = handle.next() => {
                let Some(event) = event else { break };
                let done = matches!(event, DispatchEvent::Complete(_));
                if !send_json(&mut socket, &event).await {
                    debug!(account_id = %account_id, "Client disconnected during dispatch");
                    break;
                }
                if done {
                    break;
                }
            }

            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                        info!(account_id = %account_id, "Client closed dispatch socket, cancelling");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Dropping the handle cancels any remaining recipients.
    drop(handle);
    let _ = socket.send(Message::Close(None)).await;
}
