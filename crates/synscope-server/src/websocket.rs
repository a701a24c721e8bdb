//! WebSocket transport for viewer state snapshots

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use synscope_core::ViewerState;

use crate::controller::ControllerEvent;
use crate::ServerState;

/// Handle WebSocket upgrade requests
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Parse an inbound text frame as a full viewer snapshot.
pub fn parse_snapshot(text: &str) -> Option<ViewerState> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) if value.is_object() => Some(ViewerState::new(value)),
        Ok(_) => {
            warn!("Ignoring non-object viewer message");
            None
        }
        Err(e) => {
            warn!("Failed to parse viewer message: {}", e);
            None
        }
    }
}

/// Handle an individual viewer connection
async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    info!("Viewer connected");

    let (mut sender, mut receiver) = socket.split();
    let mut rx = state.session.subscribe();

    // Bring the new viewer up to date
    if let Some(current) = state.session.current().await {
        match serde_json::to_string(&current) {
            Ok(json) => {
                if sender.send(Message::Text(json)).await.is_err() {
                    warn!("Failed to send current state to viewer");
                    return;
                }
            }
            Err(e) => warn!("Failed to serialize viewer state: {}", e),
        }
    }

    // Forward inbound snapshots to the controller
    let state_clone = Arc::clone(&state);
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    debug!("Received viewer message ({} bytes)", text.len());
                    let Some(snapshot) = parse_snapshot(&text) else {
                        continue;
                    };
                    state_clone.session.store(snapshot.clone()).await;
                    if state_clone.events.send(ControllerEvent::Viewer(snapshot)).await.is_err() {
                        warn!("Controller is gone; closing viewer connection");
                        break;
                    }
                }
                Message::Close(_) => {
                    debug!("Viewer sent close");
                    break;
                }
                _ => {}
            }
        }
    });

    // Push published snapshots to the viewer
    let mut send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(msg) => {
                    if sender.send(Message::Text(msg)).await.is_err() {
                        debug!("Failed to send snapshot to viewer");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    // snapshots are full state, so the next one catches up
                    warn!("Viewer lagged behind by {} snapshot(s)", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    });

    // Wait for either task to complete
    tokio::select! {
        _ = (&mut send_task) => {
            recv_task.abort();
        }
        _ = (&mut recv_task) => {
            send_task.abort();
        }
    }

    info!("Viewer disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use synscope_core::SegmentId;

    #[test]
    fn test_parse_snapshot() {
        let snapshot = parse_snapshot(r#"{"layers":{"segmentation":{"segments":["12"]}}}"#).unwrap();
        assert_eq!(snapshot.segments(), vec![SegmentId(12)]);
        assert!(parse_snapshot("[1, 2]").is_none());
        assert!(parse_snapshot("not json").is_none());
    }
}
