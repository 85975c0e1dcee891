//! WebSocket channel between one page and the worker.
//!
//! Text frames from the page are posted to the controlling worker; messages
//! the worker posts to the page are sent back as JSON text frames.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::AppState;
use crate::registration::ServiceWorkerContainer;

#[derive(Deserialize)]
pub(super) struct SocketParams {
    /// URL of the page opening the channel.
    #[serde(default = "root_page")]
    page: String,
}

fn root_page() -> String {
    "/".to_string()
}

pub(super) async fn upgrade(
    ws: WebSocketUpgrade,
    Query(params): Query<SocketParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session(socket, state.container, params.page))
}

async fn session(mut socket: WebSocket, container: Arc<ServiceWorkerContainer>, page: String) {
    let (id, rx) = container.connect(&page);
    let mut outgoing = UnboundedReceiverStream::new(rx);
    log::info!("Page {id} connected from {page}");

    loop {
        tokio::select! {
            message = outgoing.next() => {
                let Some(message) = message else { break };
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        log::error!("Cannot encode {message:?}: {e}");
                        continue;
                    }
                };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    container.post_message(id, text.to_string());
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::debug!("Socket error for page {id}: {e}");
                    break;
                }
            }
        }
    }

    container.disconnect(id);
    log::info!("Page {id} disconnected");
}
