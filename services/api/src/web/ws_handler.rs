//! services/api/src/web/ws_handler.rs
//!
//! This is the main entry point and control loop for a WebSocket connection.
//! Each connection is one page activation: it waits for `Init`, builds the
//! page's own auth adapter, then feeds client messages and page events into
//! a `PageSession` until the client goes away.

use crate::{
    adapters::{GoTrueAuthAdapter, StoredTokens},
    web::{
        page::{page_channel, PageDeps, PageEvent, PageSession},
        protocol::{ClientMessage, ServerMessage},
        state::{AppState, PageSettings},
    },
};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use culinary_core::location::CredentialMarkers;
use futures::{
    stream::{SplitSink, StreamExt},
    SinkExt,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// The handler for upgrading HTTP requests to WebSocket connections.
pub async fn ws_handler(ws: WebSocketUpgrade, State(app_state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, app_state))
}

async fn handle_socket(socket: WebSocket, app_state: Arc<AppState>) {
    info!("New WebSocket connection established.");
    let (mut ws_sender, mut receiver) = socket.split();

    // --- 1. Initialization Phase ---
    let (location, stored) = match receiver.next().await {
        Some(Ok(Message::Text(init_json))) => match serde_json::from_str::<ClientMessage>(&init_json) {
            Ok(ClientMessage::Init {
                location,
                access_token,
                refresh_token,
            }) => {
                let stored = access_token.map(|access_token| StoredTokens {
                    access_token,
                    refresh_token,
                });
                (location, stored)
            }
            _ => {
                error!("First message was not a valid Init message.");
                send_error(&mut ws_sender, "Expected an init message.").await;
                return;
            }
        },
        _ => {
            error!("Client disconnected before sending Init message.");
            return;
        }
    };

    let markers = match CredentialMarkers::from_location(&location) {
        Ok(markers) => markers,
        Err(e) => {
            error!("Init location '{}' is not a valid URL: {}", location, e);
            send_error(&mut ws_sender, "Invalid page location.").await;
            return;
        }
    };

    // --- 2. Outbound Writer ---
    let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let writer = tokio::spawn(async move {
        while let Some(message) = outbox_rx.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    error!("Failed to serialize server message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                warn!("Failed to send message, client is gone.");
                break;
            }
        }
    });

    // --- 3. Main Event Loop ---
    let deps = PageDeps {
        auth: Arc::new(GoTrueAuthAdapter::new(app_state.gotrue.clone(), stored)),
        recipes: app_state.recipes.clone(),
        workflow: app_state.workflow.clone(),
    };
    let (sender, mut inbox) = page_channel();
    let mut page = PageSession::new(
        deps,
        PageSettings::from_config(&app_state.config),
        sender,
        outbox,
    );
    page.activate(markers);

    loop {
        tokio::select! {
            Some(event) = inbox.recv() => page.handle(event),
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => page.handle(PageEvent::Client(message)),
                    Err(e) => warn!("Failed to deserialize client message: {}", e),
                },
                Some(Ok(Message::Close(_))) => {
                    info!("Client sent close message.");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket receive error: {}", e);
                    break;
                }
                None => {
                    info!("Client disconnected.");
                    break;
                }
            },
        }
    }

    // --- 4. Cleanup ---
    page.teardown();
    drop(page);
    if let Err(e) = writer.await {
        error!("WebSocket writer task failed: {:?}", e);
    }
    info!("WebSocket connection closed.");
}

async fn send_error(ws_sender: &mut SplitSink<WebSocket, Message>, message: &str) {
    let err_msg = ServerMessage::Error {
        message: message.to_string(),
    };
    match serde_json::to_string(&err_msg) {
        Ok(json) => {
            if ws_sender.send(Message::Text(json.into())).await.is_err() {
                warn!("Failed to send error message.");
            }
        }
        Err(e) => error!("Failed to serialize error message: {}", e),
    }
}
