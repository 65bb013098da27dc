use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use serde::Deserialize;
use tokio_stream::wrappers::WatchStream;
use tracing::{info, warn};

use crate::engine::discovery::{DiscoveryFeed, FeedQuery};
use crate::engine::scheduler::{spawn_feed, FeedCommand};
use crate::error::AppError;
use crate::models::contract::GeoPoint;
use crate::models::filter::{FilterParams, Viewport};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FeedParams {
    pub lat: f64,
    pub lng: f64,
    pub viewer_id: Option<i64>,
}

/// Messages a map client sends over the feed socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Viewport(Viewport),
    Query(FeedQuery),
    Refresh,
}

impl ClientMessage {
    fn into_command(self) -> Result<FeedCommand, AppError> {
        match self {
            ClientMessage::Viewport(viewport) => {
                viewport.validate()?;
                Ok(FeedCommand::ViewportIdle(viewport))
            }
            ClientMessage::Query(query) => {
                query.validate()?;
                Ok(FeedCommand::Query(query))
            }
            ClientMessage::Refresh => Ok(FeedCommand::RefreshNow),
        }
    }
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(params): Query<FeedParams>,
) -> Result<impl IntoResponse, AppError> {
    let query = FeedQuery::new(
        GeoPoint {
            lat: params.lat,
            lng: params.lng,
        },
        FilterParams::default(),
    );
    query.validate()?;

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, params.viewer_id, query)))
}

async fn handle_socket(
    socket: WebSocket,
    state: Arc<AppState>,
    viewer_id: Option<i64>,
    query: FeedQuery,
) {
    let (mut sender, mut receiver) = socket.split();
    let handle = spawn_feed(
        state.clone(),
        DiscoveryFeed::new(viewer_id, query),
        state.refresh,
        state.metrics.clone(),
    );

    info!(viewer_id = ?viewer_id, "feed client connected");

    let mut markers = WatchStream::new(handle.subscribe());
    let mut send_task = tokio::spawn(async move {
        while let Some(snapshot) = markers.next().await {
            let json = match serde_json::to_string(&snapshot) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize markers for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json.into())).await.is_err() {
                break;
            }
        }
    });

    let recv = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => break,
                _ => continue,
            };

            let command = serde_json::from_str::<ClientMessage>(&text)
                .map_err(|err| AppError::BadRequest(format!("unreadable feed message: {err}")))
                .and_then(ClientMessage::into_command);

            match command {
                Ok(command) => {
                    if handle.send(command).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "ignoring feed message"),
            }
        }
    };

    tokio::select! {
        _ = &mut send_task => {},
        _ = recv => {},
    }
    send_task.abort();

    match handle.shutdown().await {
        Ok(stats) => info!(viewer_id = ?viewer_id, stats = ?stats, "feed client disconnected"),
        Err(err) => warn!(error = %err, "feed did not shut down cleanly"),
    }
}

#[cfg(test)]
mod tests {
    use super::ClientMessage;
    use crate::engine::scheduler::FeedCommand;

    #[test]
    fn parses_tagged_client_messages() {
        let viewport: ClientMessage = serde_json::from_str(
            r#"{"type":"viewport","south":47.0,"west":8.0,"north":47.5,"east":9.0}"#,
        )
        .unwrap();
        assert!(matches!(
            viewport.into_command(),
            Ok(FeedCommand::ViewportIdle(_))
        ));

        let query: ClientMessage = serde_json::from_str(
            r#"{"type":"query","center":{"lat":47.37,"lng":8.54},"filter":{"price":300.0}}"#,
        )
        .unwrap();
        assert!(matches!(query.into_command(), Ok(FeedCommand::Query(_))));

        let refresh: ClientMessage = serde_json::from_str(r#"{"type":"refresh"}"#).unwrap();
        assert!(matches!(refresh.into_command(), Ok(FeedCommand::RefreshNow)));
    }

    #[test]
    fn invalid_viewport_is_refused() {
        let inverted: ClientMessage = serde_json::from_str(
            r#"{"type":"viewport","south":48.0,"west":8.0,"north":47.0,"east":9.0}"#,
        )
        .unwrap();
        assert!(inverted.into_command().is_err());
    }
}
