//! Dashboard socket
//!
//! GET /api/realtime upgrades to a WebSocket once the session token checks
//! out. Each socket gets a connection in the [`RoomRegistry`]; the client
//! then sends `join-restaurant` / `leave-restaurant` for restaurants it owns
//! and receives `new-booking` events for them. Closing the socket leaves
//! every room.
//!
//! The session is re-checked on every client event and every
//! [`SESSION_RECHECK`], and the socket is closed when the token expires, so
//! logging out also ends the dashboard feed.
//!
//! [`RoomRegistry`]: crate::services::RoomRegistry

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use chrono::Utc;
use futures::{Sink, SinkExt, StreamExt};
use std::time::Duration;

use crate::api::middleware::{AppState, AuthenticatedUser};
use crate::services::{AuthError, ClientEvent, ConnectionId, ServerEvent};

/// How often an idle socket re-checks its session for revocation
pub const SESSION_RECHECK: Duration = Duration::from_secs(30);

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(connect))
}

/// GET /api/realtime
///
/// The session is checked before the upgrade, so an anonymous client gets a
/// plain 401 instead of a socket.
async fn connect(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| serve_dashboard(state, user, socket))
}

async fn serve_dashboard(state: AppState, user: AuthenticatedUser, socket: WebSocket) {
    let (id, mut events) = state.rooms.connect();
    let (mut sink, mut stream) = socket.split();
    tracing::debug!("Dashboard connection {} opened for {}", id, user.id());

    state.rooms.send_to(id, ServerEvent::Connect { connection_id: id });

    let lifetime = u64::try_from(user.0.exp - Utc::now().timestamp()).unwrap_or(0);
    let session_end = tokio::time::sleep(Duration::from_secs(lifetime));
    tokio::pin!(session_end);
    let mut recheck =
        tokio::time::interval_at(tokio::time::Instant::now() + SESSION_RECHECK, SESSION_RECHECK);

    loop {
        tokio::select! {
            outgoing = events.recv() => {
                let Some(event) = outgoing else { break };
                if send_event(&mut sink, event.as_ref()).await.is_err() {
                    break;
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    if let Err(e) = handle_client_event(&state, id, &user, text.as_str()).await {
                        close_session(&mut sink, &e).await;
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut session_end => {
                close_session(&mut sink, &AuthError::Expired).await;
                break;
            }
            _ = recheck.tick() => {
                if let Err(e) = state.tokens.recheck(&user.0).await {
                    close_session(&mut sink, &e).await;
                    break;
                }
            }
        }
    }

    state.rooms.disconnect(id);
    tracing::debug!("Dashboard connection {} closed", id);
}

async fn send_event<S>(sink: &mut S, event: &ServerEvent) -> Result<(), ()>
where
    S: Sink<Message> + Unpin,
{
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            tracing::warn!("Failed to encode dashboard event: {}", e);
            return Ok(());
        }
    };
    sink.send(Message::Text(text.into())).await.map_err(|_| ())
}

/// Tell the client why its session ended, then close the socket
async fn close_session<S>(sink: &mut S, reason: &AuthError)
where
    S: Sink<Message> + Unpin,
{
    tracing::debug!("Closing dashboard socket: {}", reason);
    let event = ServerEvent::Error {
        message: reason.to_string(),
    };
    if send_event(sink, &event).await.is_ok() {
        let _ = sink.send(Message::Close(None)).await;
    }
}

/// Apply one client event
///
/// Fails only when the session no longer verifies; the caller closes the
/// socket.
async fn handle_client_event(
    state: &AppState,
    id: ConnectionId,
    user: &AuthenticatedUser,
    text: &str,
) -> Result<(), AuthError> {
    state.tokens.recheck(&user.0).await?;

    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(_) => {
            state.rooms.send_to(
                id,
                ServerEvent::Error {
                    message: "Unrecognised event".to_string(),
                },
            );
            return Ok(());
        }
    };

    match event {
        ClientEvent::JoinRestaurant(restaurant_id) => {
            if let Err(message) = join(state, id, user, &restaurant_id).await {
                state.rooms.send_to(id, ServerEvent::Error { message });
            }
        }
        ClientEvent::LeaveRestaurant(restaurant_id) => state.rooms.leave(id, &restaurant_id),
    }
    Ok(())
}

/// Join a restaurant's room if the session owns it
async fn join(
    state: &AppState,
    id: ConnectionId,
    user: &AuthenticatedUser,
    restaurant_id: &str,
) -> Result<(), String> {
    let restaurant = match state.restaurants.get_by_id(restaurant_id).await {
        Ok(Some(restaurant)) => restaurant,
        Ok(None) => return Err("Restaurant not found".to_string()),
        Err(e) => {
            tracing::warn!("Room join lookup failed: {:#}", e);
            return Err("Could not join restaurant, please retry".to_string());
        }
    };

    if !restaurant.is_owned_by(user.id()) {
        return Err("You do not manage this restaurant".to_string());
    }

    state.rooms.join(id, &restaurant.id);
    tracing::debug!("Connection {} joined room {}", id, restaurant.id);
    Ok(())
}
