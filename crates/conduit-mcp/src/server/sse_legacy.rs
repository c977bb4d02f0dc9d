//! Legacy SSE transport: a `GET /sse` downstream stream paired with a
//! `POST /message` upstream endpoint.
//!
//! The first event on the stream is named `endpoint` and carries the URL
//! of the message endpoint, query-parameterized by the session id the
//! server assigned on GET. Every POST is acknowledged with 202; replies
//! and notifications travel on the pre-opened stream, correlated only by
//! JSON-RPC id.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response as HttpResponse,
        sse::{Event, KeepAlive, Sse},
    },
};
use serde::Deserialize;

use crate::protocol::{Message, RpcError, decode_frames};
use crate::server::McpServer;
use crate::server::dispatch;
use crate::server::http::frame_event;
use crate::server::notify::NotificationSender;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub(crate) struct MessageQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Open the downstream stream: allocate a session, announce the paired
/// message endpoint, then pump the session's outbound channel.
pub(crate) async fn handle_sse(State(server): State<McpServer>) -> HttpResponse {
    if server.config().stateless_mode {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let session = server.sessions().create().await;
    tracing::info!(session_id = %session.id, "Opened legacy SSE stream");

    let endpoint = match server.config().base_url.as_deref() {
        Some(base) => format!("{}/message?sessionId={}", base.trim_end_matches('/'), session.id),
        // Relative form; the client resolves it against the stream URL.
        None => format!("/message?sessionId={}", session.id),
    };

    let Some(mut rx) = session.try_attach_consumer() else {
        // Freshly created sessions always have a free channel.
        return StatusCode::CONFLICT.into_response();
    };

    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(
            Event::default()
                .id(session.next_event_id().to_string())
                .event("endpoint")
                .data(endpoint),
        );
        while let Some(message) = rx.recv().await {
            yield Ok(frame_event(&session, &message));
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
        .into_response()
}

/// Accept an upstream frame. Requests are dispatched in the background and
/// answered on the stream; the POST itself is always acknowledged 202.
pub(crate) async fn handle_message(
    State(server): State<McpServer>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> HttpResponse {
    let Some(session_id) = query.session_id else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let Some(session) = server.sessions().get(&session_id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // Batch arrays are accepted on input; each reply travels on the
    // stream independently.
    let frames = match decode_frames(&body) {
        Ok(frames) => frames,
        Err(err) => {
            return (
                StatusCode::BAD_REQUEST,
                axum::Json(Message::Error(crate::protocol::ErrorResponse::new(
                    None,
                    RpcError::parse_error(err),
                ))),
            )
                .into_response();
        }
    };

    for frame in frames {
        match frame {
            Message::Request(request) => {
                let server = server.clone();
                let session = Arc::clone(&session);
                tokio::spawn(async move {
                    let notifier = NotificationSender::for_session(Arc::clone(&session));
                    let reply = dispatch::dispatch_request(
                        server.inner(),
                        &session,
                        request,
                        notifier,
                    )
                    .await;
                    if !session.push_outbound(reply).await {
                        tracing::warn!(session_id = %session.id, "Failed to queue reply on stream");
                    }
                });
            }
            other => {
                dispatch::dispatch_message(
                    server.inner(),
                    &session,
                    other,
                    NotificationSender::disabled(),
                )
                .await;
            }
        }
    }

    StatusCode::ACCEPTED.into_response()
}
