//! Streamable HTTP transport: one endpoint multiplexing JSON-once and
//! SSE-stream replies.
//!
//! POST carries a JSON-RPC frame. The reply is a single JSON document
//! unless the handler emits a notification first, the client accepts
//! `text/event-stream`, and POST-SSE is enabled; then the reply is an SSE
//! stream of notification events closed by one final response event.
//! GET (optional) opens the long-lived per-session notification stream.
//! DELETE terminates a session. `Last-Event-ID` is accepted but ignored:
//! there is no replay buffer, streams resume with fresh monotone ids.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{
        IntoResponse, Response as HttpResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use serde_json::json;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::protocol::{
    ErrorResponse, Message, Notification, Request, RequestId, RpcError, codes, decode_frames,
    methods,
};
use crate::server::notify::NotificationSender;
use crate::server::session::Session;
use crate::server::{McpServer, dispatch, sse_legacy};

pub(crate) const SESSION_HEADER: &str = "mcp-session-id";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Build the router: the configured MCP endpoint, the legacy SSE pair,
/// and a health probe.
pub(crate) fn router(server: McpServer) -> Router {
    let path = server.config().path.clone();
    Router::new()
        .route("/health", get(health))
        .route(
            &path,
            axum::routing::post(handle_post).get(handle_get).delete(handle_delete),
        )
        .route("/sse", get(sse_legacy::handle_sse))
        .route("/message", axum::routing::post(sse_legacy::handle_message))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

async fn health(State(server): State<McpServer>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": server.inner().info.name,
        "sessions": server.sessions().count().await,
    }))
}

/// What the client's Accept header permits.
#[derive(Debug, Clone, Copy)]
struct Accepts {
    json: bool,
    sse: bool,
}

fn parse_accept(headers: &HeaderMap) -> Accepts {
    match headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) {
        Some(value) => Accepts {
            json: value.contains("application/json") || value.contains("*/*"),
            sse: value.contains("text/event-stream"),
        },
        // No Accept header is treated as accept-anything.
        None => Accepts { json: true, sse: false },
    }
}

fn session_id_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn with_session_header(mut response: HttpResponse, session: &Session) -> HttpResponse {
    if let Ok(value) = HeaderValue::from_str(&session.id) {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

/// JSON-RPC error wrapped in an HTTP status, for transport-level refusals
/// that still carry a protocol body.
fn rpc_failure(status: StatusCode, id: Option<RequestId>, error: RpcError) -> HttpResponse {
    (status, Json(Message::Error(ErrorResponse::new(id, error)))).into_response()
}

async fn handle_post(
    State(server): State<McpServer>,
    headers: HeaderMap,
    body: String,
) -> HttpResponse {
    let accepts = parse_accept(&headers);

    let frames = match decode_frames(&body) {
        Ok(frames) => frames,
        Err(err) => {
            return rpc_failure(StatusCode::BAD_REQUEST, None, RpcError::parse_error(err));
        }
    };
    let is_batch = frames.len() > 1 || body.trim_start().starts_with('[');

    // Session discipline. initialize allocates in stateful mode; everything
    // else must present a known session id.
    let stateless = server.config().stateless_mode;
    let is_initialize = !is_batch
        && matches!(&frames[0], Message::Request(r) if r.method == methods::INITIALIZE);

    let session = if stateless {
        Arc::new(Session::ephemeral())
    } else if is_initialize {
        server.sessions().create().await
    } else {
        match session_id_header(&headers) {
            Some(id) => match server.sessions().get(id).await {
                Some(session) => session,
                None => {
                    return rpc_failure(
                        StatusCode::NOT_FOUND,
                        first_request_id(&frames),
                        RpcError::new(codes::INVALID_REQUEST, "unknown session"),
                    );
                }
            },
            None => {
                return rpc_failure(
                    StatusCode::NOT_FOUND,
                    first_request_id(&frames),
                    RpcError::new(codes::INVALID_REQUEST, "missing Mcp-Session-Id header"),
                );
            }
        }
    };

    if is_batch {
        return handle_batch(&server, &session, frames, stateless).await;
    }

    let frame = frames.into_iter().next().expect("non-empty frames");
    match frame {
        Message::Notification(_) | Message::Response(_) | Message::Error(_) => {
            dispatch::dispatch_message(
                server.inner(),
                &session,
                frame,
                NotificationSender::disabled(),
            )
            .await;
            let response = StatusCode::ACCEPTED.into_response();
            if stateless { response } else { with_session_header(response, &session) }
        }
        Message::Request(request) => {
            handle_request(server, session, request, accepts, stateless).await
        }
    }
}

fn first_request_id(frames: &[Message]) -> Option<RequestId> {
    frames.iter().find_map(|frame| frame.id().cloned())
}

/// Batch input: dispatch each frame in order, reply with a JSON array (or
/// 202 when the batch held only notifications). Batches never stream.
async fn handle_batch(
    server: &McpServer,
    session: &Arc<Session>,
    frames: Vec<Message>,
    stateless: bool,
) -> HttpResponse {
    let mut replies = Vec::new();
    for frame in frames {
        if let Some(reply) = dispatch::dispatch_message(
            server.inner(),
            session,
            frame,
            NotificationSender::disabled(),
        )
        .await
        {
            replies.push(reply);
        }
    }

    let response = if replies.is_empty() {
        StatusCode::ACCEPTED.into_response()
    } else {
        Json(replies).into_response()
    };
    if stateless { response } else { with_session_header(response, session) }
}

/// Single request: choose between a JSON reply and an SSE stream. The
/// decision races the handler against its first emitted notification;
/// a handler that finishes quietly gets a plain JSON reply.
async fn handle_request(
    server: McpServer,
    session: Arc<Session>,
    request: Request,
    accepts: Accepts,
    stateless: bool,
) -> HttpResponse {
    let sse_enabled = server.config().post_sse_enabled;

    if !accepts.json && accepts.sse && !sse_enabled {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }
    if !accepts.json && !accepts.sse {
        return StatusCode::NOT_ACCEPTABLE.into_response();
    }

    if accepts.sse && sse_enabled {
        // Channel consumed by the reply stream; capacity bounds a bursty
        // handler.
        let (tx, rx) = mpsc::channel(16);
        let handle = {
            let server = server.clone();
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                dispatch::dispatch_request(
                    server.inner(),
                    &session,
                    request,
                    NotificationSender::for_request(tx),
                )
                .await
            })
        };
        return race_reply(session, handle, rx, stateless).await;
    }

    // Notifications the handler emits have nowhere to go; they are dropped,
    // never buffered across requests.
    let reply = dispatch::dispatch_request(
        server.inner(),
        &session,
        request,
        NotificationSender::disabled(),
    )
    .await;
    let response = Json(reply).into_response();
    if stateless { response } else { with_session_header(response, &session) }
}

/// Wait for the first notification or handler completion, whichever comes
/// first, and answer in the matching mode.
async fn race_reply(
    session: Arc<Session>,
    mut handle: tokio::task::JoinHandle<Message>,
    mut rx: mpsc::Receiver<Notification>,
    stateless: bool,
) -> HttpResponse {
    enum Outcome {
        First(Option<Notification>),
        Done(Message),
    }

    // The channel is polled first: a handler can queue its last
    // notification and return in the same poll, making both arms ready
    // at once. An unbiased pick could take the join handle and drop the
    // queued frame with `rx`, sending the reply without it.
    let outcome = tokio::select! {
        biased;
        first = rx.recv() => Outcome::First(first),
        reply = &mut handle => Outcome::Done(unwrap_join(reply)),
    };

    match outcome {
        Outcome::First(Some(first)) => stream_reply(session, handle, rx, first, stateless),
        // Channel closed with nothing queued: the handler emitted no
        // notifications at all.
        Outcome::First(None) => {
            let reply = unwrap_join(handle.await);
            json_reply(reply, &session, stateless)
        }
        Outcome::Done(reply) => {
            // The handler finished first; anything it queued still
            // precedes the reply.
            let mut queued = Vec::new();
            while let Ok(notification) = rx.try_recv() {
                queued.push(notification);
            }
            if queued.is_empty() {
                json_reply(reply, &session, stateless)
            } else {
                finished_stream_reply(session, queued, reply, stateless)
            }
        }
    }
}

fn json_reply(reply: Message, session: &Session, stateless: bool) -> HttpResponse {
    let response = Json(reply).into_response();
    if stateless { response } else { with_session_header(response, session) }
}

/// SSE mode: emitted notifications in order, then exactly one final event
/// carrying the reply.
fn stream_reply(
    session: Arc<Session>,
    handle: tokio::task::JoinHandle<Message>,
    mut rx: mpsc::Receiver<Notification>,
    first: Notification,
    stateless: bool,
) -> HttpResponse {
    let session_id = (!stateless).then(|| session.id.clone());
    let stream = async_stream::stream! {
        yield Ok::<_, Infallible>(frame_event(&session, &Message::Notification(first)));

        // The sender lives inside the handler's context; the channel
        // closing means the handler is done (or nearly so).
        while let Some(notification) = rx.recv().await {
            yield Ok(frame_event(&session, &Message::Notification(notification)));
        }
        let reply = unwrap_join(handle.await);
        yield Ok(frame_event(&session, &reply));
    };
    sse_reply(stream, session_id)
}

/// SSE mode for a handler that already returned: the notifications it
/// queued, then the reply.
fn finished_stream_reply(
    session: Arc<Session>,
    notifications: Vec<Notification>,
    reply: Message,
    stateless: bool,
) -> HttpResponse {
    let session_id = (!stateless).then(|| session.id.clone());
    let stream = async_stream::stream! {
        for notification in notifications {
            yield Ok::<_, Infallible>(frame_event(&session, &Message::Notification(notification)));
        }
        yield Ok(frame_event(&session, &reply));
    };
    sse_reply(stream, session_id)
}

fn sse_reply<S>(stream: S, session_id: Option<String>) -> HttpResponse
where
    S: futures::Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
        .into_response();
    if let Some(sid) = session_id {
        if let Ok(value) = HeaderValue::from_str(&sid) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

fn unwrap_join(reply: Result<Message, tokio::task::JoinError>) -> Message {
    reply.unwrap_or_else(|err| {
        Message::Error(ErrorResponse::new(None, RpcError::internal(err.to_string())))
    })
}

/// One SSE event carrying a serialized frame, stamped with the session's
/// next monotone event id.
pub(crate) fn frame_event(session: &Session, message: &Message) -> Event {
    let data = serde_json::to_string(message).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(session.next_event_id().to_string())
        .event("message")
        .data(data)
}

/// GET: the long-lived per-session notification stream.
async fn handle_get(State(server): State<McpServer>, headers: HeaderMap) -> HttpResponse {
    if !server.config().get_sse_enabled || server.config().stateless_mode {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let session = match session_id_header(&headers) {
        Some(id) => match server.sessions().get(id).await {
            Some(session) => session,
            None => {
                return rpc_failure(
                    StatusCode::NOT_FOUND,
                    None,
                    RpcError::new(codes::INVALID_REQUEST, "unknown session"),
                );
            }
        },
        None => {
            return rpc_failure(
                StatusCode::NOT_FOUND,
                None,
                RpcError::new(codes::INVALID_REQUEST, "missing Mcp-Session-Id header"),
            );
        }
    };

    if let Some(last_event_id) = headers.get("last-event-id").and_then(|v| v.to_str().ok()) {
        // No replay buffer; the stream resumes with fresh ids.
        tracing::debug!(session_id = %session.id, last_event_id, "Ignoring Last-Event-ID");
    }

    let Some(mut rx) = session.try_attach_consumer() else {
        return StatusCode::CONFLICT.into_response();
    };

    tracing::info!(session_id = %session.id, "Opened notification stream");

    let stream_session = Arc::clone(&session);
    let stream = async_stream::stream! {
        while let Some(message) = rx.recv().await {
            yield Ok::<_, Infallible>(frame_event(&stream_session, &message));
        }
    };

    let response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL).text("ping"))
        .into_response();
    with_session_header(response, &session)
}

/// DELETE: terminate the named session.
async fn handle_delete(State(server): State<McpServer>, headers: HeaderMap) -> HttpResponse {
    if server.config().stateless_mode {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    match session_id_header(&headers) {
        Some(id) => {
            if server.sessions().terminate(id).await {
                StatusCode::NO_CONTENT.into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
