//! Stdio transport: newline-delimited JSON frames on stdin/stdout.
//!
//! Exactly one session exists, with id `"stdio"`. Frames are processed in
//! arrival order; notifications a handler emits mid-request are written to
//! stdout before the response through the shared writer channel.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::protocol::{ErrorResponse, Message, RpcError, decode_frames};
use crate::server::McpServer;
use crate::server::dispatch;
use crate::server::notify::NotificationSender;
use crate::server::session::Session;

/// Session id of the single stdio session.
pub const STDIO_SESSION_ID: &str = "stdio";

/// Run the stdio server loop until stdin reaches EOF.
pub(crate) async fn run(server: McpServer) -> anyhow::Result<()> {
    let session = Arc::new(Session::new(STDIO_SESSION_ID));
    server.sessions().insert(Arc::clone(&session)).await;

    let stdin = tokio::io::stdin();
    let mut reader = BufReader::new(stdin);
    let mut line = String::new();

    // All outgoing frames funnel through one writer so ordering holds.
    let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);
    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(message) = out_rx.recv().await {
            let frame = match serde_json::to_string(&message) {
                Ok(frame) => frame,
                Err(err) => {
                    tracing::error!(error = %err, "Failed to serialize outgoing frame");
                    continue;
                }
            };
            if stdout.write_all(frame.as_bytes()).await.is_err()
                || stdout.write_all(b"\n").await.is_err()
                || stdout.flush().await.is_err()
            {
                tracing::error!("Failed to write to stdout, stopping writer");
                break;
            }
        }
    });

    // Server-initiated frames queued outside any request (broadcasts)
    // drain onto stdout as well.
    let pump = {
        let out_tx = out_tx.clone();
        let session = Arc::clone(&session);
        tokio::spawn(async move {
            let Some(mut rx) = session.try_attach_consumer() else {
                return;
            };
            while let Some(message) = rx.recv().await {
                if out_tx.send(message).await.is_err() {
                    break;
                }
            }
        })
    };

    tracing::info!("MCP stdio server ready, waiting for requests");

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            tracing::info!("Stdin closed, shutting down");
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Batch arrays are accepted on input; each frame is answered with
        // its own output line.
        let frames = match decode_frames(trimmed) {
            Ok(frames) => frames,
            Err(err) => {
                let reply =
                    Message::Error(ErrorResponse::new(None, RpcError::parse_error(err)));
                if out_tx.send(reply).await.is_err() {
                    break;
                }
                continue;
            }
        };

        for frame in frames {
            handle_frame(&server, &session, &out_tx, frame).await;
        }
    }

    drop(out_tx);
    pump.abort();
    let _ = writer.await;
    Ok(())
}

/// Process one decoded frame, writing any notifications it produces before
/// its reply.
async fn handle_frame(
    server: &McpServer,
    session: &Arc<Session>,
    out_tx: &mpsc::Sender<Message>,
    message: Message,
) {
    match message {
        Message::Request(request) => {
            // The handler runs in its own task so the notification drain
            // makes progress while it executes.
            let (notif_tx, mut notif_rx) = mpsc::channel(16);
            let handle = {
                let server = server.clone();
                let session = Arc::clone(session);
                tokio::spawn(async move {
                    dispatch::dispatch_request(
                        server.inner(),
                        &session,
                        request,
                        NotificationSender::for_request(notif_tx),
                    )
                    .await
                })
            };

            while let Some(notification) = notif_rx.recv().await {
                let frame = Message::Notification(notification);
                if out_tx.send(frame).await.is_err() {
                    break;
                }
            }

            let reply = handle.await.unwrap_or_else(|err| {
                Message::Error(ErrorResponse::new(None, RpcError::internal(err.to_string())))
            });
            if out_tx.send(reply).await.is_err() {
                tracing::error!("Writer gone, dropping reply");
            }
        }
        other => {
            dispatch::dispatch_message(
                server.inner(),
                session,
                other,
                NotificationSender::disabled(),
            )
            .await;
        }
    }
}
