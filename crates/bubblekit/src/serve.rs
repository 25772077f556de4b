//! The HTTP surface.
//!
//! A deliberately thin axum layer: parse headers and bodies, call into the
//! [`Runtime`], and expose the stream's frame receiver as an
//! `application/x-ndjson` response body. CORS, auth, and anything else
//! between the runtime and the outside world belongs to the embedding
//! application, not here.

use std::{io, net::SocketAddr, sync::Arc};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    error::Error,
    runtime::{Runtime, StreamRequest},
    session::normalize_user_id,
};

/// Free-form caller identity; passed through, never validated.
pub const USER_ID_HEADER: &str = "User-Id";

const NDJSON_MIME_TYPE: &str = "application/x-ndjson";
const HEADER_X_ACCEL_BUFFERING: &str = "X-Accel-Buffering";

#[derive(Clone)]
struct App {
    runtime: Arc<Runtime>,
}

/// Build the API router for a runtime.
pub fn router(runtime: Arc<Runtime>) -> Router {
    Router::new()
        .route("/api/conversations", get(list_conversations))
        .route(
            "/api/conversations/{conversation_id}/messages",
            get(conversation_messages),
        )
        .route("/api/conversations/stream", post(open_stream))
        .route("/api/streams/{stream_id}/cancel", post(cancel_stream))
        .with_state(App { runtime })
}

fn user_id_from(headers: &HeaderMap) -> String {
    normalize_user_id(headers.get(USER_ID_HEADER).and_then(|v| v.to_str().ok()))
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

async fn list_conversations(State(app): State<App>, headers: HeaderMap) -> Response {
    let user_id = user_id_from(&headers);
    let conversations = app.runtime.index().get(&user_id).await;
    Json(json!({ "conversations": conversations })).into_response()
}

async fn conversation_messages(
    State(app): State<App>,
    Path(conversation_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let user_id = user_id_from(&headers);
    match app
        .runtime
        .conversation_history(&conversation_id, &user_id)
        .await
    {
        Ok(messages) => Json(json!({
            "conversationId": conversation_id,
            "messages": messages,
        }))
        .into_response(),
        Err(error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StreamBody {
    conversation_id: Option<String>,
    message: Option<String>,
}

async fn open_stream(State(app): State<App>, headers: HeaderMap, body: Bytes) -> Response {
    let user_id = user_id_from(&headers);
    let request: StreamBody = if body.is_empty() {
        StreamBody::default()
    } else {
        match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(error) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    format!("invalid request body: {error}"),
                );
            }
        }
    };

    let opened = app
        .runtime
        .open_stream(StreamRequest {
            conversation_id: request.conversation_id.filter(|id| !id.trim().is_empty()),
            message: request.message,
            user_id,
        })
        .await;
    match opened {
        Ok(opened) => {
            let frames = ReceiverStream::new(opened.frames).map(Ok::<_, io::Error>);
            match Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, NDJSON_MIME_TYPE)
                .header(header::CACHE_CONTROL, "no-cache")
                .header(HEADER_X_ACCEL_BUFFERING, "no")
                .body(Body::from_stream(frames))
            {
                Ok(response) => response,
                Err(error) => {
                    error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
                }
            }
        }
        Err(Error::StreamAlreadyAttached(conversation_id)) => error_response(
            StatusCode::CONFLICT,
            format!("a stream is already open for conversation {conversation_id}"),
        ),
        Err(error) => error_response(StatusCode::INTERNAL_SERVER_ERROR, error.to_string()),
    }
}

async fn cancel_stream(State(app): State<App>, Path(stream_id): Path<String>) -> Response {
    let status = if app.runtime.cancel_stream(&stream_id).await {
        "cancelled"
    } else {
        "unknown"
    };
    Json(json!({ "status": status })).into_response()
}

/// Server bind parameters. The cancellation token drives graceful shutdown.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub ct: CancellationToken,
}

/// A running HTTP server wrapping one [`Runtime`].
#[derive(Debug)]
pub struct BubbleServer {
    pub config: ServerConfig,
}

impl BubbleServer {
    /// Bind and serve with a fresh cancellation token.
    pub async fn serve(runtime: Arc<Runtime>, bind: SocketAddr) -> io::Result<Self> {
        Self::serve_with_config(
            runtime,
            ServerConfig {
                bind,
                ct: CancellationToken::new(),
            },
        )
        .await
    }

    /// Bind and serve. Port 0 is supported; the actual bound address is in
    /// `config.bind` of the returned server.
    pub async fn serve_with_config(
        runtime: Arc<Runtime>,
        mut config: ServerConfig,
    ) -> io::Result<Self> {
        let listener = tokio::net::TcpListener::bind(config.bind).await?;
        config.bind = listener.local_addr()?;
        let service = router(runtime.clone());
        let ct = config.ct.child_token();
        let server = axum::serve(listener, service).with_graceful_shutdown(async move {
            ct.cancelled().await;
            // Stop accepting and interrupt every in-flight stream; their
            // cancel handles are children of the runtime's shutdown token.
            runtime.shutdown();
            tracing::info!("bubble server cancelled");
        });
        let bind = config.bind;
        tokio::spawn(
            async move {
                if let Err(error) = server.await {
                    tracing::error!(%error, "bubble server shutdown with error");
                }
            }
            .instrument(tracing::info_span!("bubble-server", bind_address = %bind)),
        );
        Ok(BubbleServer { config })
    }

    /// Request shutdown of the accept loop and all child streams.
    pub fn cancel(&self) {
        self.config.ct.cancel();
    }
}
