//! Router for the chat API

use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, sse::Event, sse::KeepAlive, sse::Sse},
    routing::{get, post},
};
use tokio::sync::mpsc;
use tokio_stream::StreamExt as _;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::public;
use crate::api::public::ApiError;
use crate::api::state::AppState;
use crate::relay::{Relay, SessionStore};

type SharedState = Arc<RwLock<AppState>>;

fn relay_and_sessions(state: &SharedState) -> (Relay, SessionStore) {
    let shared_state = state.read().expect("Unable to read share state");
    (shared_state.relay.clone(), shared_state.sessions.clone())
}

/// Start a new chat session with an empty history
async fn start_session(State(state): State<SharedState>) -> impl IntoResponse {
    let (relay, sessions) = relay_and_sessions(&state);
    let session_id = relay.on_chat_start(&sessions);

    (
        StatusCode::CREATED,
        Json(public::StartSessionResponse { session_id }),
    )
}

/// End a chat session and discard its history
async fn end_session(State(state): State<SharedState>, Path(id): Path<String>) -> StatusCode {
    let (relay, sessions) = relay_and_sessions(&state);

    match relay.on_chat_end(&sessions, &id) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Get the transcript of a single chat session by ID
async fn chat_session(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let (_, sessions) = relay_and_sessions(&state);

    match sessions.get(&id) {
        Some(history) => Json(public::ChatTranscriptResponse {
            transcript: history.messages().to_vec(),
        })
        .into_response(),
        None => (
            StatusCode::NOT_FOUND,
            format!("Chat session {} not found", id),
        )
            .into_response(),
    }
}

/// Get a list of all chat sessions
async fn chat_list(
    State(state): State<SharedState>,
    Query(params): Query<public::ChatSessionsQuery>,
) -> Json<public::ChatSessionsResponse> {
    let (_, sessions) = relay_and_sessions(&state);
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(20).max(1);
    // Out of range pages are simply empty
    let offset = (page - 1).saturating_mul(limit);
    let total_sessions = sessions.len();
    let paged_sessions = sessions.list(limit, offset);
    let total_pages = total_sessions.div_ceil(limit);

    Json(public::ChatSessionsResponse {
        sessions: paged_sessions,
        page,
        limit,
        total_sessions,
        total_pages,
    })
}

/// Send a message to a chat session and wait for the reply
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::ChatRequest>,
) -> Result<Json<public::ChatResponse>, ApiError> {
    let (relay, sessions) = relay_and_sessions(&state);

    let reply = relay
        .on_message(&sessions, &payload.session_id, &payload.message)
        .await?;

    Ok(Json(public::ChatResponse::new(&reply)))
}

/// Send a message to a chat session and stream the reply
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<public::ChatRequest>,
) -> impl IntoResponse {
    let (relay, sessions) = relay_and_sessions(&state);
    let (tx, rx) = mpsc::unbounded_channel::<public::StreamChunk>();

    // Each event is JSON encoded so line breaks in a fragment can't
    // be confused with the framing of the event stream
    let sse_stream =
        UnboundedReceiverStream::new(rx).map(|chunk| Event::default().json_data(chunk));

    // The stream ends when the task finishes and drops the transmitter
    tokio::spawn(async move {
        let (fragment_tx, mut fragment_rx) = mpsc::unbounded_channel::<String>();

        let relay_reply = relay.on_message_stream(
            &sessions,
            &payload.session_id,
            &payload.message,
            fragment_tx,
        );
        let forward_fragments = async {
            while let Some(content) = fragment_rx.recv().await {
                let _ = tx.send(public::StreamChunk::Content { content });
            }
        };
        let (result, ()) = tokio::join!(relay_reply, forward_fragments);

        if let Err(e) = result {
            tracing::error!("Chat handler error: {}. Root cause: {}", e, e.root_cause());

            let error = format!("Something went wrong: {}", e);
            let _ = tx.send(public::StreamChunk::Error { error });
        }
    });

    Sse::new(sse_stream).keep_alive(
        KeepAlive::default()
            .text("keep-alive")
            .interval(Duration::from_secs(15)),
    )
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/", post(chat_handler))
        .route("/stream", post(chat_stream_handler))
        .route("/sessions", get(chat_list).post(start_session))
        .route("/{id}", get(chat_session).delete(end_session))
}
