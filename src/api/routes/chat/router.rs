//! Router for the chat API

use std::sync::Arc;

use axum::{Router, body::Body, extract::State, response::IntoResponse, routing::post};
use futures_util::TryStreamExt;
use http::header;

use super::public;
use crate::api::public::ApiError;
use crate::api::state::AppState;
use crate::chat::relay;

type SharedState = Arc<AppState>;

/// Relay one conversation exchange to the model and stream back the
/// reply: text fragments as they arrive, then the citation trailer
async fn chat_handler(
    State(state): State<SharedState>,
    axum::Json(payload): axum::Json<public::ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let stream = relay(payload.history, payload.message, &state.config).await?;

    // Errors past this point cannot change the committed status line;
    // the connection drops and the cause lands in the logs
    let body = Body::from_stream(
        stream.inspect_err(|err| tracing::error!("Chat stream failed mid-response: {}", err)),
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        body,
    ))
}

/// Create the chat router
pub fn router() -> Router<SharedState> {
    Router::new().route("/", post(chat_handler))
}
