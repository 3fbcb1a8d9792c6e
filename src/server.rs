use std::net::SocketAddr;

use anyhow::Result;
use askama::Template;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::chat::{ChatService, UnknownNovel};
use crate::config::AppConfig;
use crate::db::Database;
use crate::models::{ChatAnswer, ChatRequest, ChunkId, Novel, StoredChunk};

#[derive(Clone)]
struct AppState {
    db: Database,
    chat: ChatService,
}

pub async fn run_server(config: AppConfig, db: Database, chat_service: ChatService) -> Result<()> {
    let state = AppState {
        db,
        chat: chat_service,
    };

    let app = router(state);

    let addr: SocketAddr = config.bind_addr.parse()?;
    tracing::info!("listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/api/novels", get(list_novels))
        .route("/api/chat", post(chat_handler))
        .route("/api/chunks/:chunk_id", get(get_chunk))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index_page(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let novels = state.db.list_novels().await?;
    let body = IndexTemplate { novels }.render()?;
    Ok(Html(body))
}

async fn list_novels(State(state): State<AppState>) -> Result<Json<Vec<Novel>>, ApiError> {
    Ok(Json(state.db.list_novels().await?))
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    if request.question.trim().is_empty() {
        return Err(ApiError::bad_request("question must not be empty".to_string()));
    }
    let answer = state.chat.answer(request).await?;
    Ok(Json(answer))
}

async fn get_chunk(
    State(state): State<AppState>,
    Path(chunk_id): Path<ChunkId>,
) -> Result<Json<StoredChunk>, ApiError> {
    match state.db.get_chunk(chunk_id).await? {
        Some(chunk) => Ok(Json(chunk)),
        None => Err(ApiError::not_found(format!("chunk not found: {}", chunk_id))),
    }
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    novels: Vec<Novel>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: String) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message,
        }
    }

    fn bad_request(message: String) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        let status = if value.downcast_ref::<UnknownNovel>().is_some() {
            StatusCode::NOT_FOUND
        } else {
            tracing::error!(error = %value, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self {
            status,
            message: value.to_string(),
        }
    }
}

impl From<askama::Error> for ApiError {
    fn from(value: askama::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    #[test]
    fn unknown_novel_maps_to_not_found() {
        let err = ApiError::from(anyhow::Error::new(UnknownNovel("Missing".to_string())));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.message, "unknown novel: Missing");

        let err = ApiError::from(anyhow::anyhow!("qdrant unreachable"));
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn index_lists_novels() {
        let page = IndexTemplate {
            novels: vec![Novel {
                id: 1,
                title: "Supreme Magus".to_string(),
                created_at: Utc::now(),
            }],
        }
        .render()
        .unwrap();
        assert!(page.contains(r#"<option value="Supreme Magus">"#));
    }

    #[test]
    fn error_body_is_json() {
        let response = ApiError::not_found("chunk not found: 3".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
