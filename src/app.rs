use std::{convert::Infallible, sync::Arc};

use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::admin;
use crate::config::Config;
use crate::documents::DocumentStore;
use crate::error::{ApiError, StartupError, StoreError};
use crate::llm::{ChatModel, OpenAiClient};
use crate::messenger;
use crate::orchestrator::ChatOrchestrator;
use crate::prompting::{render_system_prompt, SystemPromptContext};
use crate::store::{fallback_title, title_from_first_message, ChatStore, MemoryStore, PgStore, ProductCatalog};
use crate::tools::{ToolContext, ToolRegistry};
use crate::types::{now_millis, ChatBody, CreateSessionBody, Message, SessionInfo, HISTORY_LIMIT};

/// Written to the client (or returned as the assistant turn) when a chat
/// round fails upstream.
pub const CHAT_ERROR_REPLY: &str = "Sorry, I encountered an error.";

pub struct AppState {
    pub config: Config,
    pub chats: Arc<dyn ChatStore>,
    pub catalog: Arc<dyn ProductCatalog>,
    pub documents: Arc<DocumentStore>,
    pub model: Arc<dyn ChatModel>,
    pub tools: ToolRegistry,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            catalog: self.catalog.clone(),
            documents: self.documents.clone(),
            http: self.http.clone(),
            serpapi_key: self.config.serpapi_key.clone(),
        }
    }

    pub fn default_system_prompt(&self) -> String {
        let tool_names: Vec<&str> = self.tools.tools().iter().map(|t| t.name()).collect();
        render_system_prompt(&SystemPromptContext {
            assistant_name: &self.config.assistant_name,
            language: &self.config.assistant_language,
            history_limit: HISTORY_LIMIT,
            tool_names: &tool_names,
        })
    }

    /// The stored prompt if an admin has set one, otherwise the built-in one.
    pub async fn system_prompt(&self) -> Result<String, StoreError> {
        Ok(self
            .chats
            .system_prompt()
            .await?
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| self.default_system_prompt()))
    }

    pub async fn orchestrator(&self, model: &str) -> Result<ChatOrchestrator, StoreError> {
        Ok(ChatOrchestrator::new(
            self.model.clone(),
            self.tools.clone(),
            self.tool_context(),
            model,
            self.system_prompt().await?,
        ))
    }
}

fn init_logging(json: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("support_chat=info,tower_http=info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .ok();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init().ok();
    }
}

pub async fn build_state(config: Config) -> Result<AppState, StartupError> {
    let (chats, catalog): (Arc<dyn ChatStore>, Arc<dyn ProductCatalog>) =
        match config.database_url.as_deref() {
            Some(url) => {
                let store = Arc::new(PgStore::connect(url).await?);
                let chats: Arc<dyn ChatStore> = store.clone();
                let catalog: Arc<dyn ProductCatalog> = store;
                (chats, catalog)
            }
            None => {
                warn!("DATABASE_URL not set, history and catalog are kept in memory");
                let store = Arc::new(MemoryStore::new());
                let chats: Arc<dyn ChatStore> = store.clone();
                let catalog: Arc<dyn ProductCatalog> = store;
                (chats, catalog)
            }
        };

    let documents = Arc::new(DocumentStore::open(config.documents_dir.clone()).await?);
    let http = OpenAiClient::default_http();
    if config.ai_api_key.is_empty() {
        warn!("AI_API_KEY not set, chat requests will fail");
    }
    let model: Arc<dyn ChatModel> = Arc::new(OpenAiClient::new(
        http.clone(),
        config.ai_base_url.clone(),
        config.ai_api_key.clone(),
    ));
    let tools = ToolRegistry::from_config(&config);

    Ok(AppState {
        config,
        chats,
        catalog,
        documents,
        model,
        tools,
        http,
    })
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/chat/{session_id}/messages", get(get_messages))
        .route("/api/chat/{session_id}/chat", post(post_chat))
        .route("/api/sessions", get(list_sessions).post(create_session))
        .route("/api/sessions/all", delete(delete_all_sessions))
        .route("/api/sessions/{session_id}", delete(delete_session))
        .route(
            "/api/admin/products",
            get(admin::list_products).post(admin::create_product),
        )
        .route(
            "/api/admin/products/{id}",
            put(admin::update_product).delete(admin::delete_product),
        )
        .route(
            "/api/admin/documents",
            get(admin::list_documents).post(admin::upload_document),
        )
        .route("/api/admin/documents/{key}", delete(admin::delete_document))
        .route(
            "/api/admin/system-prompt",
            get(admin::get_system_prompt).post(admin::set_system_prompt),
        )
        .route("/api/messenger/webhook", post(messenger::webhook))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run() -> Result<(), StartupError> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env()?;
    init_logging(config.log_json);

    let port = config.port;
    let state = Arc::new(build_state(config).await?);
    info!(
        model = %state.config.default_model,
        tools = state.tools.tools().len(),
        "support chat state ready"
    );
    let app = router(state);

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("support chat server running at http://localhost:{port}");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn get_messages(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let messages = state.chats.get_last(&session_id).await?;
    Ok(Json(json!({
        "success": true,
        "data": {
            "messages": messages,
            "sessionId": session_id,
            "model": state.config.default_model,
        }
    })))
}

async fn post_chat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    raw: Bytes,
) -> Result<Response, ApiError> {
    // Any content type is accepted; unparseable bodies carry no message.
    let body = serde_json::from_slice::<Value>(&raw)
        .map(|value| ChatBody::from_json(&value))
        .unwrap_or_default();
    let Some(text) = body.message.filter(|m| !m.trim().is_empty()) else {
        return Err(ApiError::bad_request("Message is required"));
    };
    let model = body
        .model
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.config.default_model.clone());

    let history = state.chats.get_last(&session_id).await?;
    let orchestrator = state.orchestrator(&model).await?;

    if body.stream {
        return Ok(stream_chat(state, orchestrator, session_id, text, history));
    }

    let (user_message, assistant_message) =
        match orchestrator.process_message(&text, &history, None).await {
            Ok(outcome) => {
                state
                    .chats
                    .append(
                        &session_id,
                        &[outcome.user_message.clone(), outcome.assistant_message.clone()],
                    )
                    .await?;
                (outcome.user_message, outcome.assistant_message)
            }
            Err(err) => {
                error!(session_id = %session_id, error = %err, "chat round failed");
                (Message::user(text), Message::assistant(CHAT_ERROR_REPLY))
            }
        };

    let mut messages = history;
    messages.push(user_message);
    messages.push(assistant_message);
    Ok(Json(json!({
        "success": true,
        "data": {
            "messages": messages,
            "sessionId": session_id,
            "model": model,
        }
    }))
    .into_response())
}

/// Runs the round on its own task and streams answer text as it arrives.
/// The body closes after the messages are persisted, or after the apology
/// when the round fails.
fn stream_chat(
    state: Arc<AppState>,
    orchestrator: ChatOrchestrator,
    session_id: String,
    text: String,
    history: Vec<Message>,
) -> Response {
    let (tx, rx) = mpsc::unbounded_channel::<Result<Bytes, Infallible>>();

    tokio::spawn(async move {
        let chunk_tx = tx.clone();
        let mut forward = move |chunk: &str| {
            let _ = chunk_tx.send(Ok(Bytes::copy_from_slice(chunk.as_bytes())));
        };

        match orchestrator
            .process_message(&text, &history, Some(&mut forward))
            .await
        {
            Ok(outcome) => {
                if let Err(err) = state
                    .chats
                    .append(&session_id, &[outcome.user_message, outcome.assistant_message])
                    .await
                {
                    error!(session_id = %session_id, error = %err, "failed to persist streamed chat");
                }
            }
            Err(err) => {
                error!(session_id = %session_id, error = %err, "streaming chat round failed");
                let _ = tx.send(Ok(Bytes::from_static(CHAT_ERROR_REPLY.as_bytes())));
            }
        }
    });

    (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(UnboundedReceiverStream::new(rx)),
    )
        .into_response()
}

async fn list_sessions(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let sessions = state.chats.list_sessions().await?;
    Ok(Json(json!({ "success": true, "data": sessions })))
}

async fn create_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<CreateSessionBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let now = now_millis();
    let session_id = body
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let title = body
        .title
        .filter(|t| !t.trim().is_empty())
        .or_else(|| {
            body.first_message
                .as_deref()
                .filter(|m| !m.trim().is_empty())
                .map(title_from_first_message)
        })
        .unwrap_or_else(|| fallback_title(now));

    state
        .chats
        .create_session(SessionInfo {
            id: session_id.clone(),
            title: title.clone(),
            created_at: now,
            last_active: now,
        })
        .await?;

    Ok(Json(json!({
        "success": true,
        "data": { "sessionId": session_id, "title": title }
    })))
}

async fn delete_all_sessions(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    state.chats.delete_all_sessions().await?;
    info!("all sessions deleted");
    Ok(Json(json!({ "success": true })))
}

async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    state.chats.delete_session(&session_id).await?;
    Ok(Json(json!({ "success": true, "data": { "deleted": true } })))
}
