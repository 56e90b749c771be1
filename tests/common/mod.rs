#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use futures_util::StreamExt;
use serde_json::{json, Value};
use tower::util::ServiceExt;
use uuid::Uuid;

use support_chat::app::{router, AppState};
use support_chat::config::Config;
use support_chat::documents::DocumentStore;
use support_chat::error::ModelError;
use support_chat::llm::{sse, ChatChunk, ChatCompletion, ChatModel, ChatRequest, ChunkStream};
use support_chat::store::MemoryStore;
use support_chat::tools::ToolRegistry;

pub enum StreamStep {
    Chunk(Value),
    Fail,
}

enum ScriptedStream {
    Steps(Vec<StreamStep>),
    /// Raw `text/event-stream` body, decoded by the production SSE parser.
    Sse(String),
}

/// Chat model that replays canned responses and records every request.
#[derive(Default)]
pub struct ScriptedModel {
    completions: Mutex<VecDeque<Value>>,
    streams: Mutex<VecDeque<ScriptedStream>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn completion(self, value: Value) -> Self {
        self.completions.lock().unwrap().push_back(value);
        self
    }

    pub fn text(self, content: &str) -> Self {
        self.completion(json!({"choices": [{"message": {"role": "assistant", "content": content}}]}))
    }

    pub fn stream(self, steps: Vec<StreamStep>) -> Self {
        self.streams.lock().unwrap().push_back(ScriptedStream::Steps(steps));
        self
    }

    pub fn sse(self, body: &str) -> Self {
        self.streams
            .lock()
            .unwrap()
            .push_back(ScriptedStream::Sse(body.to_string()));
        self
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn text_chunk(text: &str) -> StreamStep {
    StreamStep::Chunk(json!({"choices": [{"delta": {"content": text}}]}))
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.completions.lock().unwrap().pop_front();
        let Some(value) = next else {
            return Err(ModelError::Api {
                status: 503,
                body: "no scripted completion".to_string(),
            });
        };
        serde_json::from_value(value).map_err(|e| ModelError::Parse(e.to_string()))
    }

    async fn complete_stream(&self, request: &ChatRequest) -> Result<ChunkStream, ModelError> {
        self.requests.lock().unwrap().push(request.clone());
        let next = self.streams.lock().unwrap().pop_front();
        let steps = match next {
            Some(ScriptedStream::Steps(steps)) => steps,
            Some(ScriptedStream::Sse(body)) => {
                let bytes = futures_util::stream::iter(vec![Ok::<_, std::io::Error>(Bytes::from(body))]);
                return Ok(sse::chat_chunks(bytes).boxed());
            }
            None => {
                return Err(ModelError::Api {
                    status: 503,
                    body: "no scripted stream".to_string(),
                })
            }
        };
        let items: Vec<Result<ChatChunk, ModelError>> = steps
            .into_iter()
            .map(|step| match step {
                StreamStep::Chunk(value) => {
                    serde_json::from_value(value).map_err(|e| ModelError::Parse(e.to_string()))
                }
                StreamStep::Fail => Err(ModelError::Network("connection reset".to_string())),
            })
            .collect();
        Ok(futures_util::stream::iter(items).boxed())
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub model: Arc<ScriptedModel>,
}

pub async fn test_app(model: ScriptedModel) -> TestApp {
    test_app_with_env(model, &[]).await
}

pub async fn test_app_with_env(model: ScriptedModel, vars: &[(&str, &str)]) -> TestApp {
    let vars: HashMap<String, String> = vars
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
    let dir = std::env::temp_dir().join(format!("support_chat_api_{}", Uuid::new_v4()));

    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(model);
    let state = Arc::new(AppState {
        tools: ToolRegistry::from_config(&config),
        config,
        chats: store.clone(),
        catalog: store.clone(),
        documents: Arc::new(DocumentStore::open(dir).await.unwrap()),
        model: model.clone(),
        http: reqwest::Client::new(),
    });

    TestApp {
        router: router(state.clone()),
        state,
        store,
        model,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn json(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.send(request).await;
        let status = response.status();
        let bytes = body_bytes(response).await;
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}
