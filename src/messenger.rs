//! Facebook Messenger page webhook. Each inbound text message runs a regular
//! chat round on the `fb-<sender>` session and the answer is sent back through
//! the Graph API.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::app::{AppState, CHAT_ERROR_REPLY};
use crate::error::{ApiError, StoreError};

/// Sent when a round produced no text at all.
pub const MESSENGER_FALLBACK_REPLY: &str = "Xin lỗi, không thể xử lý tin nhắn lúc này.";

pub fn session_id_for_sender(sender_id: &str) -> String {
    format!("fb-{sender_id}")
}

/// Checks `X-Hub-Signature-256` (`sha256=<hex hmac of the raw body>`).
pub fn verify_signature(app_secret: &str, signature_header: Option<&str>, body: &[u8]) -> bool {
    let signature = signature_header.unwrap_or("").trim();
    let signature = signature.strip_prefix("sha256=").unwrap_or(signature).trim();
    if signature.is_empty() {
        return false;
    }
    let Ok(signature_bytes) = hex::decode(signature) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(app_secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature_bytes).is_ok()
}

/// Text messages in a page payload, as `(sender id, text)` pairs in order.
fn inbound_texts(payload: &Value) -> Vec<(String, String)> {
    payload
        .get("entry")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|entry| entry.get("messaging").and_then(Value::as_array))
        .flatten()
        .filter_map(|event| {
            let sender = event.pointer("/sender/id").and_then(value_as_id)?;
            let text = event.pointer("/message/text").and_then(Value::as_str)?;
            (!text.trim().is_empty()).then(|| (sender, text.to_string()))
        })
        .collect()
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub async fn webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<&'static str, ApiError> {
    if let Some(app_secret) = state.config.fb_app_secret.as_deref() {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok());
        if !verify_signature(app_secret, signature, &body) {
            return Err(ApiError::Unauthorized("invalid webhook signature".to_string()));
        }
    }

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid webhook payload: {err}")))?;
    if payload.get("object").and_then(Value::as_str) != Some("page") {
        debug!("ignoring non-page webhook event");
        return Ok("OK");
    }

    for (sender_id, text) in inbound_texts(&payload) {
        if let Err(err) = handle_message(&state, &sender_id, &text).await {
            error!(sender_id = %sender_id, error = %err, "failed to handle messenger message");
        }
    }
    Ok("OK")
}

async fn handle_message(state: &AppState, sender_id: &str, text: &str) -> Result<(), StoreError> {
    let session_id = session_id_for_sender(sender_id);
    let history = state.chats.get_last(&session_id).await?;
    let orchestrator = state.orchestrator(&state.config.default_model).await?;

    let reply = match orchestrator.process_message(text, &history, None).await {
        Ok(outcome) => {
            state
                .chats
                .append(&session_id, &[outcome.user_message, outcome.assistant_message])
                .await?;
            outcome.content
        }
        Err(err) => {
            error!(session_id = %session_id, error = %err, "messenger chat round failed");
            CHAT_ERROR_REPLY.to_string()
        }
    };

    let reply = match reply.trim() {
        "" => MESSENGER_FALLBACK_REPLY,
        trimmed => trimmed,
    };
    send_reply(state, sender_id, reply).await;
    Ok(())
}

async fn send_reply(state: &AppState, recipient_id: &str, text: &str) {
    let Some(token) = state.config.fb_page_token.as_deref() else {
        warn!(recipient_id, "FB_PAGE_TOKEN not set, messenger reply not sent");
        return;
    };

    let result = state
        .http
        .post(format!("{}/me/messages", state.config.fb_graph_url))
        .query(&[("access_token", token)])
        .json(&json!({
            "recipient": { "id": recipient_id },
            "message": { "text": text }
        }))
        .send()
        .await;

    match result {
        Ok(response) if response.status().is_success() => {
            info!(recipient_id, "messenger reply sent");
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(recipient_id, %status, body = %body, "messenger send API rejected reply");
        }
        Err(err) => warn!(recipient_id, error = %err, "messenger send API request failed"),
    }
}
