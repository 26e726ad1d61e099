//! WhatsApp Cloud API 集成
//!
//! 通过 Webhook 接收消息，每条消息在独立任务中跑一轮编排，处理完后调用 Cloud API 发送回复。
//! 传输层的 session key 是发送方号码。

use std::sync::{Arc, OnceLock};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::agent::Conductor;

/// 单条回复的最大字符数
pub const MAX_REPLY_CHARS: usize = 1600;

/// WhatsApp 服务状态
pub struct WhatsappState {
    pub conductor: Arc<Conductor>,
    pub access_token: String,
    pub phone_number_id: String,
    pub verify_token: String,
    pub http: reqwest::Client,
}

/// Webhook 验证参数
#[derive(Debug, Deserialize)]
pub struct WebhookVerifyQuery {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// WhatsApp Webhook 请求体
#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    pub object: Option<String>,
    pub entry: Option<Vec<WebhookEntry>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookEntry {
    pub changes: Option<Vec<WebhookChange>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookChange {
    pub value: Option<WebhookValue>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookValue {
    pub messages: Option<Vec<WebhookMessage>>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookMessage {
    pub from: String,
    #[serde(rename = "type")]
    pub msg_type: Option<String>,
    pub text: Option<WebhookText>,
}

#[derive(Debug, Deserialize)]
pub struct WebhookText {
    pub body: String,
}

/// WhatsApp 发送消息 API 请求体
#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    messaging_product: &'a str,
    to: String,
    #[serde(rename = "type")]
    msg_type: &'a str,
    text: SendMessageText,
}

#[derive(Debug, Serialize)]
struct SendMessageText {
    body: String,
}

static BOLD_RE: OnceLock<Regex> = OnceLock::new();
static ITALIC_RE: OnceLock<Regex> = OnceLock::new();
static NEWLINES_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉 markdown 粗体/斜体，合并空行，超长时截断到 1600 字符
pub fn clean_reply(text: &str) -> String {
    let bold = BOLD_RE.get_or_init(|| Regex::new(r"\*\*(.*?)\*\*").unwrap());
    let italic = ITALIC_RE.get_or_init(|| Regex::new(r"\*(.*?)\*").unwrap());
    let newlines = NEWLINES_RE.get_or_init(|| Regex::new(r"\n+").unwrap());

    let text = bold.replace_all(text, "$1");
    let text = italic.replace_all(&text, "$1");
    let text = newlines.replace_all(&text, "\n");
    let text = text.trim();

    if text.chars().count() > MAX_REPLY_CHARS {
        tracing::warn!("reply truncated to WhatsApp limit");
        format!("{}...", text.chars().take(MAX_REPLY_CHARS).collect::<String>())
    } else {
        text.to_string()
    }
}

/// 从 Webhook 载荷中取出 (发送方, 文本)；非文本消息被忽略
pub fn extract_text_messages(payload: WebhookPayload) -> Vec<(String, String)> {
    if payload.object.as_deref() != Some("whatsapp_business_account") {
        return Vec::new();
    }
    payload
        .entry
        .unwrap_or_default()
        .into_iter()
        .flat_map(|e| e.changes.unwrap_or_default())
        .filter_map(|c| c.value)
        .flat_map(|v| v.messages.unwrap_or_default())
        .filter(|m| m.msg_type.as_deref() == Some("text"))
        .filter_map(|m| m.text.map(|t| (m.from, t.body)))
        .collect()
}

/// 创建 WhatsApp 路由
pub fn create_router(state: Arc<WhatsappState>) -> Router {
    Router::new()
        .route("/webhook", get(webhook_verify).post(webhook_receive))
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
}

/// GET /webhook - Meta 验证 Webhook
async fn webhook_verify(
    State(state): State<Arc<WhatsappState>>,
    Query(query): Query<WebhookVerifyQuery>,
) -> Result<String, StatusCode> {
    if query.mode.as_deref() == Some("subscribe")
        && query.verify_token.as_deref() == Some(state.verify_token.as_str())
    {
        Ok(query.challenge.unwrap_or_default())
    } else {
        Err(StatusCode::FORBIDDEN)
    }
}

/// POST /webhook - 立即返回 200，每条消息在后台任务中处理
async fn webhook_receive(
    State(state): State<Arc<WhatsappState>>,
    Json(payload): Json<WebhookPayload>,
) -> StatusCode {
    for (from, body) in extract_text_messages(payload) {
        let state = state.clone();
        tokio::spawn(async move {
            tracing::info!(from = %from, "whatsapp message received");
            let reply = state.conductor.handle_message(&from, &body).await;
            let reply = clean_reply(&reply);
            if let Err(e) = send_whatsapp_message(&state, &from, &reply).await {
                tracing::error!("Failed to send WhatsApp message: {}", e);
            }
        });
    }
    StatusCode::OK
}

/// 通过 WhatsApp Cloud API 发送消息
async fn send_whatsapp_message(state: &WhatsappState, to: &str, body: &str) -> anyhow::Result<()> {
    let url = format!(
        "https://graph.facebook.com/v18.0/{}/messages",
        state.phone_number_id
    );
    let req = SendMessageRequest {
        messaging_product: "whatsapp",
        to: to.replace('+', ""),
        msg_type: "text",
        text: SendMessageText {
            body: body.to_string(),
        },
    };

    let resp = state
        .http
        .post(&url)
        .bearer_auth(&state.access_token)
        .json(&req)
        .send()
        .await?;

    if !resp.status().is_success() {
        let text = resp.text().await?;
        anyhow::bail!("WhatsApp API error: {}", text);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_reply_strips_markdown_and_caps_length() {
        assert_eq!(
            clean_reply("**Madrid**: *21°C*\n\n\nclear sky"),
            "Madrid: 21°C\nclear sky"
        );
        let long = "a".repeat(2000);
        let cleaned = clean_reply(&long);
        assert_eq!(cleaned.chars().count(), MAX_REPLY_CHARS + 3);
        assert!(cleaned.ends_with("..."));
    }

    #[test]
    fn test_extract_text_messages() {
        let payload: WebhookPayload = serde_json::from_value(serde_json::json!({
            "object": "whatsapp_business_account",
            "entry": [{"changes": [{"value": {"messages": [
                {"from": "+54911", "type": "text", "text": {"body": "hola"}},
                {"from": "+54911", "type": "image"}
            ]}}]}]
        }))
        .unwrap();
        assert_eq!(
            extract_text_messages(payload),
            vec![("+54911".to_string(), "hola".to_string())]
        );
    }
}
