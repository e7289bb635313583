use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::message::ChatMessage;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

const SYSTEM_INSTRUCTION: &str = "You are a helpful, friendly assistant. Talk to the user in a warm, \
    natural and informal way. An occasional emoji is fine, but don't overdo it. \
    Use Markdown when it helps (headings, bold/italic, code blocks, lists). \
    If the user shares their name you may address them by it. \
    Keep answers short and to the point, and go into detail only when needed.";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("Gemini API key is not set. Enter it in the settings or set GEMINI_API_KEY.")]
    MissingApiKey,
    #[error("Gemini API error: {0}")]
    Api(String),
    #[error("Gemini API error: {0}")]
    Status(StatusCode),
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to parse Gemini response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("Request cancelled")]
    Cancelled,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub system_instruction: SystemInstruction,
    pub contents: Vec<Content>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct Part {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f64,
    pub max_output_tokens: u32,
}

#[derive(Debug, Default, Deserialize)]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub message: Option<String>,
}

/// Everything that decides whether an existing client can be reused.
#[derive(Debug, Clone, PartialEq)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
    pub base_url: String,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn needs_rebuild(&self, other: &GeminiConfig) -> bool {
        self.api_key != other.api_key
            || self.model != other.model
            || self.max_output_tokens != other.max_output_tokens
            || (self.temperature - other.temperature).abs() > 0.01
            || self.base_url != other.base_url
            || self.timeout != other.timeout
    }
}

pub fn build_request(
    history: &[ChatMessage],
    temperature: f64,
    max_output_tokens: u32,
) -> GenerateContentRequest {
    let contents = history
        .iter()
        .filter(|m| !m.text().trim().is_empty())
        .map(|m| Content {
            role: Some(m.role().as_str().to_string()),
            parts: vec![Part {
                text: Some(m.text().to_string()),
            }],
        })
        .collect();

    GenerateContentRequest {
        system_instruction: SystemInstruction {
            parts: vec![Part {
                text: Some(SYSTEM_INSTRUCTION.to_string()),
            }],
        },
        contents,
        generation_config: GenerationConfig {
            temperature,
            max_output_tokens,
        },
    }
}

/// Turns a raw HTTP status and body into the reply text or an error.
pub fn interpret_response(status: StatusCode, body: &str) -> Result<String, GeminiError> {
    if !status.is_success() {
        let message = serde_json::from_str::<GenerateContentResponse>(body)
            .ok()
            .and_then(|r| r.error)
            .and_then(|e| e.message)
            .filter(|m| !m.trim().is_empty());
        return Err(match message {
            Some(message) => GeminiError::Api(message),
            None => GeminiError::Status(status),
        });
    }

    let response: GenerateContentResponse = serde_json::from_str(body)?;
    if let Some(message) = response
        .error
        .and_then(|e| e.message)
        .filter(|m| !m.trim().is_empty())
    {
        return Err(GeminiError::Api(message));
    }

    Ok(extract_text(response.candidates))
}

fn extract_text(candidates: Vec<Candidate>) -> String {
    candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| {
            content
                .parts
                .into_iter()
                .filter_map(|p| p.text)
                .filter(|t| !t.trim().is_empty())
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default()
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    config: GeminiConfig,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());

        Self::with_http_client(client, config)
    }

    pub fn with_http_client(client: Client, config: GeminiConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &GeminiConfig {
        &self.config
    }

    fn generate_url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    pub async fn generate(
        &self,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<String, GeminiError> {
        tokio::select! {
            result = self.send(history) => result,
            _ = cancel.cancelled() => {
                info!("Gemini request cancelled");
                Err(GeminiError::Cancelled)
            }
        }
    }

    async fn send(&self, history: &[ChatMessage]) -> Result<String, GeminiError> {
        let url = self.generate_url();
        let request = build_request(
            history,
            self.config.temperature,
            self.config.max_output_tokens,
        );
        info!(
            "POST {} ({} messages, temperature={}, maxOutputTokens={})",
            url,
            request.contents.len(),
            self.config.temperature,
            self.config.max_output_tokens
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        debug!("Gemini responded with {} ({} bytes)", status, body.len());

        let result = interpret_response(status, &body);
        if let Err(e) = &result {
            warn!("Gemini request failed: {}", e);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: String) -> GeminiConfig {
        GeminiConfig {
            api_key: "test-key".into(),
            model: "gemini-2.0-flash".into(),
            temperature: 0.7,
            max_output_tokens: 2048,
            base_url,
            timeout: Duration::from_secs(5),
        }
    }

    fn local_client(base_url: String) -> GeminiClient {
        let http = Client::builder().no_proxy().build().unwrap();
        GeminiClient::with_http_client(http, config(base_url))
    }

    /// Serves exactly one canned HTTP response and hands back the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: String,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw);
                if let Some(end) = text.find("\r\n\r\n") {
                    let content_length = text[..end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + content_length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&raw).into_owned()
        });
        (format!("http://{}", addr), handle)
    }

    #[test]
    fn loaded_roles_map_onto_wire_roles() {
        let json = r#"[
            {"role":"USER","text":"a","timestamp":"2024-03-01T09:05:00+00:00"},
            {"role":"Assistant","text":"b","timestamp":"2024-03-01T09:05:00+00:00"},
            {"role":"MODEL","text":"c","timestamp":"2024-03-01T09:05:00+00:00"},
            {"role":"system","text":"d","timestamp":"2024-03-01T09:05:00+00:00"},
            {"role":"tool","text":"e","timestamp":"2024-03-01T09:05:00+00:00"}
        ]"#;
        let history: Vec<ChatMessage> = serde_json::from_str(json).unwrap();
        let request = build_request(&history, 0.7, 2048);
        let roles: Vec<_> = request
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();

        assert_eq!(roles, ["user", "model", "model", "user", "user"]);
    }

    #[test]
    fn single_user_message_request() {
        let history = vec![ChatMessage::user("hi")];
        let value = serde_json::to_value(build_request(&history, 0.7, 2048)).unwrap();

        assert_eq!(
            value["contents"],
            json!([{ "role": "user", "parts": [{ "text": "hi" }] }])
        );
        assert_eq!(value["generationConfig"]["temperature"], 0.7);
        assert_eq!(value["generationConfig"]["maxOutputTokens"], 2048);
        assert!(value["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("assistant"));
    }

    #[test]
    fn empty_messages_are_left_out() {
        let history = vec![
            ChatMessage::user("first"),
            ChatMessage::model(""),
            ChatMessage::user("  \n "),
            ChatMessage::model("answer"),
        ];
        let request = build_request(&history, 0.7, 2048);

        let roles: Vec<_> = request
            .contents
            .iter()
            .map(|c| c.role.as_deref().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model"]);
        assert_eq!(request.contents[1].parts[0].text.as_deref(), Some("answer"));
    }

    #[test]
    fn history_order_is_preserved() {
        let history = vec![
            ChatMessage::at(Role::User, "a", chrono::Local::now()),
            ChatMessage::model("b"),
            ChatMessage::user("c"),
        ];
        let texts: Vec<_> = build_request(&history, 0.1, 10)
            .contents
            .into_iter()
            .map(|c| c.parts[0].text.clone().unwrap())
            .collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
    }

    #[test]
    fn error_status_with_message() {
        let body = r#"{"error":{"code":400,"message":"API key not valid","status":"INVALID_ARGUMENT"}}"#;
        let err = interpret_response(StatusCode::BAD_REQUEST, body).unwrap_err();

        assert!(matches!(&err, GeminiError::Api(m) if m == "API key not valid"));
        assert_eq!(err.to_string(), "Gemini API error: API key not valid");
    }

    #[test]
    fn error_status_without_message_reports_status() {
        for body in ["", "<html>oops</html>", r#"{"error":{"message":"  "}}"#] {
            let err = interpret_response(StatusCode::SERVICE_UNAVAILABLE, body).unwrap_err();
            assert!(matches!(err, GeminiError::Status(StatusCode::SERVICE_UNAVAILABLE)));
            assert!(err.to_string().contains("503"));
        }
    }

    #[test]
    fn success_with_error_payload_fails() {
        let err = interpret_response(StatusCode::OK, r#"{"error":{"message":"quota"}}"#).unwrap_err();
        assert!(matches!(err, GeminiError::Api(m) if m == "quota"));
    }

    #[test]
    fn fragments_are_joined_with_newlines() {
        let body = json!({
            "candidates": [
                { "content": { "role": "model", "parts": [{ "text": "one" }, { "text": " " }, { "text": "two" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        })
        .to_string();

        assert_eq!(interpret_response(StatusCode::OK, &body).unwrap(), "one\ntwo");
    }

    #[test]
    fn no_candidates_is_empty_reply() {
        assert_eq!(interpret_response(StatusCode::OK, "{}").unwrap(), "");
        assert_eq!(
            interpret_response(StatusCode::OK, r#"{"candidates":[{}]}"#).unwrap(),
            ""
        );
    }

    #[test]
    fn malformed_success_body_is_decode_error() {
        let err = interpret_response(StatusCode::OK, "not json").unwrap_err();
        assert!(matches!(err, GeminiError::Decode(_)));
    }

    #[test]
    fn rebuild_only_on_meaningful_changes() {
        let base = config("http://x".into());
        let mut same = base.clone();
        same.temperature = 0.705;
        assert!(!base.needs_rebuild(&same));

        let mut warmer = base.clone();
        warmer.temperature = 0.8;
        assert!(base.needs_rebuild(&warmer));

        let mut other_model = base.clone();
        other_model.model = "gemini-1.5-pro".into();
        assert!(base.needs_rebuild(&other_model));

        let mut other_key = base.clone();
        other_key.api_key = "k2".into();
        assert!(base.needs_rebuild(&other_key));
    }

    #[tokio::test]
    async fn posts_to_generate_content_with_key_param() {
        let reply = json!({ "candidates": [{ "content": { "parts": [{ "text": "hello there" }] } }] });
        let (base, server) = serve_once("200 OK", reply.to_string()).await;
        let client = local_client(base);

        let text = client
            .generate(&[ChatMessage::user("hi")], &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(text, "hello there");

        let raw = server.await.unwrap();
        assert!(raw.starts_with(
            "POST /models/gemini-2.0-flash:generateContent?key=test-key HTTP/1.1"
        ));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let sent: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(sent["contents"][0]["parts"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn surfaces_structured_api_errors() {
        let body = json!({ "error": { "message": "Model not found" } }).to_string();
        let (base, _server) = serve_once("404 Not Found", body).await;
        let client = local_client(base);

        let err = client
            .generate(&[ChatMessage::user("hi")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Gemini API error: Model not found");
    }

    #[tokio::test]
    async fn cancelled_before_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let client = local_client(base);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = client
            .generate(&[ChatMessage::user("hi")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, GeminiError::Cancelled));
        drop(listener);
    }
}
