//! OpenAI-compatible chat client.
//!
//! Streams `/chat/completions` over server-sent events. Works with any
//! provider that speaks the same wire format.
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::{ChatModel, ChatRequest, OpenAiClient, RemoteLlmConfig};
//! use futures::StreamExt;
//! use thread_context::ContextMessage;
//!
//! let config = RemoteLlmConfig::from_env("OPENAI_API_KEY", "https://api.openai.com/v1")?;
//! let client = OpenAiClient::new(config)?;
//!
//! let request = ChatRequest::new("gpt-4o", vec![ContextMessage::user("Hello!")]);
//! let mut stream = client.stream_chat(request).await?;
//! while let Some(delta) = stream.next().await {
//!     print!("{}", delta?);
//! }
//! ```

use crate::chat::{ChatModel, ChatRequest, TextStream};
use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use crate::sse::{SseEvent, SseLineBuffer};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thread_context::{ContentPart, ContextMessage, FileData, MessageContent};
use tracing::{debug, warn};

/// OpenAI API client.
#[derive(Clone)]
pub struct OpenAiClient {
    config: RemoteLlmConfig,
    client: Client,
}

impl OpenAiClient {
    /// Create a new client with the given configuration.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        // Connect only; headers and gaps between chunks are timed per stream
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    fn build_body(&self, request: &ChatRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request.model.clone(),
            messages: request.messages.iter().map(convert_message).collect(),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            stream: true,
        }
    }
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ChatModel for OpenAiClient {
    async fn stream_chat(&self, request: ChatRequest) -> Result<TextStream> {
        let url = self.config.endpoint("chat/completions");
        let body = self.build_body(&request);

        let mut req = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body);

        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        debug!(model = %request.model, messages = body.messages.len(), "Starting chat stream");

        let idle = self.config.timeout;
        let response = tokio::time::timeout(idle, req.send())
            .await
            .map_err(|_| LlmError::Timeout(format!("no response within {:?}", idle)))??;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("OpenAI", status, error_text));
        }

        let mut bytes = response.bytes_stream();
        let stream = async_stream::try_stream! {
            let mut buffer = SseLineBuffer::new();
            let mut done = false;

            loop {
                let next = tokio::time::timeout(idle, bytes.next())
                    .await
                    .map_err(|_| LlmError::Timeout(format!("stream idle for {:?}", idle)))?;
                let Some(chunk) = next else { break };
                let chunk = chunk.map_err(|e| LlmError::StreamError(e.to_string()))?;
                for event in buffer.feed(&chunk) {
                    match event {
                        SseEvent::Done => done = true,
                        SseEvent::Data(data) => {
                            if let Some(delta) = parse_delta(&data)? {
                                yield delta;
                            }
                        }
                    }
                }
                if done {
                    break;
                }
            }

            if !done {
                match buffer.finish() {
                    Some(SseEvent::Data(data)) => {
                        if let Some(delta) = parse_delta(&data)? {
                            yield delta;
                        }
                    }
                    Some(SseEvent::Done) => {}
                    None => warn!("Chat stream closed without [DONE]"),
                }
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Text delta of one streamed chunk; provider errors inside the stream are
/// surfaced as errors.
fn parse_delta(data: &str) -> Result<Option<String>> {
    let chunk: OpenAiStreamChunk = serde_json::from_str(data)
        .map_err(|e| LlmError::InvalidResponse(format!("Failed to parse stream chunk: {}", e)))?;

    if let Some(error) = chunk.error {
        return Err(LlmError::ProviderError(error.message));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta)
        .and_then(|delta| delta.content)
        .filter(|content| !content.is_empty()))
}

fn convert_message(message: &ContextMessage) -> OpenAiMessage {
    let content = match &message.content {
        MessageContent::Text(text) => OpenAiContent::Text(text.clone()),
        MessageContent::Parts(parts) => OpenAiContent::Parts(parts.iter().map(convert_part).collect()),
    };

    OpenAiMessage {
        role: message.role.as_str().to_string(),
        content,
    }
}

fn convert_part(part: &ContentPart) -> OpenAiPart {
    match part {
        ContentPart::Text { text } => OpenAiPart::Text { text: text.clone() },
        ContentPart::File { name, mime_type, data } => {
            let is_image = mime_type.starts_with("image/");
            match data {
                FileData::Url(url) if is_image => OpenAiPart::ImageUrl {
                    image_url: ImageUrl { url: url.clone() },
                },
                FileData::Url(url) => OpenAiPart::Text {
                    text: format!("[Attachment: {} ({})]", name, url),
                },
                FileData::Bytes(bytes) if is_image => OpenAiPart::ImageUrl {
                    image_url: ImageUrl {
                        url: data_url(mime_type, bytes),
                    },
                },
                FileData::Bytes(bytes) if is_textual(mime_type) => OpenAiPart::Text {
                    text: format!("{}:\n{}", name, String::from_utf8_lossy(bytes)),
                },
                FileData::Bytes(bytes) => OpenAiPart::File {
                    file: InlineFile {
                        filename: name.clone(),
                        file_data: data_url(mime_type, bytes),
                    },
                },
            }
        }
    }
}

fn is_textual(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || matches!(mime_type, "application/json" | "application/xml" | "application/x-yaml")
}

fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime_type, STANDARD.encode(bytes))
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage {
    role: String,
    content: OpenAiContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum OpenAiContent {
    Text(String),
    Parts(Vec<OpenAiPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OpenAiPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    File { file: InlineFile },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Serialize)]
struct InlineFile {
    filename: String,
    file_data: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChunk {
    #[serde(default)]
    choices: Vec<OpenAiStreamChoice>,
    #[serde(default)]
    error: Option<OpenAiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct OpenAiStreamChoice {
    delta: Option<OpenAiDelta>,
}

#[derive(Debug, Deserialize)]
struct OpenAiDelta {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiErrorBody {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::collect_text;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sse_body(deltas: &[&str]) -> String {
        let mut body = String::new();
        for delta in deltas {
            let chunk = json!({"choices": [{"index": 0, "delta": {"content": delta}}]});
            body.push_str(&format!("data: {}\n\n", chunk));
        }
        body.push_str("data: [DONE]\n\n");
        body
    }

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new(RemoteLlmConfig::new("test-key", format!("{}/v1", server.uri()))).unwrap()
    }

    #[test]
    fn test_message_conversion() {
        let wire = serde_json::to_value(convert_message(&ContextMessage::system("Be brief"))).unwrap();
        assert_eq!(wire, json!({"role": "system", "content": "Be brief"}));
    }

    #[test]
    fn test_file_part_conversion() {
        let message = ContextMessage::user(vec![
            ContentPart::text("see"),
            ContentPart::File {
                name: "cat.png".to_string(),
                mime_type: "image/png".to_string(),
                data: FileData::Url("https://cdn/cat.png".to_string()),
            },
            ContentPart::File {
                name: "notes.txt".to_string(),
                mime_type: "text/plain".to_string(),
                data: FileData::Bytes(b"hi".to_vec()),
            },
            ContentPart::File {
                name: "doc.pdf".to_string(),
                mime_type: "application/pdf".to_string(),
                data: FileData::Bytes(vec![1, 2, 3]),
            },
        ]);

        let wire = serde_json::to_value(convert_message(&message)).unwrap();
        let parts = wire["content"].as_array().unwrap();
        assert_eq!(parts[0], json!({"type": "text", "text": "see"}));
        assert_eq!(parts[1], json!({"type": "image_url", "image_url": {"url": "https://cdn/cat.png"}}));
        assert_eq!(parts[2], json!({"type": "text", "text": "notes.txt:\nhi"}));
        assert_eq!(parts[3]["type"], "file");
        assert_eq!(parts[3]["file"]["file_data"], "data:application/pdf;base64,AQID");
    }

    #[test]
    fn test_parse_delta() {
        assert_eq!(
            parse_delta(r#"{"choices":[{"delta":{"content":"Hi"}}]}"#).unwrap(),
            Some("Hi".to_string())
        );
        assert_eq!(parse_delta(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#).unwrap(), None);
        assert!(matches!(
            parse_delta(r#"{"error":{"message":"overloaded"}}"#),
            Err(LlmError::ProviderError(msg)) if msg == "overloaded"
        ));
        assert!(matches!(parse_delta("not json"), Err(LlmError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_stream_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(header("Authorization", "Bearer test-key"))
            .and(body_partial_json(json!({"model": "gpt-4o", "stream": true})))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse_body(&["Hello", ", ", "world", "!"])),
            )
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-4o", vec![ContextMessage::user("Hi")]);
        let stream = client(&server).stream_chat(request).await.unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "Hello, world!");
    }

    #[tokio::test]
    async fn test_complete_uses_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_partial_json(json!({"temperature": 0.5, "max_tokens": 15})))
            .respond_with(ResponseTemplate::new(200).set_body_string(sse_body(&["Rust", " Tips"])))
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-3.5-turbo", vec![ContextMessage::user("title?")])
            .with_temperature(0.5)
            .with_max_tokens(15);
        assert_eq!(client(&server).complete(request).await.unwrap(), "Rust Tips");
    }

    /// Serves one request, writing `chunks` with `gap` before each
    async fn trickle_server(chunks: Vec<String>, gap: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();
            for chunk in chunks {
                tokio::time::sleep(gap).await;
                if socket.write_all(chunk.as_bytes()).await.is_err() {
                    return;
                }
                let _ = socket.flush().await;
            }
        });

        format!("http://{}/v1", addr)
    }

    async fn read_request(socket: &mut TcpStream) {
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = socket.read(&mut buf).await.unwrap();
            if n == 0 {
                return;
            }
            received.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&received).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    fn chunk_events(deltas: &[&str]) -> Vec<String> {
        let mut events: Vec<String> = deltas
            .iter()
            .map(|delta| format!("data: {}\n\n", json!({"choices": [{"delta": {"content": delta}}]})))
            .collect();
        events.push("data: [DONE]\n\n".to_string());
        events
    }

    #[tokio::test]
    async fn test_long_stream_outlives_timeout() {
        // Five gaps of 150ms: the whole stream takes longer than the timeout
        let url = trickle_server(chunk_events(&["one ", "two ", "three ", "four"]), Duration::from_millis(150)).await;
        let client = OpenAiClient::new(RemoteLlmConfig::new("k", url).with_timeout(Duration::from_millis(400))).unwrap();

        let request = ChatRequest::new("gpt-4o", vec![ContextMessage::user("Hi")]);
        let stream = client.stream_chat(request).await.unwrap();
        assert_eq!(collect_text(stream).await.unwrap(), "one two three four");
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let url = trickle_server(chunk_events(&["never"]), Duration::from_millis(800)).await;
        let client = OpenAiClient::new(RemoteLlmConfig::new("k", url).with_timeout(Duration::from_millis(200))).unwrap();

        let request = ChatRequest::new("gpt-4o", vec![ContextMessage::user("Hi")]);
        let mut stream = client.stream_chat(request).await.unwrap();
        let first = stream.next().await.unwrap();
        assert!(matches!(first, Err(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_slow_headers_time_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(sse_body(&["late"]))
                    .set_delay(Duration::from_millis(800)),
            )
            .mount(&server)
            .await;

        let config = RemoteLlmConfig::new("k", format!("{}/v1", server.uri())).with_timeout(Duration::from_millis(200));
        let request = ChatRequest::new("gpt-4o", vec![ContextMessage::user("Hi")]);
        let result = OpenAiClient::new(config).unwrap().stream_chat(request).await;
        assert!(matches!(result, Err(LlmError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_auth_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .mount(&server)
            .await;

        let request = ChatRequest::new("gpt-4o", vec![ContextMessage::user("Hi")]);
        let result = client(&server).stream_chat(request).await;
        assert!(matches!(result, Err(LlmError::AuthenticationError(_))));
    }
}
