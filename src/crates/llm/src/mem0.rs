//! Mem0 memory service client.
//!
//! Implements [`MemoryStore`] over the Mem0 REST API: exchanges are posted for
//! fact extraction, facts are recalled by semantic search, and a user's
//! memories can be wiped.

use crate::config::MemoryClientConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thread_context::{ContextError, MemoryFact, MemoryStore, TurnExchange};
use tracing::debug;

/// Mem0 REST client
#[derive(Clone)]
pub struct Mem0Client {
    config: MemoryClientConfig,
    client: Client,
}

impl Mem0Client {
    pub fn new(config: MemoryClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn auth(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("Authorization", format!("Token {}", self.config.api_key))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(LlmError::from_status("Mem0", status, body))
    }

    pub async fn search_facts(&self, query: &str, user_id: &str) -> Result<Vec<MemoryFact>> {
        let body = SearchRequest { query, user_id };
        let response = self
            .auth(self.client.post(self.config.endpoint("v1/memories/search/")))
            .json(&body)
            .send()
            .await?;

        let results: SearchResponse = Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        let facts: Vec<MemoryFact> = results
            .into_items()
            .into_iter()
            .map(|item| MemoryFact {
                id: item.id,
                text: item.memory,
                score: item.score,
            })
            .collect();

        debug!(user_id = %user_id, count = facts.len(), "Mem0 search complete");
        Ok(facts)
    }

    pub async fn add_exchange(&self, exchange: &TurnExchange, user_id: &str) -> Result<()> {
        let body = AddRequest {
            messages: vec![
                WireMessage {
                    role: "user",
                    content: &exchange.prompt,
                },
                WireMessage {
                    role: "assistant",
                    content: &exchange.response,
                },
            ],
            user_id,
        };

        let response = self
            .auth(self.client.post(self.config.endpoint("v1/memories/")))
            .json(&body)
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<()> {
        let response = self
            .auth(self.client.delete(self.config.endpoint("v1/memories/")))
            .query(&[("user_id", user_id)])
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

impl std::fmt::Debug for Mem0Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mem0Client")
            .field("base_url", &self.config.base_url)
            .finish_non_exhaustive()
    }
}

fn memory_error(e: LlmError) -> ContextError {
    ContextError::Memory(e.to_string())
}

#[async_trait]
impl MemoryStore for Mem0Client {
    async fn search(&self, query: &str, user_id: &str) -> thread_context::Result<Vec<MemoryFact>> {
        self.search_facts(query, user_id).await.map_err(memory_error)
    }

    async fn add(&self, exchange: &TurnExchange, user_id: &str) -> thread_context::Result<()> {
        self.add_exchange(exchange, user_id).await.map_err(memory_error)
    }

    async fn delete_all(&self, user_id: &str) -> thread_context::Result<()> {
        self.delete_user(user_id).await.map_err(memory_error)
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    query: &'a str,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct AddRequest<'a> {
    messages: Vec<WireMessage<'a>>,
    user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

/// Search results come back either bare or wrapped, depending on API version
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SearchResponse {
    List(Vec<MemoryItem>),
    Wrapped { results: Vec<MemoryItem> },
}

impl SearchResponse {
    fn into_items(self) -> Vec<MemoryItem> {
        match self {
            Self::List(items) | Self::Wrapped { results: items } => items,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MemoryItem {
    #[serde(default)]
    id: Option<String>,
    memory: String,
    #[serde(default)]
    score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> Mem0Client {
        Mem0Client::new(MemoryClientConfig::new("m0-key", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn test_search_parses_both_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/search/"))
            .and(header("Authorization", "Token m0-key"))
            .and(body_json(json!({"query": "where do I live", "user_id": "u1"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": "m1", "memory": "Lives in Lisbon", "score": 0.91}
            ])))
            .mount(&server)
            .await;

        let facts = client(&server).search("where do I live", "u1").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].text, "Lives in Lisbon");
        assert_eq!(facts[0].id.as_deref(), Some("m1"));

        let wrapped: SearchResponse =
            serde_json::from_value(json!({"results": [{"memory": "Likes tea"}]})).unwrap();
        assert_eq!(wrapped.into_items()[0].memory, "Likes tea");
    }

    #[tokio::test]
    async fn test_add_posts_exchange() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/"))
            .and(body_json(json!({
                "messages": [
                    {"role": "user", "content": "I moved to Porto"},
                    {"role": "assistant", "content": "Noted!"}
                ],
                "user_id": "u1"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .add(&TurnExchange::new("I moved to Porto", "Noted!"), "u1")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_delete_all_and_errors() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/memories/"))
            .and(query_param("user_id", "u1"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/memories/search/"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .mount(&server)
            .await;

        let mem0 = client(&server);
        mem0.delete_all("u1").await.unwrap();
        assert!(matches!(
            mem0.search("q", "u1").await,
            Err(ContextError::Memory(msg)) if msg.contains("down")
        ));
    }
}
