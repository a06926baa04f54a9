//! HTTP attachment resolver.
//!
//! Media the model provider can fetch itself (image, audio, video) is passed
//! as a URL reference. Everything else is downloaded so its contents can be
//! inlined into the request.

use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thread_context::{Attachment, ContextError, FileData, FileResolver};
use tracing::debug;

const REFERENCE_TYPES: &[&str] = &["image", "audio", "video"];

/// Downloads non-media attachments over HTTP
#[derive(Debug, Clone)]
pub struct HttpFileResolver {
    client: Client,
}

impl HttpFileResolver {
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Whether the attachment is sent by reference
    pub fn by_reference(attachment: &Attachment) -> bool {
        REFERENCE_TYPES.contains(&attachment.primary_type().as_str())
    }

    async fn download(&self, url: &str) -> crate::Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            return Err(LlmError::from_status("File", status, url.to_string()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl FileResolver for HttpFileResolver {
    async fn resolve(&self, attachment: &Attachment) -> thread_context::Result<FileData> {
        if Self::by_reference(attachment) {
            return Ok(FileData::Url(attachment.url.clone()));
        }

        let bytes = self
            .download(&attachment.url)
            .await
            .map_err(|e| ContextError::FileResolution(format!("{}: {}", attachment.file_name, e)))?;

        debug!(file = %attachment.file_name, bytes = bytes.len(), "Downloaded attachment");
        Ok(FileData::Bytes(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver() -> HttpFileResolver {
        HttpFileResolver::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_media_passed_by_reference() {
        let attachment = Attachment::new("clip.mp4", 10, "video/mp4", "https://cdn/clip.mp4");
        assert_eq!(
            resolver().resolve(&attachment).await.unwrap(),
            FileData::Url("https://cdn/clip.mp4".to_string())
        );
    }

    #[tokio::test]
    async fn test_documents_downloaded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/notes.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"remember the milk".to_vec()))
            .mount(&server)
            .await;

        let attachment = Attachment::new(
            "notes.txt",
            17,
            "text/plain",
            format!("{}/notes.txt", server.uri()),
        );
        assert_eq!(
            resolver().resolve(&attachment).await.unwrap(),
            FileData::Bytes(b"remember the milk".to_vec())
        );
    }

    #[tokio::test]
    async fn test_download_failure_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let attachment = Attachment::new(
            "gone.pdf",
            1,
            "application/pdf",
            format!("{}/gone.pdf", server.uri()),
        );
        assert!(matches!(
            resolver().resolve(&attachment).await,
            Err(ContextError::FileResolution(_))
        ));
    }
}
