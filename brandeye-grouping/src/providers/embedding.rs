//! Feature-extraction collaborator

use super::{build_client, endpoint};
use crate::error::GroupingError;
use async_trait::async_trait;
use brandeye_core::protocol::{encode_image, EmbedRequest, EmbedResponse};
use brandeye_core::EmbeddingVector;
use std::time::Duration;
use tracing::{debug, warn};

/// Embeddings for a batch of crops and where they came from.
#[derive(Debug, Clone, PartialEq)]
pub enum EmbeddingOutcome {
    /// Produced by the feature-extraction collaborator
    Present(Vec<EmbeddingVector>),
    /// Produced locally after the collaborator result was rejected
    Degraded { vectors: Vec<EmbeddingVector>, reason: String },
    /// Nothing usable
    Absent { reason: String },
}

impl EmbeddingOutcome {
    pub fn absent(reason: impl Into<String>) -> Self {
        EmbeddingOutcome::Absent { reason: reason.into() }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Embed every crop, in order. Never fails: problems become `Absent`.
    async fn embed(&self, crops: &[Vec<u8>]) -> EmbeddingOutcome;
}

/// Placeholder used when no feature-extraction endpoint is configured
pub struct UnavailableEmbedding;

#[async_trait]
impl EmbeddingProvider for UnavailableEmbedding {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn embed(&self, _crops: &[Vec<u8>]) -> EmbeddingOutcome {
        EmbeddingOutcome::absent("embedding service not configured")
    }
}

/// `POST {base}/embed` client
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    url: String,
}

impl HttpEmbeddingClient {
    pub fn new(base_url: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self, GroupingError> {
        Ok(Self {
            client: build_client(connect_timeout, timeout)?,
            url: endpoint(base_url, "embed"),
        })
    }

    async fn call(&self, crops: &[Vec<u8>]) -> Result<Vec<EmbeddingVector>, GroupingError> {
        let request = EmbedRequest {
            images: crops.iter().map(|c| encode_image(c)).collect(),
        };
        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GroupingError::Collaborator(format!(
                "embedding service returned HTTP {}",
                status
            )));
        }

        let body: EmbedResponse = response.json().await?;
        if !body.success {
            return Err(GroupingError::Collaborator(
                body.error.unwrap_or_else(|| "embedding service reported failure".to_string()),
            ));
        }
        Ok(body.embeddings.into_iter().map(EmbeddingVector::from).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn embed(&self, crops: &[Vec<u8>]) -> EmbeddingOutcome {
        if crops.is_empty() {
            return EmbeddingOutcome::Present(Vec::new());
        }
        match self.call(crops).await {
            Ok(vectors) => {
                debug!("Embedding service returned {} vectors", vectors.len());
                EmbeddingOutcome::Present(vectors)
            }
            Err(e) => {
                warn!("Embedding call failed: {}", e);
                EmbeddingOutcome::absent(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_embedding_client_returns_vectors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embed")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success": true, "embeddings": [[0.1, 0.2], [0.3, 0.4]]}"#)
            .create_async()
            .await;

        let client = HttpEmbeddingClient::new(&server.url(), Duration::from_secs(1), Duration::from_secs(2)).unwrap();
        let outcome = client.embed(&[b"a".to_vec(), b"b".to_vec()]).await;
        mock.assert_async().await;

        match outcome {
            EmbeddingOutcome::Present(vectors) => {
                assert_eq!(vectors.len(), 2);
                assert_eq!(vectors[1].values(), &[0.3, 0.4]);
            }
            other => panic!("Expected Present, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_http_embedding_client_unreachable_is_absent() {
        // Nothing listens on port 9 on a test host
        let client = HttpEmbeddingClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
        .unwrap();
        assert!(matches!(
            client.embed(&[b"a".to_vec()]).await,
            EmbeddingOutcome::Absent { .. }
        ));
    }

    #[tokio::test]
    async fn test_empty_batch_skips_call() {
        let client = HttpEmbeddingClient::new(
            "http://127.0.0.1:9",
            Duration::from_millis(200),
            Duration::from_millis(500),
        )
        .unwrap();
        assert_eq!(client.embed(&[]).await, EmbeddingOutcome::Present(Vec::new()));
    }

    #[tokio::test]
    async fn test_unavailable_embedding_is_absent() {
        assert!(matches!(
            UnavailableEmbedding.embed(&[b"a".to_vec()]).await,
            EmbeddingOutcome::Absent { .. }
        ));
    }
}
