//! OCR collaborator

use super::{build_client, endpoint};
use crate::error::GroupingError;
use async_trait::async_trait;
use brandeye_core::protocol::{encode_image, OcrRequest, OcrResponse};
use brandeye_core::OcrToken;
use std::time::Duration;
use tracing::{debug, warn};

/// What the OCR collaborator produced for one crop.
#[derive(Debug, Clone, PartialEq)]
pub enum OcrOutcome {
    /// Every returned token was well formed
    Present(Vec<OcrToken>),
    /// The collaborator answered but some tokens were unusable and dropped
    Degraded { tokens: Vec<OcrToken>, reason: String },
    /// No text available: unconfigured, failed, timed out or pool exhausted
    Absent { reason: String },
}

impl OcrOutcome {
    pub fn absent(reason: impl Into<String>) -> Self {
        OcrOutcome::Absent { reason: reason.into() }
    }

    /// Sort raw tokens into Present or Degraded.
    pub fn from_tokens(tokens: Vec<OcrToken>) -> Self {
        let total = tokens.len();
        let usable: Vec<OcrToken> = tokens
            .into_iter()
            .filter(|t| t.confidence.is_finite() && !t.text.trim().is_empty())
            .collect();
        if usable.len() == total {
            OcrOutcome::Present(usable)
        } else {
            let reason = format!("dropped {} of {} tokens", total - usable.len(), total);
            OcrOutcome::Degraded { tokens: usable, reason }
        }
    }
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn is_available(&self) -> bool;

    /// Recognize text in one encoded crop. Never fails: problems become `Absent`.
    async fn recognize(&self, crop: &[u8]) -> OcrOutcome;
}

/// Placeholder used when no OCR endpoint is configured
pub struct UnavailableOcr;

#[async_trait]
impl OcrProvider for UnavailableOcr {
    fn name(&self) -> &'static str {
        "none"
    }

    fn is_available(&self) -> bool {
        false
    }

    async fn recognize(&self, _crop: &[u8]) -> OcrOutcome {
        OcrOutcome::absent("ocr not configured")
    }
}

/// `POST {base}/ocr` client
pub struct HttpOcrClient {
    client: reqwest::Client,
    url: String,
}

impl HttpOcrClient {
    pub fn new(base_url: &str, connect_timeout: Duration, timeout: Duration) -> Result<Self, GroupingError> {
        Ok(Self {
            client: build_client(connect_timeout, timeout)?,
            url: endpoint(base_url, "ocr"),
        })
    }

    async fn call(&self, crop: &[u8]) -> Result<Vec<OcrToken>, GroupingError> {
        let request = OcrRequest { image: encode_image(crop) };
        let response = self.client.post(&self.url).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GroupingError::Collaborator(format!("ocr returned HTTP {}", status)));
        }

        let body: OcrResponse = response.json().await?;
        if !body.success {
            return Err(GroupingError::Collaborator(
                body.error.unwrap_or_else(|| "ocr reported failure".to_string()),
            ));
        }
        Ok(body.tokens)
    }
}

#[async_trait]
impl OcrProvider for HttpOcrClient {
    fn name(&self) -> &'static str {
        "http"
    }

    fn is_available(&self) -> bool {
        true
    }

    async fn recognize(&self, crop: &[u8]) -> OcrOutcome {
        match self.call(crop).await {
            Ok(tokens) => {
                debug!("OCR returned {} tokens", tokens.len());
                OcrOutcome::from_tokens(tokens)
            }
            Err(e) => {
                warn!("OCR call failed, treating crop as unreadable: {}", e);
                OcrOutcome::absent(e.to_string())
            }
        }
    }
}
