pub mod ocr;
pub mod embedding;

pub use ocr::{HttpOcrClient, OcrOutcome, OcrProvider, UnavailableOcr};
pub use embedding::{EmbeddingOutcome, EmbeddingProvider, HttpEmbeddingClient, UnavailableEmbedding};

use crate::error::GroupingError;
use std::time::Duration;

/// Shared reqwest client for collaborator calls
pub(crate) fn build_client(connect_timeout: Duration, timeout: Duration) -> Result<reqwest::Client, GroupingError> {
    reqwest::Client::builder()
        .connect_timeout(connect_timeout)
        .timeout(timeout)
        .build()
        .map_err(GroupingError::Network)
}

pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_join() {
        assert_eq!(endpoint("http://ocr:6000/", "/ocr"), "http://ocr:6000/ocr");
        assert_eq!(endpoint("http://ocr:6000", "ocr"), "http://ocr:6000/ocr");
    }
}
