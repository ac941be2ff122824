//! Speech-to-text client

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

use super::llm::map_request_error;
use super::{BackendError, SpeechPipeline};

#[derive(Deserialize)]
struct SttResponse {
    text: String,
}

/// Uploads a recorded clip as a multipart form and reads back `{"text": ...}`
#[derive(Debug, Clone)]
pub struct SttClient {
    http: reqwest::Client,
    url: String,
    language: String,
    timeout: Duration,
}

impl SttClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            url: url.into(),
            language: "en".to_string(),
            timeout,
        })
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }
}

#[async_trait]
impl SpeechPipeline for SttClient {
    async fn transcribe(&self, clip: &[u8]) -> Result<String, BackendError> {
        let audio = Part::bytes(clip.to_vec())
            .file_name("clip.wav")
            .mime_str("audio/wav")
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        let form = Form::new()
            .part("audio", audio)
            .text("language", self.language.clone());

        let resp = self
            .http
            .post(&self.url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(format!("status {status}: {text}")));
        }

        let parsed: SttResponse = resp
            .json()
            .await
            .map_err(|e| map_request_error(e, self.timeout))?;

        debug!(chars = parsed.text.len(), "transcription received");
        Ok(parsed.text.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_shape() {
        let parsed: SttResponse = serde_json::from_str(r#"{"text":" hey genie "}"#).unwrap();
        assert_eq!(parsed.text, " hey genie ");
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_unavailable() {
        let client = SttClient::new("http://127.0.0.1:9/stt", Duration::from_secs(2))
            .unwrap()
            .with_language("en");
        let err = client.transcribe(b"RIFF").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Unavailable(_) | BackendError::Timeout(_)
        ));
    }
}
