//! Speech-to-text for audio found in attachments.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use crate::configuration::TranscriptionSettings;

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe an MP3 clip
    async fn transcribe(&self, mp3: Vec<u8>) -> Result<String>;
}

#[derive(Deserialize)]
struct TranscriptionReply {
    text: String,
}

/// The `audio/transcriptions` endpoint of OpenAI, or of an Azure deployment
pub struct WhisperTranscriber {
    client: Client,
    settings: TranscriptionSettings,
}

impl WhisperTranscriber {
    pub fn new(settings: TranscriptionSettings) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()?;
        Ok(Self { client, settings })
    }

    fn url(&self) -> String {
        let host = self.settings.host.trim_end_matches('/');
        match &self.settings.api_version {
            Some(version) => format!(
                "{}/openai/deployments/{}/audio/transcriptions?api-version={}",
                host, self.settings.model, version
            ),
            None => format!("{}/v1/audio/transcriptions", host),
        }
    }
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    async fn transcribe(&self, mp3: Vec<u8>) -> Result<String> {
        let file = Part::bytes(mp3)
            .file_name("audio.mp3")
            .mime_str("audio/mpeg")?;
        let form = Form::new()
            .text("model", self.settings.model.clone())
            .part("file", file);

        let request = self.client.post(self.url()).multipart(form);
        let request = if self.settings.api_version.is_some() {
            request.header("api-key", &self.settings.api_key)
        } else {
            request.header("Authorization", format!("Bearer {}", self.settings.api_key))
        };

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("transcription failed: {} - {}", status, body));
        }
        let reply: TranscriptionReply = response.json().await?;
        debug!(chars = reply.text.chars().count(), "audio transcribed");
        Ok(reply.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings(host: String, api_version: Option<&str>) -> TranscriptionSettings {
        TranscriptionSettings {
            host,
            api_key: "whisper-key".to_string(),
            model: "whisper-1".to_string(),
            api_version: api_version.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_openai_transcription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/audio/transcriptions"))
            .and(header("Authorization", "Bearer whisper-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"text": "dos más dos"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let transcriber = WhisperTranscriber::new(settings(server.uri(), None)).unwrap();
        let text = transcriber.transcribe(b"ID3".to_vec()).await.unwrap();
        assert_eq!(text, "dos más dos");
    }

    #[tokio::test]
    async fn test_azure_transcription() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/openai/deployments/whisper-1/audio/transcriptions"))
            .and(query_param("api-version", "2024-06-01"))
            .and(header("api-key", "whisper-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hola"})))
            .expect(1)
            .mount(&server)
            .await;

        let transcriber =
            WhisperTranscriber::new(settings(server.uri(), Some("2024-06-01"))).unwrap();
        assert_eq!(transcriber.transcribe(Vec::new()).await.unwrap(), "hola");
    }

    #[tokio::test]
    async fn test_failed_transcription_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad audio"))
            .mount(&server)
            .await;

        let transcriber = WhisperTranscriber::new(settings(server.uri(), None)).unwrap();
        let err = transcriber.transcribe(Vec::new()).await.unwrap_err();
        assert!(err.to_string().contains("bad audio"));
    }
}
