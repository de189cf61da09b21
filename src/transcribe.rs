//! Transcription collaborator.
//!
//! The session hands over one complete utterance at a time and gets back
//! text. The default implementation posts a WAV-encoded multipart form to an
//! OpenAI-compatible `audio/transcriptions` endpoint.

use async_trait::async_trait;
use reqwest::multipart;
use secrecy::{ExposeSecret, SecretBox};
use std::io::Cursor;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscribeError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response parsing error: {0}")]
    ParseError(String),
    #[error("WAV encoding error: {0}")]
    Encode(#[from] hound::Error),
}

/// Converts one utterance into text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn submit(&self, samples: &[i16], sample_rate: u32) -> Result<String, TranscribeError>;
}

#[derive(Debug, Clone)]
pub struct TranscriberConfig {
    pub url: String,
    pub model: String,
    /// ISO language hint, or `None` to let the model detect it.
    pub language: Option<String>,
    pub request_timeout: Duration,
}

impl Default for TranscriberConfig {
    fn default() -> Self {
        Self {
            url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            model: "whisper-1".to_string(),
            language: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

pub struct HttpTranscriber {
    client: reqwest::Client,
    api_key: SecretBox<String>,
    config: TranscriberConfig,
}

impl HttpTranscriber {
    pub fn new(api_key: SecretBox<String>) -> Self {
        Self::with_config(api_key, TranscriberConfig::default())
    }

    pub fn with_config(api_key: SecretBox<String>, config: TranscriberConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            config,
        }
    }

    /// Wrap raw samples in a mono 16-bit WAV container.
    fn wav_bytes(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>, hound::Error> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        let mut writer = hound::WavWriter::new(&mut cursor, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(cursor.into_inner())
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    async fn submit(&self, samples: &[i16], sample_rate: u32) -> Result<String, TranscribeError> {
        let wav = Self::wav_bytes(samples, sample_rate)?;
        log::debug!(
            "🎤 Submitting {} samples ({} WAV bytes) for transcription",
            samples.len(),
            wav.len()
        );

        let file = multipart::Part::bytes(wav)
            .file_name("utterance.wav")
            .mime_str("audio/wav")?;
        let mut form = multipart::Form::new()
            .part("file", file)
            .text("model", self.config.model.clone());
        if let Some(language) = &self.config.language {
            form = form.text("language", language.clone());
        }

        let response = self
            .client
            .post(&self.config.url)
            .header(
                "Authorization",
                format!("Bearer {}", self.api_key.expose_secret()),
            )
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(TranscribeError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let json: serde_json::Value = response.json().await?;
        json["text"]
            .as_str()
            .map(|s| s.trim().to_string())
            .ok_or_else(|| TranscribeError::ParseError("Missing 'text' field".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wav_container_shape() {
        let samples: Vec<i16> = vec![0, 100, -100, i16::MAX, i16::MIN];
        let bytes = HttpTranscriber::wav_bytes(&samples, 16_000).unwrap();

        let reader = hound::WavReader::new(Cursor::new(bytes)).unwrap();
        let spec = reader.spec();
        assert_eq!(spec.channels, 1);
        assert_eq!(spec.sample_rate, 16_000);
        assert_eq!(spec.bits_per_sample, 16);
        assert_eq!(reader.len(), samples.len() as u32);
    }

    #[test]
    fn test_config_defaults() {
        let config = TranscriberConfig::default();
        assert_eq!(config.model, "whisper-1");
        assert!(config.language.is_none());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }
}
