use secrecy::{ExposeSecret, SecretBox};
use std::env;
use std::time::Duration;
use thiserror::Error;

use crate::error::DockError;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid API key format for {service}: {reason}")]
    InvalidKeyFormat { service: String, reason: String },
    #[error("Environment error: {0}")]
    EnvError(#[from] env::VarError),
}

/// Timing policy for connection establishment and liveness supervision.
///
/// The defaults are tuned for the shipped firmware; none of them is a
/// firmware contract, so deployments with slower boot or busier firmware
/// can widen the windows without touching session code.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Pause after the port opens before the first heartbeat, giving the
    /// firmware time to finish its own boot chatter.
    pub init_grace: Duration,
    /// How long the first heartbeat may go unacknowledged while connecting.
    pub first_ack_window: Duration,
    /// Upper bound on the whole Connecting phase.
    pub establish_timeout: Duration,
    /// Cadence of liveness probes while connected.
    pub heartbeat_interval: Duration,
    /// Cadence of the independent ack-age check while connected.
    pub health_check_interval: Duration,
    /// Ack age that logs a warning but changes nothing.
    pub soft_ack_threshold: Duration,
    /// Ack age that declares the peripheral dead.
    pub hard_ack_threshold: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            init_grace: Duration::from_secs(1),
            first_ack_window: Duration::from_secs(3),
            establish_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(1),
            health_check_interval: Duration::from_secs(5),
            soft_ack_threshold: Duration::from_secs(5),
            hard_ack_threshold: Duration::from_secs(10),
        }
    }
}

/// Policy for the audio capture pipeline.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Sample rate the peripheral streams at.
    pub sample_rate: u32,
    /// Utterances shorter than this many samples are discarded as too short
    /// to be meaningful speech (10000 at 16 kHz is 625 ms).
    pub min_utterance_samples: usize,
    /// Confirmation tone played back after a capture completes.
    pub ack_tone_frequency: u32,
    pub ack_tone_duration_ms: u32,
    /// Delay before the confirmation tone so it doesn't collide with the
    /// peripheral's own end-of-capture handling.
    pub ack_tone_delay: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            min_utterance_samples: 10_000,
            ack_tone_frequency: 880,
            ack_tone_duration_ms: 120,
            ack_tone_delay: Duration::from_millis(200),
        }
    }
}

/// Everything the session needs beyond the port path.
#[derive(Debug, Clone, Default)]
pub struct DockConfig {
    pub timing: SessionTiming,
    pub capture: CaptureConfig,
}

/// Configuration for the speech and chat API services.
#[derive(Debug)]
pub struct ApiConfig {
    pub transcribe_key: SecretBox<String>,
    pub transcribe_url: String,
    pub transcribe_model: String,
    pub chat_key: SecretBox<String>,
    pub chat_url: String,
    pub chat_model: String,
}

impl ApiConfig {
    /// Load API configuration from environment variables
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if it exists (for development)
        dotenvy::dotenv().ok(); // Don't error if .env doesn't exist

        let transcribe_key = Self::load_api_key("TRANSCRIBE_API_KEY", "transcription")?;
        let chat_key = Self::load_api_key("CHAT_API_KEY", "chat")?;

        Ok(Self {
            transcribe_key,
            transcribe_url: env_or(
                "TRANSCRIBE_URL",
                "https://api.openai.com/v1/audio/transcriptions",
            ),
            transcribe_model: env_or("TRANSCRIBE_MODEL", "whisper-1"),
            chat_key,
            chat_url: env_or("CHAT_URL", "https://api.openai.com/v1/chat/completions"),
            chat_model: env_or("CHAT_MODEL", "gpt-4o-mini"),
        })
    }

    /// Load and validate a single API key from environment
    fn load_api_key(env_var: &str, service_name: &str) -> Result<SecretBox<String>, ConfigError> {
        let key = env::var(env_var).map_err(|_| ConfigError::MissingEnvVar(env_var.to_string()))?;

        Self::validate_key_format(&key, service_name)?;

        Ok(SecretBox::new(Box::new(key)))
    }

    /// Basic sanity checks. Endpoints are user-configurable, so there is no
    /// provider-specific prefix to enforce.
    fn validate_key_format(key: &str, service: &str) -> Result<(), ConfigError> {
        if key.trim().is_empty() {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: "API key cannot be empty".to_string(),
            });
        }
        if key.len() < 8 {
            return Err(ConfigError::InvalidKeyFormat {
                service: service.to_string(),
                reason: "API key is implausibly short".to_string(),
            });
        }
        Ok(())
    }

    /// Get the transcription API key (use only when making API calls)
    pub fn transcribe_key(&self) -> &str {
        self.transcribe_key.expose_secret()
    }

    /// Get the chat API key (use only when making API calls)
    pub fn chat_key(&self) -> &str {
        self.chat_key.expose_secret()
    }
}

fn env_or(var: &str, default: &str) -> String {
    env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Load API configuration with helpful error messages for development
pub fn load_api_config() -> Result<ApiConfig, DockError> {
    match ApiConfig::load() {
        Ok(config) => {
            log::info!("Successfully loaded API configuration");
            Ok(config)
        }
        Err(ConfigError::MissingEnvVar(var)) => {
            log::error!("Missing required environment variable: {}", var);
            log::error!("Create a .env file in the project root with:");
            log::error!("{}=your_api_key_here", var);
            Err(ConfigError::MissingEnvVar(var).into())
        }
        Err(e) => {
            log::error!("Configuration error: {}", e);
            Err(e.into())
        }
    }
}
