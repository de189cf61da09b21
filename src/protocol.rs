//! Wire protocol for the voicedock peripheral.
//!
//! Both directions carry newline-delimited JSON objects with a `type`
//! discriminator. The peripheral shares its UART with firmware console
//! output, so inbound decoding is deliberately forgiving: anything that is
//! not a well-formed protocol message is classified as noise and dropped,
//! and optional fields inside recognized messages fall back to defaults
//! instead of failing the whole message. Encoding is strict and compact so
//! the firmware's parser round-trips it.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString, FromRepr};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Phase of the on-device assistant, reported as a bare integer in `status`
/// messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromRepr, Display)]
#[repr(u8)]
pub enum AssistantPhase {
    #[default]
    Idle = 0,
    WaitingForCommand = 1,
    Listening = 2,
    Thinking = 3,
    Replying = 4,
    NotReady = 5,
    ErrorState = 6,
}

impl AssistantPhase {
    /// Unknown phase values map to `NotReady` rather than failing the
    /// message; newer firmware may report phases this build doesn't know.
    pub fn from_wire(raw: u64) -> Self {
        u8::try_from(raw)
            .ok()
            .and_then(Self::from_repr)
            .unwrap_or(Self::NotReady)
    }
}

/// Wake-word detector sensitivity presets understood by the firmware.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WakeSensitivity {
    SlightlySensitive,
    #[default]
    ModeratelySensitive,
    VerySensitive,
}

/// Snapshot of the peripheral's self-reported state. Replaced wholesale on
/// every `status` message; never merged field-by-field.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceStatus {
    pub wake_word_active: bool,
    pub microphone_muted: bool,
    pub voice_assistant_phase: AssistantPhase,
    pub voice_assistant_running: bool,
    pub timer_active: bool,
    pub timer_ringing: bool,
    pub led_brightness: f32,
    pub volume: f32,
    pub wake_word: String,
    pub wake_word_sensitivity: WakeSensitivity,
    pub wifi_connected: bool,
    pub api_connected: bool,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        Self {
            wake_word_active: false,
            microphone_muted: false,
            voice_assistant_phase: AssistantPhase::Idle,
            voice_assistant_running: false,
            timer_active: false,
            timer_ringing: false,
            led_brightness: 1.0,
            volume: 1.0,
            wake_word: String::new(),
            wake_word_sensitivity: WakeSensitivity::ModeratelySensitive,
            wifi_connected: false,
            api_connected: false,
        }
    }
}

impl DeviceStatus {
    /// Build a status snapshot from a decoded `status` payload. Every field
    /// is optional on the wire; absent or malformed fields take the
    /// defaults above.
    fn from_value(data: &Value) -> Self {
        let defaults = Self::default();
        Self {
            wake_word_active: data["wake_word_active"].as_bool().unwrap_or(false),
            microphone_muted: data["microphone_muted"].as_bool().unwrap_or(false),
            voice_assistant_phase: data["voice_assistant_phase"]
                .as_u64()
                .map(AssistantPhase::from_wire)
                .unwrap_or_default(),
            voice_assistant_running: data["voice_assistant_running"].as_bool().unwrap_or(false),
            timer_active: data["timer_active"].as_bool().unwrap_or(false),
            timer_ringing: data["timer_ringing"].as_bool().unwrap_or(false),
            led_brightness: unit_range(&data["led_brightness"], defaults.led_brightness),
            volume: unit_range(&data["volume"], defaults.volume),
            wake_word: data["wake_word"].as_str().unwrap_or("").to_string(),
            wake_word_sensitivity: data["wake_word_sensitivity"]
                .as_str()
                .and_then(|s| s.parse().ok())
                .unwrap_or_default(),
            wifi_connected: data["wifi_connected"].as_bool().unwrap_or(false),
            api_connected: data["api_connected"].as_bool().unwrap_or(false),
        }
    }
}

/// Clamp a wire float into [0, 1], falling back when absent or not a number.
fn unit_range(value: &Value, default: f32) -> f32 {
    value
        .as_f64()
        .map(|f| (f as f32).clamp(0.0, 1.0))
        .unwrap_or(default)
}

/// Messages the peripheral sends to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    Status(DeviceStatus),
    WakeWordOptions(Vec<String>),
    HeartbeatAck,
    ConfigApplied,
    WakeWordDetected,
    ButtonPressed,
    StartAudioRecording,
    AudioData(Vec<i32>),
    StopAudioRecording,
    VadStart,
    VadEnd,
    /// Any `*_timeout` event, carrying the full wire type string.
    Timeout(String),
}

// Firmware console output that must never reach the message dispatch:
// ANSI-colored boot banners and bracketed severity tags like "[D][wifi]:".
static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new("\x1b\\[[0-9;]*[A-Za-z]").expect("ANSI escape regex is valid")
});
static LOG_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[[A-Z]\]").expect("log marker regex is valid"));

/// Decode one frame into a protocol message.
///
/// Returns `None` for anything that is not peripheral protocol traffic:
/// console log lines, non-JSON text, JSON without a `type` field, and types
/// this host does not understand. `None` is droppable noise, never an error.
pub fn decode(frame: &str) -> Option<InboundMessage> {
    let trimmed = frame.trim();
    if trimmed.is_empty() || ANSI_ESCAPE.is_match(trimmed) || LOG_MARKER.is_match(trimmed) {
        return None;
    }
    if !(trimmed.starts_with('{') && trimmed.ends_with('}')) {
        return None;
    }
    let data: Value = serde_json::from_str(trimmed).ok()?;
    let msg_type = data.get("type")?.as_str()?;

    match msg_type {
        "status" => Some(InboundMessage::Status(DeviceStatus::from_value(&data))),
        "wake_word_options" => {
            let options = data["options"]
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            Some(InboundMessage::WakeWordOptions(options))
        }
        "heartbeat_ack" => Some(InboundMessage::HeartbeatAck),
        "config_applied" => Some(InboundMessage::ConfigApplied),
        "wake_word_detected" => Some(InboundMessage::WakeWordDetected),
        "button_pressed" => Some(InboundMessage::ButtonPressed),
        "start_audio_recording" => Some(InboundMessage::StartAudioRecording),
        "audio_data" => {
            let samples = data["samples"]
                .as_array()
                .map(|entries| {
                    entries
                        .iter()
                        .filter_map(|v| v.as_i64())
                        .map(|n| n.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
                        .collect()
                })
                .unwrap_or_default();
            Some(InboundMessage::AudioData(samples))
        }
        "stop_audio_recording" => Some(InboundMessage::StopAudioRecording),
        "vad_start" => Some(InboundMessage::VadStart),
        "vad_end" => Some(InboundMessage::VadEnd),
        other if other.ends_with("_timeout") => Some(InboundMessage::Timeout(other.to_string())),
        other => {
            log::debug!("📥 Ignoring unknown message type: {}", other);
            None
        }
    }
}

/// Configuration fields pushed to the peripheral. Only fields that are set
/// appear on the wire; the firmware applies them and leaves the rest alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wake_word_sensitivity: Option<WakeSensitivity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub led_brightness: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub microphone_muted: Option<bool>,
}

impl ConfigUpdate {
    /// Copy with `led_brightness` and `volume` forced into `[0, 1]`, the
    /// same range the status decoder holds those fields to.
    pub fn clamped(&self) -> Self {
        Self {
            led_brightness: self.led_brightness.map(|v| v.clamp(0.0, 1.0)),
            volume: self.volume.map(|v| v.clamp(0.0, 1.0)),
            ..self.clone()
        }
    }
}

/// Commands the host sends to the peripheral.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    Heartbeat,
    GetStatus,
    GetWakeWordOptions,
    Config(ConfigUpdate),
    Disconnect,
    PlayTone {
        frequency: u32,
        duration_ms: u32,
        timestamp: i64,
    },
}

impl OutboundCommand {
    /// Tone command stamped with the current wall-clock time in millis.
    pub fn play_tone(frequency: u32, duration_ms: u32) -> Self {
        Self::PlayTone {
            frequency,
            duration_ms,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Serialize to the wire form: compact single-line JSON plus the
    /// terminating newline. Config unit-range fields are clamped first, so
    /// out-of-range values never reach the firmware.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = match self {
            Self::Config(update) => serde_json::to_string(&Self::Config(update.clamped()))?,
            other => serde_json::to_string(other)?,
        };
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_noise_is_rejected() {
        assert_eq!(decode("[D][wifi]: connecting..."), None);
        assert_eq!(decode("[I][app:123] boot complete"), None);
        assert_eq!(decode("\x1b[32mINFO\x1b[0m ready"), None);
        assert_eq!(decode("plain text line"), None);
        assert_eq!(decode(""), None);
        assert_eq!(decode("{\"no_type\":true}"), None);
        assert_eq!(decode("{\"type\":42}"), None);
        assert_eq!(decode("{not json"), None);
    }

    #[test]
    fn test_unknown_type_is_dropped() {
        assert_eq!(decode("{\"type\":\"firmware_update_progress\"}"), None);
    }

    #[test]
    fn test_timeout_family() {
        assert_eq!(
            decode("{\"type\":\"listen_timeout\"}"),
            Some(InboundMessage::Timeout("listen_timeout".to_string()))
        );
        assert_eq!(
            decode("{\"type\":\"reply_timeout\"}"),
            Some(InboundMessage::Timeout("reply_timeout".to_string()))
        );
    }

    #[test]
    fn test_simple_events() {
        assert_eq!(
            decode("{\"type\":\"heartbeat_ack\"}"),
            Some(InboundMessage::HeartbeatAck)
        );
        assert_eq!(
            decode("  {\"type\":\"vad_start\"}  "),
            Some(InboundMessage::VadStart)
        );
        assert_eq!(
            decode("{\"type\":\"button_pressed\",\"extra\":1}"),
            Some(InboundMessage::ButtonPressed)
        );
    }

    #[test]
    fn test_status_defaults_when_fields_absent() {
        let msg = decode("{\"type\":\"status\"}").expect("status should decode");
        let InboundMessage::Status(status) = msg else {
            panic!("expected status variant");
        };
        assert_eq!(status, DeviceStatus::default());
        assert_eq!(status.voice_assistant_phase, AssistantPhase::Idle);
        assert_eq!(status.led_brightness, 1.0);
        assert_eq!(status.volume, 1.0);
    }

    #[test]
    fn test_status_full_payload() {
        let frame = concat!(
            "{\"type\":\"status\",\"wake_word_active\":true,\"microphone_muted\":true,",
            "\"voice_assistant_phase\":2,\"voice_assistant_running\":true,",
            "\"timer_active\":true,\"timer_ringing\":false,\"led_brightness\":0.25,",
            "\"volume\":1.7,\"wake_word\":\"hey_jarvis\",",
            "\"wake_word_sensitivity\":\"very_sensitive\",\"wifi_connected\":true,",
            "\"api_connected\":false}"
        );
        let InboundMessage::Status(status) = decode(frame).expect("status should decode") else {
            panic!("expected status variant");
        };
        assert!(status.wake_word_active);
        assert!(status.microphone_muted);
        assert_eq!(status.voice_assistant_phase, AssistantPhase::Listening);
        assert_eq!(status.led_brightness, 0.25);
        assert_eq!(status.volume, 1.0); // clamped from 1.7
        assert_eq!(status.wake_word, "hey_jarvis");
        assert_eq!(status.wake_word_sensitivity, WakeSensitivity::VerySensitive);
        assert!(status.wifi_connected);
        assert!(!status.api_connected);
    }

    #[test]
    fn test_unknown_phase_maps_to_not_ready() {
        let InboundMessage::Status(status) =
            decode("{\"type\":\"status\",\"voice_assistant_phase\":42}").unwrap()
        else {
            panic!("expected status variant");
        };
        assert_eq!(status.voice_assistant_phase, AssistantPhase::NotReady);
    }

    #[test]
    fn test_unknown_sensitivity_falls_back() {
        let InboundMessage::Status(status) =
            decode("{\"type\":\"status\",\"wake_word_sensitivity\":\"ludicrous\"}").unwrap()
        else {
            panic!("expected status variant");
        };
        assert_eq!(
            status.wake_word_sensitivity,
            WakeSensitivity::ModeratelySensitive
        );
    }

    #[test]
    fn test_audio_data_samples() {
        let msg = decode("{\"type\":\"audio_data\",\"samples\":[-5,0,4,32767,-32768]}").unwrap();
        assert_eq!(
            msg,
            InboundMessage::AudioData(vec![-5, 0, 4, 32767, -32768])
        );
    }

    #[test]
    fn test_audio_data_skips_non_integers() {
        let msg = decode("{\"type\":\"audio_data\",\"samples\":[1,\"x\",2,null,3]}").unwrap();
        assert_eq!(msg, InboundMessage::AudioData(vec![1, 2, 3]));
    }

    #[test]
    fn test_audio_data_missing_samples() {
        let msg = decode("{\"type\":\"audio_data\"}").unwrap();
        assert_eq!(msg, InboundMessage::AudioData(Vec::new()));
    }

    #[test]
    fn test_wake_word_options() {
        let msg =
            decode("{\"type\":\"wake_word_options\",\"options\":[\"alexa\",\"hey_jarvis\"]}")
                .unwrap();
        assert_eq!(
            msg,
            InboundMessage::WakeWordOptions(vec!["alexa".to_string(), "hey_jarvis".to_string()])
        );
    }

    #[test]
    fn test_encode_bare_commands() {
        assert_eq!(
            OutboundCommand::Heartbeat.encode().unwrap(),
            "{\"type\":\"heartbeat\"}\n"
        );
        assert_eq!(
            OutboundCommand::GetStatus.encode().unwrap(),
            "{\"type\":\"get_status\"}\n"
        );
        assert_eq!(
            OutboundCommand::GetWakeWordOptions.encode().unwrap(),
            "{\"type\":\"get_wake_word_options\"}\n"
        );
        assert_eq!(
            OutboundCommand::Disconnect.encode().unwrap(),
            "{\"type\":\"disconnect\"}\n"
        );
    }

    #[test]
    fn test_encode_play_tone() {
        let line = OutboundCommand::PlayTone {
            frequency: 880,
            duration_ms: 120,
            timestamp: 1700000000000,
        }
        .encode()
        .unwrap();
        assert_eq!(
            line,
            "{\"type\":\"play_tone\",\"frequency\":880,\"duration_ms\":120,\"timestamp\":1700000000000}\n"
        );
    }

    #[test]
    fn test_encode_config_is_single_line_and_escaped() {
        let update = ConfigUpdate {
            wake_word: Some("say \"ok\"\nthen speak".to_string()),
            volume: Some(0.5),
            ..Default::default()
        };
        let line = OutboundCommand::Config(update.clone()).encode().unwrap();

        // newline only as the terminator, never inside the frame
        assert_eq!(line.matches('\n').count(), 1);
        assert!(line.ends_with('\n'));

        let value: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "config");
        let decoded: ConfigUpdate = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, update);
    }

    #[test]
    fn test_config_omits_unset_fields() {
        let line = OutboundCommand::Config(ConfigUpdate {
            volume: Some(0.3),
            ..Default::default()
        })
        .encode()
        .unwrap();
        assert_eq!(line, "{\"type\":\"config\",\"volume\":0.3}\n");
    }
}
