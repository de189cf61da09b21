//! Observer events published by the session.

use crate::protocol::DeviceStatus;

use super::ConnectionState;

/// Everything the presentation layer can learn from a running session.
///
/// Events are emitted from inside the session task, in the order the
/// underlying changes happened. Handlers must be quick; anything slow
/// belongs on the handler's own task.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection lifecycle moved.
    StateChanged(ConnectionState),
    /// The peripheral reported a fresh status snapshot.
    StatusUpdated(DeviceStatus),
    /// Wake words the firmware can listen for.
    WakeWordOptions(Vec<String>),
    /// The peripheral applied a config command.
    ConfigApplied,
    /// The wake word fired on-device.
    WakeWordDetected,
    /// The hardware button was pressed.
    ButtonPressed,
    /// On-device voice activity markers.
    VadStart,
    VadEnd,
    /// A `*_timeout` event, carrying the wire type string.
    DeviceTimeout(String),
    /// The peripheral began streaming an utterance; collaborators should
    /// get ready for a new one.
    CaptureStarted,
    /// A capture ended below the minimum length and was discarded.
    CaptureDiscarded { samples: usize },
    /// A complete utterance was assembled and handed to the collaborators.
    UtteranceCaptured { samples: usize, duration_ms: u64 },
    /// The transcription collaborator returned text.
    TranscriptReady(String),
    /// The chat collaborator returned a reply.
    ResponseReady(String),
    /// A collaborator failed; the session itself is unaffected.
    PipelineError { stage: &'static str, error: String },
}

/// Callback registered at session construction. Invoked from the session
/// task on every state or status change and on capture milestones.
pub type SessionObserver = Box<dyn Fn(SessionEvent) + Send + Sync>;
