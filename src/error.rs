use thiserror::Error;

pub type Result<T> = std::result::Result<T, DockError>;

#[derive(Error, Debug)]
pub enum DockError {
    #[error("Framing error: {0}")]
    Framer(#[from] crate::framer::FramerError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] crate::protocol::ProtocolError),

    #[error("Discovery error: {0}")]
    Discovery(#[from] crate::discovery::DiscoveryError),

    #[error("Link error: {0}")]
    Link(#[from] crate::link::LinkError),

    #[error("Session error: {0}")]
    Session(#[from] crate::session::SessionError),

    #[error("Transcription error: {0}")]
    Transcribe(#[from] crate::transcribe::TranscribeError),

    #[error("Chat error: {0}")]
    Chat(#[from] crate::chat::ChatError),

    #[error("History error: {0}")]
    History(#[from] crate::history::HistoryError),

    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
