//! voicedock: host-side session engine for a serial voice-assistant
//! peripheral.
//!
//! The peripheral speaks newline-delimited JSON over USB serial. This crate
//! owns the host's half of that conversation: discovering the port, keeping
//! the connection alive, decoding device events, assembling streamed audio
//! into utterances, and feeding those utterances to transcription and chat
//! services.

pub mod chat;
pub mod config;
pub mod discovery;
pub mod error;
pub mod framer;
pub mod history;
pub mod link;
pub mod protocol;
pub mod session;
pub mod transcribe;

pub use error::{DockError, Result};
