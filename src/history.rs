//! Utterance history sink.
//!
//! Every completed interaction is archived: the raw audio as a WAV file and
//! an appended JSONL record tying it to its transcript and reply. Useful for
//! replaying capture bugs against real firmware traffic.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum HistoryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV encoding error: {0}")]
    Encode(#[from] hound::Error),
    #[error("Archival task failed")]
    TaskFailed,
}

/// Records one completed interaction.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record(
        &self,
        samples: &[i16],
        sample_rate: u32,
        transcript: &str,
        response: &str,
    ) -> Result<(), HistoryError>;
}

/// Directory-backed archive: `utterance-<timestamp>.wav` files plus a
/// `history.jsonl` index.
pub struct FileHistory {
    dir: PathBuf,
}

impl FileHistory {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn write_wav(path: &Path, samples: &[i16], sample_rate: u32) -> Result<(), HistoryError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }
}

#[async_trait]
impl HistorySink for FileHistory {
    async fn record(
        &self,
        samples: &[i16],
        sample_rate: u32,
        transcript: &str,
        response: &str,
    ) -> Result<(), HistoryError> {
        let stamp = chrono::Utc::now();
        let wav_name = format!("utterance-{}.wav", stamp.format("%Y%m%d-%H%M%S%6f"));
        let wav_path = self.dir.join(&wav_name);

        // hound wants sync IO; keep it off the async workers.
        let owned_samples = samples.to_vec();
        let blocking_path = wav_path.clone();
        tokio::task::spawn_blocking(move || {
            Self::write_wav(&blocking_path, &owned_samples, sample_rate)
        })
        .await
        .map_err(|_| HistoryError::TaskFailed)??;

        let entry = serde_json::json!({
            "timestamp": stamp.to_rfc3339(),
            "wav": wav_name,
            "samples": samples.len(),
            "duration_ms": samples.len() as u64 * 1000 / sample_rate.max(1) as u64,
            "transcript": transcript,
            "response": response,
        });
        let mut line = entry.to_string();
        line.push('\n');

        let mut index = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join("history.jsonl"))
            .await?;
        index.write_all(line.as_bytes()).await?;

        log::info!("📝 Archived utterance to {}", wav_path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_record_writes_wav_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path()).unwrap();

        let samples: Vec<i16> = (0..1600).map(|i| (i % 100) as i16).collect();
        history
            .record(&samples, 16_000, "turn on the lights", "Done.")
            .await
            .unwrap();

        let index = std::fs::read_to_string(dir.path().join("history.jsonl")).unwrap();
        let entry: serde_json::Value = serde_json::from_str(index.trim()).unwrap();
        assert_eq!(entry["samples"], 1600);
        assert_eq!(entry["duration_ms"], 100);
        assert_eq!(entry["transcript"], "turn on the lights");
        assert_eq!(entry["response"], "Done.");

        let wav_name = entry["wav"].as_str().unwrap();
        let reader = hound::WavReader::open(dir.path().join(wav_name)).unwrap();
        assert_eq!(reader.len(), 1600);
        assert_eq!(reader.spec().sample_rate, 16_000);
    }

    #[tokio::test]
    async fn test_record_appends() {
        let dir = tempfile::tempdir().unwrap();
        let history = FileHistory::new(dir.path()).unwrap();

        history.record(&[1, 2, 3], 16_000, "one", "1").await.unwrap();
        history.record(&[4, 5, 6], 16_000, "two", "2").await.unwrap();

        let index = std::fs::read_to_string(dir.path().join("history.jsonl")).unwrap();
        assert_eq!(index.lines().count(), 2);
    }
}
