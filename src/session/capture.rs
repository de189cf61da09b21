//! Audio capture pipeline.
//!
//! While the peripheral streams microphone samples, this pipeline buffers
//! the chunks in arrival order, normalizes questionable sample widths, and
//! assembles one contiguous utterance on stop. It is deliberately tolerant
//! of firmware quirks: duplicate starts, data while idle, and stops without
//! any data all resolve quietly instead of derailing the session.

use crate::config::CaptureConfig;
use tokio::time::Instant;

/// Result of a `start_audio_recording` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// A new capture began from idle.
    Fresh,
    /// A capture was already running; its buffer was discarded and a new
    /// utterance begins here. Wake-word retriggers restart without stopping.
    Restarted { discarded_samples: usize },
}

/// Result of an `audio_data` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Accepted {
        chunk_samples: usize,
        total_samples: usize,
    },
    /// Chunk arrived while idle. Out-of-order or duplicate frames are
    /// dropped, never an error.
    IgnoredIdle,
}

/// Result of a `stop_audio_recording` message.
#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    /// No capture was running.
    NotRecording,
    /// The capture was below the minimum length and was thrown away.
    TooShort { samples: usize },
    /// A complete utterance, chunks concatenated in arrival order.
    Complete(Utterance),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl Utterance {
    pub fn duration_ms(&self) -> u64 {
        self.samples.len() as u64 * 1000 / self.sample_rate.max(1) as u64
    }
}

enum CaptureState {
    Idle,
    Recording {
        chunks: Vec<Vec<i16>>,
        total_samples: usize,
        started_at: Instant,
    },
}

pub struct CapturePipeline {
    config: CaptureConfig,
    state: CaptureState,
}

impl CapturePipeline {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            state: CaptureState::Idle,
        }
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.state, CaptureState::Recording { .. })
    }

    pub fn start(&mut self) -> StartOutcome {
        let outcome = match &self.state {
            CaptureState::Idle => StartOutcome::Fresh,
            CaptureState::Recording { total_samples, .. } => StartOutcome::Restarted {
                discarded_samples: *total_samples,
            },
        };
        self.state = CaptureState::Recording {
            chunks: Vec::new(),
            total_samples: 0,
            started_at: Instant::now(),
        };
        outcome
    }

    pub fn append(&mut self, raw: &[i32]) -> AppendOutcome {
        match &mut self.state {
            CaptureState::Idle => AppendOutcome::IgnoredIdle,
            CaptureState::Recording {
                chunks,
                total_samples,
                ..
            } => {
                let normalized = normalize_chunk(raw);
                let chunk_samples = normalized.len();
                *total_samples += chunk_samples;
                chunks.push(normalized);
                AppendOutcome::Accepted {
                    chunk_samples,
                    total_samples: *total_samples,
                }
            }
        }
    }

    pub fn stop(&mut self) -> StopOutcome {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Idle => StopOutcome::NotRecording,
            CaptureState::Recording {
                chunks,
                total_samples,
                started_at,
            } => {
                if total_samples < self.config.min_utterance_samples {
                    return StopOutcome::TooShort {
                        samples: total_samples,
                    };
                }
                let mut samples = Vec::with_capacity(total_samples);
                for chunk in chunks {
                    samples.extend_from_slice(&chunk);
                }
                log::debug!(
                    "🎤 Capture closed: {} samples in {} ms of wall clock",
                    total_samples,
                    started_at.elapsed().as_millis()
                );
                StopOutcome::Complete(Utterance {
                    samples,
                    sample_rate: self.config.sample_rate,
                })
            }
        }
    }

    /// Drop any in-flight capture, for connection teardown.
    pub fn reset(&mut self) {
        self.state = CaptureState::Idle;
    }
}

/// Coerce a chunk to 16-bit samples.
///
/// The firmware usually sends genuine int16, but some builds stream the
/// codec's wider samples unscaled. Guess the width from the chunk's peak
/// (within int16 -> untouched, within int24 -> drop the low 8 bits, else
/// treat as int32) and clamp whatever remains. The thresholds are a
/// provisional policy, not a firmware contract.
fn normalize_chunk(raw: &[i32]) -> Vec<i16> {
    let peak = raw.iter().map(|v| v.unsigned_abs()).max().unwrap_or(0);
    let shift = if peak <= 1 << 15 {
        0
    } else if peak <= 1 << 23 {
        8
    } else {
        16
    };
    raw.iter()
        .map(|&v| (v >> shift).clamp(i16::MIN as i32, i16::MAX as i32) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptureConfig;

    fn pipeline() -> CapturePipeline {
        CapturePipeline::new(CaptureConfig::default())
    }

    #[test]
    fn test_start_append_stop_preserves_order() {
        let mut capture = pipeline();
        assert_eq!(capture.start(), StartOutcome::Fresh);

        let chunk: Vec<i32> = (0..4000).collect();
        capture.append(&chunk);
        capture.append(&chunk.iter().map(|v| v + 4000).collect::<Vec<_>>());
        capture.append(&(8000..10000).collect::<Vec<_>>());

        match capture.stop() {
            StopOutcome::Complete(utterance) => {
                assert_eq!(utterance.samples.len(), 10_000);
                let expected: Vec<i16> = (0..10_000).map(|v| v as i16).collect();
                assert_eq!(utterance.samples, expected);
                assert_eq!(utterance.sample_rate, 16_000);
                assert_eq!(utterance.duration_ms(), 625);
            }
            other => panic!("expected a complete utterance, got {:?}", other),
        }
        assert!(!capture.is_recording());
    }

    #[test]
    fn test_stop_without_start_is_noop() {
        let mut capture = pipeline();
        assert_eq!(capture.stop(), StopOutcome::NotRecording);
    }

    #[test]
    fn test_data_while_idle_is_ignored() {
        let mut capture = pipeline();
        assert_eq!(capture.append(&[1, 2, 3]), AppendOutcome::IgnoredIdle);
        assert_eq!(capture.stop(), StopOutcome::NotRecording);
    }

    #[test]
    fn test_short_utterance_is_discarded() {
        let mut capture = pipeline();
        capture.start();
        capture.append(&vec![100; 9_999]);
        assert_eq!(capture.stop(), StopOutcome::TooShort { samples: 9_999 });
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let mut capture = pipeline();
        capture.start();
        capture.append(&vec![100; 10_000]);
        assert!(matches!(capture.stop(), StopOutcome::Complete(_)));
    }

    #[test]
    fn test_stop_with_zero_chunks_is_too_short() {
        let mut capture = pipeline();
        capture.start();
        assert_eq!(capture.stop(), StopOutcome::TooShort { samples: 0 });
    }

    #[test]
    fn test_restart_discards_previous_buffer() {
        let mut capture = pipeline();
        capture.start();
        capture.append(&vec![7; 5_000]);

        assert_eq!(
            capture.start(),
            StartOutcome::Restarted {
                discarded_samples: 5_000
            }
        );

        capture.append(&vec![9; 12_000]);
        match capture.stop() {
            StopOutcome::Complete(utterance) => {
                assert_eq!(utterance.samples.len(), 12_000);
                assert!(utterance.samples.iter().all(|&s| s == 9));
            }
            other => panic!("expected a complete utterance, got {:?}", other),
        }
    }

    #[test]
    fn test_reset_drops_capture() {
        let mut capture = pipeline();
        capture.start();
        capture.append(&vec![1; 20_000]);
        capture.reset();
        assert_eq!(capture.stop(), StopOutcome::NotRecording);
    }

    #[test]
    fn test_normalize_passthrough_for_int16() {
        assert_eq!(
            normalize_chunk(&[0, -32768, 32767, 12345]),
            vec![0, -32768, 32767, 12345]
        );
    }

    #[test]
    fn test_normalize_int24_scaled_down() {
        // Peak beyond int16 but within int24: full-scale int24 maps to
        // full-scale int16.
        let chunk = [8_388_607, -8_388_608, 256, -256];
        assert_eq!(normalize_chunk(&chunk), vec![32767, -32768, 1, -1]);
    }

    #[test]
    fn test_normalize_int32_scaled_down() {
        let chunk = [2_147_418_112, -2_147_483_648, 65_536];
        assert_eq!(normalize_chunk(&chunk), vec![32767, -32768, 1]);
    }

    #[test]
    fn test_normalize_scale_is_per_chunk() {
        // A quiet chunk after a loud one is judged on its own peak.
        let mut capture = pipeline();
        capture.start();
        capture.append(&[1_000_000, 500_000]); // int24-range chunk
        capture.append(&[1_000, 500]); // int16-range chunk
        capture.append(&vec![0; 10_000]);
        match capture.stop() {
            StopOutcome::Complete(utterance) => {
                assert_eq!(&utterance.samples[..2], &[3906, 1953]);
                assert_eq!(&utterance.samples[2..4], &[1_000, 500]);
            }
            other => panic!("expected a complete utterance, got {:?}", other),
        }
    }
}
