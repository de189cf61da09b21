//! Serial link worker.
//!
//! The physical port handle is owned by exactly one blocking worker; nothing
//! else in the crate ever touches it. Outbound frames travel through a
//! bounded write queue that the worker drains between reads, and inbound
//! bytes arrive as ordered [`LinkEvent`]s on a channel the session consumes.
//! The worker keeps its read timeout short so queued writes (heartbeats most
//! importantly) go out within a few milliseconds of being submitted.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Fixed line configuration the peripheral firmware expects.
pub const BAUD_RATE: u32 = 115_200;

const READ_TIMEOUT: Duration = Duration::from_millis(10);
const READ_CHUNK: usize = 2048;
const WRITE_QUEUE_DEPTH: usize = 64;
const EVENT_QUEUE_DEPTH: usize = 256;

#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: serialport::Error,
    },

    #[error("Link write queue is full")]
    Backpressure,

    #[error("Link is closed")]
    Closed,
}

/// What the worker reports back to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    /// Raw bytes read from the port, in arrival order.
    Data(Vec<u8>),
    /// The link is gone. `None` means an orderly local stop; `Some` carries
    /// the reason for an unexpected loss (device unplugged, write failure).
    Closed { reason: Option<String> },
}

/// Handle to one open link. Dropping it stops the worker and releases the
/// port.
pub struct Link {
    events: mpsc::Receiver<LinkEvent>,
    writer: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
}

impl Link {
    /// Open a serial port at 115200 8N1 and start its worker.
    ///
    /// The open call itself can block on USB enumeration, so it runs on the
    /// blocking pool rather than the caller's task.
    pub async fn open(path: &str) -> Result<Self, LinkError> {
        let path_owned = path.to_string();
        let port = tokio::task::spawn_blocking(move || {
            let port = serialport::new(&path_owned, BAUD_RATE)
                .data_bits(DataBits::Eight)
                .parity(Parity::None)
                .stop_bits(StopBits::One)
                .flow_control(FlowControl::None)
                .timeout(READ_TIMEOUT)
                .open()?;
            // Stale boot chatter from before we attached is not ours.
            let _ = port.clear(serialport::ClearBuffer::All);
            Ok::<_, serialport::Error>(port)
        })
        .await
        .map_err(|_| LinkError::Open {
            path: path.to_string(),
            source: serialport::Error::new(serialport::ErrorKind::Unknown, "open task failed"),
        })?
        .map_err(|e| LinkError::Open {
            path: path.to_string(),
            source: e,
        })?;

        log::info!("📡 Opened serial port at {} baud", BAUD_RATE);

        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        let stop = Arc::new(AtomicBool::new(false));

        let worker_stop = stop.clone();
        tokio::task::spawn_blocking(move || run_io(port, write_rx, event_tx, worker_stop));

        Ok(Self {
            events: event_rx,
            writer: write_tx,
            stop,
        })
    }

    /// In-memory link with no worker behind it, for exercising the session
    /// without hardware. The peer half plays the peripheral.
    pub fn loopback() -> (Self, LinkPeer) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (write_tx, write_rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
        (
            Self {
                events: event_rx,
                writer: write_tx,
                stop: Arc::new(AtomicBool::new(false)),
            },
            LinkPeer {
                from_host: write_rx,
                to_host: event_tx,
            },
        )
    }

    /// Queue one encoded frame for the worker to write.
    ///
    /// Never blocks. A full queue means the worker has been wedged for a
    /// while, which the liveness supervisor will catch; the caller only
    /// needs to know this frame did not go out.
    pub fn send(&self, frame: &str) -> Result<(), LinkError> {
        self.writer
            .try_send(frame.as_bytes().to_vec())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => LinkError::Backpressure,
                mpsc::error::TrySendError::Closed(_) => LinkError::Closed,
            })
    }

    /// Next event from the worker, `None` once the link is fully torn down.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Ask the worker to stop. Idempotent; `Drop` calls it too.
    pub fn shutdown(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// The peripheral's half of a loopback link.
pub struct LinkPeer {
    /// Frames the host wrote, in order.
    pub from_host: mpsc::Receiver<Vec<u8>>,
    /// Inject events as if the worker produced them.
    pub to_host: mpsc::Sender<LinkEvent>,
}

/// How the session obtains a link for a given port path. The session only
/// ever goes through this seam, so a fake opener can stand in for real
/// hardware.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    async fn open(&self, path: &str) -> Result<Link, LinkError>;
}

/// The production opener: a real serial port.
pub struct SerialOpener;

#[async_trait]
impl LinkOpener for SerialOpener {
    async fn open(&self, path: &str) -> Result<Link, LinkError> {
        Link::open(path).await
    }
}

/// Worker loop. Exclusive owner of the port handle from here on.
fn run_io(
    mut port: Box<dyn SerialPort>,
    mut write_rx: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut read_buf = [0u8; READ_CHUNK];

    while !stop.load(Ordering::SeqCst) {
        // Drain pending writes first so probes never queue behind reads.
        loop {
            match write_rx.try_recv() {
                Ok(frame) => {
                    if let Err(e) = port.write_all(&frame).and_then(|_| port.flush()) {
                        let _ = events.blocking_send(LinkEvent::Closed {
                            reason: Some(format!("write failed: {}", e)),
                        });
                        return;
                    }
                }
                Err(TryRecvError::Empty) => break,
                // Session dropped its handle; nothing left to serve.
                Err(TryRecvError::Disconnected) => return,
            }
        }

        match port.read(&mut read_buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(5)),
            Ok(n) => {
                if events
                    .blocking_send(LinkEvent::Data(read_buf[..n].to_vec()))
                    .is_err()
                {
                    return;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::TimedOut => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => {
                let _ = events.blocking_send(LinkEvent::Closed {
                    reason: Some(format!("read failed: {}", e)),
                });
                return;
            }
        }
    }

    let _ = events.blocking_send(LinkEvent::Closed { reason: None });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_loopback_carries_frames_both_ways() {
        let (mut link, mut peer) = Link::loopback();

        link.send("{\"type\":\"heartbeat\"}\n").unwrap();
        let written = peer.from_host.recv().await.unwrap();
        assert_eq!(written, b"{\"type\":\"heartbeat\"}\n");

        peer.to_host
            .send(LinkEvent::Data(b"{\"type\":\"heartbeat_ack\"}\n".to_vec()))
            .await
            .unwrap();
        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Data(b"{\"type\":\"heartbeat_ack\"}\n".to_vec()))
        );
    }

    #[tokio::test]
    async fn test_send_fails_after_peer_gone() {
        let (link, peer) = Link::loopback();
        drop(peer);
        assert!(matches!(link.send("x\n"), Err(LinkError::Closed)));
    }

    #[tokio::test]
    async fn test_backpressure_when_queue_full() {
        let (link, _peer) = Link::loopback();
        for _ in 0..WRITE_QUEUE_DEPTH {
            link.send("frame\n").unwrap();
        }
        assert!(matches!(link.send("frame\n"), Err(LinkError::Backpressure)));
    }

    #[tokio::test]
    async fn test_peer_close_surfaces_as_event() {
        let (mut link, peer) = Link::loopback();
        peer.to_host
            .send(LinkEvent::Closed {
                reason: Some("device unplugged".to_string()),
            })
            .await
            .unwrap();
        drop(peer);

        assert_eq!(
            link.next_event().await,
            Some(LinkEvent::Closed {
                reason: Some("device unplugged".to_string())
            })
        );
        assert_eq!(link.next_event().await, None);
    }
}
