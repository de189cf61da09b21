//! Framing behavior against arbitrarily fragmented serial reads.

use voicedock::framer::LineFramer;

fn drain(framer: &mut LineFramer) -> Vec<String> {
    let mut lines = Vec::new();
    while let Ok(Some(line)) = framer.next_line() {
        lines.push(line);
    }
    lines
}

#[test]
fn test_frames_are_invariant_to_chunk_boundaries() {
    let stream: &[u8] = b"{\"type\":\"heartbeat_ack\"}\n\
        [D][wifi]: connecting...\r\n\
        {\"type\":\"vad_start\"}\n\
        {\"type\":\"audio_data\",\"samples\":[1,-2,3]}\n";

    let baseline = {
        let mut framer = LineFramer::new();
        framer.push(stream);
        drain(&mut framer)
    };
    assert_eq!(baseline.len(), 4);
    assert_eq!(baseline[0], "{\"type\":\"heartbeat_ack\"}");
    assert_eq!(baseline[1], "[D][wifi]: connecting...");

    // Every possible two-chunk split must produce the same frames.
    for split in 0..=stream.len() {
        let mut framer = LineFramer::new();
        let mut lines = Vec::new();
        framer.push(&stream[..split]);
        lines.extend(drain(&mut framer));
        framer.push(&stream[split..]);
        lines.extend(drain(&mut framer));
        assert_eq!(lines, baseline, "split at byte {}", split);
    }
}

#[test]
fn test_byte_at_a_time_delivery() {
    let stream = b"{\"type\":\"heartbeat_ack\"}\n{\"type\":\"vad_end\"}\n";
    let mut framer = LineFramer::new();
    let mut lines = Vec::new();
    for byte in stream {
        framer.push(std::slice::from_ref(byte));
        lines.extend(drain(&mut framer));
    }
    assert_eq!(
        lines,
        vec![
            "{\"type\":\"heartbeat_ack\"}".to_string(),
            "{\"type\":\"vad_end\"}".to_string(),
        ]
    );
}

#[test]
fn test_unterminated_tail_stays_buffered() {
    let mut framer = LineFramer::new();
    framer.push(b"{\"type\":\"status\"}\n{\"type\":\"hea");
    assert_eq!(drain(&mut framer), vec!["{\"type\":\"status\"}".to_string()]);

    // The tail completes on the next read.
    framer.push(b"rtbeat_ack\"}\n");
    assert_eq!(
        drain(&mut framer),
        vec!["{\"type\":\"heartbeat_ack\"}".to_string()]
    );
}
