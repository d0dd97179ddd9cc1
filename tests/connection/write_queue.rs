//! Tests for the outbound queue: backpressure, partial writes, concurrent producers

use std::thread;

use ws_sans_io::frame::OpCode;
use ws_sans_io::{ConnectionStatus, Error, Flush, WebSocketConfig};

use super::support::*;

#[test]
fn test_blocked_transport_queues_in_order() {
    let (mut conn, mut recorder) = open_connection();
    conn.transport_mut().blocked = true;

    conn.send_text("one", &mut recorder).unwrap();
    conn.send_binary(&b"two"[..], &mut recorder).unwrap();
    conn.send_ping(&b"three"[..], &mut recorder).unwrap();
    assert!(conn.transport().written.is_empty());
    assert!(!conn.writer().is_empty());
    assert_eq!(conn.on_writable(&mut recorder), Flush::Pending);

    conn.transport_mut().blocked = false;
    assert_eq!(conn.on_writable(&mut recorder), Flush::Drained);
    assert_eq!(conn.writer().pending_bytes(), 0);

    let frames = conn.transport_mut().take_frames();
    let summary: Vec<_> = frames.iter().map(|f| (f.opcode, &f.payload[..])).collect();
    assert_eq!(
        summary,
        vec![
            (OpCode::Text, &b"one"[..]),
            (OpCode::Binary, &b"two"[..]),
            (OpCode::Ping, &b"three"[..]),
        ]
    );
}

#[test]
fn test_partial_writes_keep_frame_boundaries() {
    let (mut conn, mut recorder) = open_connection();
    conn.transport_mut().max_chunk = Some(1);

    conn.send_text("partial", &mut recorder).unwrap();
    conn.send_binary(vec![7u8; 300], &mut recorder).unwrap();

    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0].payload[..], b"partial");
    assert_eq!(&frames[1].payload[..], &[7u8; 300][..]);
}

#[test]
fn test_resume_after_block_mid_frame() {
    let (mut conn, mut recorder) = open_connection();
    conn.transport_mut().max_chunk = Some(4);
    conn.transport_mut().blocked = true;
    conn.send_text("resumed later", &mut recorder).unwrap();

    conn.transport_mut().blocked = false;
    conn.on_writable(&mut recorder);
    assert!(conn.writer().is_empty());

    let frames = conn.transport_mut().take_frames();
    assert_eq!(&frames[0].payload[..], b"resumed later");
}

#[test]
fn test_fragments_of_one_message_stay_together() {
    let config = WebSocketConfig::default().with_max_frame_size(8);
    let (mut conn, mut recorder) = open_connection_with(config);
    conn.transport_mut().blocked = true;

    let writer = conn.writer();
    let other = conn.writer();
    let a = thread::spawn(move || writer.write_text("a".repeat(40)));
    let b = thread::spawn(move || other.write_text("b".repeat(40)));
    a.join().unwrap().unwrap();
    b.join().unwrap().unwrap();

    conn.transport_mut().blocked = false;
    conn.on_writable(&mut recorder);
    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames.len(), 10);

    for message in frames.chunks(5) {
        assert_eq!(message[0].opcode, OpCode::Text);
        assert!(message[1..].iter().all(|f| f.opcode == OpCode::Continuation));
        assert!(message[4].fin);
        let first = message[0].payload[0];
        assert!(message.iter().all(|f| f.payload.iter().all(|&b| b == first)));
    }
}

#[test]
fn test_concurrent_producers_preserve_per_thread_order() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 50;

    let (mut conn, mut recorder) = open_connection();
    conn.transport_mut().blocked = true;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let writer = conn.writer();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    writer.write_text(format!("{}:{}", t, i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    conn.transport_mut().blocked = false;
    assert_eq!(conn.on_writable(&mut recorder), Flush::Drained);

    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames.len(), THREADS * PER_THREAD);

    let mut next = [0usize; THREADS];
    for frame in &frames {
        let text = std::str::from_utf8(&frame.payload).unwrap();
        let (t, i) = text.split_once(':').unwrap();
        let (t, i): (usize, usize) = (t.parse().unwrap(), i.parse().unwrap());
        assert_eq!(i, next[t], "thread {} out of order", t);
        next[t] += 1;
    }
    assert!(next.iter().all(|&n| n == PER_THREAD));
}

#[test]
fn test_each_frame_gets_its_own_mask() {
    let (mut conn, mut recorder) = open_connection();
    conn.send_text("x", &mut recorder).unwrap();
    conn.send_text("x", &mut recorder).unwrap();

    let frames = conn.transport_mut().take_frames();
    assert!(frames.iter().all(|f| f.is_masked()));
    assert_ne!(frames[0].mask, frames[1].mask);
}

#[test]
fn test_write_failure_disconnects() {
    let (mut conn, mut recorder) = open_connection();
    conn.transport_mut().fail = true;

    conn.send_text("lost", &mut recorder).unwrap();
    assert_eq!(conn.status(), ConnectionStatus::Closed);
    assert!(matches!(recorder.disconnect(), Err(Error::Transport(_))));
    assert!(conn.writer().is_empty());
}

#[test]
fn test_queue_discarded_on_disconnect() {
    let (mut conn, mut recorder) = open_connection();
    conn.transport_mut().blocked = true;
    conn.send_text("never sent", &mut recorder).unwrap();
    assert!(conn.writer().pending_bytes() > 0);

    conn.disconnect(&mut recorder);
    assert_eq!(conn.writer().pending_bytes(), 0);
    assert!(matches!(recorder.disconnect(), Err(Error::Aborted)));
}
