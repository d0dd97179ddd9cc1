//! Tests for the close handshake and its timeout

use std::sync::Arc;
use std::time::{Duration, Instant};

use ws_sans_io::frame::{Frame, OpCode};
use ws_sans_io::{
    CloseCode, CloseInfo, ConnectionState, ConnectionStatus, Error, ReadEngine, ReadEvent,
    WebSocketConfig, WriteEngine, WriteError,
};

use super::support::*;

fn close_frame(code: CloseCode, reason: &str) -> Vec<u8> {
    server_frame(Frame::close(&CloseInfo::new(code, reason)))
}

#[test]
fn test_client_close_passes_through_every_closing_state() {
    let state = Arc::new(ConnectionState::new());
    state.advance(ConnectionStatus::New, ConnectionStatus::Opening).unwrap();
    state.advance(ConnectionStatus::Opening, ConnectionStatus::Open).unwrap();
    let writer = WriteEngine::new(Arc::clone(&state), &WebSocketConfig::default());
    let mut reader = ReadEngine::new(Arc::clone(&state), writer.clone(), 1024);

    writer.write_close(CloseCode::GoingAway, "bye").unwrap();
    assert_eq!(state.status(), ConnectionStatus::ClosingHandshakeInitiated);

    let events = reader.process(&close_frame(CloseCode::Normal, ""));
    assert_eq!(
        events,
        vec![ReadEvent::Closed {
            peer: CloseInfo::new(CloseCode::Normal, ""),
            initiated_locally: true,
        }]
    );
    assert_eq!(state.status(), ConnectionStatus::ClosingHandshakeComplete);

    assert_eq!(state.close(), Some(ConnectionStatus::ClosingHandshakeComplete));
    assert_eq!(state.status(), ConnectionStatus::Closed);
}

#[test]
fn test_client_close_acknowledged_in_time() {
    let (mut conn, mut recorder) = open_connection();
    let now = Instant::now();
    conn.initiate_close(CloseCode::GoingAway, "bye", Some(Duration::from_secs(2)), now, &mut recorder)
        .unwrap();
    assert_eq!(conn.status(), ConnectionStatus::ClosingHandshakeInitiated);

    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, OpCode::Close);
    assert_eq!(
        CloseInfo::parse(&frames[0].payload).unwrap(),
        CloseInfo::new(CloseCode::GoingAway, "bye")
    );

    conn.receive(&close_frame(CloseCode::Normal, ""), &mut recorder);
    assert_eq!(conn.status(), ConnectionStatus::Closed);
    match recorder.disconnect() {
        Ok(info) => assert_eq!(info, &CloseInfo::new(CloseCode::GoingAway, "bye")),
        Err(err) => panic!("expected clean close, got {}", err),
    }
    assert_eq!(conn.transport().shutdowns, 1);
    assert!(conn.transport().written.is_empty(), "no reply to an acknowledgment");

    // Timer was cancelled: a late expiry does nothing
    conn.handle_timeout(now + Duration::from_secs(10), &mut recorder);
    assert_eq!(recorder.disconnects.len(), 1);
}

#[test]
fn test_client_close_times_out() {
    let (mut conn, mut recorder) = open_connection();
    let now = Instant::now();
    conn.initiate_close(CloseCode::Normal, "", Some(Duration::from_millis(100)), now, &mut recorder)
        .unwrap();
    assert_eq!(conn.poll_timeout(), Some(now + Duration::from_millis(100)));

    conn.handle_timeout(now + Duration::from_millis(50), &mut recorder);
    assert_eq!(conn.status(), ConnectionStatus::ClosingHandshakeInitiated);
    assert!(recorder.disconnects.is_empty());

    conn.handle_timeout(now + Duration::from_millis(100), &mut recorder);
    assert_eq!(conn.status(), ConnectionStatus::Closed);
    assert!(matches!(recorder.disconnect(), Err(Error::CloseTimeout)));
    assert_eq!(conn.poll_timeout(), None);

    // A late acknowledgment is ignored
    conn.receive(&close_frame(CloseCode::Normal, ""), &mut recorder);
    assert_eq!(recorder.disconnects.len(), 1);
}

#[test]
fn test_close_timeout_defaults_to_config() {
    let config = WebSocketConfig::default().with_close_timeout(Duration::from_secs(3));
    let (mut conn, mut recorder) = open_connection_with(config);
    let now = Instant::now();
    conn.initiate_close(CloseCode::Normal, "", None, now, &mut recorder).unwrap();
    assert_eq!(conn.poll_timeout(), Some(now + Duration::from_secs(3)));
}

#[test]
fn test_peer_initiated_close_is_echoed() {
    let (mut conn, mut recorder) = open_connection();
    conn.receive(&close_frame(CloseCode::GoingAway, "server restart"), &mut recorder);

    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].opcode, OpCode::Close);
    assert!(frames[0].is_masked());
    assert_eq!(
        CloseInfo::parse(&frames[0].payload).unwrap(),
        CloseInfo::new(CloseCode::GoingAway, "server restart")
    );

    assert_eq!(conn.status(), ConnectionStatus::Closed);
    match recorder.disconnect() {
        Ok(info) => assert_eq!(info, &CloseInfo::new(CloseCode::GoingAway, "server restart")),
        Err(err) => panic!("expected clean close, got {}", err),
    }
}

#[test]
fn test_peer_close_without_status() {
    let (mut conn, mut recorder) = open_connection();
    conn.receive(&server_frame(Frame::new(true, OpCode::Close, Vec::<u8>::new())), &mut recorder);

    let frames = conn.transport_mut().take_frames();
    assert_eq!(
        CloseInfo::parse(&frames[0].payload).unwrap().code,
        CloseCode::Normal
    );
    match recorder.disconnect() {
        Ok(info) => assert_eq!(info.code, CloseCode::NoStatusReceived),
        Err(err) => panic!("expected clean close, got {}", err),
    }
}

#[test]
fn test_peer_close_with_reserved_code_echoes_normal() {
    let (mut conn, mut recorder) = open_connection();
    conn.receive(
        &server_frame(Frame::new(true, OpCode::Close, vec![0x03u8, 0xEE])),
        &mut recorder,
    );

    let frames = conn.transport_mut().take_frames();
    assert_eq!(
        CloseInfo::parse(&frames[0].payload).unwrap(),
        CloseInfo::new(CloseCode::Normal, "")
    );
    assert!(recorder.disconnect().is_ok());
}

#[test]
fn test_frames_after_peer_close_are_ignored() {
    let (mut conn, mut recorder) = open_connection();
    let mut wire = close_frame(CloseCode::Normal, "");
    wire.extend(server_frame(Frame::text("trailing")));
    conn.receive(&wire, &mut recorder);

    assert!(recorder.messages.is_empty());
    assert_eq!(recorder.disconnects.len(), 1);
}

#[test]
fn test_messages_still_delivered_while_closing() {
    let (mut conn, mut recorder) = open_connection();
    conn.initiate_close(CloseCode::Normal, "", None, Instant::now(), &mut recorder)
        .unwrap();

    conn.receive(&server_frame(Frame::text("in flight")), &mut recorder);
    assert_eq!(recorder.messages, vec!["in flight".to_string()]);
    assert_eq!(conn.status(), ConnectionStatus::ClosingHandshakeInitiated);
}

#[test]
fn test_no_pong_once_closing() {
    let (mut conn, mut recorder) = open_connection();
    conn.initiate_close(CloseCode::Normal, "", None, Instant::now(), &mut recorder)
        .unwrap();
    conn.transport_mut().written.clear();

    conn.receive(&server_frame(Frame::ping("late")), &mut recorder);
    assert_eq!(recorder.pings.len(), 1);
    assert!(conn.transport().written.is_empty());
}

#[test]
fn test_writes_rejected_after_close_started() {
    let (mut conn, mut recorder) = open_connection();
    conn.initiate_close(CloseCode::Normal, "", None, Instant::now(), &mut recorder)
        .unwrap();

    assert_eq!(
        conn.send_text("too late", &mut recorder),
        Err(WriteError::InvalidState(ConnectionStatus::ClosingHandshakeInitiated))
    );
    assert_eq!(
        conn.initiate_close(CloseCode::Normal, "", None, Instant::now(), &mut recorder),
        Err(WriteError::InvalidState(ConnectionStatus::ClosingHandshakeInitiated))
    );
}

#[test]
fn test_invalid_close_request_leaves_connection_open() {
    let (mut conn, mut recorder) = open_connection();
    let now = Instant::now();
    assert_eq!(
        conn.initiate_close(CloseCode::NoStatusReceived, "", None, now, &mut recorder),
        Err(WriteError::InvalidCloseCode(1005))
    );
    assert_eq!(
        conn.initiate_close(CloseCode::Normal, &"r".repeat(124), None, now, &mut recorder),
        Err(WriteError::CloseReasonTooLong(124))
    );
    assert_eq!(conn.status(), ConnectionStatus::Open);
    assert_eq!(conn.poll_timeout(), None);
}

#[test]
fn test_close_from_another_thread() {
    let (mut conn, mut recorder) = open_connection();
    let writer = conn.writer();
    std::thread::spawn(move || writer.write_close(CloseCode::Normal, "from worker"))
        .join()
        .unwrap()
        .unwrap();

    conn.on_writable(&mut recorder);
    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames[0].opcode, OpCode::Close);

    conn.receive(&close_frame(CloseCode::Normal, ""), &mut recorder);
    match recorder.disconnect() {
        Ok(info) => assert_eq!(info.reason, "from worker"),
        Err(err) => panic!("expected clean close, got {}", err),
    }
}

#[test]
fn test_unbounded_close_timeout_waits_for_peer() {
    let (mut conn, mut recorder) = open_connection();
    let now = Instant::now();
    conn.initiate_close(CloseCode::Normal, "", Some(Duration::MAX), now, &mut recorder)
        .unwrap();
    assert_eq!(conn.status(), ConnectionStatus::ClosingHandshakeInitiated);
    assert_eq!(conn.poll_timeout(), None);

    conn.handle_timeout(now + Duration::from_secs(86_400), &mut recorder);
    assert_eq!(conn.status(), ConnectionStatus::ClosingHandshakeInitiated);
    assert!(recorder.disconnects.is_empty());

    conn.receive(&close_frame(CloseCode::Normal, ""), &mut recorder);
    assert!(recorder.disconnect().is_ok());
    assert_eq!(conn.status(), ConnectionStatus::Closed);
}

#[test]
fn test_peer_close_after_local_close_is_acknowledgment() {
    let (mut conn, mut recorder) = open_connection();
    conn.writer().write_close(CloseCode::GoingAway, "bye").unwrap();

    conn.receive(&close_frame(CloseCode::GoingAway, "server"), &mut recorder);
    let frames = conn.transport_mut().take_frames();
    assert_eq!(frames.len(), 1, "only our own Close goes out");
    assert_eq!(
        CloseInfo::parse(&frames[0].payload).unwrap(),
        CloseInfo::new(CloseCode::GoingAway, "bye")
    );
    match recorder.disconnect() {
        Ok(info) => assert_eq!(info, &CloseInfo::new(CloseCode::GoingAway, "bye")),
        Err(err) => panic!("expected clean close, got {}", err),
    }
}
