use std::future::Future;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use bytes::Bytes;
use peer_wire::{
    inspect_peer, Config, ConnectionConfig, ConnectionState, FailurePhase, Handshake, Message, MessageId, PeerConnection,
    PeerWireError,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

const INFO_HASH: [u8; 20] = [0x11; 20];
const CLIENT_ID: [u8; 20] = *b"-PW0100-client000001";
const REMOTE_ID: [u8; 20] = *b"-MK0001-remote000001";

/// Run a scripted mock peer on an ephemeral port
async fn spawn_peer<F, Fut, T>(script: F) -> (SocketAddr, JoinHandle<T>)
where
    F: FnOnce(TcpStream) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(stream).await
    });
    (addr, handle)
}

/// Read the client's handshake and answer with one for `info_hash`
async fn answer_handshake(stream: &mut TcpStream, info_hash: [u8; 20]) -> Handshake {
    let mut buf = [0u8; 68];
    stream.read_exact(&mut buf).await.unwrap();
    let theirs = Handshake::deserialize(&buf).unwrap();
    stream
        .write_all(&Handshake::new(info_hash, REMOTE_ID).serialize())
        .await
        .unwrap();
    theirs
}

async fn send(stream: &mut TcpStream, message: &Message) {
    stream.write_all(&message.serialize()).await.unwrap();
}

/// True if the other end closed its socket within two seconds
async fn peer_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    matches!(
        timeout(Duration::from_secs(2), stream.read(&mut buf)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

fn fast_config() -> ConnectionConfig {
    ConnectionConfig {
        dial_timeout_ms: 1_000,
        handshake_timeout_ms: 300,
        bitfield_timeout_ms: 300,
        ..ConnectionConfig::default()
    }
}

fn bitfield(bytes: &'static [u8]) -> Message {
    Message::Bitfield { bitfield: Bytes::from_static(bytes) }
}

#[tokio::test]
async fn test_setup_reports_bitfield_and_starts_choked() {
    let payload: &'static [u8] = &[0b1010_0000, 0b0000_0001];
    let (addr, peer) = spawn_peer(move |mut stream| async move {
        let theirs = answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(payload)).await;
        (theirs, peer_closed(&mut stream).await)
    })
    .await;

    let mut conn = PeerConnection::connect(addr, INFO_HASH, CLIENT_ID).await.unwrap();

    assert!(conn.choked());
    assert_eq!(conn.state(), ConnectionState::Ready);
    assert_eq!(conn.remote_peer_id(), REMOTE_ID);
    assert_eq!(conn.info_hash(), INFO_HASH);
    for index in 0..16 {
        let expected = (payload[index / 8] >> (7 - index % 8)) & 1 == 1;
        assert_eq!(conn.has_piece(index), expected, "piece {}", index);
    }
    assert!(!conn.has_piece(16));

    conn.close().await;
    assert_eq!(conn.state(), ConnectionState::Closed);

    let (theirs, closed) = peer.await.unwrap();
    assert_eq!(theirs.info_hash, INFO_HASH);
    assert_eq!(theirs.peer_id, CLIENT_ID);
    assert_eq!(theirs.reserved, [0u8; 8]);
    assert!(closed);
}

#[tokio::test]
async fn test_first_message_not_bitfield_is_rejected() {
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &Message::Interested).await;
        peer_closed(&mut stream).await
    })
    .await;

    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap_err();

    match err {
        PeerWireError::UnexpectedMessage { expected, received, .. } => {
            assert_eq!(expected, MessageId::Bitfield);
            assert_eq!(received, 2);
        }
        other => panic!("unexpected error: {}", other),
    }
    assert!(peer.await.unwrap(), "socket was not closed after rejection");
}

#[tokio::test]
async fn test_silent_peer_times_out_in_handshake() {
    let (addr, peer) = spawn_peer(|stream| async move {
        sleep(Duration::from_secs(5)).await;
        drop(stream);
    })
    .await;

    let started = Instant::now();
    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap_err();

    assert!(matches!(err, PeerWireError::HandshakeError { .. }), "got {}", err);
    assert!(started.elapsed() < Duration::from_secs(2));
    peer.abort();
}

#[tokio::test]
async fn test_wrong_protocol_identifier_fails_handshake() {
    let (addr, peer) = spawn_peer(|mut stream| async move {
        let mut buf = [0u8; 68];
        stream.read_exact(&mut buf).await.unwrap();
        let mut reply = Handshake::new(INFO_HASH, REMOTE_ID).serialize();
        reply[0] = 18;
        stream.write_all(&reply).await.unwrap();
        peer_closed(&mut stream).await
    })
    .await;

    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap_err();

    assert!(matches!(err, PeerWireError::HandshakeError { .. }), "got {}", err);
    assert!(err.to_string().contains("protocol length"));
    assert!(peer.await.unwrap());
}

#[tokio::test]
async fn test_info_hash_mismatch_only_fails_when_strict() {
    let other_hash = [0x22; 20];

    let (addr, _peer) = spawn_peer(move |mut stream| async move {
        answer_handshake(&mut stream, other_hash).await;
        send(&mut stream, &bitfield(&[0xff])).await;
        peer_closed(&mut stream).await
    })
    .await;
    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    assert!(conn.has_piece(7));
    conn.close().await;

    let (addr, peer) = spawn_peer(move |mut stream| async move {
        answer_handshake(&mut stream, other_hash).await;
        send(&mut stream, &bitfield(&[0xff])).await;
        peer_closed(&mut stream).await
    })
    .await;
    let strict = ConnectionConfig {
        strict_info_hash: true,
        ..fast_config()
    };
    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &strict)
        .await
        .unwrap_err();
    assert!(matches!(err, PeerWireError::HandshakeError { .. }), "got {}", err);
    assert!(peer.await.unwrap());
}

#[tokio::test]
async fn test_keepalive_before_bitfield_is_skipped() {
    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &Message::KeepAlive).await;
        send(&mut stream, &bitfield(&[0b0100_0000])).await;
        peer_closed(&mut stream).await
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    assert!(conn.has_piece(1));
    assert!(!conn.has_piece(0));
    conn.close().await;
}

#[tokio::test]
async fn test_missing_bitfield_times_out() {
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        peer_closed(&mut stream).await
    })
    .await;

    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerWireError::IoError { .. }), "got {}", err);
    assert!(peer.await.unwrap());
}

#[tokio::test]
async fn test_dial_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap_err();
    assert!(matches!(err, PeerWireError::DialError { .. }), "got {}", err);
}

#[tokio::test]
async fn test_dial_timeout() {
    // Non-routable; hosts without a route fail fast with DialError as well
    let addr: SocketAddr = "10.255.255.1:6881".parse().unwrap();
    let config = ConnectionConfig {
        dial_timeout_ms: 200,
        ..fast_config()
    };

    let started = Instant::now();
    let err = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &config)
        .await
        .unwrap_err();

    assert!(matches!(err, PeerWireError::DialError { .. }), "got {}", err);
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_send_operations_wire_bytes() {
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0x80])).await;
        let mut sent = vec![0u8; 5 + 5 + 5 + 9 + 17 + 5 + 4 + 17];
        stream.read_exact(&mut sent).await.unwrap();
        sent
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    conn.send_interested().await.unwrap();
    conn.send_not_interested().await.unwrap();
    conn.send_unchoke().await.unwrap();
    conn.send_have(42).await.unwrap();
    conn.send_request(3, 16384, 16384).await.unwrap();
    conn.send_choke().await.unwrap();
    conn.send_keepalive().await.unwrap();
    conn.send_cancel(3, 16384, 16384).await.unwrap();

    let sent = peer.await.unwrap();
    assert_eq!(&sent[0..5], &[0, 0, 0, 1, 2]);
    assert_eq!(&sent[5..10], &[0, 0, 0, 1, 3]);
    assert_eq!(&sent[10..15], &[0, 0, 0, 1, 1]);
    assert_eq!(&sent[15..24], &[0, 0, 0, 5, 4, 0, 0, 0, 42]);
    assert_eq!(
        Message::deserialize(&sent[24..41]).unwrap(),
        Message::Request { index: 3, begin: 16384, length: 16384 }
    );
    assert_eq!(&sent[41..46], &[0, 0, 0, 1, 0]);
    assert_eq!(&sent[46..50], &[0, 0, 0, 0]);
    assert_eq!(
        Message::deserialize(&sent[50..]).unwrap(),
        Message::Cancel { index: 3, begin: 16384, length: 16384 }
    );
    conn.close().await;
}

#[tokio::test]
async fn test_has_next_and_apply_message() {
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let (rest_tx, rest_rx) = oneshot::channel::<()>();
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0x00])).await;

        go_rx.await.unwrap();
        let unchoke = Message::Unchoke.serialize();
        stream.write_all(&unchoke[..1]).await.unwrap();
        rest_rx.await.unwrap();
        stream.write_all(&unchoke[1..]).await.unwrap();
        send(&mut stream, &Message::Have { piece_index: 3 }).await;
        peer_closed(&mut stream).await
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    assert!(!conn.has_next());

    go_tx.send(()).unwrap();
    let mut pending = false;
    for _ in 0..100 {
        if conn.has_next() {
            pending = true;
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    assert!(pending, "has_next never saw the first byte");

    rest_tx.send(()).unwrap();
    let message = conn.read().await.unwrap();
    assert_eq!(message, Message::Unchoke);
    assert!(conn.choked(), "read alone must not change choke state");
    conn.apply_message(&message);
    assert!(!conn.choked());

    let message = conn.read().await.unwrap();
    conn.apply_message(&message);
    assert!(conn.has_piece(3));

    conn.close().await;
    assert!(peer.await.unwrap());
}

#[tokio::test]
async fn test_read_is_resumable_after_external_timeout() {
    let (go_tx, go_rx) = oneshot::channel::<()>();
    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0x00])).await;

        let have = Message::Have { piece_index: 42 }.serialize();
        stream.write_all(&have[..6]).await.unwrap();
        go_rx.await.unwrap();
        stream.write_all(&have[6..]).await.unwrap();
        peer_closed(&mut stream).await
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();

    assert!(timeout(Duration::from_millis(100), conn.read()).await.is_err());
    go_tx.send(()).unwrap();
    assert_eq!(conn.read().await.unwrap(), Message::Have { piece_index: 42 });
    conn.close().await;
}

#[tokio::test]
async fn test_read_truncated_and_closed() {
    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0x00])).await;
        stream.write_all(&[0, 0, 0, 5, 4, 0]).await.unwrap();
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    let err = conn.read().await.unwrap_err();
    assert!(matches!(err, PeerWireError::Truncated { .. }), "got {}", err);

    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0x00])).await;
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    let err = conn.read().await.unwrap_err();
    assert!(matches!(err, PeerWireError::IoError { .. }), "got {}", err);
}

#[tokio::test]
async fn test_operations_after_close_fail() {
    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0xf0])).await;
        peer_closed(&mut stream).await
    })
    .await;

    let mut conn = PeerConnection::connect_with_config(addr, INFO_HASH, CLIENT_ID, &fast_config())
        .await
        .unwrap();
    let snapshot = conn.snapshot();
    conn.close().await;
    conn.close().await;

    assert!(!conn.has_next());
    assert!(matches!(conn.read().await, Err(PeerWireError::ConnectionClosed { .. })));
    assert!(matches!(
        conn.send_request(0, 0, 16384).await,
        Err(PeerWireError::ConnectionClosed { .. })
    ));
    assert!(conn.has_piece(0));
    assert_eq!(snapshot.state, ConnectionState::Ready);
    assert_eq!(snapshot.piece_count(), 4);
}

fn inspect_config(interested: bool) -> Config {
    Config {
        peers: Vec::new(),
        info_hash: INFO_HASH,
        peer_id: CLIENT_ID,
        connection: ConnectionConfig {
            read_timeout_ms: 300,
            ..fast_config()
        },
        interested,
        max_messages: 4,
        json: false,
    }
}

#[tokio::test]
async fn test_inspect_reports_unchoke() {
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0b1010_0000])).await;
        let mut interested = [0u8; 5];
        stream.read_exact(&mut interested).await.unwrap();
        send(&mut stream, &Message::Unchoke).await;
        (interested, peer_closed(&mut stream).await)
    })
    .await;

    let report = inspect_peer(addr, &inspect_config(true)).await;
    assert!(report.error.is_none(), "got {:?}", report.error);
    assert_eq!(report.failed_during, None);
    assert_eq!(report.choked, Some(false));
    assert_eq!(report.pieces_held, Some(2));
    assert_eq!(report.messages_read, 1);

    let (interested, closed) = peer.await.unwrap();
    assert_eq!(interested, [0, 0, 0, 1, 2]);
    assert!(closed);
}

#[tokio::test]
async fn test_inspect_silent_peer_after_setup_is_session_failure() {
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        send(&mut stream, &bitfield(&[0xff])).await;
        let mut interested = [0u8; 5];
        stream.read_exact(&mut interested).await.unwrap();
        peer_closed(&mut stream).await
    })
    .await;

    let report = timeout(Duration::from_secs(3), inspect_peer(addr, &inspect_config(true)))
        .await
        .expect("inspection must give up on a silent peer");

    assert_eq!(report.failed_during, Some(FailurePhase::Session));
    assert!(report.error.as_deref().unwrap().contains("Timed out waiting for message"));
    assert_eq!(report.messages_read, 0);
    assert!(peer.await.unwrap(), "socket was not closed after the read timeout");
}

#[tokio::test]
async fn test_inspect_bitfield_phase_failures_are_setup_failures() {
    // peer hangs up right after the handshake
    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
    })
    .await;
    let report = inspect_peer(addr, &inspect_config(false)).await;
    assert_eq!(report.failed_during, Some(FailurePhase::Setup), "got {:?}", report.error);

    // no bitfield before the deadline
    let (addr, peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        peer_closed(&mut stream).await
    })
    .await;
    let report = inspect_peer(addr, &inspect_config(false)).await;
    assert_eq!(report.failed_during, Some(FailurePhase::Setup), "got {:?}", report.error);
    assert!(report.error.as_deref().unwrap().contains("bitfield"));
    assert!(peer.await.unwrap());

    // oversize first frame
    let (addr, _peer) = spawn_peer(|mut stream| async move {
        answer_handshake(&mut stream, INFO_HASH).await;
        stream.write_all(&[0xff, 0xff, 0xff, 0xff, 5]).await.unwrap();
        peer_closed(&mut stream).await
    })
    .await;
    let report = inspect_peer(addr, &inspect_config(false)).await;
    assert_eq!(report.failed_during, Some(FailurePhase::Setup), "got {:?}", report.error);
}
