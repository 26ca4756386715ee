//! End-to-end relay tests over real loopback sockets.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use line_relay::RelayError;

mod common;
use common::{start_relay, Peer};

const UPLOAD_NOTICE: &str = "Disconnected due to exceeding uploaded bytes limit\n";
const DOWNLOAD_NOTICE: &str = "Disconnected due to exceeding downloaded bytes limit\n";

/// Time for the relay to register freshly-accepted connections.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn line_is_broadcast_verbatim_and_not_echoed() {
    let (addr, _handle, _serve) = start_relay(1_000_000, 10).await;

    let mut a = Peer::connect(addr).await;
    let mut b = Peer::connect(addr).await;
    settle().await;

    a.writer.write_all(b"hello relay\n").await.unwrap();

    let received = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
    assert_eq!(received, "hello relay\n", "delimiter must be forwarded too");

    // The sender must not hear its own message back.
    let echo = timeout(Duration::from_millis(300), a.read_line()).await;
    assert!(echo.is_err(), "message was echoed to its sender");
}

#[tokio::test]
async fn messages_from_one_sender_arrive_in_order() {
    let (addr, _handle, _serve) = start_relay(1_000_000, 10).await;

    let mut a = Peer::connect(addr).await;
    let mut b = Peer::connect(addr).await;
    settle().await;

    a.writer.write_all(b"first\nsecond\nthird\n").await.unwrap();

    for expected in ["first\n", "second\n", "third\n"] {
        let received = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
        assert_eq!(received, expected);
    }
}

#[tokio::test]
async fn oversized_message_gets_upload_notice_then_disconnect() {
    let (addr, _handle, _serve) = start_relay(100, 10).await;

    let mut a = Peer::connect(addr).await;
    settle().await;

    // 100 payload bytes plus the delimiter: 101 >= 100.
    let line = format!("{}\n", "a".repeat(100));
    a.writer.write_all(line.as_bytes()).await.unwrap();

    let notice = timeout(Duration::from_secs(2), a.read_line()).await.unwrap();
    assert_eq!(notice, UPLOAD_NOTICE);

    let mut rest = Vec::new();
    let eof = timeout(Duration::from_secs(2), a.reader.read_to_end(&mut rest)).await;
    match eof {
        Ok(Ok(0)) => {}
        Ok(Ok(n)) => panic!("unexpected {} bytes after the notice", n),
        // Reset is also an acceptable form of disconnect.
        Ok(Err(_)) => {}
        Err(_) => panic!("peer was not disconnected after the notice"),
    }
}

#[tokio::test]
async fn cumulative_sends_under_the_limit_stay_connected() {
    let (addr, _handle, _serve) = start_relay(100, 10).await;

    let mut a = Peer::connect(addr).await;
    let mut b = Peer::connect(addr).await;
    settle().await;

    // Four lines of 24 bytes each: 96 < 100.
    let line = format!("{}\n", "b".repeat(23));
    for _ in 0..4 {
        a.writer.write_all(line.as_bytes()).await.unwrap();
    }

    for _ in 0..4 {
        let received = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
        assert_eq!(received, line);
    }

    // No notice, no disconnect.
    let nothing = timeout(Duration::from_millis(300), a.read_line()).await;
    assert!(nothing.is_err(), "sender under the limit must stay connected");
}

#[tokio::test]
async fn receiver_over_the_limit_is_disconnected_by_the_egress_path() {
    let (addr, _handle, _serve) = start_relay(100, 10).await;

    let mut a = Peer::connect(addr).await;
    let mut b = Peer::connect(addr).await;
    let mut c = Peer::connect(addr).await;
    settle().await;

    // Two senders at 60 bytes each stay under their own upload limits, but
    // push the common receiver to 120 downloaded bytes.
    let from_a = format!("{}\n", "a".repeat(59));
    let from_c = format!("{}\n", "c".repeat(59));
    a.writer.write_all(from_a.as_bytes()).await.unwrap();
    c.writer.write_all(from_c.as_bytes()).await.unwrap();

    // B gets both messages (cross-sender order is unspecified), then the
    // notice: the over-the-top message is delivered before the disconnect.
    let first = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
    let second = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
    let mut got = [first, second];
    got.sort();
    assert_eq!(got, [from_a.clone(), from_c.clone()]);

    let notice = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
    assert_eq!(notice, DOWNLOAD_NOTICE);

    // The senders each downloaded 60 bytes and stay connected.
    let received = timeout(Duration::from_secs(2), a.read_line()).await.unwrap();
    assert_eq!(received, from_c);
    let received = timeout(Duration::from_secs(2), c.read_line()).await.unwrap();
    assert_eq!(received, from_a);
}

#[tokio::test]
async fn slow_consumer_is_evicted_without_blocking_the_sender() {
    let (addr, _handle, _serve) = start_relay(u64::MAX, 1).await;

    let mut a = Peer::connect(addr).await;
    // B never reads: its socket buffers fill, then its one-slot queue.
    let mut b = Peer::connect(addr).await;
    settle().await;

    // Push well past any kernel buffering. If the fan-out ever blocked on B,
    // this loop would wedge and the test would time out.
    let line = format!("{}\n", "x".repeat(64 * 1024 - 1));
    let flood = async {
        for _ in 0..100 {
            a.writer.write_all(line.as_bytes()).await.unwrap();
        }
    };
    timeout(Duration::from_secs(10), flood)
        .await
        .expect("sender was blocked by a slow consumer");

    // The writes returning only means the kernel took the bytes; the relay
    // keeps reading and fanning out flood lines for a while after. A fresh
    // peer joining mid-flood would be evicted as a slow consumer in its own
    // right, so let the residue drain before connecting anyone new.
    tokio::time::sleep(Duration::from_secs(2)).await;

    // The relay still works for everyone else.
    let mut c = Peer::connect(addr).await;
    settle().await;
    a.writer.write_all(b"after the flood\n").await.unwrap();
    let received = timeout(Duration::from_secs(2), c.read_line()).await.unwrap();
    assert_eq!(received, "after the flood\n");

    // B was torn down: its connection ends (EOF or reset) once the
    // in-flight write is abandoned.
    let drained = async {
        let mut sink = vec![0u8; 64 * 1024];
        loop {
            match b.reader.read(&mut sink).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
        }
    };
    timeout(Duration::from_secs(5), drained)
        .await
        .expect("evicted consumer was never disconnected");
}

#[tokio::test]
async fn shutdown_stops_accepting_but_lets_sessions_drain() {
    let (addr, handle, serve) = start_relay(1_000_000, 10).await;

    let mut a = Peer::connect(addr).await;
    let mut b = Peer::connect(addr).await;
    settle().await;

    handle.shutdown();
    let result = timeout(Duration::from_secs(2), serve)
        .await
        .expect("serve did not return after shutdown")
        .unwrap();
    assert!(matches!(result, Err(RelayError::ShuttingDown)));

    // The listener is gone; new peers are refused.
    let refused = TcpStream::connect(addr).await;
    assert!(refused.is_err(), "listener still accepting after shutdown");

    // Established sessions keep relaying.
    a.writer.write_all(b"still here\n").await.unwrap();
    let received = timeout(Duration::from_secs(2), b.read_line()).await.unwrap();
    assert_eq!(received, "still here\n");
}
