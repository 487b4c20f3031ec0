//! Ingress/egress relay tests
//!
//! The two managers are wired back to back through in-process queues, so
//! these tests exercise the rendezvous and relay logic without the HTTP hop.

use evtun_proto::{Event, EventQueue};
use evtun_relay::{LegManager, TcpInput, TcpInputConfig, TcpOutput, TcpOutputConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

struct Harness {
    input: Arc<TcpInput>,
    output: Arc<TcpOutput>,
    listen_addr: SocketAddr,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Move events from one queue to another, standing in for the HTTP hop
async fn shuttle(from: Arc<EventQueue>, to: Arc<EventQueue>) {
    loop {
        let batch = from.drain_all();
        if batch.is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        } else {
            to.push_all(batch);
        }
    }
}

async fn start_relay(dest_addr: String, open_timeout: Duration) -> Harness {
    let to_egress = Arc::new(EventQueue::new());
    let to_ingress = Arc::new(EventQueue::new());

    let input_config = TcpInputConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        read_buffer_size: 1024,
        idle_interval: Duration::from_millis(1),
        open_timeout,
    };
    let input = Arc::new(TcpInput::bind(input_config, to_egress.clone()).await.unwrap());
    let listen_addr = input.local_addr().unwrap();

    let output_config = TcpOutputConfig {
        dest_addr,
        read_buffer_size: 1024,
        idle_interval: Duration::from_millis(1),
    };
    let output = Arc::new(TcpOutput::new(output_config, to_ingress.clone()));

    tokio::spawn(shuttle(to_egress, output.inbound().clone()));
    tokio::spawn(shuttle(to_ingress, input.inbound().clone()));
    tokio::spawn(input.clone().run());
    tokio::spawn(output.clone().run());

    Harness {
        input,
        output,
        listen_addr,
    }
}

/// Destination that echoes every byte back
async fn start_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (mut reader, mut writer) = socket.split();
                let _ = tokio::io::copy(&mut reader, &mut writer).await;
            });
        }
    });
    addr
}

/// An address nothing listens on
async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bytes_relayed_both_ways() {
    init_tracing();

    // Destination records what it receives, then answers
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = listener.local_addr().unwrap();
    let (received_tx, mut received_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        while received.len() < 11 {
            let n = socket.read(&mut buf).await.unwrap();
            assert!(n > 0);
            received.extend_from_slice(&buf[..n]);
        }
        received_tx.send(received).unwrap();
        socket.write_all(b"pong\x00\xff").await.unwrap();
        // Keep the connection open until the client goes away
        let _ = socket.read(&mut buf).await;
    });

    let harness = start_relay(dest_addr.to_string(), Duration::from_secs(5)).await;

    let mut client = TcpStream::connect(harness.listen_addr).await.unwrap();
    client.write_all(b"ping\x00\x01\x02\xfe").await.unwrap();
    client.write_all(b"end").await.unwrap();

    let received = timeout(Duration::from_secs(5), received_rx.recv())
        .await
        .expect("destination should receive the bytes")
        .unwrap();
    assert_eq!(received, b"ping\x00\x01\x02\xfeend");

    let mut reply = [0u8; 6];
    timeout(Duration::from_secs(5), client.read_exact(&mut reply))
        .await
        .expect("reply should arrive")
        .unwrap();
    assert_eq!(&reply, b"pong\x00\xff");

    assert_eq!(harness.input.registry().len(), 1);
    assert_eq!(harness.output.registry().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_open_timeout_when_destination_unreachable() {
    init_tracing();

    let dest_addr = unreachable_addr().await;
    let open_timeout = Duration::from_millis(200);
    let harness = start_relay(dest_addr.to_string(), open_timeout).await;

    let mut client = TcpStream::connect(harness.listen_addr).await.unwrap();
    let started = tokio::time::Instant::now();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(5), client.read(&mut buf))
        .await
        .expect("ingress should close the connection after the open timeout");
    assert!(matches!(read, Ok(0) | Err(_)));
    assert!(started.elapsed() >= open_timeout - Duration::from_millis(50));

    let input = harness.input.clone();
    assert!(wait_until(|| input.registry().is_empty()).await);
    assert!(harness.output.registry().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_client_close_closes_destination() {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = listener.local_addr().unwrap();
    let (eof_tx, mut eof_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => socket.write_all(&buf[..n]).await.unwrap(),
            }
        }
        eof_tx.send(()).unwrap();
    });

    let harness = start_relay(dest_addr.to_string(), Duration::from_secs(5)).await;

    let mut client = TcpStream::connect(harness.listen_addr).await.unwrap();
    client.write_all(b"hi").await.unwrap();
    let mut buf = [0u8; 2];
    timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    drop(client);

    timeout(Duration::from_secs(5), eof_rx.recv())
        .await
        .expect("destination should see the close")
        .unwrap();

    let input = harness.input.clone();
    let output = harness.output.clone();
    assert!(wait_until(|| input.registry().is_empty()).await);
    assert!(wait_until(|| output.registry().is_empty()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_destination_close_closes_client() {
    init_tracing();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dest_addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 5];
        socket.read_exact(&mut buf).await.unwrap();
        socket.write_all(b"bye").await.unwrap();
        // Dropping the socket closes the destination side
    });

    let harness = start_relay(dest_addr.to_string(), Duration::from_secs(5)).await;

    let mut client = TcpStream::connect(harness.listen_addr).await.unwrap();
    client.write_all(b"hello").await.unwrap();

    let mut received = Vec::new();
    timeout(Duration::from_secs(5), client.read_to_end(&mut received))
        .await
        .expect("client should see the close")
        .unwrap();
    assert_eq!(received, b"bye");

    let input = harness.input.clone();
    assert!(wait_until(|| input.registry().is_empty()).await);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_routing_miss_is_dropped() {
    init_tracing();

    let dest_addr = start_echo_server().await;
    let harness = start_relay(dest_addr.to_string(), Duration::from_secs(5)).await;

    let mut client = TcpStream::connect(harness.listen_addr).await.unwrap();
    client.write_all(b"one").await.unwrap();
    let mut buf = [0u8; 3];
    timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();

    // Stale traffic for legs that do not exist on either side
    harness
        .input
        .inbound()
        .push(Event::data("10.9.9.9:1", "10.9.9.9:2", b"stale".to_vec()));
    harness.input.inbound().push(Event::close("10.9.9.9:1", "10.9.9.9:2"));
    harness.input.inbound().push(Event::open("10.9.9.9:1", "10.9.9.9:2"));
    harness
        .output
        .inbound()
        .push(Event::data("10.9.9.9:2", "10.9.9.9:1", b"stale".to_vec()));
    harness.output.inbound().push(Event::close("10.9.9.9:2", "10.9.9.9:1"));

    tokio::time::sleep(Duration::from_millis(50)).await;

    client.write_all(b"two").await.unwrap();
    timeout(Duration::from_secs(5), client.read_exact(&mut buf))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf, b"two");
    assert_eq!(harness.input.registry().len(), 1);
    assert_eq!(harness.output.registry().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_connections_stay_separate() {
    init_tracing();

    let dest_addr = start_echo_server().await;
    let harness = start_relay(dest_addr.to_string(), Duration::from_secs(5)).await;

    let mut tasks = Vec::new();
    for i in 0..8u8 {
        let addr = harness.listen_addr;
        tasks.push(tokio::spawn(async move {
            let mut client = TcpStream::connect(addr).await.unwrap();
            let message = vec![i; 256];
            client.write_all(&message).await.unwrap();
            let mut echoed = vec![0u8; 256];
            timeout(Duration::from_secs(5), client.read_exact(&mut echoed))
                .await
                .unwrap()
                .unwrap();
            assert_eq!(echoed, message);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = TcpInputConfig {
        listen_addr: taken.local_addr().unwrap().to_string(),
        ..Default::default()
    };

    let result = TcpInput::bind(config, Arc::new(EventQueue::new())).await;
    assert!(matches!(result, Err(evtun_relay::RelayError::Bind { .. })));
}

#[tokio::test]
async fn test_egress_dial_failure_drops_open() {
    let next = Arc::new(EventQueue::new());
    let config = TcpOutputConfig {
        dest_addr: unreachable_addr().await.to_string(),
        ..Default::default()
    };
    let output = TcpOutput::new(config, next.clone());

    output.inbound().push(Event::open("127.0.0.1:40000", ""));
    assert_eq!(output.process_pending().await, 1);

    assert!(output.registry().is_empty());
    assert!(next.is_empty(), "no compensating event is sent");
}
