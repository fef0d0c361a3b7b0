mod common;

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use common::*;
use framelink::{AppError, ClientEngine, ConnectionId, EngineState, PacketStream};

fn recording(echo: bool, welcome: bool) -> (RecordingServer, Recorder) {
    let recorder = Recorder::default();
    (
        RecordingServer {
            recorder: recorder.clone(),
            echo,
            welcome,
        },
        recorder,
    )
}

#[tokio::test]
async fn echo_single_string() {
    let (handler, server_rec) = recording(true, false);
    let fixture = start_server(local_config(4, 1024), handler).await;

    let client_rec = Recorder::default();
    let client = ClientEngine::new(
        "127.0.0.1",
        fixture.addr.port(),
        1024,
        RecordingClient {
            recorder: client_rec.clone(),
        },
    );
    client.connect().await.unwrap();

    let mut packet = PacketStream::new();
    packet.write(&"hello".to_string()).unwrap();
    client.send(packet).await.unwrap();

    wait_until("server receives the message", || server_rec.message_count() == 1).await;
    assert_eq!(server_rec.messages(), vec!["hello"]);

    wait_until("client receives the echo", || client_rec.message_count() == 1).await;
    assert_eq!(client_rec.messages(), vec!["hello"]);

    client.disconnect().await.unwrap();
    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn split_packet_two_messages_one_write() {
    let (handler, server_rec) = recording(false, false);
    let fixture = start_server(local_config(4, 1024), handler).await;

    let mut socket = TcpStream::connect(fixture.addr).await.unwrap();
    let mut wire = string_frame("a");
    wire.extend_from_slice(&string_frame("bc"));
    write_all(&mut socket, &wire).await;

    wait_until("both messages arrive", || server_rec.message_count() == 2).await;
    assert_eq!(server_rec.messages(), vec!["a", "bc"]);

    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn merged_packet_one_message_two_reads() {
    // A raw server delivers one frame in two pieces; the client engine must
    // dispatch exactly once.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let client_rec = Recorder::default();
    let client = ClientEngine::new(
        "127.0.0.1",
        addr.port(),
        1024,
        RecordingClient {
            recorder: client_rec.clone(),
        },
    );

    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let wire = string_frame("hello world");
        write_all(&mut socket, &wire[..3]).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        write_all(&mut socket, &wire[3..]).await;
        // keep the socket open long enough for the client to drain it
        tokio::time::sleep(Duration::from_millis(200)).await;
    });

    client.connect().await.unwrap();
    wait_until("the single message arrives", || client_rec.message_count() >= 1).await;
    assert_eq!(client_rec.messages(), vec!["hello world"]);

    client.disconnect().await.unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn per_connection_ordering_is_preserved() {
    let (handler, server_rec) = recording(false, false);
    let fixture = start_server(local_config(4, 4096), handler).await;

    let client_rec = Recorder::default();
    let client = ClientEngine::new(
        "127.0.0.1",
        fixture.addr.port(),
        4096,
        RecordingClient {
            recorder: client_rec.clone(),
        },
    );
    client.connect().await.unwrap();

    let expected: Vec<String> = (0..50).map(|i| format!("message-{i}")).collect();
    for text in &expected {
        let mut packet = PacketStream::new();
        packet.write(text).unwrap();
        client.send(packet).await.unwrap();
    }

    wait_until("all messages arrive", || server_rec.message_count() == 50).await;
    assert_eq!(server_rec.messages(), expected);

    client.disconnect().await.unwrap();
    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn oversize_frame_disconnects_only_the_offender() {
    let (handler, server_rec) = recording(true, false);
    let fixture = start_server(local_config(4, 64), handler).await;

    let bystander_rec = Recorder::default();
    let bystander = ClientEngine::new(
        "127.0.0.1",
        fixture.addr.port(),
        64,
        RecordingClient {
            recorder: bystander_rec.clone(),
        },
    );
    bystander.connect().await.unwrap();
    wait_until("both clients register", || fixture.engine.client_count() == 1).await;

    let mut offender = TcpStream::connect(fixture.addr).await.unwrap();
    wait_until("offender registers", || fixture.engine.client_count() == 2).await;
    write_all(&mut offender, &1024u32.to_le_bytes()).await;

    wait_until("offender is disconnected", || server_rec.disconnected() == 1).await;
    let mut probe = [0u8; 1];
    let closed = timeout(Duration::from_secs(2), offender.read(&mut probe)).await;
    assert!(matches!(closed, Ok(Ok(0)) | Ok(Err(_))), "offender socket still open");

    // The bystander is untouched and still echoes.
    assert_eq!(fixture.engine.client_count(), 1);
    let mut packet = PacketStream::new();
    packet.write(&"still here".to_string()).unwrap();
    bystander.send(packet).await.unwrap();
    wait_until("bystander echo", || bystander_rec.message_count() == 1).await;
    assert_eq!(bystander_rec.messages(), vec!["still here"]);

    bystander.disconnect().await.unwrap();
    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn max_connections_refuses_the_fifth_without_leaking() {
    let (handler, server_rec) = recording(false, true);
    let fixture = start_server(local_config(4, 1024), handler).await;

    let mut admitted = Vec::new();
    for _ in 0..4 {
        let mut socket = TcpStream::connect(fixture.addr).await.unwrap();
        let welcome = timeout(Duration::from_secs(2), read_string(&mut socket))
            .await
            .expect("welcome packet");
        assert_eq!(welcome, "welcome");
        admitted.push(socket);
    }
    assert_eq!(server_rec.connected(), 4);
    assert_eq!(fixture.engine.stats().slices_in_use, 4);

    // The fifth connects at the TCP layer but the engine shuts it down.
    let mut refused = TcpStream::connect(fixture.addr).await.unwrap();
    let mut probe = [0u8; 1];
    let closed = timeout(Duration::from_secs(2), refused.read(&mut probe)).await;
    assert!(matches!(closed, Ok(Ok(0)) | Ok(Err(_))), "fifth socket still open");

    assert_eq!(server_rec.connected(), 4, "refused socket reached the handler");
    assert_eq!(fixture.engine.stats().slices_in_use, 4, "arena slice leaked");

    drop(admitted);
    wait_until("all slices return", || fixture.engine.stats().slices_in_use == 0).await;

    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn graceful_stop_disconnects_every_client_once() {
    let (handler, server_rec) = recording(false, false);
    let fixture = start_server(local_config(16, 1024), handler).await;

    let client_rec = Recorder::default();
    let mut clients = Vec::new();
    for _ in 0..10 {
        let client = ClientEngine::new(
            "127.0.0.1",
            fixture.addr.port(),
            1024,
            RecordingClient {
                recorder: client_rec.clone(),
            },
        );
        client.connect().await.unwrap();
        clients.push(client);
    }
    wait_until("all clients register", || server_rec.connected() == 10).await;

    fixture.engine.stop();
    let result = timeout(Duration::from_secs(5), fixture.task).await.unwrap();
    result.unwrap().unwrap();

    wait_until("every client observes the close", || client_rec.disconnected() == 10).await;
    assert_eq!(client_rec.disconnected(), 10);
    assert_eq!(server_rec.disconnected(), 10);
    drop(clients);
}

#[tokio::test]
async fn stop_is_idempotent() {
    let (handler, _server_rec) = recording(false, false);
    let fixture = start_server(local_config(2, 1024), handler).await;

    fixture.engine.stop();
    assert_eq!(fixture.engine.state(), EngineState::Stopping);
    fixture.engine.stop();
    assert_eq!(fixture.engine.state(), EngineState::Stopping);

    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn start_while_running_is_rejected() {
    let (handler, _server_rec) = recording(false, false);
    let fixture = start_server(local_config(2, 1024), handler).await;

    assert!(matches!(
        fixture.engine.start().await,
        Err(AppError::AlreadyRunning)
    ));

    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn disconnect_returns_the_read_op_and_slice() {
    let (handler, server_rec) = recording(true, false);
    let fixture = start_server(local_config(3, 1024), handler).await;

    let client_rec = Recorder::default();
    let client = ClientEngine::new(
        "127.0.0.1",
        fixture.addr.port(),
        1024,
        RecordingClient {
            recorder: client_rec.clone(),
        },
    );
    client.connect().await.unwrap();

    let mut packet = PacketStream::new();
    packet.write(&"ping".to_string()).unwrap();
    client.send(packet).await.unwrap();
    wait_until("message handled", || server_rec.message_count() == 1).await;
    assert_eq!(fixture.engine.stats().slices_in_use, 1);

    client.disconnect().await.unwrap();
    wait_until("teardown completes", || server_rec.disconnected() == 1).await;

    let stats = fixture.engine.stats();
    assert_eq!(stats.slices_in_use, 0);
    assert_eq!(stats.receive_ops_available, 3);
    assert_eq!(stats.send_ops_available, 3);
    assert_eq!(stats.arena_bytes, 3 * 1024);

    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn disconnect_client_by_identity() {
    let (handler, server_rec) = recording(false, false);
    let fixture = start_server(local_config(2, 1024), handler).await;

    let client_rec = Recorder::default();
    let client = ClientEngine::new(
        "127.0.0.1",
        fixture.addr.port(),
        1024,
        RecordingClient {
            recorder: client_rec.clone(),
        },
    );
    client.connect().await.unwrap();
    wait_until("client registers", || fixture.engine.client_count() == 1).await;

    let id = fixture.engine.clients()[0];
    fixture.engine.disconnect_client(id).unwrap();

    wait_until("client observes the close", || client_rec.disconnected() == 1).await;
    assert_eq!(fixture.engine.client_count(), 0);

    // The identity is gone now.
    assert!(matches!(
        fixture.engine.disconnect_client(id),
        Err(AppError::ClientNotFound(_))
    ));
    assert!(matches!(
        fixture.engine.disconnect_client(ConnectionId::new()),
        Err(AppError::ClientNotFound(_))
    ));

    fixture.engine.stop();
    fixture.task.await.unwrap().unwrap();
}
