//! End-to-end chunk stream exchanges over in-memory and TCP streams

use std::time::Duration;

use rtmp_chunk::protocol::constants::*;
use rtmp_chunk::{
    AssemblerConfig, ChunkAssembler, Connection, ConnectionConfig, Event, Flow, MessageHeader,
    Transport,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Server connection forwarding every reassembled message to a channel
fn collecting_server(
    config: ConnectionConfig,
) -> (Connection, mpsc::UnboundedReceiver<(MessageHeader, Vec<u8>)>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let assembler = ChunkAssembler::new(
        AssemblerConfig::default(),
        move |header: &MessageHeader, payload: &[u8]| {
            if tx.send((*header, payload.to_vec())).is_err() {
                return Flow::Abort;
            }
            Flow::Continue
        },
    );
    let conn = Connection::server(config)
        .unwrap()
        .with_chunk_handler(assembler);
    (conn, rx)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

#[tokio::test]
async fn test_messages_cross_duplex_stream() {
    init_tracing();
    let (client_io, server_io) = tokio::io::duplex(16 * 1024);

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let (server_conn, mut messages) = collecting_server(ConnectionConfig::default());
    let server_conn = server_conn.with_event_handler(move |event: Event| {
        let _ = events_tx.send(event);
    });

    let server = tokio::spawn(async move {
        let mut transport = Transport::new(server_io, server_conn);
        transport.handshake().await?;
        transport.run().await?;
        Ok::<_, rtmp_chunk::Error>(transport.connection().stats())
    });

    let mut client = Transport::new(
        client_io,
        Connection::client(ConnectionConfig::default()).unwrap(),
    );
    client.handshake().await.unwrap();

    // larger than the duplex buffer, so flushing interleaves with the reader
    let sent = [
        (MSG_COMMAND_AMF0, 3, 0, payload(120)),
        (MSG_VIDEO, 6, 1, payload(100_000)),
        (MSG_AUDIO, 4, 1, payload(300)),
        (MSG_DATA_AMF0, 5, 1, Vec::new()),
        (MSG_VIDEO, 6, 1, payload(9_000)),
    ];
    for (i, (message_type, csid, msid, data)) in sent.iter().enumerate() {
        client
            .send_message(*message_type, *csid, *msid, i as u32 * 40, data)
            .await
            .unwrap();
    }
    drop(client);

    // the client announced its 4096 byte chunk size first
    let stats = server.await.unwrap().unwrap();
    assert_eq!(stats.messages_received, sent.len() as u64 + 1);

    for (i, (message_type, csid, msid, data)) in sent.iter().enumerate() {
        let (header, body) = messages.recv().await.unwrap();
        assert_eq!(header.message_type, *message_type);
        assert_eq!(header.chunk_stream_id, *csid);
        assert_eq!(header.message_stream_id, *msid);
        assert_eq!(header.timestamp, i as u32 * 40);
        assert_eq!(&body, data);
    }
    assert!(messages.try_recv().is_err());

    let mut events = Vec::new();
    while let Ok(event) = events_rx.try_recv() {
        events.push(event);
    }
    assert_eq!(
        events.iter().filter(|e| **e == Event::ConnectSuccess).count(),
        1
    );
    assert_eq!(events.last(), Some(&Event::Interrupted));
}

#[tokio::test]
async fn test_small_chunks_between_tcp_peers() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    // the server keeps the protocol default chunk size, so it writes nothing
    // after the handshake and the client can close without unread input
    let server = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let (conn, messages) =
            collecting_server(ConnectionConfig::default().chunk_size(DEFAULT_CHUNK_SIZE));
        let mut transport = Transport::new(socket, conn);
        transport.handshake().await.unwrap();
        transport.run().await.unwrap();
        (transport.connection().peer_chunk_size(), messages)
    });

    let mut client = Transport::connect(
        addr,
        ConnectionConfig::default().chunk_size(64),
        Duration::from_secs(5),
    )
    .await
    .unwrap();
    assert!(client.connection().is_connected());
    // announced while the handshake completed
    assert_eq!(client.connection().self_chunk_size(), 64);

    let data = payload(1_000);
    let csid = client
        .connection_mut()
        .send_message_auto(MSG_VIDEO, 1, 0, &data)
        .unwrap();
    assert_eq!(csid, CSID_FIRST_USER);
    client.flush().await.unwrap();

    client.send_message(MSG_VIDEO, csid, 1, 33, &data).await.unwrap();
    client.close().await.unwrap();
    assert!(client.connection().is_closed());

    let (peer_chunk_size, mut messages) = server.await.unwrap();
    assert_eq!(peer_chunk_size, 64);

    let (first, body) = messages.recv().await.unwrap();
    assert_eq!(first.chunk_stream_id, CSID_FIRST_USER);
    assert_eq!(first.timestamp, 0);
    assert_eq!(body, data);
    let (second, body) = messages.recv().await.unwrap();
    assert_eq!(second.timestamp, 33);
    assert_eq!(body, data);
}
