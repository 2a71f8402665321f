//! Integration tests for the echo server

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};
use rustecho::{Config, ConnectionManager, ServerError};

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.bind_addr = "127.0.0.1:0".parse().unwrap(); // Use any available port
    config.server.shutdown_timeout = Duration::from_secs(2);
    config
}

async fn start_server(
    config: Config,
) -> (Arc<ConnectionManager>, SocketAddr, JoinHandle<Result<(), ServerError>>) {
    let manager = Arc::new(ConnectionManager::new(Arc::new(config)));
    let addr = manager.bind().await.expect("bind should succeed");

    let server = Arc::clone(&manager);
    let handle = tokio::spawn(async move { server.accept_connections().await });

    (manager, addr, handle)
}

async fn wait_for_idle(manager: &ConnectionManager) {
    timeout(Duration::from_secs(2), async {
        while manager.active_connections() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("connections should drain");
}

#[tokio::test]
async fn test_echo_hello() {
    let (manager, addr, handle) = start_server(test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"hello\n").await.unwrap();

    let mut buffer = [0u8; 6];
    timeout(Duration::from_secs(2), stream.read_exact(&mut buffer))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buffer, b"hello\n");

    stream.shutdown().await.unwrap();
    let mut rest = Vec::new();
    timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty());

    wait_for_idle(&manager).await;
    manager.initiate_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_concurrent_clients_are_isolated() {
    let (manager, addr, handle) = start_server(test_config()).await;

    let mut client_a = TcpStream::connect(addr).await.unwrap();
    let mut client_b = TcpStream::connect(addr).await.unwrap();

    client_a.write_all(b"A").await.unwrap();
    client_b.write_all(b"B").await.unwrap();

    let mut echoed_a = [0u8; 1];
    let mut echoed_b = [0u8; 1];
    timeout(Duration::from_secs(2), client_a.read_exact(&mut echoed_a))
        .await
        .unwrap()
        .unwrap();
    timeout(Duration::from_secs(2), client_b.read_exact(&mut echoed_b))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed_a, b"A");
    assert_eq!(&echoed_b, b"B");

    // Nothing from the other connection may follow
    client_a.shutdown().await.unwrap();
    client_b.shutdown().await.unwrap();
    let mut rest_a = Vec::new();
    let mut rest_b = Vec::new();
    client_a.read_to_end(&mut rest_a).await.unwrap();
    client_b.read_to_end(&mut rest_b).await.unwrap();
    assert!(rest_a.is_empty());
    assert!(rest_b.is_empty());

    manager.initiate_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_many_concurrent_clients() {
    let (manager, addr, handle) = start_server(test_config()).await;

    let mut clients = Vec::new();
    for i in 0..20 {
        clients.push(tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let message = format!("Hello from client {}", i);
            stream.write_all(message.as_bytes()).await.unwrap();
            stream.shutdown().await.unwrap();

            let mut echoed = Vec::new();
            stream.read_to_end(&mut echoed).await.unwrap();
            echoed == message.as_bytes()
        }));
    }

    for client in clients {
        let matched = timeout(Duration::from_secs(5), client).await.unwrap().unwrap();
        assert!(matched);
    }

    let stats = manager.connection_stats().await;
    assert_eq!(stats.total_connections_accepted, 20);

    manager.initiate_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_connect_and_close_without_data() {
    let (manager, addr, handle) = start_server(test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.shutdown().await.unwrap();

    let mut echoed = Vec::new();
    timeout(Duration::from_secs(2), stream.read_to_end(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert!(echoed.is_empty());

    wait_for_idle(&manager).await;
    assert!(manager.active_connection_info().await.is_empty());

    manager.initiate_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_second_bind_on_same_port_fails() {
    let first = ConnectionManager::new(Arc::new(test_config()));
    let addr = first.bind().await.unwrap();

    let mut config = test_config();
    config.server.bind_addr = addr;
    let second = ConnectionManager::new(Arc::new(config));

    match second.bind().await {
        Err(ServerError::Bind { addr: failed, .. }) => assert_eq!(failed, addr),
        other => panic!("expected bind error, got {:?}", other),
    }

    // start() surfaces the same typed error through anyhow
    let err = second.start().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ServerError>(),
        Some(ServerError::Bind { .. })
    ));
}

#[tokio::test]
async fn test_large_payload_echoed_intact() {
    let mut config = test_config();
    config.server.buffer_size = 1024;
    let (manager, addr, handle) = start_server(config).await;

    let payload: Vec<u8> = (0..1_000_000u32).map(|i| (i * 31 % 256) as u8).collect();
    let expected = payload.clone();

    let stream = TcpStream::connect(addr).await.unwrap();
    let (mut reader, mut writer) = stream.into_split();

    let write_task = tokio::spawn(async move {
        writer.write_all(&payload).await.unwrap();
        writer.shutdown().await.unwrap();
    });

    let mut echoed = Vec::with_capacity(expected.len());
    timeout(Duration::from_secs(10), reader.read_to_end(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    write_task.await.unwrap();

    assert_eq!(echoed.len(), expected.len());
    assert!(echoed == expected);

    manager.initiate_shutdown();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutdown_closes_listener_and_connections() {
    let (manager, addr, handle) = start_server(test_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"ping").await.unwrap();
    let mut echoed = [0u8; 4];
    stream.read_exact(&mut echoed).await.unwrap();
    assert_eq!(manager.active_connections(), 1);

    assert!(manager.shutdown().await);
    timeout(Duration::from_secs(2), handle)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    // In-flight connection is closed by the server
    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .unwrap();
    assert!(matches!(read, Ok(0) | Err(_)));

    // Listening socket is gone
    assert!(TcpStream::connect(addr).await.is_err());
    assert_eq!(manager.active_connections(), 0);
}

#[tokio::test]
async fn test_reset_connection_does_not_affect_others() {
    let (manager, addr, handle) = start_server(test_config()).await;

    let mut healthy = TcpStream::connect(addr).await.unwrap();
    healthy.write_all(b"before").await.unwrap();
    let mut echoed = [0u8; 6];
    timeout(Duration::from_secs(2), healthy.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"before");

    // Abort a second connection with RST instead of FIN
    let mut aborted = TcpStream::connect(addr).await.unwrap();
    aborted.write_all(b"x").await.unwrap();
    let mut one = [0u8; 1];
    aborted.read_exact(&mut one).await.unwrap();
    #[allow(deprecated)]
    aborted.set_linger(Some(Duration::ZERO)).unwrap();
    drop(aborted);

    timeout(Duration::from_secs(2), async {
        while manager.active_connections() > 1 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("aborted connection should be cleaned up");

    // The surviving connection keeps echoing
    healthy.write_all(b"after").await.unwrap();
    let mut echoed = [0u8; 5];
    timeout(Duration::from_secs(2), healthy.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&echoed, b"after");

    // And the accept loop still takes new connections
    let mut fresh = TcpStream::connect(addr).await.unwrap();
    fresh.write_all(b"new").await.unwrap();
    fresh.shutdown().await.unwrap();
    let mut echoed = Vec::new();
    timeout(Duration::from_secs(2), fresh.read_to_end(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(echoed, b"new");

    assert!(!handle.is_finished());
    manager.initiate_shutdown();
    handle.await.unwrap().unwrap();
}
