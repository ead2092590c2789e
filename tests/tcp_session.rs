//! Live loopback tests of the TCP server and client
//!
//! Every test binds port 0 so tests can run in parallel.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::net::SocketAddr;
use std::time::Duration;
use telemetry_wire::config::{ClientConfig, ServerConfig};
use telemetry_wire::{
    wire_message, ClientEvent, Command, CommonResponse, Heartbeat, RequestUdpAddress,
    ResponseUdpAddress, ServerEvent, TcpClient, TcpServer,
};
use tokio::sync::mpsc::Receiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq)]
struct RequestProcessList {
    task_id: i32,
    filter: String,
}

wire_message!(RequestProcessList = (1, 1) { task_id, filter });

fn server_config() -> ServerConfig {
    ServerConfig {
        address: "127.0.0.1:0".to_string(),
        system_id: Some(12345),
        ..ServerConfig::default()
    }
}

fn quiet_client() -> ClientConfig {
    ClientConfig {
        heartbeat_interval: None,
        ..ClientConfig::default()
    }
}

async fn next_command(events: &mut Receiver<ServerEvent>) -> Command {
    loop {
        match timeout(WAIT, events.recv()).await.expect("server event").expect("open") {
            ServerEvent::Command(command) => return command,
            ServerEvent::MembershipChanged { .. } => continue,
        }
    }
}

async fn wait_for_sessions(events: &mut Receiver<ServerEvent>, expected: usize) {
    loop {
        match timeout(WAIT, events.recv()).await.expect("server event").expect("open") {
            ServerEvent::MembershipChanged { sessions } if sessions == expected => return,
            _ => continue,
        }
    }
}

async fn next_client_command(events: &mut Receiver<ClientEvent>) -> Command {
    match timeout(WAIT, events.recv()).await.expect("client event").expect("open") {
        ClientEvent::Command(command) => command,
        other => panic!("expected command, got {other:?}"),
    }
}

async fn connected_client(addr: SocketAddr, config: ClientConfig) -> (TcpClient, Receiver<ClientEvent>) {
    let (client, events) = TcpClient::new("test-client", config);
    client.connect(addr).await.unwrap();
    (client, events)
}

#[tokio::test]
async fn test_request_and_reply() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();
    let (client, mut client_events) = connected_client(addr, quiet_client()).await;
    wait_for_sessions(&mut server_events, 1).await;
    assert_eq!(client.system_id(), 0);

    client
        .send(&RequestProcessList {
            task_id: 8,
            filter: "ssh".to_string(),
        })
        .await
        .unwrap();

    let command = next_command(&mut server_events).await;
    assert!(command.is::<RequestProcessList>());
    assert_eq!(command.peer(), client.local_addr());
    let request = command.decode::<RequestProcessList>().unwrap();
    assert_eq!(request.filter, "ssh");

    server
        .send_to(command.peer().unwrap(), &CommonResponse::success(request.task_id))
        .await
        .unwrap();

    let reply = next_client_command(&mut client_events).await;
    assert_eq!(reply.system_id(), 12345);
    assert!(reply.decode::<CommonResponse>().unwrap().is_success());
    assert_eq!(client.system_id(), 12345);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_commands_arrive_in_send_order() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();
    let (client, _client_events) = connected_client(addr, quiet_client()).await;

    for task_id in 0..200 {
        client
            .send(&RequestProcessList {
                task_id,
                filter: String::new(),
            })
            .await
            .unwrap();
    }
    for task_id in 0..200 {
        let command = next_command(&mut server_events).await;
        assert_eq!(command.decode::<RequestProcessList>().unwrap().task_id, task_id);
    }

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_heartbeat_is_echoed_and_forwarded() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();
    let config = ClientConfig {
        heartbeat_interval: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let (client, mut client_events) = connected_client(addr, config).await;

    let forwarded = next_command(&mut server_events).await;
    assert!(forwarded.is::<Heartbeat>());
    let task_id = forwarded.decode::<Heartbeat>().unwrap().task_id;

    let echo = next_client_command(&mut client_events).await;
    assert_eq!(echo.decode::<Heartbeat>().unwrap().task_id, task_id);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_udp_address_request_is_answered() {
    let group: SocketAddr = "239.255.0.7:9700".parse().unwrap();
    let config = ServerConfig {
        multicast_group: Some(group),
        ..server_config()
    };
    let (server, mut server_events) = TcpServer::new("test-server", config);
    let addr = server.start().await.unwrap();
    let (client, mut client_events) = connected_client(addr, quiet_client()).await;

    client.send(&RequestUdpAddress { task_id: 3 }).await.unwrap();

    let reply = next_client_command(&mut client_events).await;
    let response = reply.decode::<ResponseUdpAddress>().unwrap();
    assert_eq!(response.task_id, 3);
    assert_eq!(response.group_addr(), Some(group));

    // Still forwarded to the application
    assert!(next_command(&mut server_events).await.is::<RequestUdpAddress>());

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_silent_session_is_evicted() {
    let config = ServerConfig {
        heartbeat_timeout: Duration::from_millis(300),
        sweep_interval: Duration::from_millis(50),
        ..server_config()
    };
    let (server, mut server_events) = TcpServer::new("test-server", config);
    let addr = server.start().await.unwrap();
    let (client, mut client_events) = connected_client(addr, quiet_client()).await;
    wait_for_sessions(&mut server_events, 1).await;

    wait_for_sessions(&mut server_events, 0).await;
    assert_eq!(server.session_count(), 0);
    assert_eq!(server.broadcast(&Heartbeat { task_id: 1 }).await.unwrap(), 0);

    match timeout(WAIT, client_events.recv()).await.unwrap().unwrap() {
        ClientEvent::Disconnected { .. } => {}
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(!client.is_connected());
    assert_eq!(server.metrics().snapshot().sessions_evicted, 1);

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_heartbeats_keep_session_alive() {
    let config = ServerConfig {
        heartbeat_timeout: Duration::from_millis(400),
        sweep_interval: Duration::from_millis(50),
        ..server_config()
    };
    let (server, mut server_events) = TcpServer::new("test-server", config);
    let addr = server.start().await.unwrap();
    let client_config = ClientConfig {
        heartbeat_interval: Some(Duration::from_millis(100)),
        ..ClientConfig::default()
    };
    let (client, _client_events) = connected_client(addr, client_config).await;
    wait_for_sessions(&mut server_events, 1).await;

    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(server.session_count(), 1);
    assert!(client.is_connected());

    client.stop().await;
    server.stop().await;
}

#[tokio::test]
async fn test_broadcast_reaches_every_client() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(connected_client(addr, quiet_client()).await);
    }
    wait_for_sessions(&mut server_events, 3).await;

    let reached = server.broadcast(&CommonResponse::fail(0, "shutting down")).await.unwrap();
    assert_eq!(reached, 3);
    for (_, events) in clients.iter_mut() {
        let command = next_client_command(events).await;
        assert_eq!(command.decode::<CommonResponse>().unwrap().message, "shutting down");
    }

    for (client, _) in &clients {
        client.stop().await;
    }
    server.stop().await;
}

#[tokio::test]
async fn test_client_disconnect_removes_session() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();
    let (client, _client_events) = connected_client(addr, quiet_client()).await;
    wait_for_sessions(&mut server_events, 1).await;

    client.stop().await;
    wait_for_sessions(&mut server_events, 0).await;
    assert!(server.sessions().is_empty());

    server.stop().await;
}

#[tokio::test]
async fn test_server_stop_disconnects_client() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();
    let (client, mut client_events) = connected_client(addr, quiet_client()).await;
    wait_for_sessions(&mut server_events, 1).await;

    timeout(WAIT, server.stop()).await.unwrap();
    assert!(!server.is_running());

    match timeout(WAIT, client_events.recv()).await.unwrap().unwrap() {
        ClientEvent::Disconnected { reason } => assert!(!reason.is_empty()),
        other => panic!("expected disconnect, got {other:?}"),
    }
    assert!(matches!(
        client.send(&Heartbeat { task_id: 1 }).await,
        Err(telemetry_wire::ProtocolError::NotConnected(_))
    ));
    client.stop().await;
}

#[tokio::test]
async fn test_client_reconnects_after_stop() {
    let (server, mut server_events) = TcpServer::new("test-server", server_config());
    let addr = server.start().await.unwrap();
    let (client, _client_events) = connected_client(addr, quiet_client()).await;
    wait_for_sessions(&mut server_events, 1).await;

    client.stop().await;
    wait_for_sessions(&mut server_events, 0).await;
    client.connect(addr).await.unwrap();
    wait_for_sessions(&mut server_events, 1).await;
    assert!(client.is_connected());

    client.stop().await;
    server.stop().await;
}
