//! Example: Process telemetry over TCP and UDP multicast
//!
//! A server answers a process list request over TCP, paginated, and publishes
//! live process updates to a multicast group. A client asks the server where
//! to subscribe, joins the group and prints what arrives on both paths.
//!
//! Run with: `cargo run --example telemetry`

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use telemetry_wire::config::NetworkConfig;
use telemetry_wire::utils::logging::init_logging;
use telemetry_wire::utils::paging::Pagination;
use telemetry_wire::{
    wire_enum, wire_message, wire_record, ClientEvent, Command, Dispatcher, RequestUdpAddress,
    ResponseUdpAddress, ServerEvent, TaskIdGenerator, TcpClient, TcpServer, UdpPublisher,
    UdpSubscriber, HEADER_LEN, MAX_DATAGRAM_SIZE,
};
use tokio::sync::mpsc;
use tracing::{info, warn};

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ProcessStatus: u8 {
        #[default]
        Running = 0,
        Sleeping = 1,
        Stopped = 2,
    }
}

#[derive(Debug, Clone, Default)]
struct ProcessItem {
    pid: i32,
    name: String,
    cpu: f32,
    memory_mb: f64,
    status: ProcessStatus,
}

wire_record!(ProcessItem { pid, name, cpu, memory_mb, status });

#[derive(Debug, Clone, Default)]
struct RequestProcessList {
    task_id: i32,
}

wire_message!(RequestProcessList = (9, 1) { task_id });

#[derive(Debug, Clone, Default)]
struct ResponseProcessList {
    task_id: i32,
    total_size: i32,
    page_size: i32,
    page_count: i32,
    page_index: i32,
    processes: Option<Vec<ProcessItem>>,
}

wire_message!(ResponseProcessList = (10, 1) {
    task_id,
    total_size,
    page_size,
    page_count,
    page_index,
    processes,
});

#[derive(Debug, Clone, Default)]
struct UpdateActiveProcessList {
    page_index: i32,
    page_count: i32,
    processes: Vec<ProcessItem>,
}

wire_message!(UpdateActiveProcessList = (11, 1) { page_index, page_count, processes });

fn fake_processes(count: usize, tick: u32) -> Vec<ProcessItem> {
    (0..count)
        .map(|i| ProcessItem {
            pid: 1000 + i as i32,
            name: format!("worker-{i:03}"),
            cpu: ((i as u32 * 7 + tick) % 100) as f32,
            memory_mb: 64.0 + i as f64,
            status: if i % 5 == 0 {
                ProcessStatus::Sleeping
            } else {
                ProcessStatus::Running
            },
        })
        .collect()
}

async fn serve_requests(server: Arc<TcpServer>, mut events: mpsc::Receiver<ServerEvent>) {
    let processes = fake_processes(120, 0);
    while let Some(event) = events.recv().await {
        let command = match event {
            ServerEvent::MembershipChanged { sessions } => {
                info!(sessions, "Membership changed");
                continue;
            }
            ServerEvent::Command(command) => command,
        };
        let (Some(peer), Ok(request)) = (command.peer(), command.decode::<RequestProcessList>()) else {
            continue;
        };

        let paging = Pagination::new(processes.len(), 50);
        for page in paging.pages() {
            let response = ResponseProcessList {
                task_id: request.task_id,
                total_size: processes.len() as i32,
                page_size: paging.page_size() as i32,
                page_count: page.count as i32,
                page_index: page.index as i32,
                processes: Some(processes[page.items].to_vec()),
            };
            if let Err(e) = server.send_to(peer, &response).await {
                warn!(error = %e, "Failed to send process page");
                break;
            }
        }
    }
}

async fn publish_updates(publisher: Arc<UdpPublisher>) {
    // Worst-case item size: fixed fields plus a short name
    let item_size = 4 + 1 + 16 + 4 + 8 + 4;
    for tick in 0..5u32 {
        let processes = fake_processes(2000, tick);
        let paging = Pagination::fitting(processes.len(), item_size, HEADER_LEN + 12, MAX_DATAGRAM_SIZE);
        for page in paging.pages() {
            let update = UpdateActiveProcessList {
                page_index: page.index as i32,
                page_count: page.count as i32,
                processes: processes[page.items].to_vec(),
            };
            if let Err(e) = publisher.send(&update, None).await {
                warn!(error = %e, "Failed to publish update");
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

fn client_dispatcher() -> Result<Dispatcher, telemetry_wire::ProtocolError> {
    let dispatcher = Dispatcher::new();
    dispatcher.register::<ResponseProcessList, _>(|_, page| {
        println!(
            "TCP  page {}/{}: {} of {} processes",
            page.page_index + 1,
            page.page_count,
            page.processes.map(|p| p.len()).unwrap_or(0),
            page.total_size
        );
        Ok(())
    })?;
    dispatcher.register::<UpdateActiveProcessList, _>(|command, update| {
        let busiest = update
            .processes
            .iter()
            .max_by(|a, b| a.cpu.total_cmp(&b.cpu))
            .map(|p| format!("{} ({:.0}%)", p.name, p.cpu))
            .unwrap_or_default();
        println!(
            "UDP  page {}/{}: {} processes, busiest {}, {} ms old",
            update.page_index + 1,
            update.page_count,
            update.processes.len(),
            busiest,
            telemetry_wire::utils::time::age_millis(command.send_time())
        );
        Ok(())
    })?;
    Ok(dispatcher)
}

fn handle(dispatcher: &Dispatcher, command: &Command) {
    match dispatcher.dispatch(command) {
        Ok(true) => {}
        Ok(false) => info!(%command, "No handler"),
        Err(e) => warn!(error = %e, "Handler failed"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut config = NetworkConfig::from_env()?;
    config.server.address = "127.0.0.1:0".to_string();
    config.server.multicast_group = Some(config.multicast.group_addr());
    init_logging(&config.logging)?;

    // Server side
    let (server, server_events) = TcpServer::new("demo-server", config.server.clone());
    let server = Arc::new(server);
    let addr = server.start().await?;
    tokio::spawn(serve_requests(Arc::clone(&server), server_events));

    let publisher = Arc::new(UdpPublisher::new(
        "demo-publisher",
        config.multicast.clone(),
        server.system_id(),
    ));
    publisher.start_configured(Ipv4Addr::LOCALHOST)?;

    // Client side
    let task_ids = Arc::new(TaskIdGenerator::new());
    let (client, mut client_events) =
        TcpClient::with_task_ids("demo-client", config.client.clone(), Arc::clone(&task_ids));
    client.connect(addr).await?;
    client.send(&RequestUdpAddress { task_id: task_ids.next() }).await?;

    let group = loop {
        match client_events.recv().await {
            Some(ClientEvent::Command(command)) if command.is::<ResponseUdpAddress>() => {
                if let Some(group) = command.decode::<ResponseUdpAddress>()?.group_addr() {
                    break group;
                }
            }
            Some(ClientEvent::Command(_)) => continue,
            Some(ClientEvent::Disconnected { reason }) => {
                return Err(format!("lost server before multicast negotiation: {reason}").into())
            }
            None => return Err("client event channel closed".into()),
        }
    };

    let (subscriber, mut updates) = UdpSubscriber::new("demo-subscriber", config.multicast.clone());
    let local = client
        .local_addr()
        .unwrap_or_else(|| (IpAddr::V4(Ipv4Addr::LOCALHOST), 0).into());
    if let Err(e) = subscriber.start(group, local, client.system_id()) {
        warn!(error = %e, "Multicast unavailable, continuing with TCP only");
    }

    client.send(&RequestProcessList { task_id: task_ids.next() }).await?;
    tokio::spawn(publish_updates(Arc::clone(&publisher)));

    let dispatcher = client_dispatcher()?;
    let deadline = tokio::time::sleep(Duration::from_secs(2));
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            Some(event) = client_events.recv() => match event {
                ClientEvent::Command(command) => handle(&dispatcher, &command),
                ClientEvent::Disconnected { reason } => {
                    warn!(%reason, "Disconnected");
                    break;
                }
            },
            Some(command) = updates.recv() => handle(&dispatcher, &command),
        }
    }

    subscriber.stop().await;
    client.stop().await;
    publisher.stop();
    server.stop().await;
    Ok(())
}
