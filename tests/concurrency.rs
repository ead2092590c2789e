use bytes::BytesMut;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use telemetry_wire::core::codec::PacketCodec;
use telemetry_wire::{encode_message, Command, Dispatcher, Heartbeat, TaskIdGenerator};
use tokio::task::JoinSet;
use tokio_util::codec::Decoder;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_encode_decode_heavy() {
    let iterations = 20_000i32;

    let mut tasks = JoinSet::new();
    for system_id in 1..=5i64 {
        tasks.spawn(async move {
            let mut codec = PacketCodec::default();
            let mut buf = BytesMut::new();
            for task_id in 0..iterations {
                let bytes = encode_message(&Heartbeat { task_id }, system_id, Some(0)).unwrap();
                buf.extend_from_slice(&bytes);
                let packet = codec.decode(&mut buf).unwrap().unwrap();
                let command = Command::from_packet(packet, None);
                assert_eq!(command.system_id(), system_id);
                assert_eq!(command.decode::<Heartbeat>().unwrap().task_id, task_id);
            }
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn shared_task_ids_never_collide() {
    let ids = Arc::new(TaskIdGenerator::new());
    let per_task = 10_000;

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let ids = Arc::clone(&ids);
        tasks.spawn(async move { (0..per_task).map(|_| ids.next()).collect::<Vec<_>>() });
    }

    let mut seen = HashSet::new();
    while let Some(res) = tasks.join_next().await {
        for id in res.unwrap() {
            assert!(seen.insert(id), "duplicate task id {id}");
        }
    }
    assert_eq!(seen.len(), 8 * per_task);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn dispatcher_shared_across_tasks() {
    let dispatcher = Dispatcher::new();
    let handled = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&handled);
    dispatcher
        .register::<Heartbeat, _>(move |_, _| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(())
        })
        .unwrap();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let dispatcher = dispatcher.clone();
        tasks.spawn(async move {
            for task_id in 0..1_000 {
                let bytes = encode_message(&Heartbeat { task_id }, 1, Some(0)).unwrap();
                let packet = telemetry_wire::Packet::from_bytes(bytes).unwrap();
                assert!(dispatcher.dispatch(&Command::from_packet(packet, None)).unwrap());
            }
        });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    assert_eq!(handled.load(Ordering::Relaxed), 8_000);
}
