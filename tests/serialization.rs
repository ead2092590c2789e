//! Integration tests for the message value codec
//!
//! Exercises nested records, enums, strings and containers through whole
//! packets, and pins down the byte layout other implementations rely on.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use bytes::{BufMut, Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use telemetry_wire::core::header::HEADER_LEN;
use telemetry_wire::core::wire::{from_bytes, to_bytes};
use telemetry_wire::{
    encode_message, wire_enum, wire_message, wire_record, Command, NetObject, Packet,
    ProtocolError,
};

wire_enum! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub enum ProcessStatus: u8 {
        #[default]
        Running = 0,
        Stopped = 1,
        Crashed = 9,
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessItem {
    pub pid: i32,
    pub name: String,
    pub cpu: f32,
    pub memory: f64,
    pub status: ProcessStatus,
    pub tags: Vec<String>,
}

wire_record!(ProcessItem { pid, name, cpu, memory, status, tags });

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseProcessList {
    pub task_id: i32,
    pub page_index: i32,
    pub page_count: i32,
    pub processes: Option<Vec<ProcessItem>>,
    pub counters: BTreeMap<String, i64>,
    pub local_only: bool,
}

wire_message!(ResponseProcessList = (10, 1) {
    task_id,
    page_index,
    page_count,
    processes,
    counters,
});

#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateActiveProcessList {
    pub value: i32,
}

wire_message!(UpdateActiveProcessList = (11, 1) { value });

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SevenHolder {
    pub value: i32,
}

wire_message!(SevenHolder = (10, 1) { value });

fn sample_list() -> ResponseProcessList {
    ResponseProcessList {
        task_id: 42,
        page_index: 1,
        page_count: 3,
        processes: Some(vec![
            ProcessItem {
                pid: 1,
                name: "init".to_string(),
                cpu: 0.5,
                memory: 12.25,
                status: ProcessStatus::Running,
                tags: vec!["system".to_string()],
            },
            ProcessItem {
                pid: 4021,
                name: "télémétrie".to_string(),
                cpu: 88.0,
                memory: 2048.0,
                status: ProcessStatus::Crashed,
                tags: Vec::new(),
            },
        ]),
        counters: [("restarts".to_string(), 3), ("threads".to_string(), 17)]
            .into_iter()
            .collect(),
        local_only: false,
    }
}

fn to_command(bytes: Bytes) -> Command {
    Command::from_packet(Packet::from_bytes(bytes).unwrap(), None)
}

#[test]
fn test_nested_message_through_packet() {
    let original = sample_list();
    let bytes = encode_message(&original, 12345, Some(1_700_000_000_000)).unwrap();
    let command = to_command(bytes.clone());

    assert_eq!(command.header().total_length as usize, bytes.len());
    assert_eq!(command.system_id(), 12345);
    assert_eq!(command.decode::<ResponseProcessList>().unwrap(), original);
}

#[test]
fn test_unlisted_field_is_not_sent() {
    let mut original = sample_list();
    original.local_only = true;
    let command = to_command(encode_message(&original, 1, Some(0)).unwrap());

    let decoded = command.decode::<ResponseProcessList>().unwrap();
    assert!(!decoded.local_only);
    assert_eq!(decoded.processes, original.processes);
}

#[test]
fn test_absent_list_comes_back_empty() {
    let original = ResponseProcessList {
        task_id: 1,
        processes: None,
        ..Default::default()
    };
    let command = to_command(encode_message(&original, 1, Some(0)).unwrap());

    let decoded = command.decode::<ResponseProcessList>().unwrap();
    assert_eq!(decoded.processes, Some(Vec::new()));
}

#[test]
fn test_scenario_header_then_single_int_body() {
    // Declared length 50: a 4-byte body plus 23 bytes the message does not read
    let mut raw = BytesMut::new();
    raw.put_i32_le(50);
    raw.put_i64_le(12345);
    raw.put_u16_le(10);
    raw.put_u8(1);
    raw.put_i64_le(1_700_000_000_123);
    raw.put_i32_le(7);
    raw.put_bytes(0, 50 - HEADER_LEN - 4);
    assert_eq!(raw.len(), 50);

    let command = to_command(raw.freeze());
    assert_eq!(command.header().total_length, 50);
    assert_eq!(command.header().object_id, 10);
    assert_eq!(command.send_time(), 1_700_000_000_123);
    assert!(command.is::<SevenHolder>());
    assert!(!command.is::<UpdateActiveProcessList>());
    assert_eq!(command.decode::<SevenHolder>().unwrap().value, 7);
}

#[test]
fn test_other_version_is_recognised() {
    #[derive(Debug, Default)]
    struct SevenHolderV2 {
        value: i32,
    }
    wire_message!(SevenHolderV2 = (10, 2) { value });

    let command = to_command(encode_message(&SevenHolder { value: 7 }, 1, Some(0)).unwrap());
    assert!(!command.is::<SevenHolderV2>());
    assert!(command.is_other_version::<SevenHolderV2>());
    assert_eq!(SevenHolderV2::OBJECT_VERSION, 2);
    assert!(command.decode::<SevenHolderV2>().is_err());
}

#[test]
fn test_string_layout_is_seven_bit_prefixed() {
    let bytes = to_bytes(&"ab".to_string()).unwrap();
    assert_eq!(&bytes[..], &[2, b'a', b'b']);

    let long = "x".repeat(200);
    let bytes = to_bytes(&long).unwrap();
    assert_eq!(&bytes[..2], &[0xC8, 0x01]);
    assert_eq!(bytes.len(), 202);
}

#[test]
fn test_list_and_map_layout_is_i32_counted() {
    let bytes = to_bytes(&vec![1u16, 2]).unwrap();
    assert_eq!(&bytes[..], &[2, 0, 0, 0, 1, 0, 2, 0]);

    let map: HashMap<u8, bool> = [(5u8, true)].into_iter().collect();
    let bytes = to_bytes(&map).unwrap();
    assert_eq!(&bytes[..], &[1, 0, 0, 0, 5, 1]);
}

#[test]
fn test_enum_travels_as_i32() {
    let bytes = to_bytes(&ProcessStatus::Crashed).unwrap();
    assert_eq!(&bytes[..], &9i32.to_le_bytes());
}

#[test]
fn test_unknown_enum_value_names_the_field() {
    let item = ProcessItem {
        name: "x".to_string(),
        ..Default::default()
    };
    let mut bytes = BytesMut::from(&to_bytes(&item).unwrap()[..]);
    // pid(4) + name(1 + 1) + cpu(4) + memory(8)
    let status_at = 4 + 2 + 4 + 8;
    bytes[status_at..status_at + 4].copy_from_slice(&5i32.to_le_bytes());

    match from_bytes::<ProcessItem>(&bytes, 0) {
        Err(ProtocolError::Field { record, field, source }) => {
            assert_eq!(record, "ProcessItem");
            assert_eq!(field, "status");
            assert!(matches!(
                *source,
                ProtocolError::UnknownEnumValue {
                    type_name: "ProcessStatus",
                    value: 5
                }
            ));
        }
        other => panic!("expected field error, got {other:?}"),
    }
}

#[test]
fn test_truncated_body_fails_without_panicking() {
    let bytes = to_bytes(&sample_list()).unwrap();
    for cut in [0, 3, 10, bytes.len() / 2, bytes.len() - 1] {
        assert!(from_bytes::<ResponseProcessList>(&bytes[..cut], 0).is_err());
    }
}

#[test]
fn test_decode_at_offset_reports_end() {
    let mut buf = BytesMut::new();
    buf.put_slice(&[0xAA; 3]);
    buf.put_slice(&to_bytes(&"cpu".to_string()).unwrap());
    buf.put_slice(&[0xBB; 2]);

    let (value, end) = from_bytes::<String>(&buf, 3).unwrap();
    assert_eq!(value, "cpu");
    assert_eq!(end, 3 + 4);
}
