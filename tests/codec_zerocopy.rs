//! Integration tests for the TCP packet codec
//!
//! These tests validate framing over arbitrary read boundaries and the
//! zero-copy split of decoded packets out of the read buffer.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{BufMut, Bytes, BytesMut};
use futures::StreamExt;
use telemetry_wire::core::codec::PacketCodec;
use telemetry_wire::core::header::HEADER_LEN;
use telemetry_wire::core::packet::{encode_message, Packet};
use telemetry_wire::protocol::message::{CommonResponse, Heartbeat};
use telemetry_wire::ProtocolError;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

fn heartbeat_bytes(task_id: i32) -> Bytes {
    encode_message(&Heartbeat { task_id }, 12345, Some(0)).expect("encode")
}

#[test]
fn test_codec_decode_zero_copy_split() {
    let mut codec = PacketCodec::default();
    let bytes = heartbeat_bytes(7);
    let mut buffer = BytesMut::from(&bytes[..]);
    let original_capacity = buffer.capacity();

    let packet = codec.decode(&mut buffer).expect("decode").expect("whole packet");

    assert_eq!(packet.header.total_length, 27);
    assert_eq!(packet.payload.len(), 4);
    assert_eq!(buffer.len(), 0);
    assert!(buffer.capacity() <= original_capacity);
}

#[test]
fn test_codec_partial_header_preserves_buffer() {
    let mut codec = PacketCodec::default();
    let bytes = heartbeat_bytes(1);
    let mut buffer = BytesMut::from(&bytes[..5]);

    let result = codec.decode(&mut buffer).expect("Decode should not error");

    assert!(result.is_none());
    assert_eq!(buffer.len(), 5);
}

#[test]
fn test_codec_partial_body_waits() {
    let mut codec = PacketCodec::default();
    let bytes = encode_message(&CommonResponse::fail(3, "disk full"), 1, Some(0)).unwrap();
    let mut buffer = BytesMut::from(&bytes[..bytes.len() - 1]);

    assert!(codec.decode(&mut buffer).unwrap().is_none());
    buffer.put_u8(bytes[bytes.len() - 1]);
    let packet = codec.decode(&mut buffer).unwrap().unwrap();
    assert_eq!(packet.to_bytes(), bytes);
}

#[test]
fn test_codec_two_packets_in_one_buffer() {
    let mut codec = PacketCodec::default();
    let mut buffer = BytesMut::new();
    buffer.extend_from_slice(&heartbeat_bytes(1));
    buffer.extend_from_slice(&heartbeat_bytes(2));

    let first = codec.decode(&mut buffer).unwrap().unwrap();
    let second = codec.decode(&mut buffer).unwrap().unwrap();
    assert!(codec.decode(&mut buffer).unwrap().is_none());

    assert_eq!(&first.payload[..], &1i32.to_le_bytes());
    assert_eq!(&second.payload[..], &2i32.to_le_bytes());
}

#[test]
fn test_codec_rejects_length_below_header() {
    let mut codec = PacketCodec::default();
    let mut buffer = BytesMut::from(&heartbeat_bytes(1)[..]);
    buffer[..4].copy_from_slice(&22i32.to_le_bytes());

    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::InvalidPacketLength(22))
    ));
}

#[test]
fn test_codec_rejects_oversized_before_buffering() {
    let mut codec = PacketCodec::new(64);
    let mut buffer = BytesMut::new();
    buffer.put_i32_le(65);
    buffer.extend_from_slice(&[0u8; 8]);

    assert!(matches!(
        codec.decode(&mut buffer),
        Err(ProtocolError::OversizedPacket(65))
    ));
}

#[test]
fn test_codec_encode_matches_packet_bytes() {
    let mut codec = PacketCodec::default();
    let bytes = heartbeat_bytes(9);
    let packet = Packet::from_bytes(bytes.clone()).unwrap();

    let mut out = BytesMut::with_capacity(HEADER_LEN);
    codec.encode(packet, &mut out).unwrap();
    assert_eq!(out.freeze(), bytes);
}

#[test]
fn test_codec_eof_with_partial_packet_is_discarded() {
    let mut codec = PacketCodec::default();
    let bytes = heartbeat_bytes(1);
    let mut buffer = BytesMut::from(&bytes[..10]);

    assert!(codec.decode_eof(&mut buffer).unwrap().is_none());
}

#[tokio::test]
async fn test_framed_read_one_byte_at_a_time() {
    let (mut writer, reader) = tokio::io::duplex(1);
    let mut frames = FramedRead::new(reader, PacketCodec::default());

    let mut wire = BytesMut::new();
    for task_id in 0..5 {
        wire.extend_from_slice(&heartbeat_bytes(task_id));
    }
    let wire = wire.freeze();

    let feeder = tokio::spawn(async move {
        for byte in wire.iter() {
            writer.write_all(&[*byte]).await.unwrap();
        }
    });

    for task_id in 0..5i32 {
        let packet = frames.next().await.unwrap().unwrap();
        assert_eq!(&packet.payload[..], &task_id.to_le_bytes());
    }
    feeder.await.unwrap();
    assert!(frames.next().await.is_none());
}
