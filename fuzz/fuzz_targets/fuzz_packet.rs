#![no_main]

use bytes::{Bytes, BytesMut};
use libfuzzer_sys::fuzz_target;
use telemetry_wire::core::codec::PacketCodec;
use telemetry_wire::Packet;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    // Whole-buffer parse and stream framing must never panic
    let _ = Packet::from_bytes(Bytes::copy_from_slice(data));

    let mut codec = PacketCodec::new(1 << 20);
    let mut buffer = BytesMut::from(data);
    while let Ok(Some(packet)) = codec.decode(&mut buffer) {
        assert_eq!(packet.encoded_len(), packet.header.total_length as usize);
    }
});
