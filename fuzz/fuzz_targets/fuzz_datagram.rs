#![no_main]

use libfuzzer_sys::fuzz_target;
use telemetry_wire::inspect_datagram;

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }
    // First 8 bytes pick the accepted system id, the rest is the datagram
    let (id, datagram) = data.split_at(8);
    let mut expected = [0u8; 8];
    expected.copy_from_slice(id);
    if let Ok(packet) = inspect_datagram(datagram, i64::from_le_bytes(expected)) {
        assert!(packet.encoded_len() <= datagram.len());
    }
});
