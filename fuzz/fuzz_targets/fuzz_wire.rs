#![no_main]

use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;
use telemetry_wire::core::wire::{from_bytes, to_bytes};
use telemetry_wire::wire_record;

#[derive(Debug, Default, PartialEq)]
struct Nested {
    name: String,
    values: Vec<i32>,
    table: BTreeMap<u8, String>,
    flag: bool,
}

wire_record!(Nested { name, values, table, flag });

fuzz_target!(|data: &[u8]| {
    // Hostile lengths must fail cleanly; anything that decodes re-encodes to itself
    if let Ok((decoded, _)) = from_bytes::<Nested>(data, 0) {
        let bytes = to_bytes(&decoded).expect("re-encode");
        let (again, end) = from_bytes::<Nested>(&bytes, 0).expect("decode re-encoded");
        assert_eq!(end, bytes.len());
        assert_eq!(again, decoded);
    }
});
