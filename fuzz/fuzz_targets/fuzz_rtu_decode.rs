#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_stack::{crc, rtu};

fuzz_target!(|data: &[u8]| {
    if let Some((unit_id, pdu)) = rtu::decode_adu(data) {
        assert!(crc::verify(data));
        assert_eq!(rtu::encode_adu(unit_id, &pdu), data);
    }
});
