#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_stack::constants::MBAP_HEADER_LEN;
use modbus_stack::MbapHeader;

fuzz_target!(|bytes: [u8; MBAP_HEADER_LEN]| {
    if let Ok(header) = MbapHeader::parse(&bytes) {
        assert_eq!(header.protocol_id, 0);
        assert!((1..=253).contains(&header.pdu_len()));
        assert_eq!(header.to_bytes(), bytes);
    }
});
