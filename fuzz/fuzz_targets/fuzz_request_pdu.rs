#![no_main]

use libfuzzer_sys::fuzz_target;
use modbus_stack::pdu::{decode_request, encode_request};
use modbus_stack::server::RequestHandler;
use modbus_stack::{ModbusPdu, RegisterContext};

fuzz_target!(|data: &[u8]| {
    let Ok(pdu) = ModbusPdu::from_slice(data) else {
        return;
    };
    if pdu.is_empty() {
        return;
    }

    // Ranges past address 65535 decode on the slave side but are never sent
    if let Ok(request) = decode_request(&pdu) {
        if request.validate().is_ok() {
            let again = encode_request(&request).expect("decoded request re-encodes");
            assert_eq!(decode_request(&again).ok(), Some(request));
        } else {
            assert!(encode_request(&request).is_err());
        }
    }

    // The slave answers everything, normal or exception, without panicking
    let context = RegisterContext::from_json_str(
        r#"{"coils": [{"start_address": 0, "value": [false, true]}],
            "holding_registers": [{"start_address": 0, "value": [1, 2, 3]}]}"#,
    )
    .expect("static register map")
    .into_shared();
    let reply = RequestHandler::new(context).handle(&pdu);
    assert!(!reply.is_empty());
});
