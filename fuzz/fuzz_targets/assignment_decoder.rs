#![no_main]
use kafkascope::protocol::assignment::{decode_member_assignment, encode_member_assignment};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(assignment) = decode_member_assignment(data) else {
        return;
    };

    // whatever decodes must survive another pass
    let encoded = encode_member_assignment(&assignment).expect("encode decoded assignment");
    let decoded = decode_member_assignment(&encoded).expect("decode re-encoded assignment");
    assert_eq!(assignment, decoded);
});
