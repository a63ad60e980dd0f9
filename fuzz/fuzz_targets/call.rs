//! Feeds arbitrary frame payloads to the request decoder; it must reject
//! or decode, never panic, and accepted messages must re-encode.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(call) = rewofs::wire::decode_call(data) {
        let encoded = rewofs::wire::encode_call(call.id, &call.request);
        let again = rewofs::wire::decode_call(&encoded).expect("re-decode");
        assert_eq!(again.id, call.id);
        assert_eq!(again.request, call.request);
    }
});
