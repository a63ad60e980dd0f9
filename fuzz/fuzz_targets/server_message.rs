//! Feeds arbitrary frame payloads to the reply/event decoder.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = rewofs::wire::decode_server_message(data);
});
