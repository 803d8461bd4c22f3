//! Fuzz target for native JSON subset files.

#![no_main]

use labelbridge::format::io_ir_json::from_ir_json_slice;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_ir_json_slice(data);
});
