//! Fuzz target for ade20k object file parsing.
//!
//! Feeds arbitrary bytes to the object-record parser, including its
//! duplicate-id and discriminator checks.

#![no_main]

use labelbridge::format::io_ade20k::from_ade20k_object_slice;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_ade20k_object_slice(data);
});
