//! Fuzz target for the mask codec.
//!
//! Decodes arbitrary PNG bytes as an instance raster and as a part raster.

#![no_main]

use labelbridge::codec::fuzz_decode_png;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = fuzz_decode_png(data);
});
