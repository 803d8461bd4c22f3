//! Fuzz target for TFOD CSV parsing.
//!
//! This fuzzer feeds arbitrary byte sequences to the TFOD CSV parser,
//! then groups whatever rows parse into items.

#![no_main]

use std::path::Path;

use labelbridge::format::io_tfod_csv::{from_tfod_csv_slice, rows_to_items};
use labelbridge::ir::LabelCategories;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let Ok(rows) = from_tfod_csv_slice(data) else {
        return;
    };
    let mut categories = LabelCategories::new();
    for row in &rows {
        categories.find_or_add(&row.class_name);
    }
    let _ = rows_to_items(&rows, "fuzz", Path::new("fuzz"), &categories, Path::new("<bytes>"));
});
