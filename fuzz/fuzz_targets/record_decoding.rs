#![no_main]

//! Fuzz target for telemetry record decoding.
//!
//! Feeds arbitrary bytes through the same decode and validate steps a
//! queue delivery goes through. Neither step may panic, and a record that
//! decodes must re-encode into JSON that decodes again.

use libfuzzer_sys::fuzz_target;
use relay_core::{validate, TelemetryRecord};

fuzz_target!(|data: &[u8]| {
    let Ok(record) = TelemetryRecord::from_json(data) else {
        return;
    };

    let verdict = validate(&record);
    assert_eq!(verdict, record.check().is_ok());

    if let Ok(encoded) = record.to_json() {
        assert!(TelemetryRecord::from_json(&encoded).is_ok());
    }
});
