//! Fuzz testing for address validation.
//!
//! Checks, for arbitrary input, that:
//!
//! - `is_valid_address` and `validate_address` never panic and agree
//! - every accepted input normalizes to a string that is itself valid
//! - normalization is idempotent
//!
//! # Running
//!
//! ```bash
//! cargo +nightly install cargo-fuzz
//! cargo +nightly fuzz run fuzz_address -- -max_total_time=60
//! ```

#![no_main]

use ethereum_data_api::validation::{is_valid_address, normalize_address, validate_address};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    let valid = is_valid_address(s);
    assert_eq!(valid, validate_address(s).is_ok());

    if valid {
        let normalized = normalize_address(s);
        assert!(is_valid_address(&normalized));
        assert_eq!(normalize_address(&normalized), normalized);
        assert_eq!(normalized, normalized.to_ascii_lowercase());
    }
});
