//! Fuzz target for connection string parsing.
//!
//! Parsing arbitrary input must never panic, and a successful parse must
//! yield a configuration whose pool key can be derived.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spanner_client::Config;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = Config::from_connection_string(input) {
        let _ = config.endpoint();
        if config.database.is_some() {
            assert!(config.pool_key().is_ok());
        }
    }
});
