//! Fuzz target for database and session name parsing.

#![no_main]

use libfuzzer_sys::fuzz_target;
use spanner_protocol::{DatabaseName, SessionName};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(database) = input.parse::<DatabaseName>() {
        // Display and parse agree.
        let reparsed: DatabaseName = database.to_string().parse().expect("display output parses");
        assert_eq!(reparsed, database);
        assert_eq!(database.session("s").database(), Some(database));
    }

    if let Ok(session) = SessionName::parse(input) {
        let _ = session.database();
    }
});
