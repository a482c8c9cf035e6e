//! Fuzz testing for the dirent codec.
//!
//! Feeds arbitrary byte sequences to the dirent parser to ensure malformed
//! input is rejected gracefully, and round-trips every dirent that parses.

#![no_main]

use libfuzzer_sys::fuzz_target;

use zimkit::format::Dirent;

fuzz_target!(|data: &[u8]| {
    if let Ok((dirent, consumed)) = Dirent::read_from(data) {
        assert!(consumed <= data.len());
        assert_eq!(consumed, dirent.disk_size());

        let bytes = dirent.to_bytes();
        let (reparsed, len) = Dirent::read_from(&bytes).expect("serialized dirent must parse");
        assert_eq!(len, bytes.len());
        assert_eq!(reparsed, dirent);
    }
});
