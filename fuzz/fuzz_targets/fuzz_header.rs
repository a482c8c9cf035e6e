//! Fuzz testing for the file header parser.

#![no_main]

use libfuzzer_sys::fuzz_target;

use zimkit::format::Fileheader;

fuzz_target!(|data: &[u8]| {
    let _ = Fileheader::from_bytes(data);
});
