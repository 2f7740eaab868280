#![no_main]

use libfuzzer_sys::fuzz_target;
use phpunit_protocol::{escape, parser};

fuzz_target!(|data: &[u8]| {
    // Pipe output is decoded lossily, so arbitrary bytes are fair game
    let text = String::from_utf8_lossy(data);
    for line in text.lines() {
        let _ = parser::parse(line);
    }
    assert_eq!(escape::unescape(&escape::escape(&text)), text);
});
