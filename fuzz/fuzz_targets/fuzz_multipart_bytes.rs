#![no_main]

use libfuzzer_sys::fuzz_target;
use uploadify::BoundaryStreamParser;

fuzz_target!(|data: &[u8]| {
    // Feed the same input at several chunk sizes; the parser must never
    // panic and must classify the bytes identically regardless of how they
    // were split.
    for chunk_size in [1usize, 7, 64, data.len().max(1)] {
        let mut parser = BoundaryStreamParser::new("X-BOUNDARY");
        let mut events = Vec::new();

        for chunk in data.chunks(chunk_size) {
            if parser.write(chunk, &mut events).is_err() {
                break;
            }
        }

        let _ = parser.finish(&mut events);
    }
});
