#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Loading arbitrary bytes must never panic; errors are fine
    if let Ok(reader) = ipatlas::Reader::from_bytes(data.to_vec()) {
        // A file that loads must also survive lookups on both families
        let _ = reader.lookup("1.2.3.4");
        let _ = reader.lookup("2001:db8::1");
        let _ = reader.raw_metadata();
    }
});
