#![no_main]
use ipatlas::{DatabaseBuilder, Reader};
use libfuzzer_sys::fuzz_target;
use std::collections::BTreeMap;
use std::net::IpAddr;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Small fixed database; the fuzzed string is the query
        let mut builder = DatabaseBuilder::new();
        let _ = builder.add_entry("1.2.3.4", BTreeMap::new());
        let _ = builder.add_entry("10.0.0.0/8", BTreeMap::new());
        let _ = builder.add_entry("192.168.0.0/16", BTreeMap::new());
        let _ = builder.add_entry("2001:db8::1", BTreeMap::new());

        if let Ok(bytes) = builder.build() {
            if let Ok(reader) = Reader::from_bytes(bytes) {
                let _ = reader.lookup(s);
                if let Ok(ip) = s.parse::<IpAddr>() {
                    let _ = reader.lookup_ip(ip);
                    let _ = reader.lookup_ip_prefix(ip);
                }
            }
        }
    }
});
