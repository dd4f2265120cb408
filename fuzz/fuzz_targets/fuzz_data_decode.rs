#![no_main]
use ipatlas::data_section::Decoder;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Decoding arbitrary bytes exercises every tag, size tier, and the
    // pointer depth limit; must never panic or loop forever
    let decoder = Decoder::new(data);
    let _ = decoder.decode(0);
    if data.len() > 4 {
        let _ = decoder.decode(data.len() / 2);
    }
});
