#![no_main]
use libfuzzer_sys::fuzz_target;
use mql_core::{DetentAccumulator, EncoderTuning};

// Feed an arbitrary (A, B) level stream into the quadrature accumulator.
// The decoder must not panic, and whole detents can never outnumber the
// edges that produced them.
fuzz_target!(|data: &[u8]| {
    let tuning = EncoderTuning {
        // No bounce guard, so every byte lands as a real edge
        min_edge_us: 0,
        ..EncoderTuning::default()
    };
    let acc = DetentAccumulator::new(&tuning);

    let mut now_us: u64 = 0;
    for byte in data {
        now_us += 1 + u64::from(byte >> 2);
        acc.on_edge(byte & 1 != 0, byte & 2 != 0, now_us);
    }

    let detents = acc.take_detents();
    let max = data.len() as u64 / u64::from(tuning.detent_edges);
    assert!(u64::from(detents.unsigned_abs()) <= max);
    // Whatever remains is less than one whole detent
    assert!(acc.pending_edges().unsigned_abs() < u32::from(tuning.detent_edges));
});
