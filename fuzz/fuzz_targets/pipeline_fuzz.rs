//! Pipeline fuzz target: arbitrary bytes as a captured frame, decoded both ways.
//! Decoding must not panic, and the deepest-only and full decodes must agree.
//! Build with: cargo fuzz run pipeline_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use bacnet_analysis::{DecodeOptions, Pipeline, RawRecord};
#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let route_aware = data.first().map_or(false, |b| b & 1 == 1);
    let pipeline = Pipeline::new(DecodeOptions { route_aware });
    let depth = pipeline.decode_depth(data);
    let full = pipeline.decode_full(&RawRecord::new(1, 0.0, data.to_vec()));
    match (depth, full) {
        (Ok(d), Ok(f)) => assert_eq!(d, f.map(|p| p.layers().clone().into_deepest())),
        (Err(_), Err(_)) => {}
        (d, f) => panic!("decoders disagree: {:?} vs {:?}", d, f),
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run pipeline_fuzz");
}
