//! Purpose: Library crate backing the `haverscan` CLI and its tests.
//! Exports: `core` (input mapping, record extraction, decoding, distance, summation, pipeline).
//! Role: Engine for averaging haversine distances over very large coordinate-pair files.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod core;
