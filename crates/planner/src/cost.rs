//! Cost formulas driving the DP join enumeration. Units are abstract
//! "tuples touched"; only relative magnitudes matter.

pub fn seq_scan_cost(size: f64) -> f64 {
    size
}

/// Building (materialize + hash) costs more per tuple than probing, which
/// steers the DP toward small build sides.
pub fn hash_join_cost(build_size: f64, probe_size: f64) -> f64 {
    2.0 * build_size + probe_size
}

/// Every probe tuple rescans the materialized build side.
pub fn nested_loop_join_cost(build_size: f64, probe_size: f64) -> f64 {
    build_size * probe_size
}
