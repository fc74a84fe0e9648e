use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use common::Row;
use types::Value;

/// Deterministic seeded hash of a byte string. `DefaultHasher::new()` uses
/// fixed keys, so the same key and seed always land in the same counter.
fn hash_seeded(bytes: &[u8], seed: u64) -> u64 {
    let mut hasher = DefaultHasher::new();
    hasher.write_u64(seed);
    hasher.write(bytes);
    hasher.finish()
}

/// Count-Min Sketch: `depth` hash rows of `width` double counters; a point
/// frequency is the minimum over the selected cells.
#[derive(Clone, Debug)]
pub struct CountMinSketch {
    width: usize,
    depth: usize,
    counters: Vec<f64>,
}

impl CountMinSketch {
    pub fn new(width: usize, depth: usize) -> Self {
        assert!(width > 0 && depth > 0);
        Self {
            width,
            depth,
            counters: vec![0.0; width * depth],
        }
    }

    pub fn add_count(&mut self, key: &[u8], value: f64) {
        for row in 0..self.depth {
            let col = hash_seeded(key, 233 * (row as u64 + 1)) as usize % self.width;
            self.counters[row * self.width + col] += value;
        }
    }

    pub fn freq_count(&self, key: &[u8]) -> f64 {
        let mut freq = f64::INFINITY;
        for row in 0..self.depth {
            let col = hash_seeded(key, 233 * (row as u64 + 1)) as usize % self.width;
            freq = freq.min(self.counters[row * self.width + col]);
        }
        freq
    }
}

/// HyperLogLog cardinality estimator. The bucket index is taken from the
/// low bits of the hash and each bucket records the maximum rank (position
/// of the first set bit, plus one) of the remaining bits.
///
/// `inv_sum` tracks `sum(2^-M[j])` incrementally so the estimate stays O(1).
#[derive(Clone, Debug)]
pub struct HyperLogLog {
    index_bits: u32,
    buckets: Vec<u8>,
    inv_sum: f64,
}

impl HyperLogLog {
    pub fn new(buckets: usize) -> Self {
        assert!(buckets.is_power_of_two());
        Self {
            index_bits: buckets.trailing_zeros(),
            buckets: vec![0; buckets],
            inv_sum: buckets as f64,
        }
    }

    pub fn add(&mut self, key: &[u8]) {
        let hash = hash_seeded(key, 233);
        let idx = (hash & ((1 << self.index_bits) - 1)) as usize;
        let rest = hash >> self.index_bits;
        let rank = if rest == 0 {
            64 - self.index_bits as u8 + 1
        } else {
            rest.trailing_zeros() as u8 + 1
        };
        if rank > self.buckets[idx] {
            self.inv_sum -= (-(self.buckets[idx] as f64)).exp2();
            self.buckets[idx] = rank;
            self.inv_sum += (-(rank as f64)).exp2();
        }
    }

    pub fn estimate(&self) -> f64 {
        let n = self.buckets.len() as f64;
        1.0 / self.inv_sum * n * n * 0.7213 / (1.0 + 1.079 / n)
    }
}

/// Read-only per-column statistics produced by the analyze pass.
#[derive(Clone, Debug)]
pub struct ColumnStats {
    pub min: Value,
    pub max: Value,
    /// Estimated distinct values divided by tuple count, in `(0, 1]`.
    pub distinct_rate: f64,
    pub cms: CountMinSketch,
    pub hll: HyperLogLog,
}

/// Per-table statistics snapshot.
#[derive(Clone, Debug)]
pub struct TableStats {
    pub tuple_num: u64,
    pub columns: Vec<ColumnStats>,
}

impl TableStats {
    pub fn column(&self, idx: usize) -> &ColumnStats {
        &self.columns[idx]
    }
}

/// Streaming builder fed one row at a time by the analyze scan.
pub struct TableStatsBuilder {
    tuple_num: u64,
    columns: Vec<ColumnBuilder>,
}

struct ColumnBuilder {
    min: Value,
    max: Value,
    cms: CountMinSketch,
    hll: HyperLogLog,
}

impl TableStatsBuilder {
    pub fn new(num_columns: usize, cms_width: usize, cms_depth: usize, hll_buckets: usize) -> Self {
        Self {
            tuple_num: 0,
            columns: (0..num_columns)
                .map(|_| ColumnBuilder {
                    min: Value::Null,
                    max: Value::Null,
                    cms: CountMinSketch::new(cms_width, cms_depth),
                    hll: HyperLogLog::new(hll_buckets),
                })
                .collect(),
        }
    }

    pub fn observe(&mut self, row: &Row) {
        self.tuple_num += 1;
        for (column, value) in self.columns.iter_mut().zip(row.values()) {
            let key = value.encode_key();
            column.cms.add_count(&key, 1.0);
            column.hll.add(&key);
            if column.min.is_null() || matches!(value.compare(&column.min), Some(std::cmp::Ordering::Less)) {
                column.min = value.clone();
            }
            if column.max.is_null() || matches!(value.compare(&column.max), Some(std::cmp::Ordering::Greater)) {
                column.max = value.clone();
            }
        }
    }

    pub fn finish(self) -> TableStats {
        let tuple_num = self.tuple_num;
        let columns = self
            .columns
            .into_iter()
            .map(|c| {
                let distinct_rate = if tuple_num == 0 {
                    1.0
                } else {
                    (c.hll.estimate() / tuple_num as f64).clamp(1.0 / tuple_num as f64, 1.0)
                };
                ColumnStats {
                    min: c.min,
                    max: c.max,
                    distinct_rate,
                    cms: c.cms,
                    hll: c.hll,
                }
            })
            .collect();
        TableStats { tuple_num, columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cms_never_undercounts() {
        let mut cms = CountMinSketch::new(4096, 4);
        for i in 0..100i64 {
            cms.add_count(&Value::Int(i).encode_key(), 1.0);
        }
        cms.add_count(&Value::Int(7).encode_key(), 9.0);
        let freq = cms.freq_count(&Value::Int(7).encode_key());
        assert!(freq >= 10.0);
        assert_eq!(cms.freq_count(&Value::Int(424242).encode_key()), 0.0);
    }

    #[test]
    fn hll_estimates_within_reason() {
        let mut hll = HyperLogLog::new(1024);
        for i in 0..10_000i64 {
            hll.add(&Value::Int(i).encode_key());
        }
        let est = hll.estimate();
        assert!((8_000.0..12_000.0).contains(&est), "estimate {est}");
    }

    #[test]
    fn hll_ignores_duplicates() {
        let mut hll = HyperLogLog::new(1024);
        for i in 0..5_000i64 {
            hll.add(&Value::Int(i).encode_key());
        }
        let first = hll.estimate();
        for _ in 0..10 {
            for i in 0..5_000i64 {
                hll.add(&Value::Int(i).encode_key());
            }
        }
        assert_eq!(hll.estimate(), first);
    }

    #[test]
    fn builder_tracks_min_max_and_rates() {
        let mut builder = TableStatsBuilder::new(2, 4096, 4, 1024);
        for i in 0..10_000i64 {
            builder.observe(&Row::new(vec![Value::Int(i), Value::Int(i % 10)]));
        }
        let stats = builder.finish();
        assert_eq!(stats.tuple_num, 10_000);
        assert_eq!(stats.column(0).min, Value::Int(0));
        assert_eq!(stats.column(0).max, Value::Int(9999));
        assert_eq!(stats.column(1).min, Value::Int(0));
        assert_eq!(stats.column(1).max, Value::Int(9));
        assert!(stats.column(0).distinct_rate > 0.7);
        assert!(stats.column(1).distinct_rate < stats.column(0).distinct_rate);
        let freq = stats.column(1).cms.freq_count(&Value::Int(3).encode_key());
        assert!(freq >= 1000.0);
    }
}
