//! Cardinality estimation over the catalog's statistics.
//!
//! Columns are assumed uniformly distributed and independent; selectivities
//! multiply. Only predicates of the shape `column op literal` (either side)
//! contribute to a scan estimate, and only `column = column` equi-predicates
//! contribute to a join estimate.

use catalog::TableStats;
use common::ColumnId;
use expr::{CmpOp, OutputSchema, PredicateVec};
use hashbrown::HashMap;
use types::{SqlType, Value};

/// Estimated output of a plan subtree: row count plus the distinct rate of
/// every column it produces.
#[derive(Clone, Debug, Default)]
pub struct Summary {
    pub size: f64,
    pub distinct_rate: Vec<(ColumnId, f64)>,
}

pub(crate) struct Interval {
    lo: Option<(Value, bool)>,
    hi: Option<(Value, bool)>,
}

impl Interval {
    fn new() -> Self {
        Self { lo: None, hi: None }
    }

    /// Tighten the lower bound. An exclusive bound at the same value beats
    /// an inclusive one.
    fn raise_lo(&mut self, v: &Value, inclusive: bool) {
        let replace = match &self.lo {
            None => true,
            Some((cur, _)) => {
                let ord = v.compare(cur);
                if inclusive {
                    matches!(ord, Some(std::cmp::Ordering::Greater))
                } else {
                    matches!(
                        ord,
                        Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)
                    )
                }
            }
        };
        if replace {
            self.lo = Some((v.clone(), inclusive));
        }
    }

    fn lower_hi(&mut self, v: &Value, inclusive: bool) {
        let replace = match &self.hi {
            None => true,
            Some((cur, _)) => {
                let ord = v.compare(cur);
                if inclusive {
                    matches!(ord, Some(std::cmp::Ordering::Less))
                } else {
                    matches!(
                        ord,
                        Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)
                    )
                }
            }
        };
        if replace {
            self.hi = Some((v.clone(), inclusive));
        }
    }

    fn apply(&mut self, op: CmpOp, v: &Value) {
        match op {
            CmpOp::Gt => self.raise_lo(v, false),
            CmpOp::Ge => self.raise_lo(v, true),
            CmpOp::Lt => self.lower_hi(v, false),
            CmpOp::Le => self.lower_hi(v, true),
            CmpOp::Eq => {
                self.raise_lo(v, true);
                self.lower_hi(v, true);
            }
            CmpOp::Ne => {}
        }
    }
}

/// Gather per-column `[lo, hi]` intervals from a scan's predicates. Shared
/// with the range-scan conversion rule.
pub(crate) fn column_interval(predicates: &PredicateVec, column: ColumnId) -> Interval {
    let mut interval = Interval::new();
    for pred in predicates.iter() {
        if let Some((op, v)) = pred.literal_against(column) {
            interval.apply(op, v);
        }
    }
    interval
}

pub(crate) fn interval_bounds(
    interval: &Interval,
) -> (Option<(Value, bool)>, Option<(Value, bool)>) {
    (interval.lo.clone(), interval.hi.clone())
}

/// Estimate the output of a base-table scan under its predicates.
///
/// Point queries use the Count-Min Sketch; narrow integer ranges sum the
/// sketch over each point; everything else falls back to `(hi-lo)` over
/// `(max-min)`. String ranges contribute no selectivity.
pub fn estimate_table(
    stats: &TableStats,
    predicates: &PredicateVec,
    schema: &OutputSchema,
) -> Summary {
    let mut out = Summary {
        size: stats.tuple_num as f64,
        distinct_rate: schema
            .columns
            .iter()
            .enumerate()
            .map(|(ordinal, c)| (c.id, stats.column(ordinal).distinct_rate))
            .collect(),
    };
    if stats.tuple_num == 0 {
        return out;
    }
    let orig_size = stats.tuple_num as f64;
    let mut selectivity = 1.0;
    let mut distinct_count = vec![0.0f64; schema.size()];

    for (ordinal, column) in schema.columns.iter().enumerate() {
        let col_stats = stats.column(ordinal);
        let interval = column_interval(predicates, column.id);
        if interval.lo.is_none() && interval.hi.is_none() {
            distinct_count[ordinal] = col_stats.distinct_rate * orig_size;
            continue;
        }
        let (lo, lo_incl) = interval
            .lo
            .clone()
            .unwrap_or_else(|| (col_stats.min.clone(), true));
        let (hi, hi_incl) = interval
            .hi
            .clone()
            .unwrap_or_else(|| (col_stats.max.clone(), true));

        let ord = match lo.compare(&hi) {
            Some(ord) => ord,
            None => continue, // incomparable literal, ignore the bounds
        };
        if ord == std::cmp::Ordering::Equal {
            if !lo_incl || !hi_incl {
                out.size = 0.0;
                return out;
            }
            let freq = col_stats.cms.freq_count(&lo.encode_key());
            if freq == 0.0 {
                out.size = 0.0;
                return out;
            }
            distinct_count[ordinal] = 1.0;
            selectivity *= freq / orig_size;
            continue;
        }
        if ord == std::cmp::Ordering::Greater {
            out.size = 0.0;
            return out;
        }
        if column.ty.is_integer() {
            let (l, r) = (lo.as_int().unwrap_or(0), hi.as_int().unwrap_or(0));
            if r - l <= 100 {
                let mut sum = 0.0;
                let mut nonzero = 0.0;
                let from = l + 1 - lo_incl as i64;
                let to = r - 1 + hi_incl as i64;
                for point in from..=to {
                    let freq = col_stats
                        .cms
                        .freq_count(&Value::Int(point).encode_key());
                    if freq > 0.0 {
                        nonzero += 1.0;
                    }
                    sum += freq;
                }
                if nonzero == 0.0 {
                    out.size = 0.0;
                    return out;
                }
                distinct_count[ordinal] = nonzero;
                selectivity *= sum / orig_size;
                continue;
            }
        }
        let fraction = range_fraction(column.ty, &lo, &hi, &col_stats.min, &col_stats.max);
        distinct_count[ordinal] = fraction * col_stats.distinct_rate * orig_size;
        selectivity *= fraction;
    }

    out.size = orig_size * selectivity;
    if out.size > 0.0 {
        for (ordinal, entry) in out.distinct_rate.iter_mut().enumerate() {
            entry.1 = (distinct_count[ordinal] / out.size).clamp(1.0 / out.size, 1.0);
        }
    }
    out
}

fn range_fraction(ty: SqlType, lo: &Value, hi: &Value, min: &Value, max: &Value) -> f64 {
    if ty.is_string() {
        return 1.0;
    }
    let width = match (min.as_float(), max.as_float()) {
        (Some(a), Some(b)) if b > a => b - a,
        _ => return 1.0,
    };
    match (lo.as_float(), hi.as_float()) {
        (Some(a), Some(b)) => ((b - a) / width).clamp(0.0, 1.0),
        _ => 1.0,
    }
}

/// Estimate an equi-join. The cross product is shrunk by the classic
/// `1 / max(ndv)` selectivity of the first equi-predicate connecting the
/// two sides; the joined columns' distinct rates collapse to the minimum.
pub fn estimate_join_eq(predicates: &PredicateVec, build: &Summary, probe: &Summary) -> Summary {
    let mut out = Summary {
        size: build.size * probe.size,
        distinct_rate: build
            .distinct_rate
            .iter()
            .chain(probe.distinct_rate.iter())
            .cloned()
            .collect(),
    };
    if out.size == 0.0 {
        return out;
    }
    let build_rates: HashMap<ColumnId, f64> = build.distinct_rate.iter().cloned().collect();
    let probe_rates: HashMap<ColumnId, f64> = probe.distinct_rate.iter().cloned().collect();

    for pred in predicates.iter() {
        if !pred.is_eq() {
            continue;
        }
        let (Some(a), Some(b)) = (pred.left_col_id(), pred.right_col_id()) else {
            continue;
        };
        let pair = if build_rates.contains_key(&a) && probe_rates.contains_key(&b) {
            Some((a, b))
        } else if build_rates.contains_key(&b) && probe_rates.contains_key(&a) {
            Some((b, a))
        } else {
            None
        };
        if let Some((build_col, probe_col)) = pair {
            let d_build = build_rates[&build_col];
            let d_probe = probe_rates[&probe_col];
            let joined = d_build.min(d_probe);
            for entry in out.distinct_rate.iter_mut() {
                if entry.0 == build_col || entry.0 == probe_col {
                    entry.1 = joined;
                }
            }
            out.size /= (build.size * d_build).max(probe.size * d_probe);
            break;
        }
    }
    out
}
