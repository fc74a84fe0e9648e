use common::ColumnId;
use types::Value;

use crate::{CmpOp, Expr};

/// One conjunct of a WHERE/ON clause, with the table bitsets of its two
/// operand subtrees. Bit `k` corresponds to the `k`-th base-table instance
/// of the plan, as assigned by the binder.
#[derive(Clone, Debug)]
pub struct Predicate {
    pub expr: Expr,
    pub left_bits: u64,
    pub right_bits: u64,
}

impl Predicate {
    /// Wrap a conjunct, deriving operand bitsets through `col_bits`, which
    /// maps a column id to the bitset of the table instance owning it.
    pub fn new(expr: Expr, col_bits: &impl Fn(ColumnId) -> u64) -> Self {
        let (left_bits, right_bits) = match &expr {
            Expr::Cmp { left, right, .. } => (bits_of(left, col_bits), bits_of(right, col_bits)),
            other => (bits_of(other, col_bits), 0),
        };
        Self {
            expr,
            left_bits,
            right_bits,
        }
    }

    pub fn bits(&self) -> u64 {
        self.left_bits | self.right_bits
    }

    /// True when every referenced table is inside `bitset`.
    pub fn subsumed_by(&self, bitset: u64) -> bool {
        self.bits() & !bitset == 0
    }

    pub fn is_eq(&self) -> bool {
        matches!(self.expr, Expr::Cmp { op: CmpOp::Eq, .. })
    }

    pub fn cmp_op(&self) -> Option<CmpOp> {
        match &self.expr {
            Expr::Cmp { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Column id of the left operand when it is a bare column.
    pub fn left_col_id(&self) -> Option<ColumnId> {
        match &self.expr {
            Expr::Cmp { left, .. } => match **left {
                Expr::Column(id) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn right_col_id(&self) -> Option<ColumnId> {
        match &self.expr {
            Expr::Cmp { right, .. } => match **right {
                Expr::Column(id) => Some(id),
                _ => None,
            },
            _ => None,
        }
    }

    /// Literal of the left operand when it is a bare literal.
    pub fn left_literal(&self) -> Option<&Value> {
        match &self.expr {
            Expr::Cmp { left, .. } => match &**left {
                Expr::Literal(v) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn right_literal(&self) -> Option<&Value> {
        match &self.expr {
            Expr::Cmp { right, .. } => match &**right {
                Expr::Literal(v) => Some(v),
                _ => None,
            },
            _ => None,
        }
    }

    /// `column op literal` or `literal op column` against the given column:
    /// returns the literal and the op normalized to have the column on the
    /// left.
    pub fn literal_against(&self, column: ColumnId) -> Option<(CmpOp, &Value)> {
        let op = self.cmp_op()?;
        if self.left_col_id() == Some(column) {
            if let Some(v) = self.right_literal() {
                return Some((op, v));
            }
        }
        if self.right_col_id() == Some(column) {
            if let Some(v) = self.left_literal() {
                return Some((op.flipped(), v));
            }
        }
        None
    }
}

fn bits_of(expr: &Expr, col_bits: &impl Fn(ColumnId) -> u64) -> u64 {
    let mut cols = Vec::new();
    expr.collect_columns(&mut cols);
    cols.into_iter().fold(0, |acc, id| acc | col_bits(id))
}

/// Flat list of conjuncts; the unit the optimizer's rules shuffle around.
#[derive(Clone, Debug, Default)]
pub struct PredicateVec {
    preds: Vec<Predicate>,
}

impl PredicateVec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split an optional filter expression on its top-level ANDs.
    pub fn from_expr(expr: Option<Expr>, col_bits: &impl Fn(ColumnId) -> u64) -> Self {
        let mut vec = Self::new();
        if let Some(expr) = expr {
            split_conjuncts(expr, col_bits, &mut vec.preds);
        }
        vec
    }

    pub fn push(&mut self, pred: Predicate) {
        self.preds.push(pred);
    }

    pub fn append(&mut self, other: PredicateVec) {
        self.preds.extend(other.preds);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Predicate> {
        self.preds.iter()
    }

    pub fn len(&self) -> usize {
        self.preds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preds.is_empty()
    }

    pub fn into_vec(self) -> Vec<Predicate> {
        self.preds
    }

    /// AND-fold back into a single expression.
    pub fn to_expr(&self) -> Option<Expr> {
        let mut iter = self.preds.iter();
        let first = iter.next()?.expr.clone();
        Some(iter.fold(first, |acc, p| acc.and(p.expr.clone())))
    }

    /// Bitset of every table referenced by any conjunct.
    pub fn bits(&self) -> u64 {
        self.preds.iter().fold(0, |acc, p| acc | p.bits())
    }
}

impl FromIterator<Predicate> for PredicateVec {
    fn from_iter<T: IntoIterator<Item = Predicate>>(iter: T) -> Self {
        Self {
            preds: iter.into_iter().collect(),
        }
    }
}

fn split_conjuncts(expr: Expr, col_bits: &impl Fn(ColumnId) -> u64, out: &mut Vec<Predicate>) {
    match expr {
        Expr::Logic {
            op: crate::LogicOp::And,
            left,
            right,
        } => {
            split_conjuncts(*left, col_bits, out);
            split_conjuncts(*right, col_bits, out);
        }
        other => out.push(Predicate::new(other, col_bits)),
    }
}
