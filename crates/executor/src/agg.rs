//! Grouped aggregation in a single pass over the input.

use common::{DbResult, Row};
use expr::{AggExprFunction, AggStates, ExprFunction};
use hashbrown::HashMap;

use crate::{hash_keys, Executor};

struct Group {
    /// First row of the group; resolves group-by columns at finish time.
    representative: Row,
    output_states: Vec<AggStates>,
    having_state: Option<AggStates>,
}

/// Hash aggregation. `init` drains the input, clustering rows by the hash
/// of their group-by key values; each group keeps one accumulator set per
/// output expression plus one for the HAVING predicate. `next` walks the
/// groups, skipping those whose HAVING result is zero or NULL.
pub struct AggregateExec {
    input: Box<dyn Executor>,
    group_by: Vec<ExprFunction>,
    outputs: Vec<AggExprFunction>,
    having: Option<AggExprFunction>,
    groups: Vec<Group>,
    lookup: HashMap<u64, usize>,
    pos: usize,
}

impl AggregateExec {
    pub fn new(
        input: Box<dyn Executor>,
        group_by: Vec<ExprFunction>,
        outputs: Vec<AggExprFunction>,
        having: Option<AggExprFunction>,
    ) -> Self {
        Self {
            input,
            group_by,
            outputs,
            having,
            groups: Vec::new(),
            lookup: HashMap::new(),
            pos: 0,
        }
    }
}

impl Executor for AggregateExec {
    fn init(&mut self) -> DbResult<()> {
        self.input.init()?;
        self.groups.clear();
        self.lookup.clear();
        self.pos = 0;
        while let Some(row) = self.input.next()? {
            let key = hash_keys(&self.group_by, &row)?;
            match self.lookup.get(&key) {
                None => {
                    let mut output_states = Vec::with_capacity(self.outputs.len());
                    for f in &self.outputs {
                        output_states.push(f.first_evaluate(&row)?);
                    }
                    let having_state = match &self.having {
                        Some(h) => Some(h.first_evaluate(&row)?),
                        None => None,
                    };
                    self.lookup.insert(key, self.groups.len());
                    self.groups.push(Group {
                        representative: row,
                        output_states,
                        having_state,
                    });
                }
                Some(&idx) => {
                    let group = &mut self.groups[idx];
                    for (f, state) in self.outputs.iter().zip(group.output_states.iter_mut()) {
                        f.aggregate(state, &row)?;
                    }
                    if let (Some(h), Some(state)) = (&self.having, group.having_state.as_mut()) {
                        h.aggregate(state, &row)?;
                    }
                }
            }
        }
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Row>> {
        while self.pos < self.groups.len() {
            let group = &self.groups[self.pos];
            self.pos += 1;
            if let (Some(h), Some(state)) = (&self.having, group.having_state.as_ref()) {
                if !h.last_evaluate(state, &group.representative)?.truthy() {
                    continue;
                }
            }
            let mut values = Vec::with_capacity(self.outputs.len());
            for (f, state) in self.outputs.iter().zip(group.output_states.iter()) {
                values.push(f.last_evaluate(state, &group.representative)?);
            }
            return Ok(Some(Row::new(values)));
        }
        Ok(None)
    }
}
