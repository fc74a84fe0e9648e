use common::ColumnId;
use types::SqlType;

/// One column of an operator's output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputColumn {
    pub id: ColumnId,
    pub name: String,
    pub ty: SqlType,
}

impl OutputColumn {
    pub fn new(id: ColumnId, name: impl Into<String>, ty: SqlType) -> Self {
        Self {
            id,
            name: name.into(),
            ty,
        }
    }
}

/// Ordered column descriptors for the rows an operator produces.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutputSchema {
    pub columns: Vec<OutputColumn>,
}

impl OutputSchema {
    pub fn new(columns: Vec<OutputColumn>) -> Self {
        Self { columns }
    }

    pub fn size(&self) -> usize {
        self.columns.len()
    }

    /// Row ordinal of the column with the given global id.
    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn column_type(&self, id: ColumnId) -> Option<SqlType> {
        self.columns.iter().find(|c| c.id == id).map(|c| c.ty)
    }

    /// Left-then-right concatenation, as produced by joins.
    pub fn concat(left: &OutputSchema, right: &OutputSchema) -> OutputSchema {
        let mut columns = left.columns.clone();
        columns.extend(right.columns.iter().cloned());
        OutputSchema { columns }
    }

    pub fn names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }
}
