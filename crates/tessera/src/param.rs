//! Ordered parameter storage for generated statements.

use crate::value::Value;
use tokio_postgres::types::ToSql;

/// An ordered list of bound parameter values.
///
/// Placeholder indices are 1-based (`$1`, `$2`, ...) and assigned in push
/// order, so the list can be built while the statement text is assembled.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParamList {
    params: Vec<Value>,
}

impl ParamList {
    /// Create a new empty parameter list.
    pub fn new() -> Self {
        Self { params: Vec::new() }
    }

    /// Add a parameter and return its 1-based placeholder index.
    pub fn push(&mut self, value: Value) -> usize {
        self.params.push(value);
        self.params.len()
    }

    /// Get the current parameter count.
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// Check if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Borrow the stored values in placeholder order.
    pub fn values(&self) -> &[Value] {
        &self.params
    }

    /// Consume the list, yielding the values in placeholder order.
    pub fn into_values(self) -> Vec<Value> {
        self.params
    }

    /// Get all parameters as references for the driver.
    pub fn as_refs(&self) -> Vec<&(dyn ToSql + Sync)> {
        self.params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
    }

    /// Extend this list with another list's parameters.
    pub fn extend(&mut self, other: ParamList) {
        self.params.extend(other.params);
    }
}

impl From<Vec<Value>> for ParamList {
    fn from(params: Vec<Value>) -> Self {
        Self { params }
    }
}
