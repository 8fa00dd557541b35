//! Compound filter expressions for WHERE clauses.
//!
//! A [`Filter`] is a small boolean expression tree: leaf comparisons over a
//! column plus AND/OR/NOT composition. `build` renders the tree as a WHERE
//! fragment with `$n` placeholders, pushing the bound values into a
//! [`ParamList`] as it goes, so placeholder indices never need string
//! rewriting.

use crate::param::ParamList;
use crate::value::{IntoValue, Value};

/// A boolean filter expression over mapped columns.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    /// Simple comparison: `column op $n`
    Compare {
        column: String,
        op: &'static str,
        value: Value,
    },

    /// Range check: `column BETWEEN $n AND $m`
    Between {
        column: String,
        low: Value,
        high: Value,
    },

    /// NULL check: `column IS NULL` / `column IS NOT NULL`
    NullCheck { column: String, is_null: bool },

    /// Membership: `column IN ($n, ...)`
    InList { column: String, values: Vec<Value> },

    /// All conditions must hold.
    And(Vec<Filter>),

    /// At least one condition must hold.
    Or(Vec<Filter>),

    /// Negation of the inner condition.
    Not(Box<Filter>),
}

impl Filter {
    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: "=",
            value: value.into_value(),
        }
    }

    /// `column <> value`
    pub fn ne(column: impl Into<String>, value: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: "<>",
            value: value.into_value(),
        }
    }

    /// `column > value`
    pub fn gt(column: impl Into<String>, value: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: ">",
            value: value.into_value(),
        }
    }

    /// `column >= value`
    pub fn gte(column: impl Into<String>, value: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: ">=",
            value: value.into_value(),
        }
    }

    /// `column < value`
    pub fn lt(column: impl Into<String>, value: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: "<",
            value: value.into_value(),
        }
    }

    /// `column <= value`
    pub fn lte(column: impl Into<String>, value: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: "<=",
            value: value.into_value(),
        }
    }

    /// `column LIKE pattern`
    pub fn like(column: impl Into<String>, pattern: impl IntoValue) -> Self {
        Filter::Compare {
            column: column.into(),
            op: "LIKE",
            value: pattern.into_value(),
        }
    }

    /// `column BETWEEN low AND high`
    pub fn between(column: impl Into<String>, low: impl IntoValue, high: impl IntoValue) -> Self {
        Filter::Between {
            column: column.into(),
            low: low.into_value(),
            high: high.into_value(),
        }
    }

    /// `column IS NULL`
    pub fn is_null(column: impl Into<String>) -> Self {
        Filter::NullCheck {
            column: column.into(),
            is_null: true,
        }
    }

    /// `column IS NOT NULL`
    pub fn is_not_null(column: impl Into<String>) -> Self {
        Filter::NullCheck {
            column: column.into(),
            is_null: false,
        }
    }

    /// `column IN (values...)`
    pub fn in_list<V: IntoValue>(column: impl Into<String>, values: Vec<V>) -> Self {
        Filter::InList {
            column: column.into(),
            values: values.into_iter().map(IntoValue::into_value).collect(),
        }
    }

    /// Conjunction of filters.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    /// Disjunction of filters.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    /// Build the SQL fragment, collecting bound values into `params`.
    pub fn build(&self, params: &mut ParamList) -> String {
        match self {
            Filter::Compare { column, op, value } => {
                let idx = params.push(value.clone());
                format!("{} {} ${}", column, op, idx)
            }
            Filter::Between { column, low, high } => {
                let lo = params.push(low.clone());
                let hi = params.push(high.clone());
                format!("{} BETWEEN ${} AND ${}", column, lo, hi)
            }
            Filter::NullCheck { column, is_null } => {
                if *is_null {
                    format!("{} IS NULL", column)
                } else {
                    format!("{} IS NOT NULL", column)
                }
            }
            Filter::InList { column, values } => {
                if values.is_empty() {
                    // An empty IN list matches nothing.
                    return "1=0".to_string();
                }
                let placeholders: Vec<String> = values
                    .iter()
                    .map(|v| format!("${}", params.push(v.clone())))
                    .collect();
                format!("{} IN ({})", column, placeholders.join(", "))
            }
            Filter::And(children) => Self::join(children, " AND ", params),
            Filter::Or(children) => Self::join(children, " OR ", params),
            Filter::Not(inner) => {
                let sql = inner.build(params);
                format!("NOT ({})", sql)
            }
        }
    }

    fn join(children: &[Filter], sep: &str, params: &mut ParamList) -> String {
        let parts: Vec<String> = children
            .iter()
            .map(|child| {
                let sql = child.build(params);
                if child.needs_parens() {
                    format!("({})", sql)
                } else {
                    sql
                }
            })
            .collect();
        parts.join(sep)
    }

    // A child of AND/OR is parenthesized unless it is a simple comparison
    // or null check, so multi-token children read unambiguously.
    fn needs_parens(&self) -> bool {
        !matches!(self, Filter::Compare { .. } | Filter::NullCheck { .. })
    }

    /// Render a slice of filters ANDed together as one WHERE fragment.
    ///
    /// Returns an empty string for an empty slice.
    pub fn render_all(filters: &[Filter], params: &mut ParamList) -> String {
        if filters.is_empty() {
            return String::new();
        }
        Self::join(filters, " AND ", params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(filter: &Filter) -> (String, usize) {
        let mut params = ParamList::new();
        let sql = filter.build(&mut params);
        (sql, params.len())
    }

    #[test]
    fn simple_eq() {
        let (sql, n) = render(&Filter::eq("name", "alice"));
        assert_eq!(sql, "name = $1");
        assert_eq!(n, 1);
    }

    #[test]
    fn between_binds_two() {
        let (sql, n) = render(&Filter::between("age", 18_i32, 65_i32));
        assert_eq!(sql, "age BETWEEN $1 AND $2");
        assert_eq!(n, 2);
    }

    #[test]
    fn compound_between_and_not_equal() {
        // (X BETWEEN 20 AND 25) AND (X <> 20)
        let filter = Filter::and(vec![
            Filter::between("X", 20_i32, 25_i32),
            Filter::ne("X", 20_i32),
        ]);
        let (sql, n) = render(&filter);
        assert_eq!(sql, "(X BETWEEN $1 AND $2) AND X <> $3");
        assert_eq!(n, 3);
    }

    #[test]
    fn nested_or_inside_and() {
        let filter = Filter::and(vec![
            Filter::eq("status", "active"),
            Filter::or(vec![Filter::eq("role", "admin"), Filter::eq("role", "owner")]),
        ]);
        let (sql, n) = render(&filter);
        assert_eq!(sql, "status = $1 AND (role = $2 OR role = $3)");
        assert_eq!(n, 3);
    }

    #[test]
    fn not_wraps_inner() {
        let (sql, _) = render(&Filter::not(Filter::eq("banned", true)));
        assert_eq!(sql, "NOT (banned = $1)");
    }

    #[test]
    fn in_list_renders_placeholders() {
        let (sql, n) = render(&Filter::in_list("id", vec![1_i64, 2, 3]));
        assert_eq!(sql, "id IN ($1, $2, $3)");
        assert_eq!(n, 3);
    }

    #[test]
    fn empty_in_list_matches_nothing() {
        let (sql, n) = render(&Filter::in_list::<i64>("id", vec![]));
        assert_eq!(sql, "1=0");
        assert_eq!(n, 0);
    }

    #[test]
    fn null_checks() {
        let (sql, n) = render(&Filter::is_null("deleted_at"));
        assert_eq!(sql, "deleted_at IS NULL");
        assert_eq!(n, 0);
        let (sql, _) = render(&Filter::is_not_null("deleted_at"));
        assert_eq!(sql, "deleted_at IS NOT NULL");
    }

    #[test]
    fn render_all_joins_with_and() {
        let filters = vec![Filter::eq("a", 1_i64), Filter::gt("b", 2_i64)];
        let mut params = ParamList::new();
        let sql = Filter::render_all(&filters, &mut params);
        assert_eq!(sql, "a = $1 AND b > $2");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn render_all_empty_is_empty() {
        let mut params = ParamList::new();
        assert_eq!(Filter::render_all(&[], &mut params), "");
    }
}
