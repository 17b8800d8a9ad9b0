//! Boolean filter trees for WHERE and HAVING clauses.
//!
//! A [`Where`] is an immutable tree built functionally: constructors make
//! leaf comparisons, `.and()` / `.or()` / `.xor()` compose them, and
//! rendering is a pure recursive fold. Attached clauses render as
//! `lhs OP (rhs)` with the left side bare, so a root comparison with an
//! OR'd sub-tree comes out as `a = '1' OR (b = '2')`.

use std::fmt;

use crate::value::{SqlValue, ToSqlValue};

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    /// Equal (=)
    Eq,
    /// Not equal (!=)
    Ne,
    /// Greater than (>)
    Gt,
    /// Greater than or equal (>=)
    Gte,
    /// Less than (<)
    Lt,
    /// Less than or equal (<=)
    Lte,
    /// LIKE pattern match
    Like,
    /// NOT LIKE pattern match
    NotLike,
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
            Self::Like => write!(f, "LIKE"),
            Self::NotLike => write!(f, "NOT LIKE"),
        }
    }
}

/// Boolean operators joining attached clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    /// AND conjunction
    And,
    /// OR disjunction
    Or,
    /// XOR exclusive disjunction
    Xor,
}

impl fmt::Display for BoolOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
            Self::Xor => write!(f, "XOR"),
        }
    }
}

/// A filter expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Where {
    /// Simple comparison: column op value.
    Compare {
        /// Column reference, possibly alias-qualified.
        column: String,
        /// Comparison operator.
        op: CompareOp,
        /// Right-hand value.
        value: SqlValue,
    },
    /// List membership: column [NOT] IN (v1, v2, ...).
    InList {
        /// Column reference.
        column: String,
        /// Candidate values.
        values: Vec<SqlValue>,
        /// Renders NOT IN when set.
        negated: bool,
    },
    /// NULL check: column IS [NOT] NULL.
    Null {
        /// Column reference.
        column: String,
        /// Renders IS NOT NULL when set.
        negated: bool,
    },
    /// Attached clause: lhs OP (rhs).
    Joined {
        /// Boolean operator between the sides.
        op: BoolOp,
        /// Left side, rendered bare.
        lhs: Box<Where>,
        /// Right side, rendered parenthesized.
        rhs: Box<Where>,
    },
    /// Raw SQL fragment, rendered verbatim.
    Raw(String),
}

impl Where {
    /// Creates an equality comparison.
    pub fn eq<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::cmp(column, CompareOp::Eq, value)
    }

    /// Creates an inequality comparison.
    pub fn ne<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::cmp(column, CompareOp::Ne, value)
    }

    /// Creates a greater-than comparison.
    pub fn gt<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::cmp(column, CompareOp::Gt, value)
    }

    /// Creates a greater-than-or-equal comparison.
    pub fn gte<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::cmp(column, CompareOp::Gte, value)
    }

    /// Creates a less-than comparison.
    pub fn lt<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::cmp(column, CompareOp::Lt, value)
    }

    /// Creates a less-than-or-equal comparison.
    pub fn lte<V: ToSqlValue>(column: &str, value: V) -> Self {
        Self::cmp(column, CompareOp::Lte, value)
    }

    /// Creates a LIKE comparison.
    pub fn like<V: ToSqlValue>(column: &str, pattern: V) -> Self {
        Self::cmp(column, CompareOp::Like, pattern)
    }

    /// Creates a comparison with an explicit operator.
    pub fn cmp<V: ToSqlValue>(column: &str, op: CompareOp, value: V) -> Self {
        Self::Compare {
            column: column.to_string(),
            op,
            value: value.to_sql_value(),
        }
    }

    /// Creates an IN list membership test.
    pub fn any<V: ToSqlValue>(column: &str, values: Vec<V>) -> Self {
        Self::InList {
            column: column.to_string(),
            values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            negated: false,
        }
    }

    /// Creates a NOT IN list membership test.
    pub fn none<V: ToSqlValue>(column: &str, values: Vec<V>) -> Self {
        Self::InList {
            column: column.to_string(),
            values: values.into_iter().map(ToSqlValue::to_sql_value).collect(),
            negated: true,
        }
    }

    /// Combines IN and NOT IN sets on one column.
    ///
    /// When both sets are non-empty the IN test comes first, AND'ed with
    /// the NOT IN test. Returns `None` when both sets are empty.
    pub fn within<V: ToSqlValue>(
        column: &str,
        in_values: Vec<V>,
        not_in_values: Vec<V>,
    ) -> Option<Self> {
        let include = (!in_values.is_empty()).then(|| Self::any(column, in_values));
        let exclude = (!not_in_values.is_empty()).then(|| Self::none(column, not_in_values));
        match (include, exclude) {
            (Some(i), Some(e)) => Some(i.and(e)),
            (Some(i), None) => Some(i),
            (None, Some(e)) => Some(e),
            (None, None) => None,
        }
    }

    /// Creates an IS NULL test.
    #[must_use]
    pub fn is_null(column: &str) -> Self {
        Self::Null {
            column: column.to_string(),
            negated: false,
        }
    }

    /// Creates an IS NOT NULL test.
    #[must_use]
    pub fn is_not_null(column: &str) -> Self {
        Self::Null {
            column: column.to_string(),
            negated: true,
        }
    }

    /// Creates a raw SQL fragment.
    ///
    /// The fragment is rendered verbatim; callers are responsible for
    /// escaping anything interpolated into it.
    #[must_use]
    pub fn raw(sql: impl Into<String>) -> Self {
        Self::Raw(sql.into())
    }

    /// Attaches another expression with AND.
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        self.join(BoolOp::And, other)
    }

    /// Attaches another expression with OR.
    #[must_use]
    pub fn or(self, other: Self) -> Self {
        self.join(BoolOp::Or, other)
    }

    /// Attaches another expression with XOR.
    #[must_use]
    pub fn xor(self, other: Self) -> Self {
        self.join(BoolOp::Xor, other)
    }

    /// Attaches another expression with the given boolean operator.
    #[must_use]
    pub fn join(self, op: BoolOp, other: Self) -> Self {
        Self::Joined {
            op,
            lhs: Box::new(self),
            rhs: Box::new(other),
        }
    }

    /// Renders the tree to a SQL boolean expression.
    ///
    /// Pure and repeatable: identical trees yield identical strings.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Compare { column, op, value } => {
                format!("{column} {op} {}", value.to_sql_inline())
            }
            Self::InList {
                column,
                values,
                negated,
            } => {
                let list: Vec<String> = values.iter().map(SqlValue::to_sql_inline).collect();
                let kw = if *negated { "NOT IN" } else { "IN" };
                format!("{column} {kw} ({})", list.join(", "))
            }
            Self::Null { column, negated } => {
                if *negated {
                    format!("{column} IS NOT NULL")
                } else {
                    format!("{column} IS NULL")
                }
            }
            Self::Joined { op, lhs, rhs } => {
                format!("{} {op} ({})", lhs.render(), rhs.render())
            }
            Self::Raw(sql) => sql.clone(),
        }
    }

    /// Visits every column reference in the tree.
    pub fn for_each_column<F: FnMut(&str)>(&self, f: &mut F) {
        match self {
            Self::Compare { column, .. }
            | Self::InList { column, .. }
            | Self::Null { column, .. } => f(column),
            Self::Joined { lhs, rhs, .. } => {
                lhs.for_each_column(f);
                rhs.for_each_column(f);
            }
            Self::Raw(_) => {}
        }
    }

    /// Rebuilds the tree with every leaf value passed through `f`.
    ///
    /// `f` receives the column reference alongside each value, which is
    /// how per-column storage preparation is applied before rendering.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`.
    pub fn map_values<E, F>(self, f: &mut F) -> Result<Self, E>
    where
        F: FnMut(&str, SqlValue) -> Result<SqlValue, E>,
    {
        Ok(match self {
            Self::Compare { column, op, value } => {
                let value = f(&column, value)?;
                Self::Compare { column, op, value }
            }
            Self::InList {
                column,
                values,
                negated,
            } => {
                let values = values
                    .into_iter()
                    .map(|v| f(&column, v))
                    .collect::<Result<Vec<_>, E>>()?;
                Self::InList {
                    column,
                    values,
                    negated,
                }
            }
            Self::Joined { op, lhs, rhs } => Self::Joined {
                op,
                lhs: Box::new(lhs.map_values(f)?),
                rhs: Box::new(rhs.map_values(f)?),
            },
            other @ (Self::Null { .. } | Self::Raw(_)) => other,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_renders_quoted_literal() {
        let w = Where::eq("status", "active");
        assert_eq!(w.render(), "status = 'active'");
    }

    #[test]
    fn in_list_renders() {
        let w = Where::any("col", vec!["a", "b"]);
        assert_eq!(w.render(), "col IN ('a', 'b')");
        let w = Where::none("col", vec!["a", "b"]);
        assert_eq!(w.render(), "col NOT IN ('a', 'b')");
    }

    #[test]
    fn attached_clause_parenthesizes_right_side_only() {
        let w = Where::eq("a", 1_i64).or(Where::eq("b", 2_i64));
        assert_eq!(w.render(), "a = 1 OR (b = 2)");
    }

    #[test]
    fn xor_renders() {
        let w = Where::eq("a", 1_i64).xor(Where::eq("b", 2_i64));
        assert_eq!(w.render(), "a = 1 XOR (b = 2)");
    }

    #[test]
    fn deep_composition() {
        let w = Where::eq("status", "open")
            .and(Where::gt("age", 18_i64).or(Where::eq("verified", true)));
        assert_eq!(
            w.render(),
            "status = 'open' AND (age > 18 OR (verified = TRUE))"
        );
    }

    #[test]
    fn within_puts_in_before_not_in() {
        let w = Where::within("c", vec![1_i64, 2], vec![3_i64]).unwrap();
        assert_eq!(w.render(), "c IN (1, 2) AND (c NOT IN (3))");
        assert!(Where::within::<i64>("c", vec![], vec![]).is_none());
    }

    #[test]
    fn rendering_is_deterministic() {
        let build = || {
            Where::eq("a", "x")
                .and(Where::any("b", vec![1_i64, 2]))
                .or(Where::is_null("c"))
        };
        assert_eq!(build().render(), build().render());
    }

    #[test]
    fn map_values_visits_every_leaf() {
        let w = Where::eq("a", 1_i64).and(Where::any("b", vec![2_i64, 3]));
        let mut seen = Vec::new();
        let w = w
            .map_values::<(), _>(&mut |col, v| {
                seen.push(col.to_string());
                Ok(v)
            })
            .unwrap();
        assert_eq!(seen, vec!["a", "b", "b"]);
        assert_eq!(w.render(), "a = 1 AND (b IN (2, 3))");
    }

    #[test]
    fn columns_visitor() {
        let w = Where::eq("a", 1_i64).or(Where::is_null("b"));
        let mut cols = Vec::new();
        w.for_each_column(&mut |c| cols.push(c.to_string()));
        assert_eq!(cols, vec!["a", "b"]);
    }
}
