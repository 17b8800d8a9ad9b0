//! Clause tags and the fragment builder.
//!
//! Each [`Tag`] renders one `KEYWORD value` clause of a statement. A
//! [`Builder`] holds an ordered list of fragments and concatenates their
//! rendered forms space-joined, wrapping nested builders in parentheses
//! so they can stand in as subqueries.

use std::fmt;

use crate::expr::Where;

/// Join flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    /// INNER JOIN
    #[default]
    Inner,
    /// LEFT JOIN
    Left,
    /// RIGHT JOIN
    Right,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner => write!(f, "INNER JOIN"),
            Self::Left => write!(f, "LEFT JOIN"),
            Self::Right => write!(f, "RIGHT JOIN"),
        }
    }
}

/// Sort direction for ORDER BY entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderDirection {
    /// Ascending order (ASC)
    #[default]
    Asc,
    /// Descending order (DESC)
    Desc,
}

impl fmt::Display for OrderDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Asc => write!(f, "ASC"),
            Self::Desc => write!(f, "DESC"),
        }
    }
}

/// One rendered clause of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    /// SELECT [DISTINCT] columns
    Select {
        /// Deduplicate result rows.
        distinct: bool,
        /// Columns, already alias-qualified.
        columns: Vec<String>,
    },
    /// FROM table alias
    From {
        /// Table name.
        table: String,
        /// Allocated alias (`t1`).
        alias: String,
    },
    /// kind table alias ON (condition)
    Join {
        /// Join flavor.
        kind: JoinKind,
        /// Joined table name.
        table: String,
        /// Allocated alias (`t<n>`).
        alias: String,
        /// ON condition.
        on: Where,
    },
    /// WHERE tree
    Where(Where),
    /// GROUP BY columns
    GroupBy(Vec<String>),
    /// HAVING tree
    Having(Where),
    /// ORDER BY column/direction pairs
    OrderBy(Vec<(String, OrderDirection)>),
    /// LIMIT offset, count
    Limit {
        /// Rows to skip.
        offset: u64,
        /// Rows to return.
        count: u64,
    },
}

impl Tag {
    /// Renders the clause. Pure: identical state yields identical output.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Select { distinct, columns } => {
                let cols = if columns.is_empty() {
                    String::from("*")
                } else {
                    columns.join(", ")
                };
                if *distinct {
                    format!("SELECT DISTINCT {cols}")
                } else {
                    format!("SELECT {cols}")
                }
            }
            Self::From { table, alias } => format!("FROM {table} {alias}"),
            Self::Join {
                kind,
                table,
                alias,
                on,
            } => format!("{kind} {table} {alias} ON ({})", on.render()),
            Self::Where(w) => format!("WHERE {}", w.render()),
            Self::GroupBy(cols) => format!("GROUP BY {}", cols.join(", ")),
            Self::Having(w) => format!("HAVING {}", w.render()),
            Self::OrderBy(entries) => {
                let parts: Vec<String> = entries
                    .iter()
                    .map(|(col, dir)| format!("{col} {dir}"))
                    .collect();
                format!("ORDER BY {}", parts.join(", "))
            }
            Self::Limit { offset, count } => {
                if *offset == 0 {
                    format!("LIMIT {count}")
                } else {
                    format!("LIMIT {offset}, {count}")
                }
            }
        }
    }
}

/// One entry of a [`Builder`].
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// A clause tag.
    Tag(Tag),
    /// A nested builder, rendered in parentheses.
    Nested(Builder),
    /// A raw fragment, rendered verbatim.
    Raw(String),
}

/// An ordered list of fragments forming a statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Builder {
    fragments: Vec<Fragment>,
}

impl Builder {
    /// Creates an empty builder.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            fragments: Vec::new(),
        }
    }

    /// Appends a clause tag.
    pub fn push(&mut self, tag: Tag) -> &mut Self {
        self.fragments.push(Fragment::Tag(tag));
        self
    }

    /// Appends a nested builder (a parenthesized subquery).
    pub fn push_nested(&mut self, nested: Self) -> &mut Self {
        self.fragments.push(Fragment::Nested(nested));
        self
    }

    /// Appends a raw fragment.
    pub fn push_raw(&mut self, sql: impl Into<String>) -> &mut Self {
        self.fragments.push(Fragment::Raw(sql.into()));
        self
    }

    /// Returns true when no fragments have been added.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Renders all fragments space-joined.
    #[must_use]
    pub fn render(&self) -> String {
        let parts: Vec<String> = self
            .fragments
            .iter()
            .map(|f| match f {
                Fragment::Tag(tag) => tag.render(),
                Fragment::Nested(builder) => format!("({})", builder.render()),
                Fragment::Raw(sql) => sql.clone(),
            })
            .collect();
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Where;

    #[test]
    fn select_tag() {
        let tag = Tag::Select {
            distinct: false,
            columns: vec![String::from("t1.id"), String::from("t1.name")],
        };
        assert_eq!(tag.render(), "SELECT t1.id, t1.name");

        let tag = Tag::Select {
            distinct: true,
            columns: vec![],
        };
        assert_eq!(tag.render(), "SELECT DISTINCT *");
    }

    #[test]
    fn join_tag() {
        let tag = Tag::Join {
            kind: JoinKind::Left,
            table: String::from("orders"),
            alias: String::from("t2"),
            on: Where::raw("t1.id = t2.user_id"),
        };
        assert_eq!(tag.render(), "LEFT JOIN orders t2 ON (t1.id = t2.user_id)");
    }

    #[test]
    fn limit_tag_offset_forms() {
        assert_eq!(
            Tag::Limit {
                offset: 0,
                count: 5
            }
            .render(),
            "LIMIT 5"
        );
        assert_eq!(
            Tag::Limit {
                offset: 10,
                count: 5
            }
            .render(),
            "LIMIT 10, 5"
        );
    }

    #[test]
    fn order_by_tag() {
        let tag = Tag::OrderBy(vec![
            (String::from("created_at"), OrderDirection::Desc),
            (String::from("name"), OrderDirection::Asc),
        ]);
        assert_eq!(tag.render(), "ORDER BY created_at DESC, name ASC");
    }

    #[test]
    fn builder_space_joins_tags() {
        let mut b = Builder::new();
        b.push(Tag::Select {
            distinct: false,
            columns: vec![String::from("t1.id")],
        });
        b.push(Tag::From {
            table: String::from("users"),
            alias: String::from("t1"),
        });
        b.push(Tag::Where(Where::eq("t1.id", "3")));
        assert_eq!(b.render(), "SELECT t1.id FROM users t1 WHERE t1.id = '3'");
    }

    #[test]
    fn nested_builder_is_parenthesized() {
        let mut inner = Builder::new();
        inner.push(Tag::Select {
            distinct: false,
            columns: vec![String::from("id")],
        });
        inner.push(Tag::From {
            table: String::from("users"),
            alias: String::from("t1"),
        });

        let mut outer = Builder::new();
        outer.push_raw("SELECT COUNT(*) FROM");
        outer.push_nested(inner);
        assert_eq!(
            outer.render(),
            "SELECT COUNT(*) FROM (SELECT id FROM users t1)"
        );
    }
}
