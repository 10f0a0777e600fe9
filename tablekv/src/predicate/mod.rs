//! WHERE-clause construction.
//!
//! A [`PredicateList`] is the flat form: `(column, value, join)` triples
//! combined left to right, where the join carried by the last triple is
//! never applied. It folds into a [`Predicate`] tree of equality leaves
//! joined by AND/OR nodes, which is what the table engine executes.

use crate::error::Result;
use crate::schema::validate_identifier;
use crate::value::Value;
use std::fmt;

/// Boolean operator joining a constraint to the one after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Join {
    #[default]
    And,
    Or,
}

impl Join {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Join::And => "AND",
            Join::Or => "OR",
        }
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// One `column = value` test plus the operator joining it to the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint {
    pub column: String,
    pub value: Value,
    pub join: Join,
}

impl Constraint {
    pub fn new(column: impl Into<String>, value: impl Into<Value>, join: Join) -> Self {
        Constraint {
            column: column.into(),
            value: value.into(),
            join,
        }
    }
}

/// Ordered constraint triples, combined left to right.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PredicateList {
    constraints: Vec<Constraint>,
}

impl PredicateList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-constraint list, the common `column = value` lookup.
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().push(column, value, Join::And)
    }

    pub fn push(mut self, column: impl Into<String>, value: impl Into<Value>, join: Join) -> Self {
        self.constraints.push(Constraint::new(column, value, join));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    /// Fold into a tree. Each constraint's join decides how the next one
    /// attaches to everything before it; the last join has nothing to
    /// attach and is dropped. An empty list means "no predicate".
    pub fn to_predicate(&self) -> Option<Predicate> {
        let mut iter = self.constraints.iter();
        let first = iter.next()?;
        let mut acc = Predicate::eq(first.column.clone(), first.value.clone());
        let mut pending = first.join;

        for constraint in iter {
            let leaf = Predicate::eq(constraint.column.clone(), constraint.value.clone());
            acc = match pending {
                Join::And => acc.and(leaf),
                Join::Or => acc.or(leaf),
            };
            pending = constraint.join;
        }

        Some(acc)
    }

    /// Render the WHERE expression (without the `WHERE` keyword) with values
    /// inlined as escaped literals. Empty for an empty list.
    pub fn build(&self) -> String {
        self.to_predicate()
            .map(|p| p.to_string())
            .unwrap_or_default()
    }
}

impl FromIterator<Constraint> for PredicateList {
    fn from_iter<I: IntoIterator<Item = Constraint>>(iter: I) -> Self {
        PredicateList {
            constraints: iter.into_iter().collect(),
        }
    }
}

/// Structural predicate: equality leaves combined by AND/OR nodes.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Eq { column: String, value: Value },
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn and(self, other: Predicate) -> Self {
        Predicate::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Predicate) -> Self {
        Predicate::Or(Box::new(self), Box::new(other))
    }

    /// Every column named by the predicate, left to right.
    pub fn columns(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_columns(&mut out);
        out
    }

    fn collect_columns<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Predicate::Eq { column, .. } => out.push(column),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_columns(out);
                r.collect_columns(out);
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        for column in self.columns() {
            validate_identifier(column)?;
        }
        Ok(())
    }

    /// Render with `?` placeholders, appending bound values to `params` in
    /// placeholder order.
    pub fn to_sql(&self, params: &mut Vec<Value>) -> String {
        let mut out = String::new();
        self.write(&mut out, &mut Some(params));
        out
    }

    fn write(&self, out: &mut String, params: &mut Option<&mut Vec<Value>>) {
        match self {
            Predicate::Eq { column, value } => {
                out.push_str(column);
                if value.is_null() {
                    out.push_str(" IS NULL");
                } else if let Some(params) = params.as_deref_mut() {
                    out.push_str("=?");
                    params.push(value.clone());
                } else {
                    out.push('=');
                    value.write_literal(out);
                }
            }
            Predicate::And(l, r) => {
                Self::write_operand(l, out, params);
                out.push_str(" AND ");
                Self::write_operand(r, out, params);
            }
            Predicate::Or(l, r) => {
                l.write(out, params);
                out.push_str(" OR ");
                r.write(out, params);
            }
        }
    }

    // AND binds tighter than OR in SQL, so an OR operand of an AND needs
    // parentheses to keep the tree's grouping.
    fn write_operand(p: &Predicate, out: &mut String, params: &mut Option<&mut Vec<Value>>) {
        if matches!(p, Predicate::Or(..)) {
            out.push('(');
            p.write(out, params);
            out.push(')');
        } else {
            p.write(out, params);
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        self.write(&mut out, &mut None);
        f.write_str(&out)
    }
}

impl From<Constraint> for Predicate {
    fn from(c: Constraint) -> Self {
        Predicate::eq(c.column, c.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_trailing_join_dropped() {
        let list = PredicateList::new()
            .push("a", 1, Join::And)
            .push("b", 2, Join::Or);
        assert_eq!(list.build(), "a=1 AND b=2");

        let single = PredicateList::new().push("a", 1, Join::And);
        assert_eq!(single.build(), "a=1");

        let single_or = PredicateList::new().push("a", 1, Join::Or);
        assert_eq!(single_or.build(), "a=1");
    }

    #[test]
    fn test_empty_list() {
        let list = PredicateList::new();
        assert!(list.to_predicate().is_none());
        assert_eq!(list.build(), "");
    }

    #[test]
    fn test_left_to_right_grouping() {
        let and_then_or = PredicateList::new()
            .push("a", 1, Join::And)
            .push("b", 2, Join::Or)
            .push("c", 3, Join::And);
        assert_eq!(and_then_or.build(), "a=1 AND b=2 OR c=3");

        let or_then_and = PredicateList::new()
            .push("a", 1, Join::Or)
            .push("b", 2, Join::And)
            .push("c", 3, Join::And);
        assert_eq!(or_then_and.build(), "(a=1 OR b=2) AND c=3");
        assert_eq!(
            or_then_and.to_predicate().unwrap(),
            Predicate::eq("a", 1).or(Predicate::eq("b", 2)).and(Predicate::eq("c", 3))
        );
    }

    #[test]
    fn test_values_escaped_per_type() {
        let list = PredicateList::new()
            .push("name", "it's", Join::And)
            .push("ratio", 0.5, Join::And)
            .push("data", vec![0xde, 0xad], Join::Or)
            .push("gone", Value::Null, Join::And);
        assert_eq!(
            list.build(),
            "name='it''s' AND ratio=0.5 AND data=X'DEAD' OR gone IS NULL"
        );
    }

    #[test]
    fn test_placeholders() {
        let p = Predicate::eq("a", 1)
            .and(Predicate::eq("b", "x").or(Predicate::eq("c", Value::Null)));
        let mut params = Vec::new();
        let sql = p.to_sql(&mut params);
        assert_eq!(sql, "a=? AND (b=? OR c IS NULL)");
        assert_eq!(params, vec![Value::Integer(1), Value::Text("x".into())]);
    }

    #[test]
    fn test_validate_columns() {
        assert!(PredicateList::eq("ok_col", 1).to_predicate().unwrap().validate().is_ok());
        let bad = Predicate::eq("a", 1).and(Predicate::eq("1=1 OR b", 2));
        assert!(bad.validate().is_err());
        assert_eq!(bad.columns(), vec!["a", "1=1 OR b"]);
    }

    #[test]
    fn test_from_iter() {
        let list: PredicateList = vec![
            Constraint::new("a", 1, Join::Or),
            Constraint::new("b", 2, Join::Or),
        ]
        .into_iter()
        .collect();
        assert_eq!(list.len(), 2);
        assert_eq!(list.build(), "a=1 OR b=2");
    }
}
