//! Filter and ordering clauses.
//!
//! Clause text is opaque: nothing here parses or validates OData syntax. What
//! is structured is how clauses combine, so that a second `filter` call can
//! never silently merge into the first one.

use itertools::Itertools;
use serde::{Deserialize, Serialize};

/// How a new filter clause combines with the clauses already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// `(existing) and (new)`
    #[default]
    And,
    /// `(existing) or (new)`
    Or,
    /// Drop every earlier clause and keep only the new one.
    Replace,
    /// Append the text verbatim to the last clause. The caller owns the
    /// resulting syntax (`A` then ` or B` renders `A or B`).
    Concat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Clause(String),
    All(Vec<Node>),
    Any(Vec<Node>),
}

impl Node {
    fn render(&self) -> String {
        match self {
            Node::Clause(text) => text.clone(),
            Node::All(nodes) => nodes.iter().map(|n| format!("({})", n.render())).join(" and "),
            Node::Any(nodes) => nodes.iter().map(|n| format!("({})", n.render())).join(" or "),
        }
    }

    fn append_to_last(&mut self, text: &str) {
        match self {
            Node::Clause(existing) => existing.push_str(text),
            Node::All(nodes) | Node::Any(nodes) => {
                if let Some(last) = nodes.last_mut() {
                    last.append_to_last(text);
                }
            }
        }
    }
}

/// Accumulated `$filter` expression.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterExpr {
    root: Option<Node>,
}

impl FilterExpr {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Combine `clause` into the expression according to `mode`.
    ///
    /// Blank clauses are ignored so that optional search boxes can be wired
    /// straight through.
    pub fn push(&mut self, mode: FilterMode, clause: impl Into<String>) {
        let clause = clause.into();
        if clause.trim().is_empty() {
            return;
        }

        let root = match (self.root.take(), mode) {
            (_, FilterMode::Replace) | (None, _) => Node::Clause(clause),
            (Some(mut node), FilterMode::Concat) => {
                node.append_to_last(&clause);
                node
            }
            (Some(Node::All(mut nodes)), FilterMode::And) => {
                nodes.push(Node::Clause(clause));
                Node::All(nodes)
            }
            (Some(node), FilterMode::And) => Node::All(vec![node, Node::Clause(clause)]),
            (Some(Node::Any(mut nodes)), FilterMode::Or) => {
                nodes.push(Node::Clause(clause));
                Node::Any(nodes)
            }
            (Some(node), FilterMode::Or) => Node::Any(vec![node, Node::Clause(clause)]),
        };

        self.root = Some(root);
    }

    /// Rendered expression; a lone clause is emitted without parentheses.
    pub fn render(&self) -> Option<String> {
        self.root.as_ref().map(Node::render)
    }
}

/// Sort direction for [`OrderBy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        }
    }
}

/// Accumulated `$orderby` clauses, most significant first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderBy {
    clauses: Vec<String>,
}

impl OrderBy {
    pub fn push_raw(&mut self, clause: impl Into<String>) {
        let clause = clause.into();
        if !clause.trim().is_empty() {
            self.clauses.push(clause);
        }
    }

    pub fn push(&mut self, field: &str, direction: Direction) {
        self.clauses.push(format!("{} {}", field, direction.as_str()));
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn render(&self) -> Option<String> {
        if self.clauses.is_empty() {
            None
        } else {
            Some(self.clauses.join(","))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_single_clause_is_bare() {
        let mut f = FilterExpr::new();
        f.push(FilterMode::And, "statuscode eq 1");
        assert_eq!(f.render().as_deref(), Some("statuscode eq 1"));
    }

    #[test]
    fn test_and_wraps_every_operand() {
        let mut f = FilterExpr::new();
        f.push(FilterMode::And, "statuscode eq 1");
        f.push(FilterMode::And, "prioritycode eq 2");
        f.push(FilterMode::And, "contains(title,'vpn')");
        assert_eq!(
            f.render().unwrap(),
            "(statuscode eq 1) and (prioritycode eq 2) and (contains(title,'vpn'))"
        );
    }

    #[test]
    fn test_or_groups_existing_expression() {
        let mut f = FilterExpr::new();
        f.push(FilterMode::And, "A");
        f.push(FilterMode::And, "B");
        f.push(FilterMode::Or, "C");
        assert_eq!(f.render().unwrap(), "((A) and (B)) or (C)");

        f.push(FilterMode::And, "D");
        assert_eq!(f.render().unwrap(), "(((A) and (B)) or (C)) and (D)");
    }

    #[test]
    fn test_replace_discards_previous_clauses() {
        let mut f = FilterExpr::new();
        f.push(FilterMode::And, "statecode eq 0");
        f.push(FilterMode::And, "statuscode eq 1");
        f.push(FilterMode::Replace, "ticketnumber eq 'CAS-1'");
        assert_eq!(f.render().unwrap(), "ticketnumber eq 'CAS-1'");
    }

    #[test]
    fn test_concat_is_raw_text_append() {
        let mut f = FilterExpr::new();
        f.push(FilterMode::Concat, "A");
        f.push(FilterMode::Concat, "B");
        assert_eq!(f.render().unwrap(), "AB");

        let mut g = FilterExpr::new();
        g.push(FilterMode::And, "A");
        g.push(FilterMode::And, "B");
        g.push(FilterMode::Concat, " or C");
        assert_eq!(g.render().unwrap(), "(A) and (B or C)");
    }

    #[test]
    fn test_blank_clause_is_ignored() {
        let mut f = FilterExpr::new();
        f.push(FilterMode::And, "   ");
        assert!(f.is_empty());
        f.push(FilterMode::And, "A");
        f.push(FilterMode::And, "");
        assert_eq!(f.render().unwrap(), "A");
    }

    #[test]
    fn test_order_by_joins_with_comma() {
        let mut o = OrderBy::default();
        assert_eq!(o.render(), None);
        o.push("modifiedon", Direction::Desc);
        o.push_raw("title");
        assert_eq!(o.render().unwrap(), "modifiedon desc,title");
    }
}
