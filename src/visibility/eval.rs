use std::fmt;

use rustc_hash::FxHashSet;

use super::expr::{Node, NodeIdx, VisibilityExpr};
use crate::types::{GraphError, Result};

/// Set of authorization tokens held by the requesting principal.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Authorizations {
    tokens: FxHashSet<String>,
}

impl Authorizations {
    /// Builds a set from any iterator of tokens.
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// The empty authorization set.
    pub fn none() -> Self {
        Self::default()
    }

    /// Returns `true` if `token` is held.
    pub fn contains(&self, token: &str) -> bool {
        self.tokens.contains(token)
    }

    /// Number of tokens held.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no token is held.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Iterates over the held tokens in unspecified order.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.tokens.iter().map(String::as_str)
    }

    /// Evaluates `expr` against this set.
    pub fn can_read(&self, expr: &VisibilityExpr) -> Result<bool> {
        evaluate(expr, self)
    }
}

impl fmt::Debug for Authorizations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tokens: Vec<_> = self.iter().collect();
        tokens.sort_unstable();
        f.debug_tuple("Authorizations").field(&tokens).finish()
    }
}

impl<S: Into<String>> FromIterator<S> for Authorizations {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Decides whether `auths` satisfies `expr`. Pure and side-effect free.
pub fn evaluate(expr: &VisibilityExpr, auths: &Authorizations) -> Result<bool> {
    match expr.root() {
        None => Ok(true),
        Some(root) => eval_node(expr.nodes(), root, auths),
    }
}

fn eval_node(nodes: &[Node], idx: NodeIdx, auths: &Authorizations) -> Result<bool> {
    let node = nodes
        .get(idx as usize)
        .ok_or(GraphError::Evaluation("node index out of range"))?;
    match node {
        Node::Term(token) => Ok(auths.contains(token)),
        Node::And(children) => {
            if children.is_empty() {
                return Err(GraphError::Evaluation("conjunction without operands"));
            }
            for child in children {
                if !eval_node(nodes, *child, auths)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Node::Or(children) => {
            if children.is_empty() {
                return Err(GraphError::Evaluation("disjunction without operands"));
            }
            for child in children {
                if eval_node(nodes, *child, auths)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Node::Not(child) => Ok(!eval_node(nodes, *child, auths)?),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    fn eval(text: &str, tokens: &[&str]) -> bool {
        let expr = VisibilityExpr::parse(text).unwrap();
        evaluate(&expr, &Authorizations::new(tokens.iter().copied())).unwrap()
    }

    #[test]
    fn empty_expression_is_always_visible() {
        assert!(eval("", &[]));
        assert!(eval("", &["a"]));
    }

    #[test]
    fn terms_and_connectives() {
        assert!(eval("a", &["a"]));
        assert!(!eval("a", &[]));
        assert!(!eval("a&b", &["a"]));
        assert!(eval("a&b", &["a", "b"]));
        assert!(eval("a|b", &["a"]));
        assert!(!eval("a|b", &["c"]));
        assert!(eval("(a&b)|c", &["c"]));
        assert!(!eval("a&(b|c)", &["b", "c"]));
    }

    #[test]
    fn negation() {
        assert!(eval("!a", &[]));
        assert!(!eval("!a", &["a"]));
        assert!(eval("b&!a", &["b"]));
        assert!(eval("!!a", &["a"]));
    }

    #[test]
    fn quoted_tokens_match_unescaped_text() {
        assert!(eval(r#""top secret""#, &["top secret"]));
        assert!(eval(r#""a\"b""#, &["a\"b"]));
        assert!(!eval(r#""a\"b""#, &["a\\\"b"]));
    }

    #[test]
    fn dangling_nodes_are_evaluation_errors() {
        let expr = VisibilityExpr::from_raw(vec![Node::And(smallvec![5])], Some(0));
        let err = evaluate(&expr, &Authorizations::none()).unwrap_err();
        assert!(matches!(err, GraphError::Evaluation(_)));
        let expr = VisibilityExpr::from_raw(vec![Node::Or(smallvec![])], Some(0));
        assert!(evaluate(&expr, &Authorizations::none()).is_err());
    }

    #[test]
    fn authorizations_helpers() {
        let auths: Authorizations = ["a", "b"].into_iter().collect();
        assert_eq!(auths.len(), 2);
        assert!(!auths.is_empty());
        assert_eq!(format!("{auths:?}"), "Authorizations([\"a\", \"b\"])");
        assert!(auths.can_read(&VisibilityExpr::parse("a&b").unwrap()).unwrap());
    }
}
