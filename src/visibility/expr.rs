use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;

use crate::types::{GraphError, Result};

/// Index of a node inside an expression arena.
pub(crate) type NodeIdx = u32;

/// Child list of a conjunction or disjunction.
pub(crate) type Children = SmallVec<[NodeIdx; 4]>;

/// Maximum nesting of parentheses and negations accepted by the parser.
pub const MAX_NESTING: usize = 128;

/// One node of the expression arena.
#[derive(Clone, Debug)]
pub(crate) enum Node {
    /// Authorization token, already unescaped.
    Term(String),
    /// All children must hold.
    And(Children),
    /// At least one child must hold.
    Or(Children),
    /// Child must not hold.
    Not(NodeIdx),
}

impl Node {
    fn rank(&self) -> u8 {
        match self {
            Node::Term(_) => 0,
            Node::And(_) => 1,
            Node::Or(_) => 2,
            Node::Not(_) => 3,
        }
    }
}

/// Parsed boolean formula over authorization tokens.
///
/// The expression keeps the text it was parsed from together with an arena of
/// nodes. Equality, ordering and hashing are structural: `a&b` and `b&a` are
/// different expressions until both are passed through
/// [`VisibilityExpr::normalize`].
#[derive(Clone)]
pub struct VisibilityExpr {
    text: String,
    nodes: Vec<Node>,
    root: Option<NodeIdx>,
}

impl VisibilityExpr {
    /// The unconditionally visible expression.
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            nodes: Vec::new(),
            root: None,
        }
    }

    /// Parses `text`, failing with [`GraphError::MalformedExpression`].
    ///
    /// Blank input yields [`VisibilityExpr::empty`].
    pub fn parse(text: &str) -> Result<Self> {
        let mut parser = Parser::new(text);
        parser.skip_ws();
        if parser.at_end() {
            return Ok(Self {
                text: text.to_string(),
                nodes: Vec::new(),
                root: None,
            });
        }
        let root = parser.parse_expr()?;
        parser.skip_ws();
        match parser.peek() {
            None => {}
            Some(b')') => return Err(parser.error("unbalanced closing parenthesis")),
            Some(_) => return Err(parser.error("unexpected character")),
        }
        Ok(Self {
            text: text.to_string(),
            nodes: parser.nodes,
            root: Some(root),
        })
    }

    /// Builds a single-token expression, quoting the token when needed.
    pub fn term(token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(GraphError::malformed(token, 0, "empty term"));
        }
        let mut text = String::new();
        render_term(token, &mut text);
        Ok(Self {
            text,
            nodes: vec![Node::Term(token.to_string())],
            root: Some(0),
        })
    }

    /// Source text as supplied to [`VisibilityExpr::parse`], or the canonical
    /// rendering for normalized expressions.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns `true` for the unconditionally visible expression.
    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Iterates over every token referenced by the expression.
    pub fn terms(&self) -> impl Iterator<Item = &str> + '_ {
        self.nodes.iter().filter_map(|node| match node {
            Node::Term(t) => Some(t.as_str()),
            _ => None,
        })
    }

    /// Renders the tree (not the source text) in canonical syntax.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            render_node(&self.nodes, root, &mut out);
        }
        out
    }

    /// Flattens associative chains, sorts and de-duplicates children and
    /// collapses single-child nodes. The result's text is its canonical
    /// rendering, which is the key used for visibility hashing.
    pub fn normalize(&self) -> VisibilityExpr {
        let Some(root) = self.root else {
            return VisibilityExpr::empty();
        };
        let mut scratch = Vec::with_capacity(self.nodes.len());
        let root = normalize_node(&self.nodes, root, &mut scratch);
        let mut nodes = Vec::with_capacity(scratch.len());
        let root = copy_subtree(&scratch, root, &mut nodes);
        let mut expr = VisibilityExpr {
            text: String::new(),
            nodes,
            root: Some(root),
        };
        expr.text = expr.render();
        expr
    }

    /// Canonical text of the normalized expression.
    pub fn canonical_text(&self) -> String {
        self.normalize().text
    }

    /// Returns `true` when both expressions normalize to the same tree.
    pub fn equivalent(&self, other: &VisibilityExpr) -> bool {
        self.normalize() == other.normalize()
    }

    pub(crate) fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub(crate) fn root(&self) -> Option<NodeIdx> {
        self.root
    }

    #[cfg(test)]
    pub(crate) fn from_raw(nodes: Vec<Node>, root: Option<NodeIdx>) -> Self {
        Self {
            text: String::new(),
            nodes,
            root,
        }
    }
}

impl Default for VisibilityExpr {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for VisibilityExpr {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VisibilityExpr {}

impl PartialOrd for VisibilityExpr {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VisibilityExpr {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.root, other.root) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => compare_nodes(&self.nodes, a, &other.nodes, b),
        }
    }
}

impl Hash for VisibilityExpr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.render().hash(state);
    }
}

impl fmt::Debug for VisibilityExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VisibilityExpr({:?})", self.text)
    }
}

impl fmt::Display for VisibilityExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl Serialize for VisibilityExpr {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for VisibilityExpr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        VisibilityExpr::parse(&text).map_err(serde::de::Error::custom)
    }
}

/// Returns `true` for bytes allowed in an unquoted term.
pub fn is_term_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    depth: usize,
    nodes: Vec<Node>,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            depth: 0,
            nodes: Vec::new(),
        }
    }

    fn error(&self, reason: &'static str) -> GraphError {
        GraphError::malformed(self.src, self.pos, reason)
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b) if b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn push(&mut self, node: Node) -> NodeIdx {
        self.nodes.push(node);
        (self.nodes.len() - 1) as NodeIdx
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error("expression nested too deeply"));
        }
        Ok(())
    }

    fn parse_expr(&mut self) -> Result<NodeIdx> {
        let first = self.parse_not()?;
        let mut op: Option<u8> = None;
        let mut children: Children = SmallVec::new();
        children.push(first);
        loop {
            self.skip_ws();
            let Some(c @ (b'&' | b'|')) = self.peek() else {
                break;
            };
            if matches!(op, Some(prev) if prev != c) {
                return Err(self.error("mixed '&' and '|' without parentheses"));
            }
            op = Some(c);
            self.pos += 1;
            self.skip_ws();
            match self.peek() {
                None => return Err(self.error("operator at end of expression")),
                Some(b'&' | b'|') => return Err(self.error("consecutive operators")),
                _ => {}
            }
            let child = self.parse_not()?;
            children.push(child);
        }
        Ok(match op {
            None => first,
            Some(b'&') => self.push(Node::And(children)),
            Some(_) => self.push(Node::Or(children)),
        })
    }

    fn parse_not(&mut self) -> Result<NodeIdx> {
        self.skip_ws();
        if self.peek() != Some(b'!') {
            return self.parse_primary();
        }
        self.pos += 1;
        self.skip_ws();
        if self.at_end() {
            return Err(self.error("operator at end of expression"));
        }
        self.enter()?;
        let child = self.parse_not()?;
        self.depth -= 1;
        Ok(self.push(Node::Not(child)))
    }

    fn parse_primary(&mut self) -> Result<NodeIdx> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => {
                self.pos += 1;
                self.enter()?;
                self.skip_ws();
                if self.peek() == Some(b')') {
                    return Err(self.error("empty term"));
                }
                let inner = self.parse_expr()?;
                self.skip_ws();
                if self.peek() != Some(b')') {
                    return Err(self.error("missing closing parenthesis"));
                }
                self.pos += 1;
                self.depth -= 1;
                Ok(inner)
            }
            Some(b'"') => self.parse_quoted(),
            Some(b) if is_term_byte(b) => {
                let start = self.pos;
                while matches!(self.peek(), Some(b) if is_term_byte(b)) {
                    self.pos += 1;
                }
                let term = self.src[start..self.pos].to_string();
                Ok(self.push(Node::Term(term)))
            }
            None | Some(b'&' | b'|' | b')') => Err(self.error("empty term")),
            Some(_) => Err(self.error("unexpected character")),
        }
    }

    fn parse_quoted(&mut self) -> Result<NodeIdx> {
        self.pos += 1;
        let mut buf = Vec::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated quote")),
                Some(b'"') => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(c @ (b'"' | b'\\')) => {
                            buf.push(c);
                            self.pos += 1;
                        }
                        None => return Err(self.error("unterminated quote")),
                        Some(_) => return Err(self.error("invalid escape in quoted term")),
                    }
                }
                Some(c) => {
                    buf.push(c);
                    self.pos += 1;
                }
            }
        }
        if buf.is_empty() {
            return Err(self.error("empty term"));
        }
        let term = String::from_utf8(buf).map_err(|_| self.error("quoted term is not UTF-8"))?;
        Ok(self.push(Node::Term(term)))
    }
}

fn push(nodes: &mut Vec<Node>, node: Node) -> NodeIdx {
    nodes.push(node);
    (nodes.len() - 1) as NodeIdx
}

fn normalize_node(src: &[Node], idx: NodeIdx, out: &mut Vec<Node>) -> NodeIdx {
    match &src[idx as usize] {
        Node::Term(t) => push(out, Node::Term(t.clone())),
        Node::Not(child) => {
            let child = normalize_node(src, *child, out);
            push(out, Node::Not(child))
        }
        Node::And(children) | Node::Or(children) => {
            let is_and = matches!(src[idx as usize], Node::And(_));
            let mut merged: Children = SmallVec::new();
            for &child in children {
                let n = normalize_node(src, child, out);
                let nested = match &out[n as usize] {
                    Node::And(inner) if is_and => Some(inner.clone()),
                    Node::Or(inner) if !is_and => Some(inner.clone()),
                    _ => None,
                };
                match nested {
                    Some(inner) => merged.extend(inner),
                    None => merged.push(n),
                }
            }
            merged.sort_by(|a, b| compare_nodes(out, *a, out, *b));
            merged.dedup_by(|a, b| compare_nodes(out, *a, out, *b) == Ordering::Equal);
            if merged.len() == 1 {
                return merged[0];
            }
            if is_and {
                push(out, Node::And(merged))
            } else {
                push(out, Node::Or(merged))
            }
        }
    }
}

fn copy_subtree(src: &[Node], idx: NodeIdx, out: &mut Vec<Node>) -> NodeIdx {
    match &src[idx as usize] {
        Node::Term(t) => push(out, Node::Term(t.clone())),
        Node::Not(child) => {
            let child = copy_subtree(src, *child, out);
            push(out, Node::Not(child))
        }
        Node::And(children) => {
            let copied = children.iter().map(|c| copy_subtree(src, *c, out)).collect();
            push(out, Node::And(copied))
        }
        Node::Or(children) => {
            let copied = children.iter().map(|c| copy_subtree(src, *c, out)).collect();
            push(out, Node::Or(copied))
        }
    }
}

/// Total order: node kind, then term bytes, then children left to right.
fn compare_nodes(a_nodes: &[Node], a: NodeIdx, b_nodes: &[Node], b: NodeIdx) -> Ordering {
    match (&a_nodes[a as usize], &b_nodes[b as usize]) {
        (Node::Term(x), Node::Term(y)) => x.as_bytes().cmp(y.as_bytes()),
        (Node::And(x), Node::And(y)) | (Node::Or(x), Node::Or(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = compare_nodes(a_nodes, *l, b_nodes, *r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Node::Not(x), Node::Not(y)) => compare_nodes(a_nodes, *x, b_nodes, *y),
        (l, r) => l.rank().cmp(&r.rank()),
    }
}

fn render_node(nodes: &[Node], idx: NodeIdx, out: &mut String) {
    match &nodes[idx as usize] {
        Node::Term(t) => render_term(t, out),
        Node::And(children) => render_chain(nodes, children, '&', out),
        Node::Or(children) => render_chain(nodes, children, '|', out),
        Node::Not(child) => {
            out.push('!');
            render_operand(nodes, *child, out);
        }
    }
}

fn render_chain(nodes: &[Node], children: &Children, op: char, out: &mut String) {
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push(op);
        }
        render_operand(nodes, *child, out);
    }
}

fn render_operand(nodes: &[Node], idx: NodeIdx, out: &mut String) {
    if matches!(nodes[idx as usize], Node::And(_) | Node::Or(_)) {
        out.push('(');
        render_node(nodes, idx, out);
        out.push(')');
    } else {
        render_node(nodes, idx, out);
    }
}

fn render_term(term: &str, out: &mut String) {
    if !term.is_empty() && term.bytes().all(is_term_byte) {
        out.push_str(term);
        return;
    }
    out.push('"');
    for ch in term.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(text: &str) -> String {
        VisibilityExpr::parse(text).unwrap().normalize().text().to_string()
    }

    fn reason(text: &str) -> &'static str {
        match VisibilityExpr::parse(text) {
            Err(GraphError::MalformedExpression { reason, .. }) => reason,
            other => panic!("expected malformed expression for {text:?}, got {other:?}"),
        }
    }

    #[test]
    fn blank_input_is_empty() {
        assert!(VisibilityExpr::parse("").unwrap().is_empty());
        assert!(VisibilityExpr::parse("   ").unwrap().is_empty());
        assert_eq!(VisibilityExpr::parse("").unwrap(), VisibilityExpr::empty());
    }

    #[test]
    fn parses_terms_and_chains() {
        let expr = VisibilityExpr::parse("a & b.c & d-e_f").unwrap();
        let terms: Vec<_> = expr.terms().collect();
        assert_eq!(terms, vec!["a", "b.c", "d-e_f"]);
        assert_eq!(expr.render(), "a&b.c&d-e_f");
        assert_eq!(expr.text(), "a & b.c & d-e_f");
    }

    #[test]
    fn quoted_terms_unescape() {
        let expr = VisibilityExpr::parse(r#""a b"|"q\"uote"|"back\\slash""#).unwrap();
        let terms: Vec<_> = expr.terms().collect();
        assert_eq!(terms, vec!["a b", "q\"uote", "back\\slash"]);
        assert_eq!(expr.render(), r#""a b"|"q\"uote"|"back\\slash""#);
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(reason("a&"), "operator at end of expression");
        assert_eq!(reason("a&&b"), "consecutive operators");
        assert_eq!(reason("a&|b"), "consecutive operators");
        assert_eq!(reason("a&b|c"), "mixed '&' and '|' without parentheses");
        assert_eq!(reason("(a&b"), "missing closing parenthesis");
        assert_eq!(reason("a&b)"), "unbalanced closing parenthesis");
        assert_eq!(reason("()"), "empty term");
        assert_eq!(reason("&a"), "empty term");
        assert_eq!(reason("\"abc"), "unterminated quote");
        assert_eq!(reason("\"\""), "empty term");
        assert_eq!(reason("\"a\\x\""), "invalid escape in quoted term");
        assert_eq!(reason("a b"), "unexpected character");
        assert_eq!(reason("a$"), "unexpected character");
        assert_eq!(reason("!"), "operator at end of expression");
    }

    #[test]
    fn parentheses_disambiguate_mixed_operators() {
        let expr = VisibilityExpr::parse("(a&b)|c").unwrap();
        assert_eq!(expr.render(), "(a&b)|c");
        let expr = VisibilityExpr::parse("a&(b|c)").unwrap();
        assert_eq!(expr.render(), "a&(b|c)");
    }

    #[test]
    fn normalization_flattens_sorts_and_dedupes() {
        assert_eq!(norm("b&a"), "a&b");
        assert_eq!(norm("a&(b&c)"), "a&b&c");
        assert_eq!(norm("(c|a)|(b|a)"), "a|b|c");
        assert_eq!(norm("a&a"), "a");
        assert_eq!(norm("((a))"), "a");
        assert_eq!(norm("(b|a)&c"), "c&(a|b)");
        assert_eq!(norm("a|(b&b)"), "a|b");
        assert_eq!(norm("!(b&a)"), "!(a&b)");
        assert_eq!(norm(""), "");
    }

    #[test]
    fn collapsed_child_is_flattened_into_parent() {
        assert_eq!(norm("a|((b|c)&(c|b))"), "a|b|c");
    }

    #[test]
    fn normalization_is_idempotent_and_round_trips() {
        for text in ["x&(z|y)&w", "!(a|b)&c", "\"x y\"|a", "((a&b)|(b&a))&c"] {
            let once = VisibilityExpr::parse(text).unwrap().normalize();
            let twice = once.normalize();
            assert_eq!(once, twice);
            assert_eq!(once.text(), twice.text());
            let reparsed = VisibilityExpr::parse(once.text()).unwrap();
            assert_eq!(reparsed, once);
        }
    }

    #[test]
    fn structural_equality_is_order_sensitive() {
        let ab = VisibilityExpr::parse("a&b").unwrap();
        let ba = VisibilityExpr::parse("b & a").unwrap();
        assert_ne!(ab, ba);
        assert!(ab.equivalent(&ba));
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let deep = format!("{}a{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        assert_eq!(reason(&deep), "expression nested too deeply");
        let ok = format!("{}a{}", "(".repeat(8), ")".repeat(8));
        assert!(VisibilityExpr::parse(&ok).is_ok());
    }

    #[test]
    fn serde_uses_source_text() {
        let expr = VisibilityExpr::parse("a|b").unwrap();
        let json = serde_json::to_string(&expr).unwrap();
        assert_eq!(json, "\"a|b\"");
        let back: VisibilityExpr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, expr);
        assert!(serde_json::from_str::<VisibilityExpr>("\"a&\"").is_err());
    }

    #[test]
    fn term_constructor_quotes_when_needed() {
        let expr = VisibilityExpr::term("needs space").unwrap();
        assert_eq!(expr.text(), "\"needs space\"");
        assert_eq!(VisibilityExpr::parse(expr.text()).unwrap(), expr);
        assert!(VisibilityExpr::term("").is_err());
    }
}
