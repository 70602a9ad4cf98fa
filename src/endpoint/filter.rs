//! LDAP-style filter expressions over property maps.
//!
//! Supported grammar: equality with `*` substring wildcards, presence
//! (`(attr=*)`), `>=`/`<=` comparisons, and the boolean operators `&`,
//! `|`, `!`. Values may escape `(`, `)`, `*` and `\` with a backslash.

use std::fmt;

use crate::FilterError;
use crate::PropertyMap;

#[derive(Debug, Clone, PartialEq)]
enum Node {
    And(Vec<Node>),
    Or(Vec<Node>),
    Not(Box<Node>),
    Present {
        attr: String,
    },
    Equals {
        attr: String,
        value: String,
    },
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
    GreaterEq {
        attr: String,
        value: String,
    },
    LessEq {
        attr: String,
        value: String,
    },
}

/// A parsed filter expression. Matching never fails: unknown attributes
/// simply do not match, byte-valued properties are invisible to filters.
#[derive(Debug, Clone)]
pub struct Filter {
    raw: String,
    root: Node,
}

impl Filter {
    pub fn parse(expr: &str) -> Result<Self, FilterError> {
        let trimmed = expr.trim();
        if trimmed.is_empty() {
            return Err(FilterError::Empty);
        }
        let chars: Vec<char> = trimmed.chars().collect();
        let mut parser = Parser { chars: &chars, pos: 0 };
        let root = parser.parse_filter()?;
        parser.skip_whitespace();
        if parser.pos != parser.chars.len() {
            return Err(FilterError::TrailingInput { pos: parser.pos });
        }
        Ok(Filter {
            raw: trimmed.to_string(),
            root,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn matches(&self, props: &PropertyMap) -> bool {
        eval(&self.root, props)
    }

    /// Literal value of the first plain equality on `attr`, if any.
    /// Wildcarded values do not count, and only conjunctions are
    /// traversed: inside `|` or `!` a match is not guaranteed to carry
    /// the value. Drives the scope-to-path derivation.
    pub(crate) fn first_equality(&self, attr: &str) -> Option<&str> {
        fn walk<'a>(
            node: &'a Node,
            attr: &str,
        ) -> Option<&'a str> {
            match node {
                Node::Equals { attr: a, value } if a == attr => Some(value),
                Node::And(children) => children.iter().find_map(|c| walk(c, attr)),
                _ => None,
            }
        }
        walk(&self.root, attr)
    }
}

impl fmt::Display for Filter {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl PartialEq for Filter {
    fn eq(
        &self,
        other: &Self,
    ) -> bool {
        self.raw == other.raw
    }
}

impl Eq for Filter {}

fn eval(
    node: &Node,
    props: &PropertyMap,
) -> bool {
    match node {
        Node::And(children) => children.iter().all(|c| eval(c, props)),
        Node::Or(children) => children.iter().any(|c| eval(c, props)),
        Node::Not(inner) => !eval(inner, props),
        Node::Present { attr } => props.contains_key(attr),
        Node::Equals { attr, value } => texts(props, attr).iter().any(|t| t == value),
        Node::Substring {
            attr,
            initial,
            any,
            last,
        } => texts(props, attr)
            .iter()
            .any(|t| substring_match(t, initial, any, last)),
        Node::GreaterEq { attr, value } => texts(props, attr).iter().any(|t| compare(t, value).is_ge()),
        Node::LessEq { attr, value } => texts(props, attr).iter().any(|t| compare(t, value).is_le()),
    }
}

fn texts<'a>(
    props: &'a PropertyMap,
    attr: &str,
) -> Vec<&'a str> {
    props.get(attr).map(|v| v.text_values()).unwrap_or_default()
}

/// Numeric when both sides parse as integers, lexicographic otherwise.
fn compare(
    lhs: &str,
    rhs: &str,
) -> std::cmp::Ordering {
    match (lhs.trim().parse::<i64>(), rhs.trim().parse::<i64>()) {
        (Ok(l), Ok(r)) => l.cmp(&r),
        _ => lhs.cmp(rhs),
    }
}

fn substring_match(
    text: &str,
    initial: &Option<String>,
    any: &[String],
    last: &Option<String>,
) -> bool {
    let mut rest = text;
    if let Some(prefix) = initial {
        if !rest.starts_with(prefix.as_str()) {
            return false;
        }
        rest = &rest[prefix.len()..];
    }
    for part in any {
        match rest.find(part.as_str()) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    match last {
        Some(suffix) => rest.ends_with(suffix.as_str()),
        None => true,
    }
}

struct Parser<'a> {
    chars: &'a [char],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn next_char(&mut self) -> Result<char, FilterError> {
        let ch = self.chars.get(self.pos).copied().ok_or(FilterError::UnexpectedEnd)?;
        self.pos += 1;
        Ok(ch)
    }

    fn expect(
        &mut self,
        expected: char,
    ) -> Result<(), FilterError> {
        let pos = self.pos;
        let ch = self.next_char()?;
        if ch != expected {
            return Err(FilterError::UnexpectedChar { pos, ch });
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn unexpected_here(&self) -> FilterError {
        match self.peek() {
            Some(ch) => FilterError::UnexpectedChar { pos: self.pos, ch },
            None => FilterError::UnexpectedEnd,
        }
    }

    fn parse_filter(&mut self) -> Result<Node, FilterError> {
        self.skip_whitespace();
        self.expect('(')?;
        let node = self.parse_component()?;
        self.expect(')')?;
        Ok(node)
    }

    fn parse_component(&mut self) -> Result<Node, FilterError> {
        match self.peek().ok_or(FilterError::UnexpectedEnd)? {
            '&' => {
                self.pos += 1;
                Ok(Node::And(self.parse_list()?))
            }
            '|' => {
                self.pos += 1;
                Ok(Node::Or(self.parse_list()?))
            }
            '!' => {
                self.pos += 1;
                Ok(Node::Not(Box::new(self.parse_filter()?)))
            }
            _ => self.parse_item(),
        }
    }

    fn parse_list(&mut self) -> Result<Vec<Node>, FilterError> {
        let mut nodes = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('(') => nodes.push(self.parse_filter()?),
                _ if nodes.is_empty() => return Err(self.unexpected_here()),
                _ => return Ok(nodes),
            }
        }
    }

    fn parse_item(&mut self) -> Result<Node, FilterError> {
        let attr = self.parse_attr()?;
        let pos = self.pos;
        match self.next_char()? {
            '=' => self.parse_equality(attr),
            '>' => {
                self.expect('=')?;
                Ok(Node::GreaterEq {
                    attr,
                    value: self.parse_value()?,
                })
            }
            '<' => {
                self.expect('=')?;
                Ok(Node::LessEq {
                    attr,
                    value: self.parse_value()?,
                })
            }
            ch => Err(FilterError::UnexpectedChar { pos, ch }),
        }
    }

    fn parse_attr(&mut self) -> Result<String, FilterError> {
        self.skip_whitespace();
        let mut attr = String::new();
        loop {
            match self.peek() {
                Some('=') | Some('>') | Some('<') | Some('~') => break,
                Some('(') | Some(')') | None => return Err(self.unexpected_here()),
                Some(ch) => {
                    attr.push(ch);
                    self.pos += 1;
                }
            }
        }
        let attr = attr.trim_end().to_string();
        if attr.is_empty() {
            return Err(self.unexpected_here());
        }
        Ok(attr)
    }

    /// Equality values split on unescaped `*` into substring segments.
    fn parse_equality(
        &mut self,
        attr: String,
    ) -> Result<Node, FilterError> {
        let mut segments: Vec<String> = vec![String::new()];
        loop {
            match self.peek() {
                Some(')') | None => break,
                Some('*') => {
                    segments.push(String::new());
                    self.pos += 1;
                }
                Some('\\') => {
                    self.pos += 1;
                    let ch = self.next_char()?;
                    if let Some(seg) = segments.last_mut() {
                        seg.push(ch);
                    }
                }
                Some(ch) => {
                    if let Some(seg) = segments.last_mut() {
                        seg.push(ch);
                    }
                    self.pos += 1;
                }
            }
        }

        if segments.len() == 1 {
            let value = segments.pop().unwrap_or_default();
            return Ok(Node::Equals { attr, value });
        }
        if segments.len() == 2 && segments.iter().all(|s| s.is_empty()) {
            return Ok(Node::Present { attr });
        }

        let count = segments.len();
        let mut iter = segments.into_iter();
        let initial = iter.next().filter(|s| !s.is_empty());
        let mut any: Vec<String> = Vec::new();
        let mut last: Option<String> = None;
        for (i, seg) in iter.enumerate() {
            if i == count - 2 {
                last = Some(seg).filter(|s| !s.is_empty());
            } else if !seg.is_empty() {
                any.push(seg);
            }
        }
        Ok(Node::Substring {
            attr,
            initial,
            any,
            last,
        })
    }

    fn parse_value(&mut self) -> Result<String, FilterError> {
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(')') | None => break,
                Some('\\') => {
                    self.pos += 1;
                    value.push(self.next_char()?);
                }
                Some(ch) => {
                    value.push(ch);
                    self.pos += 1;
                }
            }
        }
        Ok(value)
    }
}
