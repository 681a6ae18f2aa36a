//! A small CSS selector engine over [`ForeignDocument`].
//!
//! Supported: type (`li`, `*`), `#id`, `.class`, `[attr]`, `[attr="v"]`, `[attr*="v"]`,
//! `[attr^="v"]`, descendant and child (`>`) combinators, and comma-separated lists.

use crate::document::{ForeignDocument, NodeId};
use crate::{ReconcilerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Contains(String),
    Prefix(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrTest {
    name: String,
    op: AttrOp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// Rightmost compound first, each paired with the combinator linking it to the next one left.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    parts: Vec<(Compound, Option<Combinator>)>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for part in split_top_level(source) {
            let part = part.trim();
            if part.is_empty() {
                return Err(invalid(source, "empty selector in list"));
            }
            alternatives.push(parse_complex(source, part)?);
        }
        if alternatives.is_empty() {
            return Err(invalid(source, "empty selector"));
        }
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn matches(&self, doc: &dyn ForeignDocument, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| matches_complex(doc, node, &complex.parts))
    }

    /// Descendants of `scope` (not `scope` itself) that match, in document order.
    #[must_use]
    pub fn select_all(&self, doc: &dyn ForeignDocument, scope: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = doc.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if doc.is_annotation(node) {
                continue;
            }
            if self.matches(doc, node) {
                out.push(node);
            }
            stack.extend(doc.children(node).into_iter().rev());
        }
        out
    }

    #[must_use]
    pub fn select_first(&self, doc: &dyn ForeignDocument, scope: NodeId) -> Option<NodeId> {
        let mut stack: Vec<NodeId> = doc.children(scope).into_iter().rev().collect();
        while let Some(node) = stack.pop() {
            if doc.is_annotation(node) {
                continue;
            }
            if self.matches(doc, node) {
                return Some(node);
            }
            stack.extend(doc.children(node).into_iter().rev());
        }
        None
    }
}

fn invalid(source: &str, reason: &str) -> ReconcilerError {
    ReconcilerError::InvalidSelector {
        selector: source.to_string(),
        reason: reason.to_string(),
    }
}

/// Splits on commas that are not inside brackets or quotes.
fn split_top_level(source: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (idx, ch) in source.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&source[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

fn parse_complex(source: &str, text: &str) -> Result<Complex> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let mut compounds: Vec<Compound> = Vec::new();
    let mut combinators: Vec<Combinator> = Vec::new();

    loop {
        compounds.push(parse_compound(source, &chars, &mut pos)?);

        let mut saw_space = false;
        while pos < chars.len() && chars[pos].is_whitespace() {
            saw_space = true;
            pos += 1;
        }
        if pos >= chars.len() {
            break;
        }
        if chars[pos] == '>' {
            pos += 1;
            while pos < chars.len() && chars[pos].is_whitespace() {
                pos += 1;
            }
            combinators.push(Combinator::Child);
        } else if saw_space {
            combinators.push(Combinator::Descendant);
        } else {
            return Err(invalid(source, &format!("unexpected `{}`", chars[pos])));
        }
    }

    let mut parts = Vec::with_capacity(compounds.len());
    for (idx, compound) in compounds.into_iter().enumerate().rev() {
        let link = idx.checked_sub(1).map(|prev| combinators[prev]);
        parts.push((compound, link));
    }
    Ok(Complex { parts })
}

fn parse_compound(source: &str, chars: &[char], pos: &mut usize) -> Result<Compound> {
    let mut compound = Compound::default();
    let start = *pos;

    if *pos < chars.len() && chars[*pos] == '*' {
        *pos += 1;
    } else {
        let tag = read_ident(chars, pos);
        if !tag.is_empty() {
            compound.tag = Some(tag.to_ascii_lowercase());
        }
    }

    while *pos < chars.len() {
        match chars[*pos] {
            '#' => {
                *pos += 1;
                let id = read_ident(chars, pos);
                if id.is_empty() {
                    return Err(invalid(source, "`#` without a name"));
                }
                compound.id = Some(id);
            }
            '.' => {
                *pos += 1;
                let class = read_ident(chars, pos);
                if class.is_empty() {
                    return Err(invalid(source, "`.` without a name"));
                }
                compound.classes.push(class);
            }
            '[' => {
                *pos += 1;
                compound.attrs.push(parse_attr(source, chars, pos)?);
            }
            _ => break,
        }
    }

    if *pos == start {
        return Err(invalid(source, "expected a selector"));
    }
    Ok(compound)
}

fn parse_attr(source: &str, chars: &[char], pos: &mut usize) -> Result<AttrTest> {
    skip_spaces(chars, pos);
    let name = read_ident(chars, pos);
    if name.is_empty() {
        return Err(invalid(source, "attribute selector without a name"));
    }
    skip_spaces(chars, pos);

    let op_char = match chars.get(*pos) {
        Some(']') => {
            *pos += 1;
            return Ok(AttrTest {
                name,
                op: AttrOp::Exists,
            });
        }
        Some('=') => None,
        Some(c @ ('*' | '^')) if chars.get(*pos + 1) == Some(&'=') => {
            *pos += 1;
            Some(*c)
        }
        _ => return Err(invalid(source, "unsupported attribute operator")),
    };
    *pos += 1;
    skip_spaces(chars, pos);

    let value = match chars.get(*pos) {
        Some(q @ ('"' | '\'')) => {
            let q = *q;
            *pos += 1;
            let begin = *pos;
            while *pos < chars.len() && chars[*pos] != q {
                *pos += 1;
            }
            if *pos >= chars.len() {
                return Err(invalid(source, "unterminated string"));
            }
            let value: String = chars[begin..*pos].iter().collect();
            *pos += 1;
            value
        }
        _ => read_ident(chars, pos),
    };
    skip_spaces(chars, pos);
    if chars.get(*pos) != Some(&']') {
        return Err(invalid(source, "missing `]`"));
    }
    *pos += 1;

    let op = match op_char {
        None => AttrOp::Equals(value),
        Some('*') => AttrOp::Contains(value),
        Some(_) => AttrOp::Prefix(value),
    };
    Ok(AttrTest { name, op })
}

fn read_ident(chars: &[char], pos: &mut usize) -> String {
    let begin = *pos;
    while *pos < chars.len()
        && (chars[*pos].is_ascii_alphanumeric() || matches!(chars[*pos], '-' | '_'))
    {
        *pos += 1;
    }
    chars[begin..*pos].iter().collect()
}

fn skip_spaces(chars: &[char], pos: &mut usize) {
    while *pos < chars.len() && chars[*pos].is_whitespace() {
        *pos += 1;
    }
}

fn matches_compound(doc: &dyn ForeignDocument, node: NodeId, compound: &Compound) -> bool {
    let Some(tag) = doc.tag(node) else {
        return false;
    };
    if compound
        .tag
        .as_deref()
        .is_some_and(|want| !tag.eq_ignore_ascii_case(want))
    {
        return false;
    }
    if compound
        .id
        .as_deref()
        .is_some_and(|want| doc.attr(node, "id") != Some(want))
    {
        return false;
    }
    if !compound.classes.iter().all(|c| doc.has_class(node, c)) {
        return false;
    }
    compound.attrs.iter().all(|test| {
        let Some(value) = doc.attr(node, &test.name) else {
            return false;
        };
        match &test.op {
            AttrOp::Exists => true,
            AttrOp::Equals(want) => value == want,
            AttrOp::Contains(want) => !want.is_empty() && value.contains(want.as_str()),
            AttrOp::Prefix(want) => !want.is_empty() && value.starts_with(want.as_str()),
        }
    })
}

fn matches_complex(
    doc: &dyn ForeignDocument,
    node: NodeId,
    parts: &[(Compound, Option<Combinator>)],
) -> bool {
    let Some(((compound, link), rest)) = parts.split_first() else {
        return true;
    };
    if !matches_compound(doc, node, compound) {
        return false;
    }
    match link {
        None => true,
        Some(Combinator::Child) => doc
            .parent(node)
            .is_some_and(|parent| matches_complex(doc, parent, rest)),
        Some(Combinator::Descendant) => {
            let mut cursor = doc.parent(node);
            while let Some(ancestor) = cursor {
                if matches_complex(doc, ancestor, rest) {
                    return true;
                }
                cursor = doc.parent(ancestor);
            }
            false
        }
    }
}
