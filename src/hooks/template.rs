//! `{{ path }}` substitution over JSON values.
//!
//! Expressions are restricted to property and index lookups
//! (`messages[0].subject`, `repository["full_name"]`). There is no
//! arithmetic, no conditionals and no function calls: payload content is
//! attacker-controlled and only ever flows into the output as data.

use serde::{Serialize, Serializer};
use serde_json::Value;

/// Renders the whole context as compact JSON.
pub const PAYLOAD_TOKEN: &str = "_payload";

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A parsed `a.b[0]["c"]` lookup path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplatePath {
    segments: Vec<PathSegment>,
}

impl TemplatePath {
    /// Parse an expression. Returns `None` for anything outside the grammar.
    pub fn parse(expr: &str) -> Option<Self> {
        let mut rest = expr.trim();
        let (first, tail) = take_ident(rest)?;
        let mut segments = vec![PathSegment::Key(first.to_string())];
        rest = tail;

        while !rest.is_empty() {
            if let Some(tail) = rest.strip_prefix('.') {
                let (key, tail) = take_ident(tail)?;
                segments.push(PathSegment::Key(key.to_string()));
                rest = tail;
            } else if let Some(tail) = rest.strip_prefix('[') {
                let (segment, tail) = take_bracket(tail)?;
                segments.push(segment);
                rest = tail;
            } else {
                return None;
            }
        }

        Some(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// First key of the path, used by scoped resolvers to pick a root.
    pub fn root(&self) -> &str {
        match self.segments.first() {
            Some(PathSegment::Key(key)) => key,
            _ => "",
        }
    }

    pub fn lookup<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        lookup_segments(&self.segments, value)
    }
}

/// Walk `segments` from `value`. Traversal through scalars, missing keys and
/// out-of-range indexes all yield `None`.
pub fn lookup_segments<'a>(segments: &[PathSegment], value: &'a Value) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(value, |current, segment| match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key),
            (PathSegment::Key(key), Value::Array(items)) => {
                key.parse::<usize>().ok().and_then(|i| items.get(i))
            }
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i),
            _ => None,
        })
}

/// Text form of a looked-up value.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => compact_json(value),
    }
}

fn compact_json(value: &Value) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

fn is_ident_char(c: char) -> bool {
    !matches!(c, '.' | '[' | ']' | '"' | '\'' | '{' | '}') && !c.is_whitespace()
}

fn take_ident(input: &str) -> Option<(&str, &str)> {
    let end = input
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map_or(input.len(), |(i, _)| i);
    if end == 0 {
        return None;
    }
    Some((&input[..end], &input[end..]))
}

/// Parse the inside of `[...]` (opening bracket already consumed).
fn take_bracket(input: &str) -> Option<(PathSegment, &str)> {
    let input = input.trim_start();
    if let Some(quote) = input.chars().next().filter(|c| *c == '"' || *c == '\'') {
        let body = &input[1..];
        let close = body.find(quote)?;
        let key = &body[..close];
        let tail = body[close + 1..].trim_start().strip_prefix(']')?;
        return Some((PathSegment::Key(key.to_string()), tail));
    }

    let close = input.find(']')?;
    let digits = input[..close].trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = digits.parse().ok()?;
    Some((PathSegment::Index(index), &input[close + 1..]))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Text(String),
    Payload,
    Path(TemplatePath),
    /// Malformed expression; renders as nothing.
    Invalid,
}

/// A template parsed once and rendered per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut pieces = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            let after = &rest[start + OPEN.len()..];
            let Some(end) = after.find(CLOSE) else {
                break;
            };
            if start > 0 {
                pieces.push(Piece::Text(rest[..start].to_string()));
            }
            let expr = after[..end].trim();
            pieces.push(if expr == PAYLOAD_TOKEN {
                Piece::Payload
            } else {
                TemplatePath::parse(expr).map_or(Piece::Invalid, Piece::Path)
            });
            rest = &after[end + CLOSE.len()..];
        }

        if !rest.is_empty() {
            pieces.push(Piece::Text(rest.to_string()));
        }

        Self {
            source: source.to_string(),
            pieces,
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Render with every path looked up directly in `context`.
    pub fn render(&self, context: &Value) -> String {
        self.render_with(context, |path| path.lookup(context).map(stringify))
    }

    /// Render with a custom path resolver. `whole` backs the `_payload` token.
    pub fn render_with<F>(&self, whole: &Value, resolve: F) -> String
    where
        F: Fn(&TemplatePath) -> Option<String>,
    {
        let mut out = String::with_capacity(self.source.len());
        for piece in &self.pieces {
            match piece {
                Piece::Text(text) => out.push_str(text),
                Piece::Payload => out.push_str(&compact_json(whole)),
                Piece::Path(path) => {
                    if let Some(text) = resolve(path) {
                        out.push_str(&text);
                    }
                }
                Piece::Invalid => {}
            }
        }
        out
    }
}

impl Serialize for Template {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.source())
    }
}

/// Parse and render in one step.
pub fn render(template: &str, context: &Value) -> String {
    Template::parse(template).render(context)
}
