//! Helpers for reading the CST: name destructuring, setting aggregation,
//! literal shapes.

use crate::ast::{NodeData, NodeId, SyntaxTree};
use crate::errors::{CompileError, CompileErrorCode};
use crate::lexer::{Position, Token, TokenKind};

/// A source range used to anchor diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub start_pos: Position,
    pub end_pos: Position,
}

impl Span {
    pub fn of_node(tree: &SyntaxTree, id: NodeId) -> Self {
        let node = tree.node(id);
        Self {
            start: node.start,
            end: node.end,
            start_pos: node.start_pos,
            end_pos: node.end_pos,
        }
    }

    pub fn of_token(token: &Token) -> Self {
        Self {
            start: token.start,
            end: token.end,
            start_pos: token.start_pos,
            end_pos: token.end_pos,
        }
    }

    pub fn to(self, other: Span) -> Self {
        Self {
            start: self.start,
            end: other.end,
            start_pos: self.start_pos,
            end_pos: other.end_pos,
        }
    }

    pub fn error(self, code: CompileErrorCode, message: impl Into<String>) -> CompileError {
        CompileError::new(code, message, (self.start, self.start_pos), (self.end, self.end_pos))
    }
}

/// One piece of a dotted name, with the node it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: String,
    pub node: NodeId,
}

/// Identifier or quoted identifier wrapped in a primary expression.
pub fn variable_token(tree: &SyntaxTree, id: NodeId) -> Option<&Token> {
    let NodeData::PrimaryExpression { expression } = tree.data(id) else {
        return None;
    };
    match tree.data(*expression) {
        NodeData::Variable { variable } => Some(variable),
        _ => None,
    }
}

pub fn simple_name(tree: &SyntaxTree, id: NodeId) -> Option<&str> {
    variable_token(tree, id).map(|t| t.value.as_str())
}

/// `a.b.c` into `[a, b, c]`; `None` unless every piece is a plain name.
pub fn destructure_path(tree: &SyntaxTree, id: NodeId) -> Option<Vec<Fragment>> {
    let mut fragments = Vec::new();
    let mut stack = vec![id];
    while let Some(current) = stack.pop() {
        match tree.data(current) {
            NodeData::InfixExpression { op, left, right } if op.value == "." => {
                stack.push(*right);
                stack.push(*left);
            }
            _ => fragments.push(Fragment {
                name: simple_name(tree, current)?.to_string(),
                node: current,
            }),
        }
    }
    Some(fragments)
}

/// `path.(a, b)` split into the path and the tuple node.
pub fn split_tuple_suffix(tree: &SyntaxTree, id: NodeId) -> Option<(NodeId, NodeId)> {
    match tree.data(id) {
        NodeData::InfixExpression { op, left, right }
            if op.value == "."
                && matches!(
                    tree.data(*right),
                    NodeData::TupleExpression { .. } | NodeData::GroupExpression { .. }
                ) =>
        {
            Some((*left, *right))
        }
        _ => None,
    }
}

/// Elements of a tuple, or the single expression of a group.
pub fn tuple_elements(tree: &SyntaxTree, id: NodeId) -> Option<Vec<NodeId>> {
    match tree.data(id) {
        NodeData::TupleExpression { elements, .. } => Some(elements.clone()),
        NodeData::GroupExpression { expression, .. } => Some(vec![*expression]),
        _ => None,
    }
}

pub fn literal_token(tree: &SyntaxTree, id: NodeId) -> Option<&Token> {
    let NodeData::PrimaryExpression { expression } = tree.data(id) else {
        return None;
    };
    match tree.data(*expression) {
        NodeData::Literal { literal } => Some(literal),
        _ => None,
    }
}

/// Value of a single or triple quoted string.
pub fn string_value(tree: &SyntaxTree, id: NodeId) -> Option<&Token> {
    literal_token(tree, id).filter(|t| t.kind.is_string())
}

pub fn function_expression(tree: &SyntaxTree, id: NodeId) -> Option<&Token> {
    match tree.data(id) {
        NodeData::FunctionExpression { value } => Some(value),
        _ => None,
    }
}

pub fn is_hex_color(value: &str) -> bool {
    value
        .strip_prefix('#')
        .is_some_and(|hex| matches!(hex.len(), 3 | 6) && hex.chars().all(|c| c.is_ascii_hexdigit()))
}

pub fn color_value(tree: &SyntaxTree, id: NodeId) -> Option<&str> {
    literal_token(tree, id)
        .filter(|t| t.kind == TokenKind::ColorLiteral && is_hex_color(&t.value))
        .map(|t| t.value.as_str())
}

/// Identifier words of an identifier stream or a lone identifier.
pub fn identifier_words(tree: &SyntaxTree, id: NodeId) -> Option<Vec<&Token>> {
    match tree.data(id) {
        NodeData::IdentifierStream { identifiers } => Some(identifiers.iter().collect()),
        _ => variable_token(tree, id)
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| vec![t]),
    }
}

/// Lowercased words joined by single spaces: `SET   NULL` becomes `set null`.
pub fn joined_words(tree: &SyntaxTree, id: NodeId) -> Option<String> {
    identifier_words(tree, id).map(|words| {
        words
            .iter()
            .map(|t| t.value.to_ascii_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    })
}

pub fn block_fields(tree: &SyntaxTree, id: NodeId) -> Option<&[NodeId]> {
    match tree.data(id) {
        NodeData::BlockExpression { body, .. } => Some(body),
        _ => None,
    }
}

/// `(callee, args)` of a function application.
pub fn application(tree: &SyntaxTree, id: NodeId) -> Option<(NodeId, &[NodeId])> {
    match tree.data(id) {
        NodeData::FunctionApplication { callee, args } => Some((*callee, args)),
        _ => None,
    }
}

pub fn is_list(tree: &SyntaxTree, id: NodeId) -> bool {
    matches!(tree.data(id), NodeData::ListExpression { .. })
}

/// Multi-word flags recognized inside one space separated attribute.
const MULTI_WORD_FLAGS: &[&str] = &["not null", "primary key"];

fn canonical_setting(name: &str) -> String {
    match name {
        "primary key" => "pk".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct Setting {
    /// Lowercased, canonical name.
    pub name: String,
    pub span: Span,
    pub value: Option<NodeId>,
    pub attribute: NodeId,
}

/// Settings of one `[...]` list, grouped by name in first-seen order.
#[derive(Debug, Clone, Default)]
pub struct SettingMap {
    entries: Vec<(String, Vec<Setting>)>,
}

impl SettingMap {
    pub fn push(&mut self, setting: Setting) {
        match self.entries.iter_mut().find(|(name, _)| *name == setting.name) {
            Some((_, list)) => list.push(setting),
            None => self.entries.push((setting.name.clone(), vec![setting])),
        }
    }

    pub fn get(&self, name: &str) -> &[Setting] {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, list)| list.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&Setting> {
        self.get(name).first()
    }

    pub fn has(&self, name: &str) -> bool {
        !self.get(name).is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Setting])> {
        self.entries.iter().map(|(n, list)| (n.as_str(), list.as_slice()))
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Split `not null unique pk` into `not null`, `unique`, `pk`.
fn split_flags(words: &[&Token]) -> Vec<(String, Span)> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < words.len() {
        let pair = words.get(i + 1).map(|next| {
            format!(
                "{} {}",
                words[i].value.to_ascii_lowercase(),
                next.value.to_ascii_lowercase()
            )
        });
        if let Some(pair) = pair.filter(|p| MULTI_WORD_FLAGS.contains(&p.as_str())) {
            let span = Span::of_token(words[i]).to(Span::of_token(words[i + 1]));
            out.push((canonical_setting(&pair), span));
            i += 2;
        } else {
            out.push((
                canonical_setting(&words[i].value.to_ascii_lowercase()),
                Span::of_token(words[i]),
            ));
            i += 1;
        }
    }
    out
}

/// Group the attributes of a setting list by name.
pub fn aggregate_settings(tree: &SyntaxTree, list: NodeId) -> SettingMap {
    let mut map = SettingMap::default();
    let NodeData::ListExpression { elements, .. } = tree.data(list) else {
        return map;
    };
    for &attribute in elements {
        let NodeData::Attribute { name: Some(name), value, .. } = tree.data(attribute) else {
            continue;
        };
        match (identifier_words(tree, *name), value) {
            (Some(words), None) => {
                for (flag, span) in split_flags(&words) {
                    map.push(Setting {
                        name: flag,
                        span,
                        value: None,
                        attribute,
                    });
                }
            }
            (Some(_), Some(_)) => {
                if let Some(joined) = joined_words(tree, *name) {
                    map.push(Setting {
                        name: canonical_setting(&joined),
                        span: Span::of_node(tree, *name),
                        value: *value,
                        attribute,
                    });
                }
            }
            (None, _) => {
                let token = variable_token(tree, *name).or_else(|| literal_token(tree, *name));
                if let Some(token) = token {
                    map.push(Setting {
                        name: canonical_setting(&token.value.to_ascii_lowercase()),
                        span: Span::of_token(token),
                        value: *value,
                        attribute,
                    });
                }
            }
        }
    }
    map
}

/// Strip the conventions of triple quoted text: a blank first and last line
/// and the indentation shared by every non-blank line.
pub fn normalize_note(token: &Token) -> String {
    if token.kind != TokenKind::MultilineString {
        return token.value.clone();
    }
    let mut lines: Vec<&str> = token.value.split('\n').map(|l| l.trim_end_matches('\r')).collect();
    if lines.first().is_some_and(|l| l.trim().is_empty()) {
        lines.remove(0);
    }
    if lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    let indent = lines
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| l.len() - l.trim_start_matches([' ', '\t']).len())
        .min()
        .unwrap_or(0);
    lines
        .iter()
        .map(|l| l.get(indent..).unwrap_or_else(|| l.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_source;

    fn first_list(tree: &SyntaxTree) -> NodeId {
        tree.nodes()
            .find(|n| matches!(n.data, NodeData::ListExpression { .. }))
            .map(|n| n.id)
            .unwrap()
    }

    #[test]
    fn test_destructure_qualified_name() {
        let tree = parse_source("Table sales.\"order items\" { id int }").into_parts().0;
        let NodeData::ElementDeclaration { name: Some(name), .. } = tree.data(tree.program_body()[0]) else {
            panic!("expected element");
        };
        let names: Vec<String> = destructure_path(&tree, *name)
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["sales", "order items"]);
    }

    #[test]
    fn test_flags_split_with_multi_word_settings() {
        let tree = parse_source("Table t { id int [pk not null unique, note: 'x'] }").into_parts().0;
        let map = aggregate_settings(&tree, first_list(&tree));
        let names: Vec<&str> = map.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["pk", "not null", "unique", "note"]);
        assert!(map.first("note").unwrap().value.is_some());
    }

    #[test]
    fn test_repeated_flag_is_grouped() {
        let tree = parse_source("Table t { id int [pk pk, primary key] }").into_parts().0;
        let map = aggregate_settings(&tree, first_list(&tree));
        assert_eq!(map.get("pk").len(), 3);
    }

    #[test]
    fn test_hex_color() {
        assert!(is_hex_color("#fff"));
        assert!(is_hex_color("#A0b1C2"));
        assert!(!is_hex_color("#ffff"));
        assert!(!is_hex_color("#ggg"));
        assert!(!is_hex_color("fff"));
    }

    #[test]
    fn test_normalize_note_dedents() {
        let tokens = crate::lexer::lex("'''\n    # Title\n      body\n  '''").into_parts().0;
        assert_eq!(normalize_note(&tokens[0]), "# Title\n  body");
    }
}
