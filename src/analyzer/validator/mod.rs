//! One validator per element kind, dispatched on [`ElementKind`].
//!
//! Every validator checks context, name and alias shape, settings, then the
//! body, registering symbols and queueing binder jobs as it goes. Nothing
//! here stops at the first error.

mod checks;
mod custom;
mod dep;
mod enums;
mod indexes;
mod note;
mod project;
mod refs;
mod table;
mod table_group;
mod table_partial;

use crate::ast::{NodeData, NodeId};
use crate::errors::CompileErrorCode;
use crate::lexer::TokenKind;

use super::utils::{
    color_value, destructure_path, function_expression, joined_words, literal_token,
    string_value, variable_token, Fragment, SettingMap, Span,
};
use super::{Analyzer, Element, ElementKind, Parent};

pub(crate) fn validate_element(a: &mut Analyzer<'_>, id: NodeId, parent: Option<Parent>) {
    let Some(el) = Element::from_node(a.tree, id) else {
        return;
    };
    a.record_kind(id, el.kind);
    match el.kind {
        ElementKind::Table => table::validate(a, &el, parent),
        ElementKind::TablePartial => table_partial::validate(a, &el, parent),
        ElementKind::Enum => enums::validate(a, &el, parent),
        ElementKind::Ref => refs::validate(a, &el, parent),
        ElementKind::Note => note::validate(a, &el, parent),
        ElementKind::Project => project::validate(a, &el, parent),
        ElementKind::Indexes => indexes::validate(a, &el, parent),
        ElementKind::Checks => checks::validate(a, &el, parent),
        ElementKind::TableGroup => table_group::validate(a, &el, parent),
        ElementKind::Dep => dep::validate(a, &el, parent),
        ElementKind::Custom => custom::validate(a, &el, parent),
    }
}

/// Report an element that is only valid at the top level.
fn require_top_level(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) -> bool {
    match parent {
        None => true,
        Some(parent) => {
            a.error(
                Span::of_token(el.keyword),
                CompileErrorCode::InvalidContext,
                format!(
                    "{} must appear at the top level, not inside {}",
                    el.kind.as_str(),
                    parent.kind.as_str()
                ),
            );
            false
        }
    }
}

/// Report an element whose parent is not one of `allowed`.
fn require_parent(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>, allowed: &[ElementKind]) -> Option<Parent> {
    match parent {
        Some(p) if allowed.contains(&p.kind) => Some(p),
        _ => {
            let names: Vec<&str> = allowed.iter().map(|k| k.as_str()).collect();
            a.error(
                Span::of_token(el.keyword),
                CompileErrorCode::InvalidContext,
                format!("{} can only appear inside {}", el.kind.as_str(), names.join(" or ")),
            );
            None
        }
    }
}

/// Name as a dotted path of at most `max` fragments. `required` reports a
/// missing name.
fn name_path(a: &mut Analyzer<'_>, el: &Element<'_>, max: usize, required: bool) -> Option<Vec<Fragment>> {
    let Some(name) = el.name else {
        if required {
            a.error(
                Span::of_token(el.keyword),
                CompileErrorCode::NameNotFound,
                format!("{} must have a name", el.kind.as_str()),
            );
        }
        return None;
    };
    match destructure_path(a.tree, name) {
        Some(fragments) if fragments.len() <= max => Some(fragments),
        _ => {
            let shape = if max == 1 { "a simple name" } else { "a name or schema.name" };
            a.error_at(
                name,
                CompileErrorCode::InvalidName,
                format!("{} name must be {shape}", el.kind.as_str()),
            );
            None
        }
    }
}

fn forbid_name(a: &mut Analyzer<'_>, el: &Element<'_>) {
    if let Some(name) = el.name {
        a.error_at(
            name,
            CompileErrorCode::UnexpectedName,
            format!("{} should not have a name", el.kind.as_str()),
        );
    }
}

fn forbid_alias(a: &mut Analyzer<'_>, el: &Element<'_>) {
    if let Some(alias) = el.alias {
        a.error_at(
            alias,
            CompileErrorCode::UnexpectedAlias,
            format!("{} should not have an alias", el.kind.as_str()),
        );
    }
}

fn forbid_settings(a: &mut Analyzer<'_>, el: &Element<'_>) {
    if let Some(settings) = el.settings {
        a.error_at(
            settings,
            CompileErrorCode::UnexpectedSettings,
            format!("{} should not have settings", el.kind.as_str()),
        );
    }
}

/// Fields of a required `{ ... }` body.
fn block_body<'t>(a: &mut Analyzer<'t>, el: &Element<'_>) -> Option<&'t [NodeId]> {
    if el.colon {
        if let Some(body) = el.body {
            a.error_at(
                body,
                CompileErrorCode::UnexpectedSimpleBody,
                format!("{} must have a block body", el.kind.as_str()),
            );
        }
        return None;
    }
    el.block_fields(a.tree)
}

/// The sole field of a `:` body, or the fields of a block.
enum Body<'t> {
    Simple(NodeId),
    Block(&'t [NodeId]),
}

fn body<'t>(a: &Analyzer<'t>, el: &Element<'_>) -> Option<Body<'t>> {
    let body = el.body?;
    match a.tree.data(body) {
        NodeData::BlockExpression { body, .. } => Some(Body::Block(body)),
        NodeData::FunctionApplication { .. } => Some(Body::Simple(body)),
        _ => None,
    }
}

/// What a setting's value must look like.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Shape {
    /// No value.
    Flag,
    String,
    Color,
    /// Identifier words drawn from a fixed set, like `set null`.
    Words(&'static [&'static str]),
    FunctionExpression,
    DefaultValue,
    /// Checked by the owning validator.
    Custom,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Rule {
    pub name: &'static str,
    pub repeatable: bool,
    pub shape: Shape,
}

impl Rule {
    pub const fn once(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            repeatable: false,
            shape,
        }
    }

    pub const fn many(name: &'static str, shape: Shape) -> Self {
        Self {
            name,
            repeatable: true,
            shape,
        }
    }
}

/// Diagnostic codes for one family of settings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SettingCodes {
    pub owner: &'static str,
    pub unknown: CompileErrorCode,
    pub duplicate: CompileErrorCode,
    pub invalid: CompileErrorCode,
}

pub(crate) const REF_ACTIONS: &[&str] = &["cascade", "restrict", "set null", "set default", "no action"];

/// Check names, cardinality and value shapes of aggregated settings.
pub(crate) fn check_settings(a: &mut Analyzer<'_>, map: &SettingMap, rules: &[Rule], codes: SettingCodes) {
    for (name, settings) in map.iter() {
        let Some(rule) = rules.iter().find(|r| r.name == name) else {
            for setting in settings {
                a.error(
                    setting.span,
                    codes.unknown,
                    format!("Unknown {} setting '{name}'", codes.owner),
                );
            }
            continue;
        };
        if !rule.repeatable {
            for setting in settings.iter().skip(1) {
                a.error(
                    setting.span,
                    codes.duplicate,
                    format!("Setting '{name}' is already defined for this {}", codes.owner),
                );
            }
        }
        for setting in settings {
            if let Some(problem) = check_shape(a, rule.shape, setting.value) {
                let span = setting
                    .value
                    .map_or(setting.span, |v| setting.span.to(Span::of_node(a.tree, v)));
                a.error(span, codes.invalid, format!("'{name}' {problem}"));
            }
        }
    }
}

fn check_shape(a: &Analyzer<'_>, shape: Shape, value: Option<NodeId>) -> Option<String> {
    let tree = a.tree;
    match (shape, value) {
        (Shape::Custom, _) => None,
        (Shape::Flag, None) => None,
        (Shape::Flag, Some(_)) => Some("does not take a value".into()),
        (_, None) => Some("requires a value".into()),
        (Shape::String, Some(v)) => string_value(tree, v)
            .is_none()
            .then(|| "must be a string".into()),
        (Shape::Color, Some(v)) => color_value(tree, v)
            .is_none()
            .then(|| "must be a hex color like #abc or #aabbcc".into()),
        (Shape::Words(allowed), Some(v)) => match joined_words(tree, v) {
            Some(words) if allowed.contains(&words.as_str()) => None,
            _ => Some(format!("must be one of: {}", allowed.join(", "))),
        },
        (Shape::FunctionExpression, Some(v)) => function_expression(tree, v)
            .is_none()
            .then(|| "must be a function expression in backticks".into()),
        (Shape::DefaultValue, Some(v)) => (!is_default_value(a, v))
            .then(|| "must be a string, number, boolean, null or function expression".into()),
    }
}

fn is_default_value(a: &Analyzer<'_>, id: NodeId) -> bool {
    let tree = a.tree;
    if function_expression(tree, id).is_some() {
        return true;
    }
    if let Some(token) = literal_token(tree, id) {
        return token.kind.is_string() || token.kind == TokenKind::NumericLiteral;
    }
    if let Some(token) = variable_token(tree, id) {
        return token.kind == TokenKind::Identifier
            && matches!(token.value.to_ascii_lowercase().as_str(), "true" | "false" | "null");
    }
    match tree.data(id) {
        NodeData::PrefixExpression { op, expression } if op.value == "-" || op.value == "+" => {
            literal_token(tree, *expression).is_some_and(|t| t.kind == TokenKind::NumericLiteral)
        }
        _ => false,
    }
}

/// Flag a second `Note` next to a `note:` setting or another `Note`.
fn check_note_redefinition(a: &mut Analyzer<'_>, sub: &Element<'_>, note_seen: &mut bool) {
    if sub.kind != ElementKind::Note {
        return;
    }
    if *note_seen {
        a.error(
            Span::of_token(sub.keyword),
            CompileErrorCode::NoteRedefined,
            "Note is already defined for this element",
        );
    }
    *note_seen = true;
}

/// Validate nested element declarations, tracking note redefinition.
fn validate_sub_element(a: &mut Analyzer<'_>, id: NodeId, parent: Parent, note_seen: &mut bool) {
    if let Some(sub) = Element::from_node(a.tree, id) {
        check_note_redefinition(a, &sub, note_seen);
    }
    validate_element(a, id, Some(parent));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::analyze;
    use crate::errors::CompileError;
    use crate::parser::parse_source;

    pub(super) fn errors(source: &str) -> Vec<CompileError> {
        let (tree, parse_errors) = parse_source(source).into_parts();
        assert!(parse_errors.is_empty(), "parse errors: {parse_errors:?}");
        analyze(&tree).into_parts().1
    }

    pub(super) fn codes(source: &str) -> Vec<CompileErrorCode> {
        errors(source).into_iter().map(|e| e.code).collect()
    }

    #[test]
    fn test_unknown_top_level_element() {
        assert_eq!(codes("Tabel users { id int }"), vec![CompileErrorCode::InvalidContext]);
    }

    #[test]
    fn test_settings_are_case_insensitive() {
        assert!(codes("Table t [HeaderColor: #fff] { id int [PK, NOT NULL] }").is_empty());
    }

    #[test]
    fn test_default_value_shapes() {
        assert!(codes("Table t { a int [default: -1]\n b bool [default: true]\n c text [default: 'x']\n d ts [default: `now()`] }").is_empty());
        assert_eq!(
            codes("Table t { a int [default: abc] }"),
            vec![CompileErrorCode::InvalidColumnSettingValue]
        );
    }
}
