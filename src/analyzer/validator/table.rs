use crate::analyzer::binder::Job;
use crate::analyzer::utils::{
    aggregate_settings, application, destructure_path, is_list, literal_token, tuple_elements,
    variable_token, Setting, SettingMap, Span,
};
use crate::analyzer::{Analyzer, Element, ElementKind, Parent};
use crate::ast::{NodeData, NodeId};
use crate::errors::CompileErrorCode;
use crate::lexer::TokenKind;
use crate::symbol::{SymbolId, SymbolIndex, SymbolKind};

use super::{
    block_body, check_settings, name_path, require_top_level, validate_sub_element, Rule,
    SettingCodes, Shape,
};

const TABLE_RULES: &[Rule] = &[
    Rule::once("headercolor", Shape::Color),
    Rule::once("note", Shape::String),
];

pub(super) const TABLE_CODES: SettingCodes = SettingCodes {
    owner: "table",
    unknown: CompileErrorCode::UnknownTableSetting,
    duplicate: CompileErrorCode::DuplicateTableSetting,
    invalid: CompileErrorCode::InvalidTableSettingValue,
};

const COLUMN_RULES: &[Rule] = &[
    Rule::once("pk", Shape::Flag),
    Rule::once("unique", Shape::Flag),
    Rule::once("increment", Shape::Flag),
    Rule::once("null", Shape::Flag),
    Rule::once("not null", Shape::Flag),
    Rule::once("note", Shape::String),
    Rule::once("default", Shape::DefaultValue),
    Rule::many("ref", Shape::Custom),
    Rule::many("check", Shape::FunctionExpression),
];

const COLUMN_CODES: SettingCodes = SettingCodes {
    owner: "column",
    unknown: CompileErrorCode::UnknownColumnSetting,
    duplicate: CompileErrorCode::DuplicateColumnSetting,
    invalid: CompileErrorCode::InvalidColumnSettingValue,
};

/// Flags accepted bare between the column type and the setting list.
const LEGACY_FLAGS: &[&str] = &["pk", "unique"];

const RELATION_OPS: &[&str] = &[">", "<", "-", "<>"];

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    let fragments = name_path(a, el, 2, true);
    let alias = el.alias.and_then(|alias| match variable_token(a.tree, alias) {
        Some(token) => Some((alias, token.value.clone())),
        None => {
            a.error_at(alias, CompileErrorCode::InvalidAlias, "Table alias must be a simple name");
            None
        }
    });

    let settings = el
        .settings
        .map(|s| aggregate_settings(a.tree, s))
        .unwrap_or_default();
    check_settings(a, &settings, TABLE_RULES, TABLE_CODES);

    let symbol = match fragments.as_deref() {
        Some([schemas @ .., leaf]) => {
            let schema = a.register_schema_stack(schemas);
            a.register(schema, SymbolKind::Table, &leaf.name, el.id, CompileErrorCode::DuplicateName)
        }
        _ => detached(a, el),
    };

    if let Some((alias_node, alias_name)) = alias {
        let public = a.model.public_schema();
        a.model.declare(alias_node, symbol);
        let index = SymbolIndex::new(SymbolKind::Table, alias_name.clone());
        if a.model.symbols.insert_member(public, index, symbol).is_err() {
            a.error_at(
                alias_node,
                CompileErrorCode::DuplicateName,
                format!("Table name '{alias_name}' already exists in Schema 'public'"),
            );
        }
    }

    let Some(fields) = block_body(a, el) else {
        return;
    };
    let counts = validate_body(a, el, symbol, fields, settings.has("note"));
    if counts.columns == 0 && counts.injections == 0 {
        a.error(
            el.head_span(a.tree),
            CompileErrorCode::EmptyTable,
            "A Table must have at least one column",
        );
    }
}

/// Symbol for a table whose name could not be registered; its columns
/// still get checked.
pub(super) fn detached(a: &mut Analyzer<'_>, el: &Element<'_>) -> SymbolId {
    let public = a.model.public_schema();
    let id = a.model.symbols.alloc(SymbolKind::Table, "", Some(public), Some(el.id));
    a.model.declare(el.id, id);
    id
}

#[derive(Debug, Default)]
pub(super) struct BodyCounts {
    pub columns: usize,
    pub injections: usize,
}

/// Columns, injections and sub-elements of a Table or TablePartial body.
pub(super) fn validate_body(
    a: &mut Analyzer<'_>,
    el: &Element<'_>,
    container: SymbolId,
    fields: &[NodeId],
    has_note_setting: bool,
) -> BodyCounts {
    let parent = Parent {
        kind: el.kind,
        node: el.id,
        symbol: Some(container),
    };
    let mut note_seen = has_note_setting;
    let mut counts = BodyCounts::default();
    for &field in fields {
        match a.tree.data(field) {
            NodeData::ElementDeclaration { .. } => validate_sub_element(a, field, parent, &mut note_seen),
            NodeData::FunctionApplication { callee, args } => {
                if let NodeData::PartialInjection { partial, .. } = a.tree.data(*callee) {
                    if el.kind == ElementKind::TablePartial {
                        a.error_at(
                            field,
                            CompileErrorCode::InvalidTablePartialInjection,
                            "A TablePartial cannot inject another partial",
                        );
                        continue;
                    }
                    if !args.is_empty() {
                        a.error_at(
                            args[0],
                            CompileErrorCode::InvalidTablePartialInjection,
                            "A partial injection takes no arguments",
                        );
                    }
                    if let Some(partial) = partial {
                        validate_injection(a, container, field, *partial);
                    }
                    counts.injections += 1;
                } else {
                    validate_column(a, container, field);
                    counts.columns += 1;
                }
            }
            _ => a.error_at(field, CompileErrorCode::InvalidColumn, "Expected a column definition"),
        }
    }
    counts
}

fn validate_injection(a: &mut Analyzer<'_>, table: SymbolId, field: NodeId, partial: NodeId) {
    let Some(name) = variable_token(a.tree, partial).map(|t| t.value.clone()) else {
        a.error_at(
            partial,
            CompileErrorCode::InvalidTablePartialInjection,
            "A partial injection must name a TablePartial",
        );
        return;
    };
    let injection = a.register(
        table,
        SymbolKind::TablePartialInjection,
        &name,
        field,
        CompileErrorCode::DuplicateTablePartialInjection,
    );
    let index = SymbolIndex::new(SymbolKind::TablePartialInjection, name);
    if a.model.symbols.lookup(table, &index) == Some(injection) {
        a.jobs.push(Job::Injection {
            table,
            injection,
            name: partial,
        });
    }
}

/// `name type legacy_flag* [settings]?`
pub(super) fn validate_column(a: &mut Analyzer<'_>, container: SymbolId, field: NodeId) {
    let tree = a.tree;
    let Some((callee, args)) = application(tree, field) else {
        return;
    };
    let Some(name) = variable_token(tree, callee).map(|t| t.value.clone()) else {
        a.error_at(
            callee,
            CompileErrorCode::InvalidColumnName,
            "A column name must be an identifier or a quoted identifier",
        );
        return;
    };

    let column = a.register(container, SymbolKind::Column, &name, field, CompileErrorCode::DuplicateColumnName);

    let Some((&type_node, rest)) = args.split_first().filter(|(t, _)| !is_list(tree, **t)) else {
        a.error_at(
            callee,
            CompileErrorCode::InvalidColumn,
            format!("Column '{name}' is missing a type"),
        );
        return;
    };
    match column_type_base(a, type_node) {
        Some(base) => a.jobs.push(Job::ColumnType {
            column,
            scope: container,
            type_node: base,
        }),
        None => a.error_at(
            type_node,
            CompileErrorCode::InvalidColumnType,
            format!("Invalid type for column '{name}'"),
        ),
    }

    let (list, legacy) = match rest.split_last() {
        Some((&last, legacy)) if is_list(tree, last) => (Some(last), legacy),
        _ => (None, rest),
    };

    let mut settings = SettingMap::default();
    for &arg in legacy {
        match variable_token(tree, arg).filter(|t| t.kind == TokenKind::Identifier) {
            Some(token) if LEGACY_FLAGS.contains(&token.value.to_ascii_lowercase().as_str()) => {
                settings.push(Setting {
                    name: token.value.to_ascii_lowercase(),
                    span: Span::of_token(token),
                    value: None,
                    attribute: arg,
                });
            }
            Some(token) => a.error_at(
                arg,
                CompileErrorCode::UnknownColumnSetting,
                format!("Unknown column setting '{}'", token.value),
            ),
            None => a.error_at(
                arg,
                CompileErrorCode::InvalidColumn,
                format!("Unexpected expression after the type of column '{name}'"),
            ),
        }
    }
    if let Some(list) = list {
        for (_, list_settings) in aggregate_settings(tree, list).iter() {
            for setting in list_settings {
                settings.push(setting.clone());
            }
        }
    }
    check_settings(a, &settings, COLUMN_RULES, COLUMN_CODES);

    if let (Some(null), Some(not_null)) = (settings.first("null"), settings.first("not null")) {
        let later = if null.span.start > not_null.span.start { null } else { not_null };
        a.error(
            later.span,
            CompileErrorCode::ConflictingSetting,
            "'null' and 'not null' cannot both be set",
        );
    }

    for setting in settings.get("ref") {
        match setting.value.and_then(|v| inline_ref_target(a, v)) {
            Some(target) => a.jobs.push(Job::InlineRef {
                column,
                scope: container,
                target,
            }),
            None => a.error(
                setting.span,
                CompileErrorCode::InvalidColumnSettingValue,
                "'ref' must be a relationship like '> table.column'",
            ),
        }
    }
}

/// `> table.column` style value; returns the target path node.
fn inline_ref_target(a: &Analyzer<'_>, value: NodeId) -> Option<NodeId> {
    let NodeData::PrefixExpression { op, expression } = a.tree.data(value) else {
        return None;
    };
    let fragments = destructure_path(a.tree, *expression)?;
    (RELATION_OPS.contains(&op.value.as_str()) && (2..=3).contains(&fragments.len())).then_some(*expression)
}

/// Check a column type and return its name part: `int`, `schema.type`,
/// `varchar(255)`, `int[]`.
fn column_type_base(a: &Analyzer<'_>, id: NodeId) -> Option<NodeId> {
    let tree = a.tree;
    let mut current = id;
    loop {
        match tree.data(current) {
            NodeData::Array { expression, indexer } => {
                let NodeData::ListExpression { elements, .. } = tree.data(*indexer) else {
                    return None;
                };
                let sized = elements.iter().all(|e| match tree.data(*e) {
                    NodeData::Attribute {
                        name: Some(n),
                        value: None,
                        ..
                    } => literal_token(tree, *n).is_some_and(|t| t.kind == TokenKind::NumericLiteral),
                    _ => false,
                });
                if !sized || elements.len() > 1 {
                    return None;
                }
                current = *expression;
            }
            NodeData::CallExpression { callee, arguments } => {
                let args = tuple_elements(tree, *arguments)?;
                if !args.iter().all(|arg| is_type_argument(a, *arg)) {
                    return None;
                }
                current = *callee;
            }
            _ => {
                let fragments = destructure_path(tree, current)?;
                return (fragments.len() <= 2).then_some(current);
            }
        }
    }
}

fn is_type_argument(a: &Analyzer<'_>, id: NodeId) -> bool {
    let tree = a.tree;
    if literal_token(tree, id).is_some_and(|t| t.kind == TokenKind::NumericLiteral || t.kind.is_string()) {
        return true;
    }
    if variable_token(tree, id).is_some() {
        return true;
    }
    matches!(tree.data(id), NodeData::PrefixExpression { op, expression }
        if op.value == "-" && literal_token(tree, *expression).is_some_and(|t| t.kind == TokenKind::NumericLiteral))
}
