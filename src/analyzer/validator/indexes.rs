use crate::analyzer::binder::Job;
use crate::analyzer::utils::{aggregate_settings, application, function_expression, is_list, tuple_elements, variable_token};
use crate::analyzer::{Analyzer, Element, ElementKind, Parent};
use crate::ast::NodeId;
use crate::errors::CompileErrorCode;

use super::{
    block_body, check_settings, forbid_alias, forbid_name, forbid_settings, require_parent, Rule, SettingCodes,
    Shape,
};

const INDEX_RULES: &[Rule] = &[
    Rule::once("pk", Shape::Flag),
    Rule::once("unique", Shape::Flag),
    Rule::once("name", Shape::String),
    Rule::once("type", Shape::Words(&["btree", "hash"])),
    Rule::once("note", Shape::String),
];

const INDEX_CODES: SettingCodes = SettingCodes {
    owner: "index",
    unknown: CompileErrorCode::UnknownIndexSetting,
    duplicate: CompileErrorCode::DuplicateIndexSetting,
    invalid: CompileErrorCode::InvalidIndexSettingValue,
};

pub(super) const TABLE_PARENTS: &[ElementKind] = &[ElementKind::Table, ElementKind::TablePartial];

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    let Some(parent) = require_parent(a, el, parent, TABLE_PARENTS) else {
        return;
    };
    forbid_name(a, el);
    forbid_alias(a, el);
    forbid_settings(a, el);

    let Some(fields) = block_body(a, el) else {
        return;
    };
    if fields.is_empty() {
        a.error(
            el.head_span(a.tree),
            CompileErrorCode::EmptyIndexes,
            "An Indexes block must hold at least one index",
        );
    }
    for &field in fields {
        validate_index(a, parent, field);
    }
}

/// `column | `expr` | (a, `expr`, ...)` followed by an optional setting list.
fn validate_index(a: &mut Analyzer<'_>, parent: Parent, field: NodeId) {
    let tree = a.tree;
    let parsed = application(tree, field).and_then(|(callee, args)| match args {
        [] => Some((callee, None)),
        [list] if is_list(tree, *list) => Some((callee, Some(*list))),
        _ => None,
    });
    let Some((callee, settings)) = parsed else {
        a.error_at(
            field,
            CompileErrorCode::InvalidIndexField,
            "An index must be a column, a function expression or a tuple of those",
        );
        return;
    };

    let parts = tuple_elements(tree, callee).unwrap_or_else(|| vec![callee]);
    for part in parts {
        if variable_token(tree, part).is_some() {
            if let Some(table) = parent.symbol {
                a.jobs.push(Job::IndexColumn { table, node: part });
            }
        } else if function_expression(tree, part).is_none() {
            a.error_at(
                part,
                CompileErrorCode::InvalidIndexField,
                "An index column must be a name or a function expression",
            );
        }
    }

    if let Some(list) = settings {
        let map = aggregate_settings(tree, list);
        check_settings(a, &map, INDEX_RULES, INDEX_CODES);
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_valid_indexes() {
        let source = "Table t {\n a int\n b int\n indexes {\n  a\n  (a, b) [unique, name: 'ab_idx', type: hash]\n  `lower(a)` [note: 'expr']\n  (`a + b`, b)\n }\n}";
        assert_eq!(codes(source), vec![]);
    }

    #[test]
    fn test_index_outside_table() {
        assert_eq!(codes("Indexes { a }"), vec![CompileErrorCode::InvalidContext]);
    }

    #[test]
    fn test_empty_and_invalid() {
        assert_eq!(
            codes("Table t {\n a int\n indexes { }\n indexes {\n  'a'\n  a [type: gist]\n }\n}"),
            vec![
                CompileErrorCode::EmptyIndexes,
                CompileErrorCode::InvalidIndexField,
                CompileErrorCode::InvalidIndexSettingValue,
            ]
        );
    }

    #[test]
    fn test_unknown_index_column() {
        assert_eq!(
            codes("Table t {\n a int\n indexes { missing }\n}"),
            vec![CompileErrorCode::BindingError]
        );
    }

    #[test]
    fn test_indexes_require_block_body() {
        assert_eq!(
            codes("Table t {\n a int\n indexes: a\n}"),
            vec![CompileErrorCode::UnexpectedSimpleBody]
        );
    }
}
