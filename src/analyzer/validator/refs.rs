use crate::analyzer::binder::Job;
use crate::analyzer::utils::{
    aggregate_settings, application, destructure_path, is_list, simple_name, split_tuple_suffix, tuple_elements, Span,
};
use crate::analyzer::{Analyzer, Element, Parent};
use crate::ast::{NodeData, NodeId};
use crate::errors::CompileErrorCode;

use super::{
    body, check_settings, forbid_alias, forbid_settings, name_path, require_top_level, Body, Rule, SettingCodes,
    Shape, REF_ACTIONS,
};

const REF_RULES: &[Rule] = &[
    Rule::once("delete", Shape::Words(REF_ACTIONS)),
    Rule::once("update", Shape::Words(REF_ACTIONS)),
    Rule::once("color", Shape::Color),
];

const REF_CODES: SettingCodes = SettingCodes {
    owner: "ref",
    unknown: CompileErrorCode::UnknownRefSetting,
    duplicate: CompileErrorCode::DuplicateRefSetting,
    invalid: CompileErrorCode::InvalidRefSettingValue,
};

const RELATION_OPS: &[&str] = &[">", "<", "-", "<>"];

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    name_path(a, el, 2, false);
    forbid_alias(a, el);
    forbid_settings(a, el);

    match body(a, el) {
        Some(Body::Simple(field)) => validate_relationship(a, el.id, field),
        Some(Body::Block(fields)) => {
            let mut seen = 0;
            for &field in fields {
                if !matches!(a.tree.data(field), NodeData::FunctionApplication { .. }) {
                    a.error_at(field, CompileErrorCode::InvalidRefField, "Expected a relationship");
                    continue;
                }
                seen += 1;
                if seen > 1 {
                    a.error_at(
                        field,
                        CompileErrorCode::RefRedefined,
                        "A Ref block can only hold one relationship",
                    );
                    continue;
                }
                validate_relationship(a, el.id, field);
            }
            if seen == 0 {
                a.error(
                    el.head_span(a.tree),
                    CompileErrorCode::EmptyRef,
                    "A Ref must hold a relationship",
                );
            }
        }
        None => {}
    }
}

/// `left op right [settings]?`
fn validate_relationship(a: &mut Analyzer<'_>, element: NodeId, field: NodeId) {
    let tree = a.tree;
    let Some((callee, args)) = application(tree, field) else {
        return;
    };
    let NodeData::InfixExpression { op, left, right } = tree.data(callee) else {
        a.error_at(
            callee,
            CompileErrorCode::InvalidRefField,
            "Expected a relationship like 'a.id > b.id'",
        );
        return;
    };
    if !RELATION_OPS.contains(&op.value.as_str()) {
        a.error(
            Span::of_token(op),
            CompileErrorCode::InvalidRefField,
            format!("Unknown relationship '{}', expected one of > < - <>", op.value),
        );
        return;
    }

    let left_arity = endpoint_arity(a, *left);
    let right_arity = endpoint_arity(a, *right);
    for (side, arity) in [(*left, left_arity), (*right, right_arity)] {
        if arity.is_none() {
            a.error_at(
                side,
                CompileErrorCode::InvalidRefField,
                "A relationship endpoint must be 'table.column', 'schema.table.column' or 'table.(a, b)'",
            );
        }
    }
    let (Some(left_arity), Some(right_arity)) = (left_arity, right_arity) else {
        return;
    };
    if left_arity != right_arity {
        a.error_at(
            callee,
            CompileErrorCode::UnequalFieldsBinaryRef,
            format!("Both endpoints must have the same number of columns ({left_arity} vs {right_arity})"),
        );
        return;
    }

    match args {
        [] => {}
        [list] if is_list(tree, *list) => {
            let map = aggregate_settings(tree, *list);
            check_settings(a, &map, REF_RULES, REF_CODES);
        }
        _ => {
            a.error_at(args[0], CompileErrorCode::InvalidRefField, "Unexpected expression after the relationship");
            return;
        }
    }

    a.jobs.push(Job::RefEndpoints {
        element,
        left: *left,
        right: *right,
    });
}

/// Column count of an endpoint, `None` if it is malformed.
fn endpoint_arity(a: &Analyzer<'_>, id: NodeId) -> Option<usize> {
    let tree = a.tree;
    if let Some((table, tuple)) = split_tuple_suffix(tree, id) {
        let table = destructure_path(tree, table)?;
        let columns = tuple_elements(tree, tuple)?;
        let simple = columns.iter().all(|c| simple_name(tree, *c).is_some());
        return ((1..=2).contains(&table.len()) && simple && !columns.is_empty()).then_some(columns.len());
    }
    let path = destructure_path(tree, id)?;
    (2..=3).contains(&path.len()).then_some(1)
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    const TABLES: &str = "Table users { id int\n org_id int }\nTable posts { id int\n user_id int\n org_id int }\n";

    #[test]
    fn test_valid_refs() {
        let source = format!(
            "{TABLES}Ref: posts.user_id > users.id [delete: cascade, update: no action, color: #abc]\nRef named {{\n posts.(user_id, org_id) - users.(id, org_id)\n}}\nRef: public.posts.id <> users.id"
        );
        assert_eq!(codes(&source), vec![]);
    }

    #[test]
    fn test_unequal_arity() {
        let source = format!("{TABLES}Ref: posts.(user_id, org_id) > users.id");
        assert_eq!(codes(&source), vec![CompileErrorCode::UnequalFieldsBinaryRef]);
    }

    #[test]
    fn test_bad_shapes() {
        let source = format!("{TABLES}Ref: posts > users.id\nRef: posts.id * users.id\nRef {{\n}}");
        assert_eq!(
            codes(&source),
            vec![
                CompileErrorCode::InvalidRefField,
                CompileErrorCode::InvalidRefField,
                CompileErrorCode::EmptyRef,
            ]
        );
    }

    #[test]
    fn test_two_relationships_in_one_block() {
        let source = format!("{TABLES}Ref r {{\n posts.user_id > users.id\n posts.org_id > users.org_id\n}}");
        assert_eq!(codes(&source), vec![CompileErrorCode::RefRedefined]);
    }

    #[test]
    fn test_ref_settings() {
        let source = format!("{TABLES}Ref: posts.user_id > users.id [delete: explode, delete: cascade, on: x]");
        assert_eq!(
            codes(&source),
            vec![
                CompileErrorCode::DuplicateRefSetting,
                CompileErrorCode::InvalidRefSettingValue,
                CompileErrorCode::UnknownRefSetting,
            ]
        );
    }
}
