use crate::analyzer::binder::{DepSide, Job};
use crate::analyzer::utils::{
    aggregate_settings, application, destructure_path, simple_name, split_tuple_suffix, tuple_elements,
};
use crate::analyzer::{Analyzer, Element, Parent};
use crate::ast::{NodeData, NodeId};
use crate::errors::CompileErrorCode;

use super::{body, check_settings, forbid_alias, name_path, require_top_level, Body, Rule, SettingCodes, Shape};

const DEP_RULES: &[Rule] = &[Rule::once("note", Shape::String)];

const DEP_CODES: SettingCodes = SettingCodes {
    owner: "dep",
    unknown: CompileErrorCode::UnknownDepSetting,
    duplicate: CompileErrorCode::DuplicateDepSetting,
    invalid: CompileErrorCode::InvalidDepSettingValue,
};

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    name_path(a, el, 1, false);
    forbid_alias(a, el);
    if let Some(settings) = el.settings {
        let map = aggregate_settings(a.tree, settings);
        check_settings(a, &map, DEP_RULES, DEP_CODES);
    }

    match body(a, el) {
        Some(Body::Simple(field)) => validate_edge(a, el.id, field),
        Some(Body::Block(fields)) => {
            if fields.is_empty() {
                a.error(
                    el.head_span(a.tree),
                    CompileErrorCode::EmptyDep,
                    "A Dep must hold at least one dependency",
                );
            }
            for &field in fields {
                validate_edge(a, el.id, field);
            }
        }
        None => {}
    }
}

/// `upstream > downstream` or `downstream < upstream`.
fn validate_edge(a: &mut Analyzer<'_>, element: NodeId, field: NodeId) {
    let tree = a.tree;
    let edge = application(tree, field)
        .filter(|(_, args)| args.is_empty())
        .and_then(|(callee, _)| match tree.data(callee) {
            NodeData::InfixExpression { op, left, right } if op.value == ">" => Some((*left, *right)),
            NodeData::InfixExpression { op, left, right } if op.value == "<" => Some((*right, *left)),
            _ => None,
        });
    let Some((upstream, downstream)) = edge else {
        a.error_at(
            field,
            CompileErrorCode::InvalidDepField,
            "A dependency must look like 'upstream > downstream'",
        );
        return;
    };

    let upstream_nodes = match tree.data(upstream) {
        NodeData::TupleExpression { elements, .. } => elements.clone(),
        NodeData::GroupExpression { expression, .. } => vec![*expression],
        _ => vec![upstream],
    };
    let downstream_side = side(a, downstream);
    let upstream_sides: Vec<Option<DepSide>> = upstream_nodes.iter().map(|n| side(a, *n)).collect();

    let mut valid = true;
    for (node, parsed) in std::iter::once((downstream, &downstream_side)).chain(upstream_nodes.iter().copied().zip(&upstream_sides)) {
        if parsed.is_none() {
            valid = false;
            a.error_at(
                node,
                CompileErrorCode::InvalidDepField,
                "A dependency side must be 'table', 'schema.table' or 'table.(col, ...)'",
            );
        }
    }
    let (Some(downstream_side), true) = (downstream_side, valid) else {
        return;
    };
    let upstreams: Vec<DepSide> = upstream_sides.into_iter().flatten().collect();

    let arity = downstream_side.columns.len();
    for (node, up) in upstream_nodes.iter().zip(&upstreams) {
        if up.columns.len() != arity {
            let message = if arity == 0 {
                "Upstream columns can only be listed when the downstream lists its columns".to_string()
            } else {
                format!("Expected {arity} upstream column(s) to match the downstream")
            };
            a.error_at(*node, CompileErrorCode::InvalidDepField, message);
            valid = false;
        }
    }
    if valid {
        a.jobs.push(Job::DepEdge {
            element,
            downstream: downstream_side,
            upstreams,
        });
    }
}

fn side(a: &Analyzer<'_>, id: NodeId) -> Option<DepSide> {
    let tree = a.tree;
    let (table, columns) = match split_tuple_suffix(tree, id) {
        Some((table, tuple)) => {
            let columns = tuple_elements(tree, tuple)?;
            if columns.is_empty() || !columns.iter().all(|c| simple_name(tree, *c).is_some()) {
                return None;
            }
            (table, columns)
        }
        None => (id, Vec::new()),
    };
    let path = destructure_path(tree, table)?;
    (1..=2).contains(&path.len()).then_some(DepSide { table, columns })
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    const TABLES: &str = "Table a { id int\n x int }\nTable b { id int\n y int }\nTable c { id int\n x int\n y int }\nTable d { z int }\n";

    #[test]
    fn test_valid_deps() {
        let source = format!(
            "{TABLES}Dep: a > c\nDep lineage [note: 'etl'] {{\n (a, b) > c\n c < a\n a.(x) > c.(x)\n (a.(x), b.(y)) > c.(y)\n}}"
        );
        assert_eq!(codes(&source), vec![]);
    }

    #[test]
    fn test_dep_arity() {
        let source = format!("{TABLES}Dep: a.(id, x) > c.(id)\nDep: a.(x) > c");
        assert_eq!(codes(&source), vec![CompileErrorCode::InvalidDepField; 2]);
    }

    #[test]
    fn test_dep_shapes() {
        let source = format!("{TABLES}Dep: a - c\nDep {{\n}}\nDep: a > 'c'");
        assert_eq!(
            codes(&source),
            vec![
                CompileErrorCode::InvalidDepField,
                CompileErrorCode::EmptyDep,
                CompileErrorCode::InvalidDepField,
            ]
        );
    }

    #[test]
    fn test_dep_resolution() {
        let source = format!("{TABLES}Dep: a > missing\nDep: a.(nope) > c.(x)\nDep: a > d");
        assert_eq!(codes(&source), vec![CompileErrorCode::BindingError; 3]);
    }
}
