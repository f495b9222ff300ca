use crate::analyzer::utils::Span;
use crate::analyzer::{Analyzer, Element, Parent};
use crate::ast::NodeData;
use crate::errors::CompileErrorCode;

use super::{block_body, forbid_alias, forbid_settings, name_path, require_top_level, validate_sub_element};

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    if a.project.is_some() {
        a.error(
            el.head_span(a.tree),
            CompileErrorCode::DuplicateProject,
            "Only one Project can be defined",
        );
    } else {
        a.project = Some(el.id);
    }
    name_path(a, el, 1, false);
    forbid_alias(a, el);
    forbid_settings(a, el);

    let Some(fields) = block_body(a, el) else {
        return;
    };
    let here = Parent {
        kind: el.kind,
        node: el.id,
        symbol: None,
    };
    let mut note_seen = false;
    for &field in fields {
        if matches!(a.tree.data(field), NodeData::ElementDeclaration { .. }) {
            validate_sub_element(a, field, here, &mut note_seen);
        } else {
            a.error(
                Span::of_node(a.tree, field),
                CompileErrorCode::InvalidProjectField,
                "A Project can only hold settings like 'database_type: ...' and a Note",
            );
        }
    }
}
