use crate::analyzer::utils::{aggregate_settings, application, string_value, Span};
use crate::analyzer::{Analyzer, Element, ElementKind, Parent};
use crate::ast::NodeId;
use crate::errors::CompileErrorCode;

use super::{body, check_settings, forbid_alias, forbid_name, forbid_settings, name_path, Body, Rule, SettingCodes, Shape};

const STICKY_RULES: &[Rule] = &[Rule::once("headercolor", Shape::Color)];

const NOTE_CODES: SettingCodes = SettingCodes {
    owner: "note",
    unknown: CompileErrorCode::UnknownNoteSetting,
    duplicate: CompileErrorCode::DuplicateNoteSetting,
    invalid: CompileErrorCode::InvalidNoteSettingValue,
};

const NOTE_PARENTS: &[ElementKind] = &[
    ElementKind::Table,
    ElementKind::TablePartial,
    ElementKind::TableGroup,
    ElementKind::Project,
];

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    forbid_alias(a, el);
    match parent {
        None => validate_sticky(a, el),
        Some(p) if NOTE_PARENTS.contains(&p.kind) => {
            forbid_name(a, el);
            forbid_settings(a, el);
        }
        Some(p) => {
            a.error(
                Span::of_token(el.keyword),
                CompileErrorCode::InvalidContext,
                format!("A Note cannot appear inside {}", p.kind.as_str()),
            );
            return;
        }
    }
    validate_content(a, el);
}

/// Top-level named note.
fn validate_sticky(a: &mut Analyzer<'_>, el: &Element<'_>) {
    if let Some(settings) = el.settings {
        let map = aggregate_settings(a.tree, settings);
        check_settings(a, &map, STICKY_RULES, NOTE_CODES);
    }
    let Some(fragments) = name_path(a, el, 1, true) else {
        return;
    };
    let Some(fragment) = fragments.into_iter().next() else {
        return;
    };
    match a.sticky_notes.get(&fragment.name).copied() {
        Some(first) => {
            let message = format!("Note '{}' is already defined", fragment.name);
            if a.reported_sticky.insert(first) {
                a.error_at(first, CompileErrorCode::DuplicateName, message.clone());
            }
            a.error_at(fragment.node, CompileErrorCode::DuplicateName, message);
        }
        None => {
            a.sticky_notes.insert(fragment.name, fragment.node);
        }
    }
}

fn validate_content(a: &mut Analyzer<'_>, el: &Element<'_>) {
    let content = match body(a, el) {
        Some(Body::Simple(field)) => Some(field),
        Some(Body::Block([field])) => Some(*field),
        Some(Body::Block(_)) => None,
        None => return,
    };
    if !content.is_some_and(|field| is_string_line(a, field)) {
        let anchor = content.or(el.body).unwrap_or(el.id);
        a.error_at(anchor, CompileErrorCode::InvalidNoteContent, "A Note must hold a single string");
    }
}

fn is_string_line(a: &Analyzer<'_>, field: NodeId) -> bool {
    application(a.tree, field).is_some_and(|(callee, args)| args.is_empty() && string_value(a.tree, callee).is_some())
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_sticky_and_nested_notes() {
        let source = "Note overview [headercolor: #eee] {\n '''\n  # Schema\n '''\n}\nTable t {\n id int\n Note: 'table note'\n}";
        assert_eq!(codes(source), vec![]);
    }

    #[test]
    fn test_sticky_note_needs_name() {
        assert_eq!(codes("Note: 'orphan'"), vec![CompileErrorCode::NameNotFound]);
    }

    #[test]
    fn test_nested_note_rejects_name() {
        assert_eq!(
            codes("Table t {\n id int\n Note n: 'x'\n}"),
            vec![CompileErrorCode::UnexpectedName]
        );
    }

    #[test]
    fn test_note_content_must_be_string() {
        assert_eq!(
            codes("Note n { 'a'\n 'b' }\nNote m: 42"),
            vec![CompileErrorCode::InvalidNoteContent, CompileErrorCode::InvalidNoteContent]
        );
    }

    #[test]
    fn test_duplicate_sticky_notes() {
        assert_eq!(
            codes("Note n: 'a'\nNote n: 'b'"),
            vec![CompileErrorCode::DuplicateName; 2]
        );
    }

    #[test]
    fn test_note_inside_enum() {
        assert!(codes("Enum e {\n a\n Note: 'x'\n}").contains(&CompileErrorCode::InvalidEnumField));
    }
}
