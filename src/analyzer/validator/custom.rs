use crate::analyzer::utils::{application, string_value, Span};
use crate::analyzer::{Analyzer, Element, ElementKind, Parent};
use crate::errors::CompileErrorCode;

use super::{body, forbid_alias, forbid_name, forbid_settings, Body};

/// `key: 'value'` lines inside a Project. Anywhere else the keyword is unknown.
pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !parent.is_some_and(|p| p.kind == ElementKind::Project) {
        a.error(
            Span::of_token(el.keyword),
            CompileErrorCode::InvalidContext,
            format!("Unknown element type '{}'", el.keyword.value),
        );
        return;
    }
    forbid_name(a, el);
    forbid_alias(a, el);
    forbid_settings(a, el);

    match body(a, el) {
        Some(Body::Simple(field)) => {
            let valid = application(a.tree, field)
                .is_some_and(|(callee, args)| args.is_empty() && string_value(a.tree, callee).is_some());
            if !valid {
                a.error_at(
                    field,
                    CompileErrorCode::InvalidCustomElementValue,
                    format!("'{}' must be set to a single string", el.keyword.value),
                );
            }
        }
        Some(Body::Block(_)) => {
            if let Some(body) = el.body {
                a.error_at(
                    body,
                    CompileErrorCode::UnexpectedComplexBody,
                    format!("'{}' takes a value after ':', not a block", el.keyword.value),
                );
            }
        }
        None => {}
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_custom_values() {
        assert_eq!(
            codes("Project p {\n database_type: 42\n owner { 'x' }\n}"),
            vec![
                CompileErrorCode::InvalidCustomElementValue,
                CompileErrorCode::UnexpectedComplexBody,
            ]
        );
    }
}
