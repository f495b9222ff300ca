use crate::analyzer::utils::aggregate_settings;
use crate::analyzer::{Analyzer, Element, Parent};
use crate::errors::CompileErrorCode;
use crate::symbol::SymbolKind;

use super::table::{detached, validate_body, TABLE_CODES};
use super::{block_body, check_settings, forbid_alias, name_path, require_top_level, Rule, SettingCodes, Shape};

const PARTIAL_RULES: &[Rule] = &[
    Rule::once("headercolor", Shape::Color),
    Rule::once("note", Shape::String),
];

const PARTIAL_CODES: SettingCodes = SettingCodes {
    owner: "table partial",
    ..TABLE_CODES
};

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    let fragments = name_path(a, el, 1, true);
    forbid_alias(a, el);

    let settings = el
        .settings
        .map(|s| aggregate_settings(a.tree, s))
        .unwrap_or_default();
    check_settings(a, &settings, PARTIAL_RULES, PARTIAL_CODES);

    let symbol = match fragments.as_deref() {
        Some([leaf]) => {
            let public = a.model.public_schema();
            a.register(public, SymbolKind::TablePartial, &leaf.name, el.id, CompileErrorCode::DuplicateName)
        }
        _ => detached(a, el),
    };

    if let Some(fields) = block_body(a, el) {
        validate_body(a, el, symbol, fields, settings.has("note"));
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_valid_partial_and_injection() {
        let source = "TablePartial base [headercolor: #fff] {\n id int [pk]\n indexes { id }\n}\nTable users {\n ~base\n name text\n}";
        assert_eq!(codes(source), vec![]);
    }

    #[test]
    fn test_partial_cannot_inject() {
        assert_eq!(
            codes("TablePartial a { id int }\nTablePartial b { ~a }"),
            vec![CompileErrorCode::InvalidTablePartialInjection]
        );
    }

    #[test]
    fn test_partial_name_is_simple() {
        assert_eq!(codes("TablePartial s.p { id int }"), vec![CompileErrorCode::InvalidName]);
    }

    #[test]
    fn test_duplicate_injection() {
        assert_eq!(
            codes("TablePartial p { a int }\nTable t {\n ~p\n ~p\n}"),
            vec![CompileErrorCode::DuplicateTablePartialInjection; 2]
        );
    }

    #[test]
    fn test_unknown_partial() {
        assert_eq!(codes("Table t {\n ~missing\n}"), vec![CompileErrorCode::BindingError]);
    }

    #[test]
    fn test_table_of_only_injections_is_not_empty() {
        assert_eq!(codes("TablePartial p { a int }\nTable t { ~p }"), vec![]);
    }

    #[test]
    fn test_partial_body() {
        assert_eq!(codes("TablePartial p: id int"), vec![CompileErrorCode::UnexpectedSimpleBody]);
        assert_eq!(codes("TablePartial p { id }"), vec![CompileErrorCode::InvalidColumn]);
    }
}
