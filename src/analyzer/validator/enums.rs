use crate::analyzer::utils::{aggregate_settings, application, is_list, variable_token};
use crate::analyzer::{Analyzer, Element, Parent};
use crate::errors::CompileErrorCode;
use crate::symbol::SymbolKind;

use super::{
    block_body, check_settings, forbid_alias, forbid_settings, name_path, require_top_level, Rule, SettingCodes,
    Shape,
};

const FIELD_RULES: &[Rule] = &[Rule::once("note", Shape::String)];

const FIELD_CODES: SettingCodes = SettingCodes {
    owner: "enum field",
    unknown: CompileErrorCode::UnknownEnumFieldSetting,
    duplicate: CompileErrorCode::DuplicateEnumFieldSetting,
    invalid: CompileErrorCode::InvalidEnumFieldSettingValue,
};

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    let fragments = name_path(a, el, 2, true);
    forbid_alias(a, el);
    forbid_settings(a, el);

    let public = a.model.public_schema();
    let symbol = match fragments.as_deref() {
        Some([schemas @ .., leaf]) => {
            let schema = a.register_schema_stack(schemas);
            a.register(schema, SymbolKind::Enum, &leaf.name, el.id, CompileErrorCode::DuplicateName)
        }
        _ => a.model.symbols.alloc(SymbolKind::Enum, "", Some(public), Some(el.id)),
    };

    let Some(fields) = block_body(a, el) else {
        return;
    };
    if fields.is_empty() {
        a.error(
            el.head_span(a.tree),
            CompileErrorCode::EmptyEnum,
            "An Enum must have at least one value",
        );
    }
    let tree = a.tree;
    for &field in fields {
        let parsed = application(tree, field).and_then(|(callee, args)| {
            let token = variable_token(tree, callee)?;
            match args {
                [] => Some((token, None)),
                [list] if is_list(tree, *list) => Some((token, Some(*list))),
                _ => None,
            }
        });
        let Some((token, settings)) = parsed else {
            a.error_at(
                field,
                CompileErrorCode::InvalidEnumField,
                "An enum value must be a name with optional settings",
            );
            continue;
        };
        a.register(
            symbol,
            SymbolKind::EnumField,
            &token.value,
            field,
            CompileErrorCode::DuplicateEnumFieldName,
        );
        if let Some(list) = settings {
            let map = aggregate_settings(tree, list);
            check_settings(a, &map, FIELD_RULES, FIELD_CODES);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_valid_enum() {
        assert_eq!(
            codes("Enum sales.status {\n active [note: 'live']\n \"on hold\"\n archived\n}"),
            vec![]
        );
    }

    #[test]
    fn test_empty_enum() {
        assert_eq!(codes("Enum status { }"), vec![CompileErrorCode::EmptyEnum]);
    }

    #[test]
    fn test_duplicate_enum_values() {
        assert_eq!(
            codes("Enum status {\n a\n a\n}"),
            vec![CompileErrorCode::DuplicateEnumFieldName; 2]
        );
    }

    #[test]
    fn test_invalid_enum_fields() {
        assert_eq!(
            codes("Enum status {\n a b\n c: d\n e [color: 'x']\n}"),
            vec![
                CompileErrorCode::InvalidEnumField,
                CompileErrorCode::InvalidEnumField,
                CompileErrorCode::UnknownEnumFieldSetting,
            ]
        );
    }

    #[test]
    fn test_enum_rejects_alias_and_settings() {
        assert_eq!(
            codes("Enum status as s [note: 'x'] { a }"),
            vec![CompileErrorCode::UnexpectedAlias, CompileErrorCode::UnexpectedSettings]
        );
    }

    #[test]
    fn test_enum_requires_block_body() {
        assert_eq!(codes("Enum status: active"), vec![CompileErrorCode::UnexpectedSimpleBody]);
        assert_eq!(
            codes("Enum status {\n active\n 'done'\n}"),
            vec![CompileErrorCode::InvalidEnumField]
        );
    }
}
