use crate::analyzer::utils::{aggregate_settings, application, function_expression, is_list};
use crate::analyzer::{Analyzer, Element, Parent};
use crate::errors::CompileErrorCode;

use super::indexes::TABLE_PARENTS;
use super::{
    block_body, check_settings, forbid_alias, forbid_name, forbid_settings, require_parent, Rule, SettingCodes,
    Shape,
};

const CHECK_RULES: &[Rule] = &[Rule::once("name", Shape::String)];

const CHECK_CODES: SettingCodes = SettingCodes {
    owner: "check",
    unknown: CompileErrorCode::UnknownCheckSetting,
    duplicate: CompileErrorCode::DuplicateCheckSetting,
    invalid: CompileErrorCode::InvalidCheckSettingValue,
};

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if require_parent(a, el, parent, TABLE_PARENTS).is_none() {
        return;
    }
    forbid_name(a, el);
    forbid_alias(a, el);
    forbid_settings(a, el);

    let Some(fields) = block_body(a, el) else {
        return;
    };
    if fields.is_empty() {
        a.error(
            el.head_span(a.tree),
            CompileErrorCode::EmptyChecks,
            "A Checks block must hold at least one check",
        );
    }
    let tree = a.tree;
    for &field in fields {
        let parsed = application(tree, field).and_then(|(callee, args)| {
            function_expression(tree, callee)?;
            match args {
                [] => Some(None),
                [list] if is_list(tree, *list) => Some(Some(*list)),
                _ => None,
            }
        });
        match parsed {
            Some(settings) => {
                if let Some(list) = settings {
                    let map = aggregate_settings(tree, list);
                    check_settings(a, &map, CHECK_RULES, CHECK_CODES);
                }
            }
            None => a.error_at(
                field,
                CompileErrorCode::InvalidCheckField,
                "A check must be a function expression in backticks",
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    #[test]
    fn test_valid_checks() {
        let source = "Table t {\n price int\n checks {\n  `price > 0` [name: 'positive']\n  `price < 1000`\n }\n}";
        assert_eq!(codes(source), vec![]);
    }

    #[test]
    fn test_invalid_checks() {
        assert_eq!(
            codes("Table t {\n price int\n checks {\n  price\n  `price > 0` [label: 'x']\n }\n checks { }\n}"),
            vec![
                CompileErrorCode::InvalidCheckField,
                CompileErrorCode::UnknownCheckSetting,
                CompileErrorCode::EmptyChecks,
            ]
        );
    }

    #[test]
    fn test_checks_require_block_body() {
        assert_eq!(
            codes("Table t {\n price int\n checks: `price > 0`\n}"),
            vec![CompileErrorCode::UnexpectedSimpleBody]
        );
    }
}
