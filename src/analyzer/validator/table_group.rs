use crate::analyzer::binder::Job;
use crate::analyzer::utils::{aggregate_settings, application, destructure_path};
use crate::analyzer::{Analyzer, Element, Parent};
use crate::ast::NodeData;
use crate::errors::CompileErrorCode;
use crate::symbol::SymbolKind;

use super::{
    block_body, check_settings, forbid_alias, name_path, require_top_level, validate_sub_element, Rule,
    SettingCodes, Shape,
};

const GROUP_RULES: &[Rule] = &[
    Rule::once("color", Shape::Color),
    Rule::once("note", Shape::String),
];

const GROUP_CODES: SettingCodes = SettingCodes {
    owner: "table group",
    unknown: CompileErrorCode::UnknownTableGroupSetting,
    duplicate: CompileErrorCode::DuplicateTableGroupSetting,
    invalid: CompileErrorCode::InvalidTableGroupSettingValue,
};

pub(super) fn validate(a: &mut Analyzer<'_>, el: &Element<'_>, parent: Option<Parent>) {
    if !require_top_level(a, el, parent) {
        return;
    }
    let fragments = name_path(a, el, 2, true);
    forbid_alias(a, el);
    let settings = el
        .settings
        .map(|s| aggregate_settings(a.tree, s))
        .unwrap_or_default();
    check_settings(a, &settings, GROUP_RULES, GROUP_CODES);

    let public = a.model.public_schema();
    let group = match fragments.as_deref() {
        Some([schemas @ .., leaf]) => {
            let schema = a.register_schema_stack(schemas);
            a.register(schema, SymbolKind::TableGroup, &leaf.name, el.id, CompileErrorCode::DuplicateName)
        }
        _ => a.model.symbols.alloc(SymbolKind::TableGroup, "", Some(public), Some(el.id)),
    };

    let Some(fields) = block_body(a, el) else {
        return;
    };
    let here = Parent {
        kind: el.kind,
        node: el.id,
        symbol: Some(group),
    };
    let mut note_seen = settings.has("note");
    let tree = a.tree;
    for &field in fields {
        if matches!(tree.data(field), NodeData::ElementDeclaration { .. }) {
            validate_sub_element(a, field, here, &mut note_seen);
            continue;
        }
        let member = application(tree, field)
            .filter(|(_, args)| args.is_empty())
            .and_then(|(callee, _)| Some((callee, destructure_path(tree, callee)?)))
            .filter(|(_, path)| path.len() <= 2);
        let Some((callee, path)) = member else {
            a.error_at(
                field,
                CompileErrorCode::InvalidTableGroupField,
                "A TableGroup field must be a table name",
            );
            continue;
        };
        let name = path.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(".");
        a.register(
            group,
            SymbolKind::TableGroupField,
            &name,
            field,
            CompileErrorCode::DuplicateTableGroupFieldName,
        );
        a.jobs.push(Job::GroupMember { group, node: callee });
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::codes;
    use crate::errors::CompileErrorCode;

    const TABLES: &str = "Table users as U { id int }\nTable sales.orders { id int }\n";

    #[test]
    fn test_valid_group() {
        let source = format!("{TABLES}TableGroup core [color: #f0f, note: 'main'] {{\n U\n sales.orders\n Note: 'x'\n}}");
        assert_eq!(codes(&source), vec![CompileErrorCode::NoteRedefined]);
    }

    #[test]
    fn test_invalid_members() {
        let source = format!("{TABLES}TableGroup g {{\n users\n users\n users id\n}}");
        assert_eq!(
            codes(&source),
            vec![
                CompileErrorCode::DuplicateTableGroupFieldName,
                CompileErrorCode::DuplicateTableGroupFieldName,
                CompileErrorCode::InvalidTableGroupField,
            ]
        );
    }

    #[test]
    fn test_table_in_two_groups() {
        let source = format!("{TABLES}TableGroup a {{ users }}\nTableGroup b {{ U }}");
        assert_eq!(codes(&source), vec![CompileErrorCode::TableInMultipleGroups]);
    }

    #[test]
    fn test_unknown_member() {
        let source = format!("{TABLES}TableGroup g {{ ghosts }}");
        assert_eq!(codes(&source), vec![CompileErrorCode::BindingError]);
    }

    #[test]
    fn test_group_requires_block_body() {
        assert_eq!(
            codes("Table a { id int }\nTableGroup g: a"),
            vec![CompileErrorCode::UnexpectedSimpleBody]
        );
    }
}
