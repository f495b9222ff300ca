use crate::analyzer::utils::{
    application, destructure_path, function_expression, is_list, joined_words, literal_token, normalize_note,
    string_value, tuple_elements, variable_token, Setting, SettingMap, Span,
};
use crate::analyzer::{Element, ElementKind};
use crate::ast::{NodeData, NodeId};
use crate::lexer::TokenKind;
use crate::model::{
    Alias, Check, Column, ColumnType, DefaultKind, DefaultValue, Endpoint, Index, IndexColumn, IndexColumnKind,
    InlineRef, Ref, Relation, Table, TableName, TablePartial,
};
use crate::symbol::{SymbolId, SymbolKind};

use super::Interpreter;

/// Everything a Table or TablePartial body declares, before merging.
#[derive(Debug, Default)]
struct Body {
    items: Vec<Item>,
    indexes: Vec<Index>,
    checks: Vec<Check>,
    note: Option<String>,
}

#[derive(Debug)]
enum Item {
    Column(Column),
    Injection(SymbolId),
}

impl Interpreter<'_> {
    /// Interpreted once, then spliced into every table that injects it.
    pub(super) fn partial(&self, el: &Element<'_>) -> Option<(SymbolId, TablePartial)> {
        let symbol = self.model.symbol_of(el.id)?;
        let settings = self.settings(el.settings);
        let body = self.body(el);
        let fields = body
            .items
            .into_iter()
            .filter_map(|item| match item {
                Item::Column(c) => Some(c),
                Item::Injection(_) => None,
            })
            .collect();
        let partial = TablePartial {
            name: self.model.symbols.get(symbol).name.clone(),
            fields,
            indexes: body.indexes,
            checks: body.checks,
            note: body.note.or_else(|| self.string_setting(&settings, "note")),
            header_color: self.color_setting(&settings, "headercolor"),
            token: self.range(el.id),
        };
        Some((symbol, partial))
    }

    pub(super) fn table(&mut self, el: &Element<'_>) {
        let Some(symbol) = self.model.symbol_of(el.id) else {
            return;
        };
        let TableName {
            table_name: name,
            schema_name,
        } = self.table_name(symbol);
        let settings = self.settings(el.settings);
        let alias = el
            .alias
            .and_then(|a| variable_token(self.tree, a))
            .map(|t| t.value.clone());
        if let Some(alias) = &alias {
            self.db.aliases.push(Alias {
                name: alias.clone(),
                kind: "table".to_string(),
                value: TableName {
                    table_name: name.clone(),
                    schema_name: schema_name.clone(),
                },
            });
        }

        let body = self.body(el);
        let mut table = Table {
            name,
            schema_name,
            alias,
            fields: Vec::new(),
            indexes: body.indexes,
            checks: body.checks,
            note: body.note.or_else(|| self.string_setting(&settings, "note")),
            header_color: self.color_setting(&settings, "headercolor"),
            partials: Vec::new(),
            token: self.range(el.id),
        };
        self.merge(&mut table, body.items);
        synthesize_composite_pk(&mut table);

        for column in &table.fields {
            for inline in &column.inline_refs {
                let r = self.inline_ref_model(&table, column, inline);
                self.push_ref(r);
            }
        }
        self.db.tables.push(table);
    }

    /// Splice partial columns in at their injection points. Own columns
    /// shadow injected ones and a later injection shadows an earlier one.
    fn merge(&self, table: &mut Table, items: Vec<Item>) {
        let own: Vec<String> = items
            .iter()
            .filter_map(|i| match i {
                Item::Column(c) => Some(c.name.clone()),
                Item::Injection(_) => None,
            })
            .collect();
        let injected: Vec<&TablePartial> = items
            .iter()
            .filter_map(|i| match i {
                Item::Injection(p) => self.partials.get(p),
                Item::Column(_) => None,
            })
            .collect();

        let mut position = 0;
        for item in items {
            match item {
                Item::Column(column) => table.fields.push(column),
                Item::Injection(partial) => {
                    let Some(p) = self.partials.get(&partial) else {
                        continue;
                    };
                    let later = &injected[(position + 1).min(injected.len())..];
                    position += 1;
                    for column in &p.fields {
                        let shadowed = own.contains(&column.name)
                            || later.iter().any(|l| l.fields.iter().any(|c| c.name == column.name));
                        if !shadowed {
                            table.fields.push(Column {
                                injected_from: Some(p.name.clone()),
                                ..column.clone()
                            });
                        }
                    }
                    table.partials.push(p.name.clone());
                }
            }
        }

        for p in &injected {
            table.indexes.extend(p.indexes.iter().cloned());
            table.checks.extend(p.checks.iter().cloned());
        }
        if table.note.is_none() {
            table.note = injected.iter().rev().find_map(|p| p.note.clone());
        }
        if table.header_color.is_none() {
            table.header_color = injected.iter().rev().find_map(|p| p.header_color.clone());
        }
    }

    fn body(&self, el: &Element<'_>) -> Body {
        let mut body = Body::default();
        let Some(fields) = el.block_fields(self.tree) else {
            return body;
        };
        for &field in fields {
            match self.tree.data(field) {
                NodeData::ElementDeclaration { .. } => {
                    let Some(sub) = Element::from_node(self.tree, field) else {
                        continue;
                    };
                    match sub.kind {
                        ElementKind::Note => body.note = self.note_content(&sub),
                        ElementKind::Indexes => body.indexes.extend(self.indexes(&sub)),
                        ElementKind::Checks => body.checks.extend(self.checks(&sub)),
                        _ => {}
                    }
                }
                NodeData::FunctionApplication { callee, .. } => match self.tree.data(*callee) {
                    NodeData::PartialInjection { partial, .. } => {
                        let bound = partial.and_then(|p| self.model.referee_of(p));
                        if let Some(symbol) = bound {
                            body.items.push(Item::Injection(symbol));
                        }
                    }
                    _ => {
                        if let Some(column) = self.column(field) {
                            body.items.push(Item::Column(column));
                        }
                    }
                },
                _ => {}
            }
        }
        body
    }

    /// `name type legacy_flag* [settings]?`
    fn column(&self, field: NodeId) -> Option<Column> {
        let tree = self.tree;
        let (callee, args) = application(tree, field)?;
        let name = variable_token(tree, callee)?.value.clone();
        let (&type_node, rest) = args.split_first()?;
        let (list, legacy) = match rest.split_last() {
            Some((&last, legacy)) if is_list(tree, last) => (Some(last), legacy),
            _ => (None, rest),
        };

        let mut settings = SettingMap::default();
        for &flag in legacy {
            if let Some(token) = variable_token(tree, flag) {
                settings.push(Setting {
                    name: token.value.to_ascii_lowercase(),
                    span: Span::of_token(token),
                    value: None,
                    attribute: flag,
                });
            }
        }
        for (_, list_settings) in self.settings(list).iter() {
            for setting in list_settings {
                settings.push(setting.clone());
            }
        }

        let not_null = if settings.has("not null") {
            Some(true)
        } else if settings.has("null") {
            Some(false)
        } else {
            None
        };
        let inline_refs = settings
            .get("ref")
            .iter()
            .filter_map(|s| s.value)
            .filter_map(|v| self.inline_ref(v))
            .collect();
        let checks = settings
            .get("check")
            .iter()
            .filter_map(|s| {
                let value = s.value?;
                Some(Check {
                    expression: function_expression(tree, value)?.value.clone(),
                    name: None,
                    token: self.range(value),
                })
            })
            .collect();

        Some(Column {
            name,
            column_type: self.column_type(type_node),
            pk: settings.has("pk"),
            unique: settings.has("unique"),
            not_null,
            increment: settings.has("increment"),
            dbdefault: settings
                .first("default")
                .and_then(|s| s.value)
                .and_then(|v| self.default_value(v)),
            note: self.string_setting(&settings, "note"),
            inline_refs,
            checks,
            injected_from: None,
            token: self.range(field),
        })
    }

    /// Split `schema.name(args)[]` into schema, display name and arguments.
    fn column_type(&self, type_node: NodeId) -> ColumnType {
        let tree = self.tree;
        let mut base = type_node;
        let mut args = None;
        loop {
            match tree.data(base) {
                NodeData::Array { expression, .. } => base = *expression,
                NodeData::CallExpression { callee, arguments } => {
                    if args.is_none() {
                        let parts = tuple_elements(tree, *arguments).unwrap_or_default();
                        let text: Vec<&str> = parts.iter().map(|p| tree.text(self.source, *p)).collect();
                        args = Some(text.join(", "));
                    }
                    base = *callee;
                }
                _ => break,
            }
        }
        let path = destructure_path(tree, base).unwrap_or_default();
        let (schema_name, leaf) = match path.as_slice() {
            [schema, leaf] => (Some(schema.name.clone()), leaf),
            [leaf] => (None, leaf),
            _ => {
                return ColumnType {
                    schema_name: None,
                    type_name: tree.text(self.source, type_node).to_string(),
                    args,
                    is_enum: false,
                };
            }
        };
        let suffix = self
            .source
            .get(tree.node(leaf.node).end..tree.node(type_node).end)
            .unwrap_or("");
        let is_enum = self
            .model
            .referee_of(leaf.node)
            .is_some_and(|s| self.model.symbols.get(s).kind == SymbolKind::Enum);
        ColumnType {
            schema_name: schema_name.filter(|s| s != "public"),
            type_name: format!("{}{suffix}", leaf.name),
            args,
            is_enum,
        }
    }

    fn default_value(&self, value: NodeId) -> Option<DefaultValue> {
        let tree = self.tree;
        if let Some(token) = function_expression(tree, value) {
            return Some(DefaultValue {
                kind: DefaultKind::Expression,
                value: token.value.clone(),
            });
        }
        if let Some(token) = literal_token(tree, value) {
            let kind = if token.kind == TokenKind::NumericLiteral {
                DefaultKind::Number
            } else {
                DefaultKind::String
            };
            return Some(DefaultValue {
                kind,
                value: token.value.clone(),
            });
        }
        if let Some(token) = variable_token(tree, value) {
            let lowered = token.value.to_ascii_lowercase();
            let kind = match lowered.as_str() {
                "true" | "false" => DefaultKind::Boolean,
                "null" => DefaultKind::Null,
                _ => return None,
            };
            return Some(DefaultValue { kind, value: lowered });
        }
        match tree.data(value) {
            NodeData::PrefixExpression { op, expression } => {
                let number = literal_token(tree, *expression).filter(|t| t.kind == TokenKind::NumericLiteral)?;
                let sign = if op.value == "-" { "-" } else { "" };
                Some(DefaultValue {
                    kind: DefaultKind::Number,
                    value: format!("{sign}{}", number.value),
                })
            }
            _ => None,
        }
    }

    /// `> schema.table.column`; table and schema follow the bound symbol so
    /// aliases resolve to the real table.
    fn inline_ref(&self, value: NodeId) -> Option<InlineRef> {
        let NodeData::PrefixExpression { op, expression } = self.tree.data(value) else {
            return None;
        };
        let path = destructure_path(self.tree, *expression)?;
        let (column, table_path) = path.split_last()?;
        let table_fragment = table_path.last()?;
        let TableName {
            table_name,
            schema_name,
        } = match self.model.referee_of(table_fragment.node) {
            Some(table) => self.table_name(table),
            None => TableName {
                table_name: table_fragment.name.clone(),
                schema_name: table_path.first().filter(|_| table_path.len() == 2).map(|f| f.name.clone()),
            },
        };
        Some(InlineRef {
            schema_name,
            table_name,
            field_names: vec![column.name.clone()],
            relation: op.value.clone(),
            token: self.range(value),
        })
    }

    fn inline_ref_model(&self, table: &Table, column: &Column, inline: &InlineRef) -> Ref {
        let (own, target) = Relation::pair(&inline.relation).unwrap_or((Relation::Many, Relation::One));
        Ref {
            name: None,
            schema_name: None,
            endpoints: vec![
                Endpoint {
                    schema_name: table.schema_name.clone(),
                    table_name: table.name.clone(),
                    field_names: vec![column.name.clone()],
                    relation: own,
                    token: column.token,
                },
                Endpoint {
                    schema_name: inline.schema_name.clone(),
                    table_name: inline.table_name.clone(),
                    field_names: inline.field_names.clone(),
                    relation: target,
                    token: inline.token,
                },
            ],
            on_delete: None,
            on_update: None,
            color: None,
            token: inline.token,
        }
    }

    fn indexes(&self, el: &Element<'_>) -> Vec<Index> {
        let tree = self.tree;
        let Some(fields) = el.block_fields(tree) else {
            return Vec::new();
        };
        fields
            .iter()
            .filter_map(|&field| {
                let (callee, args) = application(tree, field)?;
                let settings = self.settings(args.first().copied());
                let parts = tuple_elements(tree, callee).unwrap_or_else(|| vec![callee]);
                let columns = parts
                    .iter()
                    .filter_map(|&part| {
                        if let Some(token) = variable_token(tree, part) {
                            return Some(IndexColumn {
                                kind: IndexColumnKind::Column,
                                value: token.value.clone(),
                            });
                        }
                        function_expression(tree, part).map(|token| IndexColumn {
                            kind: IndexColumnKind::Expression,
                            value: token.value.clone(),
                        })
                    })
                    .collect();
                Some(Index {
                    columns,
                    pk: settings.has("pk"),
                    unique: settings.has("unique"),
                    name: self.string_setting(&settings, "name"),
                    index_type: settings
                        .first("type")
                        .and_then(|s| s.value)
                        .and_then(|v| joined_words(tree, v)),
                    note: self.string_setting(&settings, "note"),
                    token: self.range(field),
                })
            })
            .collect()
    }

    fn checks(&self, el: &Element<'_>) -> Vec<Check> {
        let tree = self.tree;
        let Some(fields) = el.block_fields(tree) else {
            return Vec::new();
        };
        fields
            .iter()
            .filter_map(|&field| {
                let (callee, args) = application(tree, field)?;
                let settings = self.settings(args.first().copied());
                Some(Check {
                    expression: function_expression(tree, callee)?.value.clone(),
                    name: self.string_setting(&settings, "name"),
                    token: self.range(field),
                })
            })
            .collect()
    }

    /// Normalized string of a `Note: '...'` or `Note { '...' }` sub-element.
    pub(super) fn note_content(&self, el: &Element<'_>) -> Option<String> {
        let tree = self.tree;
        let field = match el.block_fields(tree) {
            Some([field]) => *field,
            Some(_) => return None,
            None => el.body?,
        };
        let (callee, _) = application(tree, field)?;
        string_value(tree, callee).map(normalize_note)
    }
}

/// Two or more `pk` columns become one composite primary key index.
fn synthesize_composite_pk(table: &mut Table) {
    let pk_columns: Vec<String> = table.fields.iter().filter(|c| c.pk).map(|c| c.name.clone()).collect();
    if pk_columns.len() < 2 {
        return;
    }
    for column in table.fields.iter_mut() {
        column.pk = false;
    }
    table.indexes.push(Index {
        columns: pk_columns
            .into_iter()
            .map(|value| IndexColumn {
                kind: IndexColumnKind::Column,
                value,
            })
            .collect(),
        pk: true,
        unique: false,
        name: None,
        index_type: None,
        note: None,
        token: table.token,
    });
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::tests::db;
    use crate::model::{DefaultKind, IndexColumnKind};

    #[test]
    fn test_composite_pk() {
        let db = db("Table t {\n a int [pk]\n b int [pk]\n c int\n}\nTable u { id int [pk] }");
        let t = &db.tables[0];
        assert!(t.fields.iter().all(|c| !c.pk));
        assert_eq!(t.indexes.len(), 1);
        assert!(t.indexes[0].pk);
        let cols: Vec<&str> = t.indexes[0].columns.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(cols, vec!["a", "b"]);
        let u = &db.tables[1];
        assert!(u.fields[0].pk);
        assert!(u.indexes.is_empty());
    }

    #[test]
    fn test_column_details() {
        let db = db(r#"
            Enum sales.status { open }
            Table orders {
                id int pk [increment]
                code varchar(32) [not null, unique, default: 'x-1', note: 'public code']
                total decimal(10, 2) [null, default: -1.5, check: `total > 0`]
                state sales.status [default: null]
                tags text[]
                created timestamp [default: `now()`]
                flag bool [default: TRUE]
            }
        "#);
        let t = &db.tables[0];
        let id = t.field("id").unwrap();
        assert!(id.pk && id.increment);
        let code = t.field("code").unwrap();
        assert_eq!(code.column_type.type_name, "varchar(32)");
        assert_eq!(code.column_type.args.as_deref(), Some("32"));
        assert_eq!(code.not_null, Some(true));
        assert!(code.unique);
        assert_eq!(code.dbdefault.as_ref().unwrap().value, "x-1");
        assert_eq!(code.note.as_deref(), Some("public code"));
        let total = t.field("total").unwrap();
        assert_eq!(total.column_type.args.as_deref(), Some("10, 2"));
        assert_eq!(total.not_null, Some(false));
        assert_eq!(total.dbdefault.as_ref().unwrap().value, "-1.5");
        assert_eq!(total.dbdefault.as_ref().unwrap().kind, DefaultKind::Number);
        assert_eq!(total.checks[0].expression, "total > 0");
        let state = t.field("state").unwrap();
        assert_eq!(state.column_type.schema_name.as_deref(), Some("sales"));
        assert_eq!(state.column_type.type_name, "status");
        assert!(state.column_type.is_enum);
        assert_eq!(state.dbdefault.as_ref().unwrap().kind, DefaultKind::Null);
        assert_eq!(t.field("tags").unwrap().column_type.type_name, "text[]");
        let created = t.field("created").unwrap();
        assert_eq!(created.dbdefault.as_ref().unwrap().kind, DefaultKind::Expression);
        assert_eq!(created.dbdefault.as_ref().unwrap().value, "now()");
        assert_eq!(t.field("flag").unwrap().dbdefault.as_ref().unwrap().value, "true");
    }

    #[test]
    fn test_partial_merge() {
        let db = db(r#"
            TablePartial stamps [headercolor: #abc] {
                created_at timestamp
                id bigint
                indexes { created_at }
            }
            TablePartial soft {
                deleted_at timestamp
                created_at date
            }
            Table users {
                id int [pk]
                ~stamps
                name text
                ~soft
            }
        "#);
        let users = db.table(None, "users").unwrap();
        let names: Vec<&str> = users.fields.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "deleted_at", "created_at"]);
        let created = users.field("created_at").unwrap();
        assert_eq!(created.column_type.type_name, "date");
        assert_eq!(created.injected_from.as_deref(), Some("soft"));
        assert_eq!(users.field("id").unwrap().column_type.type_name, "int");
        assert_eq!(users.indexes.len(), 1);
        assert_eq!(users.header_color.as_deref(), Some("#abc"));
        assert_eq!(users.partials, vec!["stamps", "soft"]);
        assert_eq!(db.table_partials.len(), 2);
    }

    #[test]
    fn test_composite_pk_after_merge() {
        let db = db("TablePartial keyed { tenant int [pk] }\nTable t {\n id int [pk]\n ~keyed\n}");
        let t = &db.tables[0];
        assert!(t.fields.iter().all(|c| !c.pk));
        let cols: Vec<&str> = t.indexes[0].columns.iter().map(|c| c.value.as_str()).collect();
        assert_eq!(cols, vec!["id", "tenant"]);
    }

    #[test]
    fn test_indexes_and_checks() {
        let db = db(r#"
            Table t {
                a int
                b int
                indexes {
                    (a, `lower(b)`) [unique, name: 'ab', type: hash]
                    b [pk]
                }
                checks {
                    `a > b` [name: 'a_gt_b']
                }
            }
        "#);
        let t = &db.tables[0];
        assert_eq!(t.indexes.len(), 2);
        let first = &t.indexes[0];
        assert!(first.unique);
        assert_eq!(first.name.as_deref(), Some("ab"));
        assert_eq!(first.index_type.as_deref(), Some("hash"));
        assert_eq!(first.columns[1].kind, IndexColumnKind::Expression);
        assert_eq!(first.columns[1].value, "lower(b)");
        assert!(t.indexes[1].pk);
        assert_eq!(t.checks[0].name.as_deref(), Some("a_gt_b"));
    }

    #[test]
    fn test_inline_refs_become_refs() {
        let db = db("Table users as U { id int\n code int }\nTable posts { uid int [ref: > U.id, ref: - users.code] }");
        let posts = db.table(None, "posts").unwrap();
        assert_eq!(posts.fields[0].inline_refs[0].table_name, "users");
        assert_eq!(posts.fields[0].inline_refs[1].relation, "-");
        assert_eq!(db.refs.len(), 2);
        assert_eq!(db.refs[1].endpoints[1].field_names, vec!["code"]);
        assert_eq!(db.aliases[0].name, "U");
        assert_eq!(db.aliases[0].value.table_name, "users");
    }
}
