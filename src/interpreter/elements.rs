use crate::analyzer::utils::{
    application, destructure_path, joined_words, split_tuple_suffix, string_value, tuple_elements, variable_token,
};
use crate::analyzer::{Element, ElementKind};
use crate::ast::{NodeData, NodeId};
use crate::model::{
    Dep, DepUpstream, Endpoint, Enum, EnumValue, FieldDep, Project, Ref, Relation, StickyNote, TableGroup, TableName,
};
use crate::symbol::SymbolId;

use super::Interpreter;

impl Interpreter<'_> {
    fn simple_body(&self, el: &Element<'_>) -> Vec<NodeId> {
        match el.block_fields(self.tree) {
            Some(fields) => fields.to_vec(),
            None => el.body.into_iter().collect(),
        }
    }

    /// Name and schema of a named element; `public` is dropped.
    fn element_name(&self, el: &Element<'_>) -> (Option<String>, Option<String>) {
        let path = el
            .name
            .and_then(|n| destructure_path(self.tree, n))
            .unwrap_or_default();
        match path.as_slice() {
            [leaf] => (Some(leaf.name.clone()), None),
            [schema, leaf] => (
                Some(leaf.name.clone()),
                Some(schema.name.clone()).filter(|s| s != "public"),
            ),
            _ => (None, None),
        }
    }

    pub(super) fn enumeration(&mut self, el: &Element<'_>) {
        let Some(symbol) = self.model.symbol_of(el.id) else {
            return;
        };
        let tree = self.tree;
        let values = el
            .block_fields(tree)
            .unwrap_or_default()
            .iter()
            .filter_map(|&field| {
                let (callee, args) = application(tree, field)?;
                let settings = self.settings(args.first().copied());
                Some(EnumValue {
                    name: variable_token(tree, callee)?.value.clone(),
                    note: self.string_setting(&settings, "note"),
                    token: self.range(field),
                })
            })
            .collect();
        let TableName {
            table_name: name,
            schema_name,
        } = self.table_name(symbol);
        self.db.enums.push(Enum {
            name,
            schema_name,
            values,
            token: self.range(el.id),
        });
    }

    pub(super) fn standalone_ref(&mut self, el: &Element<'_>) {
        let tree = self.tree;
        let (name, schema_name) = self.element_name(el);
        let Some(field) = self.simple_body(el).into_iter().next() else {
            return;
        };
        let Some((callee, args)) = application(tree, field) else {
            return;
        };
        let NodeData::InfixExpression { op, left, right } = tree.data(callee) else {
            return;
        };
        let Some((left_relation, right_relation)) = Relation::pair(&op.value) else {
            return;
        };
        let (Some(left), Some(right)) = (
            self.endpoint(*left, left_relation),
            self.endpoint(*right, right_relation),
        ) else {
            return;
        };
        let settings = self.settings(args.first().copied());
        let action = |key: &str| {
            settings
                .first(key)
                .and_then(|s| s.value)
                .and_then(|v| joined_words(tree, v))
        };
        let r = Ref {
            name,
            schema_name,
            endpoints: vec![left, right],
            on_delete: action("delete"),
            on_update: action("update"),
            color: self.color_setting(&settings, "color"),
            token: self.range(el.id),
        };
        self.push_ref(r);
    }

    /// `table.column`, `schema.table.column` or `table.(a, b)`.
    fn endpoint(&self, node: NodeId, relation: Relation) -> Option<Endpoint> {
        let tree = self.tree;
        let (table_path, columns) = match split_tuple_suffix(tree, node) {
            Some((table, tuple)) => (destructure_path(tree, table)?, tuple_elements(tree, tuple)?),
            None => {
                let mut path = destructure_path(tree, node)?;
                let column = path.pop()?;
                (path, vec![column.node])
            }
        };
        let table_node = table_path.last()?.node;
        let table = self.model.referee_of(table_node)?;
        let field_names = columns
            .iter()
            .filter_map(|c| variable_token(tree, *c).map(|t| t.value.clone()))
            .collect();
        let TableName {
            table_name,
            schema_name,
        } = self.table_name(table);
        Some(Endpoint {
            schema_name,
            table_name,
            field_names,
            relation,
            token: self.range(node),
        })
    }

    pub(super) fn sticky_note(&mut self, el: &Element<'_>) {
        let (Some(name), _) = self.element_name(el) else {
            return;
        };
        let settings = self.settings(el.settings);
        let content = self.note_content(el).unwrap_or_default();
        self.db.notes.push(StickyNote {
            name,
            content,
            header_color: self.color_setting(&settings, "headercolor"),
            token: self.range(el.id),
        });
    }

    pub(super) fn project(&mut self, el: &Element<'_>) {
        let (name, _) = self.element_name(el);
        let mut project = Project {
            name,
            note: None,
            database_type: None,
            settings: Default::default(),
            token: self.range(el.id),
        };
        for field in el.block_fields(self.tree).unwrap_or_default() {
            let Some(sub) = Element::from_node(self.tree, *field) else {
                continue;
            };
            match sub.kind {
                ElementKind::Note => project.note = self.note_content(&sub),
                ElementKind::Custom => {
                    let value = sub
                        .body
                        .and_then(|b| application(self.tree, b))
                        .and_then(|(callee, _)| string_value(self.tree, callee))
                        .map(|t| t.value.clone());
                    let Some(value) = value else {
                        continue;
                    };
                    let key = sub.keyword.value.clone();
                    if key.eq_ignore_ascii_case("database_type") {
                        project.database_type = Some(value);
                    } else {
                        project.settings.insert(key, value);
                    }
                }
                _ => {}
            }
        }
        // Only the first Project survives analysis.
        if self.db.project.is_none() {
            self.db.project = Some(project);
        }
    }

    pub(super) fn table_group(&mut self, el: &Element<'_>) {
        let Some(symbol) = self.model.symbol_of(el.id) else {
            return;
        };
        let tree = self.tree;
        let settings = self.settings(el.settings);
        let mut note = self.string_setting(&settings, "note");
        let mut tables = Vec::new();
        for &field in el.block_fields(tree).unwrap_or_default() {
            if let Some(sub) = Element::from_node(tree, field) {
                if sub.kind == ElementKind::Note {
                    note = self.note_content(&sub);
                }
                continue;
            }
            let table = application(tree, field)
                .and_then(|(callee, _)| destructure_path(tree, callee))
                .and_then(|path| path.last().and_then(|leaf| self.model.referee_of(leaf.node)));
            if let Some(table) = table {
                tables.push(self.table_name(table));
            }
        }
        let TableName {
            table_name: name,
            schema_name,
        } = self.table_name(symbol);
        self.db.table_groups.push(TableGroup {
            name,
            schema_name,
            tables,
            color: self.color_setting(&settings, "color"),
            note,
            token: self.range(el.id),
        });
    }

    /// One model entry per edge. Without explicit columns the mapping is
    /// every column name the two tables share, in downstream order.
    pub(super) fn dep(&mut self, el: &Element<'_>) {
        let tree = self.tree;
        let (name, _) = self.element_name(el);
        let settings = self.settings(el.settings);
        let note = self.string_setting(&settings, "note");
        for field in self.simple_body(el) {
            let edge = application(tree, field).and_then(|(callee, _)| match tree.data(callee) {
                NodeData::InfixExpression { op, left, right } if op.value == ">" => Some((*left, *right)),
                NodeData::InfixExpression { op, left, right } if op.value == "<" => Some((*right, *left)),
                _ => None,
            });
            let Some((upstream, downstream)) = edge else {
                continue;
            };
            let Some((down_table, down_columns)) = self.dep_side(downstream) else {
                continue;
            };
            let upstream_nodes = match tree.data(upstream) {
                NodeData::TupleExpression { elements, .. } => elements.clone(),
                NodeData::GroupExpression { expression, .. } => vec![*expression],
                _ => vec![upstream],
            };
            let mut upstreams = Vec::new();
            for node in upstream_nodes {
                let Some((up_table, up_columns)) = self.dep_side(node) else {
                    continue;
                };
                let fields = if down_columns.is_empty() {
                    self.shared_columns(down_table, up_table)
                        .into_iter()
                        .map(|c| FieldDep {
                            downstream: c.clone(),
                            upstream: c,
                        })
                        .collect()
                } else {
                    down_columns
                        .iter()
                        .zip(&up_columns)
                        .map(|(d, u)| FieldDep {
                            downstream: d.clone(),
                            upstream: u.clone(),
                        })
                        .collect()
                };
                let TableName {
                    table_name,
                    schema_name,
                } = self.table_name(up_table);
                upstreams.push(DepUpstream {
                    table_name,
                    schema_name,
                    fields,
                });
            }
            self.db.deps.push(Dep {
                name: name.clone(),
                downstream: self.table_name(down_table),
                upstreams,
                note: note.clone(),
                token: self.range(field),
            });
        }
    }

    /// Bound table and explicit column names of one dependency side.
    fn dep_side(&self, node: NodeId) -> Option<(SymbolId, Vec<String>)> {
        let tree = self.tree;
        let (table, columns) = match split_tuple_suffix(tree, node) {
            Some((table, tuple)) => (table, tuple_elements(tree, tuple)?),
            None => (node, Vec::new()),
        };
        let leaf = destructure_path(tree, table)?.pop()?;
        let symbol = self.model.referee_of(leaf.node)?;
        let names = columns
            .iter()
            .filter_map(|c| variable_token(tree, *c).map(|t| t.value.clone()))
            .collect();
        Some((symbol, names))
    }

    /// Column names of `downstream` also present in `upstream`, merged
    /// partial columns included.
    fn shared_columns(&self, downstream: SymbolId, upstream: SymbolId) -> Vec<String> {
        let columns = |symbol: SymbolId| {
            let TableName {
                table_name,
                schema_name,
            } = self.table_name(symbol);
            self.db
                .table(schema_name.as_deref(), &table_name)
                .map(|t| t.fields.iter().map(|c| c.name.clone()).collect::<Vec<_>>())
                .unwrap_or_default()
        };
        let up = columns(upstream);
        columns(downstream).into_iter().filter(|c| up.contains(c)).collect()
    }
}
