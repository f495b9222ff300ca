//! Reference resolution.
//!
//! Validators queue a [`Job`] for every reference they accept. Binding runs
//! once all declarations are registered: partial injections first (they add
//! columns other references may target), then column types, then everything
//! else in source order.

use std::collections::HashMap;

use crate::ast::NodeId;
use crate::errors::{CompileError, CompileErrorCode};
use crate::symbol::{SymbolId, SymbolIndex, SymbolKind};

use super::utils::{destructure_path, simple_name, split_tuple_suffix, tuple_elements, Fragment, Span};
use super::Analyzer;

/// One side of a dependency edge: a table path and optional column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepSide {
    pub table: NodeId,
    pub columns: Vec<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// `~name` inside `table`.
    Injection {
        table: SymbolId,
        injection: SymbolId,
        name: NodeId,
    },
    /// A column type that may name an enum.
    ColumnType {
        column: SymbolId,
        scope: SymbolId,
        type_node: NodeId,
    },
    /// `ref: > table.column` on `column`.
    InlineRef {
        column: SymbolId,
        scope: SymbolId,
        target: NodeId,
    },
    RefEndpoints {
        element: NodeId,
        left: NodeId,
        right: NodeId,
    },
    IndexColumn {
        table: SymbolId,
        node: NodeId,
    },
    GroupMember {
        group: SymbolId,
        node: NodeId,
    },
    DepEdge {
        element: NodeId,
        downstream: DepSide,
        upstreams: Vec<DepSide>,
    },
}

pub(crate) fn bind(a: &mut Analyzer<'_>) {
    let jobs = std::mem::take(&mut a.jobs);
    let (injections, rest): (Vec<Job>, Vec<Job>) = jobs.into_iter().partition(|j| matches!(j, Job::Injection { .. }));
    let (types, rest): (Vec<Job>, Vec<Job>) = rest.into_iter().partition(|j| matches!(j, Job::ColumnType { .. }));

    let mut binder = Binder {
        a,
        group_of: HashMap::new(),
    };
    binder.bind_injections(injections);
    for job in types.into_iter().chain(rest) {
        binder.run(job);
    }
}

struct Binder<'b, 'a> {
    a: &'b mut Analyzer<'a>,
    group_of: HashMap<SymbolId, SymbolId>,
}

impl Binder<'_, '_> {
    fn fail(&mut self, error: CompileError) {
        self.a.errors.push(error);
    }

    fn span(&self, node: NodeId) -> Span {
        Span::of_node(self.a.tree, node)
    }

    fn run(&mut self, job: Job) {
        match job {
            Job::Injection { .. } => {}
            Job::ColumnType { scope, type_node, .. } => self.bind_column_type(scope, type_node),
            Job::InlineRef { column, scope, target } => self.bind_inline_ref(column, scope, target),
            Job::RefEndpoints { element, left, right } => self.bind_ref(element, left, right),
            Job::IndexColumn { table, node } => {
                if let Err(e) = self.resolve_column(table, node) {
                    self.fail(e);
                }
            }
            Job::GroupMember { group, node } => self.bind_group_member(group, node),
            Job::DepEdge {
                downstream, upstreams, ..
            } => self.bind_dep(downstream, upstreams),
        }
    }

    /// Bind `~name` jobs, then copy each partial's columns into the
    /// injecting table. A table's own columns win and a later injection
    /// replaces an earlier one.
    fn bind_injections(&mut self, jobs: Vec<Job>) {
        let public = self.a.model.public_schema();
        for job in jobs {
            let Job::Injection { table, injection, name } = job else {
                continue;
            };
            let Some(partial_name) = simple_name(self.a.tree, name).map(str::to_string) else {
                continue;
            };
            let index = SymbolIndex::new(SymbolKind::TablePartial, partial_name.clone());
            let Some(partial) = self.a.model.symbols.lookup(public, &index) else {
                let error = self.span(name).error(
                    CompileErrorCode::BindingError,
                    format!("TablePartial '{partial_name}' does not exist"),
                );
                self.fail(error);
                continue;
            };
            self.a.model.bind(name, partial);

            for column in self.a.model.symbols.members(partial, SymbolKind::Column) {
                let column_name = self.a.model.symbols.get(column).name.clone();
                let own = SymbolIndex::new(SymbolKind::Column, column_name.clone());
                if self.a.model.symbols.lookup(table, &own).is_some() {
                    continue;
                }
                let declaration = self.a.model.symbols.get(column).declaration;
                let injected = self.a.model.symbols.alloc(
                    SymbolKind::TablePartialInjectedColumn,
                    column_name.clone(),
                    Some(table),
                    declaration,
                );
                let symbol = self.a.model.symbols.get_mut(injected);
                symbol.origin = Some(column);
                symbol.injection = Some(injection);
                if let Some(columns) = self.a.model.symbols.get_mut(table).table.as_mut() {
                    columns.set(
                        SymbolIndex::new(SymbolKind::TablePartialInjectedColumn, column_name),
                        injected,
                    );
                }
            }
        }
    }

    /// Enum lookup for a column type; silent when the type is not an enum.
    fn bind_column_type(&mut self, scope: SymbolId, type_node: NodeId) {
        let Some(path) = destructure_path(self.a.tree, type_node) else {
            return;
        };
        let Some((leaf, schemas)) = path.split_last() else {
            return;
        };
        let Ok(container) = self.resolve_schemas(schemas, scope) else {
            return;
        };
        let index = SymbolIndex::new(SymbolKind::Enum, leaf.name.clone());
        let found = if schemas.is_empty() {
            self.a.model.find_symbol(&index, container)
        } else {
            self.a.model.symbols.lookup(container, &index)
        };
        if let Some(enum_symbol) = found {
            self.a.model.bind(leaf.node, enum_symbol);
        }
    }

    fn bind_inline_ref(&mut self, column: SymbolId, scope: SymbolId, target: NodeId) {
        let Some(path) = destructure_path(self.a.tree, target) else {
            return;
        };
        let Some((leaf, table_path)) = path.split_last() else {
            return;
        };
        let resolved = self
            .resolve_table(table_path, scope, target)
            .and_then(|table| self.resolve_column(table, leaf.node));
        match resolved {
            Ok(target_column) if self.same_column(target_column, column) => {
                let error = self.span(target).error(
                    CompileErrorCode::SameEndpoint,
                    "A column cannot reference itself",
                );
                self.fail(error);
            }
            Ok(_) => {}
            Err(e) => self.fail(e),
        }
    }

    /// Columns are the same when they share a declaration or one is an
    /// injected copy of the other.
    fn same_column(&self, a: SymbolId, b: SymbolId) -> bool {
        let symbols = &self.a.model.symbols;
        let canonical = |id: SymbolId| symbols.get(id).origin.unwrap_or(id);
        a == b || (symbols.get(a).parent == symbols.get(b).parent && canonical(a) == canonical(b))
    }

    fn bind_ref(&mut self, element: NodeId, left: NodeId, right: NodeId) {
        let public = self.a.model.public_schema();
        let left = self.resolve_endpoint(left, public);
        let right = self.resolve_endpoint(right, public);
        match (left, right) {
            (Ok((lt, mut lc)), Ok((rt, mut rc))) => {
                lc.sort();
                rc.sort();
                if lt == rt && lc == rc {
                    let error = self.span(element).error(
                        CompileErrorCode::SameEndpoint,
                        "Both endpoints of a relationship are the same",
                    );
                    self.fail(error);
                }
            }
            (l, r) => {
                for result in [l, r] {
                    if let Err(e) = result {
                        self.fail(e);
                    }
                }
            }
        }
    }

    /// `table.col`, `schema.table.col` or `table.(a, b)`: the table and its columns.
    fn resolve_endpoint(&mut self, node: NodeId, scope: SymbolId) -> Result<(SymbolId, Vec<SymbolId>), CompileError> {
        let tree = self.a.tree;
        let (table_path, column_nodes) = match split_tuple_suffix(tree, node) {
            Some((table, tuple)) => (
                destructure_path(tree, table).unwrap_or_default(),
                tuple_elements(tree, tuple).unwrap_or_default(),
            ),
            None => {
                let mut path = destructure_path(tree, node).unwrap_or_default();
                let column = path.pop().map(|f| f.node);
                (path, column.into_iter().collect())
            }
        };
        let table = self.resolve_table(&table_path, scope, node)?;
        let mut columns = Vec::new();
        for column in column_nodes {
            columns.push(self.resolve_column(table, column)?);
        }
        Ok((table, columns))
    }

    fn bind_group_member(&mut self, group: SymbolId, node: NodeId) {
        let public = self.a.model.public_schema();
        let path = destructure_path(self.a.tree, node).unwrap_or_default();
        let table = match self.resolve_table(&path, public, node) {
            Ok(table) => table,
            Err(e) => {
                self.fail(e);
                return;
            }
        };
        match self.group_of.get(&table) {
            Some(existing) if *existing != group => {
                let message = format!(
                    "Table '{}' already belongs to TableGroup '{}'",
                    self.a.model.qualified_name(table),
                    self.a.model.symbols.get(*existing).name
                );
                let error = self.span(node).error(CompileErrorCode::TableInMultipleGroups, message);
                self.fail(error);
            }
            Some(_) => {}
            None => {
                self.group_of.insert(table, group);
            }
        }
    }

    fn bind_dep(&mut self, downstream: DepSide, upstreams: Vec<DepSide>) {
        let public = self.a.model.public_schema();
        let Ok(down_table) = self.resolve_side(&downstream, public) else {
            return;
        };
        for up in &upstreams {
            let Ok(up_table) = self.resolve_side(up, public) else {
                continue;
            };
            if downstream.columns.is_empty() && self.common_columns(down_table, up_table).is_empty() {
                let message = format!(
                    "Tables '{}' and '{}' have no columns in common",
                    self.a.model.qualified_name(up_table),
                    self.a.model.qualified_name(down_table)
                );
                let error = self.span(up.table).error(CompileErrorCode::BindingError, message);
                self.fail(error);
            }
        }
    }

    fn resolve_side(&mut self, side: &DepSide, scope: SymbolId) -> Result<SymbolId, ()> {
        let path = destructure_path(self.a.tree, side.table).unwrap_or_default();
        let table = self.resolve_table(&path, scope, side.table).map_err(|e| self.fail(e))?;
        let mut ok = true;
        for &column in &side.columns {
            if let Err(e) = self.resolve_column(table, column) {
                self.fail(e);
                ok = false;
            }
        }
        if ok { Ok(table) } else { Err(()) }
    }

    /// Column names shared by two tables, in `first`'s declaration order.
    fn common_columns(&self, first: SymbolId, second: SymbolId) -> Vec<String> {
        let names = |table| column_names(self.a, table);
        let other = names(second);
        names(first).into_iter().filter(|n| other.contains(n)).collect()
    }

    /// Schema fragments resolved from `scope` outward; an empty list is `scope`.
    fn resolve_schemas(&mut self, schemas: &[Fragment], scope: SymbolId) -> Result<SymbolId, CompileError> {
        let public = self.a.model.public_schema();
        let mut current = scope;
        for (i, fragment) in schemas.iter().enumerate() {
            let index = SymbolIndex::new(SymbolKind::Schema, fragment.name.clone());
            let found = if i == 0 && fragment.name == "public" {
                Some(public)
            } else if i == 0 {
                self.a.model.find_symbol(&index, scope)
            } else {
                self.a.model.symbols.lookup(current, &index)
            };
            match found {
                Some(schema) => {
                    self.a.model.bind(fragment.node, schema);
                    current = schema;
                }
                None => {
                    return Err(self.span(fragment.node).error(
                        CompileErrorCode::BindingError,
                        format!("Schema '{}' does not exist", fragment.name),
                    ));
                }
            }
        }
        Ok(current)
    }

    /// `table`, `schema.table`, or an alias.
    fn resolve_table(&mut self, path: &[Fragment], scope: SymbolId, at: NodeId) -> Result<SymbolId, CompileError> {
        let Some((leaf, schemas)) = path.split_last() else {
            return Err(self.span(at).error(CompileErrorCode::BindingError, "Expected a table name"));
        };
        let container = self.resolve_schemas(schemas, scope)?;
        let index = SymbolIndex::new(SymbolKind::Table, leaf.name.clone());
        let found = if schemas.is_empty() {
            self.a.model.find_symbol(&index, container)
        } else {
            self.a.model.symbols.lookup(container, &index)
        };
        match found {
            Some(table) => {
                self.a.model.bind(leaf.node, table);
                Ok(table)
            }
            None => {
                let schema = match schemas.last() {
                    Some(s) => s.name.clone(),
                    None => "public".to_string(),
                };
                Err(self.span(leaf.node).error(
                    CompileErrorCode::BindingError,
                    format!("Table '{}' does not exist in Schema '{schema}'", leaf.name),
                ))
            }
        }
    }

    /// A column of `table` by the name written at `node`; own columns
    /// shadow injected ones.
    fn resolve_column(&mut self, table: SymbolId, node: NodeId) -> Result<SymbolId, CompileError> {
        let Some(name) = simple_name(self.a.tree, node).map(str::to_string) else {
            return Err(self.span(node).error(CompileErrorCode::BindingError, "Expected a column name"));
        };
        let symbols = &self.a.model.symbols;
        let found = symbols
            .lookup(table, &SymbolIndex::new(SymbolKind::Column, name.clone()))
            .or_else(|| symbols.lookup(table, &SymbolIndex::new(SymbolKind::TablePartialInjectedColumn, name.clone())));
        match found {
            Some(column) => {
                self.a.model.bind(node, column);
                Ok(column)
            }
            None => Err(self.span(node).error(
                CompileErrorCode::BindingError,
                format!(
                    "Column '{name}' does not exist in Table '{}'",
                    self.a.model.qualified_name(table)
                ),
            )),
        }
    }
}

/// Own and injected column names of a table, in symbol order.
pub(crate) fn column_names(a: &Analyzer<'_>, table: SymbolId) -> Vec<String> {
    let symbols = &a.model.symbols;
    let mut ids = symbols.members(table, SymbolKind::Column);
    ids.extend(symbols.members(table, SymbolKind::TablePartialInjectedColumn));
    ids.sort();
    ids.into_iter().map(|id| symbols.get(id).name.clone()).collect()
}

#[cfg(test)]
mod tests {
    use crate::analyzer::analyze;
    use crate::ast::{NodeData, SyntaxTree};
    use crate::parser::parse_source;
    use crate::symbol::SymbolKind;

    fn analyze_ok(source: &str) -> (SyntaxTree, crate::analyzer::SemanticModel) {
        let (tree, parse_errors) = parse_source(source).into_parts();
        assert!(parse_errors.is_empty(), "{parse_errors:?}");
        let (model, errors) = analyze(&tree).into_parts();
        assert!(errors.is_empty(), "{errors:?}");
        (tree, model)
    }

    fn variables(tree: &SyntaxTree, name: &str) -> Vec<crate::ast::NodeId> {
        tree.nodes()
            .filter(|n| match &n.data {
                NodeData::PrimaryExpression { expression } => matches!(
                    tree.data(*expression),
                    NodeData::Variable { variable } if variable.value == name
                ),
                _ => false,
            })
            .map(|n| n.id)
            .collect()
    }

    #[test]
    fn test_forward_reference_binds() {
        let (tree, model) = analyze_ok("Ref: posts.user_id > users.id\nTable users { id int }\nTable posts { user_id int }");
        let users_ref = variables(&tree, "users")[0];
        let table = model.referee_of(users_ref).unwrap();
        assert_eq!(model.symbols.get(table).kind, SymbolKind::Table);
        assert_eq!(model.symbols.get(table).references, vec![users_ref]);
    }

    #[test]
    fn test_alias_resolves_to_table() {
        let (tree, model) = analyze_ok("Table users as U { id int }\nTable posts { uid int [ref: > U.id] }");
        let alias_ref = *variables(&tree, "U").last().unwrap();
        let table = model.referee_of(alias_ref).unwrap();
        assert_eq!(model.symbols.get(table).name, "users");
    }

    #[test]
    fn test_enum_type_binds_in_scope() {
        let (tree, model) = analyze_ok("Enum sales.status { open }\nTable sales.orders { s status }\nTable t { s sales.status }");
        let refs = variables(&tree, "status");
        let bound: Vec<_> = refs.iter().filter_map(|n| model.referee_of(*n)).collect();
        assert_eq!(bound.len(), 2);
        assert!(bound.iter().all(|s| model.symbols.get(*s).kind == SymbolKind::Enum));
    }

    #[test]
    fn test_injected_columns_shadowing() {
        let (tree, model) = analyze_ok(
            "TablePartial a { id int\n x int }\nTablePartial b { x text\n y int }\nTable t {\n id bigint\n ~a\n ~b\n}\nRef: t.y > t.x",
        );
        let table = model.symbol_of(tree.program_body()[2]).unwrap();
        let injected = model.symbols.members(table, SymbolKind::TablePartialInjectedColumn);
        let names: Vec<&str> = injected.iter().map(|c| model.symbols.get(*c).name.as_str()).collect();
        assert!(names.contains(&"x") && names.contains(&"y") && !names.contains(&"id"));
        let x = injected.iter().find(|c| model.symbols.get(**c).name == "x").unwrap();
        let origin = model.symbols.get(*x).origin.unwrap();
        let partial_b = model.symbol_of(tree.program_body()[1]).unwrap();
        assert_eq!(model.symbols.get(origin).parent, Some(partial_b));
    }

    #[test]
    fn test_self_reference_rejected() {
        let (tree, _) = parse_source("Table t { id int [ref: > t.id] }\nRef: t.id - t.id").into_parts();
        let errors = analyze(&tree).into_parts().1;
        let codes: Vec<_> = errors.iter().map(|e| e.code).collect();
        assert_eq!(
            codes,
            vec![
                crate::errors::CompileErrorCode::SameEndpoint,
                crate::errors::CompileErrorCode::SameEndpoint
            ]
        );
    }

    #[test]
    fn test_missing_table_message() {
        let (tree, _) = parse_source("Table t { id int [ref: > ghost.id] }").into_parts();
        let errors = analyze(&tree).into_parts().1;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].message, "Table 'ghost' does not exist in Schema 'public'");
    }
}
