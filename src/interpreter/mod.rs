//! Bound CST to normalized [`Database`].
//!
//! The interpreter trusts the analyzer: it only runs on trees that produced
//! no diagnostics, so shapes the validators reject are skipped quietly here.
//! The one diagnostic it owns is `DuplicateRef`, which needs every ref
//! (inline and standalone) materialized first.

mod elements;
mod table;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::analyzer::utils::{aggregate_settings, color_value, normalize_note, string_value, SettingMap};
use crate::analyzer::{Element, ElementKind, SemanticModel};
use crate::ast::{NodeId, SyntaxTree};
use crate::errors::{CompileError, CompileErrorCode, Report};
use crate::lexer::Position;
use crate::model::{Database, Endpoint, Ref, Schema, TableName, TablePartial, TokenPoint, TokenRange};
use crate::symbol::SymbolId;

pub struct Interpreter<'a> {
    tree: &'a SyntaxTree,
    model: &'a SemanticModel,
    source: &'a str,
    db: Database,
    errors: Vec<CompileError>,
    partials: HashMap<SymbolId, TablePartial>,
    ref_keys: HashSet<Vec<(Option<String>, String, Vec<String>)>>,
}

impl<'a> Interpreter<'a> {
    pub fn new(tree: &'a SyntaxTree, model: &'a SemanticModel, source: &'a str) -> Self {
        Self {
            tree,
            model,
            source,
            db: Database::default(),
            errors: Vec::new(),
            partials: HashMap::new(),
            ref_keys: HashSet::new(),
        }
    }

    pub fn run(mut self) -> Report<Database> {
        let elements: Vec<Element<'a>> = self
            .tree
            .program_body()
            .iter()
            .filter_map(|id| Element::from_node(self.tree, *id))
            .collect();

        // Partials first: tables splice them regardless of source order.
        for el in elements.iter().filter(|el| el.kind == ElementKind::TablePartial) {
            if let Some((symbol, partial)) = self.partial(el) {
                self.partials.insert(symbol, partial);
            }
        }

        let mut deps = Vec::new();
        for el in &elements {
            match el.kind {
                ElementKind::Table => self.table(el),
                ElementKind::TablePartial => {
                    let partial = self.model.symbol_of(el.id).and_then(|s| self.partials.get(&s));
                    if let Some(partial) = partial {
                        self.db.table_partials.push(partial.clone());
                    }
                }
                ElementKind::Enum => self.enumeration(el),
                ElementKind::Ref => self.standalone_ref(el),
                ElementKind::Note => self.sticky_note(el),
                ElementKind::Project => self.project(el),
                ElementKind::TableGroup => self.table_group(el),
                // Column name intersection needs every table.
                ElementKind::Dep => deps.push(el.clone()),
                ElementKind::Indexes | ElementKind::Checks | ElementKind::Custom => {}
            }
        }
        for el in &deps {
            self.dep(el);
        }
        self.collect_schemas();
        Report::new(self.db, self.errors)
    }

    fn range(&self, node: NodeId) -> TokenRange {
        let node = self.tree.node(node);
        TokenRange {
            start: TokenPoint::new(node.start, node.start_pos),
            end: TokenPoint::new(node.end, node.end_pos),
        }
    }

    fn table_name(&self, table: SymbolId) -> TableName {
        TableName {
            table_name: self.model.symbols.get(table).name.clone(),
            schema_name: self.model.schema_name(table),
        }
    }

    fn settings(&self, list: Option<NodeId>) -> SettingMap {
        list.map(|l| aggregate_settings(self.tree, l)).unwrap_or_default()
    }

    fn string_setting(&self, settings: &SettingMap, name: &str) -> Option<String> {
        settings
            .first(name)
            .and_then(|s| s.value)
            .and_then(|v| string_value(self.tree, v))
            .map(normalize_note)
    }

    fn color_setting(&self, settings: &SettingMap, name: &str) -> Option<String> {
        settings
            .first(name)
            .and_then(|s| s.value)
            .and_then(|v| color_value(self.tree, v))
            .map(str::to_string)
    }

    /// Push a ref unless another ref already joins the same endpoints.
    fn push_ref(&mut self, r: Ref) {
        let mut key: Vec<_> = r
            .endpoints
            .iter()
            .map(|e: &Endpoint| (e.schema_name.clone(), e.table_name.clone(), e.field_names.clone()))
            .collect();
        key.sort();
        if !self.ref_keys.insert(key) {
            let message = format!("A relationship between {} already exists", describe_endpoints(&r.endpoints));
            self.errors.push(error_at_range(r.token, CompileErrorCode::DuplicateRef, message));
            return;
        }
        self.db.refs.push(r);
    }

    /// Non-public schemas in first-seen order.
    fn collect_schemas(&mut self) {
        let db = &self.db;
        let names = db
            .tables
            .iter()
            .map(|t| t.schema_name.as_ref())
            .chain(db.enums.iter().map(|e| e.schema_name.as_ref()))
            .chain(db.table_groups.iter().map(|g| g.schema_name.as_ref()))
            .chain(db.refs.iter().map(|r| r.schema_name.as_ref()))
            .flatten();
        let mut schemas: Vec<Schema> = Vec::new();
        for name in names {
            if !schemas.iter().any(|s| &s.name == name) {
                schemas.push(Schema { name: name.clone() });
            }
        }
        self.db.schemas = schemas;
    }
}

/// Error anchored at a model range; model ranges are 1-based.
fn error_at_range(range: TokenRange, code: CompileErrorCode, message: String) -> CompileError {
    let position = |p: TokenPoint| Position {
        line: p.line.saturating_sub(1),
        column: p.column.saturating_sub(1),
    };
    CompileError::new(
        code,
        message,
        (range.start.offset, position(range.start)),
        (range.end.offset, position(range.end)),
    )
}

fn describe_endpoints(endpoints: &[Endpoint]) -> String {
    endpoints
        .iter()
        .map(|e| {
            let table = match &e.schema_name {
                Some(schema) => format!("{schema}.{}", e.table_name),
                None => e.table_name.clone(),
            };
            format!("{table}({})", e.field_names.join(", "))
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Build the normalized model of a tree the analyzer accepted.
pub fn interpret(tree: &SyntaxTree, model: &SemanticModel, source: &str) -> Report<Database> {
    let _span = tracing::debug_span!("interpret").entered();
    let report = Interpreter::new(tree, model, source).run();
    let db = report.value();
    debug!(
        tables = db.tables.len(),
        refs = db.refs.len(),
        enums = db.enums.len(),
        errors = report.errors().len(),
        "interpreted syntax tree"
    );
    report
}
