//! Semantic analysis: element validation, symbol registration and binding.
//!
//! Validators run first, one per element kind, registering declared symbols
//! and queueing the references they find. The binder then resolves every
//! queued reference, so forward references work. Results are kept in
//! [`SemanticModel`] side tables keyed by [`NodeId`]; the tree itself is
//! never mutated.

pub mod binder;
pub mod utils;
pub mod validator;

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ast::{NodeData, NodeId, SyntaxTree};
use crate::errors::{CompileError, CompileErrorCode, Report};
use crate::symbol::{SymbolArena, SymbolId, SymbolIndex, SymbolKind};

use self::binder::Job;
use self::utils::Span;

/// Element keywords, matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Table,
    TablePartial,
    Enum,
    Ref,
    Note,
    Project,
    Indexes,
    Checks,
    TableGroup,
    Dep,
    Custom,
}

impl ElementKind {
    pub fn from_keyword(keyword: &str) -> Self {
        match keyword.to_ascii_lowercase().as_str() {
            "table" => ElementKind::Table,
            "tablepartial" => ElementKind::TablePartial,
            "enum" => ElementKind::Enum,
            "ref" => ElementKind::Ref,
            "note" => ElementKind::Note,
            "project" => ElementKind::Project,
            "indexes" => ElementKind::Indexes,
            "checks" => ElementKind::Checks,
            "tablegroup" => ElementKind::TableGroup,
            "dep" => ElementKind::Dep,
            _ => ElementKind::Custom,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Table => "Table",
            ElementKind::TablePartial => "TablePartial",
            ElementKind::Enum => "Enum",
            ElementKind::Ref => "Ref",
            ElementKind::Note => "Note",
            ElementKind::Project => "Project",
            ElementKind::Indexes => "Indexes",
            ElementKind::Checks => "Checks",
            ElementKind::TableGroup => "TableGroup",
            ElementKind::Dep => "Dep",
            ElementKind::Custom => "Custom element",
        }
    }
}

/// Bindings produced by analysis.
#[derive(Debug, Clone, Default)]
pub struct SemanticModel {
    pub symbols: SymbolArena,
    public_schema: Option<SymbolId>,
    node_symbols: HashMap<NodeId, SymbolId>,
    referees: HashMap<NodeId, SymbolId>,
    element_kinds: HashMap<NodeId, ElementKind>,
}

impl SemanticModel {
    pub fn new() -> Self {
        let mut symbols = SymbolArena::new();
        let public = symbols.alloc(SymbolKind::Schema, "public", None, None);
        Self {
            symbols,
            public_schema: Some(public),
            ..Self::default()
        }
    }

    pub fn public_schema(&self) -> SymbolId {
        self.public_schema.unwrap_or(SymbolId(0))
    }

    /// Symbol declared by `node`.
    pub fn symbol_of(&self, node: NodeId) -> Option<SymbolId> {
        self.node_symbols.get(&node).copied()
    }

    /// Symbol `node` refers to.
    pub fn referee_of(&self, node: NodeId) -> Option<SymbolId> {
        self.referees.get(&node).copied()
    }

    pub fn element_kind(&self, node: NodeId) -> Option<ElementKind> {
        self.element_kinds.get(&node).copied()
    }

    pub fn declare(&mut self, node: NodeId, symbol: SymbolId) {
        self.node_symbols.insert(node, symbol);
    }

    /// Set `node`'s referee once and record it on the symbol.
    pub fn bind(&mut self, node: NodeId, symbol: SymbolId) {
        if self.referees.contains_key(&node) {
            return;
        }
        self.referees.insert(node, symbol);
        self.symbols.add_reference(symbol, node);
    }

    /// Scope-chained lookup: `start`, then each enclosing container up to
    /// the public schema.
    pub fn find_symbol(&self, index: &SymbolIndex, start: SymbolId) -> Option<SymbolId> {
        let mut current = Some(start);
        while let Some(container) = current {
            if let Some(found) = self.symbols.lookup(container, index) {
                return Some(found);
            }
            current = self.symbols.get(container).parent;
        }
        None
    }

    /// `schema.table` style name of a symbol, omitting `public`.
    pub fn qualified_name(&self, id: SymbolId) -> String {
        let mut parts: Vec<&str> = self.symbols.schema_path(id);
        parts.push(&self.symbols.get(id).name);
        parts.join(".")
    }

    /// Schema of a symbol as the model reports it: `None` for `public`.
    pub fn schema_name(&self, id: SymbolId) -> Option<String> {
        let path = self.symbols.schema_path(id);
        (!path.is_empty()).then(|| path.join("."))
    }
}

/// Destructured view of one element declaration.
#[derive(Debug, Clone)]
pub struct Element<'t> {
    pub id: NodeId,
    pub kind: ElementKind,
    pub keyword: &'t crate::lexer::Token,
    pub name: Option<NodeId>,
    pub alias: Option<NodeId>,
    pub settings: Option<NodeId>,
    pub colon: bool,
    pub body: Option<NodeId>,
}

impl<'t> Element<'t> {
    pub fn from_node(tree: &'t SyntaxTree, id: NodeId) -> Option<Self> {
        let NodeData::ElementDeclaration {
            keyword,
            name,
            alias,
            settings,
            colon,
            body,
            ..
        } = tree.data(id)
        else {
            return None;
        };
        Some(Self {
            id,
            kind: ElementKind::from_keyword(&keyword.value),
            keyword,
            name: *name,
            alias: *alias,
            settings: *settings,
            colon: colon.is_some(),
            body: *body,
        })
    }

    /// Fields of a `{ ... }` body.
    pub fn block_fields<'s>(&self, tree: &'s SyntaxTree) -> Option<&'s [NodeId]> {
        self.body.and_then(|b| utils::block_fields(tree, b))
    }

    /// Anchor for diagnostics about the element as a whole.
    pub fn head_span(&self, tree: &SyntaxTree) -> Span {
        match self.name {
            Some(name) => Span::of_node(tree, name),
            None => Span::of_token(self.keyword),
        }
    }
}

/// The element a nested element sits in.
#[derive(Debug, Clone, Copy)]
pub struct Parent {
    pub kind: ElementKind,
    pub node: NodeId,
    pub symbol: Option<SymbolId>,
}

pub struct Analyzer<'a> {
    pub(crate) tree: &'a SyntaxTree,
    pub(crate) model: SemanticModel,
    pub(crate) errors: Vec<CompileError>,
    pub(crate) jobs: Vec<Job>,
    pub(crate) project: Option<NodeId>,
    pub(crate) sticky_notes: HashMap<String, NodeId>,
    pub(crate) reported_sticky: HashSet<NodeId>,
    reported_duplicates: HashSet<SymbolId>,
}

impl<'a> Analyzer<'a> {
    pub fn new(tree: &'a SyntaxTree) -> Self {
        Self {
            tree,
            model: SemanticModel::new(),
            errors: Vec::new(),
            jobs: Vec::new(),
            project: None,
            sticky_notes: HashMap::new(),
            reported_sticky: HashSet::new(),
            reported_duplicates: HashSet::new(),
        }
    }

    pub(crate) fn error(&mut self, span: Span, code: CompileErrorCode, message: impl Into<String>) {
        self.errors.push(span.error(code, message));
    }

    pub(crate) fn error_at(&mut self, node: NodeId, code: CompileErrorCode, message: impl Into<String>) {
        let span = Span::of_node(self.tree, node);
        self.error(span, code, message);
    }

    pub(crate) fn record_kind(&mut self, node: NodeId, kind: ElementKind) {
        self.model.element_kinds.insert(node, kind);
    }

    /// Where a symbol's name is written, for duplicate diagnostics.
    fn name_anchor(&self, declaration: NodeId) -> Span {
        match self.tree.data(declaration) {
            NodeData::ElementDeclaration { name: Some(name), .. } => Span::of_node(self.tree, *name),
            NodeData::FunctionApplication { callee, .. } => Span::of_node(self.tree, *callee),
            _ => Span::of_node(self.tree, declaration),
        }
    }

    /// Allocate a symbol and add it to `container`. On a name clash both
    /// declarations are reported once and the first stays canonical.
    pub(crate) fn register(
        &mut self,
        container: SymbolId,
        kind: SymbolKind,
        name: &str,
        declaration: NodeId,
        code: CompileErrorCode,
    ) -> SymbolId {
        let id = self.model.symbols.alloc(kind, name, Some(container), Some(declaration));
        self.model.declare(declaration, id);
        let index = SymbolIndex::new(kind, name);
        if let Err(existing) = self.model.symbols.insert_member(container, index, id) {
            let message = duplicate_message(kind, name, &self.model, container);
            if self.reported_duplicates.insert(existing) {
                if let Some(decl) = self.model.symbols.get(existing).declaration {
                    let span = self.name_anchor(decl);
                    self.error(span, code, message.clone());
                }
            }
            self.reported_duplicates.insert(id);
            let span = self.name_anchor(declaration);
            self.error(span, code, message);
        }
        id
    }

    /// Nested schemas for `fragments`, created on first use. A leading
    /// `public` names the root.
    pub(crate) fn register_schema_stack(&mut self, fragments: &[utils::Fragment]) -> SymbolId {
        let mut current = self.model.public_schema();
        for (i, fragment) in fragments.iter().enumerate() {
            if i == 0 && fragment.name == "public" {
                continue;
            }
            let index = SymbolIndex::new(SymbolKind::Schema, fragment.name.clone());
            current = match self.model.symbols.lookup(current, &index) {
                Some(existing) => existing,
                None => {
                    let schema = self.model.symbols.alloc(SymbolKind::Schema, fragment.name.clone(), Some(current), None);
                    // absent from the table per the lookup above
                    self.model.symbols.insert_member(current, index, schema).ok();
                    schema
                }
            };
        }
        current
    }

    pub fn run(mut self) -> Report<SemanticModel> {
        for &element in self.tree.program_body() {
            validator::validate_element(&mut self, element, None);
        }
        binder::bind(&mut self);
        Report::new(self.model, self.errors)
    }
}

fn duplicate_message(kind: SymbolKind, name: &str, model: &SemanticModel, container: SymbolId) -> String {
    let owner = model.symbols.get(container);
    match kind {
        SymbolKind::Column | SymbolKind::TablePartialInjectedColumn => {
            format!("Column '{name}' is already defined in '{}'", owner.name)
        }
        SymbolKind::EnumField => format!("Enum field '{name}' is already defined in '{}'", owner.name),
        SymbolKind::TableGroupField => format!("Table '{name}' is listed twice in TableGroup '{}'", owner.name),
        SymbolKind::TablePartialInjection => format!("Partial '{name}' is injected more than once"),
        _ => format!(
            "{} name '{name}' already exists in Schema '{}'",
            kind.as_str(),
            owner.name
        ),
    }
}

/// Validate and bind a parsed tree.
pub fn analyze(tree: &SyntaxTree) -> Report<SemanticModel> {
    let _span = tracing::debug_span!("analyze", nodes = tree.len()).entered();
    let report = Analyzer::new(tree).run();
    debug!(
        symbols = report.value().symbols.len(),
        errors = report.errors().len(),
        "analyzed syntax tree"
    );
    report
}
