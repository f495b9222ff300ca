//! Editor queries over a [`Compilation`]: go to definition, find
//! references and completion. Everything is read off the bound tree; no
//! extra compiler state is kept.

use serde::Serialize;

use crate::analyzer::{Element, ElementKind};
use crate::ast::{NodeData, NodeId, SyntaxTree};
use crate::symbol::{SymbolId, SymbolIndex, SymbolKind};
use crate::Compilation;

/// 1-based editor position; `column` counts characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    pub line_number: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line_number: usize, column: usize) -> Self {
        Self { line_number, column }
    }
}

impl From<crate::lexer::Position> for Position {
    fn from(pos: crate::lexer::Position) -> Self {
        Self::new(pos.line + 1, pos.column + 1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub range: Range,
}

/// What the editor holds: the text and a position-to-offset mapping.
pub trait TextModel {
    fn value(&self) -> &str;
    fn offset_at(&self, position: Position) -> usize;
}

impl TextModel for str {
    fn value(&self) -> &str {
        self
    }

    fn offset_at(&self, position: Position) -> usize {
        let mut offset = 0;
        for (index, line) in self.split_inclusive('\n').enumerate() {
            if index + 1 == position.line_number {
                let column = position.column.saturating_sub(1);
                let within = line
                    .char_indices()
                    .nth(column)
                    .map(|(i, _)| i)
                    .unwrap_or(line.trim_end_matches(['\n', '\r']).len());
                return offset + within;
            }
            offset += line.len();
        }
        self.len()
    }
}

impl TextModel for String {
    fn value(&self) -> &str {
        self
    }

    fn offset_at(&self, position: Position) -> usize {
        self.as_str().offset_at(position)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CompletionKind {
    Keyword,
    Property,
    Schema,
    Table,
    Column,
    Enum,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionItem {
    pub label: String,
    pub insert_text: String,
    pub kind: CompletionKind,
    pub range: Option<Range>,
}

impl CompletionItem {
    fn new(label: impl Into<String>, kind: CompletionKind) -> Self {
        let label = label.into();
        Self {
            insert_text: label.clone(),
            label,
            kind,
            range: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompletionList {
    pub suggestions: Vec<CompletionItem>,
}

const TOP_LEVEL_KEYWORDS: &[&str] = &[
    "Table",
    "TablePartial",
    "Enum",
    "Ref",
    "Note",
    "Project",
    "TableGroup",
    "Dep",
];
const TABLE_SUB_KEYWORDS: &[&str] = &["Note", "Indexes", "Checks"];
const PROJECT_SUB_KEYWORDS: &[&str] = &["Note", "database_type"];

const TABLE_SETTINGS: &[&str] = &["headercolor", "note"];
const COLUMN_SETTINGS: &[&str] = &[
    "pk",
    "primary key",
    "unique",
    "increment",
    "null",
    "not null",
    "note",
    "default",
    "ref",
    "check",
];
const INDEX_SETTINGS: &[&str] = &["pk", "unique", "name", "type", "note"];
const REF_SETTINGS: &[&str] = &["delete", "update", "color"];
const GROUP_SETTINGS: &[&str] = &["color", "note"];

fn range_of(tree: &SyntaxTree, node: NodeId) -> Range {
    let node = tree.node(node);
    Range {
        start: node.start_pos.into(),
        end: node.end_pos.into(),
    }
}

/// `node` and its ancestors, innermost first.
fn lineage(tree: &SyntaxTree, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
    std::iter::once(node).chain(tree.ancestors(node))
}

/// Where the symbol referenced under the cursor is declared.
pub fn definition<M: TextModel + ?Sized>(compilation: &Compilation, text: &M, position: Position) -> Vec<Location> {
    let tree = &compilation.tree;
    let model = &compilation.model;
    let Some(node) = tree.node_at(text.offset_at(position)) else {
        return Vec::new();
    };
    lineage(tree, node)
        .find_map(|n| model.referee_of(n))
        .and_then(|symbol| model.symbols.get(symbol).declaration)
        .map(|decl| Location {
            range: range_of(tree, decl),
        })
        .into_iter()
        .collect()
}

/// Every place the symbol under the cursor is referenced, whether the
/// cursor sits on a reference or on the declaration.
pub fn references<M: TextModel + ?Sized>(compilation: &Compilation, text: &M, position: Position) -> Vec<Location> {
    let tree = &compilation.tree;
    let model = &compilation.model;
    let Some(node) = tree.node_at(text.offset_at(position)) else {
        return Vec::new();
    };
    let Some(symbol) = lineage(tree, node).find_map(|n| model.referee_of(n).or_else(|| model.symbol_of(n))) else {
        return Vec::new();
    };
    let mut locations: Vec<Location> = model
        .symbols
        .get(symbol)
        .references
        .iter()
        .map(|r| Location {
            range: range_of(tree, *r),
        })
        .collect();
    locations.sort_by_key(|l| (l.range.start.line_number, l.range.start.column));
    locations
}

pub fn completion<M: TextModel + ?Sized>(compilation: &Compilation, text: &M, position: Position) -> CompletionList {
    let source = text.value();
    let offset = text.offset_at(position).min(source.len());
    let before = source.get(..offset).unwrap_or("");
    let line = before.rsplit('\n').next().unwrap_or("");

    let suggestions = if let Some(path) = member_path(line) {
        member_completions(compilation, &path)
    } else if line.matches('[').count() > line.matches(']').count() {
        setting_completions(compilation, offset, line)
    } else {
        match enclosing_block(&compilation.tree, offset) {
            None => keywords(TOP_LEVEL_KEYWORDS),
            Some(ElementKind::Table) => {
                let mut items = keywords(TABLE_SUB_KEYWORDS);
                items.extend(partial_completions(compilation));
                items
            }
            Some(ElementKind::TablePartial) => keywords(TABLE_SUB_KEYWORDS),
            Some(ElementKind::Project) => keywords(PROJECT_SUB_KEYWORDS),
            Some(ElementKind::TableGroup) | Some(ElementKind::Ref) | Some(ElementKind::Dep) => {
                table_completions(compilation, compilation.model.public_schema())
            }
            Some(_) => Vec::new(),
        }
    };
    CompletionList { suggestions }
}

fn keywords(words: &[&str]) -> Vec<CompletionItem> {
    words.iter().map(|w| CompletionItem::new(*w, CompletionKind::Keyword)).collect()
}

/// `a.b.` at the end of the line as `["a", "b"]`.
fn member_path(line: &str) -> Option<Vec<String>> {
    let trimmed = line.strip_suffix('.')?;
    let start = trimmed
        .char_indices()
        .rev()
        .find(|(_, c)| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '"')))
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    let chain = &trimmed[start..];
    if chain.is_empty() {
        return None;
    }
    Some(chain.split('.').map(|s| s.trim_matches('"').to_string()).collect())
}

fn member_completions(compilation: &Compilation, path: &[String]) -> Vec<CompletionItem> {
    let symbols = &compilation.model.symbols;
    let public = compilation.model.public_schema();
    let mut container = public;
    for (i, name) in path.iter().enumerate() {
        let schema = symbols.lookup(container, &SymbolIndex::new(SymbolKind::Schema, name.as_str()));
        let table = symbols.lookup(container, &SymbolIndex::new(SymbolKind::Table, name.as_str()));
        container = match (schema, table) {
            (Some(schema), _) if i + 1 < path.len() || table.is_none() => schema,
            (_, Some(table)) => table,
            _ => return Vec::new(),
        };
    }
    match symbols.get(container).kind {
        SymbolKind::Schema => {
            let mut items = table_completions(compilation, container);
            items.extend(
                symbols
                    .members(container, SymbolKind::Enum)
                    .into_iter()
                    .map(|e| CompletionItem::new(symbols.get(e).name.clone(), CompletionKind::Enum)),
            );
            items
        }
        _ => {
            let mut columns = symbols.members(container, SymbolKind::Column);
            columns.extend(symbols.members(container, SymbolKind::TablePartialInjectedColumn));
            columns
                .into_iter()
                .map(|c| CompletionItem::new(symbols.get(c).name.clone(), CompletionKind::Column))
                .collect()
        }
    }
}

fn table_completions(compilation: &Compilation, schema: SymbolId) -> Vec<CompletionItem> {
    let symbols = &compilation.model.symbols;
    let mut items: Vec<CompletionItem> = symbols
        .members(schema, SymbolKind::Table)
        .into_iter()
        .map(|t| CompletionItem::new(symbols.get(t).name.clone(), CompletionKind::Table))
        .collect();
    items.extend(
        symbols
            .members(schema, SymbolKind::Schema)
            .into_iter()
            .map(|s| CompletionItem::new(symbols.get(s).name.clone(), CompletionKind::Schema)),
    );
    items.dedup_by(|a, b| a.label == b.label);
    items
}

fn partial_completions(compilation: &Compilation) -> Vec<CompletionItem> {
    let symbols = &compilation.model.symbols;
    symbols
        .members(compilation.model.public_schema(), SymbolKind::TablePartial)
        .into_iter()
        .map(|p| {
            let name = &symbols.get(p).name;
            CompletionItem {
                label: format!("~{name}"),
                insert_text: format!("~{name}"),
                kind: CompletionKind::Partial,
                range: None,
            }
        })
        .collect()
}

fn setting_completions(compilation: &Compilation, offset: usize, line: &str) -> Vec<CompletionItem> {
    let header = line.trim_start().to_ascii_lowercase();
    let names: &[&str] = if header.starts_with("ref") {
        REF_SETTINGS
    } else {
        match enclosing_block(&compilation.tree, offset) {
            Some(ElementKind::Table) | Some(ElementKind::TablePartial) => COLUMN_SETTINGS,
            Some(ElementKind::Indexes) => INDEX_SETTINGS,
            Some(ElementKind::Enum) => &["note"],
            Some(ElementKind::Checks) => &["name"],
            None if header.starts_with("tablegroup") => GROUP_SETTINGS,
            None => TABLE_SETTINGS,
            Some(_) => &[],
        }
    };
    names.iter().map(|n| CompletionItem::new(*n, CompletionKind::Property)).collect()
}

/// Kind of the innermost element whose `{ ... }` body contains `offset`.
/// An unclosed body extends to the end of the input.
fn enclosing_block(tree: &SyntaxTree, offset: usize) -> Option<ElementKind> {
    let mut found = None;
    let mut candidates = tree.program_body().to_vec();
    while let Some(el) = candidates
        .iter()
        .filter_map(|id| Element::from_node(tree, *id))
        .find(|el| body_contains(tree, el, offset))
    {
        found = Some(el.kind);
        candidates = el.block_fields(tree).map(<[NodeId]>::to_vec).unwrap_or_default();
    }
    found
}

fn body_contains(tree: &SyntaxTree, el: &Element<'_>, offset: usize) -> bool {
    let Some(body) = el.body else {
        return false;
    };
    let NodeData::BlockExpression { open, close, .. } = tree.data(body) else {
        return false;
    };
    offset >= open.end && close.as_ref().is_none_or(|c| offset <= c.start)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::compile;

    /// Source with a `|` cursor marker, and the cursor's position.
    fn cursor(marked: &str) -> (String, Position) {
        let offset = marked.find('|').unwrap();
        let before = &marked[..offset];
        let line_number = before.matches('\n').count() + 1;
        let column = before.rsplit('\n').next().unwrap().chars().count() + 1;
        (marked.replacen('|', "", 1), Position::new(line_number, column))
    }

    fn labels(list: &CompletionList) -> Vec<&str> {
        list.suggestions.iter().map(|s| s.label.as_str()).collect()
    }

    #[test]
    fn test_offset_at() {
        let text = "ab\ncd";
        assert_eq!(text.offset_at(Position::new(1, 1)), 0);
        assert_eq!(text.offset_at(Position::new(2, 2)), 4);
        assert_eq!(text.offset_at(Position::new(2, 9)), 5);
        assert_eq!(text.offset_at(Position::new(7, 1)), 5);
    }

    #[test]
    fn test_definition_of_column_reference() {
        let (source, pos) = cursor("Table users {\n  id int\n}\nTable posts { uid int }\nRef: users.i|d < posts.uid");
        let compilation = compile(&source);
        let locations = definition(&compilation, source.as_str(), pos);
        assert_eq!(locations.len(), 1);
        assert_eq!(locations[0].range.start.line_number, 2);
        assert_eq!(locations[0].range.start.column, 3);
    }

    #[test]
    fn test_definition_outside_reference() {
        let (source, pos) = cursor("Ta|ble users { id int }");
        let compilation = compile(&source);
        assert!(definition(&compilation, source.as_str(), pos).is_empty());
    }

    #[test]
    fn test_references_from_declaration() {
        let source = "Table users { id int }\nTable posts { uid int [ref: > users.id] }\nRef: posts.uid - users.id";
        let compilation = compile(source);
        let (_, pos) = cursor("Table us|ers { id int }");
        let found = references(&compilation, source, pos);
        let lines: Vec<usize> = found.iter().map(|l| l.range.start.line_number).collect();
        assert_eq!(lines, vec![2, 3]);
    }

    #[test]
    fn test_top_level_keywords() {
        let (source, pos) = cursor("Table a { id int }\n|");
        let compilation = compile(&source);
        let list = completion(&compilation, source.as_str(), pos);
        assert!(labels(&list).contains(&"TableGroup"));
        assert!(labels(&list).contains(&"Dep"));
    }

    #[test]
    fn test_columns_after_dot() {
        let (source, pos) = cursor("TablePartial ts { created_at timestamp }\nTable users as U { id int\n ~ts }\nRef: U.|");
        let compilation = compile(&source);
        let list = completion(&compilation, source.as_str(), pos);
        assert_eq!(labels(&list), vec!["id", "created_at"]);
        assert!(list.suggestions.iter().all(|s| s.kind == CompletionKind::Column));
    }

    #[test]
    fn test_schema_members_after_dot() {
        let (source, pos) = cursor("Table sales.orders { id int }\nEnum sales.status { a }\nRef: sales.|");
        let compilation = compile(&source);
        let list = completion(&compilation, source.as_str(), pos);
        assert_eq!(labels(&list), vec!["orders", "status"]);
    }

    #[test]
    fn test_table_body_and_settings() {
        let (source, pos) = cursor("TablePartial ts { x int }\nTable t {\n  id int\n  |\n}");
        let compilation = compile(&source);
        let list = completion(&compilation, source.as_str(), pos);
        assert_eq!(labels(&list), vec!["Note", "Indexes", "Checks", "~ts"]);

        let (source, pos) = cursor("Table t {\n  id int [|\n}");
        let compilation = compile(&source);
        let list = completion(&compilation, source.as_str(), pos);
        assert!(labels(&list).contains(&"not null"));
    }

    #[test]
    fn test_project_body() {
        let (source, pos) = cursor("Project p {\n  |\n}");
        let compilation = compile(&source);
        assert_eq!(labels(&completion(&compilation, source.as_str(), pos)), vec!["Note", "database_type"]);
    }
}
