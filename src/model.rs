//! Normalized database model produced by the interpreter. Serialized with
//! camelCase keys; this JSON shape is what exporters consume.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lexer::Position;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Database {
    pub schemas: Vec<Schema>,
    pub tables: Vec<Table>,
    pub notes: Vec<StickyNote>,
    pub refs: Vec<Ref>,
    pub enums: Vec<Enum>,
    pub table_groups: Vec<TableGroup>,
    pub table_partials: Vec<TablePartial>,
    pub aliases: Vec<Alias>,
    pub deps: Vec<Dep>,
    pub project: Option<Project>,
}

impl Database {
    pub fn table(&self, schema_name: Option<&str>, name: &str) -> Option<&Table> {
        self.tables
            .iter()
            .find(|t| t.name == name && t.schema_name.as_deref() == schema_name)
    }
}

/// 1-based line and column plus a byte offset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPoint {
    pub offset: usize,
    pub line: usize,
    pub column: usize,
}

impl TokenPoint {
    pub fn new(offset: usize, pos: Position) -> Self {
        Self {
            offset,
            line: pos.line + 1,
            column: pos.column + 1,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRange {
    pub start: TokenPoint,
    pub end: TokenPoint,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Table {
    pub name: String,
    pub schema_name: Option<String>,
    pub alias: Option<String>,
    pub fields: Vec<Column>,
    pub indexes: Vec<Index>,
    pub checks: Vec<Check>,
    pub note: Option<String>,
    pub header_color: Option<String>,
    /// Injected partials, in injection order.
    pub partials: Vec<String>,
    pub token: TokenRange,
}

impl Table {
    pub fn field(&self, name: &str) -> Option<&Column> {
        self.fields.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    pub pk: bool,
    pub unique: bool,
    /// `Some(true)` for `not null`, `Some(false)` for `null`, `None` if unset.
    pub not_null: Option<bool>,
    pub increment: bool,
    #[serde(rename = "default")]
    pub dbdefault: Option<DefaultValue>,
    pub note: Option<String>,
    pub inline_refs: Vec<InlineRef>,
    pub checks: Vec<Check>,
    /// Partial this column was injected from.
    pub injected_from: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnType {
    pub schema_name: Option<String>,
    /// Type text without the schema: `int`, `varchar(255)`, `int[]`.
    pub type_name: String,
    /// Raw argument text of a parameterized type: `255`, `10, 2`.
    pub args: Option<String>,
    pub is_enum: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefaultKind {
    String,
    Number,
    Boolean,
    Null,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefaultValue {
    #[serde(rename = "type")]
    pub kind: DefaultKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineRef {
    pub schema_name: Option<String>,
    pub table_name: String,
    pub field_names: Vec<String>,
    /// `>`, `<`, `-` or `<>`.
    pub relation: String,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Index {
    pub columns: Vec<IndexColumn>,
    pub pk: bool,
    pub unique: bool,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub index_type: Option<String>,
    pub note: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexColumnKind {
    Column,
    Expression,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexColumn {
    #[serde(rename = "type")]
    pub kind: IndexColumnKind,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Check {
    pub expression: String,
    pub name: Option<String>,
    pub token: TokenRange,
}

/// Cardinality of one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Relation {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "*")]
    Many,
}

impl Relation {
    /// Cardinalities `(left, right)` of a relationship operator.
    pub fn pair(op: &str) -> Option<(Relation, Relation)> {
        match op {
            ">" => Some((Relation::Many, Relation::One)),
            "<" => Some((Relation::One, Relation::Many)),
            "-" => Some((Relation::One, Relation::One)),
            "<>" => Some((Relation::Many, Relation::Many)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ref {
    pub name: Option<String>,
    pub schema_name: Option<String>,
    pub endpoints: Vec<Endpoint>,
    pub on_delete: Option<String>,
    pub on_update: Option<String>,
    pub color: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub schema_name: Option<String>,
    pub table_name: String,
    pub field_names: Vec<String>,
    pub relation: Relation,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enum {
    pub name: String,
    pub schema_name: Option<String>,
    pub values: Vec<EnumValue>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub name: String,
    pub note: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableGroup {
    pub name: String,
    pub schema_name: Option<String>,
    pub tables: Vec<TableName>,
    pub color: Option<String>,
    pub note: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableName {
    pub table_name: String,
    pub schema_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePartial {
    pub name: String,
    pub fields: Vec<Column>,
    pub indexes: Vec<Index>,
    pub checks: Vec<Check>,
    pub note: Option<String>,
    pub header_color: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alias {
    pub name: String,
    /// Always `table`.
    pub kind: String,
    pub value: TableName,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dep {
    pub name: Option<String>,
    pub downstream: TableName,
    pub upstreams: Vec<DepUpstream>,
    pub note: Option<String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DepUpstream {
    pub table_name: String,
    pub schema_name: Option<String>,
    pub fields: Vec<FieldDep>,
}

/// One column mapping of a dependency edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDep {
    pub downstream: String,
    pub upstream: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub name: Option<String>,
    pub note: Option<String>,
    pub database_type: Option<String>,
    /// Custom `key: 'value'` lines other than `database_type`.
    pub settings: BTreeMap<String, String>,
    pub token: TokenRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickyNote {
    pub name: String,
    pub content: String,
    pub header_color: Option<String>,
    pub token: TokenRange,
}
