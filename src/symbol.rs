//! Symbols and scoped symbol tables.
//!
//! Symbols live in a [`SymbolArena`] owned by one compilation; ids are dense
//! and start from zero for every compile. Container symbols own a
//! [`SymbolTable`] mapping kind-tagged names to member symbols.

use std::collections::HashMap;
use std::fmt;

use crate::ast::NodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SymbolId(pub u32);

impl SymbolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Schema,
    Table,
    Column,
    Enum,
    EnumField,
    TableGroup,
    TableGroupField,
    TablePartial,
    TablePartialInjection,
    TablePartialInjectedColumn,
}

impl SymbolKind {
    pub fn is_container(self) -> bool {
        matches!(
            self,
            SymbolKind::Schema
                | SymbolKind::Table
                | SymbolKind::Enum
                | SymbolKind::TableGroup
                | SymbolKind::TablePartial
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SymbolKind::Schema => "Schema",
            SymbolKind::Table => "Table",
            SymbolKind::Column => "Column",
            SymbolKind::Enum => "Enum",
            SymbolKind::EnumField => "Enum field",
            SymbolKind::TableGroup => "TableGroup",
            SymbolKind::TableGroupField => "TableGroup field",
            SymbolKind::TablePartial => "TablePartial",
            SymbolKind::TablePartialInjection => "TablePartial injection",
            SymbolKind::TablePartialInjectedColumn => "Column",
        }
    }
}

/// Key of a symbol table entry: kind tag plus case-sensitive name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SymbolIndex {
    pub kind: SymbolKind,
    pub name: String,
}

impl SymbolIndex {
    pub fn new(kind: SymbolKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl fmt::Display for SymbolIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolTable {
    entries: HashMap<SymbolIndex, SymbolId>,
}

impl SymbolTable {
    pub fn get(&self, index: &SymbolIndex) -> Option<SymbolId> {
        self.entries.get(index).copied()
    }

    /// Insert unless the index is taken; returns the current holder on conflict.
    pub fn insert(&mut self, index: SymbolIndex, id: SymbolId) -> Result<(), SymbolId> {
        match self.entries.get(&index) {
            Some(existing) => Err(*existing),
            None => {
                self.entries.insert(index, id);
                Ok(())
            }
        }
    }

    /// Insert, replacing any current holder.
    pub fn set(&mut self, index: SymbolIndex, id: SymbolId) {
        self.entries.insert(index, id);
    }

    pub fn remove(&mut self, index: &SymbolIndex) -> Option<SymbolId> {
        self.entries.remove(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SymbolIndex, SymbolId)> {
        self.entries.iter().map(|(k, v)| (k, *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Symbol {
    pub id: SymbolId,
    pub kind: SymbolKind,
    pub name: String,
    /// Enclosing container symbol.
    pub parent: Option<SymbolId>,
    /// Declaring node; `None` for implicit schemas.
    pub declaration: Option<NodeId>,
    pub references: Vec<NodeId>,
    pub table: Option<SymbolTable>,
    /// For injected columns: the partial's column this one copies.
    pub origin: Option<SymbolId>,
    /// For injected columns: the injection that brought it in.
    pub injection: Option<SymbolId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SymbolArena {
    symbols: Vec<Symbol>,
}

impl SymbolArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(
        &mut self,
        kind: SymbolKind,
        name: impl Into<String>,
        parent: Option<SymbolId>,
        declaration: Option<NodeId>,
    ) -> SymbolId {
        let id = SymbolId(self.symbols.len() as u32);
        self.symbols.push(Symbol {
            id,
            kind,
            name: name.into(),
            parent,
            declaration,
            references: Vec::new(),
            table: kind.is_container().then(SymbolTable::default),
            origin: None,
            injection: None,
        });
        id
    }

    pub fn get(&self, id: SymbolId) -> &Symbol {
        &self.symbols[id.index()]
    }

    pub fn get_mut(&mut self, id: SymbolId) -> &mut Symbol {
        &mut self.symbols[id.index()]
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    /// Member of `container` under `index`.
    pub fn lookup(&self, container: SymbolId, index: &SymbolIndex) -> Option<SymbolId> {
        self.get(container).table.as_ref()?.get(index)
    }

    /// Add `member` to `container`'s table; returns the current holder on conflict.
    pub fn insert_member(&mut self, container: SymbolId, index: SymbolIndex, member: SymbolId) -> Result<(), SymbolId> {
        match self.get_mut(container).table.as_mut() {
            Some(table) => table.insert(index, member),
            None => Ok(()),
        }
    }

    pub fn add_reference(&mut self, id: SymbolId, node: NodeId) {
        let refs = &mut self.get_mut(id).references;
        if !refs.contains(&node) {
            refs.push(node);
        }
    }

    /// Members of a container of the given kind, sorted by id (declaration order).
    pub fn members(&self, container: SymbolId, kind: SymbolKind) -> Vec<SymbolId> {
        let mut out: Vec<SymbolId> = self
            .get(container)
            .table
            .iter()
            .flat_map(|t| t.iter())
            .filter(|(index, _)| index.kind == kind)
            .map(|(_, id)| id)
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Names of the enclosing schemas, outermost first, excluding the root.
    pub fn schema_path(&self, id: SymbolId) -> Vec<&str> {
        let mut path = Vec::new();
        let mut current = self.get(id).parent;
        while let Some(parent) = current {
            let sym = self.get(parent);
            if sym.kind != SymbolKind::Schema || sym.parent.is_none() {
                break;
            }
            path.push(sym.name.as_str());
            current = sym.parent;
        }
        path.reverse();
        path
    }
}
