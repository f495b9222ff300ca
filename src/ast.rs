//! Lossless concrete syntax tree.
//!
//! Nodes live in a flat arena owned by [`SyntaxTree`] and refer to each other
//! through [`NodeId`]. Parent links are indices as well, so the tree has no
//! reference cycles. Semantic bindings are not stored here; the analyzer keeps
//! them in side tables keyed by `NodeId`.

use crate::lexer::{Position, Token};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Program,
    ElementDeclaration,
    Attribute,
    IdentifierStream,
    Literal,
    Variable,
    PrefixExpression,
    InfixExpression,
    FunctionExpression,
    FunctionApplication,
    BlockExpression,
    PartialInjection,
    ListExpression,
    TupleExpression,
    GroupExpression,
    CallExpression,
    PrimaryExpression,
    Array,
    Dummy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Program {
        body: Vec<NodeId>,
        eof: Token,
    },
    /// `Keyword Name? (as Alias)? [settings]? (: body | { body })`
    ElementDeclaration {
        keyword: Token,
        name: Option<NodeId>,
        as_keyword: Option<Token>,
        alias: Option<NodeId>,
        settings: Option<NodeId>,
        colon: Option<Token>,
        body: Option<NodeId>,
    },
    Attribute {
        name: Option<NodeId>,
        colon: Option<Token>,
        value: Option<NodeId>,
    },
    /// Space separated identifiers such as `not null` or `no action`.
    IdentifierStream {
        identifiers: Vec<Token>,
    },
    Literal {
        literal: Token,
    },
    Variable {
        variable: Token,
    },
    PrimaryExpression {
        expression: NodeId,
    },
    PrefixExpression {
        op: Token,
        expression: NodeId,
    },
    InfixExpression {
        op: Token,
        left: NodeId,
        right: NodeId,
    },
    FunctionExpression {
        value: Token,
    },
    /// One line of a block: `callee arg*`.
    FunctionApplication {
        callee: NodeId,
        args: Vec<NodeId>,
    },
    BlockExpression {
        open: Token,
        body: Vec<NodeId>,
        close: Option<Token>,
    },
    /// `~partial_name`
    PartialInjection {
        op: Token,
        partial: Option<NodeId>,
    },
    /// `[attr, attr]`. `commas[i]` follows `elements[i]`; `None` marks a missing comma.
    ListExpression {
        open: Token,
        elements: Vec<NodeId>,
        commas: Vec<Option<Token>>,
        close: Option<Token>,
    },
    TupleExpression {
        open: Token,
        elements: Vec<NodeId>,
        commas: Vec<Option<Token>>,
        close: Option<Token>,
    },
    GroupExpression {
        open: Token,
        expression: NodeId,
        close: Option<Token>,
    },
    CallExpression {
        callee: NodeId,
        arguments: NodeId,
    },
    Array {
        expression: NodeId,
        indexer: NodeId,
    },
    /// Placeholder for a missing operand; occupies no source text.
    Dummy {
        offset: usize,
        pos: Position,
    },
}

/// An ordered piece of a node: either one of its own tokens or a child node.
#[derive(Debug, Clone, Copy)]
pub enum Part<'a> {
    Token(&'a Token),
    Node(NodeId),
}

impl NodeData {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeData::Program { .. } => NodeKind::Program,
            NodeData::ElementDeclaration { .. } => NodeKind::ElementDeclaration,
            NodeData::Attribute { .. } => NodeKind::Attribute,
            NodeData::IdentifierStream { .. } => NodeKind::IdentifierStream,
            NodeData::Literal { .. } => NodeKind::Literal,
            NodeData::Variable { .. } => NodeKind::Variable,
            NodeData::PrimaryExpression { .. } => NodeKind::PrimaryExpression,
            NodeData::PrefixExpression { .. } => NodeKind::PrefixExpression,
            NodeData::InfixExpression { .. } => NodeKind::InfixExpression,
            NodeData::FunctionExpression { .. } => NodeKind::FunctionExpression,
            NodeData::FunctionApplication { .. } => NodeKind::FunctionApplication,
            NodeData::BlockExpression { .. } => NodeKind::BlockExpression,
            NodeData::PartialInjection { .. } => NodeKind::PartialInjection,
            NodeData::ListExpression { .. } => NodeKind::ListExpression,
            NodeData::TupleExpression { .. } => NodeKind::TupleExpression,
            NodeData::GroupExpression { .. } => NodeKind::GroupExpression,
            NodeData::CallExpression { .. } => NodeKind::CallExpression,
            NodeData::Array { .. } => NodeKind::Array,
            NodeData::Dummy { .. } => NodeKind::Dummy,
        }
    }

    /// Tokens and children in source order.
    pub fn parts(&self) -> Vec<Part<'_>> {
        fn node(parts: &mut Vec<Part<'_>>, id: &Option<NodeId>) {
            if let Some(id) = id {
                parts.push(Part::Node(*id));
            }
        }

        let mut parts = Vec::new();
        match self {
            NodeData::Program { body, eof } => {
                parts.extend(body.iter().map(|id| Part::Node(*id)));
                parts.push(Part::Token(eof));
            }
            NodeData::ElementDeclaration {
                keyword,
                name,
                as_keyword,
                alias,
                settings,
                colon,
                body,
            } => {
                parts.push(Part::Token(keyword));
                node(&mut parts, name);
                parts.extend(as_keyword.iter().map(Part::Token));
                node(&mut parts, alias);
                node(&mut parts, settings);
                parts.extend(colon.iter().map(Part::Token));
                node(&mut parts, body);
            }
            NodeData::Attribute { name, colon, value } => {
                node(&mut parts, name);
                parts.extend(colon.iter().map(Part::Token));
                node(&mut parts, value);
            }
            NodeData::IdentifierStream { identifiers } => {
                parts.extend(identifiers.iter().map(Part::Token));
            }
            NodeData::Literal { literal } => parts.push(Part::Token(literal)),
            NodeData::Variable { variable } => parts.push(Part::Token(variable)),
            NodeData::PrimaryExpression { expression } => parts.push(Part::Node(*expression)),
            NodeData::PrefixExpression { op, expression } => {
                parts.push(Part::Token(op));
                parts.push(Part::Node(*expression));
            }
            NodeData::InfixExpression { op, left, right } => {
                parts.push(Part::Node(*left));
                parts.push(Part::Token(op));
                parts.push(Part::Node(*right));
            }
            NodeData::FunctionExpression { value } => parts.push(Part::Token(value)),
            NodeData::FunctionApplication { callee, args } => {
                parts.push(Part::Node(*callee));
                parts.extend(args.iter().map(|id| Part::Node(*id)));
            }
            NodeData::BlockExpression { open, body, close } => {
                parts.push(Part::Token(open));
                parts.extend(body.iter().map(|id| Part::Node(*id)));
                parts.extend(close.iter().map(Part::Token));
            }
            NodeData::PartialInjection { op, partial } => {
                parts.push(Part::Token(op));
                node(&mut parts, partial);
            }
            NodeData::ListExpression {
                open,
                elements,
                commas,
                close,
            }
            | NodeData::TupleExpression {
                open,
                elements,
                commas,
                close,
            } => {
                parts.push(Part::Token(open));
                parts.extend(interleave(elements, commas));
                parts.extend(close.iter().map(Part::Token));
            }
            NodeData::GroupExpression {
                open,
                expression,
                close,
            } => {
                parts.push(Part::Token(open));
                parts.push(Part::Node(*expression));
                parts.extend(close.iter().map(Part::Token));
            }
            NodeData::CallExpression { callee, arguments } => {
                parts.push(Part::Node(*callee));
                parts.push(Part::Node(*arguments));
            }
            NodeData::Array {
                expression,
                indexer,
            } => {
                parts.push(Part::Node(*expression));
                parts.push(Part::Node(*indexer));
            }
            NodeData::Dummy { .. } => {}
        }
        parts
    }

    pub fn children(&self) -> Vec<NodeId> {
        self.parts()
            .into_iter()
            .filter_map(|p| match p {
                Part::Node(id) => Some(id),
                Part::Token(_) => None,
            })
            .collect()
    }
}

/// Elements and separators alternate: `e0 , e1 , e2`. The parser inserts a
/// dummy element in front of any comma that has none.
fn interleave<'a>(elements: &[NodeId], commas: &'a [Option<Token>]) -> Vec<Part<'a>> {
    let mut out = Vec::with_capacity(elements.len() + commas.len());
    let mut commas = commas.iter();
    for id in elements {
        out.push(Part::Node(*id));
        if let Some(Some(comma)) = commas.next() {
            out.push(Part::Token(comma));
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxNode {
    pub id: NodeId,
    pub parent: Option<NodeId>,
    /// Span without trivia.
    pub start: usize,
    pub end: usize,
    /// Span including trivia and invalid tokens.
    pub full_start: usize,
    pub full_end: usize,
    pub start_pos: Position,
    pub end_pos: Position,
    pub data: NodeData,
}

impl SyntaxNode {
    pub fn kind(&self) -> NodeKind {
        self.data.kind()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyntaxTree {
    nodes: Vec<SyntaxNode>,
    root: Option<NodeId>,
}

impl SyntaxTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node, computing its spans from its parts and adopting its children.
    pub fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        let (start, end, full_start, full_end, start_pos, end_pos) = self.measure(&data);
        for child in data.children() {
            self.nodes[child.index()].parent = Some(id);
        }
        self.nodes.push(SyntaxNode {
            id,
            parent: None,
            start,
            end,
            full_start,
            full_end,
            start_pos,
            end_pos,
            data,
        });
        id
    }

    pub fn set_root(&mut self, id: NodeId) {
        self.root = Some(id);
    }

    fn measure(&self, data: &NodeData) -> (usize, usize, usize, usize, Position, Position) {
        if let NodeData::Dummy { offset, pos } = data {
            return (*offset, *offset, *offset, *offset, *pos, *pos);
        }
        let parts = data.parts();
        let (Some(first), Some(last)) = (parts.first(), parts.last()) else {
            return (0, 0, 0, 0, Position::default(), Position::default());
        };
        let (start, full_start, start_pos) = match first {
            Part::Token(t) => (t.start, t.full_start(), t.start_pos),
            Part::Node(id) => {
                let n = &self.nodes[id.index()];
                (n.start, n.full_start, n.start_pos)
            }
        };
        let (end, full_end, end_pos) = match last {
            Part::Token(t) => (t.end, t.full_end(), t.end_pos),
            Part::Node(id) => {
                let n = &self.nodes[id.index()];
                (n.end, n.full_end, n.end_pos)
            }
        };
        (start, end, full_start, full_end, start_pos, end_pos)
    }

    pub fn root(&self) -> NodeId {
        self.root.unwrap_or(NodeId(0))
    }

    pub fn node(&self, id: NodeId) -> &SyntaxNode {
        &self.nodes[id.index()]
    }

    pub fn get(&self, id: NodeId) -> Option<&SyntaxNode> {
        self.nodes.get(id.index())
    }

    pub fn data(&self, id: NodeId) -> &NodeData {
        &self.nodes[id.index()].data
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes[id.index()].parent
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &SyntaxNode> {
        self.nodes.iter()
    }

    /// Top-level element declarations.
    pub fn program_body(&self) -> &[NodeId] {
        match self.root.map(|r| self.data(r)) {
            Some(NodeData::Program { body, .. }) => body,
            _ => &[],
        }
    }

    /// Every token reachable from `id`, in source order, without trivia.
    pub fn tokens(&self, id: NodeId) -> Vec<&Token> {
        let mut out = Vec::new();
        let mut stack = vec![Part::Node(id)];
        while let Some(part) = stack.pop() {
            match part {
                Part::Token(t) => out.push(t),
                Part::Node(n) => {
                    let parts = self.nodes[n.index()].data.parts();
                    stack.extend(parts.into_iter().rev());
                }
            }
        }
        out
    }

    /// Source text of a node's core span.
    pub fn text<'s>(&self, source: &'s str, id: NodeId) -> &'s str {
        let node = self.node(id);
        source.get(node.start..node.end).unwrap_or("")
    }

    /// Rebuild the source by slicing every token piece in ascending position order.
    pub fn reconstruct(&self, source: &str) -> String {
        let mut pieces = Vec::new();
        for token in self.tokens(self.root()) {
            token.flatten_into(&mut pieces);
        }
        pieces.sort_by_key(|t| (t.start, t.end));
        pieces
            .iter()
            .filter_map(|t| source.get(t.start..t.end))
            .collect()
    }

    /// Innermost node whose core span contains `offset`.
    pub fn node_at(&self, offset: usize) -> Option<NodeId> {
        let mut current = self.root?;
        'descend: loop {
            for child in self.data(current).children() {
                let node = self.node(child);
                if node.start <= offset && offset <= node.end && node.kind() != NodeKind::Dummy {
                    current = child;
                    continue 'descend;
                }
            }
            return Some(current);
        }
    }

    /// Walk `parent` links from `id` (exclusive) to the root.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(self.parent(id), move |n| self.parent(*n))
    }
}
