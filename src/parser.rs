//! Error-recovering DBML parser.
//!
//! Recursive descent for element declarations and blocks, Pratt precedence
//! climbing for expressions. Syntax errors never abort the parse: a missing
//! operand becomes a [`NodeData::Dummy`] node and unexpected tokens are
//! recorded as invalid tokens on the next consumed token, so the tree still
//! reprints the source byte for byte.

use tracing::debug;

use crate::ast::{NodeData, NodeId, NodeKind, SyntaxTree};
use crate::errors::{CompileError, CompileErrorCode, Report};
use crate::lexer::{lex, Position, Token, TokenKind};

/// Bound on nested expressions and blocks.
pub const MAX_NESTING_DEPTH: usize = 128;

const PREFIX_BP: u8 = 9;

/// Left and right binding power of an infix operator.
fn infix_binding_power(op: &str) -> Option<(u8, u8)> {
    match op {
        "<" | ">" | "<=" | ">=" | "<>" | "=" | "==" | "!=" => Some((3, 4)),
        "+" | "-" => Some((5, 6)),
        "*" | "/" | "%" => Some((7, 8)),
        "." => Some((11, 12)),
        _ => None,
    }
}

fn is_prefix_op(op: &str) -> bool {
    matches!(op, "-" | "+" | "!" | "<" | ">" | "<>")
}

fn can_start_expression(token: &Token) -> bool {
    match token.kind {
        TokenKind::Identifier
        | TokenKind::QuotedIdentifier
        | TokenKind::StringLiteral
        | TokenKind::MultilineString
        | TokenKind::NumericLiteral
        | TokenKind::ColorLiteral
        | TokenKind::FunctionExpression
        | TokenKind::LParen
        | TokenKind::LBracket
        | TokenKind::Tilde => true,
        TokenKind::Op => is_prefix_op(&token.value),
        _ => false,
    }
}

/// What the parser knows about the last token it consumed or skipped.
#[derive(Debug, Clone, Copy)]
struct Prev {
    end: usize,
    end_pos: Position,
    ends_line: bool,
    has_trailing_trivia: bool,
}

pub struct Parser {
    tokens: Vec<Option<Token>>,
    pos: usize,
    eof: Token,
    tree: SyntaxTree,
    errors: Vec<CompileError>,
    pending_invalid: Vec<Token>,
    prev: Option<Prev>,
    depth: usize,
    nesting_reported: bool,
}

impl Parser {
    pub fn new(tokens: Vec<Token>) -> Self {
        let (mut tokens, orphans) = absorb_unknown_tokens(tokens);
        if tokens.last().is_none_or(|t| t.kind != TokenKind::Eof) {
            let end = tokens.last().map_or(0, |t| t.full_end());
            let end_pos = tokens.last().map_or(Position::default(), |t| t.end_pos);
            tokens.push(Token {
                kind: TokenKind::Eof,
                value: String::new(),
                start: end,
                end,
                start_pos: end_pos,
                end_pos,
                leading_trivia: Vec::new(),
                trailing_trivia: Vec::new(),
                leading_invalid: Vec::new(),
                trailing_invalid: Vec::new(),
            });
        }
        let last = tokens.len() - 1;
        tokens[last].leading_invalid.extend(orphans);
        let mut eof = tokens[tokens.len() - 1].clone();
        eof.leading_trivia.clear();
        eof.leading_invalid.clear();
        Self {
            tokens: tokens.into_iter().map(Some).collect(),
            pos: 0,
            eof,
            tree: SyntaxTree::new(),
            errors: Vec::new(),
            pending_invalid: Vec::new(),
            prev: None,
            depth: 0,
            nesting_reported: false,
        }
    }

    // -----------------------------------------------------------------------
    // Token navigation
    // -----------------------------------------------------------------------

    fn peek(&self) -> &Token {
        self.peek_nth(0)
    }

    fn peek_nth(&self, n: usize) -> &Token {
        let last = self.tokens.len() - 1;
        self.tokens[(self.pos + n).min(last)]
            .as_ref()
            .unwrap_or(&self.eof)
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn at_eof(&self) -> bool {
        self.at(TokenKind::Eof)
    }

    fn take_current(&mut self) -> Token {
        if self.at_eof() {
            return self.eof.clone();
        }
        let tok = self.tokens[self.pos].take().unwrap_or_else(|| self.eof.clone());
        self.pos += 1;
        self.prev = Some(Prev {
            end: tok.end,
            end_pos: tok.end_pos,
            ends_line: tok.ends_line(),
            has_trailing_trivia: tok.has_trailing_trivia(),
        });
        tok
    }

    /// Consume the current token, handing it any tokens skipped before it.
    fn advance(&mut self) -> Token {
        let mut tok = self.take_current();
        if !self.pending_invalid.is_empty() {
            let mut invalid = std::mem::take(&mut self.pending_invalid);
            invalid.append(&mut tok.leading_invalid);
            tok.leading_invalid = invalid;
        }
        tok
    }

    /// Drop the current token from the tree, keeping it for reprinting.
    fn skip_invalid(&mut self) {
        if self.at_eof() {
            return;
        }
        let tok = self.take_current();
        self.pending_invalid.push(tok);
    }

    /// Skip one token, or a whole bracketed run when it opens one.
    fn skip_nested(&mut self) {
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                TokenKind::Eof => return,
                TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
                TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                _ => {}
            }
            self.skip_invalid();
            if depth == 0 {
                return;
            }
        }
    }

    fn prev_ends_line(&self) -> bool {
        self.prev.is_some_and(|p| p.ends_line)
    }

    /// The current token touches the previous one with no trivia between.
    fn adjacent(&self) -> bool {
        self.pending_invalid.is_empty() && self.prev.is_some_and(|p| !p.has_trailing_trivia)
    }

    fn error_here(&mut self, code: CompileErrorCode, message: impl Into<String>) {
        let err = CompileError::at_token(code, message, self.peek());
        self.errors.push(err);
    }

    fn dummy(&mut self) -> NodeId {
        let (offset, pos) = match self.prev {
            Some(p) => (p.end, p.end_pos),
            None => (self.peek().start, self.peek().start_pos),
        };
        self.tree.push(NodeData::Dummy { offset, pos })
    }

    fn missing_operand(&mut self, message: &str) -> NodeId {
        self.error_here(CompileErrorCode::MissingOperand, message);
        self.dummy()
    }

    fn enter(&mut self) -> bool {
        if self.depth >= MAX_NESTING_DEPTH {
            if !self.nesting_reported {
                self.nesting_reported = true;
                self.error_here(
                    CompileErrorCode::NestingTooDeep,
                    format!("Nesting exceeds the maximum depth of {MAX_NESTING_DEPTH}"),
                );
            }
            return false;
        }
        self.depth += 1;
        true
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Report the current token as unexpected and skip it.
    fn unexpected(&mut self, expected: &str) {
        let tok = self.peek();
        let (code, message) = if tok.kind == TokenKind::Op && infix_binding_power(&tok.value).is_none() && !is_prefix_op(&tok.value) {
            (CompileErrorCode::InvalidOperator, format!("Unknown operator '{}'", tok.value))
        } else {
            (CompileErrorCode::UnexpectedToken, format!("Unexpected '{}', expected {expected}", tok.value))
        };
        self.error_here(code, message);
        self.skip_invalid();
    }

    // -----------------------------------------------------------------------
    // Program and elements
    // -----------------------------------------------------------------------

    pub fn parse(mut self) -> Report<SyntaxTree> {
        let mut body = Vec::new();
        while !self.at_eof() {
            if self.at(TokenKind::Identifier) {
                body.push(self.parse_element_declaration());
                continue;
            }
            self.error_here(
                CompileErrorCode::UnexpectedToken,
                format!("Unexpected '{}', expected an element declaration", self.peek().value),
            );
            while !self.at_eof() && !self.at(TokenKind::Identifier) {
                self.skip_invalid();
            }
        }
        let eof = self.advance_eof();
        let root = self.tree.push(NodeData::Program { body, eof });
        self.tree.set_root(root);
        Report::new(self.tree, self.errors)
    }

    fn advance_eof(&mut self) -> Token {
        let last = self.tokens.len() - 1;
        let mut eof = self.tokens[last].take().unwrap_or_else(|| self.eof.clone());
        let mut invalid = std::mem::take(&mut self.pending_invalid);
        invalid.append(&mut eof.leading_invalid);
        eof.leading_invalid = invalid;
        eof
    }

    /// Inside a block, does the line starting here declare a sub-element?
    fn looks_like_element(&self) -> bool {
        let mut depth = 0usize;
        let mut i = self.pos;
        loop {
            let Some(tok) = self.tokens.get(i).and_then(Option::as_ref) else {
                return false;
            };
            match tok.kind {
                TokenKind::Colon | TokenKind::LBrace if depth == 0 => return true,
                TokenKind::LParen | TokenKind::LBracket => depth += 1,
                TokenKind::RParen | TokenKind::RBracket => {
                    if depth == 0 {
                        return false;
                    }
                    depth -= 1;
                }
                TokenKind::RBrace | TokenKind::Eof => return false,
                _ => {}
            }
            if depth == 0 && tok.ends_line() {
                return false;
            }
            i += 1;
        }
    }

    fn can_start_header_expression(&self) -> bool {
        let tok = self.peek();
        can_start_expression(tok)
            && !tok.is_identifier("as")
            && !matches!(tok.kind, TokenKind::LBracket | TokenKind::Tilde)
    }

    fn parse_element_declaration(&mut self) -> NodeId {
        let keyword = self.advance();
        let mut name = None;
        let mut as_keyword = None;
        let mut alias = None;
        let mut settings = None;
        let mut colon = None;
        let body;

        if self.can_start_header_expression() {
            name = Some(self.parse_expression(0, false));
        }
        if self.peek().is_identifier("as") {
            as_keyword = Some(self.advance());
            alias = Some(if self.can_start_header_expression() {
                self.parse_expression(0, false)
            } else {
                self.missing_operand("Expected an alias after 'as'")
            });
        }
        if self.at(TokenKind::LBracket) {
            settings = Some(self.parse_list());
        }
        self.skip_to_body();
        if self.at(TokenKind::Colon) {
            colon = Some(self.advance());
            body = Some(if self.prev_ends_line() || !can_start_expression(self.peek()) {
                self.missing_operand("Expected an element body after ':'")
            } else {
                self.parse_function_application()
            });
        } else if self.at(TokenKind::LBrace) {
            body = Some(self.parse_block());
        } else {
            self.error_here(
                CompileErrorCode::ExpectedElementBody,
                format!("Expected ':' or '{{' to start the body of '{}'", keyword.value),
            );
            body = None;
        }

        self.tree.push(NodeData::ElementDeclaration {
            keyword,
            name,
            as_keyword,
            alias,
            settings,
            colon,
            body,
        })
    }

    /// Leftover header tokens on the keyword's line are reported once and skipped.
    fn skip_to_body(&mut self) {
        if self.prev_ends_line()
            || matches!(
                self.peek_kind(),
                TokenKind::Colon | TokenKind::LBrace | TokenKind::RBrace | TokenKind::Eof
            )
        {
            return;
        }
        self.error_here(
            CompileErrorCode::UnexpectedToken,
            format!("Unexpected '{}' in element header", self.peek().value),
        );
        while !self.prev_ends_line()
            && !matches!(
                self.peek_kind(),
                TokenKind::Colon | TokenKind::LBrace | TokenKind::RBrace | TokenKind::Eof
            )
        {
            self.skip_invalid();
        }
    }

    fn parse_block(&mut self) -> NodeId {
        let open = self.advance();
        let open_error = CompileError::at_token(CompileErrorCode::UnmatchedBracket, "Missing '}'", &open);
        let mut body = Vec::new();
        let mut close = None;
        let entered = self.enter();

        loop {
            let before = self.pos;
            match self.peek_kind() {
                TokenKind::RBrace => {
                    close = Some(self.advance());
                    break;
                }
                TokenKind::Eof => {
                    self.errors.push(open_error);
                    break;
                }
                _ if !entered => self.skip_nested(),
                TokenKind::Identifier if self.looks_like_element() => {
                    body.push(self.parse_element_declaration());
                }
                _ if can_start_expression(self.peek()) => {
                    body.push(self.parse_function_application());
                }
                _ => self.unexpected("a field or an element declaration"),
            }
            if self.pos == before && !self.at_eof() {
                self.skip_invalid();
            }
        }
        if entered {
            self.leave();
        }
        self.tree.push(NodeData::BlockExpression { open, body, close })
    }

    /// `callee arg*` up to the end of the line. A setting list ends it early.
    fn parse_function_application(&mut self) -> NodeId {
        let callee = self.parse_expression(0, true);
        let mut args = Vec::new();
        loop {
            if self.prev_ends_line() {
                break;
            }
            let before = self.pos;
            match self.peek_kind() {
                TokenKind::RBrace | TokenKind::RBracket | TokenKind::RParen | TokenKind::Eof => break,
                _ if can_start_expression(self.peek()) => {
                    let arg = self.parse_expression(0, true);
                    args.push(arg);
                    if self.tree.node(arg).kind() == NodeKind::ListExpression {
                        break;
                    }
                }
                _ => self.unexpected("an argument"),
            }
            if self.pos == before {
                self.skip_invalid();
            }
        }
        self.tree.push(NodeData::FunctionApplication { callee, args })
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    /// Pratt loop. `allow_postfix` enables `callee(args)` and `expr[...]`
    /// when the bracket touches the previous token.
    fn parse_expression(&mut self, min_bp: u8, allow_postfix: bool) -> NodeId {
        if !self.enter() {
            self.skip_nested();
            return self.dummy();
        }
        let mut lhs = self.parse_prefix(allow_postfix);
        loop {
            if self.prev_ends_line() {
                break;
            }
            let tok = self.peek();
            match tok.kind {
                TokenKind::Op => {
                    let Some((l_bp, r_bp)) = infix_binding_power(&tok.value) else {
                        break;
                    };
                    if l_bp < min_bp {
                        break;
                    }
                    let op = self.advance();
                    let rhs = if self.prev_ends_line() || !can_start_expression(self.peek()) {
                        self.missing_operand(&format!("Expected an operand after '{}'", op.value))
                    } else {
                        self.parse_expression(r_bp, allow_postfix)
                    };
                    lhs = self.tree.push(NodeData::InfixExpression { op, left: lhs, right: rhs });
                }
                TokenKind::LParen if allow_postfix && self.adjacent() => {
                    let arguments = self.parse_tuple();
                    lhs = self.tree.push(NodeData::CallExpression { callee: lhs, arguments });
                }
                TokenKind::LBracket if allow_postfix && self.adjacent() => {
                    let indexer = self.parse_list();
                    lhs = self.tree.push(NodeData::Array { expression: lhs, indexer });
                }
                _ => break,
            }
        }
        self.leave();
        lhs
    }

    fn parse_prefix(&mut self, allow_postfix: bool) -> NodeId {
        let tok = self.peek();
        if tok.kind == TokenKind::Op && is_prefix_op(&tok.value) {
            let op = self.advance();
            let expression = if self.prev_ends_line() || !can_start_expression(self.peek()) {
                self.missing_operand(&format!("Expected an operand after '{}'", op.value))
            } else {
                self.parse_expression(PREFIX_BP, allow_postfix)
            };
            return self.tree.push(NodeData::PrefixExpression { op, expression });
        }
        if tok.kind == TokenKind::Tilde {
            let op = self.advance();
            let partial = if !self.prev_ends_line()
                && matches!(self.peek().kind, TokenKind::Identifier | TokenKind::QuotedIdentifier)
            {
                Some(self.parse_primary())
            } else {
                self.error_here(CompileErrorCode::MissingOperand, "Expected a partial name after '~'");
                None
            };
            return self.tree.push(NodeData::PartialInjection { op, partial });
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> NodeId {
        match self.peek_kind() {
            TokenKind::Identifier | TokenKind::QuotedIdentifier => {
                let variable = self.advance();
                let var = self.tree.push(NodeData::Variable { variable });
                self.tree.push(NodeData::PrimaryExpression { expression: var })
            }
            TokenKind::StringLiteral
            | TokenKind::MultilineString
            | TokenKind::NumericLiteral
            | TokenKind::ColorLiteral => {
                let literal = self.advance();
                let lit = self.tree.push(NodeData::Literal { literal });
                self.tree.push(NodeData::PrimaryExpression { expression: lit })
            }
            TokenKind::FunctionExpression => {
                let value = self.advance();
                self.tree.push(NodeData::FunctionExpression { value })
            }
            TokenKind::LParen => self.parse_tuple(),
            TokenKind::LBracket => self.parse_list(),
            _ => self.missing_operand("Expected an expression"),
        }
    }

    /// `( e, e )`; a single element without commas is a group.
    fn parse_tuple(&mut self) -> NodeId {
        let open = self.advance();
        let open_error = CompileError::at_token(CompileErrorCode::UnmatchedBracket, "Missing ')'", &open);
        let mut elements = Vec::new();
        let mut commas = Vec::new();
        let mut close = None;

        loop {
            let before = self.pos;
            match self.peek_kind() {
                TokenKind::RParen => {
                    close = Some(self.advance());
                    break;
                }
                TokenKind::Eof | TokenKind::RBrace | TokenKind::LBrace => {
                    self.errors.push(open_error);
                    break;
                }
                TokenKind::Comma => {
                    if elements.len() == commas.len() {
                        let missing = self.missing_operand("Expected an expression before ','");
                        elements.push(missing);
                    }
                    commas.push(Some(self.advance()));
                }
                _ if can_start_expression(self.peek()) => {
                    if elements.len() > commas.len() {
                        self.error_here(CompileErrorCode::UnexpectedToken, "Expected ',' or ')'");
                        commas.push(None);
                    }
                    elements.push(self.parse_expression(0, true));
                }
                _ => self.unexpected("',' or ')'"),
            }
            if self.pos == before && !self.at_eof() {
                self.skip_invalid();
            }
        }

        if elements.len() == 1 && commas.is_empty() {
            let expression = elements[0];
            return self.tree.push(NodeData::GroupExpression { open, expression, close });
        }
        self.tree.push(NodeData::TupleExpression {
            open,
            elements,
            commas,
            close,
        })
    }

    /// `[ attribute, attribute ]`
    fn parse_list(&mut self) -> NodeId {
        let open = self.advance();
        let open_error = CompileError::at_token(CompileErrorCode::UnmatchedBracket, "Missing ']'", &open);
        let mut elements = Vec::new();
        let mut commas = Vec::new();
        let mut close = None;

        loop {
            let before = self.pos;
            match self.peek_kind() {
                TokenKind::RBracket => {
                    close = Some(self.advance());
                    break;
                }
                TokenKind::Eof | TokenKind::RBrace | TokenKind::LBrace => {
                    self.errors.push(open_error);
                    break;
                }
                TokenKind::Comma => {
                    if elements.len() == commas.len() {
                        let missing = self.missing_operand("Expected a setting before ','");
                        elements.push(missing);
                    }
                    commas.push(Some(self.advance()));
                }
                _ => {
                    if elements.len() > commas.len() {
                        self.error_here(CompileErrorCode::UnexpectedToken, "Expected ',' or ']'");
                        commas.push(None);
                    }
                    match self.parse_attribute() {
                        Some(attr) => elements.push(attr),
                        None if elements.len() == commas.len() + 1 => {}
                        None => {
                            commas.pop();
                        }
                    }
                }
            }
            if self.pos == before && !self.at_eof() {
                self.skip_invalid();
            }
        }

        self.tree.push(NodeData::ListExpression {
            open,
            elements,
            commas,
            close,
        })
    }

    /// `name (: value)?` inside a setting list.
    fn parse_attribute(&mut self) -> Option<NodeId> {
        let name = match self.peek_kind() {
            TokenKind::Identifier => Some(self.parse_identifier_stream()),
            TokenKind::QuotedIdentifier | TokenKind::StringLiteral | TokenKind::NumericLiteral => {
                Some(self.parse_primary())
            }
            TokenKind::Colon => {
                self.error_here(CompileErrorCode::EmptyAttributeName, "Expected a setting name before ':'");
                None
            }
            _ => {
                self.unexpected("a setting");
                return None;
            }
        };

        let mut colon = None;
        let mut value = None;
        if self.at(TokenKind::Colon) {
            colon = Some(self.advance());
            value = Some(
                if self.at(TokenKind::Identifier) && self.peek_nth(1).kind == TokenKind::Identifier {
                    self.parse_identifier_stream()
                } else if can_start_expression(self.peek()) {
                    self.parse_expression(0, true)
                } else {
                    self.missing_operand("Expected a setting value after ':'")
                },
            );
        }
        Some(self.tree.push(NodeData::Attribute { name, colon, value }))
    }

    fn parse_identifier_stream(&mut self) -> NodeId {
        let mut identifiers = Vec::new();
        while self.at(TokenKind::Identifier) {
            identifiers.push(self.advance());
        }
        self.tree.push(NodeData::IdentifierStream { identifiers })
    }
}

/// Unknown characters were already reported by the lexer; park them in the
/// next token's invalid list so the parser never sees them. Returns the
/// tokens plus any unknowns with no following token.
fn absorb_unknown_tokens(tokens: Vec<Token>) -> (Vec<Token>, Vec<Token>) {
    let mut out = Vec::with_capacity(tokens.len());
    let mut carry = Vec::new();
    for mut tok in tokens {
        if tok.kind == TokenKind::Unknown {
            carry.push(tok);
            continue;
        }
        if !carry.is_empty() {
            carry.append(&mut tok.leading_invalid);
            tok.leading_invalid = std::mem::take(&mut carry);
        }
        out.push(tok);
    }
    (out, carry)
}

pub fn parse(tokens: Vec<Token>) -> Report<SyntaxTree> {
    let _span = tracing::debug_span!("parse", tokens = tokens.len()).entered();
    let report = Parser::new(tokens).parse();
    debug!(
        nodes = report.value().len(),
        errors = report.errors().len(),
        "parsed token stream"
    );
    report
}

/// Lex and parse in one step.
pub fn parse_source(source: &str) -> Report<SyntaxTree> {
    lex(source).chain(parse)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> SyntaxTree {
        let report = parse_source(source);
        assert!(report.errors().is_empty(), "unexpected errors: {:?}", report.errors());
        report.into_parts().0
    }

    fn element(tree: &SyntaxTree, index: usize) -> &NodeData {
        tree.data(tree.program_body()[index])
    }

    fn block_body(tree: &SyntaxTree, element_id: NodeId) -> Vec<NodeId> {
        match tree.data(element_id) {
            NodeData::ElementDeclaration { body: Some(body), .. } => match tree.data(*body) {
                NodeData::BlockExpression { body, .. } => body.clone(),
                other => panic!("expected block, got {other:?}"),
            },
            other => panic!("expected element, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_table() {
        let source = r#"
            Table users as U [headercolor: #fff] {
                id int [pk]
                name varchar(255) [not null]
            }
        "#;
        let tree = parse_ok(source);
        assert_eq!(tree.program_body().len(), 1);
        match element(&tree, 0) {
            NodeData::ElementDeclaration {
                keyword,
                name,
                alias,
                settings,
                body,
                ..
            } => {
                assert_eq!(keyword.value, "Table");
                assert!(name.is_some() && alias.is_some() && settings.is_some() && body.is_some());
            }
            other => panic!("unexpected {other:?}"),
        }
        let fields = block_body(&tree, tree.program_body()[0]);
        assert_eq!(fields.len(), 2);
        match tree.data(fields[1]) {
            NodeData::FunctionApplication { args, .. } => {
                assert_eq!(tree.node(args[0]).kind(), NodeKind::CallExpression);
                assert_eq!(tree.node(args[1]).kind(), NodeKind::ListExpression);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tree.reconstruct(source), source);
    }

    #[test]
    fn test_fields_on_one_line_split_after_settings() {
        let tree = parse_ok("Table posts { id int [pk] user_id int }");
        let fields = block_body(&tree, tree.program_body()[0]);
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn test_parse_ref_simple_body() {
        let tree = parse_ok("Ref: posts.user_id > users.id [delete: cascade]");
        match element(&tree, 0) {
            NodeData::ElementDeclaration { name, colon, body: Some(body), .. } => {
                assert!(name.is_none());
                assert!(colon.is_some());
                match tree.data(*body) {
                    NodeData::FunctionApplication { callee, args } => {
                        match tree.data(*callee) {
                            NodeData::InfixExpression { op, .. } => assert_eq!(op.value, ">"),
                            other => panic!("unexpected {other:?}"),
                        }
                        assert_eq!(args.len(), 1);
                    }
                    other => panic!("unexpected {other:?}"),
                }
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_member_access_binds_tighter_than_relation() {
        let tree = parse_ok("Ref: a.b.c <> d.e");
        let body = match element(&tree, 0) {
            NodeData::ElementDeclaration { body: Some(body), .. } => *body,
            other => panic!("unexpected {other:?}"),
        };
        let callee = match tree.data(body) {
            NodeData::FunctionApplication { callee, .. } => *callee,
            other => panic!("unexpected {other:?}"),
        };
        match tree.data(callee) {
            NodeData::InfixExpression { op, left, right } => {
                assert_eq!(op.value, "<>");
                assert_eq!(tree.node(*left).kind(), NodeKind::InfixExpression);
                assert_eq!(tree.node(*right).kind(), NodeKind::InfixExpression);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_identifier_stream_setting() {
        let tree = parse_ok("Table t { id int [pk pk, not null] }");
        let attrs: Vec<String> = tree
            .nodes()
            .filter_map(|n| match &n.data {
                NodeData::IdentifierStream { identifiers } => Some(
                    identifiers.iter().map(|t| t.value.as_str()).collect::<Vec<_>>().join(" "),
                ),
                _ => None,
            })
            .collect();
        assert_eq!(attrs, vec!["pk pk", "not null"]);
    }

    #[test]
    fn test_sub_elements_and_injection() {
        let tree = parse_ok("Table t {\n  ~base\n  id int\n  Note: 'hi'\n  indexes {\n    (a, b) [unique]\n  }\n}");
        let fields = block_body(&tree, tree.program_body()[0]);
        let kinds: Vec<NodeKind> = fields.iter().map(|f| tree.node(*f).kind()).collect();
        assert_eq!(
            kinds,
            vec![
                NodeKind::FunctionApplication,
                NodeKind::FunctionApplication,
                NodeKind::ElementDeclaration,
                NodeKind::ElementDeclaration,
            ]
        );
    }

    #[test]
    fn test_array_type_requires_adjacency() {
        let tree = parse_ok("Table t { tags varchar[] [note: 'x'] }");
        let fields = block_body(&tree, tree.program_body()[0]);
        match tree.data(fields[0]) {
            NodeData::FunctionApplication { args, .. } => {
                assert_eq!(tree.node(args[0]).kind(), NodeKind::Array);
                assert_eq!(tree.node(args[1]).kind(), NodeKind::ListExpression);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_missing_closing_brace_recovers() {
        let source = "Table users {\n  id int\n";
        let report = parse_source(source);
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].code, CompileErrorCode::UnmatchedBracket);
        assert_eq!(report.value().reconstruct(source), source);
    }

    #[test]
    fn test_missing_operand_inserts_dummy() {
        let source = "Ref: a.b >\nTable t { id int }";
        let report = parse_source(source);
        assert_eq!(report.errors()[0].code, CompileErrorCode::MissingOperand);
        let tree = report.value();
        assert_eq!(tree.program_body().len(), 2);
        assert!(tree.nodes().any(|n| n.kind() == NodeKind::Dummy));
        assert_eq!(tree.reconstruct(source), source);
    }

    #[test]
    fn test_junk_is_kept_as_invalid_tokens() {
        let source = "} ) Table t { id int ; }";
        let report = parse_source(source);
        assert!(report.has_errors());
        assert_eq!(report.value().program_body().len(), 1);
        assert_eq!(report.value().reconstruct(source), source);
    }

    #[test]
    fn test_missing_body() {
        let report = parse_source("Table users\nTable posts { id int }");
        assert_eq!(report.errors()[0].code, CompileErrorCode::ExpectedElementBody);
        assert_eq!(report.value().program_body().len(), 2);
    }

    #[test]
    fn test_deep_nesting_is_bounded() {
        let source = format!("Table t {{ x int [default: {}1{}] }}", "(".repeat(500), ")".repeat(500));
        let report = parse_source(&source);
        assert!(report
            .errors()
            .iter()
            .any(|e| e.code == CompileErrorCode::NestingTooDeep));
        assert_eq!(report.value().reconstruct(&source), source);
    }

    #[test]
    fn test_empty_token_stream_gets_eof() {
        let report = parse(Vec::new());
        assert!(!report.has_errors());
        assert!(report.value().program_body().is_empty());
    }
}
