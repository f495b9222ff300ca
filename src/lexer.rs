use tracing::debug;

use crate::errors::{CompileError, CompileErrorCode, Report};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    QuotedIdentifier, // "..."
    StringLiteral,    // '...'
    MultilineString,  // '''...'''
    NumericLiteral,
    ColorLiteral,       // #abc
    FunctionExpression, // `...`

    LParen,    // (
    RParen,    // )
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    Comma,     // ,
    Colon,     // :
    Semicolon, // ;
    Tilde,     // ~
    Op,

    Space,
    Tab,
    Newline,
    SingleLineComment,
    MultilineComment,

    Unknown,
    Eof,
}

impl TokenKind {
    pub fn is_trivia(self) -> bool {
        matches!(
            self,
            TokenKind::Space
                | TokenKind::Tab
                | TokenKind::Newline
                | TokenKind::SingleLineComment
                | TokenKind::MultilineComment
        )
    }

    pub fn is_string(self) -> bool {
        matches!(self, TokenKind::StringLiteral | TokenKind::MultilineString)
    }
}

/// Zero-based line and column (columns count chars).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// Semantic value: unescaped content for literals, raw text otherwise.
    pub value: String,
    pub start: usize,
    pub end: usize,
    pub start_pos: Position,
    pub end_pos: Position,
    pub leading_trivia: Vec<Token>,
    pub trailing_trivia: Vec<Token>,
    /// Tokens skipped by the parser while recovering, kept for reprinting.
    pub leading_invalid: Vec<Token>,
    pub trailing_invalid: Vec<Token>,
}

impl Token {
    fn bare(kind: TokenKind, value: String, start: usize, end: usize, start_pos: Position, end_pos: Position) -> Self {
        Self {
            kind,
            value,
            start,
            end,
            start_pos,
            end_pos,
            leading_trivia: Vec::new(),
            trailing_trivia: Vec::new(),
            leading_invalid: Vec::new(),
            trailing_invalid: Vec::new(),
        }
    }

    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.value == op
    }

    pub fn is_identifier(&self, name: &str) -> bool {
        self.kind == TokenKind::Identifier && self.value.eq_ignore_ascii_case(name)
    }

    /// True when a newline sits in this token's trailing trivia.
    pub fn ends_line(&self) -> bool {
        self.trailing_trivia
            .iter()
            .any(|t| t.kind == TokenKind::Newline)
    }

    /// True when any trivia separates this token from the next one.
    pub fn has_trailing_trivia(&self) -> bool {
        !self.trailing_trivia.is_empty() || !self.trailing_invalid.is_empty()
    }

    pub fn full_start(&self) -> usize {
        if let Some(first) = self.leading_invalid.first() {
            return first.full_start();
        }
        self.leading_trivia.first().map_or(self.start, |t| t.start)
    }

    pub fn full_end(&self) -> usize {
        if let Some(last) = self.trailing_invalid.last() {
            return last.full_end();
        }
        self.trailing_trivia.last().map_or(self.end, |t| t.end)
    }

    /// Push every piece of this token (invalid tokens, trivia, core) in source order.
    pub fn flatten_into<'a>(&'a self, out: &mut Vec<&'a Token>) {
        for invalid in &self.leading_invalid {
            invalid.flatten_into(out);
        }
        out.extend(self.leading_trivia.iter());
        out.push(self);
        out.extend(self.trailing_trivia.iter());
        for invalid in &self.trailing_invalid {
            invalid.flatten_into(out);
        }
    }
}

/// Flatten a token stream including trivia and invalid tokens.
pub fn flatten(tokens: &[Token]) -> Vec<&Token> {
    let mut out = Vec::with_capacity(tokens.len() * 2);
    for token in tokens {
        token.flatten_into(&mut out);
    }
    out
}

const OP_CHARS: &str = "+-*/%<>=!&|^";

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

pub struct Lexer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    errors: Vec<CompileError>,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            src: input,
            pos: 0,
            line: 0,
            column: 0,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn starts_with(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s)
    }

    fn position(&self) -> Position {
        Position {
            line: self.line,
            column: self.column,
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 0;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn at_newline(&self) -> bool {
        self.starts_with("\n") || self.starts_with("\r\n")
    }

    fn error(&mut self, code: CompileErrorCode, message: impl Into<String>, start: usize, start_pos: Position) {
        let err = CompileError::new(code, message, (start, start_pos), (self.pos, self.position()));
        self.errors.push(err);
    }

    /// Produce the next flat token, trivia included. `None` at end of input.
    pub fn next_token(&mut self) -> Option<Token> {
        let start = self.pos;
        let start_pos = self.position();
        let c = self.peek()?;

        let (kind, value) = match c {
            '\n' => {
                self.bump();
                (TokenKind::Newline, String::from("\n"))
            }
            '\r' if self.peek_nth(1) == Some('\n') => {
                self.bump();
                self.bump();
                (TokenKind::Newline, String::from("\r\n"))
            }
            '\t' => {
                while self.peek() == Some('\t') {
                    self.bump();
                }
                (TokenKind::Tab, self.src[start..self.pos].to_string())
            }
            c if c.is_whitespace() => {
                while let Some(c) = self.peek() {
                    if c == '\n' || c == '\t' || !c.is_whitespace() || self.starts_with("\r\n") {
                        break;
                    }
                    self.bump();
                }
                (TokenKind::Space, self.src[start..self.pos].to_string())
            }
            '/' if self.peek_nth(1) == Some('/') => {
                while self.peek().is_some() && !self.at_newline() {
                    self.bump();
                }
                (TokenKind::SingleLineComment, self.src[start..self.pos].to_string())
            }
            '/' if self.peek_nth(1) == Some('*') => self.read_block_comment(start, start_pos),
            '(' => self.single(TokenKind::LParen),
            ')' => self.single(TokenKind::RParen),
            '{' => self.single(TokenKind::LBrace),
            '}' => self.single(TokenKind::RBrace),
            '[' => self.single(TokenKind::LBracket),
            ']' => self.single(TokenKind::RBracket),
            ',' => self.single(TokenKind::Comma),
            ':' => self.single(TokenKind::Colon),
            ';' => self.single(TokenKind::Semicolon),
            '~' => self.single(TokenKind::Tilde),
            '.' => self.single(TokenKind::Op),
            c if OP_CHARS.contains(c) => {
                while let Some(c) = self.peek() {
                    if !OP_CHARS.contains(c) || self.starts_with("//") || self.starts_with("/*") {
                        break;
                    }
                    self.bump();
                }
                (TokenKind::Op, self.src[start..self.pos].to_string())
            }
            '"' => self.read_quoted(start, start_pos),
            '\'' if self.starts_with("'''") => self.read_multiline_string(start, start_pos),
            '\'' => self.read_string(start, start_pos),
            '`' => self.read_function_expression(start, start_pos),
            '#' => {
                self.bump();
                while self.peek().is_some_and(|c| c.is_alphanumeric()) {
                    self.bump();
                }
                (TokenKind::ColorLiteral, self.src[start..self.pos].to_string())
            }
            c if c.is_ascii_digit() => self.read_number_or_identifier(start),
            c if is_ident_start(c) => {
                while self.peek().is_some_and(is_ident_char) {
                    self.bump();
                }
                (TokenKind::Identifier, self.src[start..self.pos].to_string())
            }
            c => {
                self.bump();
                self.error(
                    CompileErrorCode::UnknownSymbol,
                    format!("Unexpected character '{c}'"),
                    start,
                    start_pos,
                );
                (TokenKind::Unknown, c.to_string())
            }
        };

        Some(Token::bare(kind, value, start, self.pos, start_pos, self.position()))
    }

    fn single(&mut self, kind: TokenKind) -> (TokenKind, String) {
        let c = self.bump().unwrap_or_default();
        (kind, c.to_string())
    }

    fn read_block_comment(&mut self, start: usize, start_pos: Position) -> (TokenKind, String) {
        self.bump();
        self.bump();
        loop {
            if self.starts_with("*/") {
                self.bump();
                self.bump();
                break;
            }
            if self.bump().is_none() {
                self.error(
                    CompileErrorCode::UnclosedBlockComment,
                    "Unclosed block comment",
                    start,
                    start_pos,
                );
                break;
            }
        }
        (TokenKind::MultilineComment, self.src[start..self.pos].to_string())
    }

    fn read_escape(&mut self, out: &mut String) {
        // the backslash is already consumed
        match self.peek() {
            None => out.push('\\'),
            Some(_) if self.at_newline() => out.push('\\'),
            Some('u') => {
                let hex: String = self.src[self.pos + 1..].chars().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) if hex.len() == 4 => {
                        for _ in 0..5 {
                            self.bump();
                        }
                        out.push(decoded);
                    }
                    _ => {
                        self.bump();
                        out.push('u');
                    }
                }
            }
            Some(c) => {
                self.bump();
                out.push(match c {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    other => other,
                });
            }
        }
    }

    /// Single-line delimited literal shared by `'...'` and `"..."`.
    fn read_delimited(&mut self, delimiter: char, start: usize, start_pos: Position) -> String {
        self.bump();
        let mut value = String::new();
        loop {
            match self.peek() {
                Some(c) if c == delimiter => {
                    self.bump();
                    return value;
                }
                Some('\\') => {
                    self.bump();
                    self.read_escape(&mut value);
                }
                Some(_) if self.at_newline() => break,
                Some(c) => {
                    self.bump();
                    value.push(c);
                }
                None => break,
            }
        }
        let what = if delimiter == '"' { "quoted identifier" } else { "string literal" };
        self.error(
            CompileErrorCode::UnclosedStringLiteral,
            format!("Unclosed {what}"),
            start,
            start_pos,
        );
        value
    }

    fn read_string(&mut self, start: usize, start_pos: Position) -> (TokenKind, String) {
        (TokenKind::StringLiteral, self.read_delimited('\'', start, start_pos))
    }

    fn read_quoted(&mut self, start: usize, start_pos: Position) -> (TokenKind, String) {
        (TokenKind::QuotedIdentifier, self.read_delimited('"', start, start_pos))
    }

    fn read_multiline_string(&mut self, start: usize, start_pos: Position) -> (TokenKind, String) {
        for _ in 0..3 {
            self.bump();
        }
        let mut value = String::new();
        loop {
            if self.starts_with("'''") {
                for _ in 0..3 {
                    self.bump();
                }
                return (TokenKind::MultilineString, value);
            }
            match self.bump() {
                Some('\\') => match self.peek() {
                    Some('\'') | Some('\\') => {
                        if let Some(c) = self.bump() {
                            value.push(c);
                        }
                    }
                    Some('\n') => {
                        self.bump();
                    }
                    Some('\r') if self.starts_with("\r\n") => {
                        self.bump();
                        self.bump();
                    }
                    _ => value.push('\\'),
                },
                Some(c) => value.push(c),
                None => break,
            }
        }
        self.error(
            CompileErrorCode::UnclosedStringLiteral,
            "Unclosed multi-line string literal",
            start,
            start_pos,
        );
        (TokenKind::MultilineString, value)
    }

    fn read_function_expression(&mut self, start: usize, start_pos: Position) -> (TokenKind, String) {
        self.bump();
        let mut value = String::new();
        loop {
            match self.bump() {
                Some('`') => return (TokenKind::FunctionExpression, value),
                Some(c) => value.push(c),
                None => break,
            }
        }
        self.error(
            CompileErrorCode::UnclosedFunctionExpression,
            "Unclosed function expression",
            start,
            start_pos,
        );
        (TokenKind::FunctionExpression, value)
    }

    fn read_number_or_identifier(&mut self, start: usize) -> (TokenKind, String) {
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
        }
        // `2fa_enabled` style names
        if self.peek().is_some_and(|c| is_ident_start(c) && !matches!(c, 'e' | 'E'))
            || (matches!(self.peek(), Some('e' | 'E')) && !self.exponent_follows())
        {
            while self.peek().is_some_and(is_ident_char) {
                self.bump();
            }
            return (TokenKind::Identifier, self.src[start..self.pos].to_string());
        }
        if self.peek() == Some('.') && self.peek_nth(1).is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        if self.exponent_follows() {
            self.bump();
            if matches!(self.peek(), Some('+' | '-')) {
                self.bump();
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.bump();
            }
        }
        (TokenKind::NumericLiteral, self.src[start..self.pos].to_string())
    }

    fn exponent_follows(&self) -> bool {
        if !matches!(self.peek(), Some('e' | 'E')) {
            return false;
        }
        match self.peek_nth(1) {
            Some('+' | '-') => self.peek_nth(2).is_some_and(|c| c.is_ascii_digit()),
            Some(c) => c.is_ascii_digit(),
            None => false,
        }
    }

    /// Lex the whole input: real tokens with trivia attached, ending in EOF.
    pub fn tokenize(mut self) -> Report<Vec<Token>> {
        let mut flat = Vec::new();
        while let Some(tok) = self.next_token() {
            flat.push(tok);
        }
        let eof_pos = self.position();
        flat.push(Token::bare(
            TokenKind::Eof,
            String::new(),
            self.pos,
            self.pos,
            eof_pos,
            eof_pos,
        ));
        Report::new(attach_trivia(flat), self.errors)
    }
}

/// Fold trivia into the neighbouring real tokens.
///
/// Trivia after a real token up to and including the first newline trails it;
/// everything else leads the next real token.
fn attach_trivia(flat: Vec<Token>) -> Vec<Token> {
    let mut tokens: Vec<Token> = Vec::new();
    let mut leading = Vec::new();
    let mut trailing_open = false;

    for tok in flat {
        if tok.kind.is_trivia() {
            match tokens.last_mut() {
                Some(prev) if trailing_open => {
                    trailing_open = tok.kind != TokenKind::Newline;
                    prev.trailing_trivia.push(tok);
                }
                _ => leading.push(tok),
            }
            continue;
        }
        let mut tok = tok;
        tok.leading_trivia = std::mem::take(&mut leading);
        trailing_open = tok.kind != TokenKind::Eof;
        tokens.push(tok);
    }
    tokens
}

pub fn lex(source: &str) -> Report<Vec<Token>> {
    let _span = tracing::debug_span!("lex", bytes = source.len()).entered();
    let report = Lexer::new(source).tokenize();
    debug!(
        tokens = report.value().len(),
        errors = report.errors().len(),
        "lexed source"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).value().iter().map(|t| t.kind).collect()
    }

    fn reconstruct(source: &str, tokens: &[Token]) -> String {
        flatten(tokens)
            .iter()
            .map(|t| &source[t.start..t.end])
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            kinds("Table users { id int [pk] }"),
            vec![
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::LBrace,
                TokenKind::Identifier,
                TokenKind::Identifier,
                TokenKind::LBracket,
                TokenKind::Identifier,
                TokenKind::RBracket,
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_unicode_ident() {
        let report = lex("Table ユーザー { 名前 varchar }");
        let tokens = report.value();
        assert_eq!(tokens[1].value, "ユーザー");
        assert_eq!(tokens[3].value, "名前");
        assert!(!report.has_errors());
    }

    #[test]
    fn test_trivia_attachment() {
        let source = "// header\nTable a // trailing\n  b";
        let report = lex(source);
        let tokens = report.value();
        assert_eq!(tokens[0].leading_trivia.len(), 2);
        assert_eq!(tokens[1].value, "a");
        assert!(tokens[1].ends_line());
        assert_eq!(tokens[1].trailing_trivia.last().unwrap().kind, TokenKind::Newline);
        assert_eq!(tokens[2].leading_trivia[0].kind, TokenKind::Space);
        assert_eq!(reconstruct(source, tokens), source);
    }

    #[test]
    fn test_positions_reset_after_newline() {
        let report = lex("a\n  bb");
        let b = &report.value()[1];
        assert_eq!(b.start_pos, Position { line: 1, column: 2 });
        assert_eq!(b.end_pos, Position { line: 1, column: 4 });
        assert_eq!(b.start, 4);
    }

    #[test]
    fn test_string_escapes() {
        let report = lex(r"'it\'s\n' ");
        assert_eq!(report.value()[0].kind, TokenKind::StringLiteral);
        assert_eq!(report.value()[0].value, "it's\n");
    }

    #[test]
    fn test_multiline_string() {
        let source = "'''\n  line one\n  it\\'s\n'''";
        let report = lex(source);
        let tok = &report.value()[0];
        assert_eq!(tok.kind, TokenKind::MultilineString);
        assert_eq!(tok.value, "\n  line one\n  it's\n");
        assert_eq!(tok.end_pos.line, 3);
    }

    #[test]
    fn test_unclosed_string_stops_at_newline() {
        let report = lex("'abc\nTable");
        assert_eq!(report.errors().len(), 1);
        assert_eq!(report.errors()[0].code, CompileErrorCode::UnclosedStringLiteral);
        assert_eq!(report.value()[0].value, "abc");
        assert_eq!(report.value()[1].value, "Table");
    }

    #[test]
    fn test_function_expression_and_color() {
        let report = lex("`now()` #fff #a1b2c3");
        let tokens = report.value();
        assert_eq!(tokens[0].kind, TokenKind::FunctionExpression);
        assert_eq!(tokens[0].value, "now()");
        assert_eq!(tokens[1].kind, TokenKind::ColorLiteral);
        assert_eq!(tokens[2].value, "#a1b2c3");
    }

    #[test]
    fn test_numbers_and_digit_led_identifiers() {
        let report = lex("12 1.5 2e10 2fa_code 1e");
        let tokens = report.value();
        assert_eq!(tokens[0].kind, TokenKind::NumericLiteral);
        assert_eq!(tokens[1].value, "1.5");
        assert_eq!(tokens[2].kind, TokenKind::NumericLiteral);
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].value, "2fa_code");
        assert_eq!(tokens[4].kind, TokenKind::Identifier);
    }

    #[test]
    fn test_operators() {
        let report = lex("a.b <> c.d > -1 ~p");
        let ops: Vec<&str> = report
            .value()
            .iter()
            .filter(|t| t.kind == TokenKind::Op || t.kind == TokenKind::Tilde)
            .map(|t| t.value.as_str())
            .collect();
        assert_eq!(ops, vec![".", "<>", ".", ">", "-", "~"]);
    }

    #[test]
    fn test_comment_not_glued_to_operator() {
        let report = lex(">// note");
        assert_eq!(report.value()[0].value, ">");
        assert_eq!(report.value()[0].trailing_trivia[0].kind, TokenKind::SingleLineComment);
    }

    #[test]
    fn test_unknown_character() {
        let source = "a @ b";
        let report = lex(source);
        assert_eq!(report.errors()[0].code, CompileErrorCode::UnknownSymbol);
        assert_eq!(report.value()[1].kind, TokenKind::Unknown);
        assert_eq!(reconstruct(source, report.value()), source);
    }

    #[test]
    fn test_unclosed_block_comment() {
        let source = "Table /* never closed";
        let report = lex(source);
        assert_eq!(report.errors()[0].code, CompileErrorCode::UnclosedBlockComment);
        assert_eq!(reconstruct(source, report.value()), source);
    }

    #[test]
    fn test_crlf_is_one_newline() {
        let report = lex("a\r\nb");
        let a = &report.value()[0];
        assert_eq!(a.trailing_trivia.len(), 1);
        assert_eq!(a.trailing_trivia[0].value, "\r\n");
        assert_eq!(report.value()[1].start_pos, Position { line: 1, column: 0 });
    }

    #[test]
    fn test_empty_source_has_eof() {
        let report = lex("");
        assert_eq!(report.value().len(), 1);
        assert_eq!(report.value()[0].kind, TokenKind::Eof);
    }
}
