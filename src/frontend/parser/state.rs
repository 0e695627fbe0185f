//! Parser state and token stream management

use super::super::lexer::tokens::*;
use super::ParseError;
use crate::util::span::Position;

/// Binding power levels for Pratt parser
pub const BP_LOWEST: u8 = 0;
pub const BP_ASSIGN: u8 = 10;
pub const BP_TERNARY: u8 = 12;
pub const BP_RANGE: u8 = 15;
pub const BP_OR: u8 = 20;
pub const BP_AND: u8 = 30;
pub const BP_EQ: u8 = 40;
pub const BP_CMP: u8 = 50;
pub const BP_BIT_OR: u8 = 52;
pub const BP_BIT_AND: u8 = 54;
pub const BP_SHIFT: u8 = 56;
pub const BP_ADD: u8 = 60;
pub const BP_MUL: u8 = 70;
pub const BP_NEG: u8 = 75;
pub const BP_POW: u8 = 78;
pub const BP_UNARY: u8 = 80;
pub const BP_CALL: u8 = 90;

/// Local variable scope
#[derive(Debug, Default)]
pub struct LocalScope {
    pub vars: Vec<String>,
    /// Method and class bodies do not see enclosing locals
    pub opaque: bool,
}

/// Parser state for tracking position and locals
#[derive(Debug)]
pub struct ParserState<'a> {
    /// Token stream
    tokens: &'a [Token],
    /// Current position in token stream
    pos: usize,
    /// Lexical scopes, innermost last
    pub(super) scopes: Vec<LocalScope>,
    /// Parsing a command argument list or loop condition, where `do`
    /// belongs to an outer construct
    pub(super) no_do: bool,
}

/// Human readable token name for diagnostics
pub fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Eof => "end-of-input".to_string(),
        TokenKind::Newline => "end-of-line".to_string(),
        TokenKind::Identifier(n) | TokenKind::Constant(n) => format!("'{}'", n),
        TokenKind::IVar(n) | TokenKind::GVar(n) => format!("'{}'", n),
        TokenKind::Label(n) => format!("'{}:'", n),
        TokenKind::IntLiteral(n) => format!("integer {}", n),
        TokenKind::FloatLiteral(f) => format!("float {}", f),
        TokenKind::StringLiteral(_) | TokenKind::Words(_) => "string literal".to_string(),
        TokenKind::Symbol(s) => format!("symbol :{}", s),
        other => {
            if let Some(op) = other.operator_name() {
                return format!("'{}'", op);
            }
            let text = match other {
                TokenKind::KwDef => "def",
                TokenKind::KwEnd => "end",
                TokenKind::KwIf => "if",
                TokenKind::KwElsif => "elsif",
                TokenKind::KwElse => "else",
                TokenKind::KwUnless => "unless",
                TokenKind::KwWhile => "while",
                TokenKind::KwUntil => "until",
                TokenKind::KwCase => "case",
                TokenKind::KwWhen => "when",
                TokenKind::KwThen => "then",
                TokenKind::KwDo => "do",
                TokenKind::KwReturn => "return",
                TokenKind::KwBreak => "break",
                TokenKind::KwNext => "next",
                TokenKind::KwBegin => "begin",
                TokenKind::KwRescue => "rescue",
                TokenKind::KwEnsure => "ensure",
                TokenKind::KwClass => "class",
                TokenKind::KwSelf => "self",
                TokenKind::KwNil => "nil",
                TokenKind::KwTrue => "true",
                TokenKind::KwFalse => "false",
                TokenKind::KwAnd => "and",
                TokenKind::KwOr => "or",
                TokenKind::KwNot => "not",
                TokenKind::KwYield => "yield",
                TokenKind::KwSuper => "super",
                TokenKind::Assign => "=",
                TokenKind::OpAssign(_) => "operator-assignment",
                TokenKind::Dot => ".",
                TokenKind::DotDot => "..",
                TokenKind::DotDotDot => "...",
                TokenKind::ColonColon => "::",
                TokenKind::Colon => ":",
                TokenKind::Question => "?",
                TokenKind::Comma => ",",
                TokenKind::Semicolon => ";",
                TokenKind::LParen => "(",
                TokenKind::RParen => ")",
                TokenKind::LBracket => "[",
                TokenKind::RBracket => "]",
                TokenKind::LBrace => "{",
                TokenKind::RBrace => "}",
                TokenKind::FatArrow => "=>",
                TokenKind::Arrow => "->",
                TokenKind::AndAnd => "&&",
                TokenKind::OrOr => "||",
                _ => "token",
            };
            format!("'{}'", text)
        }
    }
}

impl<'a> ParserState<'a> {
    /// Create a new parser state
    #[inline]
    pub fn new(tokens: &'a [Token]) -> Self {
        Self {
            tokens,
            pos: 0,
            scopes: vec![LocalScope::default()],
            no_do: false,
        }
    }

    /// Check if at end of token stream
    #[inline]
    pub fn at_end(&self) -> bool {
        self.pos >= self.tokens.len() || matches!(self.tokens[self.pos].kind, TokenKind::Eof)
    }

    /// Get current token
    #[inline]
    pub fn current(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    /// Get current token kind
    #[inline]
    pub fn kind(&self) -> &'a TokenKind {
        self.current().map_or(&TokenKind::Eof, |t| &t.kind)
    }

    #[inline]
    pub fn at(
        &self,
        kind: &TokenKind,
    ) -> bool {
        self.kind() == kind
    }

    /// Peek at next token
    #[inline]
    pub fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos + 1)
    }

    #[inline]
    pub fn peek_kind(&self) -> &'a TokenKind {
        self.peek().map_or(&TokenKind::Eof, |t| &t.kind)
    }

    /// Whitespace precedes the current token
    #[inline]
    pub fn space_before(&self) -> bool {
        self.current().is_some_and(|t| t.space_before)
    }

    /// Position of the current token
    #[inline]
    pub fn position(&self) -> Position {
        self.current()
            .or_else(|| self.tokens.last())
            .map_or(Position::start(), |t| t.pos)
    }

    /// Advance to next token
    #[inline]
    pub fn bump(&mut self) {
        if !self.at_end() {
            self.pos += 1;
        }
    }

    /// Skip a specific token
    #[inline]
    pub fn skip(
        &mut self,
        kind: &TokenKind,
    ) -> bool {
        if self.at(kind) {
            self.bump();
            true
        } else {
            false
        }
    }

    /// Expect a specific token
    pub fn expect(
        &mut self,
        kind: &TokenKind,
    ) -> Result<Position, ParseError> {
        let pos = self.position();
        if self.skip(kind) {
            Ok(pos)
        } else {
            Err(self.expected(&describe(kind)))
        }
    }

    /// Error for the current token
    pub fn unexpected(&self) -> ParseError {
        ParseError::UnexpectedToken {
            found: describe(self.kind()),
            pos: self.position(),
        }
    }

    pub fn expected(
        &self,
        what: &str,
    ) -> ParseError {
        ParseError::ExpectedToken {
            expected: what.to_string(),
            found: describe(self.kind()),
            pos: self.position(),
        }
    }

    /// Check for a statement terminator
    #[inline]
    pub fn at_term(&self) -> bool {
        matches!(self.kind(), TokenKind::Newline | TokenKind::Semicolon)
    }

    /// Skip newlines and semicolons
    pub fn skip_terms(&mut self) {
        while self.at_term() {
            self.bump();
        }
    }

    /// Skip newlines only
    pub fn skip_newlines(&mut self) {
        while self.at(&TokenKind::Newline) {
            self.bump();
        }
    }

    // ------------------------------------------------------------------
    // Locals
    // ------------------------------------------------------------------

    pub fn push_scope(
        &mut self,
        opaque: bool,
    ) {
        self.scopes.push(LocalScope {
            vars: Vec::new(),
            opaque,
        });
    }

    pub fn pop_scope(&mut self) -> Vec<String> {
        self.scopes.pop().map(|s| s.vars).unwrap_or_default()
    }

    /// Local variable visible from the current scope
    pub fn is_local(
        &self,
        name: &str,
    ) -> bool {
        for scope in self.scopes.iter().rev() {
            if scope.vars.iter().any(|v| v == name) {
                return true;
            }
            if scope.opaque {
                break;
            }
        }
        false
    }

    /// Declare a local in the innermost scope unless already visible
    pub fn declare(
        &mut self,
        name: &str,
    ) {
        if self.is_local(name) {
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.vars.push(name.to_string());
        }
    }

    /// Run `f` with the `no_do` flag set to `value`
    pub fn with_no_do<T>(
        &mut self,
        value: bool,
        f: impl FnOnce(&mut Self) -> T,
    ) -> T {
        let saved = self.no_do;
        self.no_do = value;
        let out = f(self);
        self.no_do = saved;
        out
    }
}

/// Token that may begin an expression
pub fn can_start_expr(kind: &TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Identifier(_)
            | TokenKind::Constant(_)
            | TokenKind::IVar(_)
            | TokenKind::GVar(_)
            | TokenKind::Label(_)
            | TokenKind::IntLiteral(_)
            | TokenKind::FloatLiteral(_)
            | TokenKind::StringLiteral(_)
            | TokenKind::Symbol(_)
            | TokenKind::Words(_)
            | TokenKind::KwNil
            | TokenKind::KwTrue
            | TokenKind::KwFalse
            | TokenKind::KwSelf
            | TokenKind::KwNot
            | TokenKind::KwDef
            | TokenKind::KwIf
            | TokenKind::KwUnless
            | TokenKind::KwWhile
            | TokenKind::KwUntil
            | TokenKind::KwCase
            | TokenKind::KwBegin
            | TokenKind::KwClass
            | TokenKind::KwYield
            | TokenKind::KwSuper
            | TokenKind::Arrow
            | TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace
            | TokenKind::Minus
            | TokenKind::Plus
            | TokenKind::Bang
            | TokenKind::Tilde
            | TokenKind::ColonColon
    )
}
