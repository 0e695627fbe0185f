//! Lexer module
//!
//! Line breaks are significant: a `Newline` token ends a statement unless the
//! previous token expects a continuation (`x +`, `foo(`, `a,`), the line ends
//! with a backslash, or the next line starts with `.`.

pub mod tokens;

use crate::util::span::Position;
pub use tokens::{keyword, StrSegment, Token, TokenKind};

pub use tokenizer::tokenize;

/// Lexer error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LexError {
    #[error("unexpected character '{ch}'")]
    UnexpectedChar { ch: char, pos: Position },
    #[error("unterminated string")]
    UnterminatedString { pos: Position },
    #[error("unterminated interpolation")]
    UnterminatedInterpolation { pos: Position },
    #[error("unterminated comment")]
    UnterminatedComment { pos: Position },
    #[error("invalid escape sequence '\\{sequence}'")]
    InvalidEscape { sequence: String, pos: Position },
    #[error("invalid number literal '{text}'")]
    InvalidNumber { text: String, pos: Position },
}

impl LexError {
    pub fn pos(&self) -> Position {
        match self {
            LexError::UnexpectedChar { pos, .. }
            | LexError::UnterminatedString { pos }
            | LexError::UnterminatedInterpolation { pos }
            | LexError::UnterminatedComment { pos }
            | LexError::InvalidEscape { pos, .. }
            | LexError::InvalidNumber { pos, .. } => *pos,
        }
    }
}

/// Tokenize source code
mod tokenizer {
    use super::*;

    pub fn tokenize(source: &str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        lexer.lex(false)
    }

    struct Lexer {
        chars: Vec<char>,
        index: usize,
        offset: usize,
        line: usize,
        column: usize,
        /// Whitespace seen since the last token
        space: bool,
    }

    fn is_ident_start(c: char) -> bool {
        c.is_alphabetic() || c == '_'
    }

    fn is_ident_char(c: char) -> bool {
        c.is_alphanumeric() || c == '_'
    }

    impl Lexer {
        fn new(source: &str) -> Self {
            Self {
                chars: source.chars().collect(),
                index: 0,
                offset: 0,
                line: 1,
                column: 1,
                space: false,
            }
        }

        fn position(&self) -> Position {
            Position::new(self.line, self.column, self.offset)
        }

        fn peek(&self) -> Option<char> {
            self.chars.get(self.index).copied()
        }

        fn peek_at(
            &self,
            n: usize,
        ) -> Option<char> {
            self.chars.get(self.index + n).copied()
        }

        fn advance(&mut self) -> Option<char> {
            let c = self.peek()?;
            self.index += 1;
            self.offset += c.len_utf8();
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            Some(c)
        }

        fn eat(
            &mut self,
            c: char,
        ) -> bool {
            if self.peek() == Some(c) {
                self.advance();
                true
            } else {
                false
            }
        }

        fn at_line_start(&self) -> bool {
            self.index == 0 || self.chars.get(self.index - 1) == Some(&'\n')
        }

        fn push(
            &mut self,
            out: &mut Vec<Token>,
            kind: TokenKind,
            pos: Position,
        ) {
            match kind {
                TokenKind::Newline => {
                    let continues = out.last().map_or(true, |t| t.kind.continues_line());
                    if !continues {
                        out.push(Token {
                            kind,
                            pos,
                            space_before: self.space,
                        });
                    }
                    self.space = true;
                    return;
                }
                // a line starting with `.` continues a method chain
                TokenKind::Dot => {
                    if matches!(out.last(), Some(t) if t.kind == TokenKind::Newline) {
                        out.pop();
                    }
                }
                _ => {}
            }
            out.push(Token {
                kind,
                pos,
                space_before: self.space,
            });
            self.space = false;
        }

        /// Lex until end of input, or the `}` closing an interpolation.
        fn lex(
            &mut self,
            interpolation: bool,
        ) -> Result<Vec<Token>, LexError> {
            let start = self.position();
            let mut out: Vec<Token> = Vec::new();
            let mut depth = 0usize;
            loop {
                let pos = self.position();
                let Some(c) = self.peek() else {
                    if interpolation {
                        return Err(LexError::UnterminatedInterpolation { pos: start });
                    }
                    break;
                };
                match c {
                    ' ' | '\t' | '\r' => {
                        self.advance();
                        self.space = true;
                    }
                    '\\' if self.peek_at(1) == Some('\n') => {
                        self.advance();
                        self.advance();
                        self.space = true;
                    }
                    '\n' => {
                        self.advance();
                        self.push(&mut out, TokenKind::Newline, pos);
                    }
                    '#' => {
                        while self.peek().is_some_and(|c| c != '\n') {
                            self.advance();
                        }
                        self.space = true;
                    }
                    '=' if self.at_line_start() && self.starts_with("=begin") => {
                        self.block_comment()?;
                    }
                    '}' if interpolation && depth == 0 => {
                        self.advance();
                        out.push(Token::new(TokenKind::Eof, pos));
                        return Ok(out);
                    }
                    '{' => {
                        depth += 1;
                        self.advance();
                        self.push(&mut out, TokenKind::LBrace, pos);
                    }
                    '}' => {
                        depth = depth.saturating_sub(1);
                        self.advance();
                        self.push(&mut out, TokenKind::RBrace, pos);
                    }
                    '"' => {
                        self.advance();
                        let segments = self.double_quoted('"', pos)?;
                        self.push(&mut out, TokenKind::StringLiteral(segments), pos);
                    }
                    '\'' => {
                        self.advance();
                        let text = self.single_quoted(pos)?;
                        self.push(
                            &mut out,
                            TokenKind::StringLiteral(vec![StrSegment::Lit(text)]),
                            pos,
                        );
                    }
                    '0'..='9' => {
                        let kind = self.number(pos)?;
                        self.push(&mut out, kind, pos);
                    }
                    '@' => {
                        self.advance();
                        let name = self.word();
                        if name.is_empty() {
                            return Err(LexError::UnexpectedChar { ch: '@', pos });
                        }
                        self.push(&mut out, TokenKind::IVar(format!("@{}", name)), pos);
                    }
                    '$' => {
                        self.advance();
                        let name = self.word();
                        if name.is_empty() {
                            return Err(LexError::UnexpectedChar { ch: '$', pos });
                        }
                        self.push(&mut out, TokenKind::GVar(format!("${}", name)), pos);
                    }
                    c if is_ident_start(c) => {
                        let kind = self.identifier(out.last().map(|t| &t.kind));
                        self.push(&mut out, kind, pos);
                    }
                    '%' if self.peek_at(1) == Some('w')
                        && self.peek_at(2).is_some_and(|c| "[({<".contains(c)) =>
                    {
                        self.advance();
                        self.advance();
                        let words = self.words(pos)?;
                        self.push(&mut out, TokenKind::Words(words), pos);
                    }
                    ':' => {
                        let kind = self.colon(pos)?;
                        self.push(&mut out, kind, pos);
                    }
                    _ => {
                        let kind = self.operator(c, pos)?;
                        self.push(&mut out, kind, pos);
                    }
                }
            }
            let eof = self.position();
            out.push(Token {
                kind: TokenKind::Eof,
                pos: eof,
                space_before: self.space,
            });
            Ok(out)
        }

        fn starts_with(
            &self,
            s: &str,
        ) -> bool {
            s.chars()
                .enumerate()
                .all(|(i, c)| self.peek_at(i) == Some(c))
        }

        /// Skip a `=begin` ... `=end` block
        fn block_comment(&mut self) -> Result<(), LexError> {
            let pos = self.position();
            loop {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.advance();
                }
                if !self.eat('\n') {
                    return Err(LexError::UnterminatedComment { pos });
                }
                if self.starts_with("=end") {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                    self.space = true;
                    return Ok(());
                }
            }
        }

        fn word(&mut self) -> String {
            let mut s = String::new();
            while let Some(c) = self.peek().filter(|c| is_ident_char(*c)) {
                s.push(c);
                self.advance();
            }
            s
        }

        fn identifier(
            &mut self,
            prev: Option<&TokenKind>,
        ) -> TokenKind {
            let mut name = self.word();
            if matches!(self.peek(), Some('?') | Some('!')) && self.peek_at(1) != Some('=') {
                if let Some(c) = self.advance() {
                    name.push(c);
                }
            } else if matches!(self.peek(), Some('?') | Some('!'))
                && self.peek_at(1) == Some('=')
                && self.peek_at(2) == Some('=')
            {
                if let Some(c) = self.advance() {
                    name.push(c);
                }
            }

            let after_dot = matches!(prev, Some(TokenKind::Dot));
            let after_def = matches!(prev, Some(TokenKind::KwDef));
            if self.peek() == Some(':') && self.peek_at(1) != Some(':') && !after_dot {
                let last = name.chars().last();
                if keyword(&name).is_none() && last != Some('?') && last != Some('!') {
                    self.advance();
                    return TokenKind::Label(name);
                }
            }
            if !after_dot && !(after_def && name != "self") {
                if let Some(kw) = keyword(&name) {
                    return kw;
                }
            }
            if name.starts_with(|c: char| c.is_uppercase()) {
                TokenKind::Constant(name)
            } else {
                TokenKind::Identifier(name)
            }
        }

        fn colon(
            &mut self,
            pos: Position,
        ) -> Result<TokenKind, LexError> {
            self.advance();
            if self.eat(':') {
                return Ok(TokenKind::ColonColon);
            }
            match self.peek() {
                Some('"') => {
                    self.advance();
                    let segments = self.double_quoted('"', pos)?;
                    let mut name = String::new();
                    for seg in segments {
                        if let StrSegment::Lit(s) = seg {
                            name.push_str(&s);
                        }
                    }
                    Ok(TokenKind::Symbol(name))
                }
                Some(c) if is_ident_start(c) => {
                    let mut name = self.word();
                    if matches!(self.peek(), Some('?') | Some('!') | Some('='))
                        && !matches!(self.peek_at(1), Some('=') | Some('>') | Some('~'))
                    {
                        if let Some(c) = self.advance() {
                            name.push(c);
                        }
                    }
                    Ok(TokenKind::Symbol(name))
                }
                Some('@') | Some('$') => {
                    let sigil = self.advance().unwrap_or('@');
                    Ok(TokenKind::Symbol(format!("{}{}", sigil, self.word())))
                }
                Some(_) if !self.space_follows() => {
                    const OPS: [&str; 22] = [
                        "[]=", "[]", "<=>", "===", "==", "!=", "<=", ">=", "<<", ">>", "**", "+",
                        "-", "*", "/", "%", "<", ">", "!", "&", "|", "^",
                    ];
                    for op in OPS {
                        if self.starts_with(op) {
                            for _ in 0..op.chars().count() {
                                self.advance();
                            }
                            return Ok(TokenKind::Symbol(op.to_string()));
                        }
                    }
                    Ok(TokenKind::Colon)
                }
                _ => Ok(TokenKind::Colon),
            }
        }

        fn space_follows(&self) -> bool {
            self.peek().map_or(true, char::is_whitespace)
        }

        fn number(
            &mut self,
            pos: Position,
        ) -> Result<TokenKind, LexError> {
            let radix = match (self.peek(), self.peek_at(1)) {
                (Some('0'), Some('x') | Some('X')) => 16,
                (Some('0'), Some('b') | Some('B')) => 2,
                (Some('0'), Some('o') | Some('O')) => 8,
                _ => 10,
            };
            if radix != 10 {
                self.advance();
                self.advance();
                let mut digits = String::new();
                while let Some(c) = self.peek().filter(|c| c.is_ascii_alphanumeric() || *c == '_') {
                    if c != '_' {
                        digits.push(c);
                    }
                    self.advance();
                }
                return i64::from_str_radix(&digits, radix)
                    .map(TokenKind::IntLiteral)
                    .map_err(|_| LexError::InvalidNumber { text: digits, pos });
            }

            let mut text = String::new();
            let mut float = false;
            self.digits(&mut text);
            if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                float = true;
                self.advance();
                text.push('.');
                self.digits(&mut text);
            }
            if matches!(self.peek(), Some('e') | Some('E')) {
                let sign = matches!(self.peek_at(1), Some('+') | Some('-'));
                let digit_at = if sign { 2 } else { 1 };
                if self.peek_at(digit_at).is_some_and(|c| c.is_ascii_digit()) {
                    float = true;
                    text.push('e');
                    self.advance();
                    if sign {
                        if let Some(s) = self.advance() {
                            text.push(s);
                        }
                    }
                    self.digits(&mut text);
                }
            }
            if self.peek().is_some_and(is_ident_start) {
                return Err(LexError::InvalidNumber { text, pos });
            }
            if float {
                return text
                    .parse::<f64>()
                    .map(TokenKind::FloatLiteral)
                    .map_err(|_| LexError::InvalidNumber { text, pos });
            }
            match text.parse::<i64>() {
                Ok(n) => Ok(TokenKind::IntLiteral(n)),
                Err(_) if text.parse::<u64>() == Ok(i64::MIN.unsigned_abs()) => {
                    Ok(TokenKind::IntLiteral(i64::MIN))
                }
                // too wide for a fixnum; promoted like arithmetic overflow
                Err(_) => text
                    .parse::<f64>()
                    .map(TokenKind::FloatLiteral)
                    .map_err(|_| LexError::InvalidNumber { text, pos }),
            }
        }

        fn digits(
            &mut self,
            text: &mut String,
        ) {
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    text.push(c);
                } else if c != '_' || !self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                    break;
                }
                self.advance();
            }
        }

        fn escape(
            &mut self,
            pos: Position,
        ) -> Result<char, LexError> {
            let Some(c) = self.advance() else {
                return Err(LexError::UnterminatedString { pos });
            };
            Ok(match c {
                'n' => '\n',
                't' => '\t',
                'r' => '\r',
                '0' => '\0',
                's' => ' ',
                'e' => '\x1b',
                'a' => '\x07',
                'b' => '\x08',
                'x' => {
                    let mut code = String::new();
                    while code.len() < 2 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                        code.extend(self.advance());
                    }
                    u32::from_str_radix(&code, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or(LexError::InvalidEscape {
                            sequence: format!("x{}", code),
                            pos,
                        })?
                }
                'u' => {
                    let mut code = String::new();
                    if self.eat('{') {
                        while let Some(c) = self.peek().filter(|c| *c != '}') {
                            code.push(c);
                            self.advance();
                        }
                        self.eat('}');
                    } else {
                        while code.len() < 4 && self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                            code.extend(self.advance());
                        }
                    }
                    u32::from_str_radix(&code, 16)
                        .ok()
                        .and_then(char::from_u32)
                        .ok_or(LexError::InvalidEscape {
                            sequence: format!("u{}", code),
                            pos,
                        })?
                }
                other => other,
            })
        }

        fn double_quoted(
            &mut self,
            close: char,
            pos: Position,
        ) -> Result<Vec<StrSegment>, LexError> {
            let mut segments = Vec::new();
            let mut lit = String::new();
            loop {
                let Some(c) = self.advance() else {
                    return Err(LexError::UnterminatedString { pos });
                };
                match c {
                    c if c == close => break,
                    '\\' => lit.push(self.escape(pos)?),
                    '#' if self.peek() == Some('{') => {
                        self.advance();
                        if !lit.is_empty() {
                            segments.push(StrSegment::Lit(std::mem::take(&mut lit)));
                        }
                        let saved = self.space;
                        self.space = false;
                        let code = self.lex(true)?;
                        self.space = saved;
                        segments.push(StrSegment::Code(code));
                    }
                    c => lit.push(c),
                }
            }
            if !lit.is_empty() || segments.is_empty() {
                segments.push(StrSegment::Lit(lit));
            }
            Ok(segments)
        }

        fn single_quoted(
            &mut self,
            pos: Position,
        ) -> Result<String, LexError> {
            let mut s = String::new();
            loop {
                match self.advance() {
                    None => return Err(LexError::UnterminatedString { pos }),
                    Some('\'') => return Ok(s),
                    Some('\\') if matches!(self.peek(), Some('\'') | Some('\\')) => {
                        s.extend(self.advance());
                    }
                    Some(c) => s.push(c),
                }
            }
        }

        fn words(
            &mut self,
            pos: Position,
        ) -> Result<Vec<String>, LexError> {
            let close = match self.advance() {
                Some('[') => ']',
                Some('(') => ')',
                Some('{') => '}',
                _ => '>',
            };
            let mut words = Vec::new();
            let mut cur = String::new();
            loop {
                match self.advance() {
                    None => return Err(LexError::UnterminatedString { pos }),
                    Some(c) if c == close => break,
                    Some(c) if c.is_whitespace() => {
                        if !cur.is_empty() {
                            words.push(std::mem::take(&mut cur));
                        }
                    }
                    Some(c) => cur.push(c),
                }
            }
            if !cur.is_empty() {
                words.push(cur);
            }
            Ok(words)
        }

        fn operator(
            &mut self,
            c: char,
            pos: Position,
        ) -> Result<TokenKind, LexError> {
            self.advance();
            let op_assign = |lexer: &mut Self, op: &str, plain: TokenKind| {
                if lexer.eat('=') {
                    TokenKind::OpAssign(op.to_string())
                } else {
                    plain
                }
            };
            let kind = match c {
                '+' => op_assign(self, "+", TokenKind::Plus),
                '-' => {
                    if self.eat('>') {
                        TokenKind::Arrow
                    } else {
                        op_assign(self, "-", TokenKind::Minus)
                    }
                }
                '*' => {
                    if self.eat('*') {
                        op_assign(self, "**", TokenKind::StarStar)
                    } else {
                        op_assign(self, "*", TokenKind::Star)
                    }
                }
                '/' => op_assign(self, "/", TokenKind::Slash),
                '%' => op_assign(self, "%", TokenKind::Percent),
                '^' => op_assign(self, "^", TokenKind::Caret),
                '~' => TokenKind::Tilde,
                '=' => {
                    if self.eat('=') {
                        if self.eat('=') {
                            TokenKind::EqEqEq
                        } else {
                            TokenKind::EqEq
                        }
                    } else if self.eat('>') {
                        TokenKind::FatArrow
                    } else {
                        TokenKind::Assign
                    }
                }
                '!' => {
                    if self.eat('=') {
                        TokenKind::Neq
                    } else {
                        TokenKind::Bang
                    }
                }
                '<' => {
                    if self.eat('=') {
                        if self.eat('>') {
                            TokenKind::Cmp
                        } else {
                            TokenKind::Le
                        }
                    } else if self.eat('<') {
                        op_assign(self, "<<", TokenKind::Shl)
                    } else {
                        TokenKind::Lt
                    }
                }
                '>' => {
                    if self.eat('=') {
                        TokenKind::Ge
                    } else if self.eat('>') {
                        op_assign(self, ">>", TokenKind::Shr)
                    } else {
                        TokenKind::Gt
                    }
                }
                '&' => {
                    if self.eat('&') {
                        op_assign(self, "&&", TokenKind::AndAnd)
                    } else {
                        op_assign(self, "&", TokenKind::Amp)
                    }
                }
                '|' => {
                    if self.eat('|') {
                        op_assign(self, "||", TokenKind::OrOr)
                    } else {
                        op_assign(self, "|", TokenKind::Pipe)
                    }
                }
                '.' => {
                    if self.eat('.') {
                        if self.eat('.') {
                            TokenKind::DotDotDot
                        } else {
                            TokenKind::DotDot
                        }
                    } else {
                        TokenKind::Dot
                    }
                }
                '?' => TokenKind::Question,
                ',' => TokenKind::Comma,
                ';' => TokenKind::Semicolon,
                '(' => TokenKind::LParen,
                ')' => TokenKind::RParen,
                '[' => TokenKind::LBracket,
                ']' => TokenKind::RBracket,
                ch => return Err(LexError::UnexpectedChar { ch, pos }),
            };
            Ok(kind)
        }
    }
}

#[cfg(test)]
mod tests;
