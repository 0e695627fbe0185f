//! Token types

use crate::util::span::Position;

/// Token kind
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Keywords
    KwDef,
    KwEnd,
    KwIf,
    KwElsif,
    KwElse,
    KwUnless,
    KwWhile,
    KwUntil,
    KwCase,
    KwWhen,
    KwThen,
    KwDo,
    KwReturn,
    KwBreak,
    KwNext,
    KwBegin,
    KwRescue,
    KwEnsure,
    KwClass,
    KwSelf,
    KwNil,
    KwTrue,
    KwFalse,
    KwAnd,
    KwOr,
    KwNot,
    KwYield,
    KwSuper,

    // Names
    Identifier(String),
    Constant(String),
    IVar(String),
    GVar(String),
    /// `name:` inside a hash or argument list
    Label(String),

    // Literals
    /// Unsigned literal; `i64::MIN` stands for 2^63, which fits only once negated
    IntLiteral(i64),
    FloatLiteral(f64),
    StringLiteral(Vec<StrSegment>),
    Symbol(String),
    /// `%w[...]`
    Words(Vec<String>),

    // Operators
    Plus,
    Minus,
    Star,
    StarStar,
    Slash,
    Percent,
    EqEq,
    EqEqEq,
    Neq,
    Lt,
    Le,
    Gt,
    Ge,
    Cmp,
    AndAnd,
    OrOr,
    Bang,
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    Assign,
    /// `+=`, `||=`, ... carrying the operator
    OpAssign(String),

    // Delimiters
    Dot,
    DotDot,
    DotDotDot,
    ColonColon,
    Colon,
    Question,
    Comma,
    Semicolon,
    Newline,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    FatArrow,
    Arrow,

    Eof,
}

impl TokenKind {
    /// Operator spelling used as a method name
    pub fn operator_name(&self) -> Option<&'static str> {
        Some(match self {
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::StarStar => "**",
            TokenKind::Slash => "/",
            TokenKind::Percent => "%",
            TokenKind::EqEq => "==",
            TokenKind::EqEqEq => "===",
            TokenKind::Neq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Le => "<=",
            TokenKind::Gt => ">",
            TokenKind::Ge => ">=",
            TokenKind::Cmp => "<=>",
            TokenKind::Bang => "!",
            TokenKind::Amp => "&",
            TokenKind::Pipe => "|",
            TokenKind::Caret => "^",
            TokenKind::Tilde => "~",
            TokenKind::Shl => "<<",
            TokenKind::Shr => ">>",
            _ => return None,
        })
    }

    /// Tokens after which a line break does not end the statement
    pub fn continues_line(&self) -> bool {
        matches!(
            self,
            TokenKind::Plus
                | TokenKind::Minus
                | TokenKind::Star
                | TokenKind::StarStar
                | TokenKind::Slash
                | TokenKind::Percent
                | TokenKind::EqEq
                | TokenKind::EqEqEq
                | TokenKind::Neq
                | TokenKind::Lt
                | TokenKind::Le
                | TokenKind::Gt
                | TokenKind::Ge
                | TokenKind::Cmp
                | TokenKind::AndAnd
                | TokenKind::OrOr
                | TokenKind::Amp
                | TokenKind::Caret
                | TokenKind::Shl
                | TokenKind::Shr
                | TokenKind::Assign
                | TokenKind::OpAssign(_)
                | TokenKind::Dot
                | TokenKind::DotDot
                | TokenKind::DotDotDot
                | TokenKind::ColonColon
                | TokenKind::Colon
                | TokenKind::Question
                | TokenKind::Comma
                | TokenKind::LParen
                | TokenKind::LBracket
                | TokenKind::LBrace
                | TokenKind::FatArrow
                | TokenKind::Label(_)
                | TokenKind::KwAnd
                | TokenKind::KwOr
                | TokenKind::KwNot
                | TokenKind::Newline
                | TokenKind::Semicolon
        )
    }
}

/// Piece of a double-quoted string
#[derive(Debug, Clone, PartialEq)]
pub enum StrSegment {
    Lit(String),
    /// Tokens of a `#{...}` interpolation, terminated by `Eof`
    Code(Vec<Token>),
}

/// Token
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: Position,
    /// Whitespace separates this token from the previous one
    pub space_before: bool,
}

impl Token {
    pub fn new(
        kind: TokenKind,
        pos: Position,
    ) -> Self {
        Self {
            kind,
            pos,
            space_before: false,
        }
    }
}

impl From<TokenKind> for Token {
    fn from(kind: TokenKind) -> Self {
        Token::new(kind, Position::start())
    }
}

/// Keyword for an identifier, if it is one
pub fn keyword(word: &str) -> Option<TokenKind> {
    Some(match word {
        "def" => TokenKind::KwDef,
        "end" => TokenKind::KwEnd,
        "if" => TokenKind::KwIf,
        "elsif" => TokenKind::KwElsif,
        "else" => TokenKind::KwElse,
        "unless" => TokenKind::KwUnless,
        "while" => TokenKind::KwWhile,
        "until" => TokenKind::KwUntil,
        "case" => TokenKind::KwCase,
        "when" => TokenKind::KwWhen,
        "then" => TokenKind::KwThen,
        "do" => TokenKind::KwDo,
        "return" => TokenKind::KwReturn,
        "break" => TokenKind::KwBreak,
        "next" => TokenKind::KwNext,
        "begin" => TokenKind::KwBegin,
        "rescue" => TokenKind::KwRescue,
        "ensure" => TokenKind::KwEnsure,
        "class" => TokenKind::KwClass,
        "self" => TokenKind::KwSelf,
        "nil" => TokenKind::KwNil,
        "true" => TokenKind::KwTrue,
        "false" => TokenKind::KwFalse,
        "and" => TokenKind::KwAnd,
        "or" => TokenKind::KwOr,
        "not" => TokenKind::KwNot,
        "yield" => TokenKind::KwYield,
        "super" => TokenKind::KwSuper,
        _ => return None,
    })
}
