//! Parser module
//!
//! Pratt parser for the Ruby subset. Statement forms (modifiers, `and`/`or`,
//! multiple assignment) live in `stmt`, prefix forms in `nud`, infix and
//! postfix forms in `led`.
//!
//! The parser tracks local variables per scope so that a bare identifier can
//! be told apart from a method call, the way Ruby does it.

pub mod ast;
mod led;
mod nud;
mod state;
mod stmt;

pub use state::{ParserState, BP_LOWEST};

use crate::frontend::lexer::tokens::*;
use crate::util::span::Position;
use ast::*;

/// Parse error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseError {
    #[error("unexpected {found}, expecting {expected}")]
    ExpectedToken {
        expected: String,
        found: String,
        pos: Position,
    },
    #[error("unexpected {found}")]
    UnexpectedToken { found: String, pos: Position },
    #[error("{message}")]
    Invalid { message: String, pos: Position },
}

impl ParseError {
    pub fn pos(&self) -> Position {
        match self {
            ParseError::ExpectedToken { pos, .. }
            | ParseError::UnexpectedToken { pos, .. }
            | ParseError::Invalid { pos, .. } => *pos,
        }
    }

    pub(crate) fn invalid(
        message: impl Into<String>,
        pos: Position,
    ) -> Self {
        ParseError::Invalid {
            message: message.into(),
            pos,
        }
    }
}

/// Parse tokens into a program
pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    let mut state = ParserState::new(tokens);
    let body = state.parse_stmts()?;
    if !state.at_end() {
        return Err(state.unexpected());
    }
    let locals = state.pop_scope();
    Ok(Program { body, locals })
}

#[cfg(test)]
mod tests;
