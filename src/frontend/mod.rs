//! Ruby front-end
//!
//! Source text goes through the lexer, the parser and the code generator and
//! comes out as a [`RawIrep`] tree the VM can verify and load. The VM only
//! depends on the [`Compiler`] trait, so another front-end (or a
//! precompiled blob) can stand in for this one.

pub mod codegen;
pub mod lexer;
pub mod parser;

use thiserror::Error;
use tracing::debug;

use crate::util::span::Position;
use crate::vm::irep::RawIrep;
use codegen::CodegenError;
use lexer::LexError;
use parser::ParseError;

/// Turns source text into loadable bytecode
pub trait Compiler {
    fn compile(
        &self,
        source: &str,
    ) -> Result<RawIrep, CompileError>;
}

/// Compiler for the supported Ruby subset
#[derive(Debug, Default, Clone, Copy)]
pub struct RubyCompiler;

impl RubyCompiler {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for RubyCompiler {
    fn compile(
        &self,
        source: &str,
    ) -> Result<RawIrep, CompileError> {
        debug!("Compiling source code ({} bytes)", source.len());
        let tokens = lexer::tokenize(source)?;
        debug!("Tokenized into {} tokens", tokens.len());
        let program = parser::parse(&tokens)?;
        let irep = codegen::generate(&program)?;
        debug!(
            iseq = irep.iseq.len(),
            children = irep.children.len(),
            "Code generation successful"
        );
        Ok(irep)
    }
}

/// Compilation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompileError {
    #[error("{}: {}", .0.pos(), .0)]
    Lex(#[from] LexError),

    #[error("{}: syntax error, {}", .0.pos(), .0)]
    Syntax(#[from] ParseError),

    #[error("{}: {}", .0.pos, .0)]
    Codegen(#[from] CodegenError),
}

impl CompileError {
    /// Where the error was detected
    pub fn pos(&self) -> Position {
        match self {
            CompileError::Lex(e) => e.pos(),
            CompileError::Syntax(e) => e.pos(),
            CompileError::Codegen(e) => e.pos,
        }
    }

    pub fn line(&self) -> usize {
        self.pos().line
    }

    pub fn column(&self) -> usize {
        self.pos().column
    }

    /// True when more input could complete the source (REPL continuation)
    pub fn is_incomplete(&self) -> bool {
        match self {
            CompileError::Syntax(
                ParseError::ExpectedToken { found, .. } | ParseError::UnexpectedToken { found, .. },
            ) => found == "end-of-input",
            _ => false,
        }
    }

    /// Message without the location prefix
    pub fn message(&self) -> String {
        match self {
            CompileError::Lex(e) => e.to_string(),
            CompileError::Syntax(e) => format!("syntax error, {}", e),
            CompileError::Codegen(e) => e.to_string(),
        }
    }
}
