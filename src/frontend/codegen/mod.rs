//! 代码生成器
//!
//! Walks the AST and emits register bytecode into a tree of [`RawIrep`]s:
//! one for the compilation unit, plus one child per method body, block and
//! class body.
//!
//! Register layout of every irep: `R0` is `self`, then required and optional
//! parameters, then the block slot, then named locals. Temporaries are
//! allocated stack-wise above the locals, so the receiver, arguments and
//! block of a call always sit at the top of the window where the callee's
//! frame starts.
//!
//! - `expr`: literals, variables, calls and assignment
//! - `control`: conditionals, loops, `case`, exceptions and jumps
//! - `closure`: blocks, lambdas, method and class definitions

mod closure;
mod control;
mod expr;

use hashbrown::HashMap;
use thiserror::Error;

use crate::frontend::parser::ast::{Params, Program};
use crate::util::span::Position;
use crate::vm::irep::{Literal, RawIrep};
use crate::vm::opcode::{encode, OperandFormat, Opcode};

/// Registers addressable by an 8-bit operand
const MAX_REGS: usize = 256;

/// Name of the block slot when the block parameter is anonymous
const BLOCK_SLOT: &str = "&";

/// Code generation error
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{message}")]
pub struct CodegenError {
    pub message: String,
    pub pos: Position,
}

impl CodegenError {
    pub fn new(
        message: impl Into<String>,
        pos: Position,
    ) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

pub type CodegenResult<T> = Result<T, CodegenError>;

/// What a scope compiles into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScopeKind {
    Top,
    Method,
    /// Blocks and lambda literals; they see the enclosing scope's locals
    Block,
    Class,
}

/// Where a variable lives, seen from the current scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Var {
    Local(usize),
    /// Register `reg` of the frame `level` closures out (0 = the creator)
    Up { reg: usize, level: usize },
}

/// Jump bookkeeping of a `while` loop
#[derive(Debug)]
struct LoopLabels {
    /// Register receiving the loop's value
    result: usize,
    cond_pc: usize,
    breaks: Vec<usize>,
    /// Rescue handlers active when the loop started
    handlers: usize,
}

/// Per-irep compilation state
#[derive(Debug)]
struct Scope {
    kind: ScopeKind,
    /// Variable names; `vars[i]` lives in `R(i + 1)`
    vars: Vec<String>,
    /// Parameters forwarded by a bare `super`
    params: Vec<String>,
    argc: u8,
    optc: u8,
    opt_entries: Vec<u16>,
    sp: usize,
    max_regs: usize,
    iseq: Vec<u8>,
    pool: Vec<Literal>,
    syms: Vec<String>,
    sym_index: HashMap<String, u16>,
    children: Vec<RawIrep>,
    loops: Vec<LoopLabels>,
    /// Rescue handlers pushed by this irep that are active at the current pc
    handlers: usize,
}

/// Bytecode generator
pub struct CodeGenerator {
    scopes: Vec<Scope>,
    pos: Position,
}

/// Compile a parsed program
pub fn generate(program: &Program) -> CodegenResult<RawIrep> {
    let mut gen = CodeGenerator::new();
    gen.enter(ScopeKind::Top, &Params::default(), &program.locals)?;
    let r = gen.expr(&program.body)?;
    gen.op(Opcode::Return, r, 0, 0);
    gen.leave()
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeGenerator {
    pub fn new() -> Self {
        Self {
            scopes: Vec::new(),
            pos: Position::start(),
        }
    }

    pub(crate) fn error(
        &self,
        message: impl Into<String>,
    ) -> CodegenError {
        CodegenError::new(message, self.pos)
    }

    fn scope(&self) -> &Scope {
        // `enter` always runs before any emission
        &self.scopes[self.scopes.len() - 1]
    }

    fn scope_mut(&mut self) -> &mut Scope {
        let last = self.scopes.len() - 1;
        &mut self.scopes[last]
    }

    pub(crate) fn kind(&self) -> ScopeKind {
        self.scope().kind
    }

    // ------------------------------------------------------------------
    // Scopes
    // ------------------------------------------------------------------

    /// Start a new irep with `params` and `locals` laid out after `self`
    pub(crate) fn enter(
        &mut self,
        kind: ScopeKind,
        params: &Params,
        locals: &[String],
    ) -> CodegenResult<()> {
        let argc = params.required.len();
        let optc = params.optional.len();
        if argc + optc > u8::MAX as usize {
            return Err(self.error("too many parameters"));
        }
        let mut vars: Vec<String> = params.names().map(str::to_string).collect();
        vars.push(params.block.clone().unwrap_or_else(|| BLOCK_SLOT.to_string()));
        vars.extend(locals.iter().cloned());
        let sp = vars.len() + 1;
        if sp > MAX_REGS {
            return Err(self.error("too many local variables"));
        }
        self.scopes.push(Scope {
            kind,
            params: params.names().map(str::to_string).collect(),
            vars,
            argc: argc as u8,
            optc: optc as u8,
            opt_entries: Vec::new(),
            sp,
            max_regs: sp,
            iseq: Vec::new(),
            pool: Vec::new(),
            syms: Vec::new(),
            sym_index: HashMap::new(),
            children: Vec::new(),
            loops: Vec::new(),
            handlers: 0,
        });
        Ok(())
    }

    /// Finish the current irep
    pub(crate) fn leave(&mut self) -> CodegenResult<RawIrep> {
        let Some(scope) = self.scopes.pop() else {
            return Err(self.error("no scope to close"));
        };
        // jump operands are 16 bits wide
        if scope.iseq.len() > u16::MAX as usize {
            return Err(self.error("code too large"));
        }
        Ok(RawIrep {
            nlocals: (scope.vars.len() + 1) as u16,
            nregs: scope.max_regs as u16,
            argc: scope.argc,
            optc: scope.optc,
            opt_entries: scope.opt_entries,
            iseq: scope.iseq,
            pool: scope.pool,
            syms: scope.syms,
            lvars: scope.vars,
            children: scope.children,
        })
    }

    /// Attach a finished child irep, returning its index
    pub(crate) fn add_child(
        &mut self,
        child: RawIrep,
    ) -> CodegenResult<usize> {
        let idx = self.scope().children.len();
        if idx > u16::MAX as usize {
            return Err(self.error("too many nested blocks"));
        }
        self.scope_mut().children.push(child);
        Ok(idx)
    }

    /// Parameter names a bare `super` forwards
    pub(crate) fn super_params(&self) -> Vec<String> {
        for scope in self.scopes.iter().rev() {
            match scope.kind {
                ScopeKind::Block => continue,
                ScopeKind::Method => return scope.params.clone(),
                ScopeKind::Top | ScopeKind::Class => break,
            }
        }
        Vec::new()
    }

    // ------------------------------------------------------------------
    // Variables
    // ------------------------------------------------------------------

    pub(crate) fn lookup(
        &self,
        name: &str,
    ) -> Option<Var> {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if let Some(i) = scope.vars.iter().position(|v| v == name) {
                return Some(if depth == 0 {
                    Var::Local(i + 1)
                } else {
                    Var::Up {
                        reg: i + 1,
                        level: depth - 1,
                    }
                });
            }
            if scope.kind != ScopeKind::Block {
                break;
            }
        }
        None
    }

    /// `R(dst) = name`
    pub(crate) fn load_var(
        &mut self,
        name: &str,
        dst: usize,
    ) -> CodegenResult<()> {
        match self.lookup(name) {
            Some(Var::Local(r)) => self.op(Opcode::Move, dst, r, 0),
            Some(Var::Up { reg, level }) => self.op(Opcode::GetUpVar, dst, reg, level),
            None => return Err(self.error(format!("undefined local variable '{}'", name))),
        }
        Ok(())
    }

    /// `name = R(src)`
    pub(crate) fn store_var(
        &mut self,
        name: &str,
        src: usize,
    ) -> CodegenResult<()> {
        match self.lookup(name) {
            Some(Var::Local(r)) => {
                if r != src {
                    self.op(Opcode::Move, r, src, 0);
                }
            }
            Some(Var::Up { reg, level }) => self.op(Opcode::SetUpVar, src, reg, level),
            None => return Err(self.error(format!("undefined local variable '{}'", name))),
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    pub(crate) fn sp(&self) -> usize {
        self.scope().sp
    }

    pub(crate) fn set_sp(
        &mut self,
        sp: usize,
    ) {
        self.scope_mut().sp = sp;
    }

    /// Allocate the next temporary
    pub(crate) fn push(&mut self) -> CodegenResult<usize> {
        let r = self.sp();
        self.reserve(r)?;
        self.scope_mut().sp = r + 1;
        Ok(r)
    }

    /// Make sure `reg` is inside the window
    pub(crate) fn reserve(
        &mut self,
        reg: usize,
    ) -> CodegenResult<()> {
        if reg >= MAX_REGS {
            return Err(self.error("expression needs too many registers"));
        }
        let scope = self.scope_mut();
        scope.max_regs = scope.max_regs.max(reg + 1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tables
    // ------------------------------------------------------------------

    /// Pool index of `lit`, shared with an equal literal
    pub(crate) fn literal(
        &mut self,
        lit: Literal,
    ) -> CodegenResult<usize> {
        let same = |a: &Literal, b: &Literal| match (a, b) {
            (Literal::Float(x), Literal::Float(y)) => x.to_bits() == y.to_bits(),
            _ => a == b,
        };
        if let Some(i) = self.scope().pool.iter().position(|l| same(l, &lit)) {
            return Ok(i);
        }
        let idx = self.scope().pool.len();
        if idx > u16::MAX as usize {
            return Err(self.error("too many literals"));
        }
        self.scope_mut().pool.push(lit);
        Ok(idx)
    }

    /// Symbol table index of `name`
    pub(crate) fn sym(
        &mut self,
        name: &str,
    ) -> CodegenResult<usize> {
        if let Some(&i) = self.scope().sym_index.get(name) {
            return Ok(i as usize);
        }
        let idx = self.scope().syms.len();
        if idx > u16::MAX as usize {
            return Err(self.error("too many symbols"));
        }
        let scope = self.scope_mut();
        scope.syms.push(name.to_string());
        scope.sym_index.insert(name.to_string(), idx as u16);
        Ok(idx)
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    pub(crate) fn op(
        &mut self,
        op: Opcode,
        a: usize,
        b: usize,
        c: usize,
    ) {
        encode(&mut self.scope_mut().iseq, op, a as u32, b as u32, c as u32);
    }

    /// `R(a) = R(a).name(R(a+1) .. R(a+argc))`
    pub(crate) fn send(
        &mut self,
        a: usize,
        name: &str,
        argc: usize,
    ) -> CodegenResult<()> {
        let sym = self.sym(name)?;
        self.op(Opcode::Send, a, sym, argc);
        Ok(())
    }

    pub(crate) fn pc(&self) -> usize {
        self.scope().iseq.len()
    }

    fn pc16(&self) -> CodegenResult<u16> {
        u16::try_from(self.pc()).map_err(|_| self.error("code too large"))
    }

    /// Emit a jump with its target left open; `patch` fills it in
    pub(crate) fn jump_forward(
        &mut self,
        op: Opcode,
        a: usize,
    ) -> usize {
        let at = self.pc();
        match op.format() {
            OperandFormat::S => {
                self.op(op, 0, 0, 0);
                at + 1
            }
            _ => {
                self.op(op, a, 0, 0);
                at + 2
            }
        }
    }

    /// Point the jump recorded at `slot` to the current pc
    pub(crate) fn patch(
        &mut self,
        slot: usize,
    ) -> CodegenResult<()> {
        let target = self.pc16()?.to_le_bytes();
        self.scope_mut().iseq[slot..slot + 2].copy_from_slice(&target);
        Ok(())
    }

    /// Jump back to an already emitted `target`
    pub(crate) fn jump_back(
        &mut self,
        op: Opcode,
        a: usize,
        target: usize,
    ) {
        match op.format() {
            OperandFormat::S => self.op(op, target, 0, 0),
            _ => self.op(op, a, target, 0),
        }
    }

    /// Record the current pc as the next optional-argument entry
    pub(crate) fn mark_opt_entry(&mut self) -> CodegenResult<()> {
        let pc = self.pc16()?;
        self.scope_mut().opt_entries.push(pc);
        Ok(())
    }

    pub(crate) fn handlers(&self) -> usize {
        self.scope().handlers
    }

    pub(crate) fn set_handlers(
        &mut self,
        n: usize,
    ) {
        self.scope_mut().handlers = n;
    }
}

#[cfg(test)]
mod tests;
