//! Conditionals, loops, `case`, exceptions and non-local jumps

use super::{CodeGenerator, CodegenResult, LoopLabels, ScopeKind};
use crate::frontend::parser::ast::*;
use crate::vm::opcode::Opcode;

impl CodeGenerator {
    pub(crate) fn if_expr(
        &mut self,
        cond: &Node,
        then_body: &Node,
        else_body: Option<&Node>,
        dst: usize,
    ) -> CodegenResult<()> {
        self.gen(cond, dst)?;
        self.set_sp(dst + 1);
        let skip_then = self.jump_forward(Opcode::JmpNot, dst);
        self.value_to(then_body, dst)?;
        let done = self.jump_forward(Opcode::Jmp, 0);
        self.patch(skip_then)?;
        match else_body {
            Some(body) => self.value_to(body, dst)?,
            None => self.op(Opcode::LoadNil, dst, 0, 0),
        }
        self.patch(done)
    }

    /// `while`/`until`; the value is `nil` unless a `break` supplies one
    pub(crate) fn while_loop(
        &mut self,
        cond: &Node,
        body: &Node,
        negate: bool,
        dst: usize,
    ) -> CodegenResult<()> {
        let cond_pc = self.pc();
        self.gen(cond, dst)?;
        self.set_sp(dst + 1);
        let exit_op = if negate {
            Opcode::JmpIf
        } else {
            Opcode::JmpNot
        };
        let exit = self.jump_forward(exit_op, dst);

        let handlers = self.handlers();
        self.scope_mut().loops.push(LoopLabels {
            result: dst,
            cond_pc,
            breaks: Vec::new(),
            handlers,
        });
        let compiled = self.stmt(body);
        let labels = self.scope_mut().loops.pop();
        compiled?;

        self.jump_back(Opcode::Jmp, 0, cond_pc);
        self.patch(exit)?;
        self.op(Opcode::LoadNil, dst, 0, 0);
        if let Some(labels) = labels {
            for slot in labels.breaks {
                self.patch(slot)?;
            }
        }
        Ok(())
    }

    pub(crate) fn case_expr(
        &mut self,
        subject: Option<&Node>,
        whens: &[(Vec<Node>, Node)],
        else_body: Option<&Node>,
        dst: usize,
    ) -> CodegenResult<()> {
        if let Some(subject) = subject {
            self.gen(subject, dst)?;
            self.set_sp(dst + 1);
        }
        let mut ends = Vec::new();
        for (patterns, body) in whens {
            let mut hits = Vec::new();
            for pattern in patterns {
                let r = self.expr(pattern)?;
                if subject.is_some() {
                    // pattern === subject
                    let arg = self.push()?;
                    self.op(Opcode::Move, arg, dst, 0);
                    self.send(r, "===", 1)?;
                }
                hits.push(self.jump_forward(Opcode::JmpIf, r));
                self.set_sp(dst + 1);
            }
            let next = self.jump_forward(Opcode::Jmp, 0);
            for slot in hits {
                self.patch(slot)?;
            }
            self.value_to(body, dst)?;
            ends.push(self.jump_forward(Opcode::Jmp, 0));
            self.patch(next)?;
        }
        match else_body {
            Some(body) => self.value_to(body, dst)?,
            None => self.op(Opcode::LoadNil, dst, 0, 0),
        }
        for slot in ends {
            self.patch(slot)?;
        }
        Ok(())
    }

    /// `begin ... rescue ... else ... ensure ... end`
    ///
    /// The ensure clause runs on normal completion and when an exception
    /// leaves the block; `return`, `break` and `next` skip it.
    pub(crate) fn begin(
        &mut self,
        block: &BeginBlock,
        dst: usize,
    ) -> CodegenResult<()> {
        let Some(ensure) = &block.ensure else {
            return self.rescue(block, dst);
        };
        let on_err = self.jump_forward(Opcode::OnErr, 0);
        self.protected(|gen| gen.rescue(block, dst))?;
        self.op(Opcode::PopErr, 1, 0, 0);
        self.stmt(ensure)?;
        let done = self.jump_forward(Opcode::Jmp, 0);

        self.patch(on_err)?;
        let exc = self.push()?;
        self.op(Opcode::Except, exc, 0, 0);
        self.stmt(ensure)?;
        self.op(Opcode::RaiseIf, exc, 0, 0);
        self.set_sp(dst + 1);
        self.patch(done)
    }

    /// Run `f` with one more rescue handler counted as active
    fn protected(
        &mut self,
        f: impl FnOnce(&mut Self) -> CodegenResult<()>,
    ) -> CodegenResult<()> {
        let outer = self.handlers();
        self.set_handlers(outer + 1);
        let result = f(self);
        self.set_handlers(outer);
        result
    }

    fn rescue(
        &mut self,
        block: &BeginBlock,
        dst: usize,
    ) -> CodegenResult<()> {
        if block.rescues.is_empty() {
            self.value_to(&block.body, dst)?;
            if let Some(else_body) = &block.else_body {
                self.value_to(else_body, dst)?;
            }
            return Ok(());
        }

        let on_err = self.jump_forward(Opcode::OnErr, 0);
        self.protected(|gen| gen.value_to(&block.body, dst))?;
        self.op(Opcode::PopErr, 1, 0, 0);
        if let Some(else_body) = &block.else_body {
            self.value_to(else_body, dst)?;
        }
        let mut done = vec![self.jump_forward(Opcode::Jmp, 0)];

        self.patch(on_err)?;
        let exc = self.push()?;
        self.op(Opcode::Except, exc, 0, 0);
        for clause in &block.rescues {
            let mut hits = Vec::new();
            if clause.classes.is_empty() {
                let r = self.push()?;
                let sym = self.sym("StandardError")?;
                self.op(Opcode::GetConst, r, sym, 0);
                self.op(Opcode::Rescue, exc, r, 0);
                hits.push(self.jump_forward(Opcode::JmpIf, r));
                self.set_sp(exc + 1);
            }
            for class in &clause.classes {
                let r = self.expr(class)?;
                self.op(Opcode::Rescue, exc, r, 0);
                hits.push(self.jump_forward(Opcode::JmpIf, r));
                self.set_sp(exc + 1);
            }
            let next = self.jump_forward(Opcode::Jmp, 0);
            for slot in hits {
                self.patch(slot)?;
            }
            if let Some(var) = &clause.var {
                self.store_var(var, exc)?;
            }
            self.value_to(&clause.body, dst)?;
            done.push(self.jump_forward(Opcode::Jmp, 0));
            self.patch(next)?;
        }
        // no clause matched
        self.op(Opcode::RaiseIf, exc, 0, 0);
        self.set_sp(dst + 1);
        for slot in done {
            self.patch(slot)?;
        }
        Ok(())
    }

    /// Leave the rescue handlers pushed since the innermost loop started
    fn pop_loop_handlers(&mut self) {
        let Some(start) = self.scope().loops.last().map(|l| l.handlers) else {
            return;
        };
        let extra = self.handlers().saturating_sub(start);
        if extra > 0 {
            self.op(Opcode::PopErr, extra, 0, 0);
        }
    }

    fn jump_value(
        &mut self,
        value: Option<&Node>,
        dst: usize,
    ) -> CodegenResult<()> {
        match value {
            Some(v) => self.value_to(v, dst),
            None => {
                self.op(Opcode::LoadNil, dst, 0, 0);
                Ok(())
            }
        }
    }

    pub(crate) fn return_expr(
        &mut self,
        value: Option<&Node>,
        dst: usize,
    ) -> CodegenResult<()> {
        let op = match self.kind() {
            ScopeKind::Block => Opcode::ReturnBlk,
            ScopeKind::Method | ScopeKind::Top => Opcode::Return,
            ScopeKind::Class => return Err(self.error("Invalid return in class/module body")),
        };
        self.jump_value(value, dst)?;
        self.op(op, dst, 0, 0);
        Ok(())
    }

    pub(crate) fn break_expr(
        &mut self,
        value: Option<&Node>,
        dst: usize,
    ) -> CodegenResult<()> {
        if let Some(result) = self.scope().loops.last().map(|l| l.result) {
            self.jump_value(value, result)?;
            self.pop_loop_handlers();
            let slot = self.jump_forward(Opcode::Jmp, 0);
            if let Some(labels) = self.scope_mut().loops.last_mut() {
                labels.breaks.push(slot);
            }
            return Ok(());
        }
        if self.kind() != ScopeKind::Block {
            return Err(self.error("Invalid break"));
        }
        self.jump_value(value, dst)?;
        self.op(Opcode::Break, dst, 0, 0);
        Ok(())
    }

    pub(crate) fn next_expr(
        &mut self,
        value: Option<&Node>,
        dst: usize,
    ) -> CodegenResult<()> {
        if let Some(cond_pc) = self.scope().loops.last().map(|l| l.cond_pc) {
            if let Some(v) = value {
                self.stmt(v)?;
            }
            self.pop_loop_handlers();
            self.jump_back(Opcode::Jmp, 0, cond_pc);
            return Ok(());
        }
        if self.kind() != ScopeKind::Block {
            return Err(self.error("Invalid next"));
        }
        // `next` leaves the block with its value
        self.jump_value(value, dst)?;
        self.op(Opcode::Return, dst, 0, 0);
        Ok(())
    }
}
