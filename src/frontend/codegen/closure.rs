//! Blocks, lambdas, method and class definitions

use super::{CodeGenerator, CodegenResult, ScopeKind};
use crate::frontend::parser::ast::*;
use crate::vm::opcode::Opcode;

impl CodeGenerator {
    /// Compile the body of a child irep and attach it
    fn child(
        &mut self,
        kind: ScopeKind,
        params: &Params,
        locals: &[String],
        body: &Node,
    ) -> CodegenResult<usize> {
        self.enter(kind, params, locals)?;
        let compiled = self.body(params, body);
        let raw = self.leave()?;
        compiled?;
        self.add_child(raw)
    }

    fn body(
        &mut self,
        params: &Params,
        body: &Node,
    ) -> CodegenResult<()> {
        self.optional_params(params)?;
        let r = self.expr(body)?;
        self.op(Opcode::Return, r, 0, 0);
        Ok(())
    }

    /// Defaults of optional parameters, one entry point per count supplied
    fn optional_params(
        &mut self,
        params: &Params,
    ) -> CodegenResult<()> {
        if params.optional.is_empty() {
            return Ok(());
        }
        let first = 1 + params.required.len();
        for (i, (_, default)) in params.optional.iter().enumerate() {
            self.mark_opt_entry()?;
            self.value_to(default, first + i)?;
        }
        self.mark_opt_entry()
    }

    /// Block or lambda body; returns the child index
    pub(crate) fn block(
        &mut self,
        block: &BlockNode,
    ) -> CodegenResult<usize> {
        let saved = self.pos;
        self.pos = block.pos;
        let child = self.child(ScopeKind::Block, &block.params, &block.locals, &block.body);
        self.pos = saved;
        child
    }

    /// `-> (x) { ... }` is `lambda { |x| ... }`
    pub(crate) fn lambda(
        &mut self,
        block: &BlockNode,
        dst: usize,
    ) -> CodegenResult<()> {
        self.op(Opcode::LoadSelf, dst, 0, 0);
        let r = self.push()?;
        let child = self.block(block)?;
        self.op(Opcode::Block, r, child, 0);
        self.send_block(dst, "lambda", 0)?;
        self.set_sp(dst + 1);
        Ok(())
    }

    fn send_block(
        &mut self,
        a: usize,
        name: &str,
        argc: usize,
    ) -> CodegenResult<()> {
        let sym = self.sym(name)?;
        self.op(Opcode::SendB, a, sym, argc);
        Ok(())
    }

    /// `def name` on the target class, `def self.name` on `self`
    pub(crate) fn method_def(
        &mut self,
        def: &MethodDef,
        dst: usize,
    ) -> CodegenResult<()> {
        let (load, define) = if def.singleton {
            (Opcode::LoadSelf, Opcode::SDef)
        } else {
            (Opcode::TClass, Opcode::Def)
        };
        self.op(load, dst, 0, 0);
        let r = self.push()?;
        let child = self.child(ScopeKind::Method, &def.params, &def.locals, &def.body)?;
        self.op(Opcode::Method, r, child, 0);
        let sym = self.sym(&def.name)?;
        self.op(define, dst, sym, 0);
        self.set_sp(dst + 1);
        Ok(())
    }

    /// Open or create the class, then run its body with `self` = the class
    pub(crate) fn class_def(
        &mut self,
        class: &ClassDef,
        dst: usize,
    ) -> CodegenResult<()> {
        match &class.scope {
            Some(scope) => self.gen(scope, dst)?,
            None => self.op(Opcode::LoadNil, dst, 0, 0),
        }
        self.set_sp(dst + 1);
        let sup = self.push()?;
        match &class.superclass {
            Some(superclass) => self.value_to(superclass, sup)?,
            None => self.op(Opcode::LoadNil, sup, 0, 0),
        }
        let sym = self.sym(&class.name)?;
        self.op(Opcode::Class, dst, sym, 0);
        let child = self.child(ScopeKind::Class, &Params::default(), &class.locals, &class.body)?;
        self.op(Opcode::Exec, dst, child, 0);
        self.set_sp(dst + 1);
        Ok(())
    }
}
