//! Expressions, calls and assignment

use super::{CodeGenerator, CodegenResult, Var};
use crate::frontend::parser::ast::*;
use crate::vm::irep::Literal;
use crate::vm::opcode::Opcode;

/// Operators with a dedicated instruction
fn binary_opcode(name: &str) -> Option<Opcode> {
    Some(match name {
        "+" => Opcode::Add,
        "-" => Opcode::Sub,
        "*" => Opcode::Mul,
        "/" => Opcode::Div,
        "==" => Opcode::Eq,
        "<" => Opcode::Lt,
        "<=" => Opcode::Le,
        ">" => Opcode::Gt,
        ">=" => Opcode::Ge,
        _ => return None,
    })
}

/// Immediate operand of `AddI`/`SubI`
fn small_immediate(node: &Node) -> Option<usize> {
    match node.kind {
        NodeKind::Int(n) if (0..=u8::MAX as i64).contains(&n) => Some(n as usize),
        _ => None,
    }
}

/// An assignable place with its receiver already evaluated
pub(crate) enum Place<'n> {
    Simple(&'n Target),
    /// `R(recv).get(R(recv+1) .. R(recv+argc))` and the matching setter
    Send {
        recv: usize,
        argc: usize,
        get: String,
        set: String,
    },
}

impl CodeGenerator {
    /// Compile `node` into a fresh register on top of the stack
    pub(crate) fn expr(
        &mut self,
        node: &Node,
    ) -> CodegenResult<usize> {
        let dst = self.push()?;
        self.gen(node, dst)?;
        self.set_sp(dst + 1);
        Ok(dst)
    }

    /// Compile `node` for its side effects only
    pub(crate) fn stmt(
        &mut self,
        node: &Node,
    ) -> CodegenResult<()> {
        let r = self.expr(node)?;
        self.set_sp(r);
        Ok(())
    }

    /// Compile `node` into `dst`, which may sit below the stack top
    pub(crate) fn value_to(
        &mut self,
        node: &Node,
        dst: usize,
    ) -> CodegenResult<()> {
        if self.sp() == dst + 1 {
            self.gen(node, dst)?;
            self.set_sp(dst + 1);
            return Ok(());
        }
        let r = self.expr(node)?;
        self.op(Opcode::Move, dst, r, 0);
        self.set_sp(r);
        Ok(())
    }

    /// Compile `node` into `dst`; `dst` is the top register of the stack
    pub(crate) fn gen(
        &mut self,
        node: &Node,
        dst: usize,
    ) -> CodegenResult<()> {
        let saved = self.pos;
        self.pos = node.pos;
        self.gen_kind(&node.kind, dst)?;
        self.pos = saved;
        Ok(())
    }

    fn gen_kind(
        &mut self,
        kind: &NodeKind,
        dst: usize,
    ) -> CodegenResult<()> {
        match kind {
            NodeKind::Nil => self.op(Opcode::LoadNil, dst, 0, 0),
            NodeKind::True => self.op(Opcode::LoadT, dst, 0, 0),
            NodeKind::False => self.op(Opcode::LoadF, dst, 0, 0),
            NodeKind::SelfRef => self.op(Opcode::LoadSelf, dst, 0, 0),
            NodeKind::Int(n) => self.load_int(*n, dst)?,
            NodeKind::Float(f) => {
                let idx = self.literal(Literal::Float(*f))?;
                self.op(Opcode::LoadL, dst, idx, 0);
            }
            NodeKind::Str(s) => self.load_str(s, dst)?,
            NodeKind::DStr(parts) => self.interpolate(parts, dst)?,
            NodeKind::Sym(name) => {
                let sym = self.sym(name)?;
                self.op(Opcode::LoadSym, dst, sym, 0);
            }
            NodeKind::Array(items) => {
                let first = dst + 1;
                for item in items {
                    self.expr(item)?;
                }
                if items.len() > u8::MAX as usize {
                    return Err(self.error("array literal too long"));
                }
                self.op(Opcode::Array, dst, first, items.len());
            }
            NodeKind::Hash(pairs) => self.hash(pairs, dst)?,
            NodeKind::Range {
                start,
                end,
                exclusive,
            } => {
                self.gen(start, dst)?;
                self.set_sp(dst + 1);
                self.expr(end)?;
                self.op(Opcode::Range, dst, *exclusive as usize, 0);
            }

            NodeKind::LVar(name) => self.load_var(name, dst)?,
            NodeKind::IVar(name) => {
                let sym = self.sym(name)?;
                self.op(Opcode::GetIV, dst, sym, 0);
            }
            NodeKind::GVar(name) => {
                let sym = self.sym(name)?;
                self.op(Opcode::GetGV, dst, sym, 0);
            }
            NodeKind::Const { scope: None, name } => {
                let sym = self.sym(name)?;
                self.op(Opcode::GetConst, dst, sym, 0);
            }
            NodeKind::Const {
                scope: Some(scope),
                name,
            } => {
                self.gen(scope, dst)?;
                self.set_sp(dst + 1);
                let r = self.push()?;
                let sym = self.sym(name)?;
                self.op(Opcode::LoadSym, r, sym, 0);
                self.send(dst, "const_get", 1)?;
            }

            NodeKind::Call(call) => self.call(call, dst)?,
            NodeKind::Super { args, block } => {
                self.super_call(args.as_deref(), block.as_deref(), dst)?
            }
            NodeKind::Yield(args) => {
                self.op(Opcode::BlkPush, dst, 0, 0);
                for arg in args {
                    self.expr(arg)?;
                }
                self.send(dst, "yield", args.len())?;
            }
            NodeKind::Not(inner) => {
                self.gen(inner, dst)?;
                self.set_sp(dst + 1);
                let truthy = self.jump_forward(Opcode::JmpIf, dst);
                self.op(Opcode::LoadT, dst, 0, 0);
                let done = self.jump_forward(Opcode::Jmp, 0);
                self.patch(truthy)?;
                self.op(Opcode::LoadF, dst, 0, 0);
                self.patch(done)?;
            }
            NodeKind::And(left, right) | NodeKind::Or(left, right) => {
                let skip = if matches!(kind, NodeKind::And(..)) {
                    Opcode::JmpNot
                } else {
                    Opcode::JmpIf
                };
                self.gen(left, dst)?;
                self.set_sp(dst + 1);
                let done = self.jump_forward(skip, dst);
                self.value_to(right, dst)?;
                self.patch(done)?;
            }
            NodeKind::BlockGiven => {
                self.op(Opcode::BlkPush, dst, 0, 0);
                let missing = self.jump_forward(Opcode::JmpNil, dst);
                self.op(Opcode::LoadT, dst, 0, 0);
                let done = self.jump_forward(Opcode::Jmp, 0);
                self.patch(missing)?;
                self.op(Opcode::LoadF, dst, 0, 0);
                self.patch(done)?;
            }

            NodeKind::Assign { target, value } => self.assign(target, value, dst)?,
            NodeKind::OpAssign { target, op, value } => self.op_assign(target, op, value, dst)?,
            NodeKind::MultiAssign { targets, value } => self.multi_assign(targets, value, dst)?,

            NodeKind::If {
                cond,
                then_body,
                else_body,
            } => self.if_expr(cond, then_body, else_body.as_deref(), dst)?,
            NodeKind::While { cond, body, negate } => self.while_loop(cond, body, *negate, dst)?,
            NodeKind::Case {
                subject,
                whens,
                else_body,
            } => self.case_expr(subject.as_deref(), whens, else_body.as_deref(), dst)?,
            NodeKind::Begin(block) => self.begin(block, dst)?,
            NodeKind::Seq(nodes) => self.seq(nodes, dst)?,
            NodeKind::Return(value) => self.return_expr(value.as_deref(), dst)?,
            NodeKind::Break(value) => self.break_expr(value.as_deref(), dst)?,
            NodeKind::Next(value) => self.next_expr(value.as_deref(), dst)?,

            NodeKind::Def(def) => self.method_def(def, dst)?,
            NodeKind::Class(class) => self.class_def(class, dst)?,
            NodeKind::Lambda(block) => self.lambda(block, dst)?,
        }
        Ok(())
    }

    fn load_int(
        &mut self,
        n: i64,
        dst: usize,
    ) -> CodegenResult<()> {
        match i16::try_from(n) {
            Ok(small) => self.op(Opcode::LoadI, dst, small as u16 as usize, 0),
            Err(_) => {
                let idx = self.literal(Literal::Integer(n))?;
                self.op(Opcode::LoadL, dst, idx, 0);
            }
        }
        Ok(())
    }

    fn load_str(
        &mut self,
        s: &str,
        dst: usize,
    ) -> CodegenResult<()> {
        let idx = self.literal(Literal::String(s.into()))?;
        self.op(Opcode::String, dst, idx, 0);
        Ok(())
    }

    /// `"a#{b}c"`: a fresh string, then one `StrCat` per part
    fn interpolate(
        &mut self,
        parts: &[StrPart],
        dst: usize,
    ) -> CodegenResult<()> {
        let rest = match parts.first() {
            Some(StrPart::Lit(s)) => {
                self.load_str(s, dst)?;
                &parts[1..]
            }
            _ => {
                self.load_str("", dst)?;
                parts
            }
        };
        for part in rest {
            match part {
                StrPart::Lit(s) => {
                    let r = self.push()?;
                    self.load_str(s, r)?;
                }
                StrPart::Code(node) => {
                    self.expr(node)?;
                }
            }
            self.op(Opcode::StrCat, dst, 0, 0);
            self.set_sp(dst + 1);
        }
        Ok(())
    }

    /// Keys and values alternate upwards from `dst`
    fn hash(
        &mut self,
        pairs: &[(Node, Node)],
        dst: usize,
    ) -> CodegenResult<()> {
        if pairs.len() > u8::MAX as usize {
            return Err(self.error("hash literal too long"));
        }
        for (i, (key, value)) in pairs.iter().enumerate() {
            if i == 0 {
                self.gen(key, dst)?;
                self.set_sp(dst + 1);
            } else {
                self.expr(key)?;
            }
            self.expr(value)?;
        }
        self.op(Opcode::Hash, dst, pairs.len(), 0);
        Ok(())
    }

    fn seq(
        &mut self,
        nodes: &[Node],
        dst: usize,
    ) -> CodegenResult<()> {
        let Some((last, init)) = nodes.split_last() else {
            self.op(Opcode::LoadNil, dst, 0, 0);
            return Ok(());
        };
        for node in init {
            self.stmt(node)?;
        }
        self.value_to(last, dst)
    }

    // ------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------

    fn call(
        &mut self,
        call: &Call,
        dst: usize,
    ) -> CodegenResult<()> {
        if let (Some(recv), [rhs], None, None) = (
            &call.recv,
            call.args.as_slice(),
            &call.block,
            &call.block_arg,
        ) {
            if binary_opcode(&call.name).is_some() {
                self.gen(recv, dst)?;
                self.set_sp(dst + 1);
                return self.binop(dst, &call.name, rhs);
            }
        }

        match &call.recv {
            Some(recv) => {
                self.gen(recv, dst)?;
                self.set_sp(dst + 1);
            }
            None => self.op(Opcode::LoadSelf, dst, 0, 0),
        }
        for arg in &call.args {
            self.expr(arg)?;
        }
        if call.args.len() >= u8::MAX as usize {
            return Err(self.error("too many arguments"));
        }
        let has_block = self.block_arg(call.block.as_ref(), call.block_arg.as_ref())?;
        let sym = self.sym(&call.name)?;
        let op = if has_block {
            Opcode::SendB
        } else {
            Opcode::Send
        };
        self.op(op, dst, sym, call.args.len());
        self.set_sp(dst + 1);
        Ok(())
    }

    /// `R(dst) = R(dst) <name> rhs`; `dst` is the stack top
    pub(crate) fn binop(
        &mut self,
        dst: usize,
        name: &str,
        rhs: &Node,
    ) -> CodegenResult<()> {
        match (binary_opcode(name), small_immediate(rhs)) {
            (Some(op @ (Opcode::Add | Opcode::Sub)), Some(imm)) => {
                // the fallback send writes the immediate to R(dst+1)
                self.reserve(dst + 1)?;
                let op = if op == Opcode::Add {
                    Opcode::AddI
                } else {
                    Opcode::SubI
                };
                self.op(op, dst, imm, 0);
            }
            (Some(op), _) => {
                self.expr(rhs)?;
                self.op(op, dst, 0, 0);
            }
            (None, _) => {
                self.expr(rhs)?;
                self.send(dst, name, 1)?;
            }
        }
        self.set_sp(dst + 1);
        Ok(())
    }

    /// Push the block of a call, if any
    pub(crate) fn block_arg(
        &mut self,
        block: Option<&BlockNode>,
        arg: Option<&Node>,
    ) -> CodegenResult<bool> {
        if let Some(block) = block {
            let r = self.push()?;
            let child = self.block(block)?;
            self.op(Opcode::Block, r, child, 0);
            return Ok(true);
        }
        let Some(arg) = arg else {
            return Ok(false);
        };
        match &arg.kind {
            // `&:name` becomes `{ |x| x.name }`
            NodeKind::Sym(name) => {
                let param = "_1".to_string();
                let body = Node::new(
                    NodeKind::Call(Box::new(Call {
                        recv: Some(Node::new(NodeKind::LVar(param.clone()), arg.pos)),
                        name: name.clone(),
                        args: Vec::new(),
                        block: None,
                        block_arg: None,
                    })),
                    arg.pos,
                );
                let block = BlockNode {
                    params: Params {
                        required: vec![param],
                        ..Params::default()
                    },
                    body,
                    locals: Vec::new(),
                    pos: arg.pos,
                };
                let r = self.push()?;
                let child = self.block(&block)?;
                self.op(Opcode::Block, r, child, 0);
            }
            _ => {
                self.expr(arg)?;
            }
        }
        Ok(true)
    }

    /// `super(args)` or bare `super`; the current block is passed on
    /// unless one is given
    fn super_call(
        &mut self,
        args: Option<&[Node]>,
        block: Option<&BlockNode>,
        dst: usize,
    ) -> CodegenResult<()> {
        let argc = match args {
            Some(args) => {
                for arg in args {
                    self.expr(arg)?;
                }
                args.len()
            }
            None => {
                let params = self.super_params();
                for name in &params {
                    let r = self.push()?;
                    self.load_var(name, r)?;
                }
                params.len()
            }
        };
        if argc >= u8::MAX as usize {
            return Err(self.error("too many arguments"));
        }
        if !self.block_arg(block, None)? {
            let r = self.push()?;
            self.op(Opcode::BlkPush, r, 0, 0);
        }
        self.op(Opcode::Super, dst, argc, 0);
        self.set_sp(dst + 1);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Assignment
    // ------------------------------------------------------------------

    /// Evaluate the receiver and arguments of an assignment target
    pub(crate) fn place<'n>(
        &mut self,
        target: &'n Target,
    ) -> CodegenResult<Place<'n>> {
        Ok(match target {
            Target::Index { recv, args } => {
                let r = self.expr(recv)?;
                for arg in args {
                    self.expr(arg)?;
                }
                Place::Send {
                    recv: r,
                    argc: args.len(),
                    get: "[]".to_string(),
                    set: "[]=".to_string(),
                }
            }
            Target::Attr { recv, name } => {
                let r = self.expr(recv)?;
                Place::Send {
                    recv: r,
                    argc: 0,
                    get: name.clone(),
                    set: format!("{}=", name),
                }
            }
            simple => Place::Simple(simple),
        })
    }

    /// Copy a prepared receiver and its arguments to a fresh window
    fn call_window(
        &mut self,
        recv: usize,
        argc: usize,
    ) -> CodegenResult<usize> {
        let w = self.push()?;
        self.op(Opcode::Move, w, recv, 0);
        for i in 1..=argc {
            let r = self.push()?;
            self.op(Opcode::Move, r, recv + i, 0);
        }
        Ok(w)
    }

    /// `R(dst) = place`
    pub(crate) fn read_place(
        &mut self,
        place: &Place,
        dst: usize,
    ) -> CodegenResult<()> {
        match place {
            Place::Simple(Target::LVar(name)) => self.load_var(name, dst)?,
            Place::Simple(Target::IVar(name)) => {
                let sym = self.sym(name)?;
                self.op(Opcode::GetIV, dst, sym, 0);
            }
            Place::Simple(Target::GVar(name)) => {
                let sym = self.sym(name)?;
                self.op(Opcode::GetGV, dst, sym, 0);
            }
            Place::Simple(Target::Const(name)) => {
                let sym = self.sym(name)?;
                self.op(Opcode::GetConst, dst, sym, 0);
            }
            Place::Simple(_) => return Err(self.error("invalid assignment target")),
            Place::Send {
                recv, argc, get, ..
            } => {
                let top = self.sp();
                let w = self.call_window(*recv, *argc)?;
                self.send(w, get, *argc)?;
                self.op(Opcode::Move, dst, w, 0);
                self.set_sp(top);
            }
        }
        Ok(())
    }

    /// `place = R(src)`
    pub(crate) fn write_place(
        &mut self,
        place: &Place,
        src: usize,
    ) -> CodegenResult<()> {
        match place {
            Place::Simple(Target::LVar(name)) => self.store_var(name, src)?,
            Place::Simple(Target::IVar(name)) => {
                let sym = self.sym(name)?;
                self.op(Opcode::SetIV, src, sym, 0);
            }
            Place::Simple(Target::GVar(name)) => {
                let sym = self.sym(name)?;
                self.op(Opcode::SetGV, src, sym, 0);
            }
            Place::Simple(Target::Const(name)) => {
                let sym = self.sym(name)?;
                self.op(Opcode::SetConst, src, sym, 0);
            }
            Place::Simple(_) => return Err(self.error("invalid assignment target")),
            Place::Send {
                recv, argc, set, ..
            } => {
                let top = self.sp();
                let w = self.call_window(*recv, *argc)?;
                let v = self.push()?;
                self.op(Opcode::Move, v, src, 0);
                self.send(w, set, argc + 1)?;
                self.set_sp(top);
            }
        }
        Ok(())
    }

    fn assign(
        &mut self,
        target: &Target,
        value: &Node,
        dst: usize,
    ) -> CodegenResult<()> {
        if let Target::LVar(name) = target {
            // `x = v` evaluates straight into a local register
            if let Some(Var::Local(r)) = self.lookup(name) {
                self.value_to(value, r)?;
                self.op(Opcode::Move, dst, r, 0);
                return Ok(());
            }
        }
        let place = self.place(target)?;
        self.value_to(value, dst)?;
        self.write_place(&place, dst)?;
        self.set_sp(dst + 1);
        Ok(())
    }

    /// `a op= b`; `||=` and `&&=` only assign when they have to
    fn op_assign(
        &mut self,
        target: &Target,
        op: &str,
        value: &Node,
        dst: usize,
    ) -> CodegenResult<()> {
        let place = self.place(target)?;
        self.read_place(&place, dst)?;
        match op {
            "||" | "&&" => {
                let skip = if op == "||" {
                    Opcode::JmpIf
                } else {
                    Opcode::JmpNot
                };
                let done = self.jump_forward(skip, dst);
                self.value_to(value, dst)?;
                self.write_place(&place, dst)?;
                self.patch(done)?;
            }
            _ => {
                let t = self.push()?;
                self.op(Opcode::Move, t, dst, 0);
                self.binop(t, op, value)?;
                self.op(Opcode::Move, dst, t, 0);
                self.set_sp(t);
                self.write_place(&place, dst)?;
            }
        }
        self.set_sp(dst + 1);
        Ok(())
    }

    /// `a, b = x, y` or `a, b = array`
    fn multi_assign(
        &mut self,
        targets: &[Target],
        value: &Node,
        dst: usize,
    ) -> CodegenResult<()> {
        if let NodeKind::Array(items) = &value.kind {
            // every right-hand value is computed before any target changes
            let first = dst + 1;
            self.set_sp(first);
            for item in items {
                self.expr(item)?;
            }
            let top = self.sp();
            for (i, target) in targets.iter().enumerate() {
                let src = if i < items.len() {
                    first + i
                } else {
                    let r = self.push()?;
                    self.op(Opcode::LoadNil, r, 0, 0);
                    r
                };
                let place = self.place(target)?;
                self.write_place(&place, src)?;
                self.set_sp(top);
            }
            if items.len() > u8::MAX as usize {
                return Err(self.error("too many values"));
            }
            self.op(Opcode::Array, dst, first, items.len());
            self.set_sp(dst + 1);
            return Ok(());
        }

        self.value_to(value, dst)?;
        // anything but an array is wrapped in one
        let r = self.push()?;
        let sym = self.sym("Array")?;
        self.op(Opcode::GetConst, r, sym, 0);
        let v = self.push()?;
        self.op(Opcode::Move, v, dst, 0);
        self.send(r, "===", 1)?;
        let is_array = self.jump_forward(Opcode::JmpIf, r);
        self.op(Opcode::Array, dst, dst, 1);
        self.patch(is_array)?;
        self.set_sp(dst + 1);

        for (i, target) in targets.iter().enumerate() {
            let r = self.push()?;
            self.op(Opcode::Move, r, dst, 0);
            let idx = self.push()?;
            self.load_int(i as i64, idx)?;
            self.send(r, "[]", 1)?;
            self.set_sp(r + 1);
            let place = self.place(target)?;
            self.write_place(&place, r)?;
            self.set_sp(dst + 1);
        }
        Ok(())
    }
}
