//! Method dispatch and frame management
//!
//! Calling convention: the receiver sits in `R(a)`, the arguments in
//! `R(a+1) .. R(a+argc)` and the block (when passed) in `R(a+argc+1)`. A Ruby
//! callee's register window starts at `a`, so its `R0` is `self`. The result
//! always lands back in `R(a)` of the caller.

use smallvec::SmallVec;
use std::rc::Rc;

use crate::runtime::class::{builtin, ClassId, LookupTarget, Method, MethodResolver, Resolution};
use crate::runtime::heap::{HeapBody, RObject};
use crate::runtime::scheduler::Tcb;
use crate::runtime::symbol::SymbolId;
use crate::runtime::value::Value;
use crate::vm::builtins::{CallArgs, NativeFn};
use crate::vm::errors::Raise;
use crate::vm::executor::{Flow, Switch, Vm};
use crate::vm::frames::{CallInfo, EnvRef, FrameKind};
use crate::vm::irep::Irep;

/// Everything needed to push a frame
pub(crate) struct FrameSpec {
    pub irep: Rc<Irep>,
    pub base: usize,
    pub kind: FrameKind,
    pub mid: Option<SymbolId>,
    pub owner: ClassId,
    pub target_class: ClassId,
    pub env: Option<EnvRef>,
    pub home: Option<u64>,
    pub creator: Option<u64>,
    pub proc_val: Value,
    pub ret_self: bool,
    pub argc: usize,
    pub has_block: bool,
}

impl FrameSpec {
    fn method(
        irep: Rc<Irep>,
        base: usize,
        mid: SymbolId,
        owner: ClassId,
        argc: usize,
        has_block: bool,
    ) -> Self {
        Self {
            irep,
            base,
            kind: FrameKind::Method,
            mid: Some(mid),
            owner,
            target_class: owner,
            env: None,
            home: None,
            creator: None,
            proc_val: Value::Nil,
            ret_self: false,
            argc,
            has_block,
        }
    }
}

/// Classes whose instances cannot come from `Class#new`
const NOT_INSTANTIABLE: &[ClassId] = &[
    builtin::NIL,
    builtin::TRUE,
    builtin::FALSE,
    builtin::INTEGER,
    builtin::FLOAT,
    builtin::NUMERIC,
    builtin::SYMBOL,
    builtin::CLASS,
    builtin::PROC,
    builtin::TASK,
];

impl Vm {
    /// Class of any value
    pub fn class_of(
        &self,
        v: Value,
    ) -> ClassId {
        match v {
            Value::Nil => builtin::NIL,
            Value::True => builtin::TRUE,
            Value::False => builtin::FALSE,
            Value::Integer(_) => builtin::INTEGER,
            Value::Float(_) => builtin::FLOAT,
            Value::Symbol(_) => builtin::SYMBOL,
            Value::Class(_) => builtin::CLASS,
            Value::Task(_) => builtin::TASK,
            Value::String(_) => builtin::STRING,
            Value::Array(_) => builtin::ARRAY,
            Value::Hash(_) => builtin::HASH,
            Value::Proc(_) => builtin::PROC,
            Value::Range(_) => builtin::RANGE,
            Value::Object(_) => self
                .heap
                .object(v)
                .map(|o| o.class)
                .unwrap_or(builtin::OBJECT),
            Value::Data(_) => self
                .heap
                .data(v)
                .map(|d| d.class)
                .unwrap_or(builtin::OBJECT),
        }
    }

    pub fn class_name(
        &self,
        class: ClassId,
    ) -> &str {
        self.classes
            .name(class)
            .map(|s| self.symbols.name(s))
            .unwrap_or("<anonymous>")
    }

    /// Method lookup target for a receiver
    pub(crate) fn lookup_target(
        &self,
        recv: Value,
    ) -> LookupTarget {
        match recv {
            Value::Class(c) => LookupTarget::Singleton(c),
            other => LookupTarget::Instance(self.class_of(other)),
        }
    }

    /// True when `recv` responds to `mid`
    pub(crate) fn responds_to(
        &self,
        recv: Value,
        mid: SymbolId,
    ) -> bool {
        if matches!(recv, Value::Proc(_)) && (mid == self.sym.call || mid == self.sym.yield_) {
            return true;
        }
        self.classes.find_direct(self.lookup_target(recv), mid).is_some()
    }

    /// Send `mid` to `R(a)`
    pub(crate) fn send(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        mid: SymbolId,
        argc: usize,
        has_block: bool,
        pc: usize,
    ) -> Result<(), Raise> {
        let recv = tcb.core.regs[a];

        if matches!(recv, Value::Proc(_))
            && (mid == self.sym.call
                || mid == self.sym.yield_
                || mid == self.sym.aref
                || mid == self.sym.eqq)
        {
            return self.call_proc(tcb, a, argc, has_block);
        }

        if recv.is_nil() && mid == self.sym.yield_ {
            return Err(Raise::local_jump("no block given (yield)"));
        }

        if mid == self.sym.send || mid == self.sym.send2 {
            if argc == 0 {
                return Err(Raise::argument("no method name given"));
            }
            let name = match tcb.core.regs[a + 1] {
                Value::Symbol(s) => s,
                v @ Value::String(_) => {
                    let name = self
                        .heap
                        .string(v)
                        .map(|s| s.as_str_lossy().into_owned())
                        .unwrap_or_default();
                    self.symbols.intern(&name)
                }
                other => {
                    return Err(Raise::type_error(format!(
                        "{} is not a symbol nor a string",
                        self.inspect(other)
                    )))
                }
            };
            let moved = argc + has_block as usize;
            for i in 0..moved {
                let v = std::mem::take(&mut tcb.core.regs[a + 2 + i]);
                self.put(&mut tcb.core, a + 1 + i, v);
            }
            return self.send(tcb, a, name, argc - 1, has_block, pc);
        }

        if let Value::Class(class) = recv {
            if mid == self.sym.new {
                return match self.classes.find_class_method(class, mid) {
                    Some((owner, method)) => {
                        self.invoke(tcb, a, mid, owner, method, argc, has_block, pc)
                    }
                    None => self.instantiate(tcb, a, class, argc, has_block, pc),
                };
            }
        }

        match self.classes.resolve(self.lookup_target(recv), mid) {
            Resolution::Found { owner, method } => {
                self.invoke(tcb, a, mid, owner, method, argc, has_block, pc)
            }
            Resolution::Missing { owner, method } => {
                let moved = argc + has_block as usize;
                if a + 2 + moved > tcb.core.regs.len() {
                    return Err(Raise::stack_overflow());
                }
                for i in (0..moved).rev() {
                    let v = std::mem::take(&mut tcb.core.regs[a + 1 + i]);
                    self.put(&mut tcb.core, a + 2 + i, v);
                }
                self.put(&mut tcb.core, a + 1, Value::Symbol(mid));
                let missing = self.sym.method_missing;
                self.invoke(tcb, a, missing, owner, method, argc + 1, has_block, pc)
            }
            Resolution::NotFound => Err(self.no_method(recv, mid)),
        }
    }

    pub(crate) fn no_method(
        &self,
        recv: Value,
        mid: SymbolId,
    ) -> Raise {
        let target = match recv {
            Value::Nil => "nil".to_string(),
            Value::True => "true".to_string(),
            Value::False => "false".to_string(),
            Value::Class(c) => format!("{}:Class", self.class_name(c)),
            other => format!("an instance of {}", self.class_name(self.class_of(other))),
        };
        Raise::new(
            builtin::NO_METHOD_ERROR,
            format!("undefined method '{}' for {}", self.symbols.name(mid), target),
        )
    }

    /// Run a resolved method
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn invoke(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        mid: SymbolId,
        owner: ClassId,
        method: Method,
        argc: usize,
        has_block: bool,
        pc: usize,
    ) -> Result<(), Raise> {
        match method {
            Method::Native(f) => self.call_native(tcb, a, f, argc, has_block, pc, false),
            Method::Ruby(irep) => {
                self.push_frame(tcb, FrameSpec::method(irep, a, mid, owner, argc, has_block))
            }
            Method::AttrReader(ivar) => {
                if argc != 0 {
                    return Err(Raise::arity(argc, 0, 0));
                }
                let v = self.heap.ivar_get(tcb.core.regs[a], ivar);
                self.heap.incref(v);
                self.clear_args(tcb, a, argc, has_block);
                self.put(&mut tcb.core, a, v);
                Ok(())
            }
            Method::AttrWriter(ivar) => {
                if argc != 1 {
                    return Err(Raise::arity(argc, 1, 1));
                }
                let recv = tcb.core.regs[a];
                let v = tcb.core.regs[a + 1];
                self.heap.incref(v);
                if !self.heap.ivar_set(recv, ivar, v)? {
                    return Err(Raise::runtime(format!(
                        "can't modify {}",
                        self.inspect(recv)
                    )));
                }
                self.heap.incref(v);
                self.clear_args(tcb, a, argc, has_block);
                self.put(&mut tcb.core, a, v);
                Ok(())
            }
        }
    }

    fn clear_args(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        argc: usize,
        has_block: bool,
    ) {
        let end = (a + 1 + argc + has_block as usize).min(tcb.core.regs.len());
        for i in a + 1..end {
            let v = std::mem::take(&mut tcb.core.regs[i]);
            self.heap.decref(v);
        }
    }

    /// Call a native method; `keep_recv` discards the result (`initialize`)
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn call_native(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        f: NativeFn,
        argc: usize,
        has_block: bool,
        pc: usize,
        keep_recv: bool,
    ) -> Result<(), Raise> {
        let regs = &tcb.core.regs;
        let call = CallArgs {
            recv: regs[a],
            args: regs[a + 1..=a + argc].iter().copied().collect::<SmallVec<_>>(),
            block: if has_block {
                regs[a + argc + 1]
            } else {
                Value::Nil
            },
        };
        let result = f(self, &call)?;
        if matches!(self.pending, Some(Switch::Wait(_))) {
            // re-run the call once woken
            self.heap.decref(result);
            if let Some(ci) = tcb.core.frame_mut() {
                ci.pc = pc;
            }
            return Ok(());
        }
        self.clear_args(tcb, a, argc, has_block);
        if keep_recv {
            self.heap.decref(result);
        } else {
            self.put(&mut tcb.core, a, result);
        }
        Ok(())
    }

    /// Push a Ruby frame with its window at `spec.base`
    pub(crate) fn push_frame(
        &mut self,
        tcb: &mut Tcb,
        spec: FrameSpec,
    ) -> Result<(), Raise> {
        let core = &mut tcb.core;
        let irep = spec.irep;
        let a = spec.base;
        let nregs = irep.nregs as usize;
        if core.callinfo.len() >= self.config.max_call_depth || a + nregs > core.regs.len() {
            self.heap.decref(spec.proc_val);
            return Err(Raise::stack_overflow());
        }

        let block = if spec.has_block {
            std::mem::take(&mut core.regs[a + spec.argc + 1])
        } else {
            Value::Nil
        };
        let required = irep.argc as usize;
        let params = required + irep.optc as usize;
        let mut given = spec.argc;

        if spec.kind == FrameKind::Block {
            // |a, b| on a single array argument destructures it
            if given == 1 && params > 1 {
                let items = self.heap.array(core.regs[a + 1]).map(|arr| arr.items.clone());
                if let Some(items) = items {
                    let arr = std::mem::take(&mut core.regs[a + 1]);
                    let n = items.len().min(params);
                    for (i, v) in items.into_iter().take(n).enumerate() {
                        self.heap.incref(v);
                        self.put(core, a + 1 + i, v);
                    }
                    self.heap.decref(arr);
                    given = n;
                }
            }
            if given > params {
                for i in a + 1 + params..=a + given {
                    let v = std::mem::take(&mut core.regs[i]);
                    self.heap.decref(v);
                }
                given = params;
            }
        } else if given < required || given > params {
            self.heap.decref(block);
            self.heap.decref(spec.proc_val);
            let max = params;
            return Err(Raise::arity(given, required, max));
        }

        for i in a + 1 + given..a + nregs {
            let v = std::mem::take(&mut core.regs[i]);
            self.heap.decref(v);
        }
        self.put(core, a + irep.block_slot(), block);

        let entry = irep.entry_pc(given.saturating_sub(required));
        let serial = self.next_serial();
        let handler_base = core.handlers.len();
        core.callinfo.push(CallInfo {
            irep,
            pc: entry,
            base: a,
            kind: spec.kind,
            mid: spec.mid,
            owner: spec.owner,
            target_class: spec.target_class,
            env: spec.env,
            home: spec.home,
            creator: spec.creator,
            proc_val: spec.proc_val,
            ret_self: spec.ret_self,
            serial,
            handler_base,
            argc: given.max(required),
        });
        Ok(())
    }

    /// `Proc#call`, `yield` and friends
    fn call_proc(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        argc: usize,
        has_block: bool,
    ) -> Result<(), Raise> {
        let Some(body) = self.heap.proc_body(tcb.core.regs[a]).cloned() else {
            return Err(Raise::type_error("not a proc"));
        };
        // the proc's reference moves from R(a) into the frame
        let proc_val = tcb.core.regs[a];
        self.heap.incref(body.self_val);
        tcb.core.regs[a] = body.self_val;
        let kind = if body.lambda {
            FrameKind::Lambda
        } else {
            FrameKind::Block
        };
        self.push_frame(
            tcb,
            FrameSpec {
                irep: body.irep,
                base: a,
                kind,
                mid: None,
                owner: body.target_class,
                target_class: body.target_class,
                env: body.env,
                home: if body.lambda { None } else { body.home },
                creator: body.creator,
                proc_val,
                ret_self: false,
                argc,
                has_block,
            },
        )
    }

    /// Default `Class#new`: allocate, then run `initialize`
    fn instantiate(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        class: ClassId,
        argc: usize,
        has_block: bool,
        pc: usize,
    ) -> Result<(), Raise> {
        if NOT_INSTANTIABLE
            .iter()
            .any(|c| self.classes.is_subclass(class, *c))
        {
            return Err(self.no_method(Value::Class(class), self.sym.new));
        }
        let obj = self.heap.alloc(HeapBody::Object(RObject {
            class,
            ivars: Vec::new(),
        }))?;
        self.put(&mut tcb.core, a, obj);

        let init = self.sym.initialize;
        match self.classes.find_instance_method(class, init) {
            Some((owner, Method::Ruby(irep))) => {
                let mut spec = FrameSpec::method(irep, a, init, owner, argc, has_block);
                spec.ret_self = true;
                self.push_frame(tcb, spec)
            }
            Some((_, Method::Native(f))) => {
                self.call_native(tcb, a, f, argc, has_block, pc, true)
            }
            _ => {
                if argc != 0 {
                    return Err(Raise::arity(argc, 0, 0));
                }
                self.clear_args(tcb, a, argc, has_block);
                Ok(())
            }
        }
    }

    /// `super(args)`: the block slot `R(a+argc+1)` is always present
    pub(crate) fn call_super(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        argc: usize,
        pc: usize,
    ) -> Result<(), Raise> {
        let Some(idx) = self.method_frame(&tcb.core) else {
            return Err(Raise::runtime("super called outside of method"));
        };
        let ci = &tcb.core.callinfo[idx];
        let (Some(mid), owner, recv) = (ci.mid, ci.owner, tcb.core.regs[ci.base]) else {
            return Err(Raise::runtime("super called outside of method"));
        };
        let Some(superclass) = self.classes.superclass(owner) else {
            return Err(self.no_method(recv, mid));
        };
        let found = match recv {
            Value::Class(_) => self.classes.find_class_method(superclass, mid),
            _ => self.classes.find_instance_method(superclass, mid),
        };
        self.heap.incref(recv);
        self.put(&mut tcb.core, a, recv);
        match found {
            Some((owner, method)) => self.invoke(tcb, a, mid, owner, method, argc, true, pc),
            None if mid == self.sym.initialize => {
                self.clear_args(tcb, a, argc, true);
                self.put(&mut tcb.core, a, Value::Nil);
                Ok(())
            }
            None => Err(Raise::new(
                builtin::NO_METHOD_ERROR,
                format!("super: no superclass method '{}'", self.symbols.name(mid)),
            )),
        }
    }

    /// Index of the method frame a block frame runs inside
    fn method_frame(
        &self,
        core: &crate::vm::frames::VmCore,
    ) -> Option<usize> {
        let mut idx = core.callinfo.len().checked_sub(1)?;
        loop {
            let ci = &core.callinfo[idx];
            match ci.kind {
                FrameKind::Method => return Some(idx),
                FrameKind::Top | FrameKind::ClassBody => return None,
                FrameKind::Block | FrameKind::Lambda => {
                    idx = core.find_frame(ci.env?.serial)?;
                }
            }
        }
    }

    /// Pop the current frame, delivering `v` (owned) to the caller
    pub(crate) fn do_return(
        &mut self,
        tcb: &mut Tcb,
        v: Value,
    ) -> Result<Flow, Raise> {
        let core = &mut tcb.core;
        let Some(ci) = core.callinfo.pop() else {
            self.heap.replace(&mut tcb.result, v);
            return Ok(Flow::Finished);
        };
        let v = if ci.ret_self {
            self.heap.decref(v);
            let recv = core.regs[ci.base];
            self.heap.incref(recv);
            recv
        } else {
            v
        };
        let end = ci.top_reg().min(core.regs.len());
        for i in ci.base..end {
            let old = std::mem::take(&mut core.regs[i]);
            self.heap.decref(old);
        }
        core.handlers.truncate(ci.handler_base);
        self.heap.decref(ci.proc_val);

        if core.callinfo.is_empty() {
            self.heap.replace(&mut tcb.result, v);
            return Ok(Flow::Finished);
        }
        self.put(core, ci.base, v);
        Ok(Flow::Continue)
    }

    /// `return` inside a block leaves the method the block was written in
    pub(crate) fn return_from_block(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
    ) -> Result<Flow, Raise> {
        let v = tcb.core.regs[a];
        self.heap.incref(v);
        let Some(ci) = tcb.core.frame() else {
            return self.do_return(tcb, v);
        };
        if ci.kind != FrameKind::Block {
            return self.do_return(tcb, v);
        }
        let home = ci.home.and_then(|serial| tcb.core.find_frame(serial));
        let Some(idx) = home else {
            self.heap.decref(v);
            return Err(Raise::local_jump("unexpected return"));
        };
        self.unwind_to(&mut tcb.core, idx + 1);
        self.do_return(tcb, v)
    }

    /// `break` inside a block returns from the call that received the block
    pub(crate) fn break_from_block(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
    ) -> Result<Flow, Raise> {
        let v = tcb.core.regs[a];
        self.heap.incref(v);
        let Some(ci) = tcb.core.frame() else {
            return self.do_return(tcb, v);
        };
        if ci.kind == FrameKind::Lambda {
            return self.do_return(tcb, v);
        }
        let creator = ci.creator.and_then(|serial| tcb.core.find_frame(serial));
        let Some(idx) = creator.filter(|idx| idx + 1 < tcb.core.callinfo.len()) else {
            self.heap.decref(v);
            return Err(Raise::local_jump("break from proc-closure"));
        };
        self.unwind_to(&mut tcb.core, idx + 2);
        self.do_return(tcb, v)
    }

    /// `class Foo ... end` body with `self` = `R(a)`
    pub(crate) fn exec_class_body(
        &mut self,
        tcb: &mut Tcb,
        a: usize,
        irep: Rc<Irep>,
    ) -> Result<(), Raise> {
        let Value::Class(class) = tcb.core.regs[a] else {
            return Err(Raise::type_error("class body needs a class"));
        };
        self.push_frame(
            tcb,
            FrameSpec {
                irep,
                base: a,
                kind: FrameKind::ClassBody,
                mid: None,
                owner: class,
                target_class: class,
                env: None,
                home: None,
                creator: None,
                proc_val: Value::Nil,
                ret_self: false,
                argc: 0,
                has_block: false,
            },
        )
    }
}
