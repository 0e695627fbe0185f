//! Virtual Machine executor
//!
//! [`Vm`] is the runtime context: it owns the arena-backed heap, the symbol and
//! class tables, globals, the task table and the tick source. There is no
//! global state; everything a running task touches hangs off this value.
//!
//! The interpreter loop runs one task at a time. Between instructions it
//! counts simulated ticks, honours switch requests raised by native methods
//! (sleep, pass, join, ...) and checks the preemption flag.

use hashbrown::HashMap;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::frontend::{Compiler, RubyCompiler};
use crate::peripheral::{LoopbackGpio, Peripheral, PeripheralRegistry};
use crate::runtime::class::{builtin, ClassId, ClassTable};
use crate::runtime::heap::{HeapBody, RHash, RProc, RRange, Heap};
use crate::runtime::memory::{AllocKind, Block, MemoryStats};
use crate::runtime::scheduler::{Scheduler, TaskHandle, Tcb, TickSource, TickTimer, WaitReason};
use crate::runtime::symbol::{SymbolId, SymbolTable};
use crate::runtime::value::numeric::{arith, compare, num_eq, ArithOp, NumericError};
use crate::runtime::value::Value;
use crate::util::config::{RuntimeConfig, TickMode};
use crate::vm::builtins;
use crate::vm::console::Console;
use crate::vm::errors::{Raise, VmError, VmResult};
use crate::vm::frames::{EnvRef, FrameKind, Handler, VmCore};
use crate::vm::irep::{Irep, Literal, RawIrep};
use crate::vm::opcode::{decode, Opcode};

/// Ruby source of the block-taking core methods
const PRELUDE: &str = include_str!("prelude.rb");

/// Symbols the interpreter refers to directly
#[derive(Debug, Clone, Copy)]
pub(crate) struct KnownSymbols {
    pub call: SymbolId,
    pub yield_: SymbolId,
    pub aref: SymbolId,
    pub eqq: SymbolId,
    pub new: SymbolId,
    pub initialize: SymbolId,
    pub send: SymbolId,
    pub send2: SymbolId,
    pub method_missing: SymbolId,
    pub message_iv: SymbolId,
    pub add: SymbolId,
    pub sub: SymbolId,
    pub mul: SymbolId,
    pub div: SymbolId,
    pub eq: SymbolId,
    pub lt: SymbolId,
    pub le: SymbolId,
    pub gt: SymbolId,
    pub ge: SymbolId,
}

impl KnownSymbols {
    fn new(symbols: &mut SymbolTable) -> Self {
        Self {
            call: symbols.intern("call"),
            yield_: symbols.intern("yield"),
            aref: symbols.intern("[]"),
            eqq: symbols.intern("==="),
            new: symbols.intern("new"),
            initialize: symbols.intern("initialize"),
            send: symbols.intern("send"),
            send2: symbols.intern("__send__"),
            method_missing: symbols.intern("method_missing"),
            message_iv: symbols.intern("@message"),
            add: symbols.intern("+"),
            sub: symbols.intern("-"),
            mul: symbols.intern("*"),
            div: symbols.intern("/"),
            eq: symbols.intern("=="),
            lt: symbols.intern("<"),
            le: symbols.intern("<="),
            gt: symbols.intern(">"),
            ge: symbols.intern(">="),
        }
    }
}

/// Scheduling request raised by a native method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Switch {
    /// Give up the rest of the timeslice
    Yield,
    /// Sleep for this many ticks
    Sleep(u64),
    /// Block, then re-run the calling instruction when woken
    Wait(WaitReason),
    Suspend,
    Terminate,
}

/// Why the interpreter loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Exit {
    Finished,
    Raised,
    Preempted,
    Switch(Switch),
}

/// Control flow after one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Continue,
    Finished,
}

/// A loaded compilation unit and the arena block charged for it
#[derive(Debug)]
pub struct LoadedIrep {
    pub irep: Rc<Irep>,
    pub(crate) block: Option<Block>,
}

/// The runtime
pub struct Vm {
    pub(crate) config: RuntimeConfig,
    pub(crate) heap: Heap,
    pub(crate) symbols: SymbolTable,
    pub(crate) classes: ClassTable,
    pub(crate) globals: HashMap<SymbolId, Value>,
    pub(crate) constants: HashMap<(ClassId, SymbolId), Value>,
    pub(crate) scheduler: Scheduler,
    pub(crate) tick: Arc<TickSource>,
    pub(crate) timer: Option<TickTimer>,
    /// Task being executed
    pub(crate) current: Option<TaskHandle>,
    pub(crate) pending: Option<Switch>,
    /// Name and priority of the task being executed
    pub(crate) running: Option<(String, u8)>,
    /// Priority the running task asked for; applied when it is put back
    pub(crate) priority_change: Option<u8>,
    pub(crate) console: Console,
    pub(crate) peripherals: PeripheralRegistry,
    pub(crate) rng: StdRng,
    pub(crate) sym: KnownSymbols,
    /// Top-level `self`
    pub(crate) main_obj: Value,
    /// Pinned `NoMemoryError` raised when the arena is exhausted
    pub(crate) nomem: Value,
    /// Units dropped while code defined by them was still referenced
    pub(crate) retained: Vec<LoadedIrep>,
    prelude: Option<LoadedIrep>,
    serial: u64,
    sim_count: u32,
    booting: bool,
}

impl std::fmt::Debug for Vm {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Vm")
            .field("heap", &self.heap)
            .field("classes", &self.classes.len())
            .field("symbols", &self.symbols.len())
            .field("scheduler", &self.scheduler.stats())
            .field("tick", &self.tick.now())
            .finish()
    }
}

impl Vm {
    /// Boot a runtime: builtin classes, core methods and the prelude
    pub fn new(config: RuntimeConfig) -> VmResult<Self> {
        config
            .validate()
            .map_err(|e| VmError::Boot(e.to_string()))?;
        let mut symbols = SymbolTable::new();
        let classes = ClassTable::with_builtins(&mut symbols);
        let sym = KnownSymbols::new(&mut symbols);
        let mut vm = Self {
            heap: Heap::new(config.arena_size),
            scheduler: Scheduler::new(config.max_tasks),
            rng: StdRng::seed_from_u64(config.rng_seed),
            config,
            symbols,
            classes,
            globals: HashMap::new(),
            constants: HashMap::new(),
            tick: Arc::new(TickSource::new()),
            timer: None,
            current: None,
            pending: None,
            running: None,
            priority_change: None,
            console: Console::default(),
            peripherals: PeripheralRegistry::new(),
            sym,
            main_obj: Value::Nil,
            nomem: Value::Nil,
            retained: Vec::new(),
            prelude: None,
            serial: 0,
            sim_count: 0,
            booting: true,
        };
        vm.boot()?;
        vm.booting = false;
        if vm.config.tick_mode == TickMode::External {
            vm.start_timer();
        }
        Ok(vm)
    }

    fn boot(&mut self) -> VmResult<()> {
        for id in 0..builtin::TABLE.len() {
            let class = ClassId(id as u32);
            if let Some(name) = self.classes.name(class) {
                self.constants
                    .insert((builtin::OBJECT, name), Value::Class(class));
            }
        }
        self.main_obj = self.heap.alloc(HeapBody::Object(crate::runtime::heap::RObject {
            class: builtin::OBJECT,
            ivars: Vec::new(),
        }))?;
        self.nomem = self
            .make_exception(builtin::NO_MEMORY_ERROR, "failed to allocate memory")
            .map_err(VmError::Alloc)?;

        builtins::install(self);
        self.peripherals
            .register("gpio", Box::new(LoopbackGpio::new()));

        let raw = RubyCompiler::new()
            .compile(PRELUDE)
            .map_err(|e| VmError::Boot(format!("prelude: {}", e)))?;
        let unit = self.load_raw(&raw)?;
        let mut tcb = Tcb::new("prelude".to_string(), 0, false, self.config.max_regs);
        self.start_frame(&mut tcb, &unit.irep);
        let exit = self.execute(&mut tcb);
        let failed = exit == Exit::Raised;
        let error = tcb.error.take();
        self.clear_core(&mut tcb);
        self.heap.decref(std::mem::take(&mut tcb.result));
        if failed {
            let message = error
                .map(|e| {
                    let m = self.exception_message(e);
                    self.heap.decref(e);
                    m
                })
                .unwrap_or_default();
            return Err(VmError::Boot(format!("prelude raised: {}", message)));
        }
        self.prelude = Some(unit);
        debug!(
            classes = self.classes.len(),
            symbols = self.symbols.len(),
            "vm booted"
        );
        Ok(())
    }

    /// Start the external tick thread
    pub fn start_timer(&mut self) {
        if self.timer.is_none() {
            let period = std::time::Duration::from_millis(self.config.tick_unit_ms);
            self.timer = Some(TickTimer::start(self.tick.clone(), period));
        }
    }

    pub fn stop_timer(&mut self) {
        if let Some(mut timer) = self.timer.take() {
            timer.stop();
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn memory_stats(&self) -> MemoryStats {
        self.heap.memory_stats()
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }

    pub fn intern(
        &mut self,
        name: &str,
    ) -> SymbolId {
        self.symbols.intern(name)
    }

    pub fn symbol_name(
        &self,
        id: SymbolId,
    ) -> &str {
        self.symbols.name(id)
    }

    /// Shared tick source (for drivers and tests that follow VM time)
    pub fn tick_source(&self) -> Arc<TickSource> {
        self.tick.clone()
    }

    /// Current tick
    pub fn now(&self) -> u64 {
        self.tick.now()
    }

    pub fn set_console(
        &mut self,
        console: Console,
    ) {
        self.console = console;
    }

    /// Register a peripheral driver under `name`
    pub fn register_peripheral(
        &mut self,
        name: &str,
        driver: Box<dyn Peripheral>,
    ) {
        self.peripherals.register(name, driver);
    }

    pub fn peripherals_mut(&mut self) -> &mut PeripheralRegistry {
        &mut self.peripherals
    }

    /// Value of global `$name` (borrowed)
    pub fn global(
        &self,
        name: &str,
    ) -> Value {
        let name = name.strip_prefix('$').unwrap_or(name);
        self.symbols
            .lookup(&format!("${}", name))
            .and_then(|s| self.globals.get(&s).copied())
            .unwrap_or(Value::Nil)
    }

    /// Set global `$name`, taking ownership of `v`
    pub fn set_global(
        &mut self,
        name: &str,
        v: Value,
    ) {
        let name = name.strip_prefix('$').unwrap_or(name);
        let id = self.symbols.intern(&format!("${}", name));
        if let Some(old) = self.globals.insert(id, v) {
            self.heap.decref(old);
        }
    }

    /// Integers of an Array value
    pub fn int_array(
        &self,
        v: Value,
    ) -> Option<Vec<i64>> {
        self.heap
            .array(v)?
            .items
            .iter()
            .map(|x| x.as_int())
            .collect()
    }

    // ------------------------------------------------------------------
    // Irep loading
    // ------------------------------------------------------------------

    /// Load a binary irep blob
    pub fn load_irep(
        &mut self,
        bytes: &[u8],
    ) -> VmResult<LoadedIrep> {
        let raw = RawIrep::from_bytes(bytes)?;
        self.load_raw(&raw)
    }

    /// Verify, intern and charge a compiled unit
    pub fn load_raw(
        &mut self,
        raw: &RawIrep,
    ) -> VmResult<LoadedIrep> {
        raw.verify()?;
        let irep = raw.intern(&mut self.symbols);
        let block = self
            .heap
            .arena_mut()
            .alloc(irep.footprint(), AllocKind::Raw)?;
        debug!(bytes = block.size(), "irep loaded");
        Ok(LoadedIrep {
            irep,
            block: Some(block),
        })
    }

    /// Compile Ruby source with the bundled front-end and load it
    pub fn compile(
        &mut self,
        source: &str,
    ) -> VmResult<LoadedIrep> {
        let raw = RubyCompiler::new().compile(source)?;
        self.load_raw(&raw)
    }

    /// Drop a unit; its storage is kept while code from it is still referenced
    pub fn release_irep(
        &mut self,
        unit: LoadedIrep,
    ) {
        if unit.irep.is_shared() {
            debug!("irep retained while referenced");
            self.retained.push(unit);
        } else if let Some(block) = unit.block {
            if let Err(e) = self.heap.arena_mut().free(block) {
                tracing::error!("releasing irep storage failed: {}", e);
            }
        }
    }

    /// Free retained units nobody references any more
    pub(crate) fn sweep_retained(&mut self) {
        if self.retained.is_empty() {
            return;
        }
        let units = std::mem::take(&mut self.retained);
        for unit in units {
            self.release_irep(unit);
        }
    }

    // ------------------------------------------------------------------
    // Frames and registers
    // ------------------------------------------------------------------

    pub(crate) fn next_serial(&mut self) -> u64 {
        self.serial += 1;
        self.serial
    }

    /// Reset `tcb` to run `irep` from the top with `self` = main
    pub(crate) fn start_frame(
        &mut self,
        tcb: &mut Tcb,
        irep: &Rc<Irep>,
    ) {
        self.clear_core(tcb);
        let serial = self.next_serial();
        tcb.core
            .callinfo
            .push(crate::vm::frames::CallInfo::top(irep.clone(), builtin::OBJECT, serial));
        self.heap.incref(self.main_obj);
        let main = self.main_obj;
        self.heap.replace(&mut tcb.core.regs[0], main);
    }

    /// Release every frame and register of a task
    pub(crate) fn clear_core(
        &mut self,
        tcb: &mut Tcb,
    ) {
        self.unwind_to(&mut tcb.core, 0);
        for i in 0..tcb.core.regs.len() {
            let v = std::mem::take(&mut tcb.core.regs[i]);
            self.heap.decref(v);
        }
        tcb.core.handlers.clear();
        let exc = std::mem::take(&mut tcb.core.exception);
        self.heap.decref(exc);
    }

    /// Pop frames until `keep` remain, releasing their windows
    pub(crate) fn unwind_to(
        &mut self,
        core: &mut VmCore,
        keep: usize,
    ) {
        while core.callinfo.len() > keep {
            let Some(ci) = core.callinfo.pop() else { break };
            let end = ci.top_reg().min(core.regs.len());
            for i in ci.base..end {
                let v = std::mem::take(&mut core.regs[i]);
                self.heap.decref(v);
            }
            core.handlers.truncate(ci.handler_base);
            self.heap.decref(ci.proc_val);
        }
    }

    #[inline]
    pub(crate) fn put(
        &mut self,
        core: &mut VmCore,
        idx: usize,
        v: Value,
    ) {
        self.heap.replace(&mut core.regs[idx], v);
    }

    /// Copy register `src` into `dst`
    #[inline]
    fn copy_reg(
        &mut self,
        core: &mut VmCore,
        dst: usize,
        src: usize,
    ) {
        let v = core.regs[src];
        self.heap.incref(v);
        self.put(core, dst, v);
    }

    /// Absolute register of local `reg` in the frame `level` closures up
    fn upvar_index(
        &self,
        core: &VmCore,
        reg: usize,
        level: usize,
    ) -> Result<usize, Raise> {
        let gone = || Raise::runtime("closure environment has gone out of scope");
        let mut env = core.frame().and_then(|ci| ci.env);
        for _ in 0..level {
            let e = env.ok_or_else(gone)?;
            let idx = core.find_frame(e.serial).ok_or_else(gone)?;
            env = core.callinfo[idx].env;
        }
        let e = env.ok_or_else(gone)?;
        core.find_frame(e.serial).ok_or_else(gone)?;
        let idx = e.base + reg;
        if idx >= core.regs.len() {
            return Err(gone());
        }
        Ok(idx)
    }

    /// Block argument of the innermost method frame
    fn current_block(
        &self,
        core: &VmCore,
    ) -> Value {
        let mut idx = core.callinfo.len();
        while idx > 0 {
            let ci = &core.callinfo[idx - 1];
            match ci.kind {
                FrameKind::Method | FrameKind::Top => {
                    let slot = ci.base + ci.irep.block_slot();
                    return core.regs.get(slot).copied().unwrap_or(Value::Nil);
                }
                FrameKind::ClassBody => return Value::Nil,
                FrameKind::Block | FrameKind::Lambda => {
                    match ci.env.and_then(|e| core.find_frame(e.serial)) {
                        Some(parent) => idx = parent + 1,
                        None => return Value::Nil,
                    }
                }
            }
        }
        Value::Nil
    }

    /// Constant lookup: lexical class chain, then Object
    pub(crate) fn get_const(
        &self,
        scope: ClassId,
        name: SymbolId,
    ) -> Option<Value> {
        let mut cur = Some(scope);
        while let Some(c) = cur {
            if let Some(v) = self.constants.get(&(c, name)) {
                return Some(*v);
            }
            cur = self.classes.superclass(c);
        }
        self.constants.get(&(builtin::OBJECT, name)).copied()
    }

    // ------------------------------------------------------------------
    // Interpreter loop
    // ------------------------------------------------------------------

    /// Run `tcb` until it finishes, raises out, blocks or is preempted
    pub(crate) fn execute(
        &mut self,
        tcb: &mut Tcb,
    ) -> Exit {
        loop {
            if tcb.core.callinfo.is_empty() {
                return Exit::Finished;
            }
            let step = self.step(tcb);
            tcb.stats.instructions += 1;
            self.account_instruction();
            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Finished) => return Exit::Finished,
                Err(raise) => {
                    if !self.handle_raise(tcb, raise) {
                        return Exit::Raised;
                    }
                }
            }
            if let Some(switch) = self.pending.take() {
                return Exit::Switch(switch);
            }
            if self.tick.take_preempt() && !self.booting {
                return Exit::Preempted;
            }
        }
    }

    #[inline]
    fn account_instruction(&mut self) {
        if self.booting {
            return;
        }
        if let TickMode::Simulated {
            instructions_per_tick,
        } = self.config.tick_mode
        {
            self.sim_count += 1;
            if self.sim_count >= instructions_per_tick {
                self.sim_count = 0;
                self.tick.tick();
            }
        }
    }

    /// Fetch, decode and execute one instruction
    fn step(
        &mut self,
        tcb: &mut Tcb,
    ) -> Result<Flow, Raise> {
        let Some(ci) = tcb.core.callinfo.last_mut() else {
            return Ok(Flow::Finished);
        };
        let irep = ci.irep.clone();
        let pc = ci.pc;
        let base = ci.base;
        let (i, next) = decode(&irep.iseq, pc)
            .map_err(|e| Raise::runtime(format!("corrupt bytecode: {}", e)))?;
        ci.pc = next;
        if self.config.trace_execution {
            trace!(pc, op = %i.op, a = i.a, b = i.b, c = i.c, "exec");
        }

        let a = base + i.a as usize;
        let core = &mut tcb.core;
        match i.op {
            Opcode::Nop => {}
            Opcode::Move => self.copy_reg(core, a, base + i.b as usize),
            Opcode::LoadL => {
                let v = match &irep.pool[i.b as usize] {
                    Literal::Integer(n) => Value::Integer(*n),
                    Literal::Float(f) => Value::Float(*f),
                    Literal::String(_) => Value::Nil,
                };
                self.put(core, a, v);
            }
            Opcode::LoadI => self.put(core, a, Value::Integer(i.b as u16 as i16 as i64)),
            Opcode::LoadSym => {
                let s = irep.syms[i.b as usize];
                self.put(core, a, Value::Symbol(s));
            }
            Opcode::LoadNil => self.put(core, a, Value::Nil),
            Opcode::LoadSelf => self.copy_reg(core, a, base),
            Opcode::LoadT => self.put(core, a, Value::True),
            Opcode::LoadF => self.put(core, a, Value::False),
            Opcode::String => {
                let bytes = match &irep.pool[i.b as usize] {
                    Literal::String(s) => s.as_bytes().to_vec(),
                    _ => Vec::new(),
                };
                let s = self.heap.alloc_string(bytes)?;
                self.put(core, a, s);
            }
            Opcode::GetGV => {
                let name = irep.syms[i.b as usize];
                let v = self.globals.get(&name).copied().unwrap_or(Value::Nil);
                self.heap.incref(v);
                self.put(core, a, v);
            }
            Opcode::SetGV => {
                let name = irep.syms[i.b as usize];
                let v = core.regs[a];
                self.heap.incref(v);
                if let Some(old) = self.globals.insert(name, v) {
                    self.heap.decref(old);
                }
            }
            Opcode::GetIV => {
                let name = irep.syms[i.b as usize];
                let v = self.heap.ivar_get(core.regs[base], name);
                self.heap.incref(v);
                self.put(core, a, v);
            }
            Opcode::SetIV => {
                let name = irep.syms[i.b as usize];
                let recv = core.regs[base];
                let v = core.regs[a];
                self.heap.incref(v);
                if !self.heap.ivar_set(recv, name, v)? {
                    return Err(Raise::runtime(format!(
                        "can't set instance variable {} on {}",
                        self.symbols.name(name),
                        self.inspect(recv)
                    )));
                }
            }
            Opcode::GetConst => {
                let name = irep.syms[i.b as usize];
                let scope = core.frame().map(|ci| ci.target_class).unwrap_or(builtin::OBJECT);
                let Some(v) = self.get_const(scope, name) else {
                    return Err(Raise::new(
                        builtin::NAME_ERROR,
                        format!("uninitialized constant {}", self.symbols.name(name)),
                    ));
                };
                self.heap.incref(v);
                self.put(core, a, v);
            }
            Opcode::SetConst => {
                let name = irep.syms[i.b as usize];
                let scope = core.frame().map(|ci| ci.target_class).unwrap_or(builtin::OBJECT);
                let v = core.regs[a];
                self.heap.incref(v);
                if let Some(old) = self.constants.insert((scope, name), v) {
                    self.heap.decref(old);
                }
            }
            Opcode::GetUpVar => {
                let idx = self.upvar_index(core, i.b as usize, i.c as usize)?;
                self.copy_reg(core, a, idx);
            }
            Opcode::SetUpVar => {
                let idx = self.upvar_index(core, i.b as usize, i.c as usize)?;
                self.copy_reg(core, idx, a);
            }
            Opcode::Jmp => self.jump(core, i.a as usize),
            Opcode::JmpIf => {
                if core.regs[a].is_truthy() {
                    self.jump(core, i.b as usize);
                }
            }
            Opcode::JmpNot => {
                if !core.regs[a].is_truthy() {
                    self.jump(core, i.b as usize);
                }
            }
            Opcode::JmpNil => {
                if core.regs[a].is_nil() {
                    self.jump(core, i.b as usize);
                }
            }
            Opcode::OnErr => {
                let depth = core.callinfo.len() - 1;
                core.handlers.push(Handler {
                    target_pc: i.a as usize,
                    depth,
                });
            }
            Opcode::Except => {
                let exc = std::mem::take(&mut core.exception);
                self.put(core, a, exc);
            }
            Opcode::Rescue => {
                let b = base + i.b as usize;
                let exc = core.regs[a];
                let Value::Class(class) = core.regs[b] else {
                    return Err(Raise::type_error("class or module required for rescue clause"));
                };
                let matched = self.classes.is_subclass(self.class_of(exc), class);
                self.put(core, b, Value::from(matched));
            }
            Opcode::PopErr => {
                let floor = core.frame().map(|ci| ci.handler_base).unwrap_or(0);
                let keep = core.handlers.len().saturating_sub(i.a as usize).max(floor);
                core.handlers.truncate(keep);
            }
            Opcode::RaiseIf => {
                let v = core.regs[a];
                if !v.is_nil() {
                    self.heap.incref(v);
                    return Err(Raise::Object(v));
                }
            }
            Opcode::Send | Opcode::SendB => {
                let mid = irep.syms[i.b as usize];
                let has_block = i.op == Opcode::SendB;
                self.send(tcb, a, mid, i.c as usize, has_block, pc)?;
            }
            Opcode::Super => self.call_super(tcb, a, i.b as usize, pc)?,
            Opcode::Return => {
                let v = core.regs[a];
                self.heap.incref(v);
                return self.do_return(tcb, v);
            }
            Opcode::ReturnBlk => return self.return_from_block(tcb, a),
            Opcode::Break => return self.break_from_block(tcb, a),
            Opcode::BlkPush => {
                let blk = self.current_block(core);
                self.heap.incref(blk);
                self.put(core, a, blk);
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                let (op, mid) = match i.op {
                    Opcode::Add => (ArithOp::Add, self.sym.add),
                    Opcode::Sub => (ArithOp::Sub, self.sym.sub),
                    Opcode::Mul => (ArithOp::Mul, self.sym.mul),
                    _ => (ArithOp::Div, self.sym.div),
                };
                match arith(op, core.regs[a], core.regs[a + 1]) {
                    Ok(v) => self.put(core, a, v),
                    Err(NumericError::ZeroDivision) => return Err(Raise::zero_division()),
                    Err(NumericError::NotNumeric) => self.send(tcb, a, mid, 1, false, pc)?,
                }
            }
            Opcode::AddI | Opcode::SubI => {
                let (op, mid) = if i.op == Opcode::AddI {
                    (ArithOp::Add, self.sym.add)
                } else {
                    (ArithOp::Sub, self.sym.sub)
                };
                let imm = Value::Integer(i.b as i64);
                match arith(op, core.regs[a], imm) {
                    Ok(v) => self.put(core, a, v),
                    Err(_) => {
                        self.put(core, a + 1, imm);
                        self.send(tcb, a, mid, 1, false, pc)?;
                    }
                }
            }
            Opcode::Eq => {
                let (x, y) = (core.regs[a], core.regs[a + 1]);
                if x.is_numeric() && y.is_numeric() {
                    let eq = num_eq(x, y).unwrap_or(false);
                    self.put(core, a, Value::from(eq));
                } else if !x.is_ref() && !y.is_ref() && !matches!(x, Value::Class(_)) {
                    self.put(core, a, Value::from(x.identical(&y)));
                } else {
                    let mid = self.sym.eq;
                    self.send(tcb, a, mid, 1, false, pc)?;
                }
            }
            Opcode::Lt | Opcode::Le | Opcode::Gt | Opcode::Ge => {
                let (x, y) = (core.regs[a], core.regs[a + 1]);
                if x.is_numeric() && y.is_numeric() {
                    let result = compare(x, y).is_some_and(|ord| match i.op {
                        Opcode::Lt => ord.is_lt(),
                        Opcode::Le => ord.is_le(),
                        Opcode::Gt => ord.is_gt(),
                        _ => ord.is_ge(),
                    });
                    self.put(core, a, Value::from(result));
                } else {
                    let mid = match i.op {
                        Opcode::Lt => self.sym.lt,
                        Opcode::Le => self.sym.le,
                        Opcode::Gt => self.sym.gt,
                        _ => self.sym.ge,
                    };
                    self.send(tcb, a, mid, 1, false, pc)?;
                }
            }
            Opcode::Array => {
                let start = base + i.b as usize;
                let items: Vec<Value> = core.regs[start..start + i.c as usize].to_vec();
                for v in &items {
                    self.heap.incref(*v);
                }
                let arr = self.heap.alloc_array(items)?;
                self.put(core, a, arr);
            }
            Opcode::Hash => {
                let hash = self.heap.alloc(HeapBody::Hash(RHash::default()))?;
                let Some(h) = hash.handle() else {
                    return Ok(Flow::Continue);
                };
                for k in 0..i.b as usize {
                    let key = core.regs[a + 2 * k];
                    let val = core.regs[a + 2 * k + 1];
                    self.heap.incref(key);
                    self.heap.incref(val);
                    if let Err(e) = self.heap.hash_set(h, key, val) {
                        self.heap.decref(hash);
                        return Err(e.into());
                    }
                }
                self.put(core, a, hash);
            }
            Opcode::StrCat => {
                let tail = self.to_s(core.regs[a + 1]);
                match core.regs[a] {
                    Value::String(h) => self.heap.string_append(h, tail.as_bytes())?,
                    other => {
                        return Err(Raise::type_error(format!(
                            "can't append to {}",
                            self.class_name(self.class_of(other))
                        )))
                    }
                }
            }
            Opcode::Range => {
                let (first, last) = (core.regs[a], core.regs[a + 1]);
                self.heap.incref(first);
                self.heap.incref(last);
                let range = self.heap.alloc(HeapBody::Range(RRange {
                    first,
                    last,
                    exclusive: i.b != 0,
                }))?;
                self.put(core, a, range);
            }
            Opcode::Block | Opcode::Method => {
                let child = irep.children[i.b as usize].clone();
                let body = if i.op == Opcode::Block {
                    let Some(ci) = core.frame() else {
                        return Ok(Flow::Finished);
                    };
                    let home = match ci.kind {
                        FrameKind::Method | FrameKind::Top | FrameKind::Lambda => Some(ci.serial),
                        FrameKind::Block | FrameKind::ClassBody => ci.home,
                    };
                    let self_val = core.regs[base];
                    self.heap.incref(self_val);
                    RProc {
                        irep: child,
                        self_val,
                        env: Some(EnvRef {
                            serial: ci.serial,
                            base,
                        }),
                        target_class: ci.target_class,
                        home,
                        creator: Some(ci.serial),
                        lambda: false,
                    }
                } else {
                    RProc {
                        irep: child,
                        self_val: Value::Nil,
                        env: None,
                        target_class: builtin::OBJECT,
                        home: None,
                        creator: None,
                        lambda: true,
                    }
                };
                let p = self.heap.alloc(HeapBody::Proc(body))?;
                self.put(core, a, p);
            }
            Opcode::Def | Opcode::SDef => {
                let name = irep.syms[i.b as usize];
                let Value::Class(class) = core.regs[a] else {
                    return Err(Raise::type_error("method definition target is not a class"));
                };
                let Some(body) = self.heap.proc_body(core.regs[a + 1]) else {
                    return Err(Raise::type_error("method body is not a proc"));
                };
                let method = crate::runtime::class::Method::Ruby(body.irep.clone());
                if i.op == Opcode::Def {
                    self.classes.define_method(class, name, method);
                } else {
                    self.classes.define_singleton_method(class, name, method);
                }
                self.put(core, a, Value::Symbol(name));
            }
            Opcode::Class => {
                let name = irep.syms[i.b as usize];
                let class = self.open_class(core, a, name)?;
                self.put(core, a, Value::Class(class));
            }
            Opcode::Exec => {
                let child = irep.children[i.b as usize].clone();
                self.exec_class_body(tcb, a, child)?;
            }
            Opcode::TClass => {
                let class = core.frame().map(|ci| ci.target_class).unwrap_or(builtin::OBJECT);
                self.put(core, a, Value::Class(class));
            }
            Opcode::Stop => {
                self.unwind_to(core, 0);
                return Ok(Flow::Finished);
            }
        }
        Ok(Flow::Continue)
    }

    #[inline]
    fn jump(
        &self,
        core: &mut VmCore,
        target: usize,
    ) {
        if let Some(ci) = core.frame_mut() {
            ci.pc = target;
        }
    }

    /// `class Name < Super`: reopen or define
    fn open_class(
        &mut self,
        core: &VmCore,
        a: usize,
        name: SymbolId,
    ) -> Result<ClassId, Raise> {
        let outer = match core.regs[a] {
            Value::Class(c) => c,
            Value::Nil => core.frame().map(|ci| ci.target_class).unwrap_or(builtin::OBJECT),
            _ => return Err(Raise::type_error("namespace is not a class")),
        };
        let superclass = match core.regs[a + 1] {
            Value::Nil => None,
            Value::Class(c) => Some(c),
            _ => return Err(Raise::type_error("superclass must be a Class")),
        };
        match self.constants.get(&(outer, name)).copied() {
            Some(Value::Class(c)) => {
                if let Some(s) = superclass {
                    if self.classes.superclass(c) != Some(s) {
                        return Err(Raise::type_error(format!(
                            "superclass mismatch for class {}",
                            self.symbols.name(name)
                        )));
                    }
                }
                Ok(c)
            }
            Some(_) => Err(Raise::type_error(format!(
                "{} is not a class",
                self.symbols.name(name)
            ))),
            None => {
                let class = self
                    .classes
                    .define(name, Some(superclass.unwrap_or(builtin::OBJECT)));
                self.constants.insert((outer, name), Value::Class(class));
                debug!(class = self.symbols.name(name), "class defined");
                Ok(class)
            }
        }
    }
}

impl Drop for Vm {
    fn drop(&mut self) {
        self.stop_timer();
    }
}
