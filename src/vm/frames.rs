//! VM call frames
//!
//! A task's execution state is a [`VmCore`]: one flat register file shared by
//! all frames, the call-info stack and the rescue handler stack. A callee's
//! register window starts at the caller's call-site register, so `R0` of the
//! callee is the receiver and the arguments follow it.

use std::rc::Rc;

use crate::runtime::class::ClassId;
use crate::runtime::symbol::SymbolId;
use crate::runtime::value::Value;
use crate::vm::irep::Irep;

/// Register window of the frame that created a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnvRef {
    /// Serial of the defining frame
    pub serial: u64,
    /// Absolute register base of the defining frame
    pub base: usize,
}

/// What kind of code a frame runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Top-level code of a task
    Top,
    Method,
    /// Block called through `yield` or `Proc#call`
    Block,
    /// Block created by `lambda`; `return` leaves the lambda itself
    Lambda,
    ClassBody,
}

/// Call-info frame
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub irep: Rc<Irep>,
    /// Next instruction
    pub pc: usize,
    /// Absolute register base
    pub base: usize,
    pub kind: FrameKind,
    /// Method name (for `super` and backtraces)
    pub mid: Option<SymbolId>,
    /// Class the running method was found in
    pub owner: ClassId,
    /// Class receiving `def`
    pub target_class: ClassId,
    /// Defining environment of a block frame
    pub env: Option<EnvRef>,
    /// Frame a `return` inside this block leaves
    pub home: Option<u64>,
    /// Frame a `break` inside this block returns to
    pub creator: Option<u64>,
    /// Proc being run (owned reference) or nil
    pub proc_val: Value,
    /// Return the receiver instead of the method result (`Class#new`)
    pub ret_self: bool,
    pub serial: u64,
    /// Handler stack height at entry
    pub handler_base: usize,
    pub argc: usize,
}

impl CallInfo {
    /// Top-level frame running `irep` at base 0
    pub fn top(
        irep: Rc<Irep>,
        target_class: ClassId,
        serial: u64,
    ) -> Self {
        Self {
            irep,
            pc: 0,
            base: 0,
            kind: FrameKind::Top,
            mid: None,
            owner: target_class,
            target_class,
            env: None,
            home: None,
            creator: None,
            proc_val: Value::Nil,
            ret_self: false,
            serial,
            handler_base: 0,
            argc: 0,
        }
    }

    /// Register window end (exclusive, absolute)
    #[inline]
    pub fn top_reg(&self) -> usize {
        self.base + self.irep.nregs as usize
    }
}

/// Rescue handler registered by `ONERR`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub target_pc: usize,
    /// Index of the owning frame in the call-info stack
    pub depth: usize,
}

/// Saved execution state of a task
#[derive(Debug)]
pub struct VmCore {
    pub regs: Box<[Value]>,
    pub callinfo: Vec<CallInfo>,
    pub handlers: Vec<Handler>,
    /// Exception being handled (owned), read by `EXCEPT`
    pub exception: Value,
}

impl VmCore {
    pub fn new(max_regs: usize) -> Self {
        Self {
            regs: vec![Value::Nil; max_regs].into_boxed_slice(),
            callinfo: Vec::new(),
            handlers: Vec::new(),
            exception: Value::Nil,
        }
    }

    /// Current frame
    #[inline]
    pub fn frame(&self) -> Option<&CallInfo> {
        self.callinfo.last()
    }

    #[inline]
    pub fn frame_mut(&mut self) -> Option<&mut CallInfo> {
        self.callinfo.last_mut()
    }

    /// Index of the frame with `serial`
    pub fn find_frame(
        &self,
        serial: u64,
    ) -> Option<usize> {
        self.callinfo.iter().rposition(|ci| ci.serial == serial)
    }

    /// Frames currently on the stack
    #[inline]
    pub fn depth(&self) -> usize {
        self.callinfo.len()
    }
}
