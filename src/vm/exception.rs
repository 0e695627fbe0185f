//! Raising and rescuing
//!
//! A [`Raise`] becomes an exception object (an instance of an `Exception`
//! subclass carrying `@message`), then the innermost rescue handler of the
//! task takes it. With no handler left the task ends and keeps the exception
//! as its error; other tasks are not affected.

use tracing::warn;

use crate::runtime::class::{builtin, ClassId};
use crate::runtime::heap::{HeapBody, RObject};
use crate::runtime::memory::AllocError;
use crate::runtime::scheduler::Tcb;
use crate::runtime::value::Value;
use crate::vm::errors::Raise;
use crate::vm::executor::Vm;

impl Vm {
    /// New exception instance of `class` with `message`
    pub(crate) fn make_exception(
        &mut self,
        class: ClassId,
        message: &str,
    ) -> Result<Value, AllocError> {
        let msg = self.heap.alloc_string(message)?;
        self.heap.alloc(HeapBody::Object(RObject {
            class,
            ivars: vec![(self.sym.message_iv, msg)],
        }))
    }

    /// Owned exception object for a raise
    pub(crate) fn raise_to_value(
        &mut self,
        raise: Raise,
    ) -> Value {
        match raise {
            Raise::Object(v) => v,
            Raise::Error { class, message } => match self.make_exception(class, &message) {
                Ok(v) => v,
                Err(_) => self.pinned_nomem(),
            },
            Raise::OutOfMemory => self.pinned_nomem(),
        }
    }

    fn pinned_nomem(&mut self) -> Value {
        self.heap.incref(self.nomem);
        self.nomem
    }

    /// Deliver a raise to the innermost handler; false when none is left
    pub(crate) fn handle_raise(
        &mut self,
        tcb: &mut Tcb,
        raise: Raise,
    ) -> bool {
        let exc = self.raise_to_value(raise);
        if let Some(handler) = tcb.core.handlers.last().copied() {
            self.unwind_to(&mut tcb.core, handler.depth + 1);
            tcb.core.handlers.pop();
            if let Some(ci) = tcb.core.frame_mut() {
                ci.pc = handler.target_pc;
            }
            self.heap.replace(&mut tcb.core.exception, exc);
            return true;
        }

        self.unwind_to(&mut tcb.core, 0);
        warn!(task = %tcb.name, "unhandled exception: {}", self.describe_exception(exc));
        if let Some(old) = tcb.error.replace(exc) {
            self.heap.decref(old);
        }
        false
    }

    /// `message` of an exception object
    pub fn exception_message(
        &self,
        exc: Value,
    ) -> String {
        let msg = self.heap.ivar_get(exc, self.sym.message_iv);
        match self.heap.string(msg) {
            Some(s) => s.as_str_lossy().into_owned(),
            None if msg.is_nil() => self.class_name(self.class_of(exc)).to_string(),
            None => self.to_s(msg),
        }
    }

    /// `ClassName: message`
    pub fn describe_exception(
        &self,
        exc: Value,
    ) -> String {
        format!(
            "{}: {}",
            self.class_name(self.class_of(exc)),
            self.exception_message(exc)
        )
    }

    /// True when `v` is an instance of `Exception` or a subclass
    pub(crate) fn is_exception(
        &self,
        v: Value,
    ) -> bool {
        matches!(v, Value::Object(_))
            && self
                .classes
                .is_subclass(self.class_of(v), builtin::EXCEPTION)
    }
}
