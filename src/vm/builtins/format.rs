//! `to_s` and `inspect` renderings

use std::fmt::Write as _;

use crate::runtime::heap::{DataPayload, HeapBody};
use crate::runtime::value::numeric::format_float;
use crate::runtime::value::Value;
use crate::vm::executor::Vm;

/// Containers nested deeper than this print as `[...]`
const MAX_DEPTH: usize = 16;

impl Vm {
    /// `to_s` rendering
    pub fn to_s(
        &self,
        v: Value,
    ) -> String {
        match v {
            Value::Nil => String::new(),
            Value::Symbol(s) => self.symbols.name(s).to_string(),
            Value::String(_) => self
                .heap
                .string(v)
                .map(|s| s.as_str_lossy().into_owned())
                .unwrap_or_default(),
            Value::Class(c) => self.class_name(c).to_string(),
            Value::Object(_) if self.is_exception(v) => self.exception_message(v),
            _ => self.inspect(v),
        }
    }

    /// `inspect` rendering
    pub fn inspect(
        &self,
        v: Value,
    ) -> String {
        let mut out = String::new();
        self.inspect_into(&mut out, v, 0);
        out
    }

    fn inspect_into(
        &self,
        out: &mut String,
        v: Value,
        depth: usize,
    ) {
        if depth > MAX_DEPTH {
            out.push_str("[...]");
            return;
        }
        match v {
            Value::Nil => out.push_str("nil"),
            Value::True => out.push_str("true"),
            Value::False => out.push_str("false"),
            Value::Integer(i) => {
                let _ = write!(out, "{}", i);
            }
            Value::Float(f) => out.push_str(&format_float(f)),
            Value::Symbol(s) => {
                out.push(':');
                out.push_str(self.symbols.name(s));
            }
            Value::Class(c) => out.push_str(self.class_name(c)),
            Value::Task(h) => {
                let name = self.task_name(h).unwrap_or("?");
                let _ = write!(out, "#<Task {}>", name);
            }
            Value::String(_) => {
                let s = self.to_s(v);
                out.push('"');
                for ch in s.chars() {
                    match ch {
                        '"' => out.push_str("\\\""),
                        '\\' => out.push_str("\\\\"),
                        '\n' => out.push_str("\\n"),
                        '\t' => out.push_str("\\t"),
                        '\r' => out.push_str("\\r"),
                        '\u{1b}' => out.push_str("\\e"),
                        c if c.is_control() => {
                            let _ = write!(out, "\\x{:02X}", c as u32);
                        }
                        c => out.push(c),
                    }
                }
                out.push('"');
            }
            Value::Array(_) => {
                out.push('[');
                if let Some(arr) = self.heap.array(v) {
                    for (i, item) in arr.items.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.inspect_into(out, *item, depth + 1);
                    }
                }
                out.push(']');
            }
            Value::Hash(_) => {
                out.push('{');
                if let Some(hash) = self.heap.hash(v) {
                    for (i, (k, val)) in hash.entries.iter().enumerate() {
                        if i > 0 {
                            out.push_str(", ");
                        }
                        self.inspect_into(out, *k, depth + 1);
                        out.push_str("=>");
                        self.inspect_into(out, *val, depth + 1);
                    }
                }
                out.push('}');
            }
            Value::Range(_) => {
                if let Some(r) = self.heap.range(v) {
                    self.inspect_into(out, r.first, depth + 1);
                    out.push_str(if r.exclusive { "..." } else { ".." });
                    self.inspect_into(out, r.last, depth + 1);
                }
            }
            Value::Proc(_) => {
                let lambda = self.heap.proc_body(v).is_some_and(|p| p.lambda);
                out.push_str(if lambda { "#<Proc (lambda)>" } else { "#<Proc>" });
            }
            Value::Object(_) => {
                let class = self.class_name(self.class_of(v));
                if self.is_exception(v) {
                    let _ = write!(out, "#<{}: {}>", class, self.exception_message(v));
                    return;
                }
                let _ = write!(out, "#<{}", class);
                if let Some(obj) = self.heap.object(v) {
                    for (i, (name, val)) in obj.ivars.iter().enumerate() {
                        out.push_str(if i == 0 { " " } else { ", " });
                        out.push_str(self.symbols.name(*name));
                        out.push('=');
                        self.inspect_into(out, *val, depth + 1);
                    }
                }
                out.push('>');
            }
            Value::Data(h) => match self.heap.get(h) {
                Some(HeapBody::Data(d)) => match &d.payload {
                    DataPayload::Mutex(m) => {
                        let _ = write!(
                            out,
                            "#<Mutex {}>",
                            if m.owner.is_some() { "locked" } else { "unlocked" }
                        );
                    }
                    DataPayload::Peripheral { driver, channel } => {
                        let _ = write!(
                            out,
                            "#<{} {}:{}>",
                            self.class_name(d.class),
                            driver,
                            channel
                        );
                    }
                },
                _ => out.push_str("#<Data>"),
            },
        }
    }
}
