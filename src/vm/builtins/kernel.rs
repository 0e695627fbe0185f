//! Kernel, Object and Class methods

use rand::{Rng, SeedableRng};

use super::{define, int_arg, CallArgs};
use crate::runtime::class::{builtin, Method};
use crate::runtime::heap::HeapBody;
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::{Switch, Vm};

pub(super) fn install(vm: &mut Vm) {
    let o = builtin::OBJECT;
    define(vm, o, "puts", puts);
    define(vm, o, "print", print);
    define(vm, o, "p", p);
    define(vm, o, "raise", raise);
    define(vm, o, "sleep", sleep);
    define(vm, o, "sleep_ms", sleep_ms);
    define(vm, o, "proc", proc_);
    define(vm, o, "lambda", lambda);
    define(vm, o, "is_a?", is_a);
    define(vm, o, "kind_of?", is_a);
    define(vm, o, "instance_of?", instance_of);
    define(vm, o, "respond_to?", respond_to);
    define(vm, o, "class", class);
    define(vm, o, "inspect", inspect);
    define(vm, o, "to_s", to_s);
    define(vm, o, "==", eq);
    define(vm, o, "===", eq);
    define(vm, o, "!=", ne);
    define(vm, o, "equal?", equal);
    define(vm, o, "!", not);
    define(vm, o, "nil?", nil_p);
    define(vm, o, "initialize", initialize);
    define(vm, o, "instance_variable_get", ivar_get);
    define(vm, o, "instance_variable_set", ivar_set);
    define(vm, o, "rand", rand);
    define(vm, o, "srand", srand);

    let c = builtin::CLASS;
    define(vm, c, "attr_accessor", attr_accessor);
    define(vm, c, "attr_reader", attr_reader);
    define(vm, c, "attr_writer", attr_writer);
    define(vm, c, "name", class_name);
    define(vm, c, "superclass", superclass);
    define(vm, c, "===", class_eqq);
    define(vm, c, "const_get", const_get);

    let n = builtin::NIL;
    define(vm, n, "to_a", nil_to_a);
    define(vm, n, "to_i", nil_to_i);
}

fn puts(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let mut out = String::new();
    if call.is_empty() {
        out.push('\n');
    }
    for v in &call.args {
        let mut lines = Vec::new();
        match vm.heap.array(*v) {
            Some(arr) if !arr.items.is_empty() => {
                lines.extend(arr.items.iter().map(|item| vm.to_s(*item)))
            }
            Some(_) => lines.push(String::new()),
            None => lines.push(vm.to_s(*v)),
        }
        for line in lines {
            out.push_str(&line);
            if !line.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    vm.console.write(out.as_bytes());
    Ok(Value::Nil)
}

fn print(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let out: String = call.args.iter().map(|v| vm.to_s(*v)).collect();
    vm.console.write(out.as_bytes());
    Ok(Value::Nil)
}

fn p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let mut out = String::new();
    for v in &call.args {
        out.push_str(&vm.inspect(*v));
        out.push('\n');
    }
    vm.console.write(out.as_bytes());
    match call.len() {
        0 => Ok(Value::Nil),
        1 => Ok(vm.dup_value(call.arg(0))),
        _ => {
            let items: Vec<Value> = call.args.iter().map(|v| vm.dup_value(*v)).collect();
            Ok(vm.heap.alloc_array(items)?)
        }
    }
}

fn raise(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 2)?;
    let exc = match (call.arg(0), call.arg(1)) {
        (Value::Nil, _) if call.is_empty() => {
            vm.make_exception(builtin::RUNTIME_ERROR, "unhandled exception")?
        }
        (msg @ Value::String(_), _) => {
            let text = vm.to_s(msg);
            vm.make_exception(builtin::RUNTIME_ERROR, &text)?
        }
        (Value::Class(class), msg) if vm.classes.is_subclass(class, builtin::EXCEPTION) => {
            let text = if msg.is_nil() {
                vm.class_name(class).to_string()
            } else {
                vm.to_s(msg)
            };
            vm.make_exception(class, &text)?
        }
        (obj, _) if vm.is_exception(obj) => vm.dup_value(obj),
        _ => return Err(Raise::type_error("exception class/object expected")),
    };
    Err(Raise::Object(exc))
}

/// Ticks covering `ms` milliseconds, at least one
fn ms_to_ticks(
    vm: &Vm,
    ms: f64,
) -> u64 {
    let unit = vm.config.tick_unit_ms.max(1) as f64;
    ((ms / unit).ceil() as u64).max(1)
}

fn sleep(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    if call.is_empty() {
        vm.pending = Some(Switch::Suspend);
        return Ok(Value::Nil);
    }
    let secs = match call.arg(0) {
        v @ (Value::Integer(_) | Value::Float(_)) => v.as_f64().unwrap_or(0.0),
        _ => return Err(Raise::type_error("can't convert into time interval")),
    };
    if secs < 0.0 {
        return Err(Raise::argument("time interval must not be negative"));
    }
    vm.pending = Some(Switch::Sleep(ms_to_ticks(vm, secs * 1000.0)));
    Ok(Value::Integer(secs.round() as i64))
}

fn sleep_ms(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let ms = int_arg(vm, call.arg(0))?;
    if ms < 0 {
        return Err(Raise::argument("time interval must not be negative"));
    }
    vm.pending = Some(Switch::Sleep(ms_to_ticks(vm, ms as f64)));
    Ok(Value::Integer(ms))
}

fn proc_(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    if !matches!(call.block, Value::Proc(_)) {
        return Err(Raise::argument("tried to create Proc object without a block"));
    }
    Ok(vm.dup_value(call.block))
}

fn lambda(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let Some(body) = vm.heap.proc_body(call.block).cloned() else {
        return Err(Raise::argument("tried to create Proc object without a block"));
    };
    if body.lambda {
        return Ok(vm.dup_value(call.block));
    }
    vm.heap.incref(body.self_val);
    let mut body = body;
    body.lambda = true;
    body.home = None;
    Ok(vm.heap.alloc(HeapBody::Proc(body))?)
}

fn is_a(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let Value::Class(class) = call.arg(0) else {
        return Err(Raise::type_error("class or module required"));
    };
    Ok(Value::from(
        vm.classes.is_subclass(vm.class_of(call.recv), class),
    ))
}

fn instance_of(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let Value::Class(class) = call.arg(0) else {
        return Err(Raise::type_error("class or module required"));
    };
    Ok(Value::from(vm.class_of(call.recv) == class))
}

fn respond_to(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 2)?;
    let mid = match call.arg(0) {
        Value::Symbol(s) => s,
        v @ Value::String(_) => {
            let name = vm.to_s(v);
            vm.symbols.intern(&name)
        }
        _ => return Err(Raise::type_error("not a symbol nor a string")),
    };
    Ok(Value::from(vm.responds_to(call.recv, mid)))
}

fn class(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::Class(vm.class_of(call.recv)))
}

fn inspect(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.inspect(call.recv);
    vm.new_string(s)
}

fn to_s(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv);
    vm.new_string(s)
}

fn eq(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    Ok(Value::from(vm.ruby_eq(call.recv, call.arg(0))))
}

fn ne(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    Ok(Value::from(!vm.ruby_eq(call.recv, call.arg(0))))
}

fn equal(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    Ok(Value::from(call.recv.identical(&call.arg(0))))
}

fn not(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(!call.recv.is_truthy()))
}

fn nil_p(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(call.recv.is_nil()))
}

fn initialize(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 0)?;
    Ok(Value::Nil)
}

fn ivar_name(
    vm: &mut Vm,
    v: Value,
) -> Result<crate::runtime::symbol::SymbolId, Raise> {
    let name = match v {
        Value::Symbol(s) => vm.symbols.name(s).to_string(),
        Value::String(_) => vm.to_s(v),
        _ => return Err(Raise::type_error("not a symbol nor a string")),
    };
    if !name.starts_with('@') {
        return Err(Raise::new(
            builtin::NAME_ERROR,
            format!("'{}' is not allowed as an instance variable name", name),
        ));
    }
    Ok(vm.symbols.intern(&name))
}

fn ivar_get(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let name = ivar_name(vm, call.arg(0))?;
    let v = vm.heap.ivar_get(call.recv, name);
    Ok(vm.dup_value(v))
}

fn ivar_set(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(2, 2)?;
    let name = ivar_name(vm, call.arg(0))?;
    let v = vm.dup_value(call.arg(1));
    if !vm.heap.ivar_set(call.recv, name, v)? {
        return Err(Raise::runtime(format!("can't modify {}", vm.inspect(call.recv))));
    }
    Ok(vm.dup_value(call.arg(1)))
}

fn rand(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    match call.arg(0) {
        Value::Nil => Ok(Value::Float(vm.rng.random::<f64>())),
        Value::Integer(n) if n > 0 => Ok(Value::Integer(vm.rng.random_range(0..n))),
        Value::Integer(_) => Ok(Value::Float(vm.rng.random::<f64>())),
        Value::Float(f) if f > 0.0 => Ok(Value::Float(vm.rng.random::<f64>() * f)),
        _ => Err(Raise::argument("invalid argument to rand")),
    }
}

fn srand(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let seed = match call.arg(0) {
        Value::Nil => vm.config.rng_seed,
        v => int_arg(vm, v)? as u64,
    };
    vm.rng = rand::rngs::StdRng::seed_from_u64(seed);
    Ok(Value::Integer(seed as i64))
}

// ----------------------------------------------------------------------
// Class
// ----------------------------------------------------------------------

fn define_attrs(
    vm: &mut Vm,
    call: &CallArgs,
    reader: bool,
    writer: bool,
) -> NativeResult {
    let Value::Class(class) = call.recv else {
        return Err(Raise::type_error("attribute target is not a class"));
    };
    for v in &call.args {
        let name = match *v {
            Value::Symbol(s) => vm.symbols.name(s).to_string(),
            Value::String(_) => vm.to_s(*v),
            other => {
                return Err(Raise::type_error(format!(
                    "{} is not a symbol nor a string",
                    vm.inspect(other)
                )))
            }
        };
        let ivar = vm.symbols.intern(&format!("@{}", name));
        if reader {
            let mid = vm.symbols.intern(&name);
            vm.classes.define_method(class, mid, Method::AttrReader(ivar));
        }
        if writer {
            let mid = vm.symbols.intern(&format!("{}=", name));
            vm.classes.define_method(class, mid, Method::AttrWriter(ivar));
        }
    }
    Ok(Value::Nil)
}

fn attr_accessor(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    define_attrs(vm, call, true, true)
}

fn attr_reader(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    define_attrs(vm, call, true, false)
}

fn attr_writer(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    define_attrs(vm, call, false, true)
}

fn class_name(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let Value::Class(class) = call.recv else {
        return Ok(Value::Nil);
    };
    let name = vm.class_name(class).to_string();
    vm.new_string(name)
}

fn superclass(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let Value::Class(class) = call.recv else {
        return Ok(Value::Nil);
    };
    Ok(vm
        .classes
        .superclass(class)
        .map(Value::Class)
        .unwrap_or(Value::Nil))
}

fn class_eqq(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let Value::Class(class) = call.recv else {
        return Ok(Value::False);
    };
    Ok(Value::from(
        vm.classes.is_subclass(vm.class_of(call.arg(0)), class),
    ))
}

/// `Outer::Name`, looked up from `Outer`
fn const_get(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let Value::Class(class) = call.recv else {
        return Err(Raise::type_error(format!("{} is not a class", vm.inspect(call.recv))));
    };
    let name = match call.arg(0) {
        Value::Symbol(s) => s,
        v @ Value::String(_) => {
            let text = vm.to_s(v);
            vm.symbols.intern(&text)
        }
        _ => return Err(Raise::type_error("not a symbol nor a string")),
    };
    match vm.get_const(class, name) {
        Some(v) => Ok(vm.dup_value(v)),
        None => Err(Raise::new(
            builtin::NAME_ERROR,
            format!(
                "uninitialized constant {}::{}",
                vm.class_name(class),
                vm.symbols.name(name)
            ),
        )),
    }
}

fn nil_to_a(
    vm: &mut Vm,
    _call: &CallArgs,
) -> NativeResult {
    Ok(vm.heap.alloc_array(Vec::new())?)
}

fn nil_to_i(
    _vm: &mut Vm,
    _call: &CallArgs,
) -> NativeResult {
    Ok(Value::Integer(0))
}
