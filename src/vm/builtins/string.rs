//! String and Symbol

use super::{define, index_arg, int_arg, CallArgs};
use crate::runtime::class::builtin;
use crate::runtime::value::Value;
use crate::vm::errors::{NativeResult, Raise};
use crate::vm::executor::Vm;

pub(super) fn install(vm: &mut Vm) {
    let s = builtin::STRING;
    define(vm, s, "+", plus);
    define(vm, s, "*", times);
    define(vm, s, "<<", append);
    define(vm, s, "concat", append);
    define(vm, s, "==", eq);
    define(vm, s, "<", lt);
    define(vm, s, ">", gt);
    define(vm, s, "length", length);
    define(vm, s, "size", length);
    define(vm, s, "to_s", dup);
    define(vm, s, "dup", dup);
    define(vm, s, "to_sym", to_sym);
    define(vm, s, "to_i", to_i);
    define(vm, s, "to_f", to_f);
    define(vm, s, "upcase", upcase);
    define(vm, s, "downcase", downcase);
    define(vm, s, "reverse", reverse);
    define(vm, s, "strip", strip);
    define(vm, s, "empty?", empty_p);
    define(vm, s, "include?", include_p);
    define(vm, s, "start_with?", start_with_p);
    define(vm, s, "end_with?", end_with_p);
    define(vm, s, "index", index);
    define(vm, s, "[]", aref);
    define(vm, s, "split", split);
    define(vm, s, "chars", chars);
    define(vm, s, "ord", ord);

    let y = builtin::SYMBOL;
    define(vm, y, "to_s", sym_to_s);
    define(vm, y, "to_sym", sym_to_sym);
    define(vm, y, "length", sym_length);
    define(vm, y, "size", sym_length);
}

fn bytes_of(
    vm: &Vm,
    v: Value,
) -> Vec<u8> {
    vm.heap.string(v).map(|s| s.bytes.clone()).unwrap_or_default()
}

/// String argument, TypeError otherwise
fn str_arg(
    vm: &Vm,
    v: Value,
) -> Result<Vec<u8>, Raise> {
    match vm.heap.string(v) {
        Some(s) => Ok(s.bytes.clone()),
        None => Err(Raise::type_error(format!(
            "no implicit conversion of {} into String",
            vm.class_name(vm.class_of(v))
        ))),
    }
}

fn plus(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let mut bytes = bytes_of(vm, call.recv);
    bytes.extend(str_arg(vm, call.arg(0))?);
    vm.new_string(bytes)
}

fn times(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let n = int_arg(vm, call.arg(0))?;
    let n = usize::try_from(n).map_err(|_| Raise::argument("negative argument"))?;
    let unit = bytes_of(vm, call.recv);
    vm.heap.check_room(unit.len().checked_mul(n))?;
    vm.new_string(unit.repeat(n))
}

fn append(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let tail = match call.arg(0) {
        Value::Integer(i) => u8::try_from(i)
            .map(|b| vec![b])
            .map_err(|_| Raise::new(builtin::RANGE_ERROR, format!("{} out of char range", i)))?,
        other => str_arg(vm, other)?,
    };
    if let Value::String(h) = call.recv {
        vm.heap.string_append(h, &tail)?;
    }
    Ok(vm.dup_value(call.recv))
}

fn eq(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    Ok(Value::from(vm.ruby_eq(call.recv, call.arg(0))))
}

fn lt(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let other = str_arg(vm, call.arg(0))?;
    Ok(Value::from(bytes_of(vm, call.recv) < other))
}

fn gt(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let other = str_arg(vm, call.arg(0))?;
    Ok(Value::from(bytes_of(vm, call.recv) > other))
}

fn length(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::Integer(vm.to_s(call.recv).chars().count() as i64))
}

fn dup(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let bytes = bytes_of(vm, call.recv);
    vm.new_string(bytes)
}

fn to_sym(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let name = vm.to_s(call.recv);
    Ok(Value::Symbol(vm.symbols.intern(&name)))
}

/// Leading numeric prefix of `s` (Ruby's lenient conversion)
fn numeric_prefix(
    s: &str,
    float: bool,
) -> &str {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'-') | Some(b'+')) {
        end = 1;
    }
    let mut seen_dot = false;
    while end < bytes.len() {
        match bytes[end] {
            b'0'..=b'9' | b'_' => end += 1,
            b'.' if float && !seen_dot && bytes.get(end + 1).is_some_and(|b| b.is_ascii_digit()) => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    &s[..end]
}

fn to_i(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv);
    let digits: String = numeric_prefix(&s, false).chars().filter(|c| *c != '_').collect();
    Ok(Value::Integer(digits.parse().unwrap_or(0)))
}

fn to_f(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv);
    let digits: String = numeric_prefix(&s, true).chars().filter(|c| *c != '_').collect();
    Ok(Value::Float(digits.parse().unwrap_or(0.0)))
}

fn upcase(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv).to_uppercase();
    vm.new_string(s)
}

fn downcase(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv).to_lowercase();
    vm.new_string(s)
}

fn reverse(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s: String = vm.to_s(call.recv).chars().rev().collect();
    vm.new_string(s)
}

fn strip(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv).trim().to_string();
    vm.new_string(s)
}

fn empty_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::from(bytes_of(vm, call.recv).is_empty()))
}

fn include_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let needle = String::from_utf8_lossy(&str_arg(vm, call.arg(0))?).into_owned();
    Ok(Value::from(vm.to_s(call.recv).contains(&needle)))
}

fn start_with_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let prefix = str_arg(vm, call.arg(0))?;
    Ok(Value::from(bytes_of(vm, call.recv).starts_with(&prefix)))
}

fn end_with_p(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let suffix = str_arg(vm, call.arg(0))?;
    Ok(Value::from(bytes_of(vm, call.recv).ends_with(&suffix)))
}

fn index(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 1)?;
    let needle = String::from_utf8_lossy(&str_arg(vm, call.arg(0))?).into_owned();
    let hay = vm.to_s(call.recv);
    Ok(match hay.find(&needle) {
        Some(byte) => Value::Integer(hay[..byte].chars().count() as i64),
        None => Value::Nil,
    })
}

fn aref(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(1, 2)?;
    let chars: Vec<char> = vm.to_s(call.recv).chars().collect();
    let len = chars.len();
    let (start, count) = match (call.arg(0), call.arg(1)) {
        (r @ Value::Range(_), Value::Nil) => {
            let Some(range) = vm.heap.range(r) else {
                return Ok(Value::Nil);
            };
            let (first, last, exclusive) = (range.first, range.last, range.exclusive);
            let Some(start) = index_arg(vm, first, len)? else {
                return Ok(Value::Nil);
            };
            let end = match last {
                Value::Nil => len as i64,
                v => {
                    let e = int_arg(vm, v)?;
                    let e = if e < 0 { len as i64 + e } else { e };
                    if exclusive {
                        e
                    } else {
                        e.saturating_add(1)
                    }
                }
            };
            (start, end.saturating_sub(start as i64).max(0) as usize)
        }
        (i, Value::Nil) => match index_arg(vm, i, len)? {
            Some(start) if start < len => (start, 1),
            _ => return Ok(Value::Nil),
        },
        (i, n) => {
            let Some(start) = index_arg(vm, i, len)? else {
                return Ok(Value::Nil);
            };
            let n = int_arg(vm, n)?;
            if n < 0 {
                return Ok(Value::Nil);
            }
            (start, n as usize)
        }
    };
    if start > len {
        return Ok(Value::Nil);
    }
    let s: String = chars[start..].iter().take(count).collect();
    vm.new_string(s)
}

fn split(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    call.expect(0, 1)?;
    let s = vm.to_s(call.recv);
    let parts: Vec<String> = match call.arg(0) {
        Value::Nil => s.split_whitespace().map(str::to_string).collect(),
        sep => {
            let sep = String::from_utf8_lossy(&str_arg(vm, sep)?).into_owned();
            if sep == " " {
                s.split_whitespace().map(str::to_string).collect()
            } else if sep.is_empty() {
                s.chars().map(String::from).collect()
            } else {
                let mut parts: Vec<String> = s.split(sep.as_str()).map(str::to_string).collect();
                while parts.last().is_some_and(|p| p.is_empty()) {
                    parts.pop();
                }
                parts
            }
        }
    };
    string_array(vm, parts)
}

fn chars(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let parts: Vec<String> = vm.to_s(call.recv).chars().map(String::from).collect();
    string_array(vm, parts)
}

fn string_array(
    vm: &mut Vm,
    parts: Vec<String>,
) -> NativeResult {
    let mut items = Vec::with_capacity(parts.len());
    for part in parts {
        match vm.heap.alloc_string(part) {
            Ok(v) => items.push(v),
            Err(e) => {
                for v in items {
                    vm.heap.decref(v);
                }
                return Err(e.into());
            }
        }
    }
    Ok(vm.heap.alloc_array(items)?)
}

fn ord(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    match vm.to_s(call.recv).chars().next() {
        Some(c) => Ok(Value::Integer(c as i64)),
        None => Err(Raise::argument("empty string")),
    }
}

fn sym_to_s(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    let s = vm.to_s(call.recv);
    vm.new_string(s)
}

fn sym_to_sym(
    _vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(call.recv)
}

fn sym_length(
    vm: &mut Vm,
    call: &CallArgs,
) -> NativeResult {
    Ok(Value::Integer(vm.to_s(call.recv).chars().count() as i64))
}
