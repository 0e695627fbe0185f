//! 代码生成单元测试

use crate::frontend::{CompileError, Compiler, RubyCompiler};
use crate::vm::irep::{Literal, RawIrep};
use crate::vm::opcode::{decode, Instr, Opcode};

fn compile(source: &str) -> RawIrep {
    let irep = RubyCompiler::new().compile(source).expect("compiles");
    irep.verify().expect("verifies");
    irep
}

fn compile_err(source: &str) -> CompileError {
    RubyCompiler::new()
        .compile(source)
        .expect_err("should not compile")
}

fn instrs(irep: &RawIrep) -> Vec<Instr> {
    let mut out = Vec::new();
    let mut pc = 0;
    while pc < irep.iseq.len() {
        let (i, next) = decode(&irep.iseq, pc).expect("decodes");
        out.push(i);
        pc = next;
    }
    out
}

fn ops(irep: &RawIrep) -> Vec<Opcode> {
    instrs(irep).into_iter().map(|i| i.op).collect()
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn test_top_level_reserves_self_and_block_slot() {
        let irep = compile("a = 1\nb = 2");
        assert_eq!(irep.lvars, vec!["&", "a", "b"]);
        assert_eq!(irep.argc, 0);
        assert!(irep.nregs as usize > 3);
        assert_eq!(ops(&irep).last(), Some(&Opcode::Return));
    }

    #[test]
    fn test_assignment_targets_local_register() {
        let irep = compile("a = 5");
        // `a` is R2: R0 self, R1 block slot
        let stored = instrs(&irep)
            .into_iter()
            .any(|i| i.op == Opcode::Move && i.a == 2);
        assert!(stored);
    }

    #[test]
    fn test_method_params_and_block_slot() {
        let irep = compile("def m(a, b = 2, &blk)\n  c = a\nend");
        assert_eq!(irep.children.len(), 1);
        let m = &irep.children[0];
        assert_eq!(m.argc, 1);
        assert_eq!(m.optc, 1);
        assert_eq!(m.lvars, vec!["a", "b", "blk", "c"]);
        assert_eq!(m.opt_entries.len(), 2);
        assert!(m.opt_entries[0] < m.opt_entries[1]);
    }

    #[test]
    fn test_def_uses_target_class() {
        let ops = ops(&compile("def f; end"));
        assert_eq!(&ops[..3], &[Opcode::TClass, Opcode::Method, Opcode::Def]);
    }

    #[test]
    fn test_singleton_def_uses_self() {
        let irep = compile("class A\n  def self.f; end\nend");
        let top = ops(&irep);
        assert!(top.contains(&Opcode::Class));
        assert!(top.contains(&Opcode::Exec));
        assert!(ops(&irep.children[0]).contains(&Opcode::SDef));
    }

    #[test]
    fn test_pool_and_symbols_are_shared() {
        let irep = compile("x = 100000\ny = 100000\nputs 'a'\nputs 'a'");
        assert_eq!(
            irep.pool,
            vec![Literal::Integer(100000), Literal::String("a".into())]
        );
        assert_eq!(irep.syms.iter().filter(|s| *s == "puts").count(), 1);
    }

    #[test]
    fn test_float_literals_keep_sign_of_zero() {
        let irep = compile("a = 0.0\nb = -0.0");
        assert_eq!(irep.pool.len(), 2);
    }
}

#[cfg(test)]
mod expression_tests {
    use super::*;

    #[test]
    fn test_arithmetic_uses_dedicated_opcodes() {
        let ops = ops(&compile("a = 1\nb = a * 3 - a / 2 == 4"));
        for op in [Opcode::Mul, Opcode::Div, Opcode::Eq] {
            assert!(ops.contains(&op), "missing {}", op);
        }
    }

    #[test]
    fn test_small_constant_uses_immediate_form() {
        let irep = compile("a = 1\na += 1\na - 255");
        let ops = ops(&irep);
        assert!(ops.contains(&Opcode::AddI));
        assert!(ops.contains(&Opcode::SubI));
        let big = super::ops(&compile("a = 1\na + 256"));
        assert!(big.contains(&Opcode::Add));
        assert!(!big.contains(&Opcode::AddI));
    }

    #[test]
    fn test_other_operators_are_sends() {
        let irep = compile("a = 7 % 3");
        assert!(ops(&irep).contains(&Opcode::Send));
        assert!(irep.syms.contains(&"%".to_string()));
    }

    #[test]
    fn test_large_integer_goes_to_pool() {
        let irep = compile("x = 40000");
        assert_eq!(irep.pool, vec![Literal::Integer(40000)]);
        assert_eq!(instrs(&irep)[0].op, Opcode::LoadL);
    }

    #[test]
    fn test_negative_small_integer_is_immediate() {
        let irep = compile("x = -5");
        let first = instrs(&irep)[0];
        assert_eq!(first.op, Opcode::LoadI);
        assert_eq!(first.b as u16 as i16, -5);
    }

    #[test]
    fn test_interpolation_concatenates() {
        let ops = ops(&compile("n = 1\ns = \"a#{n}b\""));
        assert_eq!(ops.iter().filter(|o| **o == Opcode::StrCat).count(), 2);
    }

    #[test]
    fn test_array_and_hash_literals() {
        let ops = ops(&compile("a = [1, 2, 3]\nh = {a: 1, 'b' => 2}"));
        assert!(ops.contains(&Opcode::Array));
        assert!(ops.contains(&Opcode::Hash));
    }

    #[test]
    fn test_call_with_block_uses_sendb() {
        let irep = compile("[1].each { |x| x }");
        assert!(ops(&irep).contains(&Opcode::SendB));
        assert!(ops(&irep).contains(&Opcode::Block));
        assert_eq!(irep.children[0].argc, 1);
    }

    #[test]
    fn test_block_reads_outer_local_through_upvar() {
        let irep = compile("x = 1\n[1].each { |y| x + y }");
        let block = &irep.children[0];
        let get = instrs(block)
            .into_iter()
            .find(|i| i.op == Opcode::GetUpVar)
            .expect("upvar read");
        // `x` is R2 of the top level: R0 self, R1 block slot
        assert_eq!(get.b, 2);
        assert_eq!(get.c, 0);
    }

    #[test]
    fn test_nested_block_upvar_level() {
        let irep = compile("x = 1\n[1].each { [2].each { x = 3 } }");
        let inner = &irep.children[0].children[0];
        let set = instrs(inner)
            .into_iter()
            .find(|i| i.op == Opcode::SetUpVar)
            .expect("upvar write");
        assert_eq!(set.c, 1);
    }

    #[test]
    fn test_yield_sends_to_block() {
        let irep = compile("def f\n  yield 1\nend");
        let m = &irep.children[0];
        assert!(ops(m).contains(&Opcode::BlkPush));
        assert!(m.syms.contains(&"yield".to_string()));
    }

    #[test]
    fn test_scoped_constant_uses_const_get() {
        let irep = compile("x = A::B");
        assert!(irep.syms.contains(&"const_get".to_string()));
    }

    #[test]
    fn test_symbol_block_argument() {
        let irep = compile("[1].map(&:to_s)");
        assert_eq!(irep.children.len(), 1);
        assert!(irep.children[0].syms.contains(&"to_s".to_string()));
    }

    #[test]
    fn test_super_forwards_block_slot() {
        let irep = compile("class B < A\n  def f(x)\n    super\n  end\nend");
        let f = &irep.children[0].children[0];
        let sup = instrs(f)
            .into_iter()
            .find(|i| i.op == Opcode::Super)
            .expect("super");
        assert_eq!(sup.b, 1);
    }

    #[test]
    fn test_index_assignment() {
        let irep = compile("a = [1]\na[0] = 2\na[0] += 1");
        assert!(irep.syms.contains(&"[]=".to_string()));
        assert!(irep.syms.contains(&"[]".to_string()));
    }
}

#[cfg(test)]
mod control_tests {
    use super::*;

    #[test]
    fn test_while_loop_jumps_back() {
        let irep = compile("i = 0\nwhile i < 10\n  i += 1\nend");
        let mut pc = 0;
        let mut back_edges = 0;
        while pc < irep.iseq.len() {
            let (i, next) = decode(&irep.iseq, pc).expect("decodes");
            if i.op == Opcode::Jmp && (i.a as usize) < pc {
                back_edges += 1;
            }
            pc = next;
        }
        assert_eq!(back_edges, 1);
    }

    #[test]
    fn test_rescue_installs_handler() {
        let irep = compile("begin\n  raise 'x'\nrescue => e\n  e\nend");
        let ops = ops(&irep);
        for op in [Opcode::OnErr, Opcode::PopErr, Opcode::Except, Opcode::Rescue, Opcode::RaiseIf] {
            assert!(ops.contains(&op), "missing {}", op);
        }
        assert!(irep.syms.contains(&"StandardError".to_string()));
    }

    #[test]
    fn test_break_inside_rescue_pops_handler() {
        let irep = compile("while true\n  begin\n    break\n  rescue\n  end\nend");
        let pops = instrs(&irep)
            .into_iter()
            .filter(|i| i.op == Opcode::PopErr)
            .count();
        assert_eq!(pops, 2);
    }

    #[test]
    fn test_case_sends_case_equality() {
        let irep = compile("x = 1\ncase x\nwhen 1, 2 then :a\nelse :b\nend");
        assert!(irep.syms.contains(&"===".to_string()));
    }

    #[test]
    fn test_block_jumps() {
        let irep = compile("def f\n  [1].each do |x|\n    next if x\n    break\n  end\nend");
        let block = &irep.children[0].children[0];
        let ops = ops(block);
        assert!(ops.contains(&Opcode::Break));
        assert!(ops.iter().filter(|o| **o == Opcode::Return).count() >= 2);
    }

    #[test]
    fn test_return_in_block_leaves_method() {
        let irep = compile("def f\n  [1].each { return 1 }\nend");
        assert!(ops(&irep.children[0].children[0]).contains(&Opcode::ReturnBlk));
    }

    #[test]
    fn test_every_jump_lands_on_an_instruction() {
        let source = "x = nil\nif x then 1 else 2 end\nx ||= 3\ny = x && !x\ncase 1\nwhen 2 then 3\nend";
        let irep = compile(source);
        assert!(!irep.iseq.is_empty());
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_break_outside_loop() {
        let err = compile_err("break");
        assert!(err.to_string().contains("Invalid break"), "{}", err);
        assert_eq!(err.line(), 1);
    }

    #[test]
    fn test_next_outside_loop() {
        assert!(compile_err("def f\n  next\nend").message().contains("Invalid next"));
    }

    #[test]
    fn test_return_in_class_body() {
        assert!(matches!(compile_err("class A\n  return\nend"), CompileError::Codegen(_)));
    }

    #[test]
    fn test_register_exhaustion() {
        let items = vec!["1"; 300].join(", ");
        let err = compile_err(&format!("a = [{}]", items));
        assert!(err.message().contains("registers"), "{}", err);
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let err = compile_err("x = 1\n1 +");
        assert!(matches!(err, CompileError::Syntax(_)));
        assert_eq!(err.line(), 2);
    }

    #[test]
    fn test_unfinished_input_is_incomplete() {
        assert!(compile_err("def f\n  1").is_incomplete());
        assert!(compile_err("1 +").is_incomplete());
        assert!(!compile_err("x = )").is_incomplete());
    }

    #[test]
    fn test_lex_error() {
        assert!(matches!(compile_err("x = \"open"), CompileError::Lex(_)));
    }
}
