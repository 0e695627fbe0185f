//! Parser 单元测试

use super::ast::*;
use super::{parse, ParseError};
use crate::frontend::lexer::tokenize;

fn program(source: &str) -> Program {
    let tokens = tokenize(source).unwrap();
    parse(&tokens).unwrap()
}

/// Top-level statements
fn stmts(source: &str) -> Vec<Node> {
    match program(source).body.kind {
        NodeKind::Seq(nodes) => nodes,
        NodeKind::Nil => Vec::new(),
        other => vec![Node::new(other, Default::default())],
    }
}

fn single(source: &str) -> NodeKind {
    let mut nodes = stmts(source);
    assert_eq!(nodes.len(), 1, "expected one statement in {:?}", source);
    nodes.remove(0).kind
}

fn parse_err(source: &str) -> ParseError {
    let tokens = tokenize(source).unwrap();
    parse(&tokens).unwrap_err()
}

fn call(kind: &NodeKind) -> &Call {
    match kind {
        NodeKind::Call(c) => c,
        other => panic!("expected call, got {:?}", other),
    }
}

#[cfg(test)]
mod expression_tests {
    use super::*;

    #[test]
    fn test_precedence() {
        // 1 + (2 * 3)
        let kind = single("1 + 2 * 3");
        let add = call(&kind);
        assert_eq!(add.name, "+");
        assert_eq!(call(&add.args[0].kind).name, "*");
    }

    #[test]
    fn test_power_is_right_associative() {
        let kind = single("2 ** 3 ** 2");
        let outer = call(&kind);
        assert_eq!(outer.recv.as_ref().unwrap().kind, NodeKind::Int(2));
        assert_eq!(call(&outer.args[0].kind).name, "**");
    }

    #[test]
    fn test_negative_literal() {
        assert_eq!(single("-5"), NodeKind::Int(-5));
        assert_eq!(single("-9223372036854775808"), NodeKind::Int(i64::MIN));
        assert_eq!(single("9223372036854775808"), NodeKind::Float(9.223372036854776e18));
        let nodes = stmts("x = 3\n-x");
        assert_eq!(call(&nodes[1].kind).name, "-@");
    }

    #[test]
    fn test_comparison_and_logic() {
        let nodes = stmts("a = 1\na < 2 && a > 0");
        assert!(matches!(nodes[1].kind, NodeKind::And(_, _)));
    }

    #[test]
    fn test_ternary() {
        let nodes = stmts("x = 1\nx > 0 ? :pos : :neg");
        match &nodes[1].kind {
            NodeKind::If {
                then_body,
                else_body,
                ..
            } => {
                assert_eq!(then_body.kind, NodeKind::Sym("pos".into()));
                assert_eq!(else_body.as_ref().unwrap().kind, NodeKind::Sym("neg".into()));
            }
            other => panic!("expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_ranges() {
        let nodes = stmts("1..10\n1...n\n(1..)");
        assert!(matches!(
            nodes[0].kind,
            NodeKind::Range {
                exclusive: false,
                ..
            }
        ));
        assert!(matches!(nodes[1].kind, NodeKind::Range { exclusive: true, .. }));
        match &nodes[2].kind {
            NodeKind::Range { end, .. } => assert_eq!(end.kind, NodeKind::Nil),
            other => panic!("expected range, got {:?}", other),
        }
    }

    #[test]
    fn test_literals() {
        let nodes = stmts("[1, 2.5, 'a', :b, nil]\n{a: 1, 'b' => 2}\n%w[x y]");
        match &nodes[0].kind {
            NodeKind::Array(items) => assert_eq!(items.len(), 5),
            other => panic!("expected array, got {:?}", other),
        }
        match &nodes[1].kind {
            NodeKind::Hash(pairs) => {
                assert_eq!(pairs.len(), 2);
                assert_eq!(pairs[0].0.kind, NodeKind::Sym("a".into()));
            }
            other => panic!("expected hash, got {:?}", other),
        }
        assert!(matches!(&nodes[2].kind, NodeKind::Array(items) if items.len() == 2));
    }

    #[test]
    fn test_interpolation_sees_locals() {
        let kind = &stmts("n = 1\n\"n=#{n}\"")[1].kind;
        match kind {
            NodeKind::DStr(parts) => {
                assert_eq!(parts[0], StrPart::Lit("n=".into()));
                assert!(matches!(&parts[1], StrPart::Code(node) if node.kind == NodeKind::LVar("n".into())));
            }
            other => panic!("expected interpolated string, got {:?}", other),
        }
    }

    #[test]
    fn test_constants() {
        match single("GPIO::OUT") {
            NodeKind::Const {
                scope: Some(scope),
                name,
            } => {
                assert_eq!(name, "OUT");
                assert!(matches!(scope.kind, NodeKind::Const { scope: None, .. }));
            }
            other => panic!("expected scoped constant, got {:?}", other),
        }
    }
}

#[cfg(test)]
mod call_tests {
    use super::*;

    #[test]
    fn test_identifier_is_call_until_assigned() {
        let nodes = stmts("foo\nfoo = 1\nfoo");
        assert!(matches!(&nodes[0].kind, NodeKind::Call(c) if c.name == "foo"));
        assert!(matches!(nodes[1].kind, NodeKind::Assign { .. }));
        assert_eq!(nodes[2].kind, NodeKind::LVar("foo".into()));
    }

    #[test]
    fn test_command_call() {
        let kind = single("puts 1, \"two\"");
        let c = call(&kind);
        assert_eq!(c.name, "puts");
        assert!(c.recv.is_none());
        assert_eq!(c.args.len(), 2);
    }

    #[test]
    fn test_command_call_with_negative_argument() {
        let kind = single("puts -1");
        assert_eq!(call(&kind).args[0].kind, NodeKind::Int(-1));
        // binary minus when spaced on both sides
        let kind = single("foo - 1");
        assert_eq!(call(&kind).name, "-");
    }

    #[test]
    fn test_method_chain_with_args() {
        let nodes = stmts("a = [3, 1]\na.sort.first(1)");
        let first = call(&nodes[1].kind);
        assert_eq!(first.name, "first");
        assert_eq!(first.args.len(), 1);
        assert_eq!(call(&first.recv.as_ref().unwrap().kind).name, "sort");
    }

    #[test]
    fn test_keyword_arguments_become_hash() {
        let kind = single("foo(1, key: 2)");
        let c = call(&kind);
        assert_eq!(c.args.len(), 2);
        assert!(matches!(c.args[1].kind, NodeKind::Hash(_)));
    }

    #[test]
    fn test_brace_block_binds_to_last_call() {
        let kind = single("puts [1].map { |x| x * 2 }");
        let puts = call(&kind);
        assert!(puts.block.is_none());
        let map = call(&puts.args[0].kind);
        let block = map.block.as_ref().unwrap();
        assert_eq!(block.params.required, vec!["x".to_string()]);
    }

    #[test]
    fn test_do_block_binds_to_command_call() {
        let kind = single("foo bar do |x|\n  x\nend");
        let foo = call(&kind);
        assert!(foo.block.is_some());
        assert!(call(&foo.args[0].kind).block.is_none());
    }

    #[test]
    fn test_block_locals_and_upvars() {
        let nodes = stmts("total = 0\n[1, 2].each do |n|\n  sq = n * n\n  total += sq\nend");
        let each = call(&nodes[1].kind);
        let block = each.block.as_ref().unwrap();
        assert_eq!(block.locals, vec!["sq".to_string()]);
        assert_eq!(program("total = 0").locals, vec!["total".to_string()]);
    }

    #[test]
    fn test_index_and_attribute_assignment() {
        let nodes = stmts("h = {}\nh[:a] = 1\nh.size = 2\nh[:b] ||= 3");
        assert!(matches!(
            &nodes[1].kind,
            NodeKind::Assign { target, .. } if matches!(**target, Target::Index { .. })
        ));
        assert!(matches!(
            &nodes[2].kind,
            NodeKind::Assign { target, .. } if matches!(**target, Target::Attr { ref name, .. } if name == "size")
        ));
        assert!(matches!(&nodes[3].kind, NodeKind::OpAssign { op, .. } if op == "||"));
    }

    #[test]
    fn test_multi_assign() {
        let nodes = stmts("a = 1\nb = 2\na, b = b, a");
        match &nodes[2].kind {
            NodeKind::MultiAssign { targets, value } => {
                assert_eq!(targets.len(), 2);
                assert!(matches!(&value.kind, NodeKind::Array(v) if v.len() == 2));
            }
            other => panic!("expected multiple assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_yield_and_block_given() {
        let kind = single("def each\n  yield 1, 2 if block_given?\nend");
        let NodeKind::Def(def) = kind else {
            panic!("expected def");
        };
        match &def.body.kind {
            NodeKind::If { cond, then_body, .. } => {
                assert_eq!(cond.kind, NodeKind::BlockGiven);
                assert!(matches!(&then_body.kind, NodeKind::Yield(args) if args.len() == 2));
            }
            other => panic!("expected modifier if, got {:?}", other),
        }
    }

    #[test]
    fn test_lambda_literal() {
        let kind = single("->(x, y = 2) { x + y }");
        let NodeKind::Lambda(block) = kind else {
            panic!("expected lambda");
        };
        assert_eq!(block.params.required, vec!["x".to_string()]);
        assert_eq!(block.params.optional.len(), 1);
    }
}

#[cfg(test)]
mod statement_tests {
    use super::*;

    #[test]
    fn test_def_with_params() {
        let NodeKind::Def(def) = single("def add(a, b = 1, &blk)\n  c = a + b\nend") else {
            panic!("expected def");
        };
        assert_eq!(def.name, "add");
        assert!(!def.singleton);
        assert_eq!(def.params.required, vec!["a".to_string()]);
        assert_eq!(def.params.optional[0].0, "b");
        assert_eq!(def.params.block.as_deref(), Some("blk"));
        assert_eq!(def.locals, vec!["c".to_string()]);
    }

    #[test]
    fn test_def_operator_setter_and_singleton() {
        let nodes = stmts("def ==(o)\nend\ndef name=(v)\nend\ndef self.build\nend\ndef [](i)\nend");
        let names: Vec<_> = nodes
            .iter()
            .map(|n| match &n.kind {
                NodeKind::Def(d) => (d.name.clone(), d.singleton),
                other => panic!("expected def, got {:?}", other),
            })
            .collect();
        assert_eq!(
            names,
            vec![
                ("==".to_string(), false),
                ("name=".to_string(), false),
                ("build".to_string(), true),
                ("[]".to_string(), false),
            ]
        );
    }

    #[test]
    fn test_method_body_does_not_see_outer_locals() {
        let NodeKind::Def(def) = stmts("x = 1\ndef f\n  x\nend").remove(1).kind else {
            panic!("expected def");
        };
        assert!(matches!(&def.body.kind, NodeKind::Call(c) if c.name == "x"));
    }

    #[test]
    fn test_class_with_superclass() {
        let NodeKind::Class(class) = single("class Led < Device\n  def on\n    @on = true\n  end\nend")
        else {
            panic!("expected class");
        };
        assert_eq!(class.name, "Led");
        assert!(matches!(
            class.superclass.as_ref().map(|s| &s.kind),
            Some(NodeKind::Const { name, .. }) if name == "Device"
        ));
        assert!(matches!(class.body.kind, NodeKind::Def(_)));
    }

    #[test]
    fn test_if_elsif_else() {
        let kind = single("if a\n  1\nelsif b\n  2\nelse\n  3\nend");
        let NodeKind::If { else_body, .. } = kind else {
            panic!("expected if");
        };
        assert!(matches!(else_body.unwrap().kind, NodeKind::If { .. }));
    }

    #[test]
    fn test_unless_swaps_branches() {
        let NodeKind::If {
            then_body,
            else_body,
            ..
        } = single("unless a\n  1\nend")
        else {
            panic!("expected if");
        };
        assert_eq!(then_body.kind, NodeKind::Nil);
        assert_eq!(else_body.unwrap().kind, NodeKind::Int(1));
    }

    #[test]
    fn test_while_with_do_keyword() {
        let nodes = stmts("i = 0\nwhile i < 3 do\n  i += 1\nend");
        assert!(matches!(nodes[1].kind, NodeKind::While { negate: false, .. }));
    }

    #[test]
    fn test_modifiers() {
        let nodes = stmts("x = 0\nx += 1 while x < 5\nputs x unless x.zero?\nfoo rescue nil");
        assert!(matches!(nodes[1].kind, NodeKind::While { .. }));
        assert!(matches!(nodes[2].kind, NodeKind::If { .. }));
        assert!(matches!(nodes[3].kind, NodeKind::Begin(_)));
    }

    #[test]
    fn test_case_when() {
        let kind = single("case x\nwhen 1, 2 then :low\nwhen 3..5\n  :mid\nelse\n  :high\nend");
        let NodeKind::Case {
            subject,
            whens,
            else_body,
        } = kind
        else {
            panic!("expected case");
        };
        assert!(subject.is_some());
        assert_eq!(whens.len(), 2);
        assert_eq!(whens[0].0.len(), 2);
        assert!(else_body.is_some());
    }

    #[test]
    fn test_begin_rescue_ensure() {
        let kind =
            single("begin\n  risky\nrescue ArgumentError, TypeError => e\n  e\nelse\n  1\nensure\n  done\nend");
        let NodeKind::Begin(block) = kind else {
            panic!("expected begin");
        };
        assert_eq!(block.rescues.len(), 1);
        assert_eq!(block.rescues[0].classes.len(), 2);
        assert_eq!(block.rescues[0].var.as_deref(), Some("e"));
        assert!(block.else_body.is_some());
        assert!(block.ensure.is_some());
    }

    #[test]
    fn test_and_or_keywords() {
        assert!(matches!(single("a or b"), NodeKind::Or(_, _)));
        assert!(matches!(single("not a and b"), NodeKind::And(_, _)));
    }

    #[test]
    fn test_return_values() {
        let NodeKind::Def(def) = single("def f\n  return 1, 2\nend") else {
            panic!("expected def");
        };
        assert!(matches!(
            &def.body.kind,
            NodeKind::Return(Some(v)) if matches!(v.kind, NodeKind::Array(_))
        ));
    }
}

#[cfg(test)]
mod error_tests {
    use super::*;

    #[test]
    fn test_dangling_operator() {
        let err = parse_err("1 +");
        assert!(matches!(err, ParseError::UnexpectedToken { .. }));
        assert_eq!(err.pos().line, 1);
    }

    #[test]
    fn test_missing_end() {
        let err = parse_err("def f\n  1\n");
        assert!(err.to_string().contains("end"), "{}", err);
    }

    #[test]
    fn test_stray_end() {
        assert!(matches!(parse_err("1\nend"), ParseError::UnexpectedToken { .. }));
    }

    #[test]
    fn test_invalid_assignment_target() {
        assert!(matches!(parse_err("1 = 2"), ParseError::Invalid { .. }));
    }

    #[test]
    fn test_error_position() {
        let err = parse_err("x = 1\ny = )");
        assert_eq!(err.pos().line, 2);
        assert_eq!(err.pos().column, 5);
    }
}
