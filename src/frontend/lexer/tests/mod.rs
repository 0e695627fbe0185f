//! Lexer 单元测试

use crate::frontend::lexer::{tokenize, LexError, StrSegment, TokenKind};

fn kinds(source: &str) -> Vec<TokenKind> {
    tokenize(source)
        .unwrap()
        .into_iter()
        .map(|t| t.kind)
        .collect()
}

#[cfg(test)]
mod lexer_basic_tests {
    use super::*;

    #[test]
    fn test_empty_source() {
        assert_eq!(kinds(""), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_blank_lines_produce_no_newlines() {
        assert_eq!(kinds("  \n\n\t\n"), vec![TokenKind::Eof]);
    }

    #[test]
    fn test_names() {
        assert_eq!(
            kinds("foo Bar @baz $qux empty? save!"),
            vec![
                TokenKind::Identifier("foo".into()),
                TokenKind::Constant("Bar".into()),
                TokenKind::IVar("@baz".into()),
                TokenKind::GVar("$qux".into()),
                TokenKind::Identifier("empty?".into()),
                TokenKind::Identifier("save!".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_keywords_after_dot_are_identifiers() {
        assert_eq!(
            kinds("x.class"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::Dot,
                TokenKind::Identifier("class".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_bang_equal_is_not_part_of_name() {
        assert_eq!(
            kinds("a!=b"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Neq,
                TokenKind::Identifier("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_labels_and_symbols() {
        assert_eq!(
            kinds("{ key: :value, :\"two words\" => :+ }"),
            vec![
                TokenKind::LBrace,
                TokenKind::Label("key".into()),
                TokenKind::Symbol("value".into()),
                TokenKind::Comma,
                TokenKind::Symbol("two words".into()),
                TokenKind::FatArrow,
                TokenKind::Symbol("+".into()),
                TokenKind::RBrace,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_scope_operator() {
        assert_eq!(
            kinds("GPIO::OUT"),
            vec![
                TokenKind::Constant("GPIO".into()),
                TokenKind::ColonColon,
                TokenKind::Constant("OUT".into()),
                TokenKind::Eof,
            ]
        );
    }
}

#[cfg(test)]
mod lexer_literal_tests {
    use super::*;

    #[test]
    fn test_integers() {
        assert_eq!(
            kinds("42 1_000 0xff 0b101"),
            vec![
                TokenKind::IntLiteral(42),
                TokenKind::IntLiteral(1000),
                TokenKind::IntLiteral(255),
                TokenKind::IntLiteral(5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_floats() {
        assert_eq!(
            kinds("1.5 2e3 1.0e-2"),
            vec![
                TokenKind::FloatLiteral(1.5),
                TokenKind::FloatLiteral(2000.0),
                TokenKind::FloatLiteral(0.01),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_integer_then_method_call() {
        assert_eq!(
            kinds("3.times"),
            vec![
                TokenKind::IntLiteral(3),
                TokenKind::Dot,
                TokenKind::Identifier("times".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_oversized_integer_becomes_float() {
        assert_eq!(
            kinds("9223372036854775809"),
            vec![TokenKind::FloatLiteral(9.223372036854776e18), TokenKind::Eof]
        );
    }

    #[test]
    fn test_min_integer_magnitude_is_kept() {
        assert_eq!(
            kinds("-9223372036854775808"),
            vec![
                TokenKind::Minus,
                TokenKind::IntLiteral(i64::MIN),
                TokenKind::Eof
            ]
        );
    }

    #[test]
    fn test_ranges() {
        assert_eq!(
            kinds("1..5 1...5"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::DotDot,
                TokenKind::IntLiteral(5),
                TokenKind::IntLiteral(1),
                TokenKind::DotDotDot,
                TokenKind::IntLiteral(5),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_escapes() {
        assert_eq!(
            kinds(r#""a\tb\n\u{41}""#),
            vec![
                TokenKind::StringLiteral(vec![StrSegment::Lit("a\tb\nA".into())]),
                TokenKind::Eof,
            ]
        );
        assert_eq!(
            kinds(r#"'no\n #{x}'"#),
            vec![
                TokenKind::StringLiteral(vec![StrSegment::Lit("no\\n #{x}".into())]),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_interpolation() {
        let tokens = tokenize(r#""n=#{n + 1}!""#).unwrap();
        let TokenKind::StringLiteral(segments) = &tokens[0].kind else {
            panic!("expected string, got {:?}", tokens[0].kind);
        };
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0], StrSegment::Lit("n=".into()));
        let StrSegment::Code(code) = &segments[1] else {
            panic!("expected code segment");
        };
        let inner: Vec<_> = code.iter().map(|t| t.kind.clone()).collect();
        assert_eq!(
            inner,
            vec![
                TokenKind::Identifier("n".into()),
                TokenKind::Plus,
                TokenKind::IntLiteral(1),
                TokenKind::Eof,
            ]
        );
        assert_eq!(segments[2], StrSegment::Lit("!".into()));
    }

    #[test]
    fn test_nested_braces_in_interpolation() {
        let tokens = tokenize(r##""#{{a: 1}[:a]}""##).unwrap();
        let TokenKind::StringLiteral(segments) = &tokens[0].kind else {
            panic!("expected string");
        };
        assert_eq!(segments.len(), 1);
        assert!(matches!(segments[0], StrSegment::Code(_)));
    }

    #[test]
    fn test_words() {
        assert_eq!(
            kinds("%w[red green]"),
            vec![
                TokenKind::Words(vec!["red".into(), "green".into()]),
                TokenKind::Eof,
            ]
        );
    }
}

#[cfg(test)]
mod lexer_layout_tests {
    use super::*;

    #[test]
    fn test_newline_separates_statements() {
        assert_eq!(
            kinds("a\nb\n"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Newline,
                TokenKind::Identifier("b".into()),
                TokenKind::Newline,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_trailing_operator_continues_line() {
        assert_eq!(
            kinds("1 +\n2"),
            vec![
                TokenKind::IntLiteral(1),
                TokenKind::Plus,
                TokenKind::IntLiteral(2),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_leading_dot_continues_chain() {
        assert_eq!(
            kinds("list\n  .size"),
            vec![
                TokenKind::Identifier("list".into()),
                TokenKind::Dot,
                TokenKind::Identifier("size".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments() {
        assert_eq!(
            kinds("a # note\n=begin\nignored\n=end\nb"),
            vec![
                TokenKind::Identifier("a".into()),
                TokenKind::Newline,
                TokenKind::Identifier("b".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_space_before_is_recorded() {
        let tokens = tokenize("foo [1]").unwrap();
        assert!(tokens[1].space_before);
        let tokens = tokenize("foo[1]").unwrap();
        assert!(!tokens[1].space_before);
    }

    #[test]
    fn test_positions() {
        let tokens = tokenize("a\n  bc").unwrap();
        assert_eq!(tokens[2].pos.line, 2);
        assert_eq!(tokens[2].pos.column, 3);
    }

    #[test]
    fn test_op_assign() {
        assert_eq!(
            kinds("x += 1; y ||= 2"),
            vec![
                TokenKind::Identifier("x".into()),
                TokenKind::OpAssign("+".into()),
                TokenKind::IntLiteral(1),
                TokenKind::Semicolon,
                TokenKind::Identifier("y".into()),
                TokenKind::OpAssign("||".into()),
                TokenKind::IntLiteral(2),
                TokenKind::Eof,
            ]
        );
    }
}

#[cfg(test)]
mod lexer_error_tests {
    use super::*;

    #[test]
    fn test_unterminated_string() {
        let err = tokenize("puts \"abc").unwrap_err();
        assert!(matches!(err, LexError::UnterminatedString { .. }));
        assert_eq!(err.pos().column, 6);
    }

    #[test]
    fn test_unexpected_character() {
        let err = tokenize("a = `ls`").unwrap_err();
        assert!(matches!(err, LexError::UnexpectedChar { ch: '`', .. }));
    }

    #[test]
    fn test_bad_number() {
        assert!(matches!(
            tokenize("12abc").unwrap_err(),
            LexError::InvalidNumber { .. }
        ));
    }
}
