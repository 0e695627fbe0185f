//! Prefix expression parsing (nud - null denotation)

use super::ast::*;
use super::state::*;
use super::stmt::local_names;
use super::ParseError;
use crate::frontend::lexer::tokens::*;
use crate::util::span::Position;

impl<'a> ParserState<'a> {
    /// Parse a prefix expression at the current position
    pub(super) fn parse_prefix(&mut self) -> Result<Node, ParseError> {
        let Some(tok) = self.current() else {
            return Err(self.unexpected());
        };
        let pos = tok.pos;
        let kind = match &tok.kind {
            TokenKind::IntLiteral(n) => {
                self.bump();
                if *n == i64::MIN {
                    NodeKind::Float(i64::MIN.unsigned_abs() as f64)
                } else {
                    NodeKind::Int(*n)
                }
            }
            TokenKind::FloatLiteral(f) => {
                self.bump();
                NodeKind::Float(*f)
            }
            TokenKind::StringLiteral(segments) => {
                self.bump();
                return self.parse_string(segments, pos);
            }
            TokenKind::Symbol(s) => {
                self.bump();
                NodeKind::Sym(s.clone())
            }
            TokenKind::Words(words) => {
                self.bump();
                NodeKind::Array(
                    words
                        .iter()
                        .map(|w| Node::new(NodeKind::Str(w.clone()), pos))
                        .collect(),
                )
            }
            TokenKind::KwNil => {
                self.bump();
                NodeKind::Nil
            }
            TokenKind::KwTrue => {
                self.bump();
                NodeKind::True
            }
            TokenKind::KwFalse => {
                self.bump();
                NodeKind::False
            }
            TokenKind::KwSelf => {
                self.bump();
                NodeKind::SelfRef
            }
            TokenKind::IVar(name) => {
                self.bump();
                NodeKind::IVar(name.clone())
            }
            TokenKind::GVar(name) => {
                self.bump();
                NodeKind::GVar(name.clone())
            }
            TokenKind::Constant(name) => {
                self.bump();
                if self.at(&TokenKind::LParen) && !self.space_before() {
                    return self.parse_fcall(name.clone(), pos);
                }
                NodeKind::Const { scope: None, name: name.clone() }
            }
            TokenKind::ColonColon => {
                self.bump();
                let TokenKind::Constant(name) = self.kind() else {
                    return Err(self.expected("constant name"));
                };
                self.bump();
                NodeKind::Const { scope: None, name: name.clone() }
            }
            TokenKind::Identifier(name) => {
                self.bump();
                return self.parse_identifier(name, pos);
            }
            TokenKind::LParen => {
                self.bump();
                let inner = self.with_no_do(false, |p| p.parse_stmts())?;
                self.expect(&TokenKind::RParen)?;
                return Ok(inner);
            }
            TokenKind::LBracket => return self.parse_array(),
            TokenKind::LBrace => return self.parse_hash(),
            TokenKind::Minus => {
                self.bump();
                let literal = !self.space_before();
                match self.kind() {
                    TokenKind::IntLiteral(n) if literal => {
                        self.bump();
                        NodeKind::Int(n.wrapping_neg())
                    }
                    TokenKind::FloatLiteral(f) if literal => {
                        self.bump();
                        NodeKind::Float(-f)
                    }
                    _ => {
                        let operand = self.parse_expr(BP_NEG)?;
                        return Ok(unary_call(operand, "-@", pos));
                    }
                }
            }
            TokenKind::Plus => {
                self.bump();
                return self.parse_expr(BP_NEG);
            }
            TokenKind::Bang => {
                self.bump();
                let operand = self.parse_expr(BP_UNARY)?;
                NodeKind::Not(Box::new(operand))
            }
            TokenKind::KwNot => {
                self.bump();
                let operand = self.parse_expr(BP_TERNARY)?;
                NodeKind::Not(Box::new(operand))
            }
            TokenKind::Tilde => {
                self.bump();
                let operand = self.parse_expr(BP_UNARY)?;
                return Ok(unary_call(operand, "~", pos));
            }
            TokenKind::Arrow => return self.parse_lambda(),
            TokenKind::KwDef => return self.parse_def(),
            TokenKind::KwClass => return self.parse_class(),
            TokenKind::KwIf => return self.parse_if(false),
            TokenKind::KwUnless => return self.parse_if(true),
            TokenKind::KwWhile | TokenKind::KwUntil => return self.parse_while(),
            TokenKind::KwCase => return self.parse_case(),
            TokenKind::KwBegin => return self.parse_begin(),
            TokenKind::KwYield => return self.parse_yield(),
            TokenKind::KwSuper => return self.parse_super(),
            TokenKind::KwReturn | TokenKind::KwBreak | TokenKind::KwNext => {
                return self.parse_jump();
            }
            _ => return Err(self.unexpected()),
        };
        Ok(Node::new(kind, pos))
    }

    /// Token can begin a value after `return` and friends
    pub(super) fn can_start_value(&self) -> bool {
        can_start_expr(self.kind())
            && !matches!(
                self.kind(),
                TokenKind::KwIf | TokenKind::KwUnless | TokenKind::KwWhile | TokenKind::KwUntil
            )
    }

    /// The current token starts the arguments of a call written without
    /// parentheses (`puts x`, `foo -1`, `bar [1]`)
    pub(super) fn at_command_arg(&self) -> bool {
        if !self.space_before() || !self.can_start_value() {
            return false;
        }
        let next_tight = self.peek().is_some_and(|t| !t.space_before);
        match self.kind() {
            TokenKind::Minus | TokenKind::Bang => next_tight,
            TokenKind::Plus | TokenKind::LBrace | TokenKind::KwNot => false,
            _ => true,
        }
    }

    fn parse_identifier(
        &mut self,
        name: &str,
        pos: Position,
    ) -> Result<Node, ParseError> {
        let paren = self.at(&TokenKind::LParen) && !self.space_before();
        if self.is_local(name) && !paren {
            return Ok(Node::new(NodeKind::LVar(name.to_string()), pos));
        }
        if name == "block_given?" {
            if paren {
                self.bump();
                self.expect(&TokenKind::RParen)?;
            }
            return Ok(Node::new(NodeKind::BlockGiven, pos));
        }
        if paren {
            return self.parse_fcall(name.to_string(), pos);
        }
        let mut call = Call {
            recv: None,
            name: name.to_string(),
            args: Vec::new(),
            block: None,
            block_arg: None,
        };
        if self.at_command_arg() {
            self.parse_command_args(&mut call)?;
        }
        self.parse_block_opt(&mut call)?;
        Ok(Node::new(NodeKind::Call(Box::new(call)), pos))
    }

    /// `name(args)` without receiver
    fn parse_fcall(
        &mut self,
        name: String,
        pos: Position,
    ) -> Result<Node, ParseError> {
        let mut call = Call {
            recv: None,
            name,
            args: Vec::new(),
            block: None,
            block_arg: None,
        };
        self.parse_paren_args(&mut call)?;
        self.parse_block_opt(&mut call)?;
        Ok(Node::new(NodeKind::Call(Box::new(call)), pos))
    }

    fn parse_string(
        &mut self,
        segments: &'a [StrSegment],
        pos: Position,
    ) -> Result<Node, ParseError> {
        if let [StrSegment::Lit(s)] = segments {
            return Ok(Node::new(NodeKind::Str(s.clone()), pos));
        }
        let mut parts = Vec::new();
        for segment in segments {
            match segment {
                StrSegment::Lit(s) => parts.push(StrPart::Lit(s.clone())),
                StrSegment::Code(tokens) => {
                    let mut sub = ParserState::new(tokens);
                    sub.scopes = std::mem::take(&mut self.scopes);
                    let result = sub.parse_stmts();
                    let trailing = !sub.at_end();
                    let error = trailing.then(|| sub.unexpected());
                    self.scopes = std::mem::take(&mut sub.scopes);
                    let node = result?;
                    if let Some(e) = error {
                        return Err(e);
                    }
                    parts.push(StrPart::Code(node));
                }
            }
        }
        Ok(Node::new(NodeKind::DStr(parts), pos))
    }

    fn parse_array(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let elements = self.with_no_do(false, |p| {
            let mut elements = Vec::new();
            loop {
                p.skip_newlines();
                if p.at(&TokenKind::RBracket) {
                    break;
                }
                if p.at(&TokenKind::Star) {
                    return Err(ParseError::invalid(
                        "splat in array literal is not supported",
                        p.position(),
                    ));
                }
                elements.push(p.parse_expr(BP_LOWEST)?);
                p.skip_newlines();
                if !p.skip(&TokenKind::Comma) {
                    break;
                }
            }
            p.skip_newlines();
            p.expect(&TokenKind::RBracket)?;
            Ok::<_, ParseError>(elements)
        })?;
        Ok(Node::new(NodeKind::Array(elements), pos))
    }

    fn parse_hash(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let pairs = self.with_no_do(false, |p| {
            let mut pairs = Vec::new();
            loop {
                p.skip_newlines();
                if p.at(&TokenKind::RBrace) {
                    break;
                }
                let key = if let TokenKind::Label(name) = p.kind() {
                    let key = Node::new(NodeKind::Sym(name.clone()), p.position());
                    p.bump();
                    key
                } else {
                    let key = p.parse_expr(BP_LOWEST)?;
                    p.expect(&TokenKind::FatArrow)?;
                    key
                };
                p.skip_newlines();
                let value = p.parse_expr(BP_LOWEST)?;
                pairs.push((key, value));
                p.skip_newlines();
                if !p.skip(&TokenKind::Comma) {
                    break;
                }
            }
            p.skip_newlines();
            p.expect(&TokenKind::RBrace)?;
            Ok::<_, ParseError>(pairs)
        })?;
        Ok(Node::new(NodeKind::Hash(pairs), pos))
    }

    /// `-> (params) { body }`
    fn parse_lambda(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        self.push_scope(false);
        let result = self.with_no_do(false, |p| {
            let params = if p.skip(&TokenKind::LParen) {
                let params = p.parse_params(BP_ASSIGN, true)?;
                p.expect(&TokenKind::RParen)?;
                params
            } else {
                p.parse_params(BP_ASSIGN, false)?
            };
            let body = if p.skip(&TokenKind::LBrace) {
                let body = p.parse_stmts()?;
                p.expect(&TokenKind::RBrace)?;
                body
            } else if p.skip(&TokenKind::KwDo) {
                let body = p.parse_body_with_rescue()?;
                p.expect(&TokenKind::KwEnd)?;
                body
            } else {
                return Err(p.expected("'{' or 'do'"));
            };
            Ok::<_, ParseError>((params, body))
        });
        let vars = self.pop_scope();
        let (params, body) = result?;
        let locals = local_names(vars, &params);
        Ok(Node::new(
            NodeKind::Lambda(Box::new(BlockNode {
                params,
                body,
                locals,
                pos,
            })),
            pos,
        ))
    }

    fn parse_yield(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let mut call = Call {
            recv: None,
            name: String::new(),
            args: Vec::new(),
            block: None,
            block_arg: None,
        };
        if self.at(&TokenKind::LParen) && !self.space_before() {
            self.parse_paren_args(&mut call)?;
        } else if self.at_command_arg() {
            self.parse_command_args(&mut call)?;
        }
        if call.block_arg.is_some() {
            return Err(ParseError::invalid("block argument should not be given to yield", pos));
        }
        Ok(Node::new(NodeKind::Yield(call.args), pos))
    }

    fn parse_super(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let mut call = Call {
            recv: None,
            name: String::new(),
            args: Vec::new(),
            block: None,
            block_arg: None,
        };
        let explicit = if self.at(&TokenKind::LParen) && !self.space_before() {
            self.parse_paren_args(&mut call)?;
            true
        } else if self.at_command_arg() {
            self.parse_command_args(&mut call)?;
            true
        } else {
            false
        };
        self.parse_block_opt(&mut call)?;
        if call.block_arg.is_some() {
            return Err(ParseError::invalid("block argument to super is not supported", pos));
        }
        Ok(Node::new(
            NodeKind::Super {
                args: explicit.then_some(call.args),
                block: call.block.map(Box::new),
            },
            pos,
        ))
    }

    /// `return`, `break` and `next` with an optional value
    fn parse_jump(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        let keyword = self.kind().clone();
        self.bump();
        let value = if self.can_start_value() {
            let first = self.parse_expr(BP_LOWEST)?;
            if self.at(&TokenKind::Comma) {
                let mut values = vec![first];
                while self.skip(&TokenKind::Comma) {
                    values.push(self.parse_expr(BP_LOWEST)?);
                }
                Some(Box::new(Node::new(NodeKind::Array(values), pos)))
            } else {
                Some(Box::new(first))
            }
        } else {
            None
        };
        let kind = match keyword {
            TokenKind::KwReturn => NodeKind::Return(value),
            TokenKind::KwBreak => NodeKind::Break(value),
            _ => NodeKind::Next(value),
        };
        Ok(Node::new(kind, pos))
    }

    /// Brace or `do` block, with `|params|`
    pub(super) fn parse_block(&mut self) -> Result<BlockNode, ParseError> {
        let pos = self.position();
        let brace = self.at(&TokenKind::LBrace);
        self.bump();
        self.push_scope(false);
        let result = self.with_no_do(false, |p| {
            let params = if p.skip(&TokenKind::OrOr) {
                Params::default()
            } else if p.skip(&TokenKind::Pipe) {
                let params = p.parse_params(BP_BIT_OR, true)?;
                p.expect(&TokenKind::Pipe)?;
                params
            } else {
                Params::default()
            };
            let body = if brace {
                let body = p.parse_stmts()?;
                p.expect(&TokenKind::RBrace)?;
                body
            } else {
                let body = p.parse_body_with_rescue()?;
                p.expect(&TokenKind::KwEnd)?;
                body
            };
            Ok::<_, ParseError>((params, body))
        });
        let vars = self.pop_scope();
        let (params, body) = result?;
        let locals = local_names(vars, &params);
        Ok(BlockNode {
            params,
            body,
            locals,
            pos,
        })
    }

    /// Attach a following block to `call`
    pub(super) fn parse_block_opt(
        &mut self,
        call: &mut Call,
    ) -> Result<(), ParseError> {
        let starts = match self.kind() {
            TokenKind::LBrace => true,
            TokenKind::KwDo => !self.no_do,
            _ => false,
        };
        if !starts {
            return Ok(());
        }
        let pos = self.position();
        if call.block_arg.is_some() {
            return Err(ParseError::invalid("both block arg and actual block given", pos));
        }
        call.block = Some(self.parse_block()?);
        Ok(())
    }

    /// One argument; keyword pairs are collected into `pairs`
    fn parse_call_arg(
        &mut self,
        call: &mut Call,
        pairs: &mut Vec<(Node, Node)>,
    ) -> Result<(), ParseError> {
        let pos = self.position();
        match self.kind() {
            TokenKind::Label(name) => {
                self.bump();
                self.skip_newlines();
                let value = self.parse_expr(BP_LOWEST)?;
                pairs.push((Node::new(NodeKind::Sym(name.clone()), pos), value));
            }
            TokenKind::Amp => {
                self.bump();
                call.block_arg = Some(self.parse_expr(BP_TERNARY)?);
            }
            TokenKind::Star | TokenKind::StarStar => {
                return Err(ParseError::invalid("splat arguments are not supported", pos));
            }
            _ => {
                let value = self.parse_expr(BP_LOWEST)?;
                if self.skip(&TokenKind::FatArrow) {
                    self.skip_newlines();
                    let v = self.parse_expr(BP_LOWEST)?;
                    pairs.push((value, v));
                } else {
                    call.args.push(value);
                }
            }
        }
        Ok(())
    }

    fn finish_args(
        call: &mut Call,
        pairs: Vec<(Node, Node)>,
        pos: Position,
    ) {
        if !pairs.is_empty() {
            call.args.push(Node::new(NodeKind::Hash(pairs), pos));
        }
    }

    /// `(a, b, key: v, &blk)`
    pub(super) fn parse_paren_args(
        &mut self,
        call: &mut Call,
    ) -> Result<(), ParseError> {
        let pos = self.position();
        self.bump();
        self.with_no_do(false, |p| {
            let mut pairs = Vec::new();
            loop {
                p.skip_newlines();
                if p.at(&TokenKind::RParen) {
                    break;
                }
                p.parse_call_arg(call, &mut pairs)?;
                p.skip_newlines();
                if !p.skip(&TokenKind::Comma) {
                    break;
                }
            }
            p.skip_newlines();
            p.expect(&TokenKind::RParen)?;
            Self::finish_args(call, pairs, pos);
            Ok::<_, ParseError>(())
        })
    }

    /// Arguments of a call written without parentheses
    pub(super) fn parse_command_args(
        &mut self,
        call: &mut Call,
    ) -> Result<(), ParseError> {
        let pos = self.position();
        self.with_no_do(true, |p| {
            let mut pairs = Vec::new();
            loop {
                p.parse_call_arg(call, &mut pairs)?;
                if !p.skip(&TokenKind::Comma) {
                    break;
                }
            }
            Self::finish_args(call, pairs, pos);
            Ok::<_, ParseError>(())
        })
    }
}

fn unary_call(
    operand: Node,
    name: &str,
    pos: Position,
) -> Node {
    Node::new(
        NodeKind::Call(Box::new(Call {
            recv: Some(operand),
            name: name.to_string(),
            args: Vec::new(),
            block: None,
            block_arg: None,
        })),
        pos,
    )
}
