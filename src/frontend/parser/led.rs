//! Infix and postfix expression parsing (led - left denotation)

use super::ast::*;
use super::state::*;
use super::ParseError;
use crate::frontend::lexer::tokens::*;

/// Left and right binding power of an infix token
fn infix_bp(kind: &TokenKind) -> Option<(u8, u8)> {
    let left_assoc = |bp: u8| Some((bp, bp));
    match kind {
        TokenKind::Assign | TokenKind::OpAssign(_) => Some((BP_ASSIGN, BP_ASSIGN - 1)),
        TokenKind::Question => Some((BP_TERNARY, BP_TERNARY - 1)),
        TokenKind::DotDot | TokenKind::DotDotDot => left_assoc(BP_RANGE),
        TokenKind::OrOr => left_assoc(BP_OR),
        TokenKind::AndAnd => left_assoc(BP_AND),
        TokenKind::EqEq | TokenKind::Neq | TokenKind::EqEqEq | TokenKind::Cmp => {
            left_assoc(BP_EQ)
        }
        TokenKind::Lt | TokenKind::Le | TokenKind::Gt | TokenKind::Ge => left_assoc(BP_CMP),
        TokenKind::Pipe | TokenKind::Caret => left_assoc(BP_BIT_OR),
        TokenKind::Amp => left_assoc(BP_BIT_AND),
        TokenKind::Shl | TokenKind::Shr => left_assoc(BP_SHIFT),
        TokenKind::Plus | TokenKind::Minus => left_assoc(BP_ADD),
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => left_assoc(BP_MUL),
        TokenKind::StarStar => Some((BP_POW, BP_POW - 1)),
        TokenKind::Dot | TokenKind::ColonColon | TokenKind::LBracket => left_assoc(BP_CALL),
        _ => None,
    }
}

/// Name usable as a local variable
fn is_local_name(name: &str) -> bool {
    name.starts_with(|c: char| c.is_lowercase() || c == '_')
        && !name.ends_with(['?', '!', '='])
}

impl<'a> ParserState<'a> {
    /// Parse an expression whose operators bind tighter than `min_bp`
    pub fn parse_expr(
        &mut self,
        min_bp: u8,
    ) -> Result<Node, ParseError> {
        let mut left = self.parse_prefix()?;
        while let Some((lbp, rbp)) = infix_bp(self.kind()) {
            if lbp <= min_bp {
                break;
            }
            left = self.parse_infix(left, rbp)?;
        }
        Ok(left)
    }

    fn parse_infix(
        &mut self,
        left: Node,
        rbp: u8,
    ) -> Result<Node, ParseError> {
        let pos = self.position();
        let op = self.kind();
        self.bump();
        let kind = match op {
            TokenKind::Assign => {
                self.skip_newlines();
                let target = self.to_target(left)?;
                let value = self.parse_expr(rbp)?;
                NodeKind::Assign {
                    target: Box::new(target),
                    value: Box::new(value),
                }
            }
            TokenKind::OpAssign(op) => {
                self.skip_newlines();
                let target = self.to_target(left)?;
                let value = self.parse_expr(rbp)?;
                NodeKind::OpAssign {
                    target: Box::new(target),
                    op: op.clone(),
                    value: Box::new(value),
                }
            }
            TokenKind::Question => {
                self.skip_newlines();
                let then_body = self.parse_expr(BP_TERNARY)?;
                self.skip_newlines();
                self.expect(&TokenKind::Colon)?;
                self.skip_newlines();
                let else_body = self.parse_expr(rbp)?;
                NodeKind::If {
                    cond: Box::new(left),
                    then_body: Box::new(then_body),
                    else_body: Some(Box::new(else_body)),
                }
            }
            TokenKind::DotDot | TokenKind::DotDotDot => {
                let end = if self.can_start_value() {
                    self.parse_expr(rbp)?
                } else {
                    Node::nil(pos)
                };
                NodeKind::Range {
                    start: Box::new(left),
                    end: Box::new(end),
                    exclusive: op == &TokenKind::DotDotDot,
                }
            }
            TokenKind::OrOr => {
                let right = self.parse_expr(rbp)?;
                NodeKind::Or(Box::new(left), Box::new(right))
            }
            TokenKind::AndAnd => {
                let right = self.parse_expr(rbp)?;
                NodeKind::And(Box::new(left), Box::new(right))
            }
            TokenKind::Dot => return self.parse_method_call(left),
            TokenKind::ColonColon => match self.kind() {
                TokenKind::Constant(name) if !self.peek_is_tight_paren() => {
                    self.bump();
                    NodeKind::Const {
                        scope: Some(Box::new(left)),
                        name: name.clone(),
                    }
                }
                _ => return self.parse_method_call(left),
            },
            TokenKind::LBracket => {
                let mut args = Vec::new();
                let closed = self.with_no_do(false, |p| {
                    loop {
                        p.skip_newlines();
                        if p.at(&TokenKind::RBracket) {
                            break;
                        }
                        args.push(p.parse_expr(BP_LOWEST)?);
                        p.skip_newlines();
                        if !p.skip(&TokenKind::Comma) {
                            break;
                        }
                    }
                    p.expect(&TokenKind::RBracket)
                });
                closed?;
                NodeKind::Call(Box::new(Call {
                    recv: Some(left),
                    name: "[]".to_string(),
                    args,
                    block: None,
                    block_arg: None,
                }))
            }
            other => {
                let Some(name) = other.operator_name() else {
                    return Err(ParseError::UnexpectedToken {
                        found: describe(other),
                        pos,
                    });
                };
                self.skip_newlines();
                let right = self.parse_expr(rbp)?;
                NodeKind::Call(Box::new(Call {
                    recv: Some(left),
                    name: name.to_string(),
                    args: vec![right],
                    block: None,
                    block_arg: None,
                }))
            }
        };
        Ok(Node::new(kind, pos))
    }

    fn peek_is_tight_paren(&self) -> bool {
        self.peek()
            .is_some_and(|t| t.kind == TokenKind::LParen && !t.space_before)
    }

    /// `recv.name`, `recv.name(args)`, `recv.name args`, with optional block
    fn parse_method_call(
        &mut self,
        recv: Node,
    ) -> Result<Node, ParseError> {
        let pos = recv.pos;
        let name = match self.kind() {
            TokenKind::Identifier(n) | TokenKind::Constant(n) => {
                self.bump();
                n.clone()
            }
            // `callable.(args)`
            TokenKind::LParen => "call".to_string(),
            other => match other.operator_name() {
                Some(op) => {
                    self.bump();
                    op.to_string()
                }
                None => return Err(self.expected("method name")),
            },
        };
        let mut call = Call {
            recv: Some(recv),
            name,
            args: Vec::new(),
            block: None,
            block_arg: None,
        };
        let tight_paren = self.at(&TokenKind::LParen) && !self.space_before();
        if tight_paren || (call.name == "call" && self.at(&TokenKind::LParen)) {
            self.parse_paren_args(&mut call)?;
        } else if self.at_command_arg() {
            self.parse_command_args(&mut call)?;
        }
        self.parse_block_opt(&mut call)?;
        Ok(Node::new(NodeKind::Call(Box::new(call)), pos))
    }

    /// Turn the left side of `=` into an assignment target
    pub(super) fn to_target(
        &mut self,
        node: Node,
    ) -> Result<Target, ParseError> {
        let pos = node.pos;
        let target = match node.kind {
            NodeKind::LVar(name) => Target::LVar(name),
            NodeKind::IVar(name) => Target::IVar(name),
            NodeKind::GVar(name) => Target::GVar(name),
            NodeKind::Const { scope: None, name } => Target::Const(name),
            NodeKind::Call(call) => {
                let Call {
                    recv,
                    name,
                    args,
                    block,
                    block_arg,
                } = *call;
                if block.is_some() || block_arg.is_some() {
                    return Err(ParseError::invalid("cannot assign to a call with a block", pos));
                }
                match recv {
                    None if args.is_empty() && is_local_name(&name) => {
                        self.declare(&name);
                        Target::LVar(name)
                    }
                    Some(recv) if name == "[]" => Target::Index { recv, args },
                    Some(recv) if args.is_empty() && is_local_name(&name) => {
                        Target::Attr { recv, name }
                    }
                    _ => {
                        return Err(ParseError::invalid(
                            format!("cannot assign to '{}'", name),
                            pos,
                        ))
                    }
                }
            }
            _ => return Err(ParseError::invalid("invalid assignment target", pos)),
        };
        Ok(target)
    }
}
