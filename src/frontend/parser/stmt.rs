//! Statement parsing and keyword constructs

use super::ast::*;
use super::state::*;
use super::ParseError;
use crate::frontend::lexer::tokens::*;
use crate::util::span::Position;

/// Collapse a statement list into one node
pub(super) fn seq(
    mut stmts: Vec<Node>,
    pos: Position,
) -> Node {
    match stmts.len() {
        0 => Node::nil(pos),
        1 => stmts.remove(0),
        _ => Node::new(NodeKind::Seq(stmts), pos),
    }
}

impl<'a> ParserState<'a> {
    /// Tokens that close a statement list
    fn at_block_end(&self) -> bool {
        matches!(
            self.kind(),
            TokenKind::Eof
                | TokenKind::KwEnd
                | TokenKind::KwElse
                | TokenKind::KwElsif
                | TokenKind::KwWhen
                | TokenKind::KwRescue
                | TokenKind::KwEnsure
                | TokenKind::RBrace
                | TokenKind::RParen
        )
    }

    /// Parse statements up to the end of the enclosing construct
    pub fn parse_stmts(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        let mut stmts = Vec::new();
        self.skip_terms();
        while !self.at_block_end() {
            stmts.push(self.parse_stmt()?);
            if !self.at_term() && !self.at_block_end() {
                return Err(self.unexpected());
            }
            self.skip_terms();
        }
        Ok(seq(stmts, pos))
    }

    /// Statement with trailing `if`/`unless`/`while`/`until`/`rescue` modifiers
    pub fn parse_stmt(&mut self) -> Result<Node, ParseError> {
        let mut node = self.parse_expr_stmt()?;
        loop {
            let pos = node.pos;
            node = match self.kind() {
                TokenKind::KwIf => {
                    self.bump();
                    let cond = self.parse_expr_stmt()?;
                    Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_body: Box::new(node),
                            else_body: None,
                        },
                        pos,
                    )
                }
                TokenKind::KwUnless => {
                    self.bump();
                    let cond = self.parse_expr_stmt()?;
                    Node::new(
                        NodeKind::If {
                            cond: Box::new(cond),
                            then_body: Box::new(Node::nil(pos)),
                            else_body: Some(Box::new(node)),
                        },
                        pos,
                    )
                }
                TokenKind::KwWhile | TokenKind::KwUntil => {
                    let negate = self.at(&TokenKind::KwUntil);
                    self.bump();
                    let cond = self.parse_expr_stmt()?;
                    Node::new(
                        NodeKind::While {
                            cond: Box::new(cond),
                            body: Box::new(node),
                            negate,
                        },
                        pos,
                    )
                }
                TokenKind::KwRescue => {
                    self.bump();
                    let fallback = self.parse_expr_stmt()?;
                    Node::new(
                        NodeKind::Begin(Box::new(BeginBlock {
                            body: node,
                            rescues: vec![RescueClause {
                                classes: Vec::new(),
                                var: None,
                                body: fallback,
                            }],
                            else_body: None,
                            ensure: None,
                        })),
                        pos,
                    )
                }
                _ => break,
            };
        }
        Ok(node)
    }

    /// Expression joined by the low precedence `and`/`or`
    pub fn parse_expr_stmt(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_not_expr()?;
        loop {
            let pos = left.pos;
            let is_and = match self.kind() {
                TokenKind::KwAnd => true,
                TokenKind::KwOr => false,
                _ => break,
            };
            self.bump();
            self.skip_newlines();
            let right = self.parse_not_expr()?;
            let kind = if is_and {
                NodeKind::And(Box::new(left), Box::new(right))
            } else {
                NodeKind::Or(Box::new(left), Box::new(right))
            };
            left = Node::new(kind, pos);
        }
        Ok(left)
    }

    fn parse_not_expr(&mut self) -> Result<Node, ParseError> {
        if self.at(&TokenKind::KwNot) {
            let pos = self.position();
            self.bump();
            let operand = self.parse_not_expr()?;
            return Ok(Node::new(NodeKind::Not(Box::new(operand)), pos));
        }
        if let Some(node) = self.try_multi_assign()? {
            return Ok(node);
        }
        self.parse_expr(BP_LOWEST)
    }

    /// `a, b = 1, 2`
    fn try_multi_assign(&mut self) -> Result<Option<Node>, ParseError> {
        let starts = matches!(
            self.kind(),
            TokenKind::Identifier(_) | TokenKind::IVar(_) | TokenKind::GVar(_)
        ) && self.peek_kind() == &TokenKind::Comma;
        if !starts {
            return Ok(None);
        }
        let pos = self.position();
        let mut targets = Vec::new();
        loop {
            let node = self.parse_expr(BP_ASSIGN)?;
            targets.push(self.to_target(node)?);
            if !self.skip(&TokenKind::Comma) {
                break;
            }
        }
        self.expect(&TokenKind::Assign)?;
        let mut values = vec![self.parse_expr(BP_LOWEST)?];
        while self.skip(&TokenKind::Comma) {
            values.push(self.parse_expr(BP_LOWEST)?);
        }
        let value = if values.len() == 1 {
            values.remove(0)
        } else {
            Node::new(NodeKind::Array(values), pos)
        };
        Ok(Some(Node::new(
            NodeKind::MultiAssign {
                targets,
                value: Box::new(value),
            },
            pos,
        )))
    }

    /// Optional `then` after a condition
    fn skip_then(&mut self) {
        self.skip_terms();
        if self.skip(&TokenKind::KwThen) {
            self.skip_terms();
        }
    }

    /// `if`/`unless` ... `end`
    pub(super) fn parse_if(
        &mut self,
        negate: bool,
    ) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let cond = self.with_no_do(false, |p| p.parse_expr_stmt())?;
        self.skip_then();
        let body = self.parse_stmts()?;
        let node = if negate {
            let else_body = if self.skip(&TokenKind::KwElse) {
                self.parse_stmts()?
            } else {
                Node::nil(pos)
            };
            NodeKind::If {
                cond: Box::new(cond),
                then_body: Box::new(else_body),
                else_body: Some(Box::new(body)),
            }
        } else {
            NodeKind::If {
                cond: Box::new(cond),
                then_body: Box::new(body),
                else_body: self.parse_if_tail()?.map(Box::new),
            }
        };
        self.expect(&TokenKind::KwEnd)?;
        Ok(Node::new(node, pos))
    }

    fn parse_if_tail(&mut self) -> Result<Option<Node>, ParseError> {
        let pos = self.position();
        if self.skip(&TokenKind::KwElsif) {
            let cond = self.parse_expr_stmt()?;
            self.skip_then();
            let body = self.parse_stmts()?;
            let else_body = self.parse_if_tail()?;
            return Ok(Some(Node::new(
                NodeKind::If {
                    cond: Box::new(cond),
                    then_body: Box::new(body),
                    else_body: else_body.map(Box::new),
                },
                pos,
            )));
        }
        if self.skip(&TokenKind::KwElse) {
            return Ok(Some(self.parse_stmts()?));
        }
        Ok(None)
    }

    /// `while`/`until` ... `end`
    pub(super) fn parse_while(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        let negate = self.at(&TokenKind::KwUntil);
        self.bump();
        let cond = self.with_no_do(true, |p| p.parse_expr_stmt())?;
        self.skip_terms();
        self.skip(&TokenKind::KwDo);
        let body = self.with_no_do(false, |p| p.parse_stmts())?;
        self.expect(&TokenKind::KwEnd)?;
        Ok(Node::new(
            NodeKind::While {
                cond: Box::new(cond),
                body: Box::new(body),
                negate,
            },
            pos,
        ))
    }

    /// `case [subject] when ... end`
    pub(super) fn parse_case(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let subject = if self.at_term() {
            None
        } else {
            Some(Box::new(self.parse_expr_stmt()?))
        };
        self.skip_terms();
        let mut whens = Vec::new();
        while self.skip(&TokenKind::KwWhen) {
            let mut values = vec![self.parse_expr(BP_LOWEST)?];
            while self.skip(&TokenKind::Comma) {
                self.skip_newlines();
                values.push(self.parse_expr(BP_LOWEST)?);
            }
            self.skip_then();
            let body = self.parse_stmts()?;
            whens.push((values, body));
        }
        if whens.is_empty() {
            return Err(self.expected("'when'"));
        }
        let else_body = if self.skip(&TokenKind::KwElse) {
            Some(Box::new(self.parse_stmts()?))
        } else {
            None
        };
        self.expect(&TokenKind::KwEnd)?;
        Ok(Node::new(
            NodeKind::Case {
                subject,
                whens,
                else_body,
            },
            pos,
        ))
    }

    /// `begin ... end`
    pub(super) fn parse_begin(&mut self) -> Result<Node, ParseError> {
        self.bump();
        let body = self.with_no_do(false, |p| p.parse_body_with_rescue())?;
        self.expect(&TokenKind::KwEnd)?;
        Ok(body)
    }

    /// Statements optionally followed by `rescue`/`else`/`ensure` clauses
    pub(super) fn parse_body_with_rescue(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        let body = self.parse_stmts()?;
        if !matches!(self.kind(), TokenKind::KwRescue | TokenKind::KwEnsure) {
            return Ok(body);
        }

        let mut rescues = Vec::new();
        while self.at(&TokenKind::KwRescue) {
            self.bump();
            let mut classes = Vec::new();
            if !self.at_term() && !self.at(&TokenKind::FatArrow) && !self.at(&TokenKind::KwThen) {
                loop {
                    classes.push(self.parse_expr(BP_TERNARY)?);
                    if !self.skip(&TokenKind::Comma) {
                        break;
                    }
                    self.skip_newlines();
                }
            }
            let mut var = None;
            if self.skip(&TokenKind::FatArrow) {
                match self.kind() {
                    TokenKind::Identifier(name) => {
                        self.declare(name);
                        var = Some(name.clone());
                        self.bump();
                    }
                    _ => return Err(self.expected("variable name")),
                }
            }
            self.skip_then();
            let body = self.parse_stmts()?;
            rescues.push(RescueClause { classes, var, body });
        }

        let else_body = if !rescues.is_empty() && self.skip(&TokenKind::KwElse) {
            Some(self.parse_stmts()?)
        } else {
            None
        };
        let ensure = if self.skip(&TokenKind::KwEnsure) {
            Some(self.parse_stmts()?)
        } else {
            None
        };
        Ok(Node::new(
            NodeKind::Begin(Box::new(BeginBlock {
                body,
                rescues,
                else_body,
                ensure,
            })),
            pos,
        ))
    }

    /// Parameter list up to (not including) the closing token
    pub(super) fn parse_params(
        &mut self,
        default_bp: u8,
        multiline: bool,
    ) -> Result<Params, ParseError> {
        let mut params = Params::default();
        loop {
            if multiline {
                self.skip_newlines();
            }
            let pos = self.position();
            match self.kind() {
                TokenKind::Identifier(name) => {
                    let name = name.clone();
                    self.bump();
                    if params.block.is_some() {
                        return Err(ParseError::invalid("block parameter must be last", pos));
                    }
                    if params.names().any(|n| n == name) {
                        return Err(ParseError::invalid(
                            format!("duplicated argument name '{}'", name),
                            pos,
                        ));
                    }
                    self.declare_param(&name);
                    if self.skip(&TokenKind::Assign) {
                        let default = self.parse_expr(default_bp)?;
                        params.optional.push((name, default));
                    } else if !params.optional.is_empty() {
                        return Err(ParseError::invalid(
                            "required parameter after optional ones is not supported",
                            pos,
                        ));
                    } else {
                        params.required.push(name);
                    }
                }
                TokenKind::Amp => {
                    self.bump();
                    let TokenKind::Identifier(name) = self.kind() else {
                        return Err(self.expected("block parameter name"));
                    };
                    self.declare_param(name);
                    params.block = Some(name.clone());
                    self.bump();
                }
                TokenKind::Star | TokenKind::StarStar => {
                    return Err(ParseError::invalid("splat parameters are not supported", pos));
                }
                _ => break,
            }
            if !self.skip(&TokenKind::Comma) {
                break;
            }
        }
        if multiline {
            self.skip_newlines();
        }
        Ok(params)
    }

    /// Declare a parameter in the innermost scope, shadowing outer locals
    pub(super) fn declare_param(
        &mut self,
        name: &str,
    ) {
        if let Some(scope) = self.scopes.last_mut() {
            if !scope.vars.iter().any(|v| v == name) {
                scope.vars.push(name.to_string());
            }
        }
    }

    fn parse_def_name(&mut self) -> Result<(bool, String), ParseError> {
        let mut singleton = false;
        if self.at(&TokenKind::KwSelf) && self.peek_kind() == &TokenKind::Dot {
            self.bump();
            self.bump();
            singleton = true;
        }
        let kind = self.kind();
        let name = match kind {
            TokenKind::Identifier(n) | TokenKind::Constant(n) => {
                let mut name = n.clone();
                self.bump();
                // setter: `def value=(v)`
                if self.at(&TokenKind::Assign) && !self.space_before() {
                    self.bump();
                    name.push('=');
                }
                name
            }
            TokenKind::LBracket => {
                self.bump();
                self.expect(&TokenKind::RBracket)?;
                if self.at(&TokenKind::Assign) && !self.space_before() {
                    self.bump();
                    "[]=".to_string()
                } else {
                    "[]".to_string()
                }
            }
            other => match other.operator_name() {
                Some(op) => {
                    self.bump();
                    op.to_string()
                }
                None => return Err(self.expected("method name")),
            },
        };
        Ok((singleton, name))
    }

    /// `def name(params) ... end`
    pub(super) fn parse_def(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        let (singleton, name) = self.parse_def_name()?;

        self.push_scope(true);
        let result = self.with_no_do(false, |p| {
            let params = if p.skip(&TokenKind::LParen) {
                let params = p.parse_params(BP_ASSIGN, true)?;
                p.expect(&TokenKind::RParen)?;
                params
            } else {
                p.parse_params(BP_ASSIGN, false)?
            };
            let body = p.parse_body_with_rescue()?;
            p.expect(&TokenKind::KwEnd)?;
            Ok::<_, ParseError>((params, body))
        });
        let vars = self.pop_scope();
        let (params, body) = result?;
        let locals = local_names(vars, &params);
        Ok(Node::new(
            NodeKind::Def(Box::new(MethodDef {
                name,
                singleton,
                params,
                body,
                locals,
            })),
            pos,
        ))
    }

    /// `class Name [< Super] ... end`
    pub(super) fn parse_class(&mut self) -> Result<Node, ParseError> {
        let pos = self.position();
        self.bump();
        if self.at(&TokenKind::Shl) {
            return Err(ParseError::invalid("singleton class bodies are not supported", pos));
        }
        let TokenKind::Constant(first) = self.kind() else {
            return Err(self.expected("class name"));
        };
        let mut name = first.clone();
        let mut scope: Option<Node> = None;
        self.bump();
        while self.skip(&TokenKind::ColonColon) {
            let TokenKind::Constant(next) = self.kind() else {
                return Err(self.expected("class name"));
            };
            let outer = Node::new(
                NodeKind::Const {
                    scope: scope.map(Box::new),
                    name,
                },
                pos,
            );
            scope = Some(outer);
            name = next.clone();
            self.bump();
        }
        let superclass = if self.skip(&TokenKind::Lt) {
            Some(self.parse_expr(BP_LOWEST)?)
        } else {
            None
        };

        self.push_scope(true);
        let body = self.with_no_do(false, |p| {
            let body = p.parse_stmts()?;
            p.expect(&TokenKind::KwEnd)?;
            Ok::<_, ParseError>(body)
        });
        let locals = self.pop_scope();
        Ok(Node::new(
            NodeKind::Class(Box::new(ClassDef {
                name,
                scope,
                superclass,
                body: body?,
                locals,
            })),
            pos,
        ))
    }
}

/// Scope variables that are not parameters
pub(super) fn local_names(
    vars: Vec<String>,
    params: &Params,
) -> Vec<String> {
    vars.into_iter()
        .filter(|v| !params.names().any(|p| p == v) && params.block.as_deref() != Some(v))
        .collect()
}
