//! Abstract Syntax Tree types

use crate::util::span::Position;

/// Expression node; every Ruby construct is an expression
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub pos: Position,
}

impl Node {
    pub fn new(
        kind: NodeKind,
        pos: Position,
    ) -> Self {
        Self { kind, pos }
    }

    pub fn nil(pos: Position) -> Self {
        Self::new(NodeKind::Nil, pos)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeKind {
    Nil,
    True,
    False,
    SelfRef,
    Int(i64),
    Float(f64),
    Str(String),
    /// Interpolated string
    DStr(Vec<StrPart>),
    Sym(String),
    Array(Vec<Node>),
    Hash(Vec<(Node, Node)>),
    Range {
        start: Box<Node>,
        end: Box<Node>,
        exclusive: bool,
    },

    LVar(String),
    IVar(String),
    GVar(String),
    /// `Name` or `scope::Name`
    Const {
        scope: Option<Box<Node>>,
        name: String,
    },

    /// Method call, operators included
    Call(Box<Call>),
    /// `super` with explicit arguments, or bare `super` forwarding the current ones
    Super {
        args: Option<Vec<Node>>,
        block: Option<Box<BlockNode>>,
    },
    Yield(Vec<Node>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    /// `block_given?`
    BlockGiven,

    Assign {
        target: Box<Target>,
        value: Box<Node>,
    },
    /// `a += 1`, `a ||= b`, `h[k] <<= 1`
    OpAssign {
        target: Box<Target>,
        op: String,
        value: Box<Node>,
    },
    /// `a, b = b, a`
    MultiAssign {
        targets: Vec<Target>,
        value: Box<Node>,
    },

    If {
        cond: Box<Node>,
        then_body: Box<Node>,
        else_body: Option<Box<Node>>,
    },
    /// `while`/`until`; `negate` turns it into `until`
    While {
        cond: Box<Node>,
        body: Box<Node>,
        negate: bool,
    },
    Case {
        subject: Option<Box<Node>>,
        whens: Vec<(Vec<Node>, Node)>,
        else_body: Option<Box<Node>>,
    },
    Begin(Box<BeginBlock>),
    Seq(Vec<Node>),

    Return(Option<Box<Node>>),
    Break(Option<Box<Node>>),
    Next(Option<Box<Node>>),

    Def(Box<MethodDef>),
    Class(Box<ClassDef>),
    /// `-> (x) { ... }`
    Lambda(Box<BlockNode>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrPart {
    Lit(String),
    Code(Node),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub recv: Option<Node>,
    pub name: String,
    pub args: Vec<Node>,
    pub block: Option<BlockNode>,
    /// `&blk` argument
    pub block_arg: Option<Node>,
}

/// Assignable place
#[derive(Debug, Clone, PartialEq)]
pub enum Target {
    LVar(String),
    IVar(String),
    GVar(String),
    Const(String),
    /// `recv[args] = v`
    Index { recv: Node, args: Vec<Node> },
    /// `recv.name = v`
    Attr { recv: Node, name: String },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Params {
    pub required: Vec<String>,
    pub optional: Vec<(String, Node)>,
    /// `&blk`
    pub block: Option<String>,
}

impl Params {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.required
            .iter()
            .map(String::as_str)
            .chain(self.optional.iter().map(|(n, _)| n.as_str()))
    }
}

/// Brace or do-block, and lambda literal
#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub params: Params,
    pub body: Node,
    /// Locals introduced inside the block, parameters excluded
    pub locals: Vec<String>,
    pub pos: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    pub name: String,
    /// `def self.name`
    pub singleton: bool,
    pub params: Params,
    pub body: Node,
    pub locals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDef {
    pub name: String,
    pub scope: Option<Node>,
    pub superclass: Option<Node>,
    pub body: Node,
    pub locals: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RescueClause {
    /// Exception classes; empty means StandardError
    pub classes: Vec<Node>,
    /// `=> name`
    pub var: Option<String>,
    pub body: Node,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BeginBlock {
    pub body: Node,
    pub rescues: Vec<RescueClause>,
    pub else_body: Option<Node>,
    pub ensure: Option<Node>,
}

/// Parsed compilation unit
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub body: Node,
    pub locals: Vec<String>,
}
