//! The desugared expression tree.
//!
//! This is the uniform representation every later phase consumes: the parser
//! (an external collaborator behind the [`Parser`] trait) produces it, the
//! namer walks it to enter symbols, and the CFG builder lowers method bodies
//! out of it. Nodes exclusively own their children; trees are moved between
//! phases, never shared.
//!
//! Every node carries a [`LocOffsets`] relative to the file the tree was
//! parsed from; the file itself travels alongside the tree, not inside it.

pub mod hashing;
pub mod make;
pub mod parser;

pub use hashing::FileHash;
pub use parser::{NullParser, ParseDiagnostic, ParseResult, Parser};

use core_loc::LocOffsets;
use core_names::NameRef;

#[derive(Debug, Clone, PartialEq)]
pub struct Tree {
    pub loc: LocOffsets,
    pub node: Node,
}

impl Tree {
    pub fn new(loc: LocOffsets, node: Node) -> Self {
        Tree { loc, node }
    }

    pub fn empty() -> Self {
        Tree::new(LocOffsets::none(), Node::EmptyTree)
    }

    pub fn is_empty_node(&self) -> bool {
        matches!(self.node, Node::EmptyTree)
    }
}

/// A formal parameter of a method or block.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub loc: LocOffsets,
    pub name: NameRef,
    pub kind: ParamKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Positional,
    Default,
    Keyword,
    Rest,
    Block,
}

/// A literal value. Strings and symbols stay as source text; the tree does
/// not intern them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    True,
    False,
    Integer(i64),
    Float(f64),
    Str(String),
    Sym(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RescueCase {
    pub loc: LocOffsets,
    /// Exception class expressions; empty means the default `StandardError`.
    pub exceptions: Vec<Tree>,
    /// Binding for the caught exception, when the source names one.
    pub var: Option<NameRef>,
    pub body: Tree,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockNode {
    pub loc: LocOffsets,
    pub params: Vec<Param>,
    pub body: Tree,
}

/// The tagged node variant. Control-flow constructs the desugarer reduces
/// (`&&`, `||`, ternaries, `unless`, `until`) arrive here as `If`/`While`.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    EmptyTree,
    ClassDef {
        name: NameRef,
        is_module: bool,
        superclass: Option<NameRef>,
        body: Vec<Tree>,
    },
    MethodDef {
        name: NameRef,
        self_method: bool,
        params: Vec<Param>,
        body: Box<Tree>,
        /// Synthesized by a rewriter pass, not written in source.
        rewriter_synthesized: bool,
    },
    Send {
        recv: Box<Tree>,
        fun: NameRef,
        args: Vec<Tree>,
        block: Option<Box<BlockNode>>,
        rewriter_synthesized: bool,
    },
    /// The receiver-less `self`.
    SelfRef,
    Local {
        name: NameRef,
    },
    /// An instance or class field reference (`@x`).
    Field {
        name: NameRef,
    },
    ConstantRef {
        name: NameRef,
    },
    Assign {
        lhs: Box<Tree>,
        rhs: Box<Tree>,
    },
    Literal(Value),
    ArrayLit(Vec<Tree>),
    HashLit(Vec<(Tree, Tree)>),
    If {
        cond: Box<Tree>,
        then_branch: Box<Tree>,
        else_branch: Box<Tree>,
    },
    While {
        cond: Box<Tree>,
        body: Box<Tree>,
    },
    Return {
        expr: Option<Box<Tree>>,
    },
    Next,
    Break,
    Retry,
    Rescue {
        body: Box<Tree>,
        cases: Vec<RescueCase>,
        else_branch: Box<Tree>,
        ensure: Box<Tree>,
    },
    /// A statement sequence whose value is the final expression.
    InsSeq {
        stats: Vec<Tree>,
        expr: Box<Tree>,
    },
}
