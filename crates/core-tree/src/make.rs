//! Tree constructors, used by the namer/CFG test suites and by rewriter-style
//! code that synthesizes nodes.

use crate::{BlockNode, Node, Param, ParamKind, Tree, Value};
use core_loc::LocOffsets;
use core_names::NameRef;

pub fn empty() -> Tree {
    Tree::empty()
}

pub fn literal(loc: LocOffsets, value: Value) -> Tree {
    Tree::new(loc, Node::Literal(value))
}

pub fn int(loc: LocOffsets, value: i64) -> Tree {
    literal(loc, Value::Integer(value))
}

pub fn nil(loc: LocOffsets) -> Tree {
    literal(loc, Value::Nil)
}

pub fn self_ref(loc: LocOffsets) -> Tree {
    Tree::new(loc, Node::SelfRef)
}

pub fn local(loc: LocOffsets, name: NameRef) -> Tree {
    Tree::new(loc, Node::Local { name })
}

pub fn assign(loc: LocOffsets, lhs: Tree, rhs: Tree) -> Tree {
    Tree::new(
        loc,
        Node::Assign {
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        },
    )
}

pub fn assign_local(loc: LocOffsets, name: NameRef, rhs: Tree) -> Tree {
    assign(loc, local(loc, name), rhs)
}

pub fn send(loc: LocOffsets, recv: Tree, fun: NameRef, args: Vec<Tree>) -> Tree {
    Tree::new(
        loc,
        Node::Send {
            recv: Box::new(recv),
            fun,
            args,
            block: None,
            rewriter_synthesized: false,
        },
    )
}

pub fn send_with_block(
    loc: LocOffsets,
    recv: Tree,
    fun: NameRef,
    args: Vec<Tree>,
    params: Vec<Param>,
    body: Tree,
) -> Tree {
    Tree::new(
        loc,
        Node::Send {
            recv: Box::new(recv),
            fun,
            args,
            block: Some(Box::new(BlockNode {
                loc: body.loc,
                params,
                body,
            })),
            rewriter_synthesized: false,
        },
    )
}

pub fn if_(loc: LocOffsets, cond: Tree, then_branch: Tree, else_branch: Tree) -> Tree {
    Tree::new(
        loc,
        Node::If {
            cond: Box::new(cond),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        },
    )
}

pub fn while_(loc: LocOffsets, cond: Tree, body: Tree) -> Tree {
    Tree::new(
        loc,
        Node::While {
            cond: Box::new(cond),
            body: Box::new(body),
        },
    )
}

pub fn return_(loc: LocOffsets, expr: Option<Tree>) -> Tree {
    Tree::new(
        loc,
        Node::Return {
            expr: expr.map(Box::new),
        },
    )
}

pub fn ins_seq(loc: LocOffsets, stats: Vec<Tree>, expr: Tree) -> Tree {
    Tree::new(
        loc,
        Node::InsSeq {
            stats,
            expr: Box::new(expr),
        },
    )
}

pub fn param(loc: LocOffsets, name: NameRef) -> Param {
    Param {
        loc,
        name,
        kind: ParamKind::Positional,
    }
}

pub fn method_def(loc: LocOffsets, name: NameRef, params: Vec<Param>, body: Tree) -> Tree {
    Tree::new(
        loc,
        Node::MethodDef {
            name,
            self_method: false,
            params,
            body: Box::new(body),
            rewriter_synthesized: false,
        },
    )
}

pub fn class_def(loc: LocOffsets, name: NameRef, superclass: Option<NameRef>, body: Vec<Tree>) -> Tree {
    Tree::new(
        loc,
        Node::ClassDef {
            name,
            is_module: false,
            superclass,
            body,
        },
    )
}

/// The root wrapper every parsed file reduces to: a class def for the root
/// object whose body is the file's top-level statements.
pub fn root(body: Vec<Tree>) -> Tree {
    class_def(LocOffsets::new(0, 0), core_names::well_known::ROOT, None, body)
}
