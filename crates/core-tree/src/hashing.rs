//! Structural file hashes for the incremental-typecheck decision.
//!
//! Two digests per file:
//!
//! - `definitions` covers everything that shapes the global symbol table:
//!   class/module structure, method names and arities, parameter kinds and
//!   flags. If this digest is unchanged for every edited file, the edit only
//!   touched method bodies and inference can re-run on those files alone.
//! - `bodies` additionally covers method bodies; it changes whenever the
//!   file's analyzed content changes at all.
//!
//! The hasher is used with its deterministic default keys: digests are
//! compared across parses, and both sides must agree.

use crate::{Node, Param, Tree, Value};
use std::hash::Hasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FileHash {
    pub definitions: u64,
    pub bodies: u64,
}

impl FileHash {
    /// Fast-path compatibility: definitions unchanged, bodies free to vary.
    pub fn same_definitions(self, other: FileHash) -> bool {
        self.definitions == other.definitions
    }
}

pub fn hash_tree(tree: &Tree) -> FileHash {
    let mut defs = ahash::AHasher::default();
    let mut bodies = ahash::AHasher::default();
    walk(tree, &mut defs, &mut bodies);
    FileHash {
        definitions: defs.finish(),
        bodies: bodies.finish(),
    }
}

fn hash_params(params: &[Param], h: &mut ahash::AHasher) {
    h.write_usize(params.len());
    for p in params {
        h.write_u32(p.name.id());
        h.write_u8(match p.kind {
            crate::ParamKind::Positional => 0,
            crate::ParamKind::Default => 1,
            crate::ParamKind::Keyword => 2,
            crate::ParamKind::Rest => 3,
            crate::ParamKind::Block => 4,
        });
    }
}

fn hash_value(value: &Value, h: &mut ahash::AHasher) {
    match value {
        Value::Nil => h.write_u8(0),
        Value::True => h.write_u8(1),
        Value::False => h.write_u8(2),
        Value::Integer(i) => {
            h.write_u8(3);
            h.write_i64(*i);
        }
        Value::Float(f) => {
            h.write_u8(4);
            h.write_u64(f.to_bits());
        }
        Value::Str(s) => {
            h.write_u8(5);
            h.write(s.as_bytes());
        }
        Value::Sym(s) => {
            h.write_u8(6);
            h.write(s.as_bytes());
        }
    }
}

/// One pass, two hashers: `defs` sees structure only, `bodies` sees
/// everything `defs` sees plus method-body content.
fn walk(tree: &Tree, defs: &mut ahash::AHasher, bodies: &mut ahash::AHasher) {
    match &tree.node {
        Node::ClassDef {
            name,
            is_module,
            superclass,
            body,
        } => {
            for h in [&mut *defs, &mut *bodies] {
                h.write_u8(1);
                h.write_u32(name.id());
                h.write_u8(*is_module as u8);
                h.write_u32(superclass.map_or(0, |s| s.id()));
            }
            for member in body {
                walk(member, defs, bodies);
            }
        }
        Node::MethodDef {
            name,
            self_method,
            params,
            body,
            rewriter_synthesized,
        } => {
            for h in [&mut *defs, &mut *bodies] {
                h.write_u8(2);
                h.write_u32(name.id());
                h.write_u8(*self_method as u8);
                h.write_u8(*rewriter_synthesized as u8);
                hash_params(params, h);
            }
            // The body feeds only the body digest.
            hash_body(body, bodies);
        }
        // Top-level code outside any method is body content too, but it can
        // also introduce definitions through sends the rewriters expand, so
        // it conservatively feeds both digests.
        other_node => {
            hash_node_structure(other_node, defs);
            hash_body(tree, bodies);
        }
    }
}

fn hash_node_structure(node: &Node, h: &mut ahash::AHasher) {
    h.write_u8(discriminant_tag(node));
    if let Node::Send { fun, args, .. } = node {
        h.write_u32(fun.id());
        h.write_usize(args.len());
    }
}

fn hash_body(tree: &Tree, h: &mut ahash::AHasher) {
    h.write_u8(discriminant_tag(&tree.node));
    match &tree.node {
        Node::EmptyTree | Node::SelfRef | Node::Next | Node::Break | Node::Retry => {}
        Node::ClassDef { body, .. } => {
            for member in body {
                hash_body(member, h);
            }
        }
        Node::MethodDef { name, params, body, .. } => {
            h.write_u32(name.id());
            hash_params(params, h);
            hash_body(body, h);
        }
        Node::Send {
            recv, fun, args, block, ..
        } => {
            h.write_u32(fun.id());
            hash_body(recv, h);
            for arg in args {
                hash_body(arg, h);
            }
            if let Some(block) = block {
                hash_params(&block.params, h);
                hash_body(&block.body, h);
            }
        }
        Node::Local { name } | Node::Field { name } | Node::ConstantRef { name } => {
            h.write_u32(name.id());
        }
        Node::Assign { lhs, rhs } => {
            hash_body(lhs, h);
            hash_body(rhs, h);
        }
        Node::Literal(value) => hash_value(value, h),
        Node::ArrayLit(items) => {
            h.write_usize(items.len());
            for item in items {
                hash_body(item, h);
            }
        }
        Node::HashLit(pairs) => {
            h.write_usize(pairs.len());
            for (k, v) in pairs {
                hash_body(k, h);
                hash_body(v, h);
            }
        }
        Node::If {
            cond,
            then_branch,
            else_branch,
        } => {
            hash_body(cond, h);
            hash_body(then_branch, h);
            hash_body(else_branch, h);
        }
        Node::While { cond, body } => {
            hash_body(cond, h);
            hash_body(body, h);
        }
        Node::Return { expr } => {
            if let Some(expr) = expr {
                hash_body(expr, h);
            }
        }
        Node::Rescue {
            body,
            cases,
            else_branch,
            ensure,
        } => {
            hash_body(body, h);
            h.write_usize(cases.len());
            for case in cases {
                for ex in &case.exceptions {
                    hash_body(ex, h);
                }
                h.write_u32(case.var.map_or(0, |v| v.id()));
                hash_body(&case.body, h);
            }
            hash_body(else_branch, h);
            hash_body(ensure, h);
        }
        Node::InsSeq { stats, expr } => {
            for stat in stats {
                hash_body(stat, h);
            }
            hash_body(expr, h);
        }
    }
}

fn discriminant_tag(node: &Node) -> u8 {
    match node {
        Node::EmptyTree => 0,
        Node::ClassDef { .. } => 1,
        Node::MethodDef { .. } => 2,
        Node::Send { .. } => 3,
        Node::SelfRef => 4,
        Node::Local { .. } => 5,
        Node::Field { .. } => 6,
        Node::ConstantRef { .. } => 7,
        Node::Assign { .. } => 8,
        Node::Literal(_) => 9,
        Node::ArrayLit(_) => 10,
        Node::HashLit(_) => 11,
        Node::If { .. } => 12,
        Node::While { .. } => 13,
        Node::Return { .. } => 14,
        Node::Next => 15,
        Node::Break => 16,
        Node::Retry => 17,
        Node::Rescue { .. } => 18,
        Node::InsSeq { .. } => 19,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::make;
    use core_loc::LocOffsets;
    use core_names::NameTable;

    fn loc(b: u32, e: u32) -> LocOffsets {
        LocOffsets::new(b, e)
    }

    #[test]
    fn body_edit_keeps_definition_hash() {
        let mut names = NameTable::new();
        let m = names.enter_utf8("compute").unwrap();

        let before = make::root(vec![make::method_def(
            loc(0, 20),
            m,
            vec![],
            make::int(loc(10, 11), 1),
        )]);
        let after = make::root(vec![make::method_def(
            loc(0, 20),
            m,
            vec![],
            make::int(loc(10, 11), 2),
        )]);

        let h1 = hash_tree(&before);
        let h2 = hash_tree(&after);
        assert!(h1.same_definitions(h2));
        assert_ne!(h1.bodies, h2.bodies);
    }

    #[test]
    fn arity_change_breaks_definition_hash() {
        let mut names = NameTable::new();
        let m = names.enter_utf8("compute").unwrap();
        let x = names.enter_utf8("x").unwrap();

        let before = make::root(vec![make::method_def(loc(0, 20), m, vec![], Tree::empty())]);
        let after = make::root(vec![make::method_def(
            loc(0, 20),
            m,
            vec![make::param(loc(5, 6), x)],
            Tree::empty(),
        )]);

        assert!(!hash_tree(&before).same_definitions(hash_tree(&after)));
    }

    #[test]
    fn new_method_breaks_definition_hash() {
        let mut names = NameTable::new();
        let m = names.enter_utf8("compute").unwrap();
        let before = make::root(vec![]);
        let after = make::root(vec![make::method_def(loc(0, 20), m, vec![], Tree::empty())]);
        assert!(!hash_tree(&before).same_definitions(hash_tree(&after)));
    }

    #[test]
    fn hashing_is_deterministic() {
        let tree = make::root(vec![]);
        assert_eq!(hash_tree(&tree), hash_tree(&tree));
    }
}
