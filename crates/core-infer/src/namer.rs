//! Definition indexing: walk a file's tree and enter every class, module,
//! and method into the global symbol table.
//!
//! Runs while the tables are unfrozen, single-threaded per file (parallelism
//! comes from sharding files across workers with per-worker results merged
//! upstream). Re-entering an existing definition widens it rather than
//! duplicating, so re-indexing an edited file is idempotent.

use core_loc::{FileRef, Loc};
use core_names::{ArgFlags, ArgInfo, SymbolFlags, SymbolRef, well_known_syms};
use core_state::GlobalState;
use core_tree::{Node, ParamKind, Tree};

pub fn enter_definitions(gs: &mut GlobalState, file: FileRef, tree: &Tree) {
    walk(gs, file, well_known_syms::ROOT, tree);
}

fn walk(gs: &mut GlobalState, file: FileRef, owner: SymbolRef, tree: &Tree) {
    match &tree.node {
        Node::ClassDef {
            name,
            is_module,
            superclass,
            body,
        } => {
            // The root wrapper re-enters the root symbol; its body belongs
            // to the root owner itself.
            let class = if *name == core_names::well_known::ROOT {
                well_known_syms::ROOT
            } else {
                let flags = if *is_module {
                    SymbolFlags::MODULE
                } else {
                    SymbolFlags::CLASS
                };
                let Ok(class) = gs.symbols.enter_symbol(owner, *name, flags) else {
                    return;
                };
                let _ = gs.symbols.add_loc(class, Loc::new(file, tree.loc));
                if !*is_module {
                    let superclass_sym = superclass
                        .and_then(|s| gs.symbols.lookup(well_known_syms::ROOT, s))
                        .unwrap_or(well_known_syms::OBJECT);
                    let _ = gs.symbols.set_super_class(class, superclass_sym);
                }
                class
            };
            for member in body {
                walk(gs, file, class, member);
            }
        }
        Node::MethodDef {
            name,
            params,
            body: _,
            rewriter_synthesized,
            ..
        } => {
            let mut flags = SymbolFlags::METHOD;
            if *rewriter_synthesized {
                flags |= SymbolFlags::REWRITER_SYNTHESIZED;
            }
            let Ok(method) = gs.symbols.enter_symbol(owner, *name, flags) else {
                return;
            };
            let _ = gs.symbols.add_loc(method, Loc::new(file, tree.loc));
            if gs.symbols.symbol(method).arguments.is_empty() {
                for param in params {
                    let mut arg_flags = ArgFlags::empty();
                    match param.kind {
                        ParamKind::Positional => {}
                        ParamKind::Default => arg_flags |= ArgFlags::DEFAULT,
                        ParamKind::Keyword => arg_flags |= ArgFlags::KEYWORD,
                        ParamKind::Rest => arg_flags |= ArgFlags::REPEATED,
                        ParamKind::Block => arg_flags |= ArgFlags::BLOCK,
                    }
                    let _ = gs.symbols.add_argument(
                        method,
                        ArgInfo {
                            name: param.name,
                            flags: arg_flags,
                            ty: None,
                        },
                    );
                }
                let _ = gs.symbols.seal_arguments(method);
            }
        }
        Node::InsSeq { stats, expr } => {
            for stat in stats {
                walk(gs, file, owner, stat);
            }
            walk(gs, file, owner, expr);
        }
        // Definitions cannot hide inside other expression kinds once the
        // desugarer has run.
        _ => {}
    }
}

/// Every method definition in `tree`, paired with its owner, in source
/// order. The CFG/inference driver iterates this.
pub fn method_defs<'a>(gs: &GlobalState, tree: &'a Tree) -> Vec<(SymbolRef, &'a Tree)> {
    let mut out = Vec::new();
    collect(gs, well_known_syms::ROOT, tree, &mut out);
    out
}

fn collect<'a>(gs: &GlobalState, owner: SymbolRef, tree: &'a Tree, out: &mut Vec<(SymbolRef, &'a Tree)>) {
    match &tree.node {
        Node::ClassDef { name, body, .. } => {
            let class = if *name == core_names::well_known::ROOT {
                well_known_syms::ROOT
            } else {
                match gs.symbols.lookup(owner, *name) {
                    Some(class) => class,
                    None => return,
                }
            };
            for member in body {
                collect(gs, class, member, out);
            }
        }
        Node::MethodDef { name, .. } => {
            if let Some(method) = gs.symbols.lookup(owner, *name) {
                out.push((method, tree));
            }
        }
        Node::InsSeq { stats, expr } => {
            for stat in stats {
                collect(gs, owner, stat, out);
            }
            collect(gs, owner, expr, out);
        }
        _ => {}
    }
}
