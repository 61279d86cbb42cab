//! Ordering, simplification, and dealiasing.
//!
//! `simplify` runs to a fixed point and maintains `forwards_topo_sort` by
//! filtering out erased blocks; it never recomputes the order. `dealias`
//! is a forward data-flow pass over the maintained order and is idempotent.

use crate::{BlockId, Cfg, Instruction, LocalRef, UIntSet};
use core_names::NameTable;

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    Processing,
    Done(u32),
}

enum Step {
    Enter(BlockId),
    Exit(BlockId),
}

/// Iterative post-order DFS from the entry block into
/// `cfg.forwards_topo_sort`. Successor order: `then` first, `else` only when
/// the exit is conditional. The work stack is explicit; block nesting depth
/// must not be able to overflow the call stack.
pub fn topo_sort(cfg: &mut Cfg) {
    debug_assert!(cfg.forwards_topo_sort.is_empty(), "topological order already computed");
    let mut state = vec![VisitState::Unvisited; cfg.max_block_id()];
    let mut order: Vec<BlockId> = Vec::with_capacity(cfg.max_block_id());
    let mut work: Vec<Step> = Vec::with_capacity(16);
    work.push(Step::Enter(BlockId::ENTRY));

    while let Some(step) = work.pop() {
        match step {
            Step::Enter(block) => {
                if state[block.index()] != VisitState::Unvisited {
                    continue;
                }
                state[block.index()] = VisitState::Processing;
                work.push(Step::Exit(block));
                let exit = &cfg.block(block).exit;
                if state[exit.then_block.index()] == VisitState::Unvisited {
                    work.push(Step::Enter(exit.then_block));
                }
                if !exit.is_unconditional() && state[exit.else_block.index()] == VisitState::Unvisited {
                    work.push(Step::Enter(exit.else_block));
                }
            }
            Step::Exit(block) => {
                debug_assert!(state[block.index()] == VisitState::Processing);
                state[block.index()] = VisitState::Done(order.len() as u32);
                order.push(block);
            }
        }
    }
    cfg.forwards_topo_sort = order;
}

/// Remove one block from the graph: erase it from its targets' back-edge
/// lists, flag it detached, and drop it from the topological order.
fn detach(cfg: &mut Cfg, block: BlockId) {
    let (then_block, else_block) = {
        let exit = &cfg.block(block).exit;
        (exit.then_block, exit.else_block)
    };
    cfg.block_mut(then_block).back_edges.retain(|b| *b != block);
    if else_block != then_block {
        cfg.block_mut(else_block).back_edges.retain(|b| *b != block);
    }
    cfg.block_mut(block).flags |= crate::BlockFlags::DETACHED;
    cfg.forwards_topo_sort.retain(|&b| b != block);
}

/// Fixed-point graph cleanup. Four rules, applied in priority order per
/// block per scan:
///
/// 1. A block nothing jumps to (other than entry and dead) is erased.
/// 2. Back edges are sorted by id and deduplicated.
/// 3. An exit whose branches alias is forced unconditional, then either the
///    whole target is inlined into this block (single predecessor, equal
///    loop depth) or an empty target's exit is lifted in (unless the target
///    is a block-call split). The equal-depth requirement prevents
///    duplicating a loop header, which would invalidate the cached
///    topological order and make loop-carried values look nilable.
/// 4. An empty branch target that jumps unconditionally onward (and not at
///    itself) is shortcut to its successor, for each branch separately.
pub fn simplify(cfg: &mut Cfg) {
    sanity_check(cfg);
    let mut changed = true;
    while changed {
        changed = false;
        for bb in cfg.block_ids() {
            if cfg.block(bb).is_detached() {
                continue;
            }
            let (then_block, else_block) = {
                let exit = &cfg.block(bb).exit;
                (exit.then_block, exit.else_block)
            };

            // Only consider removing nodes that aren't the entry or dead block.
            if bb != BlockId::DEAD && bb != BlockId::ENTRY && cfg.block(bb).back_edges.is_empty() {
                detach(cfg, bb);
                changed = true;
                sanity_check(cfg);
                continue;
            }

            {
                let edges = &mut cfg.block_mut(bb).back_edges;
                let before = edges.len();
                edges.sort_unstable();
                edges.dedup();
                // A shrunk edge list can unlock the single-predecessor
                // inlining of this block on the next scan.
                changed = changed || edges.len() != before;
            }

            if then_block == else_block {
                cfg.block_mut(bb).exit.cond = LocalRef::UNCONDITIONAL;

                let same_depth = cfg.block(then_block).outer_loops == cfg.block(bb).outer_loops;
                if then_block != BlockId::DEAD && then_block != bb && same_depth {
                    // Sole predecessor: squish the target into this block.
                    // The emptied target keeps its exit and becomes
                    // unreachable; rule 1 erases it on a later scan, which
                    // also scrubs it from its successors' back-edge lists.
                    if cfg.block(then_block).back_edges.len() == 1 {
                        let (moved, target_exit) = {
                            let target = cfg.block_mut(then_block);
                            target.back_edges.clear();
                            (std::mem::take(&mut target.bindings), target.exit.clone())
                        };
                        {
                            let block = cfg.block_mut(bb);
                            block.bindings.extend(moved);
                            block.exit = target_exit;
                        }
                        let new_then = cfg.block(bb).exit.then_block;
                        let new_else = cfg.block(bb).exit.else_block;
                        cfg.block_mut(new_then).back_edges.push(bb);
                        if new_then != new_else {
                            cfg.block_mut(new_else).back_edges.push(bb);
                        }
                        changed = true;
                        sanity_check(cfg);
                        continue;
                    }

                    // Empty target whose condition is not a block-call split:
                    // lift its exit verbatim and drop this edge.
                    let liftable = cfg.block(then_block).exit.cond != LocalRef::BLOCK_CALL
                        && cfg.block(then_block).bindings.is_empty();
                    if liftable {
                        let target_exit = cfg.block(then_block).exit.clone();
                        cfg.block_mut(then_block).back_edges.retain(|b| *b != bb);
                        cfg.block_mut(bb).exit = target_exit;
                        let new_then = cfg.block(bb).exit.then_block;
                        let new_else = cfg.block(bb).exit.else_block;
                        cfg.block_mut(new_then).back_edges.push(bb);
                        if new_then != new_else {
                            cfg.block_mut(new_else).back_edges.push(bb);
                        }
                        changed = true;
                        sanity_check(cfg);
                        continue;
                    }
                }
            }

            // Shortcut the then branch.
            let shortcut_then = then_block != BlockId::DEAD
                && cfg.block(then_block).bindings.is_empty()
                && cfg.block(then_block).exit.is_unconditional()
                && cfg.block(bb).exit.then_block != cfg.block(then_block).exit.then_block;
            if shortcut_then {
                let successor = cfg.block(then_block).exit.then_block;
                cfg.block_mut(bb).exit.then_block = successor;
                cfg.block_mut(successor).back_edges.push(bb);
                cfg.block_mut(then_block).back_edges.retain(|b| *b != bb);
                if then_block == else_block {
                    cfg.block_mut(bb).exit.else_block = successor;
                }
                changed = true;
                sanity_check(cfg);
                continue;
            }

            // Shortcut the else branch.
            let shortcut_else = else_block != BlockId::DEAD
                && cfg.block(else_block).bindings.is_empty()
                && cfg.block(else_block).exit.is_unconditional()
                && cfg.block(bb).exit.else_block != cfg.block(else_block).exit.else_block;
            if shortcut_else {
                let successor = cfg.block(else_block).exit.else_block;
                cfg.block_mut(bb).exit.else_block = successor;
                cfg.block_mut(successor).back_edges.push(bb);
                cfg.block_mut(else_block).back_edges.retain(|b| *b != bb);
                if then_block == else_block {
                    cfg.block_mut(bb).exit.then_block = successor;
                }
                changed = true;
                sanity_check(cfg);
                continue;
            }
        }
    }
}

/// Debug-only structural consistency check. Release builds compile this to
/// nothing.
pub fn sanity_check(cfg: &Cfg) {
    if !cfg!(debug_assertions) {
        return;
    }
    for block in cfg.live_blocks() {
        for &parent in &block.back_edges {
            let parent_exit = &cfg.block(parent).exit;
            assert!(
                parent_exit.then_block == block.id || parent_exit.else_block == block.id,
                "bb{}: parent bb{} is not aware of this child",
                block.id.id(),
                parent.id()
            );
        }
        if block.id == BlockId::DEAD {
            continue;
        }
        if block.id != BlockId::ENTRY {
            assert!(
                block.flags.contains(crate::BlockFlags::WAS_JUMP_DESTINATION),
                "bb{} was never linked into the graph",
                block.id.id()
            );
        }
        assert!(
            cfg.block(block.exit.then_block).back_edges.contains(&block.id),
            "bb{}: back edge unset for then target",
            block.id.id()
        );
        assert!(
            cfg.block(block.exit.else_block).back_edges.contains(&block.id),
            "bb{}: back edge unset for else target",
            block.id.id()
        );
    }
}

fn maybe_dealias(
    cfg: &Cfg,
    names: &NameTable,
    what: LocalRef,
    aliases: &ahash::AHashMap<LocalRef, LocalRef>,
) -> LocalRef {
    if what.is_synthetic_temporary(cfg, names) {
        aliases.get(&what).copied().unwrap_or(what)
    } else {
        what
    }
}

/// Rewrite reads of synthetic temporaries back to the local they copied.
///
/// This needs a separate data-flow pass (rather than happening during
/// lowering) because a receiver can be re-bound between the copy and its
/// use: `a.foo(a = "2", if ... then a = true else a = nil end)`.
///
/// Incoming aliases at a block are the intersection of every predecessor's
/// outgoing aliases; entries known on only some back edges are dropped,
/// which is deliberately conservative at loop headers.
pub fn dealias(cfg: &mut Cfg, names: &NameTable) {
    let mut out_aliases: Vec<ahash::AHashMap<LocalRef, LocalRef>> =
        vec![ahash::AHashMap::new(); cfg.max_block_id()];

    // Reverse iteration over post-order is forward topological order.
    let order: Vec<BlockId> = cfg.forwards_topo_sort.iter().rev().copied().collect();
    for bb in order {
        if bb == BlockId::DEAD {
            continue;
        }
        let mut current: ahash::AHashMap<LocalRef, LocalRef> = {
            let back_edges = &cfg.block(bb).back_edges;
            if back_edges.is_empty() {
                ahash::AHashMap::new()
            } else {
                let mut current = out_aliases[back_edges[0].index()].clone();
                for &parent in &back_edges[1..] {
                    let other = &out_aliases[parent.index()];
                    current.retain(|from, to| other.get(from).copied() == Some(*to));
                }
                current
            }
        };

        // Overapproximation of locals that appear as alias targets; avoids
        // scanning the whole map on every binding. False positives are fine.
        let mut may_have_alias = UIntSet::new(cfg.num_locals());
        for target in current.values() {
            may_have_alias.add(target.id());
        }

        let mut bindings = std::mem::take(&mut cfg.block_mut(bb).bindings);
        for binding in &mut bindings {
            if let Instruction::Ident(source) = &mut binding.value {
                *source = maybe_dealias(cfg, names, *source, &current);
            }
            if may_have_alias.contains(binding.bind.id()) {
                // Invalidate stale records pointing at the re-bound local.
                current.retain(|_, target| *target != binding.bind);
            }

            if !binding.value.is_synthetic() {
                // Dealiasing into synthetic instructions would fool
                // dead-code analysis, so those are left alone.
                match &mut binding.value {
                    Instruction::Send { recv, args, .. } => {
                        *recv = maybe_dealias(cfg, names, *recv, &current);
                        for arg in args {
                            *arg = maybe_dealias(cfg, names, *arg, &current);
                        }
                    }
                    Instruction::TAbsurd(value) | Instruction::Return(value) => {
                        *value = maybe_dealias(cfg, names, *value, &current);
                    }
                    Instruction::Intrinsic { args, .. } => {
                        for arg in args {
                            *arg = maybe_dealias(cfg, names, *arg, &current);
                        }
                    }
                    _ => {}
                }
            }

            if let Instruction::Ident(source) = binding.value {
                current.insert(binding.bind, source);
                may_have_alias.add(source.id());
            }
        }
        cfg.block_mut(bb).bindings = bindings;

        let cond = cfg.block(bb).exit.cond;
        if cond != LocalRef::UNCONDITIONAL {
            cfg.block_mut(bb).exit.cond = maybe_dealias(cfg, names, cond, &current);
        }
        out_aliases[bb.index()] = current;
    }
}

/// A block is a loop header when some predecessor sits at a strictly
/// smaller loop depth.
pub fn mark_loop_headers(cfg: &mut Cfg) {
    for bb in cfg.block_ids() {
        let is_header = cfg
            .block(bb)
            .back_edges
            .iter()
            .any(|&parent| cfg.block(parent).outer_loops < cfg.block(bb).outer_loops);
        if is_header {
            cfg.block_mut(bb).flags |= crate::BlockFlags::IS_LOOP_HEADER;
        }
    }
}
