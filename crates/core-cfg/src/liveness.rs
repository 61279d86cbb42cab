//! Per-block read/write analysis and everything derived from it: loop
//! statistics, block-argument synthesis, and dead-store elimination.

use crate::{BlockId, Cfg, UIntSet};

/// Three sets per block, indexed by block id over the whole arena:
///
/// - `reads`: locals read anywhere in the block;
/// - `writes`: locals ever written in the block;
/// - `dead`: locals written with no *prior* read in the block. Dead locals
///   are not live on entry and can be pruned from the live-in
///   approximation; combined with `reads` they also drive dead-store
///   elimination.
#[derive(Debug)]
pub struct ReadsAndWrites {
    pub reads: Vec<UIntSet>,
    pub writes: Vec<UIntSet>,
    pub dead: Vec<UIntSet>,
}

impl ReadsAndWrites {
    pub fn compute(cfg: &Cfg) -> Self {
        let num_locals = cfg.num_locals();
        let mut reads = Vec::with_capacity(cfg.max_block_id());
        let mut writes = Vec::with_capacity(cfg.max_block_id());
        let mut dead = Vec::with_capacity(cfg.max_block_id());
        for _ in 0..cfg.max_block_id() {
            reads.push(UIntSet::new(num_locals));
            writes.push(UIntSet::new(num_locals));
            dead.push(UIntSet::new(num_locals));
        }

        for block in cfg.live_blocks() {
            let id = block.id.index();
            for binding in &block.bindings {
                binding.value.for_each_read(|local| reads[id].add(local.id()));
                writes[id].add(binding.bind.id());
                if !reads[id].contains(binding.bind.id()) {
                    dead[id].add(binding.bind.id());
                }
            }
            let cond = block.exit.cond;
            if !cond.is_sentinel() {
                reads[id].add(cond.id());
            }
        }
        ReadsAndWrites { reads, writes, dead }
    }
}

/// Fill `cfg.min_loops` and `cfg.max_loop_write`: the smallest loop depth at
/// which each local is touched, and the largest depth at which it is
/// written. Both feed the pinning rules in block-argument synthesis and
/// inference.
pub fn compute_min_max_loops(cfg: &mut Cfg, rnw: &ReadsAndWrites) {
    let num_locals = cfg.num_locals() as usize;
    let mut min_loops = vec![u32::MAX; num_locals];
    let mut max_loop_write = vec![0u32; num_locals];

    for block in cfg.live_blocks() {
        if block.id == BlockId::DEAD {
            continue;
        }
        let depth = block.outer_loops;
        rnw.reads[block.id.index()].for_each(|local| {
            let slot = &mut min_loops[local as usize];
            *slot = (*slot).min(depth);
        });
        for binding in &block.bindings {
            let local = binding.bind.id() as usize;
            min_loops[local] = min_loops[local].min(depth);
            max_loop_write[local] = max_loop_write[local].max(depth);
        }
    }
    cfg.min_loops = min_loops;
    cfg.max_loop_write = max_loop_write;
}

/// Block-argument synthesis: for each block, the locals that must be passed
/// in from its predecessors, i.e. live on entry.
///
/// Two upper bounds, intersected:
///
/// - bound 1 accumulates reads over the reversed graph (each block's set
///   grows by its successors' sets), pruning locals that are dead on entry,
///   *except* inside loops deeper than the local's minimum depth. Erasing
///   there would break the pinning-based inference downstream.
/// - bound 2 accumulates writes over the forward graph (each block's set
///   grows by its predecessors' writes and bound-2 sets).
///
/// Each bound iterates to a fixed point; the result lands in each block's
/// `args`, sorted by local id because the set visitor yields ascending ids.
/// The per-bound-then-intersect shape keeps the whole thing linear in
/// practice; making any of it quadratic would be very noticeable on large
/// methods.
pub fn fill_in_block_arguments(cfg: &mut Cfg, rnw: &ReadsAndWrites) -> Vec<UIntSet> {
    let num_locals = cfg.num_locals();

    // Bound 1: reads propagated backwards.
    let mut upper_bounds1: Vec<UIntSet> = rnw.reads.clone();
    let mut to_remove = UIntSet::new(num_locals);
    let mut changed = true;
    while changed {
        changed = false;
        for &bb in &cfg.forwards_topo_sort {
            let (then_block, else_block, outer_loops) = {
                let block = cfg.block(bb);
                (block.exit.then_block, block.exit.else_block, block.outer_loops)
            };
            let before = upper_bounds1[bb.index()].size();
            if then_block != BlockId::DEAD {
                let successor = upper_bounds1[then_block.index()].clone();
                upper_bounds1[bb.index()].add_all(&successor);
            }
            if else_block != BlockId::DEAD && else_block != then_block {
                let successor = upper_bounds1[else_block.index()].clone();
                upper_bounds1[bb.index()].add_all(&successor);
            }

            // A local written here without being read is dead on entry and
            // not required from predecessors, unless the loop-pinning
            // exception applies.
            let dead_for_block = &rnw.dead[bb.index()];
            if !dead_for_block.is_empty() {
                to_remove.clear();
                dead_for_block.for_each(|local| {
                    if outer_loops <= cfg.min_loops[local as usize] {
                        to_remove.add(local);
                    }
                });
                upper_bounds1[bb.index()].remove_all(&to_remove);
            }
            changed = changed || upper_bounds1[bb.index()].size() != before;
        }
    }

    // Bound 2: writes propagated forwards.
    let mut upper_bounds2: Vec<UIntSet> =
        (0..cfg.max_block_id()).map(|_| UIntSet::new(num_locals)).collect();
    changed = true;
    while changed {
        changed = false;
        for &bb in cfg.forwards_topo_sort.iter().rev() {
            let before = upper_bounds2[bb.index()].size();
            let back_edges = cfg.block(bb).back_edges.clone();
            for parent in back_edges {
                if parent == BlockId::DEAD {
                    continue;
                }
                let mut combined = UIntSet::new(num_locals);
                combined.add_union(&rnw.writes[parent.index()], &upper_bounds2[parent.index()]);
                upper_bounds2[bb.index()].add_all(&combined);
            }
            changed = changed || upper_bounds2[bb.index()].size() != before;
        }
    }

    // Intersection becomes the argument list, in ascending local-id order.
    for bb in cfg.block_ids() {
        upper_bounds1[bb.index()].intersect(&upper_bounds2[bb.index()]);
        if cfg.block(bb).is_detached() {
            continue;
        }
        debug_assert!(cfg.block(bb).args.is_empty(), "block args filled twice");
        let mut args = Vec::with_capacity(upper_bounds1[bb.index()].size());
        upper_bounds1[bb.index()].for_each(|local| args.push(crate::LocalRef::from_raw(local)));
        cfg.block_mut(bb).args = args;
    }
    // The mutated bound-1 vector now holds the per-block intersection.
    upper_bounds1
}

/// Drop bindings whose bound local is provably unobserved: not an alias for
/// a global, not read later in its own block, not required by either
/// successor, and bound by a side-effect-free instruction.
pub fn remove_dead_assigns(cfg: &mut Cfg, rnw: &ReadsAndWrites, block_args: &[UIntSet]) {
    debug_assert_eq!(block_args.len(), cfg.max_block_id());
    let alias_locals: Vec<crate::LocalRef> = cfg.alias_targets.keys().copied().collect();
    for bb in cfg.block_ids() {
        if cfg.block(bb).is_detached() {
            continue;
        }
        let (then_block, else_block) = {
            let exit = &cfg.block(bb).exit;
            (exit.then_block, exit.else_block)
        };
        let reads = &rnw.reads[bb.index()];
        let block = cfg.block_mut(bb);
        block.bindings.retain(|binding| {
            if alias_locals.contains(&binding.bind) {
                return true;
            }
            let was_read = reads.contains(binding.bind.id())
                || block_args[then_block.index()].contains(binding.bind.id())
                || block_args[else_block.index()].contains(binding.bind.id());
            if was_read {
                return true;
            }
            // Listing the side-effect-free forms (rather than the converse)
            // stays correct as new instruction kinds are added.
            !binding.value.is_side_effect_free()
        });
    }
}
