//! Graph-level scenarios for simplification, dealiasing, and liveness, plus
//! end-to-end lowering through the builder.

use core_cfg::{
    Binding, BlockFlags, BlockId, Cfg, Instruction, LocalRef, ReadsAndWrites, finalize, liveness,
};
use core_errors::ErrorQueue;
use core_loc::LocOffsets;
use core_names::{ArgInfo, LocalVariable, SymbolFlags, well_known, well_known_syms};
use core_state::GlobalState;
use core_tree::{Value, make};
use std::sync::Arc;

fn loc() -> LocOffsets {
    LocOffsets::new(0, 1)
}

/// Manually wire an unconditional jump, optionally duplicating the back
/// edge the way a conditional exit with aliased targets would.
fn wire_jump(cfg: &mut Cfg, from: BlockId, to: BlockId, duplicate_edge: bool) {
    {
        let exit = &mut cfg.block_mut(from).exit;
        exit.cond = LocalRef::UNCONDITIONAL;
        exit.then_block = to;
        exit.else_block = to;
        exit.loc = loc();
    }
    let target = cfg.block_mut(to);
    target.back_edges.push(from);
    if duplicate_edge {
        target.back_edges.push(from);
    }
    target.flags |= BlockFlags::WAS_JUMP_DESTINATION;
}

fn wire_cond_jump(cfg: &mut Cfg, from: BlockId, cond: LocalRef, then_b: BlockId, else_b: BlockId) {
    {
        let exit = &mut cfg.block_mut(from).exit;
        exit.cond = cond;
        exit.then_block = then_b;
        exit.else_block = else_b;
        exit.loc = loc();
    }
    for target in [then_b, else_b] {
        let block = cfg.block_mut(target);
        block.back_edges.push(from);
        block.flags |= BlockFlags::WAS_JUMP_DESTINATION;
    }
}

#[test]
fn merging_an_unconditional_chain_leaves_three_blocks() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let x_name = gs.names.enter_utf8("x").unwrap();
    let mut cfg = Cfg::new(well_known_syms::OBJECT, core_loc::FileRef::from_raw(1));

    let x = cfg.enter_local(LocalVariable::new(x_name, 0));
    let t = cfg.enter_local(LocalVariable::new(well_known::STAT_TEMP, 1));
    let r = cfg.enter_local(LocalVariable::new(well_known::FINAL_RETURN, 2));

    let a = cfg.fresh_block(0);
    let b = cfg.fresh_block(0);

    // entry: x = 1, conditional on x into A or straight to dead.
    cfg.block_mut(BlockId::ENTRY)
        .bindings
        .push(Binding::new(x, Instruction::Literal(Value::Integer(1)), loc()));
    wire_cond_jump(&mut cfg, BlockId::ENTRY, x, a, BlockId::DEAD);

    // A: t = 2; unconditional jump to B carrying a duplicated back edge.
    cfg.block_mut(a)
        .bindings
        .push(Binding::new(t, Instruction::Literal(Value::Integer(2)), loc()));
    wire_jump(&mut cfg, a, b, true);

    // B: return x.
    cfg.block_mut(b)
        .bindings
        .push(Binding::new(r, Instruction::Return(x), loc()));
    wire_jump(&mut cfg, b, BlockId::DEAD, false);

    finalize::topo_sort(&mut cfg);
    assert_eq!(cfg.forwards_topo_sort.len(), 4, "entry, A, B, dead before simplify");

    finalize::simplify(&mut cfg);

    // B merged into A; survivors are entry, merged(A,B), dead.
    let live: Vec<BlockId> = cfg.live_blocks().map(|b| b.id).collect();
    assert_eq!(live, vec![BlockId::DEAD, BlockId::ENTRY, a]);
    assert_eq!(cfg.forwards_topo_sort.len(), 3);
    assert!(!cfg.forwards_topo_sort.contains(&b));
    // The merged block carries both blocks' bindings and B's exit.
    assert_eq!(cfg.block(a).bindings.len(), 2);
    assert_eq!(cfg.block(a).exit.then_block, BlockId::DEAD);
}

#[test]
fn simplify_twice_is_a_noop() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let x_name = gs.names.enter_utf8("x").unwrap();
    let mut cfg = Cfg::new(well_known_syms::OBJECT, core_loc::FileRef::from_raw(1));
    let x = cfg.enter_local(LocalVariable::new(x_name, 0));
    let a = cfg.fresh_block(0);
    let b = cfg.fresh_block(0);
    wire_cond_jump(&mut cfg, BlockId::ENTRY, x, a, b);
    wire_jump(&mut cfg, a, BlockId::DEAD, false);
    wire_jump(&mut cfg, b, BlockId::DEAD, false);
    cfg.block_mut(a)
        .bindings
        .push(Binding::new(x, Instruction::Literal(Value::Nil), loc()));
    cfg.block_mut(b)
        .bindings
        .push(Binding::new(x, Instruction::Literal(Value::True), loc()));

    finalize::topo_sort(&mut cfg);
    finalize::simplify(&mut cfg);
    let first = snapshot(&cfg);
    finalize::simplify(&mut cfg);
    assert_eq!(first, snapshot(&cfg));
}

fn snapshot(cfg: &Cfg) -> Vec<(u32, usize, u32, u32)> {
    cfg.live_blocks()
        .map(|b| {
            (
                b.id.id(),
                b.bindings.len(),
                b.exit.then_block.id(),
                b.exit.else_block.id(),
            )
        })
        .collect()
}

#[test]
fn alias_chain_collapses_to_the_source_local() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let x_name = gs.names.enter_utf8("x").unwrap();
    let y_name = gs.names.enter_utf8("y").unwrap();
    let mut cfg = Cfg::new(well_known_syms::OBJECT, core_loc::FileRef::from_raw(1));

    let x = cfg.enter_local(LocalVariable::new(x_name, 0));
    let y = cfg.enter_local(LocalVariable::new(y_name, 0));
    let t1 = cfg.enter_local(LocalVariable::new(well_known::STAT_TEMP, 1));
    let t2 = cfg.enter_local(LocalVariable::new(well_known::STAT_TEMP, 2));
    let ret = cfg.enter_local(LocalVariable::new(well_known::FINAL_RETURN, 3));

    let entry = cfg.block_mut(BlockId::ENTRY);
    entry.bindings.push(Binding::new(x, Instruction::Literal(Value::Integer(5)), loc()));
    entry.bindings.push(Binding::new(t1, Instruction::Ident(x), loc()));
    entry.bindings.push(Binding::new(t2, Instruction::Ident(t1), loc()));
    entry.bindings.push(Binding::new(y, Instruction::Ident(t2), loc()));
    entry.bindings.push(Binding::new(ret, Instruction::Return(y), loc()));
    wire_jump(&mut cfg, BlockId::ENTRY, BlockId::DEAD, false);

    finalize::topo_sort(&mut cfg);
    finalize::simplify(&mut cfg);
    finalize::dealias(&mut cfg, &gs.names);

    // y now copies straight from x.
    let y_binding = cfg.block(BlockId::ENTRY)
        .bindings
        .iter()
        .find(|b| b.bind == y)
        .unwrap();
    assert_eq!(y_binding.value, Instruction::Ident(x));

    // Idempotence: a second dealias changes nothing.
    let before: Vec<_> = cfg.block(BlockId::ENTRY).bindings.clone();
    finalize::dealias(&mut cfg, &gs.names);
    assert_eq!(before, cfg.block(BlockId::ENTRY).bindings);

    // And the temporaries are now dead stores.
    let rnw = ReadsAndWrites::compute(&cfg);
    liveness::compute_min_max_loops(&mut cfg, &rnw);
    let args = liveness::fill_in_block_arguments(&mut cfg, &rnw);
    liveness::remove_dead_assigns(&mut cfg, &rnw, &args);
    let bound: Vec<LocalRef> = cfg.block(BlockId::ENTRY).bindings.iter().map(|b| b.bind).collect();
    assert!(!bound.contains(&t1));
    assert!(!bound.contains(&t2));
    assert!(bound.contains(&y));
}

fn fixture_method(gs: &mut GlobalState, with_param: bool) -> core_names::SymbolRef {
    let name = gs.names.enter_utf8("compute").unwrap();
    let method = gs
        .symbols
        .enter_symbol(well_known_syms::OBJECT, name, SymbolFlags::METHOD)
        .unwrap();
    if with_param {
        let param = gs.names.enter_utf8("n").unwrap();
        gs.symbols.add_argument(method, ArgInfo::positional(param)).unwrap();
    }
    gs.symbols.seal_arguments(method).unwrap();
    method
}

#[test]
fn empty_body_builds_entry_and_dead_only() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let method = fixture_method(&mut gs, false);
    let file = gs.enter_file("a.rb", "# typed: true\n".to_owned());
    let cfg = core_cfg::build(&gs, method, &core_tree::Tree::empty(), file);

    let live: Vec<BlockId> = cfg.live_blocks().map(|b| b.id).collect();
    assert_eq!(live, vec![BlockId::DEAD, BlockId::ENTRY]);
    // The entry still returns: self/arg loads, nil result, return.
    assert!(
        cfg.block(BlockId::ENTRY)
            .bindings
            .iter()
            .any(|b| matches!(b.value, Instruction::Return(_)))
    );
}

#[test]
fn if_lowering_produces_sorted_live_args() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let method = fixture_method(&mut gs, true);
    let file = gs.enter_file("a.rb", "# typed: true\n".to_owned());

    let n = gs.names.enter_utf8("n").unwrap();
    let x = gs.names.enter_utf8("x").unwrap();
    // x = (if n then 1 else 2 end); x
    let body = make::ins_seq(
        loc(),
        vec![make::assign_local(
            loc(),
            x,
            make::if_(
                loc(),
                make::local(loc(), n),
                make::int(loc(), 1),
                make::int(loc(), 2),
            ),
        )],
        make::local(loc(), x),
    );
    let cfg = core_cfg::build(&gs, method, &body, file);

    for block in cfg.live_blocks() {
        // Invariant: args sorted by local id.
        assert!(block.args.windows(2).all(|w| w[0] < w[1]), "args not sorted");
        // Invariant: every back edge is symmetric with its parent's exit.
        for &parent in &block.back_edges {
            let exit = &cfg.block(parent).exit;
            assert!(exit.then_block == block.id || exit.else_block == block.id);
        }
    }

    // Whichever block reads x at the end must receive it as an argument.
    let merge_args: Vec<Vec<LocalRef>> = cfg
        .live_blocks()
        .filter(|b| b.id != BlockId::DEAD && b.id != BlockId::ENTRY)
        .map(|b| b.args.clone())
        .collect();
    assert!(
        merge_args.iter().any(|args| !args.is_empty()),
        "the merge block should need the assigned local"
    );
}

#[test]
fn while_lowering_marks_loop_headers_and_depths() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let method = fixture_method(&mut gs, true);
    let file = gs.enter_file("a.rb", "# typed: true\n".to_owned());

    let n = gs.names.enter_utf8("n").unwrap();
    // while n; n = n; end
    let body = make::while_(
        loc(),
        make::local(loc(), n),
        make::assign_local(loc(), n, make::local(loc(), n)),
    );
    let cfg = core_cfg::build(&gs, method, &body, file);

    let headers: Vec<BlockId> = cfg
        .live_blocks()
        .filter(|b| b.is_loop_header())
        .map(|b| b.id)
        .collect();
    assert!(!headers.is_empty(), "a while loop needs a loop header");
    for header in headers {
        let block = cfg.block(header);
        assert!(
            block
                .back_edges
                .iter()
                .any(|&p| cfg.block(p).outer_loops < block.outer_loops),
            "loop header must be entered from a shallower block"
        );
    }

    // n is touched both outside (entry) and inside the loop.
    let n_local = cfg
        .live_blocks()
        .flat_map(|b| b.bindings.iter())
        .find_map(|b| match b.value {
            Instruction::LoadArg(0) => Some(b.bind),
            _ => None,
        })
        .expect("argument load for n");
    assert_eq!(cfg.min_loops[n_local.id() as usize], 0);
    assert!(cfg.max_loop_write[n_local.id() as usize] >= 1);
}

#[test]
fn dead_stores_survive_under_an_active_query() {
    let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
    let method = fixture_method(&mut gs, false);
    let file = gs.enter_file("a.rb", "# typed: true\n".to_owned());
    let x = gs.names.enter_utf8("x").unwrap();
    // x = 1 and nothing reads x.
    let body = make::assign_local(loc(), x, make::int(loc(), 1));

    gs.lsp_query = core_query::Query::Loc(core_loc::Loc::new(file, loc()));
    let with_query = core_cfg::build(&gs, method, &body, file);
    gs.lsp_query = core_query::Query::Empty;
    let without_query = core_cfg::build(&gs, method, &body, file);

    // The body never mentions self, so the entry's LoadSelf is a dead store
    // in batch mode; an active query suppresses the elimination wholesale.
    let count = |cfg: &Cfg| {
        cfg.live_blocks()
            .flat_map(|b| b.bindings.iter())
            .filter(|b| matches!(b.value, Instruction::LoadSelf))
            .count()
    };
    assert_eq!(count(&with_query), 1, "query runs keep the binding");
    assert_eq!(count(&without_query), 0, "batch runs drop the dead store");
}
