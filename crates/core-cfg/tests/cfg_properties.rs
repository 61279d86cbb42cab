//! Property tests: structural invariants hold for CFGs built from arbitrary
//! nestings of the control-flow constructs.

use core_cfg::{BlockId, Cfg};
use core_errors::ErrorQueue;
use core_loc::LocOffsets;
use core_names::{SymbolFlags, well_known_syms};
use core_state::GlobalState;
use core_tree::{Tree, make};
use proptest::prelude::*;
use std::sync::Arc;

fn loc(seed: u32) -> LocOffsets {
    LocOffsets::new(seed, seed + 1)
}

/// A tiny recursive expression generator: literals, locals, assigns, ifs,
/// whiles, sends, and sequences.
fn arb_tree() -> impl Strategy<Value = Tree> {
    let leaf = prop_oneof![
        (0u32..50).prop_map(|s| make::int(loc(s), s as i64)),
        (0u32..50).prop_map(|s| make::nil(loc(s))),
        Just(make::self_ref(loc(1))),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone(), inner.clone(), 0u32..50)
                .prop_map(|(c, t, e, s)| make::if_(loc(s), c, t, e)),
            (inner.clone(), inner.clone(), 0u32..50).prop_map(|(c, b, s)| make::while_(loc(s), c, b)),
            (proptest::collection::vec(inner.clone(), 0..3), inner.clone(), 0u32..50)
                .prop_map(|(stats, e, s)| make::ins_seq(loc(s), stats, e)),
            (inner.clone(), 0u32..50).prop_map(|(e, s)| make::return_(loc(s), Some(e))),
        ]
    })
}

fn check_invariants(cfg: &Cfg) {
    let live: Vec<BlockId> = cfg.live_blocks().map(|b| b.id).collect();

    // The topological order contains exactly the surviving reachable blocks,
    // each at most once.
    let mut sorted = cfg.forwards_topo_sort.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(sorted.len(), cfg.forwards_topo_sort.len(), "duplicate in topo sort");
    for id in &cfg.forwards_topo_sort {
        assert!(live.contains(id), "topo sort mentions a detached block");
    }

    for block in cfg.live_blocks() {
        // Back edges are symmetric with their parents' exits.
        for &parent in &block.back_edges {
            let exit = &cfg.block(parent).exit;
            assert!(
                exit.then_block == block.id || exit.else_block == block.id,
                "asymmetric back edge"
            );
        }
        // Exits point at live blocks that know about us.
        if block.id != BlockId::DEAD {
            for target in [block.exit.then_block, block.exit.else_block] {
                assert!(!cfg.block(target).is_detached(), "exit into a detached block");
                assert!(cfg.block(target).back_edges.contains(&block.id));
            }
        }
        // Args sorted strictly by local id.
        assert!(block.args.windows(2).all(|w| w[0] < w[1]), "unsorted args");
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn built_cfgs_preserve_structural_invariants(body in arb_tree()) {
        let mut gs = GlobalState::new(Arc::new(ErrorQueue::new()));
        let name = gs.names.enter_utf8("generated").unwrap();
        let method = gs
            .symbols
            .enter_symbol(well_known_syms::OBJECT, name, SymbolFlags::METHOD)
            .unwrap();
        gs.symbols.seal_arguments(method).unwrap();
        let file = gs.enter_file("gen.rb", "# typed: true\n".to_owned());

        let cfg = core_cfg::build(&gs, method, &body, file);
        check_invariants(&cfg);
    }
}
