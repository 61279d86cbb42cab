//! The per-file pipeline: parse and index (mutating phases), then typecheck
//! (frozen-table phase). Both the batch driver and the language server call
//! these; the server adds cancellation polling between methods.

use crate::{infer_method, namer, suggest_sig};
use core_errors::{Error, ErrorClass};
use core_loc::{FileRef, Loc, StrictLevel};
use core_state::GlobalState;
use core_tree::{FileHash, Node, Parser, Tree, hashing};

/// Diagnostics attached by the external parser.
pub const PARSE_ERROR: ErrorClass = ErrorClass::new(2001, StrictLevel::False);

/// Parse one file and enter its definitions. Tables must be unfrozen.
/// Parser diagnostics flow into the error queue as user errors.
pub fn index_file(gs: &mut GlobalState, parser: &dyn Parser, file: FileRef) -> (Tree, FileHash) {
    let result = {
        let data = gs.files.file(file);
        parser.parse(data.path(), data.source(), &mut gs.names)
    };
    for diagnostic in result.diagnostics {
        gs.report_error(Error::new(
            Loc::new(file, diagnostic.loc),
            PARSE_ERROR,
            diagnostic.message,
        ));
    }
    namer::enter_definitions(gs, file, &result.tree);
    let hash = hashing::hash_tree(&result.tree);
    tracing::debug!(
        target: "pipeline.index",
        file = gs.files.file(file).path(),
        definitions = hash.definitions,
        "indexed"
    );
    (result.tree, hash)
}

/// Typecheck every method defined in `tree`. Requires frozen tables; safe
/// to run on worker threads against a shared `GlobalState`.
///
/// Returns false when a cancellation was observed part-way: the remaining
/// methods are skipped and the file's flush barrier is *not* emitted.
pub fn typecheck_file(gs: &GlobalState, file: FileRef, tree: &Tree) -> bool {
    debug_assert!(gs.tables_frozen(), "typechecking requires frozen tables");
    if gs.files.file(file).strict() == StrictLevel::Ignore {
        gs.error_queue.mark_file_for_flushing(file);
        return true;
    }

    for (method, def_tree) in namer::method_defs(gs, tree) {
        if gs.was_typechecking_canceled() {
            tracing::debug!(target: "pipeline.typecheck", file = gs.files.file(file).path(), "canceled");
            return false;
        }
        let Node::MethodDef { body, .. } = &def_tree.node else {
            continue;
        };
        let cfg = core_cfg::build(gs, method, body, file);
        let sig = infer_method(gs, &cfg);
        suggest_sig::run(gs, method, &sig, file);
    }
    gs.error_queue.mark_file_for_flushing(file);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_errors::{CollectorFlusher, ErrorQueue};
    use core_loc::LocOffsets;
    use core_names::{SymbolFlags, Ty, well_known_syms};
    use core_tree::make;
    use std::sync::Arc;

    fn loc(b: u32, e: u32) -> LocOffsets {
        LocOffsets::new(b, e)
    }

    /// End to end: a typed file calling a missing method reports exactly
    /// the unknown-method error.
    #[test]
    fn unknown_method_is_reported_end_to_end() {
        let queue = Arc::new(ErrorQueue::new());
        let mut gs = GlobalState::new(queue.clone());
        let file = gs.enter_file("a.rb", "# typed: true\nclass A; def go; frobnicate; end; end\n".to_owned());

        let class_name = gs.names.enter_utf8("A").unwrap();
        let go = gs.names.enter_utf8("go").unwrap();
        let frobnicate = gs.names.enter_utf8("frobnicate").unwrap();
        // def go; self.frobnicate; end
        let tree = make::root(vec![make::class_def(
            loc(14, 50),
            class_name,
            None,
            vec![make::method_def(
                loc(23, 45),
                go,
                vec![],
                make::send(loc(31, 41), make::self_ref(loc(31, 35)), frobnicate, vec![]),
            )],
        )]);
        namer::enter_definitions(&mut gs, file, &tree);
        gs.freeze_tables();

        assert!(typecheck_file(&gs, file, &tree));

        let mut flusher = CollectorFlusher::new();
        queue.flush_errors(&mut flusher, &gs.files, true);
        let errors = flusher.take_errors();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].what, crate::error_classes::UNKNOWN_METHOD);
        assert!(errors[0].header.contains("frobnicate"));
    }

    /// Return-type checking honors a declared result type.
    #[test]
    fn declared_result_type_is_enforced() {
        let queue = Arc::new(ErrorQueue::new());
        let mut gs = GlobalState::new(queue.clone());
        let file = gs.enter_file("a.rb", "# typed: true\ndef answer; 42; end\n".to_owned());

        let answer = gs.names.enter_utf8("answer").unwrap();
        let tree = make::root(vec![make::method_def(
            loc(14, 33),
            answer,
            vec![],
            make::int(loc(26, 28), 42),
        )]);
        namer::enter_definitions(&mut gs, file, &tree);
        let method = gs.symbols.lookup(well_known_syms::ROOT, answer).unwrap();
        gs.symbols.set_result_type(method, Ty::string()).unwrap();
        gs.freeze_tables();

        assert!(typecheck_file(&gs, file, &tree));
        assert_eq!(queue.non_silenced_error_count(), 1);
        let drained = queue.drain_all();
        let first_error = drained
            .iter()
            .find_map(|m| match m {
                core_errors::ErrorQueueMessage::Error { error, .. } => Some(error),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_error.what, crate::error_classes::RETURN_TYPE_MISMATCH);
    }

    /// Typed receivers with known methods pass clean.
    #[test]
    fn resolvable_send_produces_no_errors() {
        let queue = Arc::new(ErrorQueue::new());
        let mut gs = GlobalState::new(queue.clone());
        let file = gs.enter_file("a.rb", "# typed: true\n".to_owned());

        let helper = gs.names.enter_utf8("helper").unwrap();
        let go = gs.names.enter_utf8("go").unwrap();
        let cls = gs.names.enter_utf8("Thing").unwrap();
        let tree = make::root(vec![make::class_def(
            loc(0, 60),
            cls,
            None,
            vec![
                make::method_def(loc(5, 15), helper, vec![], make::int(loc(10, 12), 7)),
                make::method_def(
                    loc(20, 40),
                    go,
                    vec![],
                    make::send(loc(25, 35), make::self_ref(loc(25, 29)), helper, vec![]),
                ),
            ],
        )]);
        namer::enter_definitions(&mut gs, file, &tree);
        gs.freeze_tables();
        assert!(typecheck_file(&gs, file, &tree));
        assert_eq!(queue.non_silenced_error_count(), 0);
    }

    /// Files at `# typed: false` silence method errors but still count them.
    #[test]
    fn untyped_file_silences_inference_errors() {
        let queue = Arc::new(ErrorQueue::new());
        let mut gs = GlobalState::new(queue.clone());
        let file = gs.enter_file("a.rb", "# typed: false\n".to_owned());

        let go = gs.names.enter_utf8("go").unwrap();
        let missing = gs.names.enter_utf8("missing").unwrap();
        let cls = gs.names.enter_utf8("Quiet").unwrap();
        let tree = make::root(vec![make::class_def(
            loc(0, 60),
            cls,
            None,
            vec![make::method_def(
                loc(5, 40),
                go,
                vec![],
                make::send(loc(10, 30), make::self_ref(loc(10, 14)), missing, vec![]),
            )],
        )]);
        namer::enter_definitions(&mut gs, file, &tree);
        gs.freeze_tables();
        assert!(typecheck_file(&gs, file, &tree));
        assert_eq!(queue.non_silenced_error_count(), 0);
        assert_eq!(queue.silenced_error_count(), 1);
    }

    /// Loop-carried variables are pinned: changing the type inside the loop
    /// is an error.
    #[test]
    fn pinned_variable_type_change_in_loop_errors() {
        let queue = Arc::new(ErrorQueue::new());
        let mut gs = GlobalState::new(queue.clone());
        let file = gs.enter_file("a.rb", "# typed: true\n".to_owned());

        let run = gs.names.enter_utf8("run").unwrap();
        let x = gs.names.enter_utf8("x").unwrap();
        let flag = gs.names.enter_utf8("flag").unwrap();
        let method = gs
            .symbols
            .enter_symbol(well_known_syms::OBJECT, run, SymbolFlags::METHOD)
            .unwrap();
        gs.symbols.seal_arguments(method).unwrap();
        gs.freeze_tables();

        // x = 1; flag = true; while flag; x = "s"; end
        let body = make::ins_seq(
            loc(0, 60),
            vec![
                make::assign_local(loc(0, 5), x, make::int(loc(4, 5), 1)),
                make::assign_local(loc(6, 17), flag, make::literal(loc(13, 17), core_tree::Value::True)),
                make::while_(
                    loc(18, 50),
                    make::local(loc(24, 28), flag),
                    make::assign_local(
                        loc(30, 37),
                        x,
                        make::literal(loc(34, 37), core_tree::Value::Str("s".to_owned())),
                    ),
                ),
            ],
            make::nil(loc(55, 58)),
        );
        let cfg = core_cfg::build(&gs, method, &body, file);
        let _ = infer_method(&gs, &cfg);

        let drained = queue.drain_all();
        let pinned = drained.iter().any(|m| match m {
            core_errors::ErrorQueueMessage::Error { error, .. } => {
                error.what == crate::error_classes::PINNED_TYPE_CHANGED
            }
            _ => false,
        });
        assert!(pinned, "expected a pinned-type error for x");
    }
}
