//! Lowering a desugared method body to basic blocks.
//!
//! Every expression becomes a three-address binding whose result lands in a
//! caller-chosen local; control flow materializes fresh blocks connected by
//! exits. Two exit markers are load-bearing for the later passes: jumps with
//! one target carry the [`LocalRef::UNCONDITIONAL`] condition sentinel, and
//! the split between "call with block" and its continuation carries
//! [`LocalRef::BLOCK_CALL`], which simplification treats as untouchable.

use crate::{Binding, BlockFlags, BlockId, Cfg, Instruction, IntrinsicOp, LocalRef};
use crate::{finalize, liveness};
use core_errors::{Error, ErrorClass};
use core_loc::{FileRef, Loc, LocOffsets, StrictLevel};
use core_names::{LocalVariable, NameRef, SymbolRef, well_known};
use core_state::GlobalState;
use core_tree::{Node, Tree};
use smallvec::SmallVec;

/// Reported when `break`/`next` appears outside a loop or `retry` outside a
/// rescue body.
pub const NO_ENCLOSING_SCOPE: ErrorClass = ErrorClass::new(4004, StrictLevel::False);

/// Build, order, simplify, dealias, and annotate the CFG for one method.
/// Dead-store elimination is skipped while an LSP query is active: the query
/// may need to see a binding the optimizer would drop.
pub fn build(gs: &GlobalState, method: SymbolRef, body: &Tree, file: FileRef) -> Cfg {
    let mut builder = Builder {
        gs,
        cfg: Cfg::new(method, file),
        file,
        temp_counter: 0,
        loops: Vec::new(),
        rescues: Vec::new(),
        self_local: LocalRef::NONE,
        entry_preamble_len: 0,
    };
    builder.lower(body);
    let mut cfg = builder.cfg;

    finalize::topo_sort(&mut cfg);
    finalize::simplify(&mut cfg);
    finalize::dealias(&mut cfg, &gs.names);
    finalize::mark_loop_headers(&mut cfg);
    let rnw = liveness::ReadsAndWrites::compute(&cfg);
    liveness::compute_min_max_loops(&mut cfg, &rnw);
    let block_args = liveness::fill_in_block_arguments(&mut cfg, &rnw);
    if gs.lsp_query.is_empty() {
        liveness::remove_dead_assigns(&mut cfg, &rnw, &block_args);
    }
    tracing::trace!(
        target: "cfg.build",
        method = method.id(),
        blocks = cfg.live_blocks().count(),
        locals = cfg.num_locals(),
        "cfg built"
    );
    cfg
}

struct LoopScope {
    next_target: BlockId,
    break_target: BlockId,
}

struct Builder<'a> {
    gs: &'a GlobalState,
    cfg: Cfg,
    file: FileRef,
    temp_counter: u32,
    loops: Vec<LoopScope>,
    /// Retry targets, innermost last.
    rescues: Vec<BlockId>,
    self_local: LocalRef,
    entry_preamble_len: usize,
}

impl<'a> Builder<'a> {
    fn lower(&mut self, body: &Tree) {
        // Entry preamble: self, then each declared argument in order.
        self.self_local = self
            .cfg
            .enter_local(LocalVariable::new(well_known::SELF_LOCAL, 0));
        self.push_binding(
            BlockId::ENTRY,
            self.self_local,
            Instruction::LoadSelf,
            LocOffsets::none(),
        );
        let arguments: Vec<NameRef> = self
            .gs
            .symbols
            .symbol(self.cfg.method)
            .arguments
            .iter()
            .map(|a| a.name)
            .collect();
        for (index, name) in arguments.into_iter().enumerate() {
            let local = self.cfg.enter_local(LocalVariable::new(name, 0));
            self.push_binding(
                BlockId::ENTRY,
                local,
                Instruction::LoadArg(index as u16),
                LocOffsets::none(),
            );
        }
        self.entry_preamble_len = self.cfg.block(BlockId::ENTRY).bindings.len();

        let result = self.temp(well_known::RETURN_TEMP);
        let last = self.walk(body, BlockId::ENTRY, result);
        let ret = self.temp(well_known::FINAL_RETURN);
        self.push_binding(last, ret, Instruction::Return(result), body.loc);
        self.jump(last, BlockId::DEAD, body.loc);
    }

    fn temp(&mut self, name: NameRef) -> LocalRef {
        self.temp_counter += 1;
        self.cfg.enter_local(LocalVariable::new(name, self.temp_counter))
    }

    fn source_local(&mut self, name: NameRef) -> LocalRef {
        self.cfg.enter_local(LocalVariable::new(name, 0))
    }

    fn push_binding(&mut self, block: BlockId, bind: LocalRef, value: Instruction, loc: LocOffsets) {
        if block == BlockId::DEAD {
            return;
        }
        self.cfg
            .block_mut(block)
            .bindings
            .push(Binding::new(bind, value, loc));
    }

    /// Unconditional jump: condition sentinel, both targets aliased. Jumps
    /// out of the dead block are dropped; lowering continues "into" the dead
    /// block after a return, and nothing may resurrect control from there.
    fn jump(&mut self, from: BlockId, to: BlockId, loc: LocOffsets) {
        if from == BlockId::DEAD {
            return;
        }
        let exit = &mut self.cfg.block_mut(from).exit;
        exit.cond = LocalRef::UNCONDITIONAL;
        exit.then_block = to;
        exit.else_block = to;
        exit.loc = loc;
        let target = self.cfg.block_mut(to);
        target.back_edges.push(from);
        target.flags |= BlockFlags::WAS_JUMP_DESTINATION;
    }

    fn cond_jump(
        &mut self,
        from: BlockId,
        cond: LocalRef,
        then_block: BlockId,
        else_block: BlockId,
        loc: LocOffsets,
    ) {
        debug_assert_ne!(then_block, else_block, "conditional jump with aliased targets");
        if from == BlockId::DEAD {
            return;
        }
        let exit = &mut self.cfg.block_mut(from).exit;
        exit.cond = cond;
        exit.then_block = then_block;
        exit.else_block = else_block;
        exit.loc = loc;
        for target in [then_block, else_block] {
            let block = self.cfg.block_mut(target);
            block.back_edges.push(from);
            block.flags |= BlockFlags::WAS_JUMP_DESTINATION;
        }
    }

    /// Bind an alias local for a global into the entry preamble, after the
    /// argument loads but ahead of user code.
    fn global_alias(&mut self, symbol: SymbolRef, name: NameRef) -> LocalRef {
        let local = self.source_local(name);
        if let Some(existing) = self.cfg.alias_targets.get(&local) {
            debug_assert_eq!(*existing, symbol);
            return local;
        }
        let entry = self.cfg.block_mut(BlockId::ENTRY);
        entry.bindings.insert(
            self.entry_preamble_len,
            Binding::new(local, Instruction::Alias(symbol), LocOffsets::none()),
        );
        self.entry_preamble_len += 1;
        self.cfg.alias_targets.insert(local, symbol);
        local
    }

    fn report(&self, loc: LocOffsets, what: ErrorClass, header: String) {
        self.gs.report_error(Error::new(Loc::new(self.file, loc), what, header));
    }

    /// Lower `tree`, binding its value into `target` starting in `current`.
    /// Returns the block where control continues. Code after a diverging
    /// expression arrives here with the dead block as `current` and is not
    /// lowered at all.
    fn walk(&mut self, tree: &Tree, current: BlockId, target: LocalRef) -> BlockId {
        if current == BlockId::DEAD {
            return BlockId::DEAD;
        }
        let loc = tree.loc;
        match &tree.node {
            Node::EmptyTree => {
                self.push_binding(current, target, Instruction::Literal(core_tree::Value::Nil), loc);
                current
            }
            Node::Literal(value) => {
                self.push_binding(current, target, Instruction::Literal(value.clone()), loc);
                current
            }
            Node::SelfRef => {
                let self_local = self.self_local;
                self.push_binding(current, target, Instruction::Ident(self_local), loc);
                current
            }
            Node::Local { name } => {
                let local = self.source_local(*name);
                self.push_binding(current, target, Instruction::Ident(local), loc);
                current
            }
            Node::Field { name } => {
                let owner = self.gs.symbols.symbol(self.cfg.method).owner;
                let symbol = self.gs.symbols.lookup(owner, *name).unwrap_or_default();
                let alias = self.global_alias(symbol, *name);
                self.push_binding(current, target, Instruction::Ident(alias), loc);
                current
            }
            Node::ConstantRef { name } => {
                let symbol = self
                    .gs
                    .symbols
                    .lookup(core_names::well_known_syms::ROOT, *name)
                    .unwrap_or_default();
                let alias = self.global_alias(symbol, *name);
                self.push_binding(current, target, Instruction::Ident(alias), loc);
                current
            }
            Node::Assign { lhs, rhs } => match &lhs.node {
                Node::Local { name } => {
                    let local = self.source_local(*name);
                    let current = self.walk(rhs, current, local);
                    self.push_binding(current, target, Instruction::Ident(local), loc);
                    current
                }
                Node::Field { name } => {
                    let owner = self.gs.symbols.symbol(self.cfg.method).owner;
                    let symbol = self.gs.symbols.lookup(owner, *name).unwrap_or_default();
                    let alias = self.global_alias(symbol, *name);
                    let current = self.walk(rhs, current, alias);
                    self.push_binding(current, target, Instruction::Ident(alias), loc);
                    current
                }
                _ => {
                    // Constant and attribute assignments desugar to sends
                    // upstream; anything else is an unanalyzable lhs.
                    let value = self.temp(well_known::STAT_TEMP);
                    let current = self.walk(rhs, current, value);
                    self.push_binding(current, target, Instruction::Ident(value), loc);
                    current
                }
            },
            Node::InsSeq { stats, expr } => {
                let mut current = current;
                for stat in stats {
                    let discard = self.temp(well_known::STAT_TEMP);
                    current = self.walk(stat, current, discard);
                }
                self.walk(expr, current, target)
            }
            Node::Send {
                recv,
                fun,
                args,
                block,
                rewriter_synthesized,
            } => {
                let recv_local = self.temp(well_known::STAT_TEMP);
                let mut current = self.walk(recv, current, recv_local);
                let mut arg_locals: SmallVec<[LocalRef; 2]> = SmallVec::new();
                for arg in args {
                    let arg_local = self.temp(well_known::STAT_TEMP);
                    current = self.walk(arg, current, arg_local);
                    arg_locals.push(arg_local);
                }
                match block {
                    None => {
                        self.push_binding(
                            current,
                            target,
                            Instruction::Send {
                                recv: recv_local,
                                fun: *fun,
                                args: arg_locals,
                                has_block: false,
                                rewriter_synthesized: *rewriter_synthesized,
                            },
                            loc,
                        );
                        current
                    }
                    Some(block_node) => {
                        if current == BlockId::DEAD {
                            // The receiver or an argument diverged.
                            return BlockId::DEAD;
                        }
                        // Split: header repeatedly dispatches into the block
                        // body (a loop) or proceeds to the continuation.
                        let depth = self.cfg.block(current).outer_loops;
                        let header = self.cfg.fresh_block(depth + 1);
                        let body = self.cfg.fresh_block(depth + 1);
                        let post = self.cfg.fresh_block(depth);
                        self.jump(current, header, loc);
                        self.cond_jump(header, LocalRef::BLOCK_CALL, body, post, loc);

                        let params_local = self.temp(well_known::BLOCK_PRE_CALL_TEMP);
                        self.push_binding(body, params_local, Instruction::LoadYieldParams, block_node.loc);
                        for param in &block_node.params {
                            let param_local = self.source_local(param.name);
                            self.push_binding(
                                body,
                                param_local,
                                Instruction::Ident(params_local),
                                param.loc,
                            );
                        }
                        let block_result = self.temp(well_known::STAT_TEMP);
                        let body_end = self.walk(&block_node.body, body, block_result);
                        self.jump(body_end, header, block_node.loc);

                        self.push_binding(
                            post,
                            target,
                            Instruction::Send {
                                recv: recv_local,
                                fun: *fun,
                                args: arg_locals,
                                has_block: true,
                                rewriter_synthesized: *rewriter_synthesized,
                            },
                            loc,
                        );
                        post
                    }
                }
            }
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                let cond_local = self.temp(well_known::COND_TEMP);
                let cond_end = self.walk(cond, current, cond_local);
                if cond_end == BlockId::DEAD {
                    // The condition itself diverged.
                    return BlockId::DEAD;
                }
                let depth = self.cfg.block(cond_end).outer_loops;
                let then_block = self.cfg.fresh_block(depth);
                let else_block = self.cfg.fresh_block(depth);
                self.cond_jump(cond_end, cond_local, then_block, else_block, loc);
                let then_end = self.walk(then_branch, then_block, target);
                let else_end = self.walk(else_branch, else_block, target);
                if then_end == BlockId::DEAD && else_end == BlockId::DEAD {
                    // Both branches diverge; there is no merge point.
                    return BlockId::DEAD;
                }
                let merge = self.cfg.fresh_block(depth);
                self.jump(then_end, merge, loc);
                self.jump(else_end, merge, loc);
                merge
            }
            Node::While { cond, body } => {
                let depth = self.cfg.block(current).outer_loops;
                let header = self.cfg.fresh_block(depth + 1);
                self.jump(current, header, loc);
                let cond_local = self.temp(well_known::COND_TEMP);
                let cond_end = self.walk(cond, header, cond_local);
                if cond_end == BlockId::DEAD {
                    // The condition diverged; the loop body is unreachable.
                    return BlockId::DEAD;
                }
                let body_block = self.cfg.fresh_block(depth + 1);
                let post = self.cfg.fresh_block(depth);
                self.cond_jump(cond_end, cond_local, body_block, post, loc);

                self.loops.push(LoopScope {
                    next_target: header,
                    break_target: post,
                });
                let body_result = self.temp(well_known::WHILE_TEMP);
                let body_end = self.walk(body, body_block, body_result);
                self.loops.pop();
                self.jump(body_end, header, loc);

                // A while expression evaluates to nil.
                self.push_binding(post, target, Instruction::Literal(core_tree::Value::Nil), loc);
                post
            }
            Node::Return { expr } => {
                let value = self.temp(well_known::RETURN_TEMP);
                let current = match expr {
                    Some(expr) => self.walk(expr, current, value),
                    None => {
                        self.push_binding(current, value, Instruction::Literal(core_tree::Value::Nil), loc);
                        current
                    }
                };
                let ret = self.temp(well_known::FINAL_RETURN);
                self.push_binding(current, ret, Instruction::Return(value), loc);
                self.jump(current, BlockId::DEAD, loc);
                BlockId::DEAD
            }
            Node::Next => match self.loops.last() {
                Some(scope) => {
                    let t = scope.next_target;
                    self.jump(current, t, loc);
                    BlockId::DEAD
                }
                None => {
                    self.report(loc, NO_ENCLOSING_SCOPE, "`next` outside of a loop".to_owned());
                    self.jump(current, BlockId::DEAD, loc);
                    BlockId::DEAD
                }
            },
            Node::Break => match self.loops.last() {
                Some(scope) => {
                    let t = scope.break_target;
                    self.jump(current, t, loc);
                    BlockId::DEAD
                }
                None => {
                    self.report(loc, NO_ENCLOSING_SCOPE, "`break` outside of a loop".to_owned());
                    self.jump(current, BlockId::DEAD, loc);
                    BlockId::DEAD
                }
            },
            Node::Retry => match self.rescues.last() {
                Some(&body_block) => {
                    self.jump(current, body_block, loc);
                    BlockId::DEAD
                }
                None => {
                    self.report(loc, NO_ENCLOSING_SCOPE, "`retry` outside of a rescue block".to_owned());
                    self.jump(current, BlockId::DEAD, loc);
                    BlockId::DEAD
                }
            },
            Node::Rescue {
                body,
                cases,
                else_branch,
                ensure,
            } => {
                let depth = self.cfg.block(current).outer_loops;
                // Whether the body raises is unknowable here, so the body
                // entry is a conditional on the current-exception value.
                let exc = self.temp(well_known::EXCEPTION_VALUE);
                self.push_binding(current, exc, Instruction::GetCurrentException, loc);
                let body_block = self.cfg.fresh_block(depth);
                let handlers_block = self.cfg.fresh_block(depth);
                self.cond_jump(current, exc, body_block, handlers_block, loc);

                let ensure_block = self.cfg.fresh_block(depth);

                // Normal path: body, then else, then ensure.
                self.rescues.push(body_block);
                let body_end = self.walk(body, body_block, target);
                let else_end = self.walk(else_branch, body_end, target);
                self.jump(else_end, ensure_block, loc);

                // Handler chain: test cases in order; an unhandled exception
                // still runs ensure.
                let mut chain = handlers_block;
                let handler_exc = self.temp(well_known::RESCUE_TEMP);
                self.push_binding(chain, handler_exc, Instruction::GetCurrentException, loc);
                for case in cases {
                    let case_body = self.cfg.fresh_block(depth);
                    let no_match = self.cfg.fresh_block(depth);
                    self.cond_jump(chain, handler_exc, case_body, no_match, case.loc);
                    let mut case_current = case_body;
                    if let Some(var) = case.var {
                        let var_local = self.source_local(var);
                        self.push_binding(case_current, var_local, Instruction::Ident(handler_exc), case.loc);
                    }
                    case_current = self.walk(&case.body, case_current, target);
                    self.jump(case_current, ensure_block, case.loc);
                    chain = no_match;
                }
                self.jump(chain, ensure_block, loc);
                self.rescues.pop();

                let ensure_result = self.temp(well_known::STAT_TEMP);
                self.walk(ensure, ensure_block, ensure_result)
            }
            Node::ArrayLit(items) => {
                let mut current = current;
                let mut elems: SmallVec<[LocalRef; 4]> = SmallVec::new();
                for item in items {
                    let elem = self.temp(well_known::STAT_TEMP);
                    current = self.walk(item, current, elem);
                    elems.push(elem);
                }
                self.push_binding(
                    current,
                    target,
                    Instruction::Intrinsic {
                        op: IntrinsicOp::MakeArray,
                        args: elems,
                    },
                    loc,
                );
                current
            }
            Node::HashLit(pairs) => {
                let mut current = current;
                let mut elems: SmallVec<[LocalRef; 4]> = SmallVec::new();
                for (key, value) in pairs {
                    let k = self.temp(well_known::STAT_TEMP);
                    current = self.walk(key, current, k);
                    elems.push(k);
                    let v = self.temp(well_known::STAT_TEMP);
                    current = self.walk(value, current, v);
                    elems.push(v);
                }
                self.push_binding(
                    current,
                    target,
                    Instruction::Intrinsic {
                        op: IntrinsicOp::MakeHash,
                        args: elems,
                    },
                    loc,
                );
                current
            }
            // Nested definitions are the namer's concern; as expressions
            // they evaluate to nil.
            Node::ClassDef { .. } | Node::MethodDef { .. } => {
                self.push_binding(current, target, Instruction::Literal(core_tree::Value::Nil), loc);
                current
            }
        }
    }
}
