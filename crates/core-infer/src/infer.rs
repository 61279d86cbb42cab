//! Flow-sensitive type propagation over one method's CFG.
//!
//! Blocks are visited in forward topological order; each block's entry
//! environment is the join of its processed predecessors' exit environments,
//! restricted to the block's synthesized arguments. The pass is single-shot:
//! loop back edges are not iterated. Instead, loop-carried locals are
//! *pinned* to the type they had on loop entry, and a write inside the loop
//! that would change the type is an error. This is what makes the
//! single-pass approach sound, and it is why the liveness layer may not
//! prune loop-deep dead stores.

use crate::error_classes;
use core_cfg::{BlockId, Cfg, Instruction, IntrinsicOp, LocalRef};
use core_errors::{Error, ErrorLine, ErrorSection};
use core_loc::{Loc, LocOffsets};
use core_names::{ArgFlags, NameRef, SymbolRef, Ty, well_known_syms};
use core_query::QueryResponse;
use core_state::GlobalState;
use smallvec::SmallVec;

#[derive(Debug, Clone, PartialEq)]
struct TypeAndOrigins {
    ty: Ty,
    origins: SmallVec<[Loc; 2]>,
}

impl TypeAndOrigins {
    fn new(ty: Ty, origin: Loc) -> Self {
        let mut origins = SmallVec::new();
        if origin.exists() {
            origins.push(origin);
        }
        TypeAndOrigins { ty, origins }
    }
}

type Env = ahash::AHashMap<LocalRef, TypeAndOrigins>;

/// What inference learned about a method, whether or not it carried a sig.
#[derive(Debug, Clone, PartialEq)]
pub struct InferredSig {
    pub params: Vec<(NameRef, Ty)>,
    pub ret: Ty,
}

pub fn infer_method(gs: &GlobalState, cfg: &Cfg) -> InferredSig {
    let mut ctx = InferCtx {
        gs,
        cfg,
        exit_envs: vec![None; cfg.max_block_id()],
        returned: Ty::Bottom,
    };
    ctx.emit_method_def_response();

    let order: Vec<BlockId> = cfg.forwards_topo_sort.iter().rev().copied().collect();
    for bb in order {
        if bb == BlockId::DEAD {
            continue;
        }
        ctx.process_block(bb);
    }

    let method = gs.symbols.symbol(cfg.method);
    let params: Vec<(NameRef, Ty)> = method
        .arguments
        .iter()
        .filter(|arg| !arg.flags.contains(ArgFlags::BLOCK))
        .map(|arg| (arg.name, arg.ty.clone().unwrap_or(Ty::Untyped)))
        .collect();
    let ret = match &method.result_type {
        Some(declared) => declared.clone(),
        None if ctx.returned.is_bottom() => Ty::nil(),
        None => ctx.returned.clone(),
    };
    InferredSig { params, ret }
}

struct InferCtx<'a> {
    gs: &'a GlobalState,
    cfg: &'a Cfg,
    exit_envs: Vec<Option<Env>>,
    /// Join of every returned value's type.
    returned: Ty,
}

impl<'a> InferCtx<'a> {
    fn loc(&self, offsets: LocOffsets) -> Loc {
        Loc::new(self.cfg.file, offsets)
    }

    fn emit_method_def_response(&self) {
        let query = &self.gs.lsp_query;
        if query.is_empty() {
            return;
        }
        let method = self.gs.symbols.symbol(self.cfg.method);
        let def_loc = method.loc();
        if query.matches_loc(def_loc) || query.matches_symbol(self.cfg.method) {
            self.gs.push_query_response(QueryResponse::MethodDef {
                loc: def_loc,
                method: self.cfg.method,
                ret: method.result_type.clone().unwrap_or(Ty::Untyped),
            });
        }
    }

    fn entry_env(&self, bb: BlockId) -> Env {
        let block = self.cfg.block(bb);
        let mut env = Env::new();
        for &arg in &block.args {
            let mut joined: Option<TypeAndOrigins> = None;
            for &parent in &block.back_edges {
                // Loop back edges are unprocessed here; the forward
                // predecessors pin the type.
                let Some(parent_env) = &self.exit_envs[parent.index()] else {
                    continue;
                };
                let Some(incoming) = parent_env.get(&arg) else {
                    continue;
                };
                joined = Some(match joined {
                    None => incoming.clone(),
                    Some(mut acc) => {
                        let ty = std::mem::replace(&mut acc.ty, Ty::Untyped);
                        acc.ty = ty.join(incoming.ty.clone(), &self.gs.symbols);
                        for origin in &incoming.origins {
                            if !acc.origins.contains(origin) {
                                acc.origins.push(*origin);
                            }
                        }
                        acc
                    }
                });
            }
            env.insert(
                arg,
                joined.unwrap_or_else(|| TypeAndOrigins::new(Ty::Untyped, Loc::none())),
            );
        }
        env
    }

    fn process_block(&mut self, bb: BlockId) {
        let mut env = self.entry_env(bb);
        let cfg: &'a Cfg = self.cfg;
        for binding in &cfg.block(bb).bindings {
            let ty = self.infer_instruction(&env, &binding.value, binding.loc);
            self.record(&mut env, bb, binding.bind, ty, binding.loc);
        }
        self.exit_envs[bb.index()] = Some(env);
    }

    /// Write `ty` into the environment, honoring the loop pin: a local that
    /// entered the loop from outside must keep its type across iterations.
    fn record(&self, env: &mut Env, bb: BlockId, bind: LocalRef, ty: Ty, loc: LocOffsets) {
        let depth = self.cfg.block(bb).outer_loops;
        let pinned_outside = (bind.id() as usize) < self.cfg.min_loops.len()
            && self.cfg.min_loops[bind.id() as usize] < depth;
        if pinned_outside {
            if let Some(existing) = env.get(&bind) {
                if !existing.ty.is_untyped() && !ty.is_subtype_of(&existing.ty, &self.gs.symbols) {
                    let names = &self.gs.names;
                    let symbols = &self.gs.symbols;
                    let error = Error::new(
                        self.loc(loc),
                        error_classes::PINNED_TYPE_CHANGED,
                        format!(
                            "Changing the type of a variable in a loop is not permitted: `{}` is a `{}` outside the loop",
                            self.cfg.local(bind).show(names),
                            existing.ty.show(names, symbols),
                        ),
                    )
                    .with_section(ErrorSection {
                        header: format!("Assigned a `{}` here:", ty.show(names, symbols)),
                        lines: vec![ErrorLine {
                            loc: self.loc(loc),
                            message: String::new(),
                        }],
                    });
                    self.gs.report_error(error);
                    // Keep the pinned type so downstream errors do not cascade.
                    return;
                }
            }
        }
        env.insert(bind, TypeAndOrigins::new(ty, self.loc(loc)));
    }

    fn lookup(&self, env: &Env, local: LocalRef) -> TypeAndOrigins {
        env.get(&local)
            .cloned()
            .unwrap_or_else(|| TypeAndOrigins::new(Ty::Untyped, Loc::none()))
    }

    fn infer_instruction(&mut self, env: &Env, value: &Instruction, loc: LocOffsets) -> Ty {
        let query = &self.gs.lsp_query;
        match value {
            Instruction::Ident(source) => {
                let incoming = self.lookup(env, *source);
                // An unresolved global surfaces at its use site.
                if let Some(target) = self.cfg.alias_targets.get(source) {
                    if !target.exists() && loc.exists() {
                        self.gs.report_error(Error::new(
                            self.loc(loc),
                            error_classes::UNRESOLVED_CONSTANT,
                            format!(
                                "Unable to resolve constant `{}`",
                                self.cfg.local(*source).show(&self.gs.names)
                            ),
                        ));
                    }
                }
                if !query.is_empty() && loc.exists() {
                    let variable = self.cfg.local(*source);
                    if query.matches_loc(self.loc(loc)) || query.matches_var(self.cfg.method, variable) {
                        self.gs.push_query_response(QueryResponse::Ident {
                            loc: self.loc(loc),
                            variable,
                            ty: incoming.ty.clone(),
                            origins: incoming.origins.iter().copied().collect(),
                        });
                    }
                }
                incoming.ty
            }
            Instruction::Alias(symbol) => {
                if symbol.exists() {
                    let data = self.gs.symbols.symbol(*symbol);
                    if !query.is_empty() && query.matches_symbol(*symbol) {
                        self.gs.push_query_response(QueryResponse::Constant {
                            loc: data.loc(),
                            symbol: *symbol,
                            ty: data.result_type.clone().unwrap_or(Ty::Untyped),
                        });
                    }
                    data.result_type.clone().unwrap_or(Ty::Untyped)
                } else {
                    Ty::Untyped
                }
            }
            Instruction::Literal(value) => {
                let ty = literal_type(value);
                if !query.is_empty() && loc.exists() && query.matches_loc(self.loc(loc)) {
                    self.gs.push_query_response(QueryResponse::Literal {
                        loc: self.loc(loc),
                        ty: ty.clone(),
                    });
                }
                ty
            }
            Instruction::Send {
                recv,
                fun,
                args,
                has_block: _,
                rewriter_synthesized,
            } => {
                let recv_ty = self.lookup(env, *recv).ty;
                let (method, result) = self.infer_send(&recv_ty, *fun, args, env, loc, *rewriter_synthesized);
                if !query.is_empty() && loc.exists() && !rewriter_synthesized {
                    let matches = query.matches_loc(self.loc(loc))
                        || method.is_some_and(|m| query.matches_symbol(m));
                    if matches {
                        self.gs.push_query_response(QueryResponse::Send {
                            loc: self.loc(loc),
                            receiver: recv_ty,
                            fun: *fun,
                            method: method.unwrap_or_default(),
                            ret: result.clone(),
                        });
                    }
                }
                result
            }
            Instruction::LoadArg(index) => {
                let method = self.gs.symbols.symbol(self.cfg.method);
                method
                    .arguments
                    .get(*index as usize)
                    .and_then(|arg| arg.ty.clone())
                    .unwrap_or(Ty::Untyped)
            }
            Instruction::LoadSelf => {
                let owner = self.gs.symbols.symbol(self.cfg.method).owner;
                if owner.exists() && owner != well_known_syms::ROOT {
                    Ty::Instance(owner)
                } else {
                    Ty::Untyped
                }
            }
            Instruction::LoadYieldParams => Ty::Untyped,
            Instruction::Return(value) => {
                let returned = self.lookup(env, *value);
                let method = self.gs.symbols.symbol(self.cfg.method);
                if let Some(declared) = &method.result_type {
                    if !matches!(declared, Ty::Void)
                        && !returned.ty.is_subtype_of(declared, &self.gs.symbols)
                    {
                        let names = &self.gs.names;
                        let symbols = &self.gs.symbols;
                        let mut error = Error::new(
                            self.loc(loc),
                            error_classes::RETURN_TYPE_MISMATCH,
                            format!(
                                "Expected `{}` but found `{}` for method result type",
                                declared.show(names, symbols),
                                returned.ty.show(names, symbols),
                            ),
                        );
                        if !returned.origins.is_empty() {
                            error = error.with_section(ErrorSection {
                                header: "Got value originating from:".to_owned(),
                                lines: returned
                                    .origins
                                    .iter()
                                    .map(|&origin| ErrorLine {
                                        loc: origin,
                                        message: String::new(),
                                    })
                                    .collect(),
                            });
                        }
                        self.gs.report_error(error);
                    }
                }
                self.returned = std::mem::replace(&mut self.returned, Ty::Bottom)
                    .join(returned.ty, &self.gs.symbols);
                Ty::Bottom
            }
            Instruction::TAbsurd(value) => {
                let observed = self.lookup(env, *value);
                if !observed.ty.is_bottom() {
                    self.gs.report_error(Error::new(
                        self.loc(loc),
                        error_classes::NOT_ABSURD,
                        format!(
                            "Control flow could reach `T.absurd` because the type `{}` wasn't handled",
                            observed.ty.show(&self.gs.names, &self.gs.symbols)
                        ),
                    ));
                }
                Ty::Bottom
            }
            Instruction::GetCurrentException => Ty::Instance(well_known_syms::STANDARD_ERROR),
            Instruction::Intrinsic { op, .. } => match op {
                // The lattice has no generics; collections stay gradual.
                IntrinsicOp::MakeArray | IntrinsicOp::MakeHash => Ty::Untyped,
            },
        }
    }

    /// Resolve and check one send against a concrete receiver type.
    fn infer_send(
        &self,
        recv_ty: &Ty,
        fun: NameRef,
        args: &[LocalRef],
        env: &Env,
        loc: LocOffsets,
        rewriter_synthesized: bool,
    ) -> (Option<SymbolRef>, Ty) {
        match recv_ty {
            Ty::Untyped | Ty::Void => (None, Ty::Untyped),
            Ty::Bottom => (None, Ty::Bottom),
            Ty::Union(members) => {
                let mut result = Ty::Bottom;
                let mut resolved = None;
                for member in members.iter() {
                    let (method, ty) = self.infer_send(member, fun, args, env, loc, rewriter_synthesized);
                    resolved = resolved.or(method);
                    result = result.join(ty, &self.gs.symbols);
                }
                (resolved, result)
            }
            Ty::Instance(class) => {
                let Some(method) = self.gs.symbols.resolve_method(*class, fun) else {
                    if !rewriter_synthesized {
                        self.gs.report_error(Error::new(
                            self.loc(loc),
                            error_classes::UNKNOWN_METHOD,
                            format!(
                                "Method `{}` does not exist on `{}`",
                                self.gs.names.show(fun),
                                self.gs.names.show(self.gs.symbols.symbol(*class).name),
                            ),
                        ));
                    }
                    return (None, Ty::Untyped);
                };
                self.check_arity_and_args(method, args, env, loc);
                let result = self
                    .gs
                    .symbols
                    .symbol(method)
                    .result_type
                    .clone()
                    .unwrap_or(Ty::Untyped);
                (Some(method), result)
            }
        }
    }

    fn check_arity_and_args(&self, method: SymbolRef, args: &[LocalRef], env: &Env, loc: LocOffsets) {
        let data = self.gs.symbols.symbol(method);
        let positional: Vec<&core_names::ArgInfo> = data
            .arguments
            .iter()
            .filter(|a| !a.flags.intersects(ArgFlags::BLOCK | ArgFlags::KEYWORD))
            .collect();
        let has_rest = positional.iter().any(|a| a.flags.contains(ArgFlags::REPEATED));
        let required = positional
            .iter()
            .filter(|a| !a.flags.intersects(ArgFlags::DEFAULT | ArgFlags::REPEATED))
            .count();
        let max = if has_rest { usize::MAX } else { positional.len() };

        if args.len() < required || args.len() > max {
            let expected = if has_rest {
                format!("{required}+")
            } else if required == positional.len() {
                format!("{required}")
            } else {
                format!("{required}..{}", positional.len())
            };
            let error = Error::new(
                self.loc(loc),
                error_classes::ARITY_MISMATCH,
                format!(
                    "Wrong number of arguments for `{}`: expected {expected}, got {}",
                    self.gs.names.show(data.name),
                    args.len()
                ),
            )
            .with_section(ErrorSection {
                header: "Method defined here:".to_owned(),
                lines: vec![ErrorLine {
                    loc: data.loc(),
                    message: String::new(),
                }],
            });
            self.gs.report_error(error);
            return;
        }

        for (declared, &sent) in positional.iter().zip(args.iter()) {
            let Some(expected) = &declared.ty else { continue };
            let observed = self.lookup(env, sent);
            if !observed.ty.is_subtype_of(expected, &self.gs.symbols) {
                self.gs.report_error(Error::new(
                    self.loc(loc),
                    error_classes::ARGUMENT_MISMATCH,
                    format!(
                        "Expected `{}` but found `{}` for argument `{}`",
                        expected.show(&self.gs.names, &self.gs.symbols),
                        observed.ty.show(&self.gs.names, &self.gs.symbols),
                        self.gs.names.show(declared.name),
                    ),
                ));
            }
        }
    }
}

fn literal_type(value: &core_tree::Value) -> Ty {
    match value {
        core_tree::Value::Nil => Ty::nil(),
        core_tree::Value::True => Ty::true_class(),
        core_tree::Value::False => Ty::false_class(),
        core_tree::Value::Integer(_) => Ty::integer(),
        core_tree::Value::Float(_) => Ty::float(),
        core_tree::Value::Str(_) => Ty::string(),
        core_tree::Value::Sym(_) => Ty::sym(),
    }
}
