//! Localized LSP questions and the typed answers analysis emits for them.
//!
//! A [`Query`] narrows an analysis run to one position, symbol, or local;
//! the traversals in later phases call the `matches_*` predicates and push a
//! [`QueryResponse`] for every hit. Responses travel through the same queue
//! as errors and are drained separately by the flusher layer, which applies
//! the ordering implemented in [`QueryResponse::specificity`].

use core_loc::Loc;
use core_names::{LocalVariable, NameRef, SymbolRef, Ty};

/// What an analysis run is being asked about. `Empty` disables collection
/// entirely, which also re-enables optimizations (dead-store elimination)
/// that would otherwise discard queryable bindings.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Query {
    #[default]
    Empty,
    /// What is at this position?
    Loc(Loc),
    /// All references to this symbol.
    Symbol(SymbolRef),
    /// All uses of one local inside one method.
    Var {
        owner: SymbolRef,
        /// Loc of the method definition enclosing the variable.
        enclosing: Loc,
        variable: LocalVariable,
    },
    /// Emit a signature autocorrect for this method.
    SuggestSig(SymbolRef),
}

impl Query {
    pub fn is_empty(&self) -> bool {
        matches!(self, Query::Empty)
    }

    /// True when `loc` covers the queried position.
    pub fn matches_loc(&self, loc: Loc) -> bool {
        match self {
            Query::Loc(target) => loc.contains(*target),
            _ => false,
        }
    }

    pub fn matches_symbol(&self, symbol: SymbolRef) -> bool {
        matches!(self, Query::Symbol(target) if *target == symbol)
    }

    pub fn matches_var(&self, owner: SymbolRef, variable: LocalVariable) -> bool {
        match self {
            Query::Var {
                owner: target_owner,
                variable: target_var,
                ..
            } => variable.exists() && *target_owner == owner && *target_var == variable,
            _ => false,
        }
    }

    pub fn matches_suggest_sig(&self, method: SymbolRef) -> bool {
        matches!(self, Query::SuggestSig(target) if *target == method)
    }
}

/// A single text edit attached to an `Edit` response (autocomplete and sig
/// suggestions). Plain data; the error layer owns full autocorrects.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEdit {
    pub loc: Loc,
    pub replacement: String,
}

/// One typed answer to the active query.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Send {
        loc: Loc,
        receiver: Ty,
        fun: NameRef,
        method: SymbolRef,
        ret: Ty,
    },
    Ident {
        loc: Loc,
        variable: LocalVariable,
        ty: Ty,
        /// Where the value flowing into this use was produced.
        origins: Vec<Loc>,
    },
    Literal {
        loc: Loc,
        ty: Ty,
    },
    Constant {
        loc: Loc,
        symbol: SymbolRef,
        ty: Ty,
    },
    Field {
        loc: Loc,
        symbol: SymbolRef,
        ty: Ty,
    },
    Definition {
        loc: Loc,
        symbol: SymbolRef,
    },
    MethodDef {
        loc: Loc,
        method: SymbolRef,
        ret: Ty,
    },
    Edit {
        loc: Loc,
        title: String,
        edits: Vec<ResponseEdit>,
    },
}

impl QueryResponse {
    /// The loc of the term this response describes; drives response ordering.
    pub fn term_loc(&self) -> Loc {
        match self {
            QueryResponse::Send { loc, .. }
            | QueryResponse::Ident { loc, .. }
            | QueryResponse::Literal { loc, .. }
            | QueryResponse::Constant { loc, .. }
            | QueryResponse::Field { loc, .. }
            | QueryResponse::Definition { loc, .. }
            | QueryResponse::MethodDef { loc, .. }
            | QueryResponse::Edit { loc, .. } => *loc,
        }
    }

    /// Tie-break rank when two responses cover the same range: larger is
    /// more specific and sorts first.
    pub fn specificity(&self) -> u16 {
        match self {
            // Only reported for autocomplete; takes precedence over
            // anything else reported at the position.
            QueryResponse::Edit { .. } => 8,
            QueryResponse::MethodDef { .. } => 7,
            QueryResponse::Send { .. } => 6,
            QueryResponse::Field { .. } => 5,
            QueryResponse::Ident { .. } => 4,
            QueryResponse::Constant { .. } => 3,
            QueryResponse::Literal { .. } => 2,
            QueryResponse::Definition { .. } => 1,
        }
    }
}
