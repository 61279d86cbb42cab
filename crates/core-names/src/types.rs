//! The type representation used by symbols and inference.
//!
//! Deliberately nominal and small: gradual typing does the heavy lifting via
//! `Untyped`, which is a subtype and supertype of everything. Unions are kept
//! flattened, deduplicated, and sorted so structural equality is meaningful.

use crate::symbols::{SymbolRef, SymbolTable, well_known_syms};
use crate::NameTable;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Ty {
    /// The gradual type: compatible with everything in both directions.
    Untyped,
    /// The empty type; value of `return`/`raise` expressions and the input
    /// expected by absurdity checks.
    Bottom,
    /// A result type that callers may not observe.
    Void,
    /// An instance of a class, including the built-in literal classes.
    Instance(SymbolRef),
    /// Flattened, deduplicated, sorted by symbol id.
    Union(Box<[Ty]>),
}

impl Ty {
    pub fn nil() -> Ty {
        Ty::Instance(well_known_syms::NIL_CLASS)
    }

    pub fn integer() -> Ty {
        Ty::Instance(well_known_syms::INTEGER)
    }

    pub fn float() -> Ty {
        Ty::Instance(well_known_syms::FLOAT)
    }

    pub fn string() -> Ty {
        Ty::Instance(well_known_syms::STRING)
    }

    pub fn sym() -> Ty {
        Ty::Instance(well_known_syms::SYMBOL)
    }

    pub fn true_class() -> Ty {
        Ty::Instance(well_known_syms::TRUE_CLASS)
    }

    pub fn false_class() -> Ty {
        Ty::Instance(well_known_syms::FALSE_CLASS)
    }

    pub fn boolean() -> Ty {
        Ty::union_of(vec![Ty::true_class(), Ty::false_class()])
    }

    pub fn is_untyped(&self) -> bool {
        matches!(self, Ty::Untyped)
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Ty::Bottom)
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Ty::Instance(sym) if *sym == well_known_syms::NIL_CLASS)
    }

    /// Build a union, flattening nested unions, dropping `Bottom`, and
    /// deduplicating. A union of one collapses to its member; `Untyped`
    /// swallows the whole union.
    pub fn union_of(members: Vec<Ty>) -> Ty {
        let mut flat: Vec<Ty> = Vec::with_capacity(members.len());
        let mut stack = members;
        stack.reverse();
        while let Some(ty) = stack.pop() {
            match ty {
                Ty::Untyped => return Ty::Untyped,
                Ty::Bottom => {}
                Ty::Union(inner) => stack.extend(inner.into_vec()),
                other => {
                    if !flat.contains(&other) {
                        flat.push(other);
                    }
                }
            }
        }
        match flat.len() {
            0 => Ty::Bottom,
            1 => flat.pop().unwrap(),
            _ => {
                flat.sort_by_key(Ty::sort_key);
                Ty::Union(flat.into_boxed_slice())
            }
        }
    }

    fn sort_key(&self) -> u64 {
        match self {
            Ty::Untyped => 0,
            Ty::Bottom => 1,
            Ty::Void => 2,
            Ty::Instance(sym) => 16 + sym.id() as u64,
            Ty::Union(_) => u64::MAX,
        }
    }

    /// Nominal subtyping with gradual holes. `Untyped` is compatible in both
    /// directions; `Bottom` is a subtype of everything; `Void` absorbs any
    /// result type.
    pub fn is_subtype_of(&self, other: &Ty, symbols: &SymbolTable) -> bool {
        match (self, other) {
            (Ty::Untyped, _) | (_, Ty::Untyped) => true,
            (Ty::Bottom, _) => true,
            (_, Ty::Void) => true,
            (Ty::Union(members), _) => members.iter().all(|m| m.is_subtype_of(other, symbols)),
            (_, Ty::Union(members)) => members.iter().any(|m| self.is_subtype_of(m, symbols)),
            (Ty::Instance(a), Ty::Instance(b)) => symbols.linearization(*a).contains(b),
            (_, Ty::Bottom) => false,
            (Ty::Void, _) => false,
        }
    }

    /// Least upper bound, approximated: subtype collapses to the supertype,
    /// otherwise a union.
    pub fn join(self, other: Ty, symbols: &SymbolTable) -> Ty {
        if self == other {
            return self;
        }
        if self.is_untyped() || other.is_untyped() {
            return Ty::Untyped;
        }
        if self.is_subtype_of(&other, symbols) {
            return other;
        }
        if other.is_subtype_of(&self, symbols) {
            return self;
        }
        Ty::union_of(vec![self, other])
    }

    pub fn show(&self, names: &NameTable, symbols: &SymbolTable) -> String {
        match self {
            Ty::Untyped => "T.untyped".to_owned(),
            Ty::Bottom => "T.noreturn".to_owned(),
            Ty::Void => "void".to_owned(),
            Ty::Instance(sym) => names.show(symbols.symbol(*sym).name),
            Ty::Union(members) => {
                let parts: Vec<String> = members.iter().map(|m| m.show(names, symbols)).collect();
                if members.len() == 2 && members.iter().any(Ty::is_nil) {
                    let other = members.iter().find(|m| !m.is_nil()).unwrap();
                    format!("T.nilable({})", other.show(names, symbols))
                } else {
                    format!("T.any({})", parts.join(", "))
                }
            }
        }
    }
}
