//! The global symbol table.
//!
//! Symbols form a tree through `owner`; mixins and the superclass edge form a
//! DAG that [`SymbolTable::linearization`] resolves into a flat ancestor
//! order, computed exactly once per class and immutable afterwards.

use crate::names::{NameRef, names};
use crate::types::Ty;
use crate::{NameTable, TableFrozen};
use core_loc::Loc;
use smallvec::SmallVec;

/// Handle into the [`SymbolTable`]. Id 0 is "no symbol".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SymbolRef(u32);

impl SymbolRef {
    pub fn from_raw(id: u32) -> Self {
        SymbolRef(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn exists(self) -> bool {
        self.0 != 0
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct SymbolFlags: u16 {
        const CLASS                = 1 << 0;
        const MODULE               = 1 << 1;
        const METHOD               = 1 << 2;
        const FIELD                = 1 << 3;
        const TYPE_MEMBER          = 1 << 4;
        const TYPE_ARGUMENT        = 1 << 5;
        const ABSTRACT             = 1 << 6;
        const OVERRIDE             = 1 << 7;
        const FINAL                = 1 << 8;
        /// Synthesized by a rewriter pass rather than written in source.
        /// Ignored when deciding whether a class defines behavior.
        const REWRITER_SYNTHESIZED = 1 << 9;
        /// A method argument-list entry standing in for an omitted block arg.
        const SYNTHETIC            = 1 << 10;
    }
}

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct ArgFlags: u8 {
        const KEYWORD   = 1 << 0;
        const BLOCK     = 1 << 1;
        const REPEATED  = 1 << 2;
        const DEFAULT   = 1 << 3;
        const SYNTHETIC = 1 << 4;
    }
}

/// One entry in a method's ordered argument list.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgInfo {
    pub name: NameRef,
    pub flags: ArgFlags,
    pub ty: Option<Ty>,
}

impl ArgInfo {
    pub fn positional(name: NameRef) -> Self {
        ArgInfo {
            name,
            flags: ArgFlags::empty(),
            ty: None,
        }
    }

    pub fn synthetic_block() -> Self {
        ArgInfo {
            name: names::BLOCK_ARG,
            flags: ArgFlags::BLOCK | ArgFlags::SYNTHETIC,
            ty: None,
        }
    }

    pub fn is_block(&self) -> bool {
        self.flags.contains(ArgFlags::BLOCK)
    }
}

#[derive(Debug)]
pub struct Symbol {
    pub owner: SymbolRef,
    pub name: NameRef,
    pub flags: SymbolFlags,
    /// Ordered member list: methods/fields/type members for classes.
    pub members: Vec<SymbolRef>,
    /// Ordered argument list for methods. Invariant: once sealed, the last
    /// element is a block argument, synthetic if the source omitted one.
    pub arguments: Vec<ArgInfo>,
    pub mixins: SmallVec<[SymbolRef; 2]>,
    pub superclass: Option<SymbolRef>,
    pub result_type: Option<Ty>,
    pub locs: SmallVec<[Loc; 2]>,
    linearization: std::sync::OnceLock<Box<[SymbolRef]>>,
}

impl Symbol {
    fn new(owner: SymbolRef, name: NameRef, flags: SymbolFlags) -> Self {
        Symbol {
            owner,
            name,
            flags,
            members: Vec::new(),
            arguments: Vec::new(),
            mixins: SmallVec::new(),
            superclass: None,
            result_type: None,
            locs: SmallVec::new(),
            linearization: std::sync::OnceLock::new(),
        }
    }

    pub fn is_class_or_module(&self) -> bool {
        self.flags.intersects(SymbolFlags::CLASS | SymbolFlags::MODULE)
    }

    pub fn is_method(&self) -> bool {
        self.flags.contains(SymbolFlags::METHOD)
    }

    pub fn loc(&self) -> Loc {
        self.locs.first().copied().unwrap_or_else(Loc::none)
    }
}

/// Well-known symbols entered by [`SymbolTable::new`] in a fixed order.
pub mod well_known_syms {
    use super::SymbolRef;

    pub const ROOT: SymbolRef = SymbolRef(1);
    pub const OBJECT: SymbolRef = SymbolRef(2);
    pub const INTEGER: SymbolRef = SymbolRef(3);
    pub const FLOAT: SymbolRef = SymbolRef(4);
    pub const STRING: SymbolRef = SymbolRef(5);
    pub const SYMBOL: SymbolRef = SymbolRef(6);
    pub const NIL_CLASS: SymbolRef = SymbolRef(7);
    pub const TRUE_CLASS: SymbolRef = SymbolRef(8);
    pub const FALSE_CLASS: SymbolRef = SymbolRef(9);
    pub const STANDARD_ERROR: SymbolRef = SymbolRef(10);
}

#[derive(Debug)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    member_index: ahash::AHashMap<(SymbolRef, NameRef), SymbolRef>,
    frozen: bool,
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolTable {
    pub fn new() -> Self {
        use crate::names::names as n;
        let mut table = SymbolTable {
            symbols: vec![Symbol::new(SymbolRef(0), NameRef::default(), SymbolFlags::empty())],
            member_index: ahash::AHashMap::new(),
            frozen: false,
        };
        let root = table
            .enter_symbol(SymbolRef(0), n::ROOT, SymbolFlags::CLASS)
            .unwrap();
        assert_eq!(root, well_known_syms::ROOT);
        let core_classes = [
            (well_known_syms::OBJECT, n::OBJECT),
            (well_known_syms::INTEGER, n::INTEGER),
            (well_known_syms::FLOAT, n::FLOAT),
            (well_known_syms::STRING, n::STRING),
            (well_known_syms::SYMBOL, n::SYMBOL_CLASS),
            (well_known_syms::NIL_CLASS, n::NIL_CLASS),
            (well_known_syms::TRUE_CLASS, n::TRUE_CLASS),
            (well_known_syms::FALSE_CLASS, n::FALSE_CLASS),
            (well_known_syms::STANDARD_ERROR, n::STANDARD_ERROR),
        ];
        for (expected, name) in core_classes {
            let entered = table.enter_symbol(root, name, SymbolFlags::CLASS).unwrap();
            assert_eq!(entered, expected, "core class entered out of order");
            if expected != well_known_syms::OBJECT {
                table.set_super_class(entered, well_known_syms::OBJECT).unwrap();
            }
        }
        table
    }

    fn check_unfrozen(&self) -> Result<(), TableFrozen> {
        if self.frozen {
            Err(TableFrozen { table: "symbol" })
        } else {
            Ok(())
        }
    }

    /// Idempotent. After freezing the table is safe to share across worker
    /// threads without locks; all mutating operations fail.
    pub fn freeze(&mut self) {
        if !self.frozen {
            tracing::debug!(target: "tables", symbols = self.symbols.len(), "freezing symbol table");
            self.frozen = true;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Enter a symbol, or return the existing one with the same owner and
    /// name. Flags of an existing symbol are widened, not replaced.
    pub fn enter_symbol(
        &mut self,
        owner: SymbolRef,
        name: NameRef,
        flags: SymbolFlags,
    ) -> Result<SymbolRef, TableFrozen> {
        if let Some(&existing) = self.member_index.get(&(owner, name)) {
            if !self.symbols[existing.0 as usize].flags.contains(flags) {
                self.check_unfrozen()?;
                self.symbols[existing.0 as usize].flags |= flags;
            }
            return Ok(existing);
        }
        self.check_unfrozen()?;
        let sym = SymbolRef(self.symbols.len() as u32);
        self.symbols.push(Symbol::new(owner, name, flags));
        self.member_index.insert((owner, name), sym);
        if owner.exists() {
            self.symbols[owner.0 as usize].members.push(sym);
        }
        Ok(sym)
    }

    pub fn lookup(&self, owner: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        self.member_index.get(&(owner, name)).copied()
    }

    pub fn symbol(&self, sym: SymbolRef) -> &Symbol {
        &self.symbols[sym.0 as usize]
    }

    fn symbol_mut(&mut self, sym: SymbolRef) -> Result<&mut Symbol, TableFrozen> {
        self.check_unfrozen()?;
        Ok(&mut self.symbols[sym.0 as usize])
    }

    pub fn add_argument(&mut self, method: SymbolRef, arg: ArgInfo) -> Result<(), TableFrozen> {
        let data = self.symbol_mut(method)?;
        debug_assert!(data.is_method(), "arguments belong to methods");
        // Keep the block argument last if one has already been sealed in.
        match data.arguments.last() {
            Some(last) if last.is_block() && !arg.is_block() => {
                let idx = data.arguments.len() - 1;
                data.arguments.insert(idx, arg);
            }
            _ => data.arguments.push(arg),
        }
        Ok(())
    }

    /// Guarantee the trailing-block-argument invariant for `method`.
    pub fn seal_arguments(&mut self, method: SymbolRef) -> Result<(), TableFrozen> {
        let data = self.symbol_mut(method)?;
        if !data.arguments.last().is_some_and(ArgInfo::is_block) {
            data.arguments.push(ArgInfo::synthetic_block());
        }
        Ok(())
    }

    pub fn add_mixin(&mut self, class: SymbolRef, module: SymbolRef) -> Result<(), TableFrozen> {
        let data = self.symbol_mut(class)?;
        debug_assert!(
            data.linearization.get().is_none(),
            "mixin added after linearization was computed"
        );
        if !data.mixins.contains(&module) {
            data.mixins.push(module);
        }
        Ok(())
    }

    pub fn set_super_class(&mut self, class: SymbolRef, superclass: SymbolRef) -> Result<(), TableFrozen> {
        let data = self.symbol_mut(class)?;
        debug_assert!(
            data.linearization.get().is_none(),
            "superclass set after linearization was computed"
        );
        data.superclass = Some(superclass);
        Ok(())
    }

    pub fn set_result_type(&mut self, sym: SymbolRef, ty: Ty) -> Result<(), TableFrozen> {
        self.symbol_mut(sym)?.result_type = Some(ty);
        Ok(())
    }

    pub fn add_loc(&mut self, sym: SymbolRef, loc: Loc) -> Result<(), TableFrozen> {
        self.symbol_mut(sym)?.locs.push(loc);
        Ok(())
    }

    /// Ancestors of `class` in method-resolution order, starting with the
    /// class itself: own mixins in reverse declaration order, then the
    /// superclass chain. Computed once; later graph edits are rejected by
    /// the debug assertions in `add_mixin`/`set_super_class`.
    pub fn linearization(&self, class: SymbolRef) -> &[SymbolRef] {
        self.symbols[class.0 as usize].linearization.get_or_init(|| {
            let mut out: Vec<SymbolRef> = vec![class];
            let data = self.symbol(class);
            for &mixin in data.mixins.iter().rev() {
                for &ancestor in self.linearization(mixin) {
                    if !out.contains(&ancestor) {
                        out.push(ancestor);
                    }
                }
            }
            if let Some(superclass) = data.superclass {
                for &ancestor in self.linearization(superclass) {
                    if !out.contains(&ancestor) {
                        out.push(ancestor);
                    }
                }
            }
            out.into_boxed_slice()
        })
    }

    /// Find `name` as a method along the linearization of `class`.
    pub fn resolve_method(&self, class: SymbolRef, name: NameRef) -> Option<SymbolRef> {
        self.linearization(class)
            .iter()
            .find_map(|&ancestor| match self.lookup(ancestor, name) {
                Some(found) if self.symbol(found).is_method() => Some(found),
                _ => None,
            })
    }

    /// A class defines behavior when it declares any method that was not
    /// synthesized by a rewriter pass.
    pub fn defines_behavior(&self, class: SymbolRef) -> bool {
        self.symbol(class).members.iter().any(|&member| {
            let data = self.symbol(member);
            data.is_method() && !data.flags.contains(SymbolFlags::REWRITER_SYNTHESIZED)
        })
    }

    /// `Outer::Inner#method` style rendering for diagnostics.
    pub fn show_full_name(&self, sym: SymbolRef, names: &NameTable) -> String {
        let data = self.symbol(sym);
        let own = names.show(data.name);
        if !data.owner.exists() || data.owner == well_known_syms::ROOT {
            return own;
        }
        let sep = if data.is_method() { "#" } else { "::" };
        format!("{}{}{}", self.show_full_name(data.owner, names), sep, own)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Every real symbol, in entry order.
    pub fn iter(&self) -> impl Iterator<Item = (SymbolRef, &Symbol)> {
        self.symbols
            .iter()
            .enumerate()
            .skip(1)
            .map(|(id, data)| (SymbolRef(id as u32), data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn fixture() -> (NameTable, SymbolTable) {
        (NameTable::new(), SymbolTable::new())
    }

    #[test]
    fn enter_symbol_dedupes_by_owner_and_name() {
        let (mut names, mut symbols) = fixture();
        let foo = names.enter_utf8("Foo").unwrap();
        let a = symbols
            .enter_symbol(well_known_syms::ROOT, foo, SymbolFlags::CLASS)
            .unwrap();
        let b = symbols
            .enter_symbol(well_known_syms::ROOT, foo, SymbolFlags::CLASS)
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn frozen_table_rejects_new_symbols_but_not_intern_hits() {
        let (mut names, mut symbols) = fixture();
        let foo = names.enter_utf8("Foo").unwrap();
        let bar = names.enter_utf8("Bar").unwrap();
        let a = symbols
            .enter_symbol(well_known_syms::ROOT, foo, SymbolFlags::CLASS)
            .unwrap();
        symbols.freeze();
        symbols.freeze();
        assert_eq!(
            symbols.enter_symbol(well_known_syms::ROOT, foo, SymbolFlags::CLASS),
            Ok(a)
        );
        assert_eq!(
            symbols.enter_symbol(well_known_syms::ROOT, bar, SymbolFlags::CLASS),
            Err(TableFrozen { table: "symbol" })
        );
    }

    #[test]
    fn linearization_orders_mixins_before_superclass() {
        let (mut names, mut symbols) = fixture();
        let m1 = {
            let n = names.enter_utf8("M1").unwrap();
            symbols.enter_symbol(well_known_syms::ROOT, n, SymbolFlags::MODULE).unwrap()
        };
        let m2 = {
            let n = names.enter_utf8("M2").unwrap();
            symbols.enter_symbol(well_known_syms::ROOT, n, SymbolFlags::MODULE).unwrap()
        };
        let cls = {
            let n = names.enter_utf8("C").unwrap();
            symbols.enter_symbol(well_known_syms::ROOT, n, SymbolFlags::CLASS).unwrap()
        };
        symbols.set_super_class(cls, well_known_syms::OBJECT).unwrap();
        symbols.add_mixin(cls, m1).unwrap();
        symbols.add_mixin(cls, m2).unwrap();
        // Last included mixin wins resolution, then earlier mixins, then the
        // superclass chain.
        assert_eq!(
            symbols.linearization(cls),
            &[cls, m2, m1, well_known_syms::OBJECT]
        );
    }

    #[test]
    fn resolve_method_walks_ancestors() {
        let (mut names, mut symbols) = fixture();
        let meth_name = names.enter_utf8("compute").unwrap();
        let parent = {
            let n = names.enter_utf8("Parent").unwrap();
            symbols.enter_symbol(well_known_syms::ROOT, n, SymbolFlags::CLASS).unwrap()
        };
        let child = {
            let n = names.enter_utf8("Child").unwrap();
            symbols.enter_symbol(well_known_syms::ROOT, n, SymbolFlags::CLASS).unwrap()
        };
        symbols.set_super_class(parent, well_known_syms::OBJECT).unwrap();
        symbols.set_super_class(child, parent).unwrap();
        let meth = symbols.enter_symbol(parent, meth_name, SymbolFlags::METHOD).unwrap();
        assert_eq!(symbols.resolve_method(child, meth_name), Some(meth));
    }

    #[test]
    fn seal_arguments_appends_synthetic_block_arg() {
        let (mut names, mut symbols) = fixture();
        let meth_name = names.enter_utf8("m").unwrap();
        let arg_name = names.enter_utf8("x").unwrap();
        let meth = symbols
            .enter_symbol(well_known_syms::OBJECT, meth_name, SymbolFlags::METHOD)
            .unwrap();
        symbols.add_argument(meth, ArgInfo::positional(arg_name)).unwrap();
        symbols.seal_arguments(meth).unwrap();
        let args = &symbols.symbol(meth).arguments;
        assert_eq!(args.len(), 2);
        assert!(args.last().unwrap().is_block());
        // Arguments added later stay ahead of the block argument.
        let extra = names.enter_utf8("y").unwrap();
        symbols.add_argument(meth, ArgInfo::positional(extra)).unwrap();
        let args = &symbols.symbol(meth).arguments;
        assert_eq!(args.len(), 3);
        assert!(args.last().unwrap().is_block());
        assert_eq!(args[1].name, extra);
    }

    #[test]
    fn rewriter_synthesized_methods_do_not_define_behavior() {
        let (mut names, mut symbols) = fixture();
        let cls = {
            let n = names.enter_utf8("Quiet").unwrap();
            symbols.enter_symbol(well_known_syms::ROOT, n, SymbolFlags::CLASS).unwrap()
        };
        let n = names.enter_utf8("generated").unwrap();
        symbols
            .enter_symbol(cls, n, SymbolFlags::METHOD | SymbolFlags::REWRITER_SYNTHESIZED)
            .unwrap();
        assert!(!symbols.defines_behavior(cls));
        let n2 = names.enter_utf8("handwritten").unwrap();
        symbols.enter_symbol(cls, n2, SymbolFlags::METHOD).unwrap();
        assert!(symbols.defines_behavior(cls));
    }
}
