//! The global name table.
//!
//! Names are compact handles; equality and hashing go through the handle and
//! printing goes through the table. Names are never deleted. Id 0 is the
//! "no name" sentinel.

use crate::TableFrozen;

/// Handle into the [`NameTable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct NameRef(u32);

impl NameRef {
    pub fn from_raw(id: u32) -> Self {
        NameRef(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    pub fn exists(self) -> bool {
        self.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// A UTF-8 identifier as written in source.
    Utf8,
    /// A uniquely-suffixed synthetic name derived from another name.
    Unique,
    /// A constant reference name.
    Constant,
}

#[derive(Debug, Clone)]
enum NameData {
    None,
    Utf8(String),
    Unique { original: NameRef, num: u32 },
    Constant { original: NameRef },
}

/// Reserved names, entered by [`NameTable::new`] in a fixed order so their
/// handles are compile-time constants. A local variable whose name is in this
/// set is a compiler temporary.
pub mod names {
    use super::NameRef;

    pub const STAT_TEMP: NameRef = NameRef(1);
    pub const RETURN_TEMP: NameRef = NameRef(2);
    pub const IF_TEMP: NameRef = NameRef(3);
    pub const COND_TEMP: NameRef = NameRef(4);
    pub const WHILE_TEMP: NameRef = NameRef(5);
    pub const SELF_LOCAL: NameRef = NameRef(6);
    pub const BLOCK_ARG: NameRef = NameRef(7);
    pub const RESCUE_TEMP: NameRef = NameRef(8);
    pub const EXCEPTION_VALUE: NameRef = NameRef(9);
    pub const FINAL_RETURN: NameRef = NameRef(10);
    pub const BLOCK_PRE_CALL_TEMP: NameRef = NameRef(11);
    pub const ROOT: NameRef = NameRef(12);

    pub(super) const RESERVED: [(NameRef, &str); 12] = [
        (STAT_TEMP, "<statTemp>"),
        (RETURN_TEMP, "<returnTemp>"),
        (IF_TEMP, "<ifTemp>"),
        (COND_TEMP, "<condTemp>"),
        (WHILE_TEMP, "<whileTemp>"),
        (SELF_LOCAL, "<self>"),
        (BLOCK_ARG, "<blk>"),
        (RESCUE_TEMP, "<rescueTemp>"),
        (EXCEPTION_VALUE, "<exceptionValue>"),
        (FINAL_RETURN, "<finalReturn>"),
        (BLOCK_PRE_CALL_TEMP, "<blockPreCallTemp>"),
        (ROOT, "<root>"),
    ];

    // Names of the core classes every build starts with. These sit right
    // after the reserved temporaries but are ordinary source names: a local
    // called `Integer` would not be treated as a compiler temporary.
    pub const OBJECT: NameRef = NameRef(13);
    pub const INTEGER: NameRef = NameRef(14);
    pub const FLOAT: NameRef = NameRef(15);
    pub const STRING: NameRef = NameRef(16);
    pub const SYMBOL_CLASS: NameRef = NameRef(17);
    pub const NIL_CLASS: NameRef = NameRef(18);
    pub const TRUE_CLASS: NameRef = NameRef(19);
    pub const FALSE_CLASS: NameRef = NameRef(20);
    pub const STANDARD_ERROR: NameRef = NameRef(21);

    pub(super) const CORE_CLASSES: [(NameRef, &str); 9] = [
        (OBJECT, "Object"),
        (INTEGER, "Integer"),
        (FLOAT, "Float"),
        (STRING, "String"),
        (SYMBOL_CLASS, "Symbol"),
        (NIL_CLASS, "NilClass"),
        (TRUE_CLASS, "TrueClass"),
        (FALSE_CLASS, "FalseClass"),
        (STANDARD_ERROR, "StandardError"),
    ];
}

#[derive(Debug)]
pub struct NameTable {
    entries: Vec<NameData>,
    utf8_index: ahash::AHashMap<String, NameRef>,
    constant_index: ahash::AHashMap<NameRef, NameRef>,
    unique_counter: u32,
    reserved_limit: u32,
    frozen: bool,
}

impl Default for NameTable {
    fn default() -> Self {
        Self::new()
    }
}

impl NameTable {
    pub fn new() -> Self {
        let mut table = NameTable {
            entries: vec![NameData::None],
            utf8_index: ahash::AHashMap::new(),
            constant_index: ahash::AHashMap::new(),
            unique_counter: 0,
            reserved_limit: 0,
            frozen: false,
        };
        for (expected, raw) in names::RESERVED {
            let entered = table.enter_utf8(raw).unwrap();
            assert_eq!(entered, expected, "reserved name {raw} entered out of order");
        }
        table.reserved_limit = table.entries.len() as u32;
        for (expected, raw) in names::CORE_CLASSES {
            let entered = table.enter_utf8(raw).unwrap();
            assert_eq!(entered, expected, "core class name {raw} entered out of order");
        }
        table
    }

    fn check_unfrozen(&self) -> Result<(), TableFrozen> {
        if self.frozen {
            Err(TableFrozen { table: "name" })
        } else {
            Ok(())
        }
    }

    /// Freeze the table. Idempotent; afterwards every `enter_*` fails.
    pub fn freeze(&mut self) {
        if !self.frozen {
            tracing::debug!(target: "tables", names = self.entries.len(), "freezing name table");
            self.frozen = true;
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn enter_utf8(&mut self, raw: &str) -> Result<NameRef, TableFrozen> {
        if let Some(&existing) = self.utf8_index.get(raw) {
            return Ok(existing);
        }
        self.check_unfrozen()?;
        let name = NameRef(self.entries.len() as u32);
        self.entries.push(NameData::Utf8(raw.to_owned()));
        self.utf8_index.insert(raw.to_owned(), name);
        Ok(name)
    }

    /// A fresh synthetic name derived from `original`. Never deduplicated:
    /// each call mints a new suffix.
    pub fn fresh_unique(&mut self, original: NameRef) -> Result<NameRef, TableFrozen> {
        self.check_unfrozen()?;
        self.unique_counter += 1;
        let name = NameRef(self.entries.len() as u32);
        self.entries.push(NameData::Unique {
            original,
            num: self.unique_counter,
        });
        Ok(name)
    }

    pub fn enter_constant(&mut self, original: NameRef) -> Result<NameRef, TableFrozen> {
        if let Some(&existing) = self.constant_index.get(&original) {
            return Ok(existing);
        }
        self.check_unfrozen()?;
        let name = NameRef(self.entries.len() as u32);
        self.entries.push(NameData::Constant { original });
        self.constant_index.insert(original, name);
        Ok(name)
    }

    pub fn kind(&self, name: NameRef) -> NameKind {
        match &self.entries[name.0 as usize] {
            NameData::None | NameData::Utf8(_) => NameKind::Utf8,
            NameData::Unique { .. } => NameKind::Unique,
            NameData::Constant { .. } => NameKind::Constant,
        }
    }

    /// Membership in the fixed reserved-name set entered at construction.
    pub fn is_reserved(&self, name: NameRef) -> bool {
        name.exists() && name.0 < self.reserved_limit
    }

    pub fn show(&self, name: NameRef) -> String {
        match &self.entries[name.0 as usize] {
            NameData::None => "<none>".to_owned(),
            NameData::Utf8(raw) => raw.clone(),
            NameData::Unique { original, num } => format!("{}${}", self.show(*original), num),
            NameData::Constant { original } => self.show(*original),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn utf8_names_dedupe() {
        let mut names = NameTable::new();
        let a = names.enter_utf8("foo").unwrap();
        let b = names.enter_utf8("foo").unwrap();
        assert_eq!(a, b);
        assert_eq!(names.show(a), "foo");
    }

    #[test]
    fn unique_names_never_dedupe() {
        let mut names = NameTable::new();
        let base = names.enter_utf8("tmp").unwrap();
        let a = names.fresh_unique(base).unwrap();
        let b = names.fresh_unique(base).unwrap();
        assert_ne!(a, b);
        assert_ne!(names.show(a), names.show(b));
    }

    #[test]
    fn freeze_is_idempotent_and_rejects_writes() {
        let mut names = NameTable::new();
        let foo = names.enter_utf8("foo").unwrap();
        names.freeze();
        names.freeze();
        assert!(names.is_frozen());
        // Existing names still intern-hit without error.
        assert_eq!(names.enter_utf8("foo").unwrap(), foo);
        assert_eq!(names.enter_utf8("bar"), Err(TableFrozen { table: "name" }));
        // Reads still work lock-free.
        assert_eq!(names.show(foo), "foo");
    }

    #[test]
    fn reserved_ids_match_constants() {
        let names = NameTable::new();
        assert_eq!(names.show(names::SELF_LOCAL), "<self>");
        assert_eq!(names.show(names::BLOCK_ARG), "<blk>");
        assert!(names.is_reserved(names::ROOT));
    }
}
