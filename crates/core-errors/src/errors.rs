//! Error values.
//!
//! An [`Error`] is immutable once built: a primary loc, a class (code plus
//! the minimum strictness level at which it is reported), a rendered header,
//! optional detail sections, and autocorrects. Silenced errors are counted
//! but never rendered; critical errors mark invariant violations and jump the
//! queue at flush time.

use crate::autocorrect::AutocorrectSuggestion;
use core_loc::{FileTable, Loc, StrictLevel};

/// An error code plus the strictness level that activates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorClass {
    pub code: u16,
    pub min_level: StrictLevel,
}

impl ErrorClass {
    pub const fn new(code: u16, min_level: StrictLevel) -> Self {
        ErrorClass { code, min_level }
    }

    /// Internal invariant violations; always reported, never silenced.
    pub const fn internal() -> Self {
        ErrorClass::new(1001, StrictLevel::Ignore)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorLine {
    pub loc: Loc,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ErrorSection {
    pub header: String,
    pub lines: Vec<ErrorLine>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Error {
    pub loc: Loc,
    pub what: ErrorClass,
    pub header: String,
    pub sections: Vec<ErrorSection>,
    pub autocorrects: Vec<AutocorrectSuggestion>,
    pub is_silenced: bool,
    pub is_critical: bool,
}

impl Error {
    pub fn new(loc: Loc, what: ErrorClass, header: impl Into<String>) -> Self {
        let header = header.into();
        debug_assert!(!header.ends_with('.'), "error headers do not end with a period");
        debug_assert!(!header.contains('\n'), "error headers are single-line");
        Error {
            loc,
            what,
            header,
            sections: Vec::new(),
            autocorrects: Vec::new(),
            is_silenced: false,
            is_critical: false,
        }
    }

    pub fn critical(loc: Loc, header: impl Into<String>) -> Self {
        let mut e = Error::new(loc, ErrorClass::internal(), header);
        e.is_critical = true;
        e
    }

    pub fn with_section(mut self, section: ErrorSection) -> Self {
        self.sections.push(section);
        self
    }

    pub fn with_autocorrect(mut self, suggestion: AutocorrectSuggestion) -> Self {
        self.autocorrects.push(suggestion);
        self
    }

    pub fn silenced(mut self) -> Self {
        self.is_silenced = true;
        self
    }

    /// Render for terminal output. Stable format:
    /// `path:line:col-line:col: header http://srb.help/<code>` followed by
    /// indented sections.
    pub fn render(&self, files: &FileTable) -> String {
        let mut out = format!("{}: {} http://srb.help/{}", self.loc.show(files), self.header, self.what.code);
        for section in &self.sections {
            out.push_str("\n  ");
            out.push_str(&section.header);
            for line in &section.lines {
                out.push_str("\n    ");
                if line.loc.exists() {
                    out.push_str(&line.loc.show(files));
                    out.push_str(": ");
                }
                out.push_str(&line.message);
            }
        }
        out
    }
}
