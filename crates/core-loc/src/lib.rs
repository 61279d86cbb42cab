//! Source files and byte-range locations.
//!
//! This crate sits at the bottom of the workspace graph: everything that
//! reports a position, prints a snippet, or applies an autocorrect speaks in
//! terms of [`FileRef`] + [`LocOffsets`]. Files are identified by a 32-bit
//! handle into a per-build [`FileTable`]; source text is immutable once
//! entered. Line/column pairs are never stored; they are derived lazily from
//! a per-file line index the first time a position is rendered.

use std::fmt;
use std::sync::{Arc, OnceLock};

pub mod strict;

pub use strict::{CompiledLevel, StrictLevel};

/// Handle to a [`File`] in the build's [`FileTable`].
///
/// Id 0 is reserved for "no file": the default `FileRef` does not exist and
/// compares unequal to every real file. Handles are never invalidated; the
/// table grows monotonically for the lifetime of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FileRef(u32);

impl FileRef {
    pub fn from_raw(id: u32) -> Self {
        FileRef(id)
    }

    pub fn id(self) -> u32 {
        self.0
    }

    /// True for every handle except the reserved "no file" sentinel.
    pub fn exists(self) -> bool {
        self.0 != 0
    }
}

/// An immutable source file plus the metadata later phases need.
#[derive(Debug)]
pub struct File {
    path: String,
    source: Arc<str>,
    strict: StrictLevel,
    compiled: CompiledLevel,
    /// The LSP epoch that introduced this version of the file. Zero for files
    /// entered outside of server mode.
    pub epoch: u32,
    line_breaks: OnceLock<Vec<u32>>,
}

impl File {
    pub fn new(path: String, source: String, epoch: u32) -> Self {
        let strict = strict::parse_strict_sigil(&source);
        let compiled = strict::parse_compiled_sigil(&source);
        File {
            path,
            source: source.into(),
            strict,
            compiled,
            epoch,
            line_breaks: OnceLock::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn strict(&self) -> StrictLevel {
        self.strict
    }

    pub fn compiled(&self) -> CompiledLevel {
        self.compiled
    }

    /// Byte offsets of every `\n`, computed on first use.
    fn line_breaks(&self) -> &[u32] {
        self.line_breaks.get_or_init(|| {
            self.source
                .bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i as u32)
                .collect()
        })
    }

    /// Translate a byte offset into a zero-based line/column pair.
    ///
    /// Offsets past the end of the file clamp to the final position rather
    /// than panicking; stale locs can outlive an edited file in server mode.
    pub fn position(&self, offset: u32) -> Position {
        let offset = offset.min(self.source.len() as u32);
        let breaks = self.line_breaks();
        let line = breaks.partition_point(|&b| b < offset);
        let line_start = if line == 0 { 0 } else { breaks[line - 1] + 1 };
        Position {
            line: line as u32,
            column: offset - line_start,
        }
    }
}

/// Zero-based line/column, derived lazily from file text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// The per-build registry of files.
///
/// Paths are unique: entering a path twice replaces the stored file (the new
/// epoch wins) but keeps the original handle so outstanding `FileRef`s stay
/// valid. Index 0 holds a placeholder so `FileRef(0)` never resolves.
#[derive(Debug)]
pub struct FileTable {
    files: Vec<File>,
    by_path: ahash::AHashMap<String, FileRef>,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FileTable {
    pub fn new() -> Self {
        FileTable {
            files: vec![File::new(String::new(), String::new(), 0)],
            by_path: ahash::AHashMap::new(),
        }
    }

    /// Enter a file, returning its handle. Re-entering an existing path
    /// replaces the contents in place and returns the original handle.
    pub fn enter_file(&mut self, path: &str, source: String, epoch: u32) -> FileRef {
        if let Some(&existing) = self.by_path.get(path) {
            tracing::trace!(target: "files", path, epoch, "replacing file contents");
            self.files[existing.0 as usize] = File::new(path.to_owned(), source, epoch);
            return existing;
        }
        let fref = FileRef(self.files.len() as u32);
        self.files.push(File::new(path.to_owned(), source, epoch));
        self.by_path.insert(path.to_owned(), fref);
        fref
    }

    pub fn lookup(&self, path: &str) -> Option<FileRef> {
        self.by_path.get(path).copied()
    }

    /// Panics on the reserved handle; callers check `exists()` first.
    pub fn file(&self, fref: FileRef) -> &File {
        assert!(fref.exists(), "dereferenced FileRef::none");
        &self.files[fref.0 as usize]
    }

    pub fn len(&self) -> usize {
        self.files.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Largest file id currently allocated (inclusive).
    pub fn max_file_id(&self) -> u32 {
        (self.files.len() - 1) as u32
    }

    pub fn iter(&self) -> impl Iterator<Item = FileRef> + '_ {
        (1..self.files.len() as u32).map(FileRef)
    }
}

/// A byte range within an implicit file.
///
/// `begin == end` denotes a zero-width loc (an insertion point). The reserved
/// `NONE` value means "no location"; it never overlaps anything, including
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocOffsets {
    pub begin: u32,
    pub end: u32,
}

impl LocOffsets {
    const NONE_SENTINEL: u32 = u32::MAX;

    pub fn new(begin: u32, end: u32) -> Self {
        debug_assert!(begin <= end, "inverted loc {begin}..{end}");
        LocOffsets { begin, end }
    }

    pub fn none() -> Self {
        LocOffsets {
            begin: Self::NONE_SENTINEL,
            end: Self::NONE_SENTINEL,
        }
    }

    pub fn exists(self) -> bool {
        self.begin != Self::NONE_SENTINEL
    }

    pub fn is_zero_width(self) -> bool {
        self.exists() && self.begin == self.end
    }

    /// Smallest range containing both.
    pub fn join(self, other: LocOffsets) -> LocOffsets {
        match (self.exists(), other.exists()) {
            (false, _) => other,
            (_, false) => self,
            _ => LocOffsets::new(self.begin.min(other.begin), self.end.max(other.end)),
        }
    }
}

/// A [`LocOffsets`] pinned to a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Loc {
    file: FileRef,
    offsets: LocOffsets,
}

impl Loc {
    pub fn new(file: FileRef, offsets: LocOffsets) -> Self {
        Loc { file, offsets }
    }

    pub fn none() -> Self {
        Loc {
            file: FileRef::default(),
            offsets: LocOffsets::none(),
        }
    }

    pub fn exists(self) -> bool {
        self.file.exists() && self.offsets.exists()
    }

    pub fn file(self) -> FileRef {
        self.file
    }

    pub fn offsets(self) -> LocOffsets {
        self.offsets
    }

    pub fn begin(self) -> u32 {
        self.offsets.begin
    }

    pub fn end(self) -> u32 {
        self.offsets.end
    }

    pub fn len(self) -> u32 {
        self.offsets.end - self.offsets.begin
    }

    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Byte ranges intersect in the same file. `Loc::none` overlaps nothing.
    pub fn overlaps(self, other: Loc) -> bool {
        if !self.exists() || !other.exists() || self.file != other.file {
            return false;
        }
        self.begin() < other.end() && other.begin() < self.end()
    }

    /// True when `other` lies entirely within `self` (same file).
    pub fn contains(self, other: Loc) -> bool {
        self.exists()
            && other.exists()
            && self.file == other.file
            && self.begin() <= other.begin()
            && other.end() <= self.end()
    }

    /// Render as `path:line:col-line:col` (one-based) for terminal output.
    pub fn show(self, files: &FileTable) -> String {
        if !self.exists() {
            return "???".to_owned();
        }
        let file = files.file(self.file);
        let begin = file.position(self.begin());
        let end = file.position(self.end());
        format!(
            "{}:{}:{}-{}:{}",
            file.path(),
            begin.line + 1,
            begin.column + 1,
            end.line + 1,
            end.column + 1
        )
    }

    /// The source text this loc covers.
    pub fn source(self, files: &FileTable) -> Option<String> {
        if !self.exists() {
            return None;
        }
        let file = files.file(self.file);
        file.source()
            .get(self.begin() as usize..self.end() as usize)
            .map(str::to_owned)
    }
}

impl fmt::Display for LocOffsets {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exists() {
            write!(f, "{}..{}", self.begin, self.end)
        } else {
            write!(f, "???")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table_with(source: &str) -> (FileTable, FileRef) {
        let mut files = FileTable::new();
        let fref = files.enter_file("a.rb", source.to_owned(), 0);
        (files, fref)
    }

    #[test]
    fn positions_are_lazy_and_zero_based() {
        let (files, fref) = table_with("ab\ncd\n");
        let file = files.file(fref);
        assert_eq!(file.position(0), Position { line: 0, column: 0 });
        assert_eq!(file.position(3), Position { line: 1, column: 0 });
        assert_eq!(file.position(4), Position { line: 1, column: 1 });
        // Past-the-end clamps.
        assert_eq!(file.position(999), Position { line: 2, column: 0 });
    }

    #[test]
    fn reentering_a_path_keeps_the_handle() {
        let mut files = FileTable::new();
        let first = files.enter_file("a.rb", "old".to_owned(), 1);
        let second = files.enter_file("a.rb", "new".to_owned(), 2);
        assert_eq!(first, second);
        assert_eq!(files.file(first).source(), "new");
        assert_eq!(files.file(first).epoch, 2);
    }

    #[test]
    fn none_overlaps_nothing() {
        let (_, fref) = table_with("abcdef");
        let real = Loc::new(fref, LocOffsets::new(0, 3));
        assert!(!Loc::none().overlaps(real));
        assert!(!real.overlaps(Loc::none()));
        assert!(!Loc::none().overlaps(Loc::none()));
    }

    #[test]
    fn overlap_is_strict_intersection() {
        let (_, fref) = table_with("abcdef");
        let a = Loc::new(fref, LocOffsets::new(0, 3));
        let b = Loc::new(fref, LocOffsets::new(2, 5));
        let c = Loc::new(fref, LocOffsets::new(3, 6));
        assert!(a.overlaps(b));
        assert!(!a.overlaps(c), "touching ranges do not overlap");
    }

    #[test]
    fn show_renders_one_based() {
        let (files, fref) = table_with("ab\ncd\n");
        let loc = Loc::new(fref, LocOffsets::new(3, 5));
        assert_eq!(loc.show(&files), "a.rb:2:1-2:3");
    }
}
