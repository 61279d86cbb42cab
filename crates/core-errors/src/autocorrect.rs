//! Autocorrect suggestions and their application to source text.
//!
//! Application is deliberately picky: edits are normalized (adjacent
//! zero-width insertions at one position merge in insertion order), the
//! surviving set is chosen scanning forward so the earliest edit wins a
//! conflict, and survivors are applied back to front so earlier offsets stay
//! valid while later text shifts.

use core_loc::{FileRef, FileTable, Loc};

/// One byte-range replacement. A zero-width loc is an insertion point.
#[derive(Debug, Clone, PartialEq)]
pub struct Edit {
    pub loc: Loc,
    pub replacement: String,
}

/// A titled group of edits that together fix one reported problem.
#[derive(Debug, Clone, PartialEq)]
pub struct AutocorrectSuggestion {
    pub title: String,
    pub edits: Vec<Edit>,
}

impl AutocorrectSuggestion {
    pub fn new(title: impl Into<String>, edits: Vec<Edit>) -> Self {
        AutocorrectSuggestion {
            title: title.into(),
            edits,
        }
    }
}

/// Merge adjacent zero-width insertions at the same position, concatenating
/// their replacement text in insertion order. Sorting is stable on begin
/// position so the insertion order of equal keys survives.
pub fn merge_adjacent_edits(edits: &mut Vec<Edit>) {
    edits.sort_by_key(|e| (e.loc.file(), e.loc.begin()));
    let mut i = 0;
    while !edits.is_empty() && i + 1 < edits.len() {
        let same_point = edits[i].loc.file() == edits[i + 1].loc.file()
            && edits[i].loc.begin() == edits[i + 1].loc.begin()
            && edits[i].loc.is_empty()
            && edits[i + 1].loc.is_empty();
        if same_point {
            let next = edits.remove(i + 1);
            edits[i].replacement.push_str(&next.replacement);
        } else {
            i += 1;
        }
    }
}

fn conflicts(kept: &[Loc], loc: Loc) -> bool {
    kept.iter().any(|seen| {
        // Exact equality catches zero-width duplicates that survive merging
        // (they overlap nothing by the strict intersection rule).
        *seen == loc || seen.overlaps(loc)
    })
}

/// Apply every edit from `autocorrects` to the file contents held in
/// `files`, returning the new text per touched file.
///
/// Edits that overlap an already-kept edit are dropped; the earliest edit in
/// `(file, begin)` order wins. `Loc::none` edits are skipped outright and
/// never recorded as seen.
pub fn apply(
    files: &FileTable,
    autocorrects: &[AutocorrectSuggestion],
) -> ahash::AHashMap<FileRef, String> {
    let mut edits: Vec<Edit> = autocorrects
        .iter()
        .flat_map(|a| a.edits.iter().cloned())
        .filter(|e| e.loc.exists())
        .collect();
    merge_adjacent_edits(&mut edits);

    // Forward scan decides survival: the first edit to claim a range keeps it.
    let mut kept_locs: Vec<Loc> = Vec::with_capacity(edits.len());
    let mut survivors: Vec<Edit> = Vec::with_capacity(edits.len());
    for edit in edits {
        if conflicts(&kept_locs, edit.loc) {
            tracing::debug!(target: "autocorrect", loc = %edit.loc.offsets(), "dropping overlapping edit");
            continue;
        }
        kept_locs.push(edit.loc);
        survivors.push(edit);
    }

    // Apply from the end of each file so begin offsets stay stable.
    survivors.sort_by(|a, b| {
        b.loc
            .file()
            .cmp(&a.loc.file())
            .then(b.loc.begin().cmp(&a.loc.begin()))
    });

    let mut out: ahash::AHashMap<FileRef, String> = ahash::AHashMap::new();
    for edit in survivors {
        let file = edit.loc.file();
        let source = out
            .entry(file)
            .or_insert_with(|| files.file(file).source().to_owned());
        let begin = edit.loc.begin() as usize;
        let end = edit.loc.end() as usize;
        source.replace_range(begin..end, &edit.replacement);
    }
    out
}
