//! Edit batches and the fast/slow decision.
//!
//! The indexer keeps the per-path structural hashes of the last committed
//! state. An incoming edit batch re-hashes its files; the batch can take the
//! fast path only when every touched file keeps its definition hash, which
//! means only method bodies changed and inference can re-run on those files
//! alone. New files always force the slow path.

use core_state::GlobalState;
use core_tree::{FileHash, Parser, hashing};
use std::sync::Arc;

/// One change set flowing from the preprocessor to the typechecker.
#[derive(Debug, Clone)]
pub struct LSPFileUpdates {
    pub epoch: u32,
    /// Path and new contents, deduplicated: one entry per file, last edit
    /// wins.
    pub files: Vec<(String, String)>,
    /// Hashes of `files`, index-aligned.
    pub hashes: Vec<FileHash>,
    /// Number of client edits merged into this batch.
    pub edit_count: u32,
    pub can_take_fast_path: bool,
    /// This batch's arrival canceled a slow path mid-flight.
    pub canceled_slow_path: bool,
}

/// Hashing and fast-path bookkeeping. Owned by the coordinator; the
/// preprocessor consults it through the task capability queries.
pub struct LSPIndexer {
    parser: Arc<dyn Parser>,
    /// Scratch state: hashing needs a name table for interning.
    scratch: GlobalState,
    committed_hashes: ahash::AHashMap<String, FileHash>,
}

impl LSPIndexer {
    pub fn new(parser: Arc<dyn Parser>) -> Self {
        LSPIndexer {
            parser,
            scratch: GlobalState::new(Arc::new(core_errors::ErrorQueue::new())),
            committed_hashes: ahash::AHashMap::new(),
        }
    }

    pub fn compute_file_hashes(&mut self, files: &[(String, String)]) -> Vec<FileHash> {
        files
            .iter()
            .map(|(path, contents)| {
                let result = self.parser.parse(path, contents, &mut self.scratch.names);
                hashing::hash_tree(&result.tree)
            })
            .collect()
    }

    /// Fast iff every file is already known and its definition digest is
    /// unchanged.
    pub fn can_take_fast_path(&self, files: &[(String, String)], hashes: &[FileHash]) -> bool {
        debug_assert_eq!(files.len(), hashes.len());
        files.iter().zip(hashes).all(|((path, _), hash)| {
            self.committed_hashes
                .get(path)
                .is_some_and(|committed| committed.same_definitions(*hash))
        })
    }

    /// Record the batch as the committed view of those files. Called when
    /// the typechecker commits the epoch (fast path commits immediately).
    pub fn commit_hashes(&mut self, files: &[(String, String)], hashes: &[FileHash]) {
        for ((path, _), hash) in files.iter().zip(hashes) {
            self.committed_hashes.insert(path.clone(), *hash);
        }
    }

    pub fn parser(&self) -> Arc<dyn Parser> {
        self.parser.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_tree::NullParser;

    fn indexer() -> LSPIndexer {
        LSPIndexer::new(Arc::new(NullParser))
    }

    #[test]
    fn unknown_files_force_the_slow_path() {
        let mut indexer = indexer();
        let files = vec![("a.rb".to_owned(), "x = 1\n".to_owned())];
        let hashes = indexer.compute_file_hashes(&files);
        assert!(!indexer.can_take_fast_path(&files, &hashes));
    }

    #[test]
    fn known_files_with_same_definitions_take_the_fast_path() {
        let mut indexer = indexer();
        let files = vec![("a.rb".to_owned(), "x = 1\n".to_owned())];
        let hashes = indexer.compute_file_hashes(&files);
        indexer.commit_hashes(&files, &hashes);

        // The null parser sees every body as the same empty tree, so a body
        // edit keeps the definition hash.
        let edited = vec![("a.rb".to_owned(), "x = 2\n".to_owned())];
        let edited_hashes = indexer.compute_file_hashes(&edited);
        assert!(indexer.can_take_fast_path(&edited, &edited_hashes));
    }

    /// Merged batches hash to the same summary as the final state alone.
    #[test]
    fn merged_batch_hash_equals_hash_of_later_state() {
        let mut indexer = indexer();
        let merged = vec![("a.rb".to_owned(), "final contents".to_owned())];
        let direct = vec![("a.rb".to_owned(), "final contents".to_owned())];
        assert_eq!(
            indexer.compute_file_hashes(&merged),
            indexer.compute_file_hashes(&direct)
        );
    }
}
