//! The parser boundary.
//!
//! Parsing is an external collaborator: real deployments link a full parser
//! that produces the tree nodes plus its own diagnostics, which flow into
//! the error pipeline as user errors. [`NullParser`] is the degenerate
//! implementation used by the binary when no parser is linked and by tests
//! that construct trees programmatically: every file, including an empty
//! one, parses to a tree with a single root class def and no diagnostics.

use crate::{Tree, make};
use core_loc::LocOffsets;
use core_names::NameTable;

#[derive(Debug, Clone, PartialEq)]
pub struct ParseDiagnostic {
    pub loc: LocOffsets,
    pub message: String,
}

#[derive(Debug)]
pub struct ParseResult {
    pub tree: Tree,
    pub diagnostics: Vec<ParseDiagnostic>,
}

pub trait Parser: Send + Sync {
    fn parse(&self, path: &str, source: &str, names: &mut NameTable) -> ParseResult;
}

#[derive(Debug, Default)]
pub struct NullParser;

impl Parser for NullParser {
    fn parse(&self, _path: &str, _source: &str, _names: &mut NameTable) -> ParseResult {
        ParseResult {
            tree: make::root(Vec::new()),
            diagnostics: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Node;

    #[test]
    fn empty_file_parses_to_root_class_def() {
        let mut names = NameTable::new();
        let result = NullParser.parse("empty.rb", "", &mut names);
        assert!(result.diagnostics.is_empty());
        match result.tree.node {
            Node::ClassDef { name, ref body, .. } => {
                assert_eq!(name, core_names::well_known::ROOT);
                assert!(body.is_empty());
            }
            other => panic!("expected root class def, got {other:?}"),
        }
    }
}
