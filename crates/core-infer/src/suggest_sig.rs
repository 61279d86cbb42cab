//! Signature suggestions.
//!
//! Two consumers: the `SuggestSig` query answers an editor code-action with
//! an `Edit` response, and strict files with unsignatured methods get an
//! error carrying the same insertion as an autocorrect. Both produce a
//! zero-width insertion at the start of the definition's line, preserving
//! its indentation; adjacent suggestions at one point merge downstream.

use crate::InferredSig;
use core_errors::{AutocorrectSuggestion, Edit, Error, ErrorClass};
use core_loc::{FileRef, Loc, LocOffsets, StrictLevel};
use core_names::SymbolRef;
use core_query::{QueryResponse, ResponseEdit};
use core_state::GlobalState;

/// Missing signature in a `# typed: strict` file.
pub const MISSING_SIG: ErrorClass = ErrorClass::new(7017, StrictLevel::Strict);

pub fn run(gs: &GlobalState, method: SymbolRef, sig: &InferredSig, file: FileRef) {
    let def_loc = gs.symbols.symbol(method).loc();
    if !def_loc.exists() || def_loc.file() != file {
        return;
    }
    let Some((insert_at, indent)) = insertion_point(gs, def_loc) else {
        return;
    };
    let rendered = format!("{indent}{}\n", render_sig(gs, sig));
    let insert_loc = Loc::new(file, LocOffsets::new(insert_at, insert_at));

    if gs.lsp_query.matches_suggest_sig(method) {
        gs.push_query_response(QueryResponse::Edit {
            loc: def_loc,
            title: "Insert a signature".to_owned(),
            edits: vec![ResponseEdit {
                loc: insert_loc,
                replacement: rendered.clone(),
            }],
        });
    }

    let has_sig = gs.symbols.symbol(method).result_type.is_some();
    if !has_sig && gs.should_report(MISSING_SIG, file) {
        let error = Error::new(
            def_loc,
            MISSING_SIG,
            format!(
                "The method `{}` does not have a `sig`",
                gs.names.show(gs.symbols.symbol(method).name)
            ),
        )
        .with_autocorrect(AutocorrectSuggestion::new(
            format!("Add `sig` for `{}`", gs.names.show(gs.symbols.symbol(method).name)),
            vec![Edit {
                loc: insert_loc,
                replacement: rendered,
            }],
        ));
        gs.report_error(error);
    }
}

/// Byte offset of the start of the line holding `def_loc`, plus that line's
/// leading whitespace.
fn insertion_point(gs: &GlobalState, def_loc: Loc) -> Option<(u32, String)> {
    let source = gs.files.file(def_loc.file()).source();
    let begin = def_loc.begin() as usize;
    if begin > source.len() {
        return None;
    }
    let line_start = source[..begin].rfind('\n').map_or(0, |i| i + 1);
    let indent: String = source[line_start..]
        .chars()
        .take_while(|c| *c == ' ' || *c == '\t')
        .collect();
    Some((line_start as u32, indent))
}

fn render_sig(gs: &GlobalState, sig: &InferredSig) -> String {
    let returns = match &sig.ret {
        core_names::Ty::Void => "void".to_owned(),
        ret => format!("returns({})", ret.show(&gs.names, &gs.symbols)),
    };
    if sig.params.is_empty() {
        format!("sig {{ {returns} }}")
    } else {
        let params: Vec<String> = sig
            .params
            .iter()
            .map(|(name, ty)| format!("{}: {}", gs.names.show(*name), ty.show(&gs.names, &gs.symbols)))
            .collect();
        format!("sig {{ params({}).{returns} }}", params.join(", "))
    }
}
