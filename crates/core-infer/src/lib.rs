//! Type inference: definition indexing (the namer), flow-sensitive type
//! propagation over the CFG, and the per-file pipeline both the batch driver
//! and the language server call into.

pub mod error_classes;
pub mod infer;
pub mod namer;
pub mod pipeline;
pub mod suggest_sig;

pub use infer::{InferredSig, infer_method};
pub use pipeline::{index_file, typecheck_file};
