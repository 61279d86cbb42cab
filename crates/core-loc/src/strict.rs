//! Per-file strictness sigils.
//!
//! A file opts into type checking with a magic comment near the top of the
//! file (`# typed: strict`). An analogous `# compiled:` sigil is recognized
//! and recorded, although nothing in the analysis core consumes it.

/// How strictly a file is checked, in increasing order. The ordering is
/// load-bearing: an error class with a minimum level is only reported in
/// files at or above that level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum StrictLevel {
    /// Not even parsed for errors; the file contributes definitions only.
    Ignore,
    /// Parsed, definitions entered, no type errors reported.
    #[default]
    False,
    /// Type errors in method bodies are reported.
    True,
    /// Additionally requires signatures and typed constants.
    Strict,
    /// Everything; reserved for fully-converted files.
    Strong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompiledLevel {
    #[default]
    None,
    False,
    True,
}

/// Scan the leading comment block for a `# typed:` sigil. Only the first 32
/// lines are considered; anything after real code starts cannot change the
/// level.
pub fn parse_strict_sigil(source: &str) -> StrictLevel {
    for line in source.lines().take(32) {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("# typed:") {
            return match rest.trim() {
                "ignore" => StrictLevel::Ignore,
                "false" => StrictLevel::False,
                "true" => StrictLevel::True,
                "strict" => StrictLevel::Strict,
                "strong" => StrictLevel::Strong,
                _ => StrictLevel::False,
            };
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            break;
        }
    }
    StrictLevel::False
}

pub fn parse_compiled_sigil(source: &str) -> CompiledLevel {
    for line in source.lines().take(32) {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("# compiled:") {
            return match rest.trim() {
                "true" => CompiledLevel::True,
                _ => CompiledLevel::False,
            };
        }
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            break;
        }
    }
    CompiledLevel::None
}
