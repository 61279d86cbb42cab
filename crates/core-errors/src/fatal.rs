//! Unrecoverable failures that unwind to the top-level handlers.
//!
//! Recoverable problems go to the error queue; these do not. An
//! `EarlyReturnWithCode` asks the process to stop with a specific exit code
//! after a fatal configuration problem; `Internal` marks an invariant
//! violation worth a backtrace.

#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("exiting with code {0}")]
    EarlyReturnWithCode(i32),
    #[error("internal error: {0}")]
    Internal(String),
}

impl FatalError {
    pub fn exit_code(&self) -> i32 {
        match self {
            FatalError::EarlyReturnWithCode(code) => *code,
            FatalError::Internal(_) => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(FatalError::EarlyReturnWithCode(64).exit_code(), 64);
        assert_eq!(FatalError::Internal("bad".into()).exit_code(), 1);
    }
}
