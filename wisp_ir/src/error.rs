use thiserror::Error;
use wisp_common::Pos;

/// Errors the IR generator can report. Generation never aborts on these: a
/// missing symbol or an unhandled node shape still produces *some* value
/// (typically `Default`) so lowering can continue.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GenError {
    #[error("undefined symbol {name:?}")]
    UndefinedSymbol { name: String, pos: Pos, end: Pos },

    #[error("generator does not handle this node shape")]
    UnhandledNode { pos: Pos, end: Pos },
}

impl GenError {
    pub fn span(&self) -> (Pos, Pos) {
        match self {
            GenError::UndefinedSymbol { pos, end, .. } | GenError::UnhandledNode { pos, end } => {
                (*pos, *end)
            }
        }
    }
}

pub type GenResult<T> = Result<T, GenError>;
