use thiserror::Error;
use wisp_common::Pos;

/// Errors the lexer can report. These do not stop scanning: the lexer
/// records the diagnostic and still returns the best-effort token.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unexpected character {character:?}")]
    UnexpectedCharacter { pos: Pos, end: Pos, character: char },

    #[error("unterminated string literal")]
    UnterminatedString { pos: Pos, end: Pos },

    #[error("unterminated rune literal")]
    UnterminatedRune { pos: Pos, end: Pos },
}

impl LexError {
    pub fn span(&self) -> (Pos, Pos) {
        match self {
            LexError::UnexpectedCharacter { pos, end, .. }
            | LexError::UnterminatedString { pos, end }
            | LexError::UnterminatedRune { pos, end } => (*pos, *end),
        }
    }
}

pub type LexResult<T> = Result<T, LexError>;
