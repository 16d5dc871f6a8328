use thiserror::Error;
use wisp_common::Pos;
use wisp_lexer::TokenKind;

/// Errors the parser can report. Parsing never aborts on these: each is
/// recorded and the parser keeps going, producing a best-effort tree.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("expected {expected:?}, found {found:?}")]
    UnexpectedToken {
        pos: Pos,
        end: Pos,
        found: TokenKind,
        expected: TokenKind,
    },

    #[error("expected an expression")]
    ExpectedExpression { pos: Pos, end: Pos },

    #[error("did not consume all tokens")]
    TrailingTokens { pos: Pos, end: Pos },
}

impl ParseError {
    pub fn span(&self) -> (Pos, Pos) {
        match self {
            ParseError::UnexpectedToken { pos, end, .. }
            | ParseError::ExpectedExpression { pos, end }
            | ParseError::TrailingTokens { pos, end } => (*pos, *end),
        }
    }
}

pub type ParseResult<T> = Result<T, ParseError>;
